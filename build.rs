use std::process::Command;

fn main() {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok();

    let build_id = match output {
        Some(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).trim().to_string(),
        _ => "unknown".to_string(),
    };

    // Reported by GET /health so operators can tell which build settled a payout.
    println!("cargo:rustc-env=PAYOUT_ENGINE_BUILD={}", build_id);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
