//! Payout Gateway Client
//!
//! Outbound side of the disbursement flow: resolves partner credentials and
//! submits payout instructions to the external mobile-money gateway.
//!
//! The client performs no storage I/O. Callers (the submission path and the
//! retry scheduler) persist whatever the gateway answered.
//!
//! # Outcome classification
//!
//! ```text
//! Ok(Acknowledgement)        -> gateway queued the payout, result arrives by callback
//! Err(Transient { Timeout }) -> outcome unknown, leave retry-eligible (never mark failed)
//! Err(Transient { .. })      -> network / 5xx / 429 / 401, retry with backoff
//! Err(Permanent { .. })      -> rejected before queuing, never retried
//! ```

pub mod credentials;
pub mod error;
pub mod http;

pub use credentials::{
    CredentialError, CredentialProvider, Environment, PartnerCredentials, PgCredentialProvider,
    StaticCredentialProvider,
};
pub use error::{ProviderError, TransientKind};
pub use http::HttpPayoutProvider;

use async_trait::async_trait;

use crate::disbursement::types::MinorUnits;

/// One payout instruction as sent to the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutInstruction {
    /// Per-attempt idempotency key (`{disbursement_id}-{attempt}`)
    pub idempotency_key: String,
    pub amount: MinorUnits,
    /// Normalised subscriber number (`2547XXXXXXXX`)
    pub msisdn: String,
    pub remarks: String,
    /// Business correlation token echoed back in the callback's reference data
    pub occasion: String,
}

/// Transport-level acceptance returned synchronously by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub conversation_id: String,
    pub originator_conversation_id: String,
    pub response_code: String,
    pub response_description: String,
}

/// Gateway client trait
///
/// Implementations must be safe to call concurrently and must not persist anything.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    /// Get provider name for logging
    fn name(&self) -> &'static str;

    /// Submit a payout instruction and return the gateway's acknowledgement
    async fn submit(
        &self,
        credentials: &PartnerCredentials,
        instruction: &PayoutInstruction,
    ) -> Result<Acknowledgement, ProviderError>;
}

/// Normalise a subscriber number to the gateway's `254XXXXXXXXX` format.
///
/// Accepts `+2547..`, `2547..`, `07..`, `7..`, `01..`, `1..` with optional
/// spaces or dashes. Returns `None` for anything that is not a 12-digit number
/// once normalised.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = if let Some(rest) = digits.strip_prefix("254") {
        format!("254{}", rest)
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{}", rest)
    } else if digits.starts_with('7') || digits.starts_with('1') {
        format!("254{}", digits)
    } else {
        return None;
    };

    if normalized.len() != 12 {
        return None;
    }
    match normalized.as_bytes()[3] {
        b'7' | b'1' => Some(normalized),
        _ => None,
    }
}

/// Mock provider for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted gateway: pops one queued response per call, accepts by default
    pub struct MockProvider {
        responses: Mutex<VecDeque<Result<Acknowledgement, ProviderError>>>,
        calls: Mutex<Vec<PayoutInstruction>>,
        counter: AtomicUsize,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
            }
        }

        pub fn push_response(&self, response: Result<Acknowledgement, ProviderError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        pub fn push_ack(&self, conversation_id: &str) {
            self.push_response(Ok(Acknowledgement {
                conversation_id: conversation_id.to_string(),
                originator_conversation_id: format!("orig-{}", conversation_id),
                response_code: "0".to_string(),
                response_description: "Accept the service request successfully.".to_string(),
            }));
        }

        pub fn calls(&self) -> Vec<PayoutInstruction> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PayoutProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn submit(
            &self,
            _credentials: &PartnerCredentials,
            instruction: &PayoutInstruction,
        ) -> Result<Acknowledgement, ProviderError> {
            self.calls.lock().unwrap().push(instruction.clone());
            let scripted = self.responses.lock().unwrap().pop_front();
            match scripted {
                Some(response) => response,
                None => {
                    let n = self.counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Acknowledgement {
                        conversation_id: format!("AG_MOCK_{}", n),
                        originator_conversation_id: instruction.idempotency_key.clone(),
                        response_code: "0".to_string(),
                        response_description: "Accept the service request successfully."
                            .to_string(),
                    })
                }
            }
        }
    }

    /// Credentials accepted by the mock
    pub fn test_credentials(partner_id: &str) -> PartnerCredentials {
        PartnerCredentials {
            partner_id: partner_id.to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            security_credential: "credential".to_string(),
            initiator_name: "initiator".to_string(),
            shortcode: "600000".to_string(),
            environment: Environment::Sandbox,
            base_url: None,
        }
    }
}

#[cfg(test)]
pub use mock::MockProvider;
