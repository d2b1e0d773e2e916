//! HTTP API
//!
//! Exposes submission, status and retry endpoints, the gateway webhooks,
//! partner wallet operations and the OpenAPI document.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
pub use state::AppState;

/// Build the complete router
pub fn router(state: Arc<AppState>) -> Router {
    let disbursement_routes = Router::new()
        .route("/", post(handlers::submit_disbursement))
        .route("/retry", post(handlers::retry_disbursements))
        .route("/{id}", get(handlers::get_disbursement))
        .route("/{id}/retries", get(handlers::get_retry_history))
        .route("/{id}/charges", get(handlers::get_disbursement_charges));

    let callback_routes = Router::new()
        .route("/payout-result", post(handlers::payout_result_callback))
        .route("/payout-timeout", post(handlers::payout_timeout_callback));

    let wallet_routes = Router::new()
        .route("/{partner_id}", get(handlers::get_wallet))
        .route(
            "/{partner_id}/transactions",
            get(handlers::get_wallet_transactions),
        )
        .route("/{partner_id}/credit", post(handlers::credit_wallet))
        .route("/{partner_id}/debit", post(handlers::debit_wallet))
        .route(
            "/{partner_id}/charge-config",
            put(handlers::set_charge_config),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/disbursements", disbursement_routes)
        .nest("/callbacks", callback_routes)
        .nest("/wallets", wallet_routes)
        .with_state(state)
        // OpenAPI / Swagger UI (stateless, added after with_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Bind and serve until the process stops
pub async fn run_server(config: &GatewayConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;

    tracing::info!(%addr, "Gateway listening");
    tracing::info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditSink;
    use crate::callback::{CallbackCorrelator, InMemoryCallbackRepository};
    use crate::config::{CorrelationConfig, RetryConfig};
    use crate::disbursement::types::DEFAULT_MAX_RETRIES;
    use crate::disbursement::repository::flaky::FlakyDisbursementRepository;
    use crate::disbursement::{
        DisbursementCoordinator, DisbursementRepository, InMemoryDisbursementRepository,
    };
    use crate::provider::mock::test_credentials;
    use crate::provider::{MockProvider, ProviderError, StaticCredentialProvider};
    use crate::retry::{RetryPolicy, RetryScheduler};
    use crate::settlement::{ChargeWorker, settlement_channel};
    use crate::wallet::{ChargeReconciler, InMemoryWalletRepository};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        provider: Arc<MockProvider>,
        worker: ChargeWorker,
    }

    fn app() -> TestApp {
        app_with(Arc::new(InMemoryDisbursementRepository::new()))
    }

    fn app_with(disbursements: Arc<dyn DisbursementRepository>) -> TestApp {
        let provider = Arc::new(MockProvider::new());
        let audit = Arc::new(RecordingAuditSink::default());
        let retry_config = RetryConfig {
            inter_retry_delay_ms: 0,
            ..Default::default()
        };
        let policy = Arc::new(RetryPolicy::from_config(&retry_config));
        let coordinator = Arc::new(DisbursementCoordinator::new(
            disbursements.clone(),
            provider.clone(),
            Arc::new(StaticCredentialProvider::new(vec![test_credentials("acme")])),
            policy.clone(),
            audit.clone(),
            DEFAULT_MAX_RETRIES,
        ));
        let (tx, rx) = settlement_channel(16);
        let correlator = Arc::new(CallbackCorrelator::new(
            Arc::new(InMemoryCallbackRepository::new()),
            disbursements.clone(),
            policy,
            tx,
            audit.clone(),
            CorrelationConfig {
                lookup_attempts: 1,
                lookup_delay_ms: 1,
            },
        ));
        let reconciler = Arc::new(ChargeReconciler::new(
            Arc::new(InMemoryWalletRepository::new()),
            disbursements,
            audit,
        ));
        let scheduler = Arc::new(
            RetryScheduler::new(coordinator.clone(), retry_config)
                .with_reconciler(reconciler.clone())
                .with_correlator(correlator.clone()),
        );
        let state = Arc::new(AppState::new(
            coordinator,
            correlator,
            scheduler,
            reconciler.clone(),
        ));
        TestApp {
            router: router(state),
            provider,
            worker: ChargeWorker::new(rx, reconciler),
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn submission(client_request_id: &str) -> Value {
        json!({
            "partner_id": "acme",
            "client_request_id": client_request_id,
            "amount": 1500,
            "msisdn": "0712345678",
        })
    }

    fn success_callback(conversation_id: &str) -> Value {
        json!({
            "Result": {
                "ResultType": 0,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "OriginatorConversationID": format!("orig-{}", conversation_id),
                "ConversationID": conversation_id,
                "TransactionID": "NLJ41HAY6Q",
                "ResultParameters": {
                    "ResultParameter": [
                        {"Key": "TransactionAmount", "Value": 1500},
                        {"Key": "TransactionReceipt", "Value": "NLJ41HAY6Q"}
                    ]
                }
            }
        })
    }

    #[tokio::test]
    async fn test_submit_then_replay() {
        let app = app();
        app.provider.push_ack("AG_1");

        let (status, body) = send(&app.router, "POST", "/disbursements", Some(submission("req-1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["status"], "accepted");
        assert_eq!(body["data"]["conversation_id"], "AG_1");
        assert_eq!(body["data"]["created"], true);
        let id = body["data"]["disbursement_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app.router, "POST", "/disbursements", Some(submission("req-1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["disbursement_id"], id.as_str());
        assert_eq!(body["data"]["created"], false);
        assert_eq!(app.provider.call_count(), 1);

        let (status, body) = send(&app.router, "GET", &format!("/disbursements/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["recipient_msisdn"], "254712345678");
    }

    #[tokio::test]
    async fn test_submit_rejections() {
        let app = app();

        let mut bad = submission("req-1");
        bad["amount"] = json!(0);
        let (status, body) = send(&app.router, "POST", "/disbursements", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_PARAMETER");

        let mut bad = submission("req-2");
        bad["msisdn"] = json!("0812345678");
        let (status, body) = send(&app.router, "POST", "/disbursements", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_MSISDN");

        let mut bad = submission("req-3");
        bad["partner_id"] = json!("unknown");
        let (status, body) = send(&app.router, "POST", "/disbursements", Some(bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "PARTNER_NOT_CONFIGURED");

        assert_eq!(app.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let app = app();
        let (status, body) = send(&app.router, "GET", "/disbursements/not-a-ulid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_DISBURSEMENT_ID");

        let missing = crate::disbursement::DisbursementId::new();
        let (status, _) = send(&app.router, "GET", &format!("/disbursements/{}", missing), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &app.router,
            "GET",
            &format!("/disbursements/{}/retries", missing),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_callback_settles_and_charges() {
        let mut app = app();
        let (status, _) = send(
            &app.router,
            "POST",
            "/wallets/acme/credit",
            Some(json!({"amount": 1000, "reference": "slip-1", "top_up": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app.router,
            "PUT",
            "/wallets/acme/charge-config",
            Some(json!({"flat_amount": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        app.provider.push_ack("AG_7");
        let (_, body) = send(&app.router, "POST", "/disbursements", Some(submission("req-7"))).await;
        let id = body["data"]["disbursement_id"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let (status, body) = send(
                &app.router,
                "POST",
                "/callbacks/payout-result",
                Some(success_callback("AG_7")),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({"ResultCode": 0, "ResultDesc": "Accepted"}));
        }
        app.worker.process_pending().await;

        let (_, body) = send(&app.router, "GET", &format!("/disbursements/{}", id), None).await;
        assert_eq!(body["data"]["status"], "success");
        assert_eq!(body["data"]["transaction_receipt"], "NLJ41HAY6Q");

        let (_, body) = send(&app.router, "GET", "/wallets/acme", None).await;
        assert_eq!(body["data"]["current_balance"], 970);

        let (_, body) = send(&app.router, "GET", &format!("/disbursements/{}/charges", id), None).await;
        let charges = body["data"].as_array().unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0]["status"], "completed");

        let (_, body) = send(&app.router, "GET", "/wallets/acme/transactions?limit=10", None).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["transaction_type"], "charge");
    }

    #[tokio::test]
    async fn test_callback_always_acknowledged() {
        let app = app();
        let (status, body) = send(
            &app.router,
            "POST",
            "/callbacks/payout-result",
            Some(success_callback("AG_UNKNOWN")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ResultCode"], 0);

        let request = Request::builder()
            .method("POST")
            .uri("/callbacks/payout-timeout")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_callback_acknowledged_when_store_lookup_fails() {
        let disbursements = Arc::new(FlakyDisbursementRepository::new());
        let app = app_with(disbursements.clone());
        app.provider.push_ack("AG_5");
        let (_, body) = send(&app.router, "POST", "/disbursements", Some(submission("req-5"))).await;
        let id = body["data"]["disbursement_id"].as_str().unwrap().to_string();

        disbursements.fail_lookups(true);
        let (status, body) = send(
            &app.router,
            "POST",
            "/callbacks/payout-result",
            Some(success_callback("AG_5")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ResultCode"], 0);
        disbursements.fail_lookups(false);

        let (_, body) = send(&app.router, "GET", &format!("/disbursements/{}", id), None).await;
        assert_eq!(body["data"]["status"], "accepted");

        // Redelivery applies the stored notification
        let (status, _) = send(
            &app.router,
            "POST",
            "/callbacks/payout-result",
            Some(success_callback("AG_5")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app.router, "GET", &format!("/disbursements/{}", id), None).await;
        assert_eq!(body["data"]["status"], "success");
    }

    #[tokio::test]
    async fn test_operator_retry() {
        let app = app();
        app.provider.push_response(Err(ProviderError::transient(
            crate::provider::TransientKind::Http(503),
            "unavailable",
        )));
        let (_, body) = send(&app.router, "POST", "/disbursements", Some(submission("req-9"))).await;
        assert_eq!(body["data"]["status"], "failed");
        assert_eq!(body["data"]["error_classification"], "TRANSIENT_GATEWAY_ERROR");
        let id = body["data"]["disbursement_id"].as_str().unwrap().to_string();

        // Not yet due
        let (status, body) = send(&app.router, "POST", "/disbursements/retry", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["success_count"], 0);
        assert_eq!(body["data"]["failure_count"], 0);

        let (status, body) = send(
            &app.router,
            "POST",
            "/disbursements/retry",
            Some(json!({"disbursement_id": id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["success_count"], 1);
        assert_eq!(body["data"]["processed"][0]["retry_attempt"], 1);

        let (_, body) = send(&app.router, "GET", &format!("/disbursements/{}/retries", id), None).await;
        let log = body["data"].as_array().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["idempotency_key"], format!("{}-1", id));
        assert_eq!(log[0]["reason"], "HTTP_503");

        let missing = crate::disbursement::DisbursementId::new();
        let (status, _) = send(
            &app.router,
            "POST",
            "/disbursements/retry",
            Some(json!({"disbursement_id": missing.to_string()})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wallet_debit_cannot_overdraw() {
        let app = app();
        let (status, _) = send(
            &app.router,
            "POST",
            "/wallets/acme/debit",
            Some(json!({"amount": 10, "reference": "adj-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(
            &app.router,
            "POST",
            "/wallets/acme/credit",
            Some(json!({"amount": 100, "reference": "slip-1"})),
        )
        .await;
        let (status, body) = send(
            &app.router,
            "POST",
            "/wallets/acme/debit",
            Some(json!({"amount": 500, "reference": "adj-2"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "INSUFFICIENT_BALANCE");

        let (_, body) = send(&app.router, "GET", "/wallets/acme", None).await;
        assert_eq!(body["data"]["current_balance"], 100);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = send(&app.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert!(body["data"]["timestamp_ms"].as_i64().unwrap() > 0);
    }
}
