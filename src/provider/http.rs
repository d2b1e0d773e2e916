//! HTTP gateway client (M-Pesa style B2C API)

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::credentials::PartnerCredentials;
use super::error::{ProviderError, TransientKind};
use super::{Acknowledgement, PayoutInstruction, PayoutProvider};
use crate::config::ProviderConfig;

/// Tokens are refreshed this long before the gateway says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Used when the gateway omits or garbles `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3599;

/// Successful gateway acceptance code
pub const ACCEPTED_RESPONSE_CODE: &str = "0";

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PaymentRequest<'a> {
    #[serde(rename = "OriginatorConversationID")]
    originator_conversation_id: &'a str,
    initiator_name: &'a str,
    security_credential: &'a str,
    #[serde(rename = "CommandID")]
    command_id: &'a str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    remarks: &'a str,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: &'a str,
    #[serde(rename = "ResultURL")]
    result_url: &'a str,
    occasion: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PaymentAck {
    #[serde(rename = "ConversationID", default)]
    conversation_id: Option<String>,
    #[serde(rename = "OriginatorConversationID", default)]
    originator_conversation_id: Option<String>,
    #[serde(default)]
    response_code: Option<Value>,
    #[serde(default)]
    response_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Render a loosely typed JSON scalar as text (`"0"` and `0` are both `"0"`)
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Gateway client over reqwest with a per-account token cache
pub struct HttpPayoutProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    /// (api base, consumer key) -> bearer token
    tokens: DashMap<(String, String), CachedToken>,
}

impl HttpPayoutProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                ProviderError::transient(
                    TransientKind::Network,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        info!(
            timeout_ms = config.timeout_ms,
            command_id = %config.command_id,
            "Initialized payout gateway client"
        );

        Ok(Self {
            client,
            config,
            tokens: DashMap::new(),
        })
    }

    fn token_key(credentials: &PartnerCredentials) -> (String, String) {
        (
            credentials.api_base().to_string(),
            credentials.consumer_key.clone(),
        )
    }

    /// Cached bearer token, fetching a new one when absent or near expiry
    async fn access_token(&self, credentials: &PartnerCredentials) -> Result<String, ProviderError> {
        let key = Self::token_key(credentials);
        let cached = self
            .tokens
            .get(&key)
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.access_token.clone());
        if let Some(access_token) = cached {
            return Ok(access_token);
        }

        let token = self.fetch_token(credentials).await?;
        let access_token = token.access_token.clone();
        self.tokens.insert(key, token);
        Ok(access_token)
    }

    fn invalidate_token(&self, credentials: &PartnerCredentials) {
        self.tokens.remove(&Self::token_key(credentials));
    }

    async fn fetch_token(&self, credentials: &PartnerCredentials) -> Result<CachedToken, ProviderError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            credentials.api_base()
        );
        let basic = BASE64.encode(format!(
            "{}:{}",
            credentials.consumer_key, credentials.consumer_secret
        ));

        debug!(partner_id = %credentials.partner_id, "Requesting gateway access token");
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", basic))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = if status.is_server_error() {
                TransientKind::Http(status.as_u16())
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                TransientKind::RateLimited
            } else {
                TransientKind::Unauthorized
            };
            warn!(
                partner_id = %credentials.partner_id,
                status = status.as_u16(),
                "Gateway token request failed"
            );
            return Err(ProviderError::transient(
                kind,
                format!("Token request failed with HTTP {}: {}", status.as_u16(), body),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ProviderError::transient(
                TransientKind::Unauthorized,
                format!("Malformed token response: {}", e),
            )
        })?;

        let lifetime = token
            .expires_in
            .as_ref()
            .and_then(scalar_to_string)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let usable = Duration::from_secs(lifetime).saturating_sub(TOKEN_EXPIRY_MARGIN);

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + usable,
        })
    }

    async fn post_payment(
        &self,
        credentials: &PartnerCredentials,
        token: &str,
        body: &PaymentRequest<'_>,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/mpesa/b2c/v3/paymentrequest", credentials.api_base());
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    /// Map an HTTP response from the payment endpoint to an outcome
    async fn classify(response: reqwest::Response) -> Result<Acknowledgement, ProviderError> {
        let status = response.status();

        if status.is_success() {
            let ack: PaymentAck = response.json().await.map_err(|e| {
                ProviderError::transient(
                    TransientKind::Network,
                    format!("Malformed acknowledgement: {}", e),
                )
            })?;
            let response_code = ack
                .response_code
                .as_ref()
                .and_then(scalar_to_string)
                .unwrap_or_default();
            let response_description = ack.response_description.unwrap_or_default();

            if response_code != ACCEPTED_RESPONSE_CODE {
                return Err(ProviderError::Permanent {
                    code: if response_code.is_empty() {
                        format!("HTTP_{}", status.as_u16())
                    } else {
                        response_code
                    },
                    description: response_description,
                });
            }

            return Ok(Acknowledgement {
                conversation_id: ack.conversation_id.unwrap_or_default(),
                originator_conversation_id: ack.originator_conversation_id.unwrap_or_default(),
                response_code,
                response_description,
            });
        }

        let text = response.text().await.unwrap_or_default();
        let parsed: Option<GatewayErrorBody> = serde_json::from_str(&text).ok();
        let message = parsed
            .as_ref()
            .and_then(|b| b.error_message.clone())
            .unwrap_or_else(|| text.clone());

        if status.is_server_error() {
            return Err(ProviderError::transient(
                TransientKind::Http(status.as_u16()),
                message,
            ));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::transient(TransientKind::RateLimited, message));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::transient(TransientKind::Unauthorized, message));
        }

        Err(ProviderError::Permanent {
            code: parsed
                .and_then(|b| b.error_code)
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| format!("HTTP_{}", status.as_u16())),
            description: message,
        })
    }
}

#[async_trait]
impl PayoutProvider for HttpPayoutProvider {
    fn name(&self) -> &'static str {
        "mpesa_b2c"
    }

    async fn submit(
        &self,
        credentials: &PartnerCredentials,
        instruction: &PayoutInstruction,
    ) -> Result<Acknowledgement, ProviderError> {
        let body = PaymentRequest {
            originator_conversation_id: &instruction.idempotency_key,
            initiator_name: &credentials.initiator_name,
            security_credential: &credentials.security_credential,
            command_id: &self.config.command_id,
            amount: instruction.amount,
            party_a: &credentials.shortcode,
            party_b: &instruction.msisdn,
            remarks: &instruction.remarks,
            queue_timeout_url: &self.config.queue_timeout_url,
            result_url: &self.config.result_url,
            occasion: &instruction.occasion,
        };

        let token = self.access_token(credentials).await?;
        let mut response = self.post_payment(credentials, &token, &body).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(
                partner_id = %credentials.partner_id,
                idempotency_key = %instruction.idempotency_key,
                "Gateway rejected token, refreshing once"
            );
            self.invalidate_token(credentials);
            let token = self.access_token(credentials).await?;
            response = self.post_payment(credentials, &token, &body).await?;
        }

        let outcome = Self::classify(response).await;
        match &outcome {
            Ok(ack) => info!(
                partner_id = %credentials.partner_id,
                idempotency_key = %instruction.idempotency_key,
                conversation_id = %ack.conversation_id,
                "Gateway accepted payout"
            ),
            Err(e) => warn!(
                partner_id = %credentials.partner_id,
                idempotency_key = %instruction.idempotency_key,
                result_code = %e.code(),
                "Gateway did not accept payout: {}",
                e
            ),
        }
        outcome
    }
}
