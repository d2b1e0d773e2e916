//! Partner gateway credentials
//!
//! A partner with missing or incomplete credentials is an error, never a
//! fallback to some default account.

use async_trait::async_trait;
use cached::proc_macro::cached;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// TTL for credentials loaded from PostgreSQL, in seconds
pub const CREDENTIAL_TTL_SECONDS: u64 = 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("No gateway credentials configured for partner {0}")]
    NotConfigured(String),

    #[error("Gateway credentials for partner {0} are disabled")]
    Inactive(String),

    #[error("Gateway credentials for partner {partner_id} are missing {field}")]
    Incomplete {
        partner_id: String,
        field: &'static str,
    },

    #[error("Invalid gateway environment: {0}")]
    InvalidEnvironment(String),

    #[error("Credential store error: {0}")]
    Storage(String),
}

/// Gateway environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.safaricom.co.ke",
            Environment::Production => "https://api.safaricom.co.ke",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" | "live" => Ok(Environment::Production),
            other => Err(CredentialError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials for one partner's gateway account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerCredentials {
    pub partner_id: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub security_credential: String,
    pub initiator_name: String,
    /// Paying shortcode (`PartyA`)
    pub shortcode: String,
    pub environment: Environment,
    /// Overrides the environment's base URL (test doubles, proxies)
    #[serde(default)]
    pub base_url: Option<String>,
}

impl PartnerCredentials {
    /// Base URL for API calls
    pub fn api_base(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
            .trim_end_matches('/')
    }

    /// Reject credentials with blank fields
    pub fn ensure_complete(&self) -> Result<(), CredentialError> {
        let fields: [(&'static str, &str); 5] = [
            ("consumer_key", &self.consumer_key),
            ("consumer_secret", &self.consumer_secret),
            ("security_credential", &self.security_credential),
            ("initiator_name", &self.initiator_name),
            ("shortcode", &self.shortcode),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(CredentialError::Incomplete {
                    partner_id: self.partner_id.clone(),
                    field,
                });
            }
        }
        Ok(())
    }
}

// Secrets never reach the logs
impl fmt::Debug for PartnerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartnerCredentials")
            .field("partner_id", &self.partner_id)
            .field("consumer_key", &"***")
            .field("consumer_secret", &"***")
            .field("security_credential", &"***")
            .field("initiator_name", &self.initiator_name)
            .field("shortcode", &self.shortcode)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Resolves a partner's gateway credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self, partner_id: &str)
    -> Result<PartnerCredentials, CredentialError>;
}

/// Credentials from the YAML config
pub struct StaticCredentialProvider {
    partners: HashMap<String, PartnerCredentials>,
}

impl StaticCredentialProvider {
    pub fn new(partners: Vec<PartnerCredentials>) -> Self {
        Self {
            partners: partners
                .into_iter()
                .map(|p| (p.partner_id.clone(), p))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(
        &self,
        partner_id: &str,
    ) -> Result<PartnerCredentials, CredentialError> {
        let creds = self
            .partners
            .get(partner_id)
            .ok_or_else(|| CredentialError::NotConfigured(partner_id.to_string()))?;
        creds.ensure_complete()?;
        Ok(creds.clone())
    }
}

/// Credentials from `partner_credentials`, cached for [`CREDENTIAL_TTL_SECONDS`]
pub struct PgCredentialProvider {
    pool: Arc<PgPool>,
}

impl PgCredentialProvider {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CredentialProvider for PgCredentialProvider {
    async fn get_credentials(
        &self,
        partner_id: &str,
    ) -> Result<PartnerCredentials, CredentialError> {
        load_credentials_cached(self.pool.clone(), partner_id.to_string()).await
    }
}

/// Load one partner's credentials with caching
///
/// Only successful lookups are cached, so a partner onboarded a moment ago is
/// picked up on the next request.
#[cached(
    time = 60,
    key = "String",
    convert = r#"{ partner_id.clone() }"#,
    result = true
)]
async fn load_credentials_cached(
    pool: Arc<PgPool>,
    partner_id: String,
) -> Result<PartnerCredentials, CredentialError> {
    tracing::debug!(partner_id = %partner_id, "[cache] Loading partner credentials");
    let row = sqlx::query(
        r#"
        SELECT partner_id, consumer_key, consumer_secret, security_credential,
               initiator_name, shortcode, environment, base_url, is_active
        FROM partner_credentials
        WHERE partner_id = $1
        "#,
    )
    .bind(&partner_id)
    .fetch_optional(pool.as_ref())
    .await
    .map_err(|e| CredentialError::Storage(e.to_string()))?
    .ok_or_else(|| CredentialError::NotConfigured(partner_id.clone()))?;

    let is_active: bool = row.get("is_active");
    if !is_active {
        return Err(CredentialError::Inactive(partner_id));
    }

    let environment: String = row.get("environment");
    let creds = PartnerCredentials {
        partner_id: row.get("partner_id"),
        consumer_key: row.get("consumer_key"),
        consumer_secret: row.get("consumer_secret"),
        security_credential: row.get("security_credential"),
        initiator_name: row.get("initiator_name"),
        shortcode: row.get("shortcode"),
        environment: environment.parse()?,
        base_url: row.get("base_url"),
    };
    creds.ensure_complete()?;
    Ok(creds)
}
