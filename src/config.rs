//! Runtime settings: TOML file plus environment overrides for secrets.

use crate::application::OrchestratorConfig;
use crate::domain::policy::{FeeSchedule, LimitPolicy};
use crate::domain::ports::{SharedClock, SharedGateway};
use crate::error::{PaymentError, Result};
use crate::infrastructure::gateway::{
    GatewayClientConfig, HttpGatewayClient, ReqwestTransport, RequestSigner, SimulatedGateway,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_GATEWAY_URL: &str = "PAYCORE_GATEWAY_URL";
pub const ENV_GATEWAY_CLIENT_ID: &str = "PAYCORE_GATEWAY_CLIENT_ID";
pub const ENV_GATEWAY_CLIENT_SECRET: &str = "PAYCORE_GATEWAY_CLIENT_SECRET";
pub const ENV_GATEWAY_SIGNING_KEY: &str = "PAYCORE_GATEWAY_SIGNING_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub currency: String,
    pub gateway: GatewaySettings,
    pub fees: FeeSchedule,
    pub limits: LimitPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            currency: "GHS".to_string(),
            gateway: GatewaySettings::default(),
            fees: FeeSchedule::default(),
            limits: LimitPolicy::default(),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// No URL means dry run against the simulated gateway.
    pub base_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Hex-encoded 32-byte ed25519 seed.
    pub signing_key: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub token_skew_secs: i64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: None,
            client_id: String::new(),
            client_secret: String::new(),
            signing_key: None,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_backoff_ms: 250,
            token_skew_secs: 60,
        }
    }
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("token_skew_secs", &self.token_skew_secs)
            .finish()
    }
}

impl Settings {
    /// Reads `path` if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PaymentError::Config(e.to_string()))
    }

    /// Overrides gateway endpoint and secrets from `lookup`, usually the
    /// process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway = &mut self.gateway;
        if let Some(url) = lookup(ENV_GATEWAY_URL) {
            gateway.base_url = Some(url);
        }
        if let Some(client_id) = lookup(ENV_GATEWAY_CLIENT_ID) {
            gateway.client_id = client_id;
        }
        if let Some(secret) = lookup(ENV_GATEWAY_CLIENT_SECRET) {
            gateway.client_secret = secret;
        }
        if let Some(key) = lookup(ENV_GATEWAY_SIGNING_KEY) {
            gateway.signing_key = Some(key);
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            currency: self.currency.clone(),
            fees: self.fees.clone(),
            limits: self.limits.clone(),
        }
    }

    /// Builds the configured gateway: HTTP when a URL is set, simulated otherwise.
    pub fn build_gateway(&self, clock: SharedClock) -> Result<SharedGateway> {
        let gateway = &self.gateway;
        let Some(base_url) = &gateway.base_url else {
            warn!("No gateway URL configured; using the simulated gateway");
            return Ok(Arc::new(SimulatedGateway::new(self.currency.clone())));
        };

        let signing_key = gateway.signing_key.as_deref().ok_or_else(|| {
            PaymentError::Config(format!(
                "gateway signing key is required (set {})",
                ENV_GATEWAY_SIGNING_KEY
            ))
        })?;
        let signer = RequestSigner::from_hex(signing_key)?;
        let transport =
            ReqwestTransport::new(base_url.clone(), Duration::from_millis(gateway.timeout_ms))
                .map_err(|e| PaymentError::Config(e.to_string()))?;

        info!(base_url = %base_url, public_key = %signer.public_key_hex(), "Using HTTP gateway");
        Ok(Arc::new(HttpGatewayClient::new(
            Arc::new(transport),
            signer,
            clock,
            GatewayClientConfig {
                client_id: gateway.client_id.clone(),
                client_secret: gateway.client_secret.clone(),
                max_retries: gateway.max_retries,
                retry_backoff: Duration::from_millis(gateway.retry_backoff_ms),
                token_skew: chrono::Duration::seconds(gateway.token_skew_secs),
            },
        )))
    }
}
