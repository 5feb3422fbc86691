use super::signer::{RequestSigner, SIGNATURE_HEADER};
use super::token::{GatewayCredential, TokenCache};
use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::domain::gateway::{
    AccountValidation, BankTransferRequest, GatewayAck, GatewayBalance, GatewayError,
    GatewayStatus, MobileMoneyRequest,
};
use crate::domain::ports::{PaymentGateway, SharedClock};
use crate::domain::routing::validate_bank_account;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const TOKEN_PATH: &str = "/oauth/token";
pub const COLLECTIONS_PATH: &str = "/v1/collections";
pub const DISBURSEMENTS_PATH: &str = "/v1/disbursements";
pub const TRANSFERS_PATH: &str = "/v1/transfers";
pub const ACCOUNT_RESOLVE_PATH: &str = "/v1/accounts/resolve";
pub const BALANCE_PATH: &str = "/v1/balance";

#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Extra attempts after the first for transport errors and 5xx.
    pub max_retries: u32,
    /// Base delay, multiplied by the attempt number.
    pub retry_backoff: Duration,
    /// Tokens are refreshed this long before they expire.
    pub token_skew: chrono::Duration,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct SubmissionResponse {
    #[serde(alias = "id", alias = "transactionId")]
    transaction_id: Option<String>,
    status: String,
    message: Option<String>,
}

#[derive(Deserialize)]
struct AccountResolveResponse {
    account_name: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// [`PaymentGateway`] speaking the gateway's JSON-over-HTTP protocol.
pub struct HttpGatewayClient {
    transport: Arc<dyn HttpTransport>,
    tokens: TokenCache,
    signer: RequestSigner,
    clock: SharedClock,
    config: GatewayClientConfig,
}

impl HttpGatewayClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        signer: RequestSigner,
        clock: SharedClock,
        config: GatewayClientConfig,
    ) -> Self {
        Self {
            tokens: TokenCache::new(clock.clone(), config.token_skew),
            transport,
            signer,
            clock,
            config,
        }
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    async fn authenticate(&self) -> Result<GatewayCredential, GatewayError> {
        let body = to_body(&TokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            grant_type: "client_credentials",
        })?;
        let response = self
            .send_with_retries(HttpRequest::post(TOKEN_PATH, body))
            .await?;
        if !response.is_success() {
            return Err(GatewayError::Authentication(format!(
                "credential exchange returned {}: {}",
                response.status,
                error_message(&response)
            )));
        }

        let token: TokenResponse = parse(&response.body)?;
        info!(expires_in = token.expires_in, "Obtained gateway access token");
        Ok(GatewayCredential {
            access_token: token.access_token,
            expires_at: self.clock.now() + chrono::Duration::seconds(token.expires_in),
        })
    }

    /// Sends once, then retries transport failures and 5xx responses.
    async fn send_with_retries(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let mut attempt = 0;
        loop {
            let failure = match self.transport.send(request.clone()).await {
                Ok(response) if !response.is_server_error() => return Ok(response),
                Ok(response) => format!("gateway returned {}", response.status),
                Err(err) => err.to_string(),
            };
            if attempt >= self.config.max_retries {
                return Err(GatewayError::Unavailable(failure));
            }
            attempt += 1;
            warn!(path = %request.path, attempt, error = %failure, "Retrying gateway call");
            tokio::time::sleep(self.config.retry_backoff * attempt).await;
        }
    }

    /// Authenticated call. A 401 triggers one re-authentication and one
    /// resend; a second 401 is final.
    async fn call(&self, request: HttpRequest) -> Result<Vec<u8>, GatewayError> {
        let token = self.tokens.get_valid_token(|| self.authenticate()).await?;
        let mut response = self
            .send_with_retries(authorize(request.clone(), &token))
            .await?;

        if response.status == 401 {
            warn!(path = %request.path, "Gateway rejected access token; re-authenticating");
            self.tokens.invalidate(&token).await;
            let token = self.tokens.get_valid_token(|| self.authenticate()).await?;
            response = self.send_with_retries(authorize(request, &token)).await?;
            if response.status == 401 {
                self.tokens.invalidate(&token).await;
                return Err(GatewayError::Authentication(
                    "access token rejected after re-authentication".into(),
                ));
            }
        }

        if response.is_success() {
            Ok(response.body)
        } else {
            Err(GatewayError::Rejected(error_message(&response)))
        }
    }

    async fn submit<T: Serialize>(&self, path: &str, payload: &T) -> Result<GatewayAck, GatewayError> {
        let body = to_body(payload)?;
        let signature = self.signer.sign(&body);
        let request = HttpRequest::post(path, body).with_header(SIGNATURE_HEADER, signature);

        let response: SubmissionResponse = parse(&self.call(request).await?)?;
        let status = GatewayStatus::from_gateway(&response.status);
        if status == GatewayStatus::Failed {
            return Err(GatewayError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| format!("gateway reported status {}", response.status)),
            ));
        }
        let gateway_transaction_id = response.transaction_id.ok_or_else(|| {
            GatewayError::InvalidResponse("submission accepted without a transaction id".into())
        })?;

        Ok(GatewayAck {
            gateway_transaction_id,
            status,
            message: response.message,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGatewayClient {
    async fn collect_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> Result<GatewayAck, GatewayError> {
        self.submit(COLLECTIONS_PATH, request).await
    }

    async fn disburse_mobile_money(
        &self,
        request: &MobileMoneyRequest,
    ) -> Result<GatewayAck, GatewayError> {
        self.submit(DISBURSEMENTS_PATH, request).await
    }

    async fn transfer_to_bank(
        &self,
        request: &BankTransferRequest,
    ) -> Result<GatewayAck, GatewayError> {
        self.submit(TRANSFERS_PATH, request).await
    }

    async fn validate_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<AccountValidation, GatewayError> {
        let request = HttpRequest::get(ACCOUNT_RESOLVE_PATH)
            .with_query("account_number", account_number)
            .with_query("bank_code", bank_code);

        match self.call(request).await {
            Ok(body) => {
                let resolved: AccountResolveResponse = parse(&body)?;
                Ok(AccountValidation::Verified {
                    account_name: resolved.account_name,
                })
            }
            Err(GatewayError::Unavailable(reason)) => {
                warn!(
                    bank_code,
                    error = %reason,
                    "Account validation unavailable; falling back to format check"
                );
                validate_bank_account(account_number, bank_code)
                    .map(|()| AccountValidation::ProvisionallyValid)
                    .map_err(|e| GatewayError::Rejected(e.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn balance(&self) -> Result<GatewayBalance, GatewayError> {
        parse(&self.call(HttpRequest::get(BALANCE_PATH)).await?)
    }
}

fn authorize(request: HttpRequest, token: &str) -> HttpRequest {
    request.with_header("Authorization", format!("Bearer {}", token))
}

fn to_body<T: Serialize>(payload: &T) -> Result<Vec<u8>, GatewayError> {
    serde_json::to_vec(payload).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn error_message(response: &HttpResponse) -> String {
    serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.message.or(body.error))
        .unwrap_or_else(|| format!("HTTP {}", response.status))
}
