use crate::subscription::config::HTTP_TIMEOUT_SECS;
use crate::subscription::types::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Validate Receipt
// ============================================================================

/// Request body for the receipt-validation endpoint
#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct ValidateReceiptRequest {
    pub receipt: String,
    pub platform: String,
}

/// Response from the receipt-validation endpoint
#[derive(Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidateReceiptResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub valid: bool,
    /// Epoch millis
    #[serde(default, deserialize_with = "millis_from_number_or_string")]
    pub expires_date: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ValidateReceiptResponse {
    pub fn is_valid(&self) -> bool {
        self.success && self.valid
    }
}

/// Apple reports `expires_date_ms` as a string; some backends pass it through
fn millis_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Millis>::deserialize(deserializer)? {
        Some(Millis::Int(ms)) => Some(ms),
        Some(Millis::Float(ms)) => Some(ms as i64),
        Some(Millis::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

/// Server-side receipt validation
#[async_trait]
pub trait ReceiptApi: Send + Sync {
    async fn validate_receipt(
        &self,
        url: &str,
        request: &ValidateReceiptRequest,
    ) -> Result<ValidateReceiptResponse, ApiError>;
}

// ============================================================================
// HTTP Client
// ============================================================================

/// HTTP client for the receipt-validation backend
pub struct ReceiptApiClient {
    client: reqwest::Client,
}

impl ReceiptApiClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReceiptApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReceiptApi for ReceiptApiClient {
    async fn validate_receipt(
        &self,
        url: &str,
        request: &ValidateReceiptRequest,
    ) -> Result<ValidateReceiptResponse, ApiError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}
