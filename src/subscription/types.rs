use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Features a non-premium user may try a limited number of times
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Humanizer,
    Paraphrase,
    Plagiarism,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::Humanizer, Feature::Paraphrase, Feature::Plagiarism];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Humanizer => "humanizer",
            Feature::Paraphrase => "paraphrase",
            Feature::Plagiarism => "plagiarism",
        }
    }
}

/// Remaining free tries per feature, persisted as a JSON object
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct FreeTries {
    pub humanizer: u32,
    pub paraphrase: u32,
    pub plagiarism: u32,
}

impl FreeTries {
    /// Same allotment for every feature
    pub fn uniform(tries: u32) -> Self {
        FreeTries {
            humanizer: tries,
            paraphrase: tries,
            plagiarism: tries,
        }
    }

    pub fn get(&self, feature: Feature) -> u32 {
        match feature {
            Feature::Humanizer => self.humanizer,
            Feature::Paraphrase => self.paraphrase,
            Feature::Plagiarism => self.plagiarism,
        }
    }

    /// Take one try for `feature`. Returns false (and leaves the counter at
    /// zero) when nothing is left.
    pub fn consume(&mut self, feature: Feature) -> bool {
        let counter = match feature {
            Feature::Humanizer => &mut self.humanizer,
            Feature::Paraphrase => &mut self.paraphrase,
            Feature::Plagiarism => &mut self.plagiarism,
        };

        if *counter == 0 {
            return false;
        }

        *counter -= 1;
        true
    }
}

/// A purchase reported by the platform store
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub product_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Epoch millis
    #[serde(default)]
    pub transaction_date: Option<i64>,
    /// Epoch millis, only reported for auto-renewing subscriptions
    #[serde(default)]
    pub expiration_time: Option<i64>,
}

/// Store listing for a subscription product
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    // Older bridge versions report `productId` instead of `id`
    #[serde(alias = "productId")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "localizedPrice")]
    pub display_price: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Product catalog as persisted in the key-value store
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CachedProducts {
    pub products: Vec<Product>,
    /// Epoch millis of the fetch
    pub timestamp: i64,
}

/// Result of checking a text against the free-user word ceiling
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WordLimitCheck {
    pub allowed: bool,
    pub word_count: usize,
    /// `None` means unlimited
    pub limit: Option<usize>,
}

impl WordLimitCheck {
    pub fn unlimited() -> Self {
        WordLimitCheck {
            allowed: true,
            word_count: 0,
            limit: None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit.is_none()
    }
}

/// User-facing notices raised by asynchronous purchase handling
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    PurchaseSucceeded,
    ValidationFailed,
    ReceiptUnavailable,
    ProcessingFailed,
    PurchaseFailed,
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::PurchaseSucceeded => "Success!",
            Notice::PurchaseFailed => "Purchase Failed",
            Notice::ValidationFailed | Notice::ReceiptUnavailable | Notice::ProcessingFailed => "Error",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Notice::PurchaseSucceeded => "You now have premium access to all features!",
            Notice::ValidationFailed => "Purchase validation failed. Please try again.",
            Notice::ReceiptUnavailable => "Failed to retrieve purchase receipt. Please try again.",
            Notice::ProcessingFailed => {
                "An error occurred processing your purchase. Please contact support."
            }
            Notice::PurchaseFailed => "Please try again or contact support.",
        }
    }
}

/// Subscription state for the host shell (simplified view)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub is_premium: bool,
    pub trial_used: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub free_tries: FreeTries,
    pub word_limit: Option<usize>,
    pub platform: String,
}

/// Error codes reported by the purchase bridge
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub enum BridgeErrorCode {
    UserCancelled,
    AlreadyConnected,
    NotConnected,
    Network,
    Unknown(String),
}

impl BridgeErrorCode {
    /// Map the string codes used by the native store bridges
    pub fn from_code(code: &str) -> Self {
        match code {
            "E_USER_CANCELLED" => BridgeErrorCode::UserCancelled,
            "E_ALREADY_CONNECTED" => BridgeErrorCode::AlreadyConnected,
            "E_NOT_PREPARED" | "E_NOT_CONNECTED" => BridgeErrorCode::NotConnected,
            "E_NETWORK_ERROR" => BridgeErrorCode::Network,
            other => BridgeErrorCode::Unknown(other.to_string()),
        }
    }
}

/// Error raised by the purchase bridge
#[derive(thiserror::Error, Clone, PartialEq, Debug)]
#[error("{message} ({code:?})")]
pub struct BridgeError {
    pub code: BridgeErrorCode,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: BridgeErrorCode, message: impl Into<String>) -> Self {
        BridgeError {
            code,
            message: message.into(),
        }
    }

    pub fn user_cancelled() -> Self {
        BridgeError::new(BridgeErrorCode::UserCancelled, "User cancelled the purchase")
    }

    pub fn is_user_cancelled(&self) -> bool {
        self.code == BridgeErrorCode::UserCancelled
    }

    /// Some bridges only say so in the message
    pub fn is_already_connected(&self) -> bool {
        self.code == BridgeErrorCode::AlreadyConnected
            || self.message.to_lowercase().contains("already")
    }
}

/// Error types for subscription operations
#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    #[error("Purchase bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Unable to load products. Please check your connection and try again.")]
    ProductsUnavailable,

    #[error("Product {0} not found. Please refresh and try again.")]
    ProductNotFound(String),
}

impl Serialize for SubscriptionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Key-value store failures
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to write subscription state: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize subscription state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receipt-validation endpoint failures. All of them trigger the
/// client-side fallback.
#[derive(thiserror::Error, Clone, PartialEq, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation request failed with status {0}")]
    Status(u16),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}
