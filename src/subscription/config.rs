use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Public JSON config with service URLs, fetched once per TTL
pub const REMOTE_CONFIG_URL: &str =
    "https://raw.githubusercontent.com/harborxtechnologies/app_configs/main/humanizer_app_config.json";

/// Free user limits
pub const DEFAULT_FREE_TRIES: u32 = 2;
pub const FREE_USER_WORD_LIMIT: usize = 300;

/// Revalidate with the server at most this often
pub const REVALIDATE_INTERVAL_HOURS: i64 = 12;

/// Product catalog freshness
pub const PRODUCT_CACHE_TTL_HOURS: i64 = 24;

/// Bounded wait for the remote config during initialization
pub const CONFIG_WAIT_TIMEOUT_MS: u64 = 5_000;
pub const CONFIG_POLL_INTERVAL_MS: u64 = 500;

/// HTTP timeout for the validation and config endpoints
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// File used by the file-backed store
pub const STORE_DIR: &str = "com.detector.humanizer";
pub const STORE_FILE: &str = "subscription-storage.json";

/// Storage keys. The strings are shared with existing installs.
pub mod keys {
    pub const IS_PREMIUM: &str = "is_premium";
    pub const TRIAL_USED: &str = "trial_used";
    pub const FREE_TRIES: &str = "free_tries";
    pub const LAST_RECEIPT: &str = "last_receipt";
    pub const SUBSCRIPTION_EXPIRY: &str = "subscription_expiry";
    pub const CACHED_PRODUCTS: &str = "cached_products";
    pub const LAST_VALIDATION: &str = "last_validation";
    pub const API_CONFIG: &str = "api_config";
}

/// App Store product IDs
#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProductIds {
    pub weekly: &'static str,
    pub monthly: &'static str,
    pub yearly: &'static str,
}

pub const PRODUCT_IDS: ProductIds = ProductIds {
    weekly: "com.detector.humanizer.weekly.plan",
    monthly: "com.detector.humanizer.monthly.plan",
    yearly: "com.detector.humanizer.yearly.plan",
};

impl ProductIds {
    pub fn all(&self) -> [&'static str; 3] {
        [self.weekly, self.monthly, self.yearly]
    }

    /// The yearly plan carries the one-time free trial
    pub fn is_top_tier(&self, product_id: &str) -> bool {
        product_id == self.yearly
    }
}

/// Where the receipt sent for validation comes from
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReceiptSource {
    /// Full App Store receipt, fetched with a dedicated bridge call
    AppStoreReceipt,
    /// The transaction id carried by the purchase itself
    TransactionId,
}

/// Platform the app runs on
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Other,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        #[cfg(target_os = "ios")]
        return Platform::Ios;

        #[cfg(target_os = "android")]
        return Platform::Android;

        #[cfg(not(any(target_os = "ios", target_os = "android")))]
        return Platform::Other;
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Other => "unknown",
        }
    }

    /// In-app purchases are only wired up on iOS
    pub fn supports_in_app_purchases(&self) -> bool {
        matches!(self, Platform::Ios)
    }

    pub fn receipt_source(&self) -> ReceiptSource {
        match self {
            Platform::Ios => ReceiptSource::AppStoreReceipt,
            Platform::Android | Platform::Other => ReceiptSource::TransactionId,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::current()
    }
}

/// What `restore_purchases` does when a purchase exists but no receipt can be read
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Grant premium on the strength of the purchase alone
    #[default]
    OptimisticGrant,
    /// Report the restore as failed
    RequireReceipt,
}

/// Tunables for the subscription manager
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub platform: Platform,
    pub free_tries_per_feature: u32,
    pub word_limit: usize,
    pub revalidate_interval_hours: i64,
    pub product_cache_ttl_hours: i64,
    pub wait_for_config: bool,
    pub config_wait_timeout_ms: u64,
    pub config_poll_interval_ms: u64,
    pub restore_policy: RestorePolicy,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionConfig {
            platform: Platform::current(),
            free_tries_per_feature: DEFAULT_FREE_TRIES,
            word_limit: FREE_USER_WORD_LIMIT,
            revalidate_interval_hours: REVALIDATE_INTERVAL_HOURS,
            product_cache_ttl_hours: PRODUCT_CACHE_TTL_HOURS,
            wait_for_config: false,
            config_wait_timeout_ms: CONFIG_WAIT_TIMEOUT_MS,
            config_poll_interval_ms: CONFIG_POLL_INTERVAL_MS,
            restore_policy: RestorePolicy::default(),
        }
    }
}

impl SubscriptionConfig {
    pub fn for_platform(platform: Platform) -> Self {
        SubscriptionConfig {
            platform,
            ..Default::default()
        }
    }

    pub fn revalidate_interval(&self) -> Duration {
        Duration::hours(self.revalidate_interval_hours)
    }

    pub fn product_cache_ttl(&self) -> Duration {
        Duration::hours(self.product_cache_ttl_hours)
    }

    pub fn config_wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config_wait_timeout_ms)
    }

    pub fn config_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config_poll_interval_ms)
    }
}
