use crate::subscription::api::{ReceiptApi, ValidateReceiptRequest};
use crate::subscription::bridge::{
    ListenerHandle, PurchaseBridge, PurchaseErrorHandler, PurchaseUpdatedHandler,
};
use crate::subscription::clock::{Clock, SystemClock};
use crate::subscription::config::{
    keys, ProductIds, ReceiptSource, RestorePolicy, SubscriptionConfig, PRODUCT_IDS,
};
use crate::subscription::notify::Notifier;
use crate::subscription::remote_config::ApiConfigSource;
use crate::subscription::storage::{KeyValueStore, StoredValue};
use crate::subscription::types::{
    BridgeError, CachedProducts, Feature, FreeTries, Notice, Product, Purchase,
    SubscriptionError, SubscriptionInfo, WordLimitCheck,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Owns premium status, free tries and the purchase flow.
///
/// Everything the manager knows is persisted in its key-value store, so a
/// fresh instance over the same store picks up where the last one left off.
/// Purchase grants arrive asynchronously through the bridge listeners, which
/// hold only a weak reference back to the manager.
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    store: Arc<dyn KeyValueStore>,
    bridge: Arc<dyn PurchaseBridge>,
    receipt_api: Arc<dyn ReceiptApi>,
    config_source: Arc<dyn ApiConfigSource>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    purchase_update_listener: Mutex<Option<Box<dyn ListenerHandle>>>,
    purchase_error_listener: Mutex<Option<Box<dyn ListenerHandle>>>,
}

impl SubscriptionManager {
    /// Build a manager over the given collaborators, using the system clock
    pub fn new(
        config: SubscriptionConfig,
        store: Arc<dyn KeyValueStore>,
        bridge: Arc<dyn PurchaseBridge>,
        receipt_api: Arc<dyn ReceiptApi>,
        config_source: Arc<dyn ApiConfigSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        SubscriptionManager {
            config,
            store,
            bridge,
            receipt_api,
            config_source,
            notifier,
            clock: Arc::new(SystemClock),
            purchase_update_listener: Mutex::new(None),
            purchase_error_listener: Mutex::new(None),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect to the store, reconcile premium status and warm the catalog.
    /// Every step is best-effort.
    pub async fn initialize(self: &Arc<Self>) {
        info!("Initializing subscription service");

        if !self.config.platform.supports_in_app_purchases() {
            warn!(platform = self.config.platform.as_str(), "In-app purchases unavailable on this platform");
            return;
        }

        if self.config.wait_for_config {
            self.wait_for_api_config().await;
        }

        self.ensure_connection().await;

        // Force a fresh catalog for this session
        if let Err(e) = self.store.remove(keys::CACHED_PRODUCTS) {
            warn!(error = %e, "Failed to clear product cache");
        }

        self.check_subscription_status().await;

        debug!("Pre-fetching subscription products");
        self.get_subscription_products().await;

        self.setup_purchase_listeners();

        info!("Subscription service ready");
    }

    /// Poll until the remote config is available or the wait times out
    async fn wait_for_api_config(&self) {
        let timeout = self.config.config_wait_timeout();
        let interval = self.config.config_poll_interval();
        let started = tokio::time::Instant::now();

        while !self.config_source.is_loaded() && started.elapsed() < timeout {
            debug!("Waiting for API config to load");
            tokio::time::sleep(interval).await;
        }

        if self.config_source.is_loaded() {
            info!("API config loaded");
        } else {
            warn!(timeout_ms = self.config.config_wait_timeout_ms, "API config not loaded after waiting, proceeding anyway");
        }
    }

    async fn ensure_connection(&self) {
        match self.bridge.open_connection().await {
            Ok(()) => info!("Purchase connection initialized"),
            Err(e) if e.is_already_connected() => debug!("Purchase connection already initialized"),
            Err(e) => warn!(error = %e, "Purchase connection warning"),
        }
    }

    /// Register purchase listeners, replacing any previous registration
    ///
    /// Update events are spawned on the runtime current at registration,
    /// whichever thread the store delivers them on.
    pub fn setup_purchase_listeners(self: &Arc<Self>) {
        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_none() {
            warn!("Registering purchase listeners outside an async runtime");
        }

        let weak = Arc::downgrade(self);
        let on_update: PurchaseUpdatedHandler = Arc::new(move |purchase: Purchase| {
            spawn_with(&weak, runtime.as_ref(), move |manager| async move {
                manager.handle_purchase_updated(purchase).await;
            });
        });

        let weak = Arc::downgrade(self);
        let on_error: PurchaseErrorHandler = Arc::new(move |error: BridgeError| {
            if let Some(manager) = weak.upgrade() {
                manager.handle_purchase_error(&error);
            }
        });

        {
            let mut slot = self.purchase_update_listener.lock();
            if let Some(previous) = slot.take() {
                previous.remove();
            }
            *slot = Some(self.bridge.on_purchase_updated(on_update));
        }

        {
            let mut slot = self.purchase_error_listener.lock();
            if let Some(previous) = slot.take() {
                previous.remove();
            }
            *slot = Some(self.bridge.on_purchase_error(on_error));
        }

        debug!("Purchase listeners registered");
    }

    /// Whether purchase listeners are currently registered
    pub fn listeners_registered(&self) -> bool {
        self.purchase_update_listener.lock().is_some()
    }

    /// Unregister listeners and close the store connection
    pub async fn cleanup(&self) {
        let update = self.purchase_update_listener.lock().take();
        if let Some(handle) = update {
            handle.remove();
        }

        let error = self.purchase_error_listener.lock().take();
        if let Some(handle) = error {
            handle.remove();
        }

        if let Err(e) = self.bridge.close_connection().await {
            warn!(error = %e, "Failed to close purchase connection");
        }
        info!("Purchase connection closed");
    }

    // ========================================================================
    // Entitlement
    // ========================================================================

    /// Whether the user has premium access. Expired subscriptions are
    /// demoted here, lazily.
    pub fn is_premium(&self) -> bool {
        if !self.store.get_bool(keys::IS_PREMIUM).unwrap_or(false) {
            return false;
        }

        if self.subscription_expired() {
            info!("Subscription has expired");
            self.put(keys::IS_PREMIUM, false);
            return false;
        }

        true
    }

    /// Reconcile premium status with the purchases the store reports.
    /// A bridge failure returns false but keeps the cached flag.
    pub async fn check_subscription_status(&self) -> bool {
        info!("Checking subscription status");

        let purchases = match self.bridge.available_purchases().await {
            Ok(purchases) => purchases,
            Err(e) => {
                error!(error = %e, "Error checking subscription");
                return false;
            }
        };

        let Some(latest) = latest_purchase(&purchases) else {
            self.put(keys::IS_PREMIUM, false);
            info!("No active subscription found");
            return false;
        };
        info!(count = purchases.len(), product_id = %latest.product_id, "Found active purchase(s)");

        let Some(receipt) = self.receipt_for(latest).await else {
            self.put(keys::IS_PREMIUM, false);
            warn!("Active purchase has no receipt");
            return false;
        };

        // Checked before any network call; also covers the cached path below
        if self.subscription_expired() {
            info!("Subscription has expired");
            self.put(keys::IS_PREMIUM, false);
            return false;
        }

        if self.should_validate() {
            info!("Validating subscription with server");
            if !self.validate_receipt(&receipt).await {
                self.put(keys::IS_PREMIUM, false);
                info!("Subscription validation failed");
                return false;
            }

            self.grant_premium(latest, &receipt);
            self.put(keys::LAST_VALIDATION, self.clock.now_millis());
            info!("Subscription validated and active");
            return true;
        }

        self.put(keys::IS_PREMIUM, true);
        self.put(keys::LAST_RECEIPT, receipt);
        info!("Subscription active (recently validated)");
        true
    }

    fn should_validate(&self) -> bool {
        let last_validation = self.store.get_number(keys::LAST_VALIDATION).unwrap_or(0);
        let elapsed = self.clock.now_millis().saturating_sub(last_validation);
        elapsed > self.config.revalidate_interval().num_milliseconds()
    }

    fn subscription_expired(&self) -> bool {
        match self.store.get_number(keys::SUBSCRIPTION_EXPIRY) {
            Some(expiry) if expiry > 0 => self.clock.now_millis() > expiry,
            _ => false,
        }
    }

    /// Validate with the backend, falling back to the store's own view when
    /// the backend cannot be reached. An explicit "invalid" answer is final.
    pub async fn validate_receipt(&self, receipt: &str) -> bool {
        let Some(url) = self.config_source.validate_receipt_url() else {
            warn!("Backend validation URL not configured, using client-side validation");
            return self.validate_receipt_client_side().await;
        };

        let request = ValidateReceiptRequest {
            receipt: receipt.to_string(),
            platform: self.config.platform.as_str().to_string(),
        };

        match self.receipt_api.validate_receipt(&url, &request).await {
            Ok(response) if response.is_valid() => {
                info!("Receipt is valid (verified by backend)");
                if let Some(expires) = response.expires_date.filter(|e| *e > 0) {
                    self.put(keys::SUBSCRIPTION_EXPIRY, expires);
                }
                true
            }
            Ok(response) => {
                error!(
                    message = response.message.as_deref().unwrap_or("Unknown error"),
                    "Receipt validation failed"
                );
                false
            }
            Err(e) => {
                warn!(error = %e, "Backend validation unavailable, falling back to client-side validation");
                self.validate_receipt_client_side().await
            }
        }
    }

    /// Weak check: any active purchase counts as valid
    async fn validate_receipt_client_side(&self) -> bool {
        match self.bridge.available_purchases().await {
            Ok(purchases) if !purchases.is_empty() => {
                info!("Client-side validation: active subscription found");
                true
            }
            Ok(_) => {
                info!("Client-side validation: no active subscription");
                false
            }
            Err(e) => {
                error!(error = %e, "Client-side validation error");
                false
            }
        }
    }

    /// Receipt to validate for `purchase`, per the platform's receipt source
    async fn receipt_for(&self, purchase: &Purchase) -> Option<String> {
        let receipt = match self.config.platform.receipt_source() {
            ReceiptSource::AppStoreReceipt => match self.bridge.receipt().await {
                Ok(receipt) => receipt,
                Err(e) => {
                    error!(error = %e, "Error getting App Store receipt");
                    None
                }
            },
            ReceiptSource::TransactionId => purchase.transaction_id.clone(),
        };

        receipt.filter(|r| !r.is_empty())
    }

    fn grant_premium(&self, purchase: &Purchase, receipt: &str) {
        self.put(keys::IS_PREMIUM, true);
        self.put(keys::LAST_RECEIPT, receipt);

        if let Some(expires) = purchase.expiration_time.filter(|e| *e > 0) {
            self.put(keys::SUBSCRIPTION_EXPIRY, expires);
        }

        if PRODUCT_IDS.is_top_tier(&purchase.product_id) {
            self.put(keys::TRIAL_USED, true);
        }
    }

    // ========================================================================
    // Purchase events
    // ========================================================================

    /// Body of the purchase-update listener
    pub async fn handle_purchase_updated(&self, purchase: Purchase) {
        info!(product_id = %purchase.product_id, "Purchase update received");

        let Some(receipt) = self.receipt_for(&purchase).await else {
            error!("No receipt available for validation");
            self.notifier.notify(Notice::ReceiptUnavailable);
            return;
        };

        if !self.validate_receipt(&receipt).await {
            // Left unfinished so the platform redelivers it
            error!(product_id = %purchase.product_id, "Receipt validation failed");
            self.notifier.notify(Notice::ValidationFailed);
            return;
        }

        self.grant_premium(&purchase, &receipt);

        match self.bridge.finish_transaction(&purchase).await {
            Ok(()) => {
                info!(product_id = %purchase.product_id, "Purchase successful and finished");
                self.notifier.notify(Notice::PurchaseSucceeded);
            }
            Err(e) => {
                error!(error = %e, "Error finishing transaction");
                self.notifier.notify(Notice::ProcessingFailed);
            }
        }
    }

    /// Body of the purchase-error listener
    pub fn handle_purchase_error(&self, error: &BridgeError) {
        if error.is_user_cancelled() {
            info!("Purchase cancelled by user");
            return;
        }

        error!(error = %error, "Purchase error");
        self.notifier.notify(Notice::PurchaseFailed);
    }

    // ========================================================================
    // Catalog & purchasing
    // ========================================================================

    /// Store identifiers of the subscription plans
    pub fn product_ids(&self) -> ProductIds {
        PRODUCT_IDS
    }

    /// Subscription products, served from a 24h cache. Never fails: a failed
    /// fetch yields the stale cache, or nothing.
    pub async fn get_subscription_products(&self) -> Vec<Product> {
        if !self.config.platform.supports_in_app_purchases() {
            debug!("Product fetching only available on iOS");
            return Vec::new();
        }

        let cached = self.cached_products();
        if let Some(cache) = &cached {
            let age_ms = self.clock.now_millis().saturating_sub(cache.timestamp);
            if age_ms < self.config.product_cache_ttl().num_milliseconds() && !cache.products.is_empty() {
                debug!(age_minutes = age_ms / 60_000, "Using cached products");
                return cache.products.clone();
            }
            debug!("Product cache expired, fetching fresh products");
        }

        match self.bridge.fetch_products(&PRODUCT_IDS.all()).await {
            Ok(products) if !products.is_empty() => {
                info!(count = products.len(), "Fetched subscription products");
                let cache = CachedProducts {
                    products,
                    timestamp: self.clock.now_millis(),
                };
                self.put_json(keys::CACHED_PRODUCTS, &cache);
                return cache.products;
            }
            Ok(_) => warn!("No products fetched"),
            Err(e) => error!(error = %e, "Error fetching subscription products"),
        }

        match cached {
            Some(cache) => {
                warn!("Using stale product cache as fallback");
                cache.products
            }
            None => Vec::new(),
        }
    }

    fn cached_products(&self) -> Option<CachedProducts> {
        let raw = self.store.get_string(keys::CACHED_PRODUCTS)?;
        if raw.is_empty() {
            return None;
        }

        match serde_json::from_str(&raw) {
            Ok(cache) => Some(cache),
            Err(e) => {
                error!(error = %e, "Error parsing cached products");
                None
            }
        }
    }

    /// Start a purchase of `product_id`. Returns once the store has accepted
    /// the request; the grant itself arrives through the update listener.
    /// A user cancellation is not an error.
    pub async fn purchase_subscription(self: &Arc<Self>, product_id: &str) -> Result<(), SubscriptionError> {
        info!(product_id, "Purchase requested");

        self.ensure_connection().await;

        let products = match self.cached_products() {
            Some(cache) if !cache.products.is_empty() => cache.products,
            _ => {
                warn!("No cached products found, fetching");
                let products = self.get_subscription_products().await;
                if products.is_empty() {
                    return Err(SubscriptionError::ProductsUnavailable);
                }
                products
            }
        };

        let Some(product) = products.iter().find(|p| p.id == product_id) else {
            let available: Vec<&str> = products.iter().map(|p| p.id.as_str()).collect();
            error!(product_id, ?available, "Product not found in catalog");
            return Err(SubscriptionError::ProductNotFound(product_id.to_string()));
        };

        if !self.listeners_registered() {
            warn!("Purchase listeners not set up, registering now");
            self.setup_purchase_listeners();
        }

        match self.bridge.request_purchase(product).await {
            Ok(()) => {
                info!(product_id, "Purchase request accepted");
                Ok(())
            }
            Err(e) if e.is_user_cancelled() => {
                info!(product_id, "Purchase cancelled by user");
                Ok(())
            }
            Err(e) => {
                error!(product_id, error = %e, "Purchase failed");
                Err(e.into())
            }
        }
    }

    /// Restore a previous purchase on this account
    pub async fn restore_purchases(&self) -> bool {
        info!("Restoring purchases");

        let purchases = match self.bridge.available_purchases().await {
            Ok(purchases) => purchases,
            Err(e) => {
                error!(error = %e, "Restore failed");
                return false;
            }
        };

        let Some(latest) = latest_purchase(&purchases) else {
            info!("No purchases to restore");
            self.put(keys::IS_PREMIUM, false);
            return false;
        };

        let Some(receipt) = self.receipt_for(latest).await else {
            return match self.config.restore_policy {
                RestorePolicy::OptimisticGrant => {
                    self.put(keys::IS_PREMIUM, true);
                    warn!("Purchases restored without a receipt, validation skipped");
                    true
                }
                RestorePolicy::RequireReceipt => {
                    warn!("Purchases found but no receipt available");
                    false
                }
            };
        };

        if !self.validate_receipt(&receipt).await {
            info!("Restored purchase validation failed");
            return false;
        }

        self.grant_premium(latest, &receipt);
        self.put(keys::LAST_VALIDATION, self.clock.now_millis());
        info!("Purchases restored and validated");
        true
    }

    // ========================================================================
    // Free tries & limits
    // ========================================================================

    /// Free tries per feature, initialized to the default allotment on first use
    pub fn get_free_tries(&self) -> FreeTries {
        if let Some(raw) = self.store.get_string(keys::FREE_TRIES) {
            match serde_json::from_str(&raw) {
                Ok(tries) => return tries,
                Err(e) => error!(error = %e, "Error parsing free tries"),
            }
        }

        let defaults = FreeTries::uniform(self.config.free_tries_per_feature);
        self.put_json(keys::FREE_TRIES, &defaults);
        defaults
    }

    /// Whether `feature` has at least one free try left
    pub fn has_free_tries(&self, feature: Feature) -> bool {
        self.get_free_tries().get(feature) > 0
    }

    /// Free tries left for `feature`
    pub fn remaining_tries(&self, feature: Feature) -> u32 {
        self.get_free_tries().get(feature)
    }

    /// Spend one free try. Returns false when none are left.
    pub fn use_free_try(&self, feature: Feature) -> bool {
        let mut tries = self.get_free_tries();

        if !tries.consume(feature) {
            info!(feature = feature.as_str(), "No free tries left");
            return false;
        }

        self.put_json(keys::FREE_TRIES, &tries);
        info!(feature = feature.as_str(), remaining = tries.get(feature), "Used free try");
        true
    }

    /// Whether the top-tier plan was ever granted on this install
    pub fn was_trial_used(&self) -> bool {
        self.store.get_bool(keys::TRIAL_USED).unwrap_or(false)
    }

    /// `None` for premium users (unlimited)
    pub fn word_limit(&self) -> Option<usize> {
        if self.is_premium() {
            None
        } else {
            Some(self.config.word_limit)
        }
    }

    /// Count the words of `text` against the free-user ceiling
    pub fn check_word_limit(&self, text: &str) -> WordLimitCheck {
        if self.is_premium() {
            return WordLimitCheck::unlimited();
        }

        let word_count = count_words(text);
        WordLimitCheck {
            allowed: word_count <= self.config.word_limit,
            word_count,
            limit: Some(self.config.word_limit),
        }
    }

    /// Receipt from the last successful grant
    pub fn last_receipt(&self) -> Option<String> {
        self.store.get_string(keys::LAST_RECEIPT)
    }

    /// Stored expiry, if the subscription has one
    pub fn subscription_expiry(&self) -> Option<DateTime<Utc>> {
        self.store
            .get_number(keys::SUBSCRIPTION_EXPIRY)
            .filter(|e| *e > 0)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    /// Snapshot for the host shell
    pub fn subscription_info(&self) -> SubscriptionInfo {
        let is_premium = self.is_premium();

        SubscriptionInfo {
            is_premium,
            trial_used: self.was_trial_used(),
            expires_at: self.subscription_expiry(),
            free_tries: self.get_free_tries(),
            word_limit: if is_premium { None } else { Some(self.config.word_limit) },
            platform: self.config.platform.as_str().to_string(),
        }
    }

    // ========================================================================
    // Storage helpers
    // ========================================================================

    fn put(&self, key: &str, value: impl Into<StoredValue>) {
        if let Err(e) = self.store.set(key, value.into()) {
            error!(key, error = %e, "Failed to persist subscription state");
        }
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.put(key, json),
            Err(e) => error!(key, error = %e, "Failed to serialize subscription state"),
        }
    }
}

/// Most recent purchase by transaction date; the store's first entry when
/// no dates are reported
fn latest_purchase(purchases: &[Purchase]) -> Option<&Purchase> {
    let first = purchases.first()?;
    Some(
        purchases
            .iter()
            .filter(|p| p.transaction_date.is_some())
            .max_by_key(|p| p.transaction_date)
            .unwrap_or(first),
    )
}

/// Whitespace-delimited tokens of the trimmed text
fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Run `task` on `runtime` (or the caller's runtime) if the manager is
/// still alive
fn spawn_with<F, Fut>(weak: &Weak<SubscriptionManager>, runtime: Option<&Handle>, task: F)
where
    F: FnOnce(Arc<SubscriptionManager>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let Some(manager) = weak.upgrade() else {
        debug!("Purchase event after manager was dropped");
        return;
    };

    match runtime.cloned().or_else(|| Handle::try_current().ok()) {
        Some(runtime) => {
            runtime.spawn(task(manager));
        }
        None => error!("No async runtime to process purchase event"),
    }
}
