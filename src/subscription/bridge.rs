//! Seam to the platform in-app-purchase bridge.
//!
//! The native side (StoreKit on iOS) is driven by the host shell; this crate
//! only sees it through [`PurchaseBridge`].

use crate::subscription::types::{BridgeError, Product, Purchase};
use async_trait::async_trait;
use std::sync::Arc;

/// Called for every purchase the platform delivers
pub type PurchaseUpdatedHandler = Arc<dyn Fn(Purchase) + Send + Sync>;

/// Called for every failed purchase attempt
pub type PurchaseErrorHandler = Arc<dyn Fn(BridgeError) + Send + Sync>;

/// Registration returned by the bridge. Removing it stops delivery.
pub trait ListenerHandle: Send {
    fn remove(self: Box<Self>);
}

#[async_trait]
pub trait PurchaseBridge: Send + Sync {
    async fn open_connection(&self) -> Result<(), BridgeError>;

    async fn close_connection(&self) -> Result<(), BridgeError>;

    /// Purchases the store still considers active, most recent first on iOS
    async fn available_purchases(&self) -> Result<Vec<Purchase>, BridgeError>;

    async fn fetch_products(&self, product_ids: &[&str]) -> Result<Vec<Product>, BridgeError>;

    /// Start a purchase. Completion is reported through the update listener.
    async fn request_purchase(&self, product: &Product) -> Result<(), BridgeError>;

    /// Base64 App Store receipt, if one exists on the device
    async fn receipt(&self) -> Result<Option<String>, BridgeError>;

    /// Acknowledge a purchase so the platform stops redelivering it
    async fn finish_transaction(&self, purchase: &Purchase) -> Result<(), BridgeError>;

    fn on_purchase_updated(&self, handler: PurchaseUpdatedHandler) -> Box<dyn ListenerHandle>;

    fn on_purchase_error(&self, handler: PurchaseErrorHandler) -> Box<dyn ListenerHandle>;
}
