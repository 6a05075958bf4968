//! In-crate fakes for the subscription seams

use crate::subscription::api::{ReceiptApi, ValidateReceiptRequest, ValidateReceiptResponse};
use crate::subscription::bridge::{
    ListenerHandle, PurchaseBridge, PurchaseErrorHandler, PurchaseUpdatedHandler,
};
use crate::subscription::clock::Clock;
use crate::subscription::config::{Platform, SubscriptionConfig, PRODUCT_IDS};
use crate::subscription::manager::SubscriptionManager;
use crate::subscription::notify::Notifier;
use crate::subscription::remote_config::ApiConfigSource;
use crate::subscription::storage::MemoryStore;
use crate::subscription::types::{ApiError, BridgeError, BridgeErrorCode, Notice, Product, Purchase};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

pub const VALIDATE_URL: &str = "https://api.example.com/validate-receipt";

// ============================================================================
// Purchase bridge
// ============================================================================

#[derive(Default)]
pub struct BridgeState {
    pub purchases: Vec<Purchase>,
    pub products: Vec<Product>,
    pub receipt: Option<String>,
    pub fail_available: bool,
    pub fail_fetch: bool,
    pub fail_receipt: bool,
    pub fail_finish: bool,
    pub open_error: Option<BridgeError>,
    pub purchase_error: Option<BridgeError>,
    pub open_calls: usize,
    pub close_calls: usize,
    pub available_calls: usize,
    pub fetch_calls: usize,
    pub receipt_calls: usize,
    pub requested: Vec<String>,
    pub finished: Vec<Purchase>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    updated: Vec<(u64, PurchaseUpdatedHandler)>,
    errors: Vec<(u64, PurchaseErrorHandler)>,
}

#[derive(Default)]
pub struct FakeBridge {
    pub state: Mutex<BridgeState>,
    listeners: Arc<Mutex<Listeners>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        let bridge = Self::default();
        bridge.state.lock().products = catalog();
        bridge
    }

    pub fn with_purchase(self, purchase: Purchase) -> Self {
        {
            let mut state = self.state.lock();
            state.purchases.push(purchase);
            state.receipt = Some("app-store-receipt".into());
        }
        self
    }

    pub fn update_listener_count(&self) -> usize {
        self.listeners.lock().updated.len()
    }

    pub fn error_listener_count(&self) -> usize {
        self.listeners.lock().errors.len()
    }

    /// Deliver a purchase to every registered update listener
    pub fn emit_purchase(&self, purchase: Purchase) {
        let handlers: Vec<_> = self.listeners.lock().updated.iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(purchase.clone());
        }
    }

    pub fn emit_error(&self, error: BridgeError) {
        let handlers: Vec<_> = self.listeners.lock().errors.iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(error.clone());
        }
    }
}

struct FakeHandle {
    listeners: Arc<Mutex<Listeners>>,
    id: u64,
}

impl ListenerHandle for FakeHandle {
    fn remove(self: Box<Self>) {
        let mut listeners = self.listeners.lock();
        listeners.updated.retain(|(id, _)| *id != self.id);
        listeners.errors.retain(|(id, _)| *id != self.id);
    }
}

fn unavailable() -> BridgeError {
    BridgeError::new(BridgeErrorCode::Network, "store unavailable")
}

#[async_trait]
impl PurchaseBridge for FakeBridge {
    async fn open_connection(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        match state.open_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn close_connection(&self) -> Result<(), BridgeError> {
        self.state.lock().close_calls += 1;
        Ok(())
    }

    async fn available_purchases(&self) -> Result<Vec<Purchase>, BridgeError> {
        let mut state = self.state.lock();
        state.available_calls += 1;
        if state.fail_available {
            return Err(unavailable());
        }
        Ok(state.purchases.clone())
    }

    async fn fetch_products(&self, product_ids: &[&str]) -> Result<Vec<Product>, BridgeError> {
        let mut state = self.state.lock();
        state.fetch_calls += 1;
        if state.fail_fetch {
            return Err(unavailable());
        }
        Ok(state
            .products
            .iter()
            .filter(|p| product_ids.contains(&p.id.as_str()))
            .cloned()
            .collect())
    }

    async fn request_purchase(&self, product: &Product) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        state.requested.push(product.id.clone());
        match state.purchase_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn receipt(&self) -> Result<Option<String>, BridgeError> {
        let mut state = self.state.lock();
        state.receipt_calls += 1;
        if state.fail_receipt {
            return Err(unavailable());
        }
        Ok(state.receipt.clone())
    }

    async fn finish_transaction(&self, purchase: &Purchase) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if state.fail_finish {
            return Err(unavailable());
        }
        state.finished.push(purchase.clone());
        Ok(())
    }

    fn on_purchase_updated(&self, handler: PurchaseUpdatedHandler) -> Box<dyn ListenerHandle> {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.updated.push((id, handler));
        Box::new(FakeHandle {
            listeners: self.listeners.clone(),
            id,
        })
    }

    fn on_purchase_error(&self, handler: PurchaseErrorHandler) -> Box<dyn ListenerHandle> {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.errors.push((id, handler));
        Box::new(FakeHandle {
            listeners: self.listeners.clone(),
            id,
        })
    }
}

pub fn catalog() -> Vec<Product> {
    PRODUCT_IDS
        .all()
        .iter()
        .map(|id| Product {
            id: id.to_string(),
            title: Some(id.to_string()),
            description: None,
            display_price: Some("$9.99".into()),
            currency: Some("USD".into()),
        })
        .collect()
}

pub fn purchase(product_id: &str) -> Purchase {
    Purchase {
        product_id: product_id.to_string(),
        transaction_id: Some(format!("txn-{}", product_id)),
        transaction_date: None,
        expiration_time: None,
    }
}

// ============================================================================
// Receipt API
// ============================================================================

pub struct FakeReceiptApi {
    pub response: Mutex<Result<ValidateReceiptResponse, ApiError>>,
    pub requests: Mutex<Vec<(String, ValidateReceiptRequest)>>,
}

impl FakeReceiptApi {
    pub fn valid() -> Self {
        Self::responding(Ok(ValidateReceiptResponse {
            success: true,
            valid: true,
            ..Default::default()
        }))
    }

    pub fn responding(response: Result<ValidateReceiptResponse, ApiError>) -> Self {
        FakeReceiptApi {
            response: Mutex::new(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, response: Result<ValidateReceiptResponse, ApiError>) {
        *self.response.lock() = response;
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ReceiptApi for FakeReceiptApi {
    async fn validate_receipt(
        &self,
        url: &str,
        request: &ValidateReceiptRequest,
    ) -> Result<ValidateReceiptResponse, ApiError> {
        self.requests.lock().push((url.to_string(), request.clone()));
        self.response.lock().clone()
    }
}

// ============================================================================
// Config, notices, time
// ============================================================================

pub struct StaticConfig {
    pub url: Mutex<Option<String>>,
}

impl StaticConfig {
    pub fn with_url(url: Option<&str>) -> Self {
        StaticConfig {
            url: Mutex::new(url.map(str::to_string)),
        }
    }
}

impl ApiConfigSource for StaticConfig {
    fn validate_receipt_url(&self) -> Option<String> {
        self.url.lock().clone()
    }

    fn is_loaded(&self) -> bool {
        self.url.lock().is_some()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Manager harness
// ============================================================================

pub struct Harness {
    pub manager: Arc<SubscriptionManager>,
    pub store: Arc<MemoryStore>,
    pub bridge: Arc<FakeBridge>,
    pub api: Arc<FakeReceiptApi>,
    pub config: Arc<StaticConfig>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(bridge: FakeBridge) -> Self {
        Self::with_config(bridge, SubscriptionConfig::for_platform(Platform::Ios))
    }

    pub fn with_config(bridge: FakeBridge, config: SubscriptionConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let bridge = Arc::new(bridge);
        let api = Arc::new(FakeReceiptApi::valid());
        let source = Arc::new(StaticConfig::with_url(Some(VALIDATE_URL)));
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new());

        let manager = SubscriptionManager::new(
            config,
            store.clone(),
            bridge.clone(),
            api.clone(),
            source.clone(),
            notifier.clone(),
        )
        .with_clock(clock.clone());

        Harness {
            manager: Arc::new(manager),
            store,
            bridge,
            api,
            config: source,
            notifier,
            clock,
        }
    }

    /// Wait until spawned listener work has produced `count` notices
    pub async fn wait_for_notices(&self, count: usize) -> Vec<Notice> {
        for _ in 0..200 {
            let notices = self.notifier.notices();
            if notices.len() >= count {
                return notices;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        self.notifier.notices()
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Answer a single HTTP request with `status` and `body`. Returns the base
/// URL and a receiver for the raw request text.
pub async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let raw = read_request(&mut socket).await;

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        let _ = tx.send(raw);
    });

    (url, rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}
