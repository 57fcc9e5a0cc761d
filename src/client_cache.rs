//! Client-side cart mirror
//!
//! Keeps the last cart the server returned so a UI can keep rendering while the
//! service is unreachable. The server always wins: every successful response
//! overwrites the mirror, and nothing here ever recomputes totals.
//!
//! The mirror belongs to one signed-in user at a time. `switch_user` deletes the
//! previous user's copy, and responses that arrive after a switch are dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::domain::value_objects::UserId;
use crate::service::{AddToCart, CartView, UpdateQuantity};
use crate::{CartService, CartServiceError};

#[derive(Debug, Error, Clone)]
pub enum SyncError {
    /// The service answered and rejected the request.
    #[error(transparent)]
    Service(CartServiceError),

    #[error("Cart service unavailable: {0}")]
    Unavailable(String),

    #[error("Cart mirror failed: {0}")]
    Mirror(String),

    #[error("No user is signed in")]
    SignedOut,

    #[error("Signed-in user changed during the request")]
    UserChanged,
}

impl From<CartServiceError> for SyncError {
    fn from(e: CartServiceError) -> Self {
        match e {
            CartServiceError::TransientStorage(detail) => SyncError::Unavailable(detail),
            other => SyncError::Service(other),
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// The cart operations as seen from a client.
#[async_trait]
pub trait CartRemote: Send + Sync {
    async fn fetch(&self, user_id: &UserId) -> Result<CartView, SyncError>;
    async fn add(&self, user_id: &UserId, cmd: AddToCart) -> Result<CartView, SyncError>;
    async fn update(&self, user_id: &UserId, cmd: UpdateQuantity) -> Result<CartView, SyncError>;
    async fn remove(&self, user_id: &UserId, item_id: &str) -> Result<CartView, SyncError>;
    async fn clear(&self, user_id: &UserId) -> Result<CartView, SyncError>;
}

#[async_trait]
impl CartRemote for CartService {
    async fn fetch(&self, user_id: &UserId) -> Result<CartView, SyncError> {
        Ok(self.get_cart(user_id).await?)
    }

    async fn add(&self, user_id: &UserId, cmd: AddToCart) -> Result<CartView, SyncError> {
        Ok(self.add_to_cart(user_id, cmd).await?)
    }

    async fn update(&self, user_id: &UserId, cmd: UpdateQuantity) -> Result<CartView, SyncError> {
        Ok(self.update_quantity(user_id, cmd).await?)
    }

    async fn remove(&self, user_id: &UserId, item_id: &str) -> Result<CartView, SyncError> {
        Ok(self.remove_item(user_id, item_id).await?)
    }

    async fn clear(&self, user_id: &UserId) -> Result<CartView, SyncError> {
        Ok(self.clear_cart(user_id).await?)
    }
}

/// Last known-good cart as persisted on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroredCart {
    pub cart: CartView,
    pub synced_at: DateTime<Utc>,
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Option<MirroredCart>, SyncError>;
    async fn store(&self, mirrored: &MirroredCart) -> Result<(), SyncError>;
    async fn remove(&self, user_id: &UserId) -> Result<(), SyncError>;
}

#[derive(Debug, Default)]
pub struct InMemoryMirror {
    entries: Mutex<HashMap<UserId, MirroredCart>>,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirror {
    async fn load(&self, user_id: &UserId) -> Result<Option<MirroredCart>, SyncError> {
        Ok(self.entries.lock().await.get(user_id).cloned())
    }

    async fn store(&self, mirrored: &MirroredCart) -> Result<(), SyncError> {
        self.entries.lock().await.insert(mirrored.cart.user_id.clone(), mirrored.clone());
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> Result<(), SyncError> {
        self.entries.lock().await.remove(user_id);
        Ok(())
    }
}

/// One JSON file per user under `dir`.
#[derive(Debug, Clone)]
pub struct FileMirror {
    dir: PathBuf,
}

impl FileMirror {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user_id: &UserId) -> PathBuf {
        // hex keeps arbitrary ids out of path syntax
        let name: String = user_id.as_str().bytes().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("cart-{name}.json"))
    }
}

fn mirror_io(e: std::io::Error) -> SyncError {
    SyncError::Mirror(e.to_string())
}

#[async_trait]
impl MirrorStore for FileMirror {
    async fn load(&self, user_id: &UserId) -> Result<Option<MirroredCart>, SyncError> {
        let raw = match tokio::fs::read(self.path_for(user_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(mirror_io(e)),
        };
        match serde_json::from_slice(&raw) {
            Ok(mirrored) => Ok(Some(mirrored)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cart mirror");
                Ok(None)
            }
        }
    }

    async fn store(&self, mirrored: &MirroredCart) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(mirror_io)?;
        let path = self.path_for(&mirrored.cart.user_id);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec(mirrored).map_err(|e| SyncError::Mirror(e.to_string()))?;
        tokio::fs::write(&tmp, raw).await.map_err(mirror_io)?;
        tokio::fs::rename(&tmp, &path).await.map_err(mirror_io)
    }

    async fn remove(&self, user_id: &UserId) -> Result<(), SyncError> {
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(mirror_io(e)),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// What the UI renders. `stale` is set only when the server could not be
/// reached and the cart came from the mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCart {
    pub cart: CartView,
    pub stale: bool,
    pub synced_at: DateTime<Utc>,
}

impl CachedCart {
    fn from_server(mirrored: MirroredCart) -> Self {
        Self { cart: mirrored.cart, stale: false, synced_at: mirrored.synced_at }
    }

    fn from_mirror(mirrored: MirroredCart) -> Self {
        Self { cart: mirrored.cart, stale: true, synced_at: mirrored.synced_at }
    }
}

pub struct ClientCartCache {
    remote: Arc<dyn CartRemote>,
    mirror: Arc<dyn MirrorStore>,
    user: RwLock<Option<UserId>>,
    // serializes remote calls so mirror writes land in request order
    in_flight: Mutex<()>,
    // bumped on every mirror write and user switch
    generation: AtomicU64,
    // signed-out users whose mirror could not be deleted yet
    pending_purge: Mutex<Vec<UserId>>,
}

impl ClientCartCache {
    pub fn new(remote: Arc<dyn CartRemote>, mirror: Arc<dyn MirrorStore>) -> Self {
        Self {
            remote,
            mirror,
            user: RwLock::new(None),
            in_flight: Mutex::new(()),
            generation: AtomicU64::new(0),
            pending_purge: Mutex::new(Vec::new()),
        }
    }

    /// Sign in, sign out (`None`) or change accounts. The previous user's
    /// mirror is deleted whenever the user changes.
    ///
    /// The switch itself always happens. If the mirror cannot be deleted the
    /// error is returned and the deletion is retried on every later call.
    pub async fn switch_user(&self, next: Option<UserId>) -> Result<(), SyncError> {
        let mut user = self.user.write().await;
        if *user == next {
            return Ok(());
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *user, next);

        let mut pending = self.pending_purge.lock().await;
        if let Some(previous) = previous {
            debug!(user_id = %previous, "Clearing cart mirror for signed-out user");
            if !pending.contains(&previous) {
                pending.push(previous);
            }
        }
        if let Some(current) = user.as_ref() {
            pending.retain(|u| u != current);
        }
        self.purge(&mut pending).await
    }

    /// The server's cart, or the mirrored one if the server is unreachable.
    ///
    /// Concurrent callers share one request: whoever waited on an in-flight
    /// refresh reads the mirror it just wrote.
    pub async fn cart(&self) -> Result<CachedCart, SyncError> {
        let user = self.require_user().await?;
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.in_flight.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            if let Some(mirrored) = self.owned_mirror(&user).await? {
                return Ok(CachedCart::from_server(mirrored));
            }
        }

        match self.remote.fetch(&user).await {
            Ok(cart) => self.accept(&user, cart).await,
            Err(e) => {
                warn!(error = %e, "Cart refresh failed, serving mirror");
                self.owned_mirror(&user).await?.map(CachedCart::from_mirror).ok_or(e)
            }
        }
    }

    /// The mirror alone, without contacting the server.
    pub async fn last_known(&self) -> Result<Option<CachedCart>, SyncError> {
        let user = self.require_user().await?;
        Ok(self.owned_mirror(&user).await?.map(CachedCart::from_mirror))
    }

    pub async fn add(&self, cmd: AddToCart) -> Result<CachedCart, SyncError> {
        let user = self.require_user().await?;
        let _guard = self.in_flight.lock().await;
        let result = self.remote.add(&user, cmd).await;
        self.settle(&user, result).await
    }

    pub async fn update(&self, cmd: UpdateQuantity) -> Result<CachedCart, SyncError> {
        let user = self.require_user().await?;
        let _guard = self.in_flight.lock().await;
        let result = self.remote.update(&user, cmd).await;
        self.settle(&user, result).await
    }

    pub async fn remove(&self, item_id: &str) -> Result<CachedCart, SyncError> {
        let user = self.require_user().await?;
        let _guard = self.in_flight.lock().await;
        let result = self.remote.remove(&user, item_id).await;
        self.settle(&user, result).await
    }

    pub async fn clear(&self) -> Result<CachedCart, SyncError> {
        let user = self.require_user().await?;
        let _guard = self.in_flight.lock().await;
        let result = self.remote.clear(&user).await;
        self.settle(&user, result).await
    }

    async fn require_user(&self) -> Result<UserId, SyncError> {
        let mut pending = self.pending_purge.lock().await;
        if let Err(e) = self.purge(&mut pending).await {
            warn!(error = %e, "Signed-out cart mirror still present");
        }
        drop(pending);
        self.user.read().await.clone().ok_or(SyncError::SignedOut)
    }

    /// Deletes the mirrors in `pending`, keeping the ones that fail.
    async fn purge(&self, pending: &mut Vec<UserId>) -> Result<(), SyncError> {
        let mut failure = None;
        let mut kept = Vec::new();
        for user_id in pending.drain(..) {
            if let Err(e) = self.mirror.remove(&user_id).await {
                kept.push(user_id);
                failure = Some(e);
            }
        }
        *pending = kept;
        failure.map_or(Ok(()), Err)
    }

    /// A stock-capped write still carries the server's cart, so the mirror
    /// takes it before the error is handed back.
    async fn settle(&self, user: &UserId, result: Result<CartView, SyncError>) -> Result<CachedCart, SyncError> {
        match result {
            Ok(cart) => self.accept(user, cart).await,
            Err(SyncError::Service(CartServiceError::StockExceeded { ceiling, cart })) => {
                self.accept(user, (*cart).clone()).await?;
                Err(SyncError::Service(CartServiceError::StockExceeded { ceiling, cart }))
            }
            Err(e) => Err(e),
        }
    }

    async fn accept(&self, user: &UserId, cart: CartView) -> Result<CachedCart, SyncError> {
        // held across the write so a concurrent switch_user waits for it
        let active = self.user.read().await;
        if active.as_ref() != Some(user) || &cart.user_id != user {
            return Err(SyncError::UserChanged);
        }
        let mirrored = MirroredCart { cart, synced_at: Utc::now() };
        self.mirror.store(&mirrored).await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(CachedCart::from_server(mirrored))
    }

    async fn owned_mirror(&self, user: &UserId) -> Result<Option<MirroredCart>, SyncError> {
        match self.mirror.load(user).await? {
            Some(mirrored) if &mirrored.cart.user_id == user => Ok(Some(mirrored)),
            Some(_) => {
                warn!(user_id = %user, "Dropping cart mirror owned by another user");
                self.mirror.remove(user).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryEventPublisher;
    use crate::adapters::memory::{InMemoryCartRepository, InMemoryProductCatalog};
    use crate::domain::aggregates::{PriceSize, Product, SellerOffer};
    use crate::domain::value_objects::{ProductId, SellerId};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    /// In-process service that can be taken offline.
    struct FlakyRemote {
        service: CartService,
        online: AtomicBool,
        fetches: AtomicUsize,
    }

    impl FlakyRemote {
        fn check(&self) -> Result<(), SyncError> {
            if self.online.load(Ordering::SeqCst) { Ok(()) } else { Err(SyncError::Unavailable("offline".into())) }
        }
    }

    #[async_trait]
    impl CartRemote for FlakyRemote {
        async fn fetch(&self, user_id: &UserId) -> Result<CartView, SyncError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.check()?;
            self.service.fetch(user_id).await
        }
        async fn add(&self, user_id: &UserId, cmd: AddToCart) -> Result<CartView, SyncError> {
            self.check()?;
            CartRemote::add(&self.service, user_id, cmd).await
        }
        async fn update(&self, user_id: &UserId, cmd: UpdateQuantity) -> Result<CartView, SyncError> {
            self.check()?;
            CartRemote::update(&self.service, user_id, cmd).await
        }
        async fn remove(&self, user_id: &UserId, item_id: &str) -> Result<CartView, SyncError> {
            self.check()?;
            CartRemote::remove(&self.service, user_id, item_id).await
        }
        async fn clear(&self, user_id: &UserId) -> Result<CartView, SyncError> {
            self.check()?;
            CartRemote::clear(&self.service, user_id).await
        }
    }

    fn remote() -> Arc<FlakyRemote> {
        let product = Product::new(
            ProductId::new("P1").unwrap(),
            "Tomato Seeds",
            vec![],
            vec![SellerOffer {
                seller_id: SellerId::new("S1").unwrap(),
                full_shop_details: "Green Acres".into(),
                price_sizes: vec![PriceSize::new("1kg", Decimal::new(100, 0), Decimal::new(90, 0), 5).unwrap()],
            }],
        );
        let service = CartService::new(
            Arc::new(InMemoryProductCatalog::new(vec![product])),
            Arc::new(InMemoryCartRepository::new()),
            Arc::new(InMemoryEventPublisher::new()),
        );
        Arc::new(FlakyRemote { service, online: AtomicBool::new(true), fetches: AtomicUsize::new(0) })
    }

    fn add(quantity: u32) -> AddToCart {
        AddToCart {
            product_id: ProductId::new("P1").unwrap(),
            selected_size: "1kg".into(),
            seller_id: SellerId::new("S1").unwrap(),
            quantity,
        }
    }

    async fn signed_in(remote: Arc<FlakyRemote>, mirror: Arc<dyn MirrorStore>, user: &str) -> ClientCartCache {
        let cache = ClientCartCache::new(remote, mirror);
        cache.switch_user(Some(UserId::new(user).unwrap())).await.unwrap();
        cache
    }

    #[tokio::test]
    async fn serves_stale_mirror_when_offline() {
        let remote = remote();
        let cache = signed_in(remote.clone(), Arc::new(InMemoryMirror::new()), "U1").await;

        let fresh = cache.add(add(2)).await.unwrap();
        assert!(!fresh.stale);
        assert_eq!(fresh.cart.total_price, Decimal::new(200, 0));

        remote.online.store(false, Ordering::SeqCst);
        let offline = cache.cart().await.unwrap();
        assert!(offline.stale);
        assert_eq!(offline.cart, fresh.cart);

        // mutations fail without touching the mirror
        assert!(matches!(cache.add(add(1)).await, Err(SyncError::Unavailable(_))));
        assert_eq!(cache.last_known().await.unwrap().unwrap().cart, fresh.cart);
    }

    #[tokio::test]
    async fn offline_without_mirror_is_an_error() {
        let remote = remote();
        remote.online.store(false, Ordering::SeqCst);
        let cache = signed_in(remote, Arc::new(InMemoryMirror::new()), "U1").await;
        assert!(matches!(cache.cart().await, Err(SyncError::Unavailable(_))));
    }

    #[tokio::test]
    async fn stock_exceeded_overwrites_mirror_with_capped_cart() {
        let cache = signed_in(remote(), Arc::new(InMemoryMirror::new()), "U1").await;
        let err = cache.add(add(9)).await.unwrap_err();
        assert!(matches!(err, SyncError::Service(CartServiceError::StockExceeded { ceiling: 5, .. })));

        let mirrored = cache.last_known().await.unwrap().unwrap();
        assert_eq!(mirrored.cart.items[0].quantity, 5);
        assert_eq!(mirrored.cart.total_price, Decimal::new(500, 0));
    }

    /// Mirror whose deletes fail while `locked` is set.
    #[derive(Default)]
    struct LockedMirror {
        inner: InMemoryMirror,
        locked: AtomicBool,
    }

    #[async_trait]
    impl MirrorStore for LockedMirror {
        async fn load(&self, user_id: &UserId) -> Result<Option<MirroredCart>, SyncError> {
            self.inner.load(user_id).await
        }
        async fn store(&self, mirrored: &MirroredCart) -> Result<(), SyncError> {
            self.inner.store(mirrored).await
        }
        async fn remove(&self, user_id: &UserId) -> Result<(), SyncError> {
            if self.locked.load(Ordering::SeqCst) {
                return Err(SyncError::Mirror("file is locked".into()));
            }
            self.inner.remove(user_id).await
        }
    }

    #[tokio::test]
    async fn failed_sign_out_purge_is_retried() {
        let mirror = Arc::new(LockedMirror::default());
        let cache = signed_in(remote(), mirror.clone(), "U1").await;
        cache.add(add(1)).await.unwrap();
        let u1 = UserId::new("U1").unwrap();

        mirror.locked.store(true, Ordering::SeqCst);
        assert!(matches!(cache.switch_user(None).await, Err(SyncError::Mirror(_))));
        assert!(matches!(cache.cart().await, Err(SyncError::SignedOut)));
        assert!(mirror.load(&u1).await.unwrap().is_some());

        mirror.locked.store(false, Ordering::SeqCst);
        assert!(matches!(cache.cart().await, Err(SyncError::SignedOut)));
        assert!(mirror.load(&u1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn switching_user_clears_previous_mirror() {
        let mirror = Arc::new(InMemoryMirror::new());
        let cache = signed_in(remote(), mirror.clone(), "U1").await;
        cache.add(add(1)).await.unwrap();
        let u1 = UserId::new("U1").unwrap();
        assert!(mirror.load(&u1).await.unwrap().is_some());

        cache.switch_user(Some(UserId::new("U2").unwrap())).await.unwrap();
        assert!(mirror.load(&u1).await.unwrap().is_none());
        assert!(cache.last_known().await.unwrap().is_none());

        cache.switch_user(None).await.unwrap();
        assert!(matches!(cache.cart().await, Err(SyncError::SignedOut)));
    }

    #[tokio::test]
    async fn mirror_owned_by_another_user_is_ignored() {
        let mirror = Arc::new(InMemoryMirror::new());
        let foreign = MirroredCart { cart: CartView::empty(UserId::new("U2").unwrap()), synced_at: Utc::now() };
        mirror.entries.lock().await.insert(UserId::new("U1").unwrap(), foreign);

        let remote = remote();
        remote.online.store(false, Ordering::SeqCst);
        let cache = signed_in(remote, mirror.clone(), "U1").await;
        assert!(cache.last_known().await.unwrap().is_none());
        assert!(mirror.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_request() {
        let remote = remote();
        let cache = signed_in(remote.clone(), Arc::new(InMemoryMirror::new()), "U1").await;

        let (a, b, c) = tokio::join!(cache.cart(), cache.cart(), cache.cart());
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
        assert!(!a.unwrap().stale && !b.unwrap().stale && !c.unwrap().stale);
    }

    #[tokio::test]
    async fn file_mirror_persists_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = FileMirror::new(dir.path().join("carts"));
        let user = UserId::new("user/../1").unwrap();
        assert!(mirror.load(&user).await.unwrap().is_none());

        let mirrored = MirroredCart { cart: CartView::empty(user.clone()), synced_at: Utc::now() };
        mirror.store(&mirrored).await.unwrap();
        assert_eq!(mirror.load(&user).await.unwrap(), Some(mirrored));

        mirror.remove(&user).await.unwrap();
        mirror.remove(&user).await.unwrap();
        assert!(mirror.load(&user).await.unwrap().is_none());
    }
}
