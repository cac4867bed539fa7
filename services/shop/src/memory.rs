//! In-process implementations of the [`ports`](crate::ports).
//!
//! Used by the tests and by `shop-node` when no database is configured. Ids are
//! assigned from a per-repository counter starting at 1.

use crate::domain::{
    CartItem, CartItemId, NewCartItem, NewProduct, NewStore, NewUser, Product, ProductId, Store,
    StoreId, User, UserId,
};
use crate::ports::{
    CartRepository, Mail, MailError, Mailer, ProductCatalog, RepositoryError, StoreDirectory,
    UserDirectory,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

fn not_found(entity: &'static str, id: u64) -> RepositoryError {
    RepositoryError::NotFound { entity, id }
}

/// In-memory [`UserDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<BTreeMap<UserId, User>>,
    next_id: AtomicU64,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn register(&self, user: &NewUser) -> Result<User, RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email.eq_ignore_ascii_case(&user.email)) {
            return Err(RepositoryError::Duplicate {
                entity: "user",
                key: user.email.clone(),
            });
        }
        let registered = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: Utc::now(),
        };
        users.insert(registered.id, registered.clone());
        Ok(registered)
    }
}

/// In-memory [`StoreDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryStoreDirectory {
    stores: RwLock<BTreeMap<StoreId, Store>>,
    next_id: AtomicU64,
}

impl InMemoryStoreDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a store with a fixed id, replacing any existing one.
    pub async fn insert(&self, store: Store) {
        self.next_id.fetch_max(store.id, Ordering::SeqCst);
        self.stores.write().await.insert(store.id, store);
    }
}

#[async_trait]
impl StoreDirectory for InMemoryStoreDirectory {
    async fn is_admin(&self, user_id: UserId, store_id: StoreId) -> Result<bool, RepositoryError> {
        Ok(self
            .stores
            .read()
            .await
            .get(&store_id)
            .is_some_and(|store| store.admin_id == user_id))
    }

    async fn get(&self, store_id: StoreId) -> Result<Store, RepositoryError> {
        self.stores
            .read()
            .await
            .get(&store_id)
            .cloned()
            .ok_or_else(|| not_found("store", store_id))
    }

    async fn create(&self, store: &NewStore) -> Result<Store, RepositoryError> {
        let created = Store {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: store.name.clone(),
            admin_id: store.admin_id,
            created_at: Utc::now(),
        };
        self.stores.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn rename(&self, store_id: StoreId, name: &str) -> Result<Store, RepositoryError> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| not_found("store", store_id))?;
        store.name = name.to_string();
        Ok(store.clone())
    }

    async fn delete(&self, store_id: StoreId) -> Result<(), RepositoryError> {
        self.stores
            .write()
            .await
            .remove(&store_id)
            .map(|_| ())
            .ok_or_else(|| not_found("store", store_id))
    }
}

/// In-memory [`ProductCatalog`].
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<BTreeMap<ProductId, Product>>,
    next_id: AtomicU64,
}

impl InMemoryProductCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a product with a fixed id, replacing any existing one.
    pub async fn insert(&self, product: Product) {
        self.next_id.fetch_max(product.id, Ordering::SeqCst);
        self.products.write().await.insert(product.id, product);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find(&self, product_id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.products.read().await.get(&product_id).cloned())
    }

    async fn list_by_store(&self, store_id: StoreId) -> Result<Vec<Product>, RepositoryError> {
        Ok(self
            .products
            .read()
            .await
            .values()
            .filter(|product| product.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn create(&self, product: &NewProduct) -> Result<Product, RepositoryError> {
        let created = Product {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            store_id: product.store_id,
            name: product.name.clone(),
            stock: product.stock,
            created_at: Utc::now(),
        };
        self.products
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        product_id: ProductId,
        name: &str,
        stock: i64,
    ) -> Result<Product, RepositoryError> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(&product_id)
            .ok_or_else(|| not_found("product", product_id))?;
        product.name = name.to_string();
        product.stock = stock;
        Ok(product.clone())
    }

    async fn delete(&self, product_id: ProductId) -> Result<(), RepositoryError> {
        self.products
            .write()
            .await
            .remove(&product_id)
            .map(|_| ())
            .ok_or_else(|| not_found("product", product_id))
    }
}

/// In-memory [`CartRepository`].
#[derive(Debug, Default)]
pub struct InMemoryCartRepository {
    items: RwLock<BTreeMap<CartItemId, CartItem>>,
    next_id: AtomicU64,
}

impl InMemoryCartRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn owned<'a>(
        items: &'a mut BTreeMap<CartItemId, CartItem>,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<&'a mut CartItem, RepositoryError> {
        items
            .get_mut(&item_id)
            .filter(|item| item.user_id == user_id)
            .ok_or_else(|| not_found("cart item", item_id))
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn add(&self, item: &NewCartItem) -> Result<CartItem, RepositoryError> {
        let created = CartItem {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: item.user_id,
            product_id: item.product_id,
            purchase_amount: item.purchase_amount,
            is_paid: false,
            is_product_deleted: false,
            created_at: Utc::now(),
        };
        self.items.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, user_id: UserId, item_id: CartItemId) -> Result<CartItem, RepositoryError> {
        self.items
            .read()
            .await
            .get(&item_id)
            .filter(|item| item.user_id == user_id)
            .cloned()
            .ok_or_else(|| not_found("cart item", item_id))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<CartItem>, RepositoryError> {
        Ok(self
            .items
            .read()
            .await
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_amount(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        purchase_amount: i64,
    ) -> Result<CartItem, RepositoryError> {
        let mut items = self.items.write().await;
        let item = Self::owned(&mut items, user_id, item_id)?;
        item.purchase_amount = purchase_amount;
        Ok(item.clone())
    }

    async fn mark_paid(&self, user_id: UserId, item_id: CartItemId) -> Result<CartItem, RepositoryError> {
        let mut items = self.items.write().await;
        let item = Self::owned(&mut items, user_id, item_id)?;
        item.is_paid = true;
        Ok(item.clone())
    }

    async fn remove(&self, user_id: UserId, item_id: CartItemId) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        Self::owned(&mut items, user_id, item_id)?;
        items.remove(&item_id);
        Ok(())
    }

    async fn mark_product_deleted(&self, product_id: ProductId) -> Result<usize, RepositoryError> {
        let mut items = self.items.write().await;
        let mut changed = 0;
        for item in items
            .values_mut()
            .filter(|item| item.product_id == product_id && !item.is_product_deleted)
        {
            item.is_product_deleted = true;
            changed += 1;
        }
        Ok(changed)
    }
}

/// [`Mailer`] that logs each email instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        tracing::info!(to = %mail.to, subject = %mail.subject, body = %mail.body, "Email sent");
        Ok(())
    }
}

/// [`Mailer`] that keeps every email, for assertions.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: RwLock<Vec<Mail>>,
}

impl RecordingMailer {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub async fn sent(&self) -> Vec<Mail> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        self.sent.write().await.push(mail);
        Ok(())
    }
}
