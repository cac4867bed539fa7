//! Collaborators outside the request/reply protocol.
//!
//! Persistence and mail delivery are traits here. [`crate::memory`] implements
//! them in process; a database or SMTP backend would implement the same traits.

use crate::domain::{
    CartItem, CartItemId, NewCartItem, NewProduct, NewStore, NewUser, Product, ProductId, Store,
    StoreId, User, UserId,
};
use async_trait::async_trait;
use thiserror::Error;

/// Persistence errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No such record
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Requested id
        id: u64,
    },

    /// A record with the same unique key exists
    #[error("{entity} {key} already exists")]
    Duplicate {
        /// Kind of record
        entity: &'static str,
        /// The clashing key
        key: String,
    },

    /// The backend failed
    #[error("Repository backend failed: {0}")]
    Backend(String),
}

/// User accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Register a user. Emails are unique.
    async fn register(&self, user: &NewUser) -> Result<User, RepositoryError>;
}

/// Store records.
#[async_trait]
pub trait StoreDirectory: Send + Sync {
    /// Whether `user_id` administers `store_id`. A missing store is `false`.
    async fn is_admin(&self, user_id: UserId, store_id: StoreId) -> Result<bool, RepositoryError>;

    /// Load a store.
    async fn get(&self, store_id: StoreId) -> Result<Store, RepositoryError>;

    /// Create a store.
    async fn create(&self, store: &NewStore) -> Result<Store, RepositoryError>;

    /// Rename a store.
    async fn rename(&self, store_id: StoreId, name: &str) -> Result<Store, RepositoryError>;

    /// Delete a store.
    async fn delete(&self, store_id: StoreId) -> Result<(), RepositoryError>;
}

/// Product records.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Load a product, `None` if it does not exist.
    async fn find(&self, product_id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// All products of a store, by id.
    async fn list_by_store(&self, store_id: StoreId) -> Result<Vec<Product>, RepositoryError>;

    /// Create a product.
    async fn create(&self, product: &NewProduct) -> Result<Product, RepositoryError>;

    /// Replace name and stock of a product.
    async fn update(
        &self,
        product_id: ProductId,
        name: &str,
        stock: i64,
    ) -> Result<Product, RepositoryError>;

    /// Delete a product.
    async fn delete(&self, product_id: ProductId) -> Result<(), RepositoryError>;
}

/// Cart items.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Add an item.
    async fn add(&self, item: &NewCartItem) -> Result<CartItem, RepositoryError>;

    /// Load one of the user's items.
    async fn get(&self, user_id: UserId, item_id: CartItemId) -> Result<CartItem, RepositoryError>;

    /// The user's items, by id.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<CartItem>, RepositoryError>;

    /// Change the purchase amount of an item.
    async fn update_amount(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        purchase_amount: i64,
    ) -> Result<CartItem, RepositoryError>;

    /// Mark an item as paid.
    async fn mark_paid(&self, user_id: UserId, item_id: CartItemId) -> Result<CartItem, RepositoryError>;

    /// Remove one of the user's items.
    async fn remove(&self, user_id: UserId, item_id: CartItemId) -> Result<(), RepositoryError>;

    /// Flag every item referencing `product_id`; returns how many changed.
    async fn mark_product_deleted(&self, product_id: ProductId) -> Result<usize, RepositoryError>;
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    /// Recipient
    pub to: String,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub body: String,
}

/// Mail delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Outbound email.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one email.
    async fn send(&self, mail: Mail) -> Result<(), MailError>;
}
