//! Shop entities and the inputs of their use cases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store identifier
pub type StoreId = u64;
/// Product identifier
pub type ProductId = u64;
/// User identifier
pub type UserId = u64;
/// Cart item identifier
pub type CartItemId = u64;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Login and notification address
    pub email: String,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// A store and its administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    /// Store id
    pub id: StoreId,
    /// Display name
    pub name: String,
    /// The only user allowed to change the store and its products
    pub admin_id: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A product offered by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product id
    pub id: ProductId,
    /// Owning store
    pub store_id: StoreId,
    /// Display name
    pub name: String,
    /// Units in stock
    pub stock: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One line of a user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Item id
    pub id: CartItemId,
    /// Owner of the cart
    pub user_id: UserId,
    /// Product in the cart
    pub product_id: ProductId,
    /// Units the user wants to buy
    pub purchase_amount: i64,
    /// Set once the item is paid
    pub is_paid: bool,
    /// Set when the product was deleted after the item was added
    pub is_product_deleted: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A store together with its products, as returned by the store service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreWithProducts {
    /// The store
    pub store: Store,
    /// Its products, as reported by the product service
    pub products: Vec<Product>,
}

/// Input for registering a user. Credentials are handled by the directory.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Display name
    pub name: String,
    /// Login and notification address
    pub email: String,
}

/// Input for creating a store.
#[derive(Debug, Clone)]
pub struct NewStore {
    /// Creating user, who becomes the admin
    pub admin_id: UserId,
    /// Address for the confirmation email
    pub email: String,
    /// Display name
    pub name: String,
}

/// Input for renaming a store.
#[derive(Debug, Clone)]
pub struct StoreUpdate {
    /// Store to rename
    pub store_id: StoreId,
    /// Acting user
    pub user_id: UserId,
    /// Address for the confirmation email
    pub email: String,
    /// New name
    pub name: String,
}

/// Input for creating a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    /// Acting user; must administer `store_id`
    pub user_id: UserId,
    /// Address for the confirmation email
    pub email: String,
    /// Owning store
    pub store_id: StoreId,
    /// Display name
    pub name: String,
    /// Initial stock
    pub stock: i64,
}

/// Input for changing a product.
#[derive(Debug, Clone)]
pub struct ProductUpdate {
    /// Product to change
    pub product_id: ProductId,
    /// Acting user; must administer `store_id`
    pub user_id: UserId,
    /// Address for the confirmation email
    pub email: String,
    /// Owning store
    pub store_id: StoreId,
    /// New name
    pub name: String,
    /// New stock
    pub stock: i64,
}

/// Input for adding a product to a cart.
#[derive(Debug, Clone)]
pub struct NewCartItem {
    /// Cart owner
    pub user_id: UserId,
    /// Product to add
    pub product_id: ProductId,
    /// Units to buy
    pub purchase_amount: i64,
}
