//! Topic and consumer group names.
//!
//! One name per exchange, shared by the publishing and the consuming side.

/// Product service asks the store service whether a user administers a store.
pub const STORE_VALIDATION_REQUEST: &str = "store-validation-request";
/// Answer to [`STORE_VALIDATION_REQUEST`].
pub const STORE_VALIDATION_RESPONSE: &str = "store-validation-response";

/// Cart service asks the product service for a product's stock and existence.
pub const PRODUCT_VALIDATION_REQUEST: &str = "product-validation-request";
/// Answer to [`PRODUCT_VALIDATION_REQUEST`]; also broadcast on product deletion.
pub const PRODUCT_VALIDATION_RESPONSE: &str = "product-validation-response";

/// Store service asks the product service for a store's products.
pub const PRODUCTS_REQUEST: &str = "products-request";
/// Answer to [`PRODUCTS_REQUEST`].
pub const PRODUCTS_RESPONSE: &str = "products-response";

/// Fire-and-forget email requests.
pub const NOTIFICATION_REQUEST: &str = "notification-request";

/// Consumer groups, one per service.
pub mod groups {
    /// Cart service
    pub const CART: &str = "cart-service";
    /// Product service
    pub const PRODUCT: &str = "product-service";
    /// Store service
    pub const STORE: &str = "store-service";
    /// Notification service
    pub const NOTIFICATION: &str = "notification-service";
    /// User service (publishes only)
    pub const USER: &str = "user-service";
}
