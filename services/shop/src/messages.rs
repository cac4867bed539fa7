//! One typed message per topic.
//!
//! Each type decodes from the wire through [`FromEnvelope`], which checks every
//! field it reads and names the offending one on mismatch, and encodes through
//! `Serialize` (the `correlation_id` is added by the envelope). Answers that end
//! up in the rendezvous store are also `Deserialize`, since the waiting caller
//! reads them back from there.

use crate::domain::{Product, ProductId, StoreId, UserId};
use relay_core::{DecodeError, Envelope, FromEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `store-validation-request`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreValidationRequest {
    /// Store whose ownership is checked
    pub store_id: StoreId,
    /// User claiming to administer it
    pub user_id: UserId,
}

impl FromEnvelope for StoreValidationRequest {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            store_id: envelope.u64_field("store_id")?,
            user_id: envelope.u64_field("user_id")?,
        })
    }
}

/// `store-validation-response`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreValidationResponse {
    /// Whether the user administers the store
    pub is_valid: bool,
}

impl FromEnvelope for StoreValidationResponse {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            is_valid: envelope.bool_field("is_valid")?,
        })
    }
}

/// `product-validation-request`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductValidationRequest {
    /// Product to check
    pub product_id: ProductId,
}

impl FromEnvelope for ProductValidationRequest {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            product_id: envelope.u64_field("product_id")?,
        })
    }
}

/// `product-validation-response`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductValidationResponse {
    /// Checked product
    pub product_id: ProductId,
    /// The product no longer exists
    pub deleted: bool,
    /// Units in stock; zero when deleted
    pub stock: i64,
}

impl ProductValidationResponse {
    /// Answer for a product that does not exist (anymore).
    #[must_use]
    pub const fn deleted(product_id: ProductId) -> Self {
        Self {
            product_id,
            deleted: true,
            stock: 0,
        }
    }
}

impl FromEnvelope for ProductValidationResponse {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            product_id: envelope.u64_field("product_id")?,
            deleted: envelope.bool_field("deleted")?,
            stock: envelope.i64_field("stock")?,
        })
    }
}

/// `products-request`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductsRequest {
    /// Store whose products are listed
    pub store_id: StoreId,
}

impl FromEnvelope for ProductsRequest {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            store_id: envelope.u64_field("store_id")?,
        })
    }
}

/// `products-response`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductsResponse {
    /// The store's products
    pub data: Vec<Product>,
}

impl FromEnvelope for ProductsResponse {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            data: envelope.field_as("data")?,
        })
    }
}

/// `notification-request`
///
/// `message` is service-defined: an entity object for create/update, an id for
/// delete, a name for user registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Recipient
    pub email: String,
    /// Originating service (`cart`, `product`, `store`, `user`)
    pub service: String,
    /// What happened (`create`, `update`, `delete`, `paid`, `register`)
    pub action: String,
    /// Details for the email body
    pub message: Value,
}

impl NotificationRequest {
    /// Build a request with any serializable message.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `message` cannot become JSON.
    pub fn new<T: Serialize>(
        email: impl Into<String>,
        service: &str,
        action: &str,
        message: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            email: email.into(),
            service: service.to_string(),
            action: action.to_string(),
            message: serde_json::to_value(message)?,
        })
    }
}

impl FromEnvelope for NotificationRequest {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            email: envelope.string_field("email")?.to_string(),
            service: envelope.string_field("service")?.to_string(),
            action: envelope.string_field("action")?.to_string(),
            message: envelope.require("message")?.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use relay_core::CorrelationId;
    use serde_json::json;

    fn envelope(value: &Value) -> Envelope {
        Envelope::from_slice(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn store_validation_request_names_the_bad_field() {
        let env = envelope(&json!({"correlation_id": "c", "store_id": 5, "user_id": "nine"}));
        assert_eq!(
            env.decode::<StoreValidationRequest>(),
            Err(DecodeError::WrongType {
                field: "user_id".to_string(),
                expected: "unsigned integer"
            })
        );
    }

    #[test]
    fn product_validation_response_allows_negative_stock_but_needs_all_fields() {
        let env = envelope(&json!({
            "correlation_id": "c",
            "product_id": 3,
            "deleted": false,
            "stock": -1
        }));
        assert_eq!(
            env.decode::<ProductValidationResponse>(),
            Ok(ProductValidationResponse {
                product_id: 3,
                deleted: false,
                stock: -1
            })
        );

        let env = envelope(&json!({"correlation_id": "c", "product_id": 3, "stock": 1}));
        assert_eq!(
            env.decode::<ProductValidationResponse>(),
            Err(DecodeError::MissingField {
                field: "deleted".to_string()
            })
        );
    }

    #[test]
    fn products_response_decodes_nested_products() {
        let product = Product {
            id: 1,
            store_id: 5,
            name: "kopi".to_string(),
            stock: 3,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        };
        let wire = Envelope::wrap(
            &CorrelationId::from_wire("c"),
            &ProductsResponse {
                data: vec![product.clone()],
            },
        )
        .unwrap();

        let decoded: ProductsResponse = Envelope::from_slice(&wire.to_bytes())
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(decoded.data, vec![product]);
    }

    #[test]
    fn products_response_rejects_non_array_data() {
        let env = envelope(&json!({"correlation_id": "c", "data": "none"}));
        assert!(matches!(
            env.decode::<ProductsResponse>(),
            Err(DecodeError::WrongType { field, .. }) if field == "data"
        ));
    }

    #[test]
    fn notification_message_is_opaque() {
        let env = envelope(&json!({
            "correlation_id": "c",
            "email": "a@b.c",
            "service": "store",
            "action": "delete",
            "message": 42
        }));
        let request: NotificationRequest = env.decode().unwrap();
        assert_eq!(request.message, json!(42));

        let env = envelope(&json!({
            "correlation_id": "c",
            "email": "a@b.c",
            "service": "store",
            "action": "delete"
        }));
        assert_eq!(
            env.decode::<NotificationRequest>(),
            Err(DecodeError::MissingField {
                field: "message".to_string()
            })
        );
    }
}
