//! Notification service: turns `notification-request` messages into emails.
//!
//! Each `(service, action)` pair has one template. The `message` field carries
//! the entity the email is about, either as a JSON object or as a string holding
//! one; deletions carry just the id. Unknown pairs and undecodable messages are
//! logged and skipped, they never fail the consumer.
//!
//! Redelivery sends the email again: there is no record of which correlation
//! identifiers were already mailed.

use crate::domain::{Product, Store};
use crate::messages::NotificationRequest;
use crate::ports::{Mail, Mailer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::CorrelationId;
use relay_runtime::dispatch::{Delegate, DispatchError, Reply};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a notification could not be rendered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// No template for this pair
    #[error("No template for {service}/{action}")]
    Unsupported {
        /// Originating service
        service: String,
        /// Action
        action: String,
    },

    /// The message does not match the template's expected shape
    #[error("Message for {service}/{action} is invalid: {reason}")]
    InvalidMessage {
        /// Originating service
        service: String,
        /// Action
        action: String,
        /// Decoding failure
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct PaidItem {
    cart_id: u64,
    product_id: u64,
    purchase_amount: i64,
}

/// Decode the entity carried in `message`.
fn entity<T: DeserializeOwned>(message: &Value) -> Result<T, String> {
    match message {
        Value::String(encoded) => serde_json::from_str(encoded),
        other => serde_json::from_value(other.clone()),
    }
    .map_err(|e| e.to_string())
}

/// Render the email for a notification request.
///
/// `now` stamps receipts whose message carries no time of its own.
///
/// # Errors
///
/// [`RenderError`] for an unknown `(service, action)` pair or a message that
/// does not decode as the template's entity.
pub fn render(
    correlation_id: &CorrelationId,
    request: &NotificationRequest,
    now: DateTime<Utc>,
) -> Result<Mail, RenderError> {
    let invalid = |reason: String| RenderError::InvalidMessage {
        service: request.service.clone(),
        action: request.action.clone(),
        reason,
    };
    let message = &request.message;

    let body = match (request.service.as_str(), request.action.as_str()) {
        ("user", "register") => {
            let name = message
                .as_str()
                .ok_or_else(|| invalid("expected a name".to_string()))?;
            format!("Hello {name}, welcome to the shop!")
        }
        ("store", "create") => {
            let store: Store = entity(message).map_err(invalid)?;
            format!(
                "Your store was created <br> id: {} <br> name: {} <br> admin: {} <br> created at: {}",
                store.id,
                store.name,
                store.admin_id,
                store.created_at.to_rfc2822()
            )
        }
        ("store", "update") => {
            let store: Store = entity(message).map_err(invalid)?;
            format!("Your store was updated <br> id: {} <br> name: {}", store.id, store.name)
        }
        ("store", "delete") => {
            let id: u64 = entity(message).map_err(invalid)?;
            format!("Your store with id {id} was deleted")
        }
        ("product", "create") => {
            let product: Product = entity(message).map_err(invalid)?;
            format!(
                "Your product was added <br> id: {} <br> name: {} <br> stock: {} <br> created at: {}",
                product.id,
                product.name,
                product.stock,
                product.created_at.to_rfc2822()
            )
        }
        ("product", "update") => {
            let product: Product = entity(message).map_err(invalid)?;
            format!(
                "Your product was updated <br> id: {} <br> name: {} <br> stock: {}",
                product.id, product.name, product.stock
            )
        }
        ("product", "delete") => {
            let id: u64 = entity(message).map_err(invalid)?;
            format!("Your product with id {id} was deleted")
        }
        ("cart", "paid") => {
            let paid: PaidItem = entity(message).map_err(invalid)?;
            format!(
                "Thank you for your purchase <br> cart id: {} <br> product id: {} <br> amount: {} <br> paid at: {}",
                paid.cart_id,
                paid.product_id,
                paid.purchase_amount,
                now.to_rfc2822()
            )
        }
        (service, action) => {
            return Err(RenderError::Unsupported {
                service: service.to_string(),
                action: action.to_string(),
            });
        }
    };

    Ok(Mail {
        to: request.email.clone(),
        subject: format!("Shop Notification: {}", request.service),
        body: format!("<h1>ActionId: {correlation_id} <br> {body}</h1>"),
    })
}

/// Delegating consumer of `notification-request`.
///
/// Ends the exchange itself: it hands the email to the [`Mailer`] and publishes
/// nothing onward.
pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
}

impl NotificationDispatcher {
    /// Create a dispatcher delivering through `mailer`.
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl Delegate for NotificationDispatcher {
    type Request = NotificationRequest;

    async fn respond(
        &self,
        correlation_id: &CorrelationId,
        request: NotificationRequest,
    ) -> Result<Option<Reply>, DispatchError> {
        let mail = match render(correlation_id, &request, Utc::now()) {
            Ok(mail) => mail,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Skipping notification");
                return Ok(None);
            }
        };

        self.mailer
            .send(mail)
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?;
        debug!(
            correlation_id = %correlation_id,
            service = %request.service,
            action = %request.action,
            "Notification delivered"
        );
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::RecordingMailer;
    use chrono::TimeZone;
    use serde_json::json;

    fn request(service: &str, action: &str, message: Value) -> NotificationRequest {
        NotificationRequest {
            email: "admin@shop.test".to_string(),
            service: service.to_string(),
            action: action.to_string(),
            message,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn store_create_accepts_object_or_encoded_string() {
        let store = json!({
            "id": 5,
            "name": "Toko",
            "admin_id": 9,
            "created_at": "2024-05-01T08:00:00Z"
        });
        let id = CorrelationId::from_wire("c-1");

        let from_object = render(&id, &request("store", "create", store.clone()), now()).unwrap();
        let from_string = render(
            &id,
            &request("store", "create", Value::String(store.to_string())),
            now(),
        )
        .unwrap();

        assert_eq!(from_object, from_string);
        assert_eq!(from_object.to, "admin@shop.test");
        assert_eq!(from_object.subject, "Shop Notification: store");
        assert!(from_object.body.contains("ActionId: c-1"));
        assert!(from_object.body.contains("name: Toko"));
        assert!(from_object.body.contains("May 2024 08:00:00 +0000"));
    }

    #[test]
    fn deletions_carry_the_id() {
        let mail = render(
            &CorrelationId::from_wire("c-2"),
            &request("product", "delete", json!(42)),
            now(),
        )
        .unwrap();
        assert!(mail.body.contains("product with id 42 was deleted"));
    }

    #[test]
    fn cart_receipt_is_stamped_with_now() {
        let mail = render(
            &CorrelationId::from_wire("c-3"),
            &request(
                "cart",
                "paid",
                json!({"cart_id": 1, "product_id": 7, "purchase_amount": 2}),
            ),
            now(),
        )
        .unwrap();
        assert!(mail.body.contains("amount: 2"));
        assert!(mail.body.contains("paid at: Wed,"));
        assert!(mail.body.contains("May 2024 08:00:00 +0000"));
    }

    #[test]
    fn unknown_pairs_and_bad_messages_are_render_errors() {
        let id = CorrelationId::from_wire("c-4");
        assert_eq!(
            render(&id, &request("cart", "refund", json!(1)), now()),
            Err(RenderError::Unsupported {
                service: "cart".to_string(),
                action: "refund".to_string()
            })
        );
        assert!(matches!(
            render(&id, &request("product", "update", json!("not a product")), now()),
            Err(RenderError::InvalidMessage { .. })
        ));
    }

    #[tokio::test]
    async fn dispatcher_mails_known_and_skips_unknown() {
        let mailer = Arc::new(RecordingMailer::new());
        let dispatcher = NotificationDispatcher::new(Arc::clone(&mailer) as Arc<dyn Mailer>);
        let id = CorrelationId::from_wire("c-5");

        let reply = dispatcher
            .respond(&id, request("user", "register", json!("Budi")))
            .await
            .unwrap();
        assert!(reply.is_none());

        dispatcher
            .respond(&id, request("user", "logout", json!("Budi")))
            .await
            .unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Hello Budi"));
    }
}
