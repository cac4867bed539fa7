//! Orchestrated call sites of the shop.
//!
//! Each service asks another one for a fact it does not own, interprets the
//! answer as proceed-or-reject and then changes its own data. Notifications are
//! fire-and-forget: once the change is persisted, a failed notification is
//! logged and the use case still succeeds.

pub mod cart;
pub mod product;
pub mod store;
pub mod user;

pub use cart::CartService;
pub use product::ProductService;
pub use store::StoreService;
pub use user::UserService;

use crate::messages::NotificationRequest;
use crate::topics::NOTIFICATION_REQUEST;
use relay_runtime::RequestReplyOrchestrator;
use serde::Serialize;
use tracing::{debug, warn};

async fn notify<T: Serialize + Sync>(
    orchestrator: &RequestReplyOrchestrator,
    email: &str,
    service: &str,
    action: &str,
    message: &T,
) {
    let request = match NotificationRequest::new(email, service, action, message) {
        Ok(request) => request,
        Err(e) => {
            warn!(service, action, error = %e, "Notification message not serializable");
            return;
        }
    };

    match orchestrator.notify(NOTIFICATION_REQUEST, &request).await {
        Ok(correlation_id) => {
            debug!(service, action, correlation_id = %correlation_id, "Notification queued");
        }
        Err(e) => warn!(service, action, error = %e, "Notification not sent"),
    }
}
