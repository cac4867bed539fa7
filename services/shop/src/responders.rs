//! Consumers answering other services and ending this service's own exchanges.
//!
//! Delegating consumers implement [`Delegate`] and run inside a
//! [`Delegating`](relay_runtime::dispatch::Delegating) handler, which publishes
//! the returned [`Reply`] under the incoming correlation identifier. Terminal
//! consumers are plain [`Terminal`]s, except on the cart side where a deleted
//! product also has to be flagged in every cart.

use crate::messages::{
    ProductValidationRequest, ProductValidationResponse, ProductsRequest, ProductsResponse,
    StoreValidationRequest, StoreValidationResponse,
};
use crate::ports::{CartRepository, ProductCatalog, StoreDirectory};
use crate::topics::{PRODUCT_VALIDATION_RESPONSE, PRODUCTS_RESPONSE, STORE_VALIDATION_RESPONSE};
use async_trait::async_trait;
use relay_core::{CorrelationId, Envelope};
use relay_runtime::dispatch::{Delegate, DispatchError, MessageHandler, Reply, Terminal};
use std::sync::Arc;
use tracing::info;

fn handler_error(error: impl std::fmt::Display) -> DispatchError {
    DispatchError::Handler(error.to_string())
}

/// Store service: answers `store-validation-request`.
pub struct StoreValidationResponder {
    stores: Arc<dyn StoreDirectory>,
}

impl StoreValidationResponder {
    /// Create the responder.
    #[must_use]
    pub fn new(stores: Arc<dyn StoreDirectory>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Delegate for StoreValidationResponder {
    type Request = StoreValidationRequest;

    async fn respond(
        &self,
        _correlation_id: &CorrelationId,
        request: StoreValidationRequest,
    ) -> Result<Option<Reply>, DispatchError> {
        let is_valid = self
            .stores
            .is_admin(request.user_id, request.store_id)
            .await
            .map_err(handler_error)?;
        Ok(Some(Reply::new(
            STORE_VALIDATION_RESPONSE,
            &StoreValidationResponse { is_valid },
        )?))
    }
}

/// Product service: answers `product-validation-request`.
///
/// A product that does not exist is reported as deleted with no stock.
pub struct ProductValidationResponder {
    catalog: Arc<dyn ProductCatalog>,
}

impl ProductValidationResponder {
    /// Create the responder.
    #[must_use]
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Delegate for ProductValidationResponder {
    type Request = ProductValidationRequest;

    async fn respond(
        &self,
        _correlation_id: &CorrelationId,
        request: ProductValidationRequest,
    ) -> Result<Option<Reply>, DispatchError> {
        let answer = match self
            .catalog
            .find(request.product_id)
            .await
            .map_err(handler_error)?
        {
            Some(product) => ProductValidationResponse {
                product_id: product.id,
                deleted: false,
                stock: product.stock,
            },
            None => ProductValidationResponse::deleted(request.product_id),
        };
        Ok(Some(Reply::new(PRODUCT_VALIDATION_RESPONSE, &answer)?))
    }
}

/// Product service: answers `products-request`.
pub struct ProductsResponder {
    catalog: Arc<dyn ProductCatalog>,
}

impl ProductsResponder {
    /// Create the responder.
    #[must_use]
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Delegate for ProductsResponder {
    type Request = ProductsRequest;

    async fn respond(
        &self,
        _correlation_id: &CorrelationId,
        request: ProductsRequest,
    ) -> Result<Option<Reply>, DispatchError> {
        let data = self
            .catalog
            .list_by_store(request.store_id)
            .await
            .map_err(handler_error)?;
        Ok(Some(Reply::new(PRODUCTS_RESPONSE, &ProductsResponse { data })?))
    }
}

/// Cart service: terminal consumer of `product-validation-response`.
///
/// Besides answering the waiting caller it flags cart items of deleted
/// products, which is how deletions broadcast by the product service reach
/// the carts.
pub struct CartValidationTerminal {
    carts: Arc<dyn CartRepository>,
    terminal: Terminal<ProductValidationResponse>,
}

impl CartValidationTerminal {
    /// Create the consumer.
    #[must_use]
    pub const fn new(
        carts: Arc<dyn CartRepository>,
        terminal: Terminal<ProductValidationResponse>,
    ) -> Self {
        Self { carts, terminal }
    }
}

#[async_trait]
impl MessageHandler for CartValidationTerminal {
    async fn handle(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let answer: ProductValidationResponse = envelope.decode()?;

        if answer.deleted {
            let flagged = self
                .carts
                .mark_product_deleted(answer.product_id)
                .await
                .map_err(handler_error)?;
            if flagged > 0 {
                info!(product_id = answer.product_id, flagged, "Flagged cart items of deleted product");
            }
        }

        self.terminal
            .store_answer(envelope.correlation_id(), &answer)
            .await
    }
}

/// Terminal consumer of `store-validation-response` (product service).
pub type StoreValidationTerminal = Terminal<StoreValidationResponse>;

/// Terminal consumer of `products-response` (store service).
pub type ProductsTerminal = Terminal<ProductsResponse>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::{NewCartItem, Product, Store};
    use crate::memory::{InMemoryCartRepository, InMemoryProductCatalog, InMemoryStoreDirectory};
    use chrono::Utc;
    use relay_core::{RendezvousStore, response_key};
    use relay_testing::InMemoryRendezvousStore;
    use serde_json::json;
    use std::time::Duration;

    fn id() -> CorrelationId {
        CorrelationId::from_wire("c-1")
    }

    #[tokio::test]
    async fn store_validation_answers_ownership() {
        let stores = Arc::new(InMemoryStoreDirectory::new());
        stores
            .insert(Store {
                id: 5,
                name: "Toko".to_string(),
                admin_id: 9,
                created_at: Utc::now(),
            })
            .await;
        let responder = StoreValidationResponder::new(stores);

        let reply = responder
            .respond(&id(), StoreValidationRequest { store_id: 5, user_id: 9 })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.topic, STORE_VALIDATION_RESPONSE);
        assert_eq!(reply.body, json!({"is_valid": true}));

        let reply = responder
            .respond(&id(), StoreValidationRequest { store_id: 5, user_id: 1 })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.body, json!({"is_valid": false}));
    }

    #[tokio::test]
    async fn missing_product_is_reported_deleted() {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        catalog
            .insert(Product {
                id: 1,
                store_id: 5,
                name: "kopi".to_string(),
                stock: 4,
                created_at: Utc::now(),
            })
            .await;
        let responder = ProductValidationResponder::new(catalog);

        let live = responder
            .respond(&id(), ProductValidationRequest { product_id: 1 })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            live.body,
            json!({"product_id": 1, "deleted": false, "stock": 4})
        );

        let gone = responder
            .respond(&id(), ProductValidationRequest { product_id: 2 })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            gone.body,
            json!({"product_id": 2, "deleted": true, "stock": 0})
        );
    }

    #[tokio::test]
    async fn cart_terminal_flags_items_and_stores_the_answer() {
        let carts = Arc::new(InMemoryCartRepository::new());
        carts
            .add(&NewCartItem {
                user_id: 1,
                product_id: 7,
                purchase_amount: 1,
            })
            .await
            .unwrap();
        let store = Arc::new(InMemoryRendezvousStore::new());
        let terminal = CartValidationTerminal::new(
            Arc::clone(&carts) as Arc<dyn CartRepository>,
            Terminal::new(
                Arc::clone(&store) as Arc<dyn RendezvousStore>,
                Duration::from_secs(10),
            ),
        );

        let envelope = Envelope::wrap(&id(), &ProductValidationResponse::deleted(7)).unwrap();
        terminal.handle(&envelope).await.unwrap();

        assert!(carts.list_for_user(1).await.unwrap()[0].is_product_deleted);
        let stored = store.get(&response_key(&id())).await.unwrap().unwrap();
        let answer: ProductValidationResponse = serde_json::from_slice(&stored).unwrap();
        assert_eq!(answer, ProductValidationResponse::deleted(7));
    }

    #[tokio::test]
    async fn cart_terminal_skips_malformed_answers() {
        let carts = Arc::new(InMemoryCartRepository::new());
        let store = Arc::new(InMemoryRendezvousStore::new());
        let terminal = CartValidationTerminal::new(
            carts,
            Terminal::new(
                Arc::clone(&store) as Arc<dyn RendezvousStore>,
                Duration::from_secs(10),
            ),
        );

        let envelope = Envelope::new(id()).with_field("deleted", "yes");
        let result = terminal.handle(&envelope).await;

        assert!(matches!(result, Err(DispatchError::Decode(_))));
        assert!(store.is_empty());
    }
}
