//! Product use cases, gated on store ownership owned by the store service.

use super::notify;
use crate::domain::{NewProduct, Product, ProductId, ProductUpdate, StoreId, UserId};
use crate::error::{Rejection, Result};
use crate::messages::{ProductValidationResponse, StoreValidationRequest, StoreValidationResponse};
use crate::ports::{ProductCatalog, RepositoryError};
use crate::topics::{PRODUCT_VALIDATION_RESPONSE, STORE_VALIDATION_REQUEST};
use relay_runtime::RequestReplyOrchestrator;
use std::sync::Arc;

/// Product service.
#[derive(Clone)]
pub struct ProductService {
    orchestrator: RequestReplyOrchestrator,
    catalog: Arc<dyn ProductCatalog>,
}

impl ProductService {
    /// Create the service.
    #[must_use]
    pub fn new(orchestrator: RequestReplyOrchestrator, catalog: Arc<dyn ProductCatalog>) -> Self {
        Self {
            orchestrator,
            catalog,
        }
    }

    /// Ask the store service whether `user_id` administers `store_id`.
    async fn authorize(&self, user_id: UserId, store_id: StoreId) -> Result<()> {
        let answer: StoreValidationResponse = self
            .orchestrator
            .call(
                STORE_VALIDATION_REQUEST,
                &StoreValidationRequest { store_id, user_id },
            )
            .await?;
        if answer.is_valid {
            Ok(())
        } else {
            Err(Rejection::NotAdmin.into())
        }
    }

    /// Load a product that must belong to `store_id`.
    async fn owned_product(&self, store_id: StoreId, product_id: ProductId) -> Result<Product> {
        let product = self
            .catalog
            .find(product_id)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: "product",
                id: product_id,
            })?;
        if product.store_id != store_id {
            return Err(Rejection::NotAdmin.into());
        }
        Ok(product)
    }

    /// Create a product in a store the user administers.
    ///
    /// # Errors
    ///
    /// [`Rejection::NotAdmin`], an upstream failure of the ownership exchange,
    /// or a repository error.
    pub async fn create_product(&self, product: NewProduct) -> Result<Product> {
        self.authorize(product.user_id, product.store_id).await?;
        let created = self.catalog.create(&product).await?;

        notify(&self.orchestrator, &product.email, "product", "create", &created).await;
        Ok(created)
    }

    /// Change name and stock of a product.
    ///
    /// # Errors
    ///
    /// As [`create_product`](Self::create_product); `NotAdmin` also when the
    /// product belongs to another store.
    pub async fn update_product(&self, update: ProductUpdate) -> Result<Product> {
        self.authorize(update.user_id, update.store_id).await?;
        self.owned_product(update.store_id, update.product_id)
            .await?;
        let updated = self
            .catalog
            .update(update.product_id, &update.name, update.stock)
            .await?;

        notify(&self.orchestrator, &update.email, "product", "update", &updated).await;
        Ok(updated)
    }

    /// Delete a product and tell every cart service about it.
    ///
    /// The deletion is broadcast on the product validation response topic as
    /// `deleted: true, stock: 0` so carts holding the product can flag it.
    ///
    /// # Errors
    ///
    /// As [`update_product`](Self::update_product); a failed broadcast leaves
    /// the product in place.
    pub async fn delete_product(
        &self,
        user_id: UserId,
        store_id: StoreId,
        product_id: ProductId,
        email: &str,
    ) -> Result<()> {
        self.authorize(user_id, store_id).await?;
        self.owned_product(store_id, product_id).await?;

        self.orchestrator
            .notify(
                PRODUCT_VALIDATION_RESPONSE,
                &ProductValidationResponse::deleted(product_id),
            )
            .await?;
        self.catalog.delete(product_id).await?;

        notify(&self.orchestrator, email, "product", "delete", &product_id).await;
        Ok(())
    }

    /// Load a product.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist.
    pub async fn product(&self, product_id: ProductId) -> Result<Product> {
        Ok(self
            .catalog
            .find(product_id)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: "product",
                id: product_id,
            })?)
    }
}
