//! Store use cases. Ownership is the store service's own data, so only the
//! product listing goes through request/reply.

use super::notify;
use crate::domain::{NewStore, Store, StoreId, StoreUpdate, StoreWithProducts, UserId};
use crate::error::{Rejection, Result};
use crate::messages::{ProductsRequest, ProductsResponse};
use crate::ports::StoreDirectory;
use crate::topics::PRODUCTS_REQUEST;
use relay_runtime::RequestReplyOrchestrator;
use std::sync::Arc;

/// Store service.
#[derive(Clone)]
pub struct StoreService {
    orchestrator: RequestReplyOrchestrator,
    stores: Arc<dyn StoreDirectory>,
}

impl StoreService {
    /// Create the service.
    #[must_use]
    pub fn new(orchestrator: RequestReplyOrchestrator, stores: Arc<dyn StoreDirectory>) -> Self {
        Self {
            orchestrator,
            stores,
        }
    }

    async fn ensure_admin(&self, user_id: UserId, store_id: StoreId) -> Result<()> {
        if self.stores.is_admin(user_id, store_id).await? {
            Ok(())
        } else {
            Err(Rejection::NotAdmin.into())
        }
    }

    /// A store with the products the product service lists for it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown store, or an upstream failure of the
    /// listing exchange.
    pub async fn store_with_products(&self, store_id: StoreId) -> Result<StoreWithProducts> {
        let store = self.stores.get(store_id).await?;
        let listing: ProductsResponse = self
            .orchestrator
            .call(PRODUCTS_REQUEST, &ProductsRequest { store_id })
            .await?;

        Ok(StoreWithProducts {
            store,
            products: listing.data,
        })
    }

    /// Create a store administered by the creating user.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub async fn create_store(&self, store: NewStore) -> Result<Store> {
        let created = self.stores.create(&store).await?;
        notify(&self.orchestrator, &store.email, "store", "create", &created).await;
        Ok(created)
    }

    /// Rename a store the user administers.
    ///
    /// # Errors
    ///
    /// [`Rejection::NotAdmin`] or a repository error.
    pub async fn update_store(&self, update: StoreUpdate) -> Result<Store> {
        self.ensure_admin(update.user_id, update.store_id).await?;
        let renamed = self.stores.rename(update.store_id, &update.name).await?;
        notify(&self.orchestrator, &update.email, "store", "update", &renamed).await;
        Ok(renamed)
    }

    /// Delete a store the user administers.
    ///
    /// # Errors
    ///
    /// [`Rejection::NotAdmin`] or a repository error.
    pub async fn delete_store(&self, user_id: UserId, store_id: StoreId, email: &str) -> Result<()> {
        self.ensure_admin(user_id, store_id).await?;
        self.stores.delete(store_id).await?;
        notify(&self.orchestrator, email, "store", "delete", &store_id).await;
        Ok(())
    }
}
