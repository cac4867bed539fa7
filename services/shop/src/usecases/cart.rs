//! Cart use cases: every change that commits to a quantity asks the product
//! service for the product's current stock first.

use super::notify;
use crate::domain::{CartItem, CartItemId, NewCartItem, ProductId, UserId};
use crate::error::{Rejection, Result};
use crate::messages::{ProductValidationRequest, ProductValidationResponse};
use crate::ports::CartRepository;
use crate::topics::PRODUCT_VALIDATION_REQUEST;
use relay_runtime::RequestReplyOrchestrator;
use serde_json::json;
use std::sync::Arc;

/// Interpret a product validation answer for a purchase of `requested` units.
///
/// # Errors
///
/// [`Rejection::ProductDeleted`] if the product is gone,
/// [`Rejection::InsufficientStock`] if `stock < requested`.
pub const fn check_availability(
    answer: &ProductValidationResponse,
    requested: i64,
) -> std::result::Result<(), Rejection> {
    if answer.deleted {
        return Err(Rejection::ProductDeleted {
            product_id: answer.product_id,
        });
    }
    if answer.stock < requested {
        return Err(Rejection::InsufficientStock {
            requested,
            available: answer.stock,
        });
    }
    Ok(())
}

/// Cart service.
#[derive(Clone)]
pub struct CartService {
    orchestrator: RequestReplyOrchestrator,
    carts: Arc<dyn CartRepository>,
}

impl CartService {
    /// Create the service.
    #[must_use]
    pub fn new(orchestrator: RequestReplyOrchestrator, carts: Arc<dyn CartRepository>) -> Self {
        Self {
            orchestrator,
            carts,
        }
    }

    async fn validate_product(&self, product_id: ProductId, requested: i64) -> Result<()> {
        let answer: ProductValidationResponse = self
            .orchestrator
            .call(
                PRODUCT_VALIDATION_REQUEST,
                &ProductValidationRequest { product_id },
            )
            .await?;
        check_availability(&answer, requested)?;
        Ok(())
    }

    /// Add a product to the user's cart.
    ///
    /// # Errors
    ///
    /// A [`Rejection`] from [`check_availability`], an upstream failure of the
    /// validation exchange, or a repository error.
    pub async fn add_item(&self, item: NewCartItem) -> Result<CartItem> {
        self.validate_product(item.product_id, item.purchase_amount)
            .await?;
        Ok(self.carts.add(&item).await?)
    }

    /// Change how many units of an item the user wants.
    ///
    /// # Errors
    ///
    /// As [`add_item`](Self::add_item); also `NotFound` for a foreign or
    /// missing item.
    pub async fn update_amount(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        purchase_amount: i64,
    ) -> Result<CartItem> {
        let item = self.carts.get(user_id, item_id).await?;
        self.validate_product(item.product_id, purchase_amount)
            .await?;
        Ok(self
            .carts
            .update_amount(user_id, item_id, purchase_amount)
            .await?)
    }

    /// Pay for an item and email a receipt.
    ///
    /// # Errors
    ///
    /// As [`update_amount`](Self::update_amount).
    pub async fn pay_item(&self, user_id: UserId, item_id: CartItemId, email: &str) -> Result<CartItem> {
        let item = self.carts.get(user_id, item_id).await?;
        self.validate_product(item.product_id, item.purchase_amount)
            .await?;
        let paid = self.carts.mark_paid(user_id, item_id).await?;

        notify(
            &self.orchestrator,
            email,
            "cart",
            "paid",
            &json!({
                "cart_id": paid.id,
                "product_id": paid.product_id,
                "purchase_amount": paid.purchase_amount,
            }),
        )
        .await;
        Ok(paid)
    }

    /// The user's cart.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub async fn items(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        Ok(self.carts.list_for_user(user_id).await?)
    }

    /// Remove an item from the user's cart.
    ///
    /// # Errors
    ///
    /// `NotFound` for a foreign or missing item.
    pub async fn remove_item(&self, user_id: UserId, item_id: CartItemId) -> Result<()> {
        Ok(self.carts.remove(user_id, item_id).await?)
    }
}
