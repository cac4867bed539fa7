//! Use case outcomes that are not a success.
//!
//! A [`Rejection`] is a normal negative business answer, decoded from a
//! structurally valid upstream response. Protocol failures of the exchange
//! itself stay in [`OrchestratorError`] and are never turned into rejections.

use crate::domain::ProductId;
use crate::ports::RepositoryError;
use relay_runtime::OrchestratorError;
use thiserror::Error;

/// Business rejections shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The address cannot receive mail
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// The acting user does not administer the store
    #[error("You are not the admin of this store")]
    NotAdmin,

    /// The product has fewer units than requested
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Units requested
        requested: i64,
        /// Units in stock
        available: i64,
    },

    /// The product no longer exists
    #[error("Product {product_id} has been deleted")]
    ProductDeleted {
        /// The deleted product
        product_id: ProductId,
    },
}

/// Errors of a shop use case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShopError {
    /// Business rejection
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The cross-service exchange failed
    #[error("Upstream service failed: {0}")]
    Upstream(#[from] OrchestratorError),

    /// Local persistence failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ShopError {
    /// The rejection, if this is a business outcome.
    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// `true` when calling again later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_retryable(),
            Self::Rejected(_) | Self::Repository(_) => false,
        }
    }
}

/// Result alias for use cases.
pub type Result<T> = std::result::Result<T, ShopError>;
