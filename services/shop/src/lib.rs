//! # Shop Services
//!
//! Four cooperating services of a small shop (cart, product, store and
//! notification) that validate each other's data through request/reply over
//! the message broker instead of calling each other directly.
//!
//! | Service      | Asks                                   | Answers                          |
//! |--------------|----------------------------------------|----------------------------------|
//! | cart         | product stock/existence                | nothing                          |
//! | product      | store ownership                        | product validation, listings     |
//! | store        | product listings                       | store ownership                  |
//! | notification | nothing                                | `notification-request` (emails)  |
//!
//! - [`topics`]: topic and consumer group names
//! - [`messages`]: one typed message per topic
//! - [`usecases`]: the orchestrated call sites
//! - [`responders`]: delegating and terminal consumers
//! - [`notification`]: email rendering and dispatch
//! - [`node`]: wiring a process for one [`ServiceRole`](node::ServiceRole)
//!
//! Persistence and SMTP sit behind the traits in [`ports`]; [`memory`] holds
//! the in-process implementations.

pub mod config;
pub mod domain;
pub mod error;
pub mod memory;
pub mod messages;
pub mod node;
pub mod notification;
pub mod ports;
pub mod responders;
pub mod topics;
pub mod usecases;

pub use config::{Config, ConfigError};
pub use error::{Rejection, ShopError};
pub use node::{Collaborators, ServiceNode, ServiceRole};
