//! # Relay Core
//!
//! Core traits and types for request/reply over an asynchronous message broker.
//!
//! Services that must validate something owned by another service (store
//! ownership, product stock, product existence) do not call each other directly.
//! They publish a request tagged with a [`CorrelationId`](correlation::CorrelationId),
//! the remote service answers on a response topic, and a terminal consumer on the
//! calling side parks the answer in a short-lived mailbox (the rendezvous store)
//! where the requesting caller is polling for it.
//!
//! ```text
//! caller ──publish──▶ *-request ──▶ remote consumer ──publish──▶ *-response
//!   ▲                                                              │
//!   │                                                              ▼
//!   └──── poll get("response:<id>") ◀── put(ttl) ◀── terminal consumer
//! ```
//!
//! This crate holds only the vocabulary shared by every participant:
//!
//! - [`broker`]: the [`MessageBroker`](broker::MessageBroker) transport abstraction
//! - [`rendezvous`]: the [`RendezvousStore`](rendezvous::RendezvousStore) mailbox abstraction
//! - [`correlation`]: correlation identifiers
//! - [`envelope`]: the loosely-typed wire payload and its checked decoding
//!
//! Concrete transports live in `relay-redpanda` and `relay-redis`; the breaker,
//! waiter, dispatch loop and orchestrator live in `relay-runtime`.

pub mod broker;
pub mod correlation;
pub mod envelope;
pub mod rendezvous;

pub use broker::{BrokerError, BrokerMessage, MessageBroker, MessageStream};
pub use correlation::CorrelationId;
pub use envelope::{DecodeError, EncodeError, Envelope, FromEnvelope, decode_answer};
pub use rendezvous::{RendezvousStore, StoreError, response_key};
