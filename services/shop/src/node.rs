//! Wiring one service process.
//!
//! A [`ServiceNode`] owns everything a role needs to take part in request/reply:
//! a producer breaker guarding every publish, a separate consumer breaker
//! guarding every dispatch, the orchestrator for outbound calls and the
//! consumer loops answering or terminating exchanges. Nothing is global; tests
//! build nodes over the in-memory broker and store.

use crate::config::RelayConfig;
use crate::memory::{
    InMemoryCartRepository, InMemoryProductCatalog, InMemoryStoreDirectory,
    InMemoryUserDirectory, LogMailer,
};
use crate::notification::NotificationDispatcher;
use crate::ports::{CartRepository, Mailer, ProductCatalog, StoreDirectory, UserDirectory};
use crate::responders::{
    CartValidationTerminal, ProductValidationResponder, ProductsResponder, ProductsTerminal,
    StoreValidationResponder, StoreValidationTerminal,
};
use crate::topics::{self, groups};
use crate::usecases::{CartService, ProductService, StoreService, UserService};
use relay_core::{MessageBroker, RendezvousStore};
use relay_runtime::dispatch::{Delegating, MessageHandler, Terminal};
use relay_runtime::{
    CircuitBreaker, ConsumerDispatchLoop, CorrelationWaiter, GuardedPublisher, HealthStatus,
    RequestReplyOrchestrator,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The service a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceRole {
    /// Carts; asks for product validation
    Cart,
    /// Products; asks for store ownership, answers validation and listings
    Product,
    /// Stores; asks for listings, answers ownership
    Store,
    /// Email delivery
    Notification,
    /// Accounts; publishes welcome notifications, consumes nothing
    User,
}

impl ServiceRole {
    /// All roles.
    pub const ALL: [Self; 5] = [
        Self::Cart,
        Self::Product,
        Self::Store,
        Self::Notification,
        Self::User,
    ];

    /// Name as used in `SERVICE` and in breaker names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cart => "cart",
            Self::Product => "product",
            Self::Store => "store",
            Self::Notification => "notification",
            Self::User => "user",
        }
    }

    /// Consumer group of this role.
    #[must_use]
    pub const fn group(self) -> &'static str {
        match self {
            Self::Cart => groups::CART,
            Self::Product => groups::PRODUCT,
            Self::Store => groups::STORE,
            Self::Notification => groups::NOTIFICATION,
            Self::User => groups::USER,
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown service role: {s}"))
    }
}

/// Persistence and mail collaborators of a node.
#[derive(Clone)]
pub struct Collaborators {
    /// Store records
    pub stores: Arc<dyn StoreDirectory>,
    /// Product records
    pub catalog: Arc<dyn ProductCatalog>,
    /// Cart items
    pub carts: Arc<dyn CartRepository>,
    /// Outbound email
    pub mailer: Arc<dyn Mailer>,
    /// User accounts
    pub users: Arc<dyn UserDirectory>,
}

impl Collaborators {
    /// Fresh in-memory repositories and a [`LogMailer`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            stores: Arc::new(InMemoryStoreDirectory::new()),
            catalog: Arc::new(InMemoryProductCatalog::new()),
            carts: Arc::new(InMemoryCartRepository::new()),
            mailer: Arc::new(LogMailer),
            users: Arc::new(InMemoryUserDirectory::new()),
        }
    }
}

/// A wired service process.
pub struct ServiceNode {
    role: ServiceRole,
    producer_breaker: CircuitBreaker,
    consumer_breaker: CircuitBreaker,
    orchestrator: RequestReplyOrchestrator,
    collaborators: Collaborators,
    loops: Vec<ConsumerDispatchLoop>,
}

impl ServiceNode {
    /// Wire a node for `role`. Nothing runs until [`spawn`](Self::spawn).
    #[must_use]
    pub fn new(
        role: ServiceRole,
        relay: &RelayConfig,
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn RendezvousStore>,
        collaborators: Collaborators,
    ) -> Self {
        let producer_breaker = CircuitBreaker::new(relay.breaker(format!("{role}-producer")));
        let consumer_breaker = CircuitBreaker::new(relay.breaker(format!("{role}-consumer")));
        let publisher = GuardedPublisher::new(Arc::clone(&broker), producer_breaker.clone());
        let waiter = CorrelationWaiter::new(Arc::clone(&store), relay.waiter());
        let orchestrator = RequestReplyOrchestrator::new(publisher.clone(), waiter);

        let consumer = |name: &str, topic: &str, handler: Arc<dyn MessageHandler>| {
            ConsumerDispatchLoop::new(name, topic, role.group(), Arc::clone(&broker), handler)
                .with_breaker(consumer_breaker.clone())
                .with_backoff(relay.backoff())
        };
        let ttl = relay.response_ttl;

        let loops = match role {
            ServiceRole::Cart => vec![consumer(
                "cart-product-validation",
                topics::PRODUCT_VALIDATION_RESPONSE,
                Arc::new(CartValidationTerminal::new(
                    Arc::clone(&collaborators.carts),
                    Terminal::new(Arc::clone(&store), ttl),
                )),
            )],
            ServiceRole::Product => vec![
                consumer(
                    "product-validation",
                    topics::PRODUCT_VALIDATION_REQUEST,
                    Arc::new(Delegating::new(
                        ProductValidationResponder::new(Arc::clone(&collaborators.catalog)),
                        publisher.clone(),
                    )),
                ),
                consumer(
                    "product-listing",
                    topics::PRODUCTS_REQUEST,
                    Arc::new(Delegating::new(
                        ProductsResponder::new(Arc::clone(&collaborators.catalog)),
                        publisher.clone(),
                    )),
                ),
                consumer(
                    "product-store-validation",
                    topics::STORE_VALIDATION_RESPONSE,
                    Arc::new(StoreValidationTerminal::new(Arc::clone(&store), ttl)),
                ),
            ],
            ServiceRole::Store => vec![
                consumer(
                    "store-validation",
                    topics::STORE_VALIDATION_REQUEST,
                    Arc::new(Delegating::new(
                        StoreValidationResponder::new(Arc::clone(&collaborators.stores)),
                        publisher.clone(),
                    )),
                ),
                consumer(
                    "store-product-listing",
                    topics::PRODUCTS_RESPONSE,
                    Arc::new(ProductsTerminal::new(Arc::clone(&store), ttl)),
                ),
            ],
            ServiceRole::Notification => vec![consumer(
                "notification",
                topics::NOTIFICATION_REQUEST,
                Arc::new(Delegating::new(
                    NotificationDispatcher::new(Arc::clone(&collaborators.mailer)),
                    publisher.clone(),
                )),
            )],
            ServiceRole::User => Vec::new(),
        };

        Self {
            role,
            producer_breaker,
            consumer_breaker,
            orchestrator,
            collaborators,
            loops,
        }
    }

    /// The role this node runs.
    #[must_use]
    pub const fn role(&self) -> ServiceRole {
        self.role
    }

    /// Orchestrator for outbound calls.
    #[must_use]
    pub const fn orchestrator(&self) -> &RequestReplyOrchestrator {
        &self.orchestrator
    }

    /// Breaker guarding every publish of this node.
    #[must_use]
    pub const fn producer_breaker(&self) -> &CircuitBreaker {
        &self.producer_breaker
    }

    /// Breaker guarding every consumer dispatch of this node.
    #[must_use]
    pub const fn consumer_breaker(&self) -> &CircuitBreaker {
        &self.consumer_breaker
    }

    /// Worst health of the two breakers.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        self.producer_breaker
            .health()
            .worst(self.consumer_breaker.health())
    }

    /// Names of the consumer loops not yet spawned.
    #[must_use]
    pub fn consumers(&self) -> Vec<&str> {
        self.loops.iter().map(ConsumerDispatchLoop::name).collect()
    }

    /// Cart use cases over this node's orchestrator.
    #[must_use]
    pub fn cart_service(&self) -> CartService {
        CartService::new(self.orchestrator.clone(), Arc::clone(&self.collaborators.carts))
    }

    /// Product use cases over this node's orchestrator.
    #[must_use]
    pub fn product_service(&self) -> ProductService {
        ProductService::new(self.orchestrator.clone(), Arc::clone(&self.collaborators.catalog))
    }

    /// Store use cases over this node's orchestrator.
    #[must_use]
    pub fn store_service(&self) -> StoreService {
        StoreService::new(self.orchestrator.clone(), Arc::clone(&self.collaborators.stores))
    }

    /// User use cases over this node's orchestrator.
    #[must_use]
    pub fn user_service(&self) -> UserService {
        UserService::new(self.orchestrator.clone(), Arc::clone(&self.collaborators.users))
    }

    /// Start every consumer loop; each stops when `shutdown` fires.
    ///
    /// A second call starts nothing.
    pub fn spawn(&mut self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        tracing::info!(role = %self.role, consumers = self.loops.len(), "Starting consumers");
        self.loops
            .drain(..)
            .map(|consumer| consumer.spawn(shutdown.subscribe()))
            .collect()
    }
}

impl fmt::Debug for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceNode")
            .field("role", &self.role)
            .field("consumers", &self.consumers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_testing::{InMemoryBroker, InMemoryRendezvousStore};

    fn node(role: ServiceRole) -> ServiceNode {
        ServiceNode::new(
            role,
            &RelayConfig::default(),
            Arc::new(InMemoryBroker::new()),
            Arc::new(InMemoryRendezvousStore::new()),
            Collaborators::in_memory(),
        )
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Cart".parse::<ServiceRole>(), Ok(ServiceRole::Cart));
        assert_eq!(" notification ".parse::<ServiceRole>(), Ok(ServiceRole::Notification));
        assert!("billing".parse::<ServiceRole>().is_err());
        for role in ServiceRole::ALL {
            assert_eq!(role.to_string().parse::<ServiceRole>(), Ok(role));
        }
    }

    #[test]
    fn each_role_consumes_its_topics() {
        assert_eq!(node(ServiceRole::Cart).consumers(), ["cart-product-validation"]);
        assert_eq!(
            node(ServiceRole::Product).consumers(),
            ["product-validation", "product-listing", "product-store-validation"]
        );
        assert_eq!(
            node(ServiceRole::Store).consumers(),
            ["store-validation", "store-product-listing"]
        );
        assert_eq!(node(ServiceRole::Notification).consumers(), ["notification"]);
        assert!(node(ServiceRole::User).consumers().is_empty());
    }

    #[test]
    fn breakers_are_named_after_the_role() {
        let node = node(ServiceRole::Store);
        assert_eq!(node.producer_breaker().name(), "store-producer");
        assert_eq!(node.consumer_breaker().name(), "store-consumer");
        assert_eq!(node.health(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn spawned_loops_stop_on_shutdown() {
        let mut node = node(ServiceRole::Product);
        let (shutdown, _) = broadcast::channel(1);

        let handles = node.spawn(&shutdown);
        assert_eq!(handles.len(), 3);
        assert!(node.consumers().is_empty());

        let _ = shutdown.send(());
        for handle in handles {
            assert!(handle.await.is_ok());
        }
    }
}
