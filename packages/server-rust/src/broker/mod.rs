//! In-memory broker: subscription registry, publish fan-out, and the
//! authorization hook consulted for client operations.

pub mod auth;
pub mod engine;
pub mod registry;

pub use auth::{AllowAll, Denied, DestinationAuthorizer, PublishAllowList};
pub use engine::{Broker, BrokerError, PublishReport};
pub use registry::{RegistryError, Subscription, SubscriptionRegistry};
