//! Topic broadcasting: connections, broadcasters, the registry, whitelist,
//! subscription binding, and event fan-out.

pub mod binder;
pub mod broadcaster;
pub mod cache;
pub mod connection;
pub mod publisher;
pub mod registry;
pub mod whitelist;

pub use binder::{Binding, ResumePolicy, SubscriptionBinder};
pub use broadcaster::Broadcaster;
pub use cache::{BroadcasterCache, CACHE_HEADER, CacheFactory, CachePolicy, HeaderReplayCache, NoopCache};
pub use connection::{ClientConnection, OutboundFrame, TRANSPORT_HEADER, TransportKind};
pub use publisher::{EventBroadcaster, TopicBinding};
pub use registry::TopicRegistry;
pub use whitelist::{WhitelistEntry, WhitelistIndex};
