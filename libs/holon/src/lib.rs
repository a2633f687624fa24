//! Holon Runtime
//!
//! Named, independently addressable agents that exchange asynchronous
//! messages and take part in publish/subscribe topics through an external
//! registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌─────────────────────────┐
//! │            Holon             │      │    Registry client      │
//! │                              │      │  (injected, shared)     │
//! │  ┌────────┐   ┌───────────┐  │      │                         │
//! │  │Mailbox │◀──│put_message│◀─┼──────┼─ transport threads      │
//! │  └───┬────┘   └───────────┘  │      │                         │
//! │      │ pop                   │      │  resolve_address        │
//! │  ┌───▼──────────┐            │      │  subscribe/unsubscribe  │
//! │  │ worker thread│ handler    │──────┼─▶get_publisher          │
//! │  └──────────────┘            │      │  get_topic              │
//! │  topic records ──────────────┼──────┼─▶                       │
//! └──────────────────────────────┘      └─────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust
//! use holon::{Holon, LocalAgentManager, LocalRegistry, Message};
//! use std::sync::Arc;
//!
//! let manager = LocalAgentManager::new(LocalRegistry::new());
//! let holon = Holon::active("printer", |_: &Holon, msg: Arc<Message>| -> holon::Result<()> {
//!     println!("got message: {}", msg);
//!     Ok(())
//! });
//!
//! manager.add_agent(holon.clone()).unwrap();
//! holon.put_message(Message::new("hello"));
//! holon.shutdown();
//! ```

pub mod config;
pub mod error;
pub mod holon;
pub mod local;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod test_utils;
pub mod topics;

pub use config::{HolonConfig, TopicPolicy};
pub use error::{HolonError, RegistryError, Result};
pub use holon::{EventHandler, Holon, HolonBuilder, LifecycleState, MessageHandler, UnhandledEvents};
pub use local::{LocalAgentManager, LocalRegistry};
pub use mailbox::Mailbox;
pub use message::{Event, IntoArgument, Message};
pub use registry::{
    AgentManager, DeliveryMode, ObjectProxy, PeerRef, PublisherHandle, RegistryClient,
    RemoteHolon, ServerRef, SubscriptionHandle, TopicHandle, GENERIC_EVENT_INTERFACE,
    HOLON_INTERFACE,
};
pub use topics::Publication;
