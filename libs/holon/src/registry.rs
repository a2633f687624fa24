//! Registry collaborators
//!
//! A holon never talks to the network itself. Address resolution, topic
//! management and agent removal are delegated to the capabilities below,
//! which are injected at registration time. Every call is synchronous and
//! may block for as long as the underlying transport needs.

use crate::error::RegistryError;
use crate::holon::Holon;
use crate::message::{Event, Message};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Interface descriptor of the generic event topic
pub const GENERIC_EVENT_INTERFACE: &str = "::hms::GenericEventInterface";

/// Interface descriptor of a plain holon
pub const HOLON_INTERFACE: &str = "::hms::Holon";

/// How a subscriber wants topic traffic delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Two-way invocations, failures are reported to the publisher
    #[default]
    Reliable,
    /// Datagram delivery, losses are silent
    BestEffort,
}

/// Reference to an object exported through the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectProxy {
    identity: String,
    mode: DeliveryMode,
}

impl ObjectProxy {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            mode: DeliveryMode::Reliable,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Same object, reliable delivery
    pub fn twoway(&self) -> Self {
        self.with_mode(DeliveryMode::Reliable)
    }

    /// Same object, best-effort delivery
    pub fn datagram(&self) -> Self {
        self.with_mode(DeliveryMode::BestEffort)
    }

    pub fn with_mode(&self, mode: DeliveryMode) -> Self {
        Self {
            identity: self.identity.clone(),
            mode,
        }
    }
}

impl fmt::Display for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            DeliveryMode::Reliable => write!(f, "{} -t", self.identity),
            DeliveryMode::BestEffort => write!(f, "{} -d", self.identity),
        }
    }
}

/// Name of a topic-manager server; `None` everywhere means the default one
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerRef(pub String);

impl ServerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle returned by a successful subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub topic: String,
    pub server: Option<ServerRef>,
    pub mode: DeliveryMode,
    pub id: Uuid,
}

impl SubscriptionHandle {
    pub fn new(topic: impl Into<String>, server: Option<ServerRef>, mode: DeliveryMode) -> Self {
        Self {
            topic: topic.into(),
            server,
            mode,
            id: Uuid::new_v4(),
        }
    }
}

/// Handle on a topic as known by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHandle {
    pub name: String,
    pub server: Option<ServerRef>,
}

/// A connectable reference to something that accepts holon calls
///
/// Resolved peers and topic publishers share this interface: publishing to
/// a topic is calling the topic's publisher as if it were a holon.
pub trait RemoteHolon: Send + Sync + fmt::Debug {
    /// Address the reference was obtained for
    fn address(&self) -> &str;

    fn put_message(&self, message: Message) -> Result<(), RegistryError>;

    fn new_event(&self, event: Event) -> Result<(), RegistryError>;
}

/// Reference to a resolved peer holon
pub type PeerRef = Arc<dyn RemoteHolon>;

/// Publisher side of a topic
pub type PublisherHandle = Arc<dyn RemoteHolon>;

/// Registry and transport operations consumed by holons
pub trait RegistryClient: Send + Sync {
    /// Single resolution attempt, never blocks waiting for the peer
    fn resolve_address(&self, address: &str) -> Result<Option<PeerRef>, RegistryError>;

    fn subscribe(
        &self,
        topic: &str,
        subscriber: &ObjectProxy,
        mode: DeliveryMode,
        server: Option<&ServerRef>,
    ) -> Result<SubscriptionHandle, RegistryError>;

    fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
        subscriber: &ObjectProxy,
    ) -> Result<(), RegistryError>;

    /// Get the publisher of a topic, creating the topic if needed
    fn get_publisher(
        &self,
        topic: &str,
        interface: &str,
        server: Option<&ServerRef>,
    ) -> Result<PublisherHandle, RegistryError>;

    fn get_topic(
        &self,
        topic: &str,
        server: Option<&ServerRef>,
        create: bool,
    ) -> Result<Option<TopicHandle>, RegistryError>;

    fn destroy_topic(&self, topic: &TopicHandle) -> Result<(), RegistryError>;

    /// Server hosting generic event topics
    fn event_server(&self) -> Option<ServerRef> {
        None
    }
}

/// Owner of holon registrations
pub trait AgentManager: Send + Sync {
    fn registry(&self) -> Arc<dyn RegistryClient>;

    /// Deregister a holon; implementations are expected to call
    /// [`Holon::stop`] and [`Holon::cleanup`]
    fn remove_agent(&self, holon: &Holon) -> Result<(), RegistryError>;
}
