//! In-process registry and agent manager
//!
//! Resolves holons living in the same process and fans topic publications
//! out by direct calls. There is no transport: "reliable" and "best-effort"
//! subscriptions behave the same, except that delivery failures to
//! best-effort subscribers are not logged.

use crate::error::{HolonError, RegistryError, Result};
use crate::holon::Holon;
use crate::message::{Event, Message};
use crate::registry::{
    AgentManager, DeliveryMode, ObjectProxy, PeerRef, PublisherHandle, RegistryClient,
    RemoteHolon, ServerRef, SubscriptionHandle, TopicHandle,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Name of the server hosting generic events
pub const DEFAULT_EVENT_SERVER: &str = "EventServer";

type TopicKey = (Option<ServerRef>, String);

#[derive(Debug, Default)]
struct LocalTopic {
    interface: Option<String>,
    subscribers: Vec<(SubscriptionHandle, ObjectProxy)>,
}

#[derive(Debug, Default)]
struct Inner {
    holons: RwLock<HashMap<String, Weak<Holon>>>,
    topics: RwLock<HashMap<TopicKey, LocalTopic>>,
}

impl Inner {
    fn lookup(&self, name: &str) -> Option<Arc<Holon>> {
        self.holons.read().get(name).and_then(Weak::upgrade)
    }

    /// Deliver to every current subscriber of a topic
    fn fan_out<F>(&self, key: &TopicKey, deliver: F) -> std::result::Result<(), RegistryError>
    where
        F: Fn(&Holon),
    {
        let subscribers: Vec<ObjectProxy> = self
            .topics
            .read()
            .get(key)
            .ok_or_else(|| RegistryError::NoSuchTopic { topic: key.1.clone() })?
            .subscribers
            .iter()
            .map(|(_, proxy)| proxy.clone())
            .collect();

        for subscriber in subscribers {
            match self.lookup(subscriber.identity()) {
                Some(holon) => deliver(holon.as_ref()),
                None if subscriber.mode() == DeliveryMode::Reliable => warn!(
                    topic = %key.1,
                    subscriber = %subscriber.identity(),
                    "Subscriber is gone, dropping delivery"
                ),
                None => {}
            }
        }
        Ok(())
    }
}

/// Registry for holons sharing one process
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    inner: Arc<Inner>,
    event_server: ServerRef,
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            event_server: ServerRef::new(DEFAULT_EVENT_SERVER),
        }
    }

    /// Make a holon resolvable and reachable by its subscriptions
    pub fn register(&self, holon: &Arc<Holon>) {
        debug!(holon = %holon.name(), "Registering holon");
        let mut holons = self.inner.holons.write();
        // holons dropped without deregistering
        holons.retain(|_, weak| weak.strong_count() > 0);
        let previous = holons.insert(holon.name().to_string(), Arc::downgrade(holon));
        if previous.and_then(|weak| weak.upgrade()).is_some() {
            warn!(holon = %holon.name(), "Replaced a live holon with the same name");
        }
    }

    pub fn deregister(&self, name: &str) -> bool {
        debug!(holon = name, "Deregistering holon");
        self.inner.holons.write().remove(name).is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.lookup(name).is_some()
    }

    /// Topics on the given server
    pub fn topic_names(&self, server: Option<&ServerRef>) -> Vec<String> {
        self.inner
            .topics
            .read()
            .keys()
            .filter(|(topic_server, _)| topic_server.as_ref() == server)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn subscriber_count(&self, topic: &str, server: Option<&ServerRef>) -> usize {
        self.inner
            .topics
            .read()
            .get(&(server.cloned(), topic.to_string()))
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    /// Interface descriptor the topic's first publisher asked for
    pub fn topic_interface(&self, topic: &str, server: Option<&ServerRef>) -> Option<String> {
        self.inner
            .topics
            .read()
            .get(&(server.cloned(), topic.to_string()))
            .and_then(|t| t.interface.clone())
    }

    fn ensure_topic(&self, key: &TopicKey, interface: Option<&str>) {
        let mut topics = self.inner.topics.write();
        let topic = topics.entry(key.clone()).or_insert_with(|| {
            debug!(topic = %key.1, "Creating topic");
            LocalTopic::default()
        });
        if topic.interface.is_none() {
            topic.interface = interface.map(str::to_string);
        }
    }
}

impl RegistryClient for LocalRegistry {
    fn resolve_address(&self, address: &str) -> std::result::Result<Option<PeerRef>, RegistryError> {
        Ok(self.inner.lookup(address).map(|holon| {
            Arc::new(LocalPeer {
                address: address.to_string(),
                holon: Arc::downgrade(&holon),
            }) as PeerRef
        }))
    }

    fn subscribe(
        &self,
        topic: &str,
        subscriber: &ObjectProxy,
        mode: DeliveryMode,
        server: Option<&ServerRef>,
    ) -> std::result::Result<SubscriptionHandle, RegistryError> {
        let key = (server.cloned(), topic.to_string());
        self.ensure_topic(&key, None);

        let mut topics = self.inner.topics.write();
        let entry = topics
            .get_mut(&key)
            .ok_or_else(|| RegistryError::NoSuchTopic { topic: topic.to_string() })?;

        if entry
            .subscribers
            .iter()
            .any(|(_, proxy)| proxy.identity() == subscriber.identity())
        {
            return Err(RegistryError::AlreadySubscribed {
                topic: topic.to_string(),
                subscriber: subscriber.identity().to_string(),
            });
        }

        let handle = SubscriptionHandle::new(topic, server.cloned(), mode);
        entry.subscribers.push((handle.clone(), subscriber.with_mode(mode)));
        Ok(handle)
    }

    fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
        subscriber: &ObjectProxy,
    ) -> std::result::Result<(), RegistryError> {
        let key = (handle.server.clone(), handle.topic.clone());
        let mut topics = self.inner.topics.write();
        let entry = topics.get_mut(&key).ok_or_else(|| RegistryError::NoSuchTopic {
            topic: handle.topic.clone(),
        })?;

        let before = entry.subscribers.len();
        entry.subscribers.retain(|(existing, _)| existing.id != handle.id);
        if entry.subscribers.len() == before {
            return Err(RegistryError::NotSubscribed {
                topic: handle.topic.clone(),
                subscriber: subscriber.identity().to_string(),
            });
        }
        Ok(())
    }

    fn get_publisher(
        &self,
        topic: &str,
        interface: &str,
        server: Option<&ServerRef>,
    ) -> std::result::Result<PublisherHandle, RegistryError> {
        let key = (server.cloned(), topic.to_string());
        self.ensure_topic(&key, Some(interface));

        Ok(Arc::new(LocalPublisher {
            key,
            registry: Arc::downgrade(&self.inner),
        }))
    }

    fn get_topic(
        &self,
        topic: &str,
        server: Option<&ServerRef>,
        create: bool,
    ) -> std::result::Result<Option<TopicHandle>, RegistryError> {
        let key = (server.cloned(), topic.to_string());
        if create {
            self.ensure_topic(&key, None);
        } else if !self.inner.topics.read().contains_key(&key) {
            return Ok(None);
        }
        Ok(Some(TopicHandle {
            name: topic.to_string(),
            server: server.cloned(),
        }))
    }

    fn destroy_topic(&self, topic: &TopicHandle) -> std::result::Result<(), RegistryError> {
        let key = (topic.server.clone(), topic.name.clone());
        self.inner
            .topics
            .write()
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NoSuchTopic {
                topic: topic.name.clone(),
            })
    }

    fn event_server(&self) -> Option<ServerRef> {
        Some(self.event_server.clone())
    }
}

/// Resolved reference to a holon of this process
#[derive(Debug)]
struct LocalPeer {
    address: String,
    holon: Weak<Holon>,
}

impl LocalPeer {
    fn target(&self) -> std::result::Result<Arc<Holon>, RegistryError> {
        self.holon
            .upgrade()
            .ok_or_else(|| RegistryError::unreachable(format!("holon '{}' is gone", self.address)))
    }
}

impl RemoteHolon for LocalPeer {
    fn address(&self) -> &str {
        &self.address
    }

    fn put_message(&self, message: Message) -> std::result::Result<(), RegistryError> {
        self.target()?.put_message(message);
        Ok(())
    }

    fn new_event(&self, event: Event) -> std::result::Result<(), RegistryError> {
        self.target()?.new_event(event);
        Ok(())
    }
}

/// Publisher side of a local topic
#[derive(Debug)]
struct LocalPublisher {
    key: TopicKey,
    registry: Weak<Inner>,
}

impl LocalPublisher {
    fn registry(&self) -> std::result::Result<Arc<Inner>, RegistryError> {
        self.registry
            .upgrade()
            .ok_or_else(|| RegistryError::unreachable("local registry dropped"))
    }
}

impl RemoteHolon for LocalPublisher {
    fn address(&self) -> &str {
        &self.key.1
    }

    fn put_message(&self, message: Message) -> std::result::Result<(), RegistryError> {
        self.registry()?
            .fan_out(&self.key, |holon| holon.put_message(message.clone()))
    }

    fn new_event(&self, event: Event) -> std::result::Result<(), RegistryError> {
        self.registry()?
            .fan_out(&self.key, |holon| holon.new_event(event.clone()))
    }
}

/// Agent manager for holons of this process
pub struct LocalAgentManager {
    registry: LocalRegistry,
    agents: RwLock<HashMap<String, Arc<Holon>>>,
}

impl LocalAgentManager {
    pub fn new(registry: LocalRegistry) -> Arc<Self> {
        Arc::new(Self {
            registry,
            agents: RwLock::new(HashMap::new()),
        })
    }

    pub fn local_registry(&self) -> &LocalRegistry {
        &self.registry
    }

    /// Register and start a holon
    pub fn add_agent(self: &Arc<Self>, holon: Arc<Holon>) -> Result<()> {
        let manager: Arc<dyn AgentManager> = Arc::clone(self) as Arc<dyn AgentManager>;
        holon.set_agent_manager(&manager)?;
        self.registry.register(&holon);
        self.agents
            .write()
            .insert(holon.name().to_string(), Arc::clone(&holon));

        info!(holon = %holon.name(), "Agent added");
        holon.start()
    }

    pub fn agent(&self, name: &str) -> Option<Arc<Holon>> {
        self.agents.read().get(name).cloned()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    /// Remove every agent, logging failures
    pub fn shutdown_all(&self) {
        let agents: Vec<Arc<Holon>> = self.agents.read().values().cloned().collect();
        for holon in agents {
            if let Err(e) = self.remove_agent(&holon) {
                warn!(holon = %holon.name(), error = %e, "Failed to remove agent");
            }
        }
    }
}

impl AgentManager for LocalAgentManager {
    fn registry(&self) -> Arc<dyn RegistryClient> {
        Arc::new(self.registry.clone())
    }

    fn remove_agent(&self, holon: &Holon) -> std::result::Result<(), RegistryError> {
        info!(holon = %holon.name(), "Removing agent");

        holon.stop();
        // the handler may still touch topics until the worker is gone
        if let Err(e) = holon.join() {
            warn!(holon = %holon.name(), error = %e, "Worker did not exit cleanly");
        }
        let cleanup = holon.cleanup();

        self.registry.deregister(holon.name());
        self.agents.write().remove(holon.name());

        cleanup.map_err(|e| match e {
            HolonError::Registry(inner) => inner,
            other => RegistryError::transport(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HOLON_INTERFACE;

    #[test]
    fn test_resolve_registered_holon() {
        let registry = LocalRegistry::new();
        let holon = Holon::light("target");
        registry.register(&holon);

        let peer = registry.resolve_address("target").unwrap().unwrap();
        peer.put_message(Message::new("hi")).unwrap();

        assert_eq!(holon.mailbox().pop().unwrap().body(), "hi");
        assert!(registry.resolve_address("missing").unwrap().is_none());
    }

    #[test]
    fn test_dropped_holon_does_not_resolve() {
        let registry = LocalRegistry::new();
        let holon = Holon::light("ephemeral");
        registry.register(&holon);
        drop(holon);

        assert!(registry.resolve_address("ephemeral").unwrap().is_none());
    }

    #[test]
    fn test_register_prunes_dropped_holons() {
        let registry = LocalRegistry::new();
        for i in 0..3 {
            registry.register(&Holon::light(format!("temp-{}", i)));
        }
        let keeper = Holon::light("keeper");
        registry.register(&keeper);

        let names: Vec<String> = registry.inner.holons.read().keys().cloned().collect();
        assert_eq!(names, vec!["keeper".to_string()]);
        assert!(registry.is_registered("keeper"));
    }

    #[test]
    fn test_double_subscribe_rejected() {
        let registry = LocalRegistry::new();
        let proxy = ObjectProxy::new("h");

        registry.subscribe("A", &proxy, DeliveryMode::Reliable, None).unwrap();
        let err = registry
            .subscribe("A", &proxy, DeliveryMode::Reliable, None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadySubscribed { .. }));
    }

    #[test]
    fn test_unsubscribe_twice_fails() {
        let registry = LocalRegistry::new();
        let proxy = ObjectProxy::new("h");
        let handle = registry.subscribe("A", &proxy, DeliveryMode::Reliable, None).unwrap();

        registry.unsubscribe(&handle, &proxy).unwrap();
        assert_eq!(registry.subscriber_count("A", None), 0);
        assert!(matches!(
            registry.unsubscribe(&handle, &proxy),
            Err(RegistryError::NotSubscribed { .. })
        ));
    }

    #[test]
    fn test_get_topic_without_create() {
        let registry = LocalRegistry::new();
        assert!(registry.get_topic("ghost", None, false).unwrap().is_none());

        let topic = registry.get_topic("ghost", None, true).unwrap().unwrap();
        assert_eq!(topic.name, "ghost");
        assert!(registry.get_topic("ghost", None, false).unwrap().is_some());

        registry.destroy_topic(&topic).unwrap();
        assert!(registry.get_topic("ghost", None, false).unwrap().is_none());
    }

    #[test]
    fn test_publisher_fans_out() {
        let registry = LocalRegistry::new();
        let a = Holon::light("a");
        let b = Holon::light("b");
        registry.register(&a);
        registry.register(&b);

        registry.subscribe("news", a.proxy(), DeliveryMode::Reliable, None).unwrap();
        registry.subscribe("news", b.proxy(), DeliveryMode::BestEffort, None).unwrap();

        let publisher = registry.get_publisher("news", HOLON_INTERFACE, None).unwrap();
        publisher.put_message(Message::new("extra")).unwrap();
        assert_eq!(
            registry.topic_interface("news", None).as_deref(),
            Some(HOLON_INTERFACE)
        );

        assert_eq!(a.mailbox().pop().unwrap().body(), "extra");
        assert_eq!(b.mailbox().pop().unwrap().body(), "extra");
    }

    #[test]
    fn test_topics_are_scoped_by_server() {
        let registry = LocalRegistry::new();
        let events = registry.event_server();

        registry.get_topic("alarms", events.as_ref(), true).unwrap();
        assert!(registry.get_topic("alarms", None, false).unwrap().is_none());
        assert_eq!(registry.topic_names(events.as_ref()), vec!["alarms".to_string()]);
    }

    #[test]
    fn test_agent_manager_roundtrip() {
        let manager = LocalAgentManager::new(LocalRegistry::new());
        let holon = Holon::light("managed");

        manager.add_agent(holon.clone()).unwrap();
        assert!(manager.local_registry().is_registered("managed"));
        assert_eq!(manager.agent_names(), vec!["managed".to_string()]);

        holon.subscribe_topic("A", DeliveryMode::Reliable).unwrap();
        holon.shutdown();

        assert!(manager.agent("managed").is_none());
        assert!(!manager.local_registry().is_registered("managed"));
        assert!(holon.subscribed_topics().is_empty());
        assert_eq!(manager.local_registry().subscriber_count("A", None), 0);
    }
}
