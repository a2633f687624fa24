//! Registry stub that records every call, for tests

use crate::error::RegistryError;
use crate::message::{Event, Message};
use crate::registry::{
    DeliveryMode, ObjectProxy, PeerRef, PublisherHandle, RegistryClient, RemoteHolon, ServerRef,
    SubscriptionHandle, TopicHandle,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A call observed by [`StubRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Subscribe {
        topic: String,
        subscriber: String,
        mode: DeliveryMode,
    },
    Unsubscribe {
        topic: String,
        subscriber: String,
        mode: DeliveryMode,
    },
    GetPublisher {
        topic: String,
        interface: String,
    },
    GetTopic {
        topic: String,
        create: bool,
    },
    DestroyTopic {
        topic: String,
    },
}

/// Registry that resolves only what it is told to and never fails unless
/// told to
#[derive(Debug, Default)]
pub struct StubRegistry {
    calls: Mutex<Vec<RegistryCall>>,
    resolvable: Mutex<HashSet<String>>,
    unsubscribe_failure: Mutex<Option<RegistryError>>,
    resolve_attempts: AtomicUsize,
    event_server: Option<ServerRef>,
    peers: Mutex<HashMap<String, Arc<StubPeer>>>,
}

impl StubRegistry {
    pub fn with_event_server(mut self, server: impl Into<String>) -> Self {
        self.event_server = Some(ServerRef::new(server));
        self
    }

    /// Let `address` resolve from now on
    pub fn make_resolvable(&self, address: impl Into<String>) {
        self.resolvable.lock().insert(address.into());
    }

    /// Fail every unsubscribe with `error` until [`StubRegistry::clear_failures`]
    pub fn fail_unsubscribe(&self, error: RegistryError) {
        *self.unsubscribe_failure.lock() = Some(error);
    }

    pub fn clear_failures(&self) {
        *self.unsubscribe_failure.lock() = None;
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().clone()
    }

    pub fn resolve_attempts(&self) -> usize {
        self.resolve_attempts.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RegistryCall::Unsubscribe { topic: t, .. } if t == topic))
            .count()
    }

    pub fn publisher_count(&self, topic: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RegistryCall::GetPublisher { topic: t, .. } if t == topic))
            .count()
    }

    /// Peer handed out for a resolved address or a publisher's topic
    ///
    /// Resolved holons and topics share one namespace.
    pub fn peer(&self, address: &str) -> Option<Arc<StubPeer>> {
        self.peers.lock().get(address).cloned()
    }

    fn record(&self, call: RegistryCall) {
        self.calls.lock().push(call);
    }

    fn peer_for(&self, address: &str) -> Arc<StubPeer> {
        self.peers
            .lock()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(StubPeer::new(address)))
            .clone()
    }
}

impl RegistryClient for StubRegistry {
    fn resolve_address(&self, address: &str) -> Result<Option<PeerRef>, RegistryError> {
        self.resolve_attempts.fetch_add(1, Ordering::SeqCst);
        if self.resolvable.lock().contains(address) {
            Ok(Some(self.peer_for(address) as PeerRef))
        } else {
            Ok(None)
        }
    }

    fn subscribe(
        &self,
        topic: &str,
        subscriber: &ObjectProxy,
        mode: DeliveryMode,
        server: Option<&ServerRef>,
    ) -> Result<SubscriptionHandle, RegistryError> {
        self.record(RegistryCall::Subscribe {
            topic: topic.to_string(),
            subscriber: subscriber.identity().to_string(),
            mode: subscriber.mode(),
        });
        Ok(SubscriptionHandle::new(topic, server.cloned(), mode))
    }

    fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
        subscriber: &ObjectProxy,
    ) -> Result<(), RegistryError> {
        if let Some(error) = self.unsubscribe_failure.lock().clone() {
            return Err(error);
        }
        self.record(RegistryCall::Unsubscribe {
            topic: handle.topic.clone(),
            subscriber: subscriber.identity().to_string(),
            mode: subscriber.mode(),
        });
        Ok(())
    }

    fn get_publisher(
        &self,
        topic: &str,
        interface: &str,
        _server: Option<&ServerRef>,
    ) -> Result<PublisherHandle, RegistryError> {
        self.record(RegistryCall::GetPublisher {
            topic: topic.to_string(),
            interface: interface.to_string(),
        });
        Ok(self.peer_for(topic) as PublisherHandle)
    }

    fn get_topic(
        &self,
        topic: &str,
        server: Option<&ServerRef>,
        create: bool,
    ) -> Result<Option<TopicHandle>, RegistryError> {
        self.record(RegistryCall::GetTopic {
            topic: topic.to_string(),
            create,
        });
        Ok(Some(TopicHandle {
            name: topic.to_string(),
            server: server.cloned(),
        }))
    }

    fn destroy_topic(&self, topic: &TopicHandle) -> Result<(), RegistryError> {
        self.record(RegistryCall::DestroyTopic {
            topic: topic.name.clone(),
        });
        Ok(())
    }

    fn event_server(&self) -> Option<ServerRef> {
        self.event_server.clone()
    }
}

/// Peer that keeps what it was sent
#[derive(Debug)]
pub struct StubPeer {
    address: String,
    messages: Mutex<Vec<Message>>,
    events: Mutex<Vec<Event>>,
}

impl StubPeer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            messages: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl RemoteHolon for StubPeer {
    fn address(&self) -> &str {
        &self.address
    }

    fn put_message(&self, message: Message) -> Result<(), RegistryError> {
        self.messages.lock().push(message);
        Ok(())
    }

    fn new_event(&self, event: Event) -> Result<(), RegistryError> {
        self.events.lock().push(event);
        Ok(())
    }
}
