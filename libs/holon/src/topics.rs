//! Topic bookkeeping
//!
//! Subscriptions and publications a holon made through its registry, and
//! the cleanup pass that undoes them when the holon leaves.

use crate::error::{HolonError, Result};
use crate::holon::Holon;
use crate::registry::{
    DeliveryMode, PublisherHandle, ServerRef, SubscriptionHandle, GENERIC_EVENT_INTERFACE,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A topic this holon publishes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub server: Option<ServerRef>,

    /// Permanent topics are left alone on cleanup
    pub permanent: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TopicBook {
    subscriptions: Mutex<HashMap<String, SubscriptionHandle>>,
    publications: Mutex<HashMap<String, Publication>>,
}

impl Holon {
    /// Subscribe to a topic on the default server
    pub fn subscribe_topic(&self, topic: &str, mode: DeliveryMode) -> Result<SubscriptionHandle> {
        self.subscribe_topic_on(topic, mode, None)
    }

    /// Subscribe to a topic
    ///
    /// Subscribing twice to the same name replaces the recorded handle; the
    /// earlier subscription is not undone.
    pub fn subscribe_topic_on(
        &self,
        topic: &str,
        mode: DeliveryMode,
        server: Option<&ServerRef>,
    ) -> Result<SubscriptionHandle> {
        let registry = self.require_registry()?;
        let subscriber = self.proxy().with_mode(mode);

        let handle = registry.subscribe(topic, &subscriber, mode, server)?;

        let previous = self
            .topics
            .subscriptions
            .lock()
            .insert(topic.to_string(), handle.clone());
        if previous.is_some() {
            warn!(holon = %self.name(), topic, "Replacing existing subscription record");
        }

        debug!(holon = %self.name(), topic, ?mode, "Subscribed");
        Ok(handle)
    }

    /// Reliable subscription on the registry's event server
    pub fn subscribe_event(&self, topic: &str) -> Result<SubscriptionHandle> {
        let server = self.require_registry()?.event_server();
        self.subscribe_topic_on(topic, DeliveryMode::Reliable, server.as_ref())
    }

    /// Get a publisher for `topic`, creating the topic if needed
    ///
    /// Non-permanent topics are looked up again when the holon cleans up.
    pub fn get_publisher(
        &self,
        topic: &str,
        interface: &str,
        permanent: bool,
        server: Option<ServerRef>,
    ) -> Result<PublisherHandle> {
        let registry = self.require_registry()?;
        let publisher = registry.get_publisher(topic, interface, server.as_ref())?;

        self.topics
            .publications
            .lock()
            .insert(topic.to_string(), Publication { server, permanent });

        debug!(holon = %self.name(), topic, interface, permanent, "Got publisher");
        Ok(publisher)
    }

    /// Permanent publisher for the generic event interface
    pub fn get_event_publisher(&self, topic: &str) -> Result<PublisherHandle> {
        let server = self.require_registry()?.event_server();
        self.get_publisher(topic, GENERIC_EVENT_INTERFACE, true, server)
    }

    /// Undo a subscription
    ///
    /// Unknown names are an error. A registry failure puts the record back
    /// unless the topic was subscribed again in the meantime.
    pub fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        let handle = self
            .topics
            .subscriptions
            .lock()
            .remove(topic)
            .ok_or_else(|| HolonError::TopicNotFound {
                holon: self.name().to_string(),
                topic: topic.to_string(),
            })?;

        let registry = match self.require_registry() {
            Ok(registry) => registry,
            Err(e) => {
                self.restore_subscription(topic, handle);
                return Err(e);
            }
        };

        let subscriber = self.proxy().with_mode(handle.mode);
        if let Err(e) = registry.unsubscribe(&handle, &subscriber) {
            self.restore_subscription(topic, handle);
            return Err(e.into());
        }

        debug!(holon = %self.name(), topic, "Unsubscribed");
        Ok(())
    }

    fn restore_subscription(&self, topic: &str, handle: SubscriptionHandle) {
        self.topics
            .subscriptions
            .lock()
            .entry(topic.to_string())
            .or_insert(handle);
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.topics.subscriptions.lock().keys().cloned().collect()
    }

    pub fn subscription(&self, topic: &str) -> Option<SubscriptionHandle> {
        self.topics.subscriptions.lock().get(topic).cloned()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.topics.publications.lock().keys().cloned().collect()
    }

    pub fn publication(&self, topic: &str) -> Option<Publication> {
        self.topics.publications.lock().get(topic).cloned()
    }

    /// Remove this holon's traces from the registry
    ///
    /// Called by the agent manager on removal. Every subscription is undone
    /// and unsubscribe failures propagate. Non-permanent publications are
    /// looked up and only destroyed when
    /// [`TopicPolicy::destroy_transient_on_cleanup`](crate::config::TopicPolicy)
    /// is set.
    pub fn cleanup(&self) -> Result<()> {
        for topic in self.subscribed_topics() {
            match self.unsubscribe_topic(&topic) {
                // unsubscribed concurrently since the snapshot
                Err(HolonError::TopicNotFound { .. }) => continue,
                other => other?,
            }
        }

        let transient: Vec<(String, Publication)> = self
            .topics
            .publications
            .lock()
            .iter()
            .filter(|(_, publication)| !publication.permanent)
            .map(|(name, publication)| (name.clone(), publication.clone()))
            .collect();

        if !transient.is_empty() {
            let registry = self.require_registry()?;
            for (name, publication) in transient {
                let Some(topic) = registry.get_topic(&name, publication.server.as_ref(), false)?
                else {
                    continue;
                };

                if self.config.topics.destroy_transient_on_cleanup {
                    registry.destroy_topic(&topic)?;
                    info!(holon = %self.name(), topic = %name, "Destroyed topic");
                } else {
                    info!(
                        holon = %self.name(),
                        topic = %name,
                        "Topic destroying disabled since it can confuse clients"
                    );
                }
            }
        }

        self.mark_stopped();
        Ok(())
    }
}
