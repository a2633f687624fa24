//! Holon Core
//!
//! A holon is a named agent with a mailbox. It is composed from:
//! - an injected [`RegistryClient`] (directly or through an [`AgentManager`])
//! - an optional [`MessageHandler`]; holons with one are *active* and get a
//!   dedicated worker thread that drains the mailbox
//! - an [`EventHandler`] for generic events delivered by the registry
//!
//! # Lifecycle
//!
//! ```text
//! Created ──set_agent_manager / set_registry──▶ Registered ──start──▶ Running
//!                                                                      │
//!                         Stopped ◀──cleanup── Stopping ◀────stop──────┘
//! ```
//!
//! `stop` only cancels the stop token. The worker loop and [`Holon::resolve`]
//! observe it at every iteration boundary; a call blocked inside the
//! registry is not interrupted.
//!
//! # Threads
//!
//! Transport threads call [`Holon::put_message`] and [`Holon::new_event`]
//! concurrently with the worker. The mailbox and the topic records each have
//! their own lock and no lock is held across a registry call.

use crate::config::HolonConfig;
use crate::error::{HolonError, Result};
use crate::mailbox::Mailbox;
use crate::message::{Event, Message};
use crate::registry::{AgentManager, ObjectProxy, PeerRef, RegistryClient, HOLON_INTERFACE};
use crate::topics::TopicBook;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Lifecycle state of a holon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Registered,
    Running,
    Stopping,
    Stopped,
}

/// Per-message behavior of an active holon
///
/// Runs on the holon's worker thread only, hence `&mut self`.
pub trait MessageHandler: Send + 'static {
    fn handle(&mut self, holon: &Holon, message: Arc<Message>) -> Result<()>;

    /// Called on the worker thread before the first message
    fn on_start(&mut self, _holon: &Holon) -> Result<()> {
        Ok(())
    }

    /// Called on the worker thread after the loop observed stop
    fn on_stop(&mut self, _holon: &Holon) -> Result<()> {
        Ok(())
    }
}

impl<F> MessageHandler for F
where
    F: FnMut(&Holon, Arc<Message>) -> Result<()> + Send + 'static,
{
    fn handle(&mut self, holon: &Holon, message: Arc<Message>) -> Result<()> {
        self(holon, message)
    }
}

/// Receiver of generic events
///
/// Called on whatever thread delivered the event.
pub trait EventHandler: Send + Sync {
    fn new_event(&self, holon: &Holon, event: Event);
}

/// Default event handler: events are logged and dropped
#[derive(Debug, Default)]
pub struct UnhandledEvents;

impl EventHandler for UnhandledEvents {
    fn new_event(&self, holon: &Holon, event: Event) {
        warn!(
            holon = %holon.name(),
            event = %event.name,
            "Holon registered to topic, but has no event handler"
        );
    }
}

/// Builder for [`Holon`]
pub struct HolonBuilder {
    name: Option<String>,
    type_tag: String,
    config: HolonConfig,
    handler: Option<Box<dyn MessageHandler>>,
    event_handler: Arc<dyn EventHandler>,
}

impl Default for HolonBuilder {
    fn default() -> Self {
        Self {
            name: None,
            type_tag: HOLON_INTERFACE.to_string(),
            config: HolonConfig::default(),
            handler: None,
            event_handler: Arc::new(UnhandledEvents),
        }
    }
}

impl HolonBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn type_tag(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = type_tag.into();
        self
    }

    pub fn config(mut self, config: HolonConfig) -> Self {
        self.config = config;
        self
    }

    /// Make the holon active
    pub fn handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn event_handler(mut self, event_handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    pub fn build(self) -> Arc<Holon> {
        let name = match self.name {
            Some(name) if !name.is_empty() => name,
            _ => generate_name(&self.type_tag),
        };
        let active = self.handler.is_some();

        debug!(holon = %name, type_tag = %self.type_tag, active, "Creating holon");

        Arc::new(Holon {
            proxy: ObjectProxy::new(name.clone()),
            name,
            type_tag: self.type_tag,
            config: self.config,
            active,
            state: Mutex::new(LifecycleState::Created),
            registry: RwLock::new(None),
            agent_manager: RwLock::new(None),
            stop_token: CancellationToken::new(),
            mailbox: Mailbox::new(),
            topics: TopicBook::default(),
            handler: Mutex::new(self.handler),
            event_handler: self.event_handler,
            worker: Mutex::new(None),
        })
    }
}

/// `<last segment of type tag>_<uuid>`
fn generate_name(type_tag: &str) -> String {
    let prefix = type_tag
        .rsplit("::")
        .find(|segment| !segment.is_empty())
        .unwrap_or("Holon");
    format!("{}_{}", prefix, Uuid::new_v4())
}

pub struct Holon {
    name: String,
    type_tag: String,
    proxy: ObjectProxy,
    pub(crate) config: HolonConfig,
    active: bool,
    state: Mutex<LifecycleState>,
    registry: RwLock<Option<Arc<dyn RegistryClient>>>,
    agent_manager: RwLock<Option<Weak<dyn AgentManager>>>,
    stop_token: CancellationToken,
    mailbox: Mailbox,
    pub(crate) topics: TopicBook,
    handler: Mutex<Option<Box<dyn MessageHandler>>>,
    event_handler: Arc<dyn EventHandler>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Holon {
    pub fn builder() -> HolonBuilder {
        HolonBuilder::default()
    }

    /// Holon without a worker thread
    pub fn light(name: impl Into<String>) -> Arc<Self> {
        Self::builder().name(name).build()
    }

    /// Holon whose worker feeds every message to `handler`
    pub fn active(name: impl Into<String>, handler: impl MessageHandler) -> Arc<Self> {
        Self::builder().name(name).handler(handler).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Reference the registry delivers to
    pub fn proxy(&self) -> &ObjectProxy {
        &self.proxy
    }

    pub fn config(&self) -> &HolonConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn registry(&self) -> Option<Arc<dyn RegistryClient>> {
        self.registry.read().clone()
    }

    pub(crate) fn require_registry(&self) -> Result<Arc<dyn RegistryClient>> {
        self.registry().ok_or_else(|| HolonError::NotRegistered {
            holon: self.name.clone(),
        })
    }

    pub fn agent_manager(&self) -> Option<Arc<dyn AgentManager>> {
        self.agent_manager.read().as_ref().and_then(Weak::upgrade)
    }

    /// Token cancelled by [`Holon::stop`]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    fn transition(&self, allowed: &[LifecycleState], to: LifecycleState) -> Result<LifecycleState> {
        let mut state = self.state.lock();
        if !allowed.contains(&*state) {
            return Err(HolonError::InvalidTransition {
                holon: self.name.clone(),
                from: *state,
                to,
            });
        }
        let from = std::mem::replace(&mut *state, to);
        debug!(holon = %self.name, ?from, ?to, "Lifecycle transition");
        Ok(from)
    }

    /// Attach to an agent manager and, through it, to its registry
    pub fn set_agent_manager(&self, manager: &Arc<dyn AgentManager>) -> Result<()> {
        self.transition(
            &[LifecycleState::Created, LifecycleState::Registered],
            LifecycleState::Registered,
        )?;
        *self.registry.write() = Some(manager.registry());
        *self.agent_manager.write() = Some(Arc::downgrade(manager));
        Ok(())
    }

    /// Attach to a registry without an agent manager
    pub fn set_registry(&self, registry: Arc<dyn RegistryClient>) -> Result<()> {
        self.transition(
            &[LifecycleState::Created, LifecycleState::Registered],
            LifecycleState::Registered,
        )?;
        *self.registry.write() = Some(registry);
        Ok(())
    }

    /// Start the holon; active holons spawn their worker thread
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if *state != LifecycleState::Registered {
            return Err(HolonError::InvalidTransition {
                holon: self.name.clone(),
                from: *state,
                to: LifecycleState::Running,
            });
        }

        info!(holon = %self.name, active = self.active, "Starting");

        if self.active {
            let handler = self
                .handler
                .lock()
                .take()
                .ok_or_else(|| HolonError::HandlerMissing {
                    holon: self.name.clone(),
                })?;

            let mut builder = thread::Builder::new().name(format!("holon-{}", self.name));
            if let Some(stack_size) = self.config.worker_stack_size {
                builder = builder.stack_size(stack_size);
            }

            let holon = Arc::clone(self);
            let worker = builder
                .spawn(move || holon.run_worker(handler))
                .map_err(|source| HolonError::WorkerSpawn {
                    holon: self.name.clone(),
                    source,
                })?;
            *self.worker.lock() = Some(worker);
        }

        *state = LifecycleState::Running;
        Ok(())
    }

    fn run_worker(self: Arc<Self>, mut handler: Box<dyn MessageHandler>) {
        let span = info_span!("holon", name = %self.name);
        let _enter = span.enter();

        if let Err(e) = handler.on_start(&self) {
            error!(error = %e, "Message handler failed to start");
        }

        let idle = self.config.idle_interval();
        let mut handled: u64 = 0;

        'outer: while !self.stop_token.is_cancelled() {
            while let Some(message) = self.mailbox.pop() {
                if let Err(e) = handler.handle(&self, message) {
                    warn!(error = %e, "Message handler failed");
                }
                handled += 1;
                if self.stop_token.is_cancelled() {
                    break 'outer;
                }
            }
            thread::sleep(idle);
        }

        if let Err(e) = handler.on_stop(&self) {
            error!(error = %e, "Message handler failed to stop cleanly");
        }

        info!(
            messages_handled = handled,
            messages_left = self.mailbox.len(),
            "Worker exited"
        );
    }

    /// Request the worker and any resolution loop to finish
    pub fn stop(&self) {
        info!(holon = %self.name, "stop called");
        self.stop_token.cancel();

        let mut state = self.state.lock();
        if *state != LifecycleState::Stopped {
            *state = LifecycleState::Stopping;
        }
    }

    /// Wait for the worker thread to exit
    ///
    /// Returns immediately for light holons, for holons already joined and
    /// when called from the worker itself.
    pub fn join(&self) -> Result<()> {
        let worker = {
            let mut slot = self.worker.lock();
            match slot.as_ref() {
                Some(handle) if handle.thread().id() == thread::current().id() => return Ok(()),
                Some(_) => slot.take(),
                None => None,
            }
        };

        match worker {
            Some(handle) => handle.join().map_err(|_| HolonError::WorkerPanicked {
                holon: self.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Ask the agent manager to remove this holon
    ///
    /// Without an agent manager the holon stops, waits for its worker and
    /// cleans up on its own.
    /// Failures are logged and never abort the attempt.
    pub fn shutdown(&self) {
        match self.agent_manager() {
            Some(manager) => {
                if let Err(e) = manager.remove_agent(self) {
                    warn!(holon = %self.name, error = %e, "Agent manager failed to remove holon");
                }
            }
            None => {
                self.stop();
                if let Err(e) = self.join() {
                    warn!(holon = %self.name, error = %e, "Worker did not exit cleanly");
                }
                if let Err(e) = self.cleanup() {
                    warn!(holon = %self.name, error = %e, "Cleanup failed during shutdown");
                }
            }
        }
    }

    pub(crate) fn mark_stopped(&self) {
        *self.state.lock() = LifecycleState::Stopped;
    }

    /// Block until `address` resolves or stop is requested
    ///
    /// Returns `Ok(None)` once the stop token is cancelled. Registry errors
    /// on a single attempt are logged and polling continues.
    pub fn resolve(&self, address: &str) -> Result<Option<PeerRef>> {
        let registry = self.require_registry()?;
        let interval = self.config.resolve_poll_interval();

        info!(holon = %self.name, address, "Trying to connect");

        loop {
            if self.stop_token.is_cancelled() {
                debug!(holon = %self.name, address, "Resolution cancelled");
                return Ok(None);
            }

            match registry.resolve_address(address) {
                Ok(Some(peer)) => {
                    info!(holon = %self.name, address, "Got connection");
                    return Ok(Some(peer));
                }
                Ok(None) => {}
                Err(e) => debug!(holon = %self.name, address, error = %e, "Resolution attempt failed"),
            }

            thread::sleep(interval);
        }
    }

    /// Inbound message from another holon or a topic
    pub fn put_message(&self, message: Message) {
        debug!(holon = %self.name, body = %message.body(), "Received message");
        self.mailbox.append(message);
    }

    /// Inbound generic event
    pub fn new_event(&self, event: Event) {
        self.event_handler.new_event(self, event);
    }

    /// One line per queued message: `<creation time> receiving <body>`
    pub fn mailbox_report(&self) -> Vec<String> {
        self.mailbox
            .copy()
            .iter()
            .map(|msg| format!("{} receiving {}", msg.creation_time(), msg.body()))
            .collect()
    }
}

impl fmt::Display for Holon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Holon: {}] ", self.name)
    }
}

impl fmt::Debug for Holon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Holon")
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("active", &self.active)
            .field("state", &self.state())
            .field("mailbox_len", &self.mailbox.len())
            .finish()
    }
}
