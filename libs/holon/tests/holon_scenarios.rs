//! End-to-end holon scenarios against the in-process registry and stubs

use holon::test_utils::StubRegistry;
use holon::{
    AgentManager, DeliveryMode, Event, EventHandler, Holon, HolonConfig, HolonError,
    LifecycleState, LocalAgentManager, LocalRegistry, Message, MessageHandler, RegistryClient,
    RegistryError, HOLON_INTERFACE,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_config() -> HolonConfig {
    HolonConfig {
        resolve_poll_interval_ms: 25,
        idle_interval_ms: 10,
        ..HolonConfig::default()
    }
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Records every message body and lifecycle hook
#[derive(Clone, Default)]
struct Recorder {
    bodies: Arc<Mutex<Vec<String>>>,
    started: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl MessageHandler for Recorder {
    fn handle(&mut self, _holon: &Holon, message: Arc<Message>) -> holon::Result<()> {
        self.bodies.lock().push(message.body().to_string());
        Ok(())
    }

    fn on_start(&mut self, _holon: &Holon) -> holon::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_stop(&mut self, _holon: &Holon) -> holon::Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_topic_message_reaches_handler_once() {
    let manager = LocalAgentManager::new(LocalRegistry::new());
    let recorder = Recorder::default();
    let subscriber = Holon::builder()
        .name("subscriber")
        .config(fast_config())
        .handler(recorder.clone())
        .build();
    let publisher = Holon::light("publisher");

    manager.add_agent(subscriber.clone()).unwrap();
    manager.add_agent(publisher.clone()).unwrap();

    subscriber
        .subscribe_topic("events", DeliveryMode::Reliable)
        .unwrap();
    let topic = publisher
        .get_publisher("events", HOLON_INTERFACE, false, None)
        .unwrap();
    topic.put_message(Message::new("state-changed")).unwrap();

    let idle = subscriber.config().idle_interval();
    assert!(wait_until(idle * 20, || !recorder.bodies.lock().is_empty()));

    // give the worker a few more drains to prove there is no second delivery
    thread::sleep(idle * 3);
    assert_eq!(*recorder.bodies.lock(), vec!["state-changed".to_string()]);

    manager.shutdown_all();
    assert_eq!(recorder.started.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(subscriber.state(), LifecycleState::Stopped);
}

#[test]
fn test_concurrent_senders_lose_nothing() {
    const SENDERS: usize = 6;
    const PER_SENDER: usize = 200;

    let registry = LocalRegistry::new();
    let recorder = Recorder::default();
    let holon = Holon::builder()
        .name("sink")
        .config(fast_config())
        .handler(recorder.clone())
        .build();
    registry.register(&holon);
    holon.set_registry(Arc::new(registry.clone())).unwrap();
    holon.start().unwrap();

    let senders: Vec<_> = (0..SENDERS)
        .map(|s| {
            let registry = registry.clone();
            thread::spawn(move || {
                let peer = registry.resolve_address("sink").unwrap().unwrap();
                for i in 0..PER_SENDER {
                    peer.put_message(Message::new(format!("{}:{}", s, i))).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        recorder.bodies.lock().len() == SENDERS * PER_SENDER
    }));
    holon.stop();
    holon.join().unwrap();

    let bodies = recorder.bodies.lock();
    let unique: std::collections::HashSet<_> = bodies.iter().collect();
    assert_eq!(unique.len(), SENDERS * PER_SENDER);

    // each sender's messages keep their relative order
    for s in 0..SENDERS {
        let prefix = format!("{}:", s);
        let order: Vec<usize> = bodies
            .iter()
            .filter_map(|b| b.strip_prefix(&prefix))
            .map(|i| i.parse().unwrap())
            .collect();
        assert_eq!(order, (0..PER_SENDER).collect::<Vec<_>>());
    }
}

#[test]
fn test_stop_cancels_blocked_resolution() {
    let registry = Arc::new(StubRegistry::default());
    let holon = Holon::builder().name("seeker").config(fast_config()).build();
    holon.set_registry(registry.clone()).unwrap();

    let seeker = holon.clone();
    let resolver = thread::spawn(move || seeker.resolve("never-there"));

    assert!(wait_until(Duration::from_secs(1), || registry.resolve_attempts() >= 2));
    let stopped_at = Instant::now();
    holon.stop();

    let outcome = resolver.join().unwrap().unwrap();
    let interval = holon.config().resolve_poll_interval();

    assert!(outcome.is_none());
    assert!(
        stopped_at.elapsed() <= interval + Duration::from_millis(50),
        "resolution took {:?} after stop",
        stopped_at.elapsed()
    );
}

#[test]
fn test_resolution_waits_for_late_peer() {
    let registry = LocalRegistry::new();
    let seeker = Holon::builder().name("seeker").config(fast_config()).build();
    seeker.set_registry(Arc::new(registry.clone())).unwrap();

    let late = Holon::light("late");
    let late_registry = registry.clone();
    let late_holon = late.clone();
    let joiner = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        late_registry.register(&late_holon);
    });

    let peer = seeker.resolve("late").unwrap().expect("peer should resolve");
    joiner.join().unwrap();

    peer.put_message(Message::new("found you")).unwrap();
    assert_eq!(late.mailbox().pop().unwrap().body(), "found you");
}

#[test]
fn test_cleanup_through_agent_manager() {
    let manager = LocalAgentManager::new(LocalRegistry::new());
    let holon = Holon::builder().name("tidy").config(fast_config()).build();
    manager.add_agent(holon.clone()).unwrap();

    holon.subscribe_topic("A", DeliveryMode::Reliable).unwrap();
    holon.subscribe_topic("B", DeliveryMode::BestEffort).unwrap();
    holon
        .get_publisher("scratch", HOLON_INTERFACE, false, None)
        .unwrap();

    holon.shutdown();

    let registry = manager.local_registry();
    assert!(holon.subscribed_topics().is_empty());
    assert_eq!(registry.subscriber_count("A", None), 0);
    assert_eq!(registry.subscriber_count("B", None), 0);
    // destruction is off by default, the transient topic survives
    assert!(registry.topic_names(None).contains(&"scratch".to_string()));
    assert_eq!(holon.state(), LifecycleState::Stopped);
}

#[test]
fn test_removal_waits_for_running_handler_before_cleanup() {
    let manager = LocalAgentManager::new(LocalRegistry::new());
    let busy = Arc::new(AtomicBool::new(false));
    let entered = Arc::clone(&busy);

    let holon = Holon::builder()
        .name("slow")
        .config(fast_config())
        .handler(move |holon: &Holon, _: Arc<Message>| -> holon::Result<()> {
            entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            holon.subscribe_topic("late", DeliveryMode::Reliable)?;
            Ok(())
        })
        .build();
    manager.add_agent(holon.clone()).unwrap();

    holon.put_message(Message::new("work"));
    assert!(wait_until(Duration::from_secs(2), || busy.load(Ordering::SeqCst)));
    holon.shutdown();

    assert!(holon.subscribed_topics().is_empty());
    assert_eq!(manager.local_registry().subscriber_count("late", None), 0);
    assert_eq!(holon.state(), LifecycleState::Stopped);
}

#[derive(Default)]
struct EventLog(Mutex<Vec<Event>>);

impl EventHandler for EventLog {
    fn new_event(&self, _holon: &Holon, event: Event) {
        self.0.lock().push(event);
    }
}

#[test]
fn test_events_reach_subscriber_through_event_server() {
    let manager = LocalAgentManager::new(LocalRegistry::new());
    let log = Arc::new(EventLog::default());

    let listener = Holon::builder()
        .name("listener")
        .event_handler(log.clone())
        .build();
    let source = Holon::light("source");
    manager.add_agent(listener.clone()).unwrap();
    manager.add_agent(source.clone()).unwrap();

    let handle = listener.subscribe_event("alarms").unwrap();
    let publisher = source.get_event_publisher("alarms").unwrap();
    publisher
        .new_event(Event::new("overheat").with_argument("cell", 4))
        .unwrap();

    let events = log.0.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "overheat");
    assert_eq!(events[0].arguments["cell"], "4");
    assert!(listener.mailbox().is_empty());

    let registry = manager.local_registry();
    assert_eq!(registry.subscriber_count("alarms", handle.server.as_ref()), 1);
    assert_eq!(registry.subscriber_count("alarms", None), 0);
    drop(events);

    manager.shutdown_all();
}

struct FailingManager {
    registry: Arc<StubRegistry>,
    removals: AtomicUsize,
}

impl AgentManager for FailingManager {
    fn registry(&self) -> Arc<dyn RegistryClient> {
        self.registry.clone()
    }

    fn remove_agent(&self, _holon: &Holon) -> Result<(), RegistryError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        Err(RegistryError::transport("registry connection refused"))
    }
}

#[test]
fn test_shutdown_swallows_manager_failure() {
    let manager = Arc::new(FailingManager {
        registry: Arc::new(StubRegistry::default()),
        removals: AtomicUsize::new(0),
    });
    let holon = Holon::light("stubborn");
    let dyn_manager: Arc<dyn AgentManager> = manager.clone();
    holon.set_agent_manager(&dyn_manager).unwrap();

    holon.shutdown();

    assert_eq!(manager.removals.load(Ordering::SeqCst), 1);
}

#[test]
fn test_standalone_shutdown_cleans_up_locally() {
    let registry = Arc::new(StubRegistry::default());
    let holon = Holon::light("standalone");
    holon.set_registry(registry.clone()).unwrap();
    holon.start().unwrap();
    holon.subscribe_topic("A", DeliveryMode::Reliable).unwrap();

    holon.shutdown();

    assert!(holon.is_stop_requested());
    assert_eq!(registry.unsubscribe_count("A"), 1);
    assert_eq!(holon.state(), LifecycleState::Stopped);
}

#[test]
fn test_active_holon_needs_registration_before_start() {
    let holon = Holon::active("eager", Recorder::default());
    assert!(matches!(
        holon.start(),
        Err(HolonError::InvalidTransition { .. })
    ));

    holon.set_registry(Arc::new(StubRegistry::default())).unwrap();
    holon.start().unwrap();
    holon.stop();
    holon.join().unwrap();
}

#[test]
fn test_handler_can_reply_through_resolved_peer() {
    let registry = LocalRegistry::new();
    let manager = LocalAgentManager::new(registry.clone());

    let client = Holon::light("client");
    let server = Holon::builder()
        .name("server")
        .config(fast_config())
        .handler(|holon: &Holon, msg: Arc<Message>| -> holon::Result<()> {
            let Some(reply_to) = msg.argument("reply_to") else {
                return Err(HolonError::handler("missing reply_to"));
            };
            if let Some(peer) = holon.resolve(reply_to)? {
                peer.put_message(Message::new(format!("re: {}", msg.body())))?;
            }
            Ok(())
        })
        .build();

    manager.add_agent(client.clone()).unwrap();
    manager.add_agent(server.clone()).unwrap();

    server.put_message(Message::new("ping").with_argument("reply_to", "client"));

    assert!(wait_until(Duration::from_secs(2), || !client.mailbox().is_empty()));
    assert_eq!(client.mailbox().pop().unwrap().body(), "re: ping");

    manager.shutdown_all();
    assert!(manager.agent_names().is_empty());
}
