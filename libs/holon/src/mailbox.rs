//! Holon mailbox
//!
//! Unbounded FIFO of inbound messages guarded by a single mutex. Entries are
//! reference counted so that snapshots are cheap and removal can match on
//! entry identity rather than content.

use crate::error::{HolonError, Result};
use crate::message::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
pub struct Mailbox {
    queue: Mutex<VecDeque<Arc<Message>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the tail
    pub fn append(&self, message: impl Into<Arc<Message>>) {
        self.queue.lock().push_back(message.into());
    }

    /// Remove and return the head, `None` when empty
    pub fn pop(&self) -> Option<Arc<Message>> {
        self.queue.lock().pop_front()
    }

    /// Remove the first entry that is the same message as `message`
    pub fn remove(&self, message: &Message) -> Result<Arc<Message>> {
        let mut queue = self.queue.lock();
        let position = queue.iter().position(|entry| entry.same_entry(message));
        position
            .and_then(|index| queue.remove(index))
            .ok_or(HolonError::MessageNotFound { id: message.id() })
    }

    /// Shallow snapshot of the current contents
    pub fn copy(&self) -> Vec<Arc<Message>> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Read an entry without removing it
    pub fn get(&self, index: usize) -> Option<Arc<Message>> {
        self.queue.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drain every entry in FIFO order
    pub fn clear(&self) -> Vec<Arc<Message>> {
        self.queue.lock().drain(..).collect()
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.copy().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let mailbox = Mailbox::new();
        mailbox.append(Message::new("A"));
        mailbox.append(Message::new("B"));
        mailbox.append(Message::new("C"));

        assert_eq!(mailbox.pop().unwrap().body(), "A");
        assert_eq!(mailbox.pop().unwrap().body(), "B");
        assert_eq!(mailbox.pop().unwrap().body(), "C");
        assert!(mailbox.pop().is_none());
    }

    #[test]
    fn test_pop_empty_returns_immediately() {
        let mailbox = Mailbox::new();
        assert!(mailbox.pop().is_none());
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_snapshot_isolation() {
        let mailbox = Mailbox::new();
        mailbox.append(Message::new("first"));

        let snapshot = mailbox.copy();
        mailbox.append(Message::new("second"));
        mailbox.pop();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].body(), "first");
        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox.get(0).unwrap().body(), "second");
    }

    #[test]
    fn test_remove_by_identity() {
        let mailbox = Mailbox::new();
        let twin_a = Message::new("same");
        let twin_b = Message::new("same");
        mailbox.append(twin_a.clone());
        mailbox.append(twin_b.clone());

        let removed = mailbox.remove(&twin_b).unwrap();
        assert!(removed.same_entry(&twin_b));
        assert_eq!(mailbox.len(), 1);
        assert!(mailbox.get(0).unwrap().same_entry(&twin_a));

        let err = mailbox.remove(&twin_b).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn test_duplicates_permitted() {
        let mailbox = Mailbox::new();
        let msg = Arc::new(Message::new("dup"));
        mailbox.append(Arc::clone(&msg));
        mailbox.append(Arc::clone(&msg));
        assert_eq!(mailbox.len(), 2);

        mailbox.remove(&msg).unwrap();
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn test_clear_drains_in_order() {
        let mailbox = Mailbox::new();
        for body in ["A", "B", "C"] {
            mailbox.append(Message::new(body));
        }

        let drained: Vec<String> = mailbox
            .clear()
            .iter()
            .map(|msg| msg.body().to_string())
            .collect();

        assert_eq!(drained, vec!["A", "B", "C"]);
        assert!(mailbox.is_empty());
        assert!(mailbox.clear().is_empty());
    }

    #[test]
    fn test_indexed_read_out_of_range() {
        let mailbox = Mailbox::new();
        mailbox.append(Message::new("only"));
        assert!(mailbox.get(1).is_none());
    }

    #[test]
    fn test_concurrent_appends() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;

        let mailbox = Arc::new(Mailbox::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let mailbox = Arc::clone(&mailbox);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        mailbox.append(Message::new(format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(msg) = mailbox.pop() {
            assert!(seen.insert(msg.body().to_string()), "duplicate {}", msg.body());
        }
        assert_eq!(seen.len(), THREADS * PER_THREAD);
    }

    #[test]
    fn test_concurrent_remove_same_entry() {
        let mailbox = Arc::new(Mailbox::new());
        let target = Message::new("target");
        mailbox.append(target.clone());
        mailbox.append(Message::new("other"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mailbox = Arc::clone(&mailbox);
                let target = target.clone();
                thread::spawn(move || mailbox.remove(&target).is_ok())
            })
            .collect();
        let removed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(removed, 1);
        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox.pop().unwrap().body(), "other");
    }

    proptest! {
        #[test]
        fn prop_pop_order_matches_append_order(bodies in proptest::collection::vec("[a-z0-9]{0,6}", 0..64)) {
            let mailbox = Mailbox::new();
            for body in &bodies {
                mailbox.append(Message::new(body.clone()));
            }
            let popped: Vec<String> = std::iter::from_fn(|| mailbox.pop())
                .map(|m| m.body().to_string())
                .collect();
            prop_assert_eq!(popped, bodies);
        }
    }
}
