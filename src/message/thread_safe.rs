use std::sync::RwLock;

use crate::message::{Message, MessageQueue, PrioritizedMessage};

/// Shared/exclusive-locked wrapper around [`MessageQueue`], bridging ingress
/// from non-driver threads (e.g. a transport thread delivering remote-agent
/// responses) into a driver's queue.
///
/// Readers (`top`, `is_empty`, `len`) share the lock; every mutation
/// (`push`, `pop`, `clear`) takes it exclusively — including push, whose
/// insertion id must be allocated under the same exclusive section to keep
/// the FIFO tie-break total when multiple producers insert.
#[derive(Debug, Default)]
pub struct ThreadSafeMessageQueue {
    underlying: RwLock<MessageQueue>,
}

impl ThreadSafeMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_queue(underlying: MessageQueue) -> Self {
        Self {
            underlying: RwLock::new(underlying),
        }
    }

    /// A clone of the message that would pop next.
    pub fn top(&self) -> Option<Message> {
        self.read().top().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn push(&self, pmsg: PrioritizedMessage) {
        self.write().push(pmsg);
    }

    pub fn push_message(&self, msg: Message) {
        self.write().push(PrioritizedMessage::normal(msg));
    }

    pub fn pop(&self) -> Option<PrioritizedMessage> {
        self.write().pop()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Drains every pending message into the caller's queue, preserving
    /// relative order. The driver uses this to absorb cross-thread ingress at
    /// a step boundary.
    pub fn drain_into(&self, queue: &mut MessageQueue) {
        let mut guard = self.write();
        while let Some(pmsg) = guard.pop() {
            queue.push(pmsg);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MessageQueue> {
        self.underlying.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MessageQueue> {
        self.underlying.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::Payload, types::Timestamp};
    use std::{sync::Arc, thread};

    fn message(arrival: u64, message_type: &str) -> Message {
        Message::new(
            Timestamp(0),
            Timestamp(arrival),
            "foo",
            "bar",
            message_type,
            Payload::Empty,
        )
        .unwrap()
    }

    #[test]
    fn same_ordering_contract_as_the_plain_queue() {
        let queue = ThreadSafeMessageQueue::new();
        for test_id in ["1st", "2nd", "3rd"] {
            queue.push_message(message(0, test_id));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.top().unwrap().message_type, "1st");
        assert_eq!(queue.pop().unwrap().msg.message_type, "1st");
        assert_eq!(queue.pop().unwrap().msg.message_type, "2nd");
    }

    #[test]
    fn concurrent_pushes_all_arrive() {
        let queue = Arc::new(ThreadSafeMessageQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..25 {
                        queue.push_message(message(i, &format!("t{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 100);

        // Arrivals still pop in non-decreasing order.
        let mut last = 0;
        while let Some(pmsg) = queue.pop() {
            assert!(pmsg.msg.arrival.0 >= last);
            last = pmsg.msg.arrival.0;
        }
    }

    #[test]
    fn drain_into_preserves_relative_order() {
        let ingress = ThreadSafeMessageQueue::new();
        for test_id in ["a", "b", "c"] {
            ingress.push_message(message(5, test_id));
        }

        let mut main = MessageQueue::new();
        main.push(PrioritizedMessage::normal(message(1, "first")));
        ingress.drain_into(&mut main);

        let popped: Vec<_> = std::iter::from_fn(|| main.pop())
            .map(|pmsg| pmsg.msg.message_type)
            .collect();
        assert_eq!(popped, vec!["first", "a", "b", "c"]);
    }
}
