use std::{cmp::Ordering, collections::BinaryHeap};

use serde_json::{Value, json};

use crate::{error::MessageError, message::Message, types::Timestamp};

/// Margin-call id marking an ordinary (non-liquidation) message.
pub const NORMAL_MARGIN_CALL_ID: u64 = u64::MAX;

/// A message plus its scheduling priority class.
///
/// Exchange-initiated liquidations are injected with explicit small
/// `margin_call_id`s so they pre-empt user traffic arriving at the same
/// simulated instant; everything else carries [`NORMAL_MARGIN_CALL_ID`].
#[derive(Debug, Clone, PartialEq)]
pub struct PrioritizedMessage {
    pub msg: Message,
    pub margin_call_id: u64,
}

impl PrioritizedMessage {
    pub fn normal(msg: Message) -> Self {
        Self {
            msg,
            margin_call_id: NORMAL_MARGIN_CALL_ID,
        }
    }

    pub fn margin_call(msg: Message, margin_call_id: u64) -> Self {
        Self {
            msg,
            margin_call_id,
        }
    }
}

#[derive(Debug, Clone)]
struct QueueEntry {
    pmsg: PrioritizedMessage,
    id: u64,
}

impl QueueEntry {
    /// Delivery key: lexicographic by (margin call id, arrival, insertion id).
    fn key(&self) -> (u64, Timestamp, u64) {
        (self.pmsg.margin_call_id, self.pmsg.msg.arrival, self.id)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Reversed so the smallest key sits on top of the max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// The min-priority message queue driving a simulation.
///
/// Insertion ids are allocated monotonically on `push`, giving messages with
/// equal (margin call id, arrival) a stable FIFO order: of two such messages,
/// the one pushed first pops first.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    heap: BinaryHeap<QueueEntry>,
    id_counter: u64,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The message that would pop next.
    pub fn top(&self) -> Option<&Message> {
        self.heap.peek().map(|entry| &entry.pmsg.msg)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn push(&mut self, pmsg: PrioritizedMessage) {
        let id = self.id_counter;
        self.id_counter += 1;
        self.heap.push(QueueEntry { pmsg, id });
    }

    pub fn pop(&mut self) -> Option<PrioritizedMessage> {
        self.heap.pop().map(|entry| entry.pmsg)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Direct insert preserving an externally assigned insertion id. This is
    /// the checkpoint-reload path and the only one that bypasses the
    /// monotonic counter; the counter still advances past the id so later
    /// pushes cannot collide.
    pub(crate) fn push_with_id(&mut self, pmsg: PrioritizedMessage, id: u64) {
        self.id_counter = self.id_counter.max(id + 1);
        self.heap.push(QueueEntry { pmsg, id });
    }

    /// Checkpoint form: the counter plus every pending entry with its
    /// insertion id. Entry order in the file is not meaningful; reload
    /// re-heapifies.
    pub fn checkpoint(&self) -> Result<Value, MessageError> {
        let entries = self
            .heap
            .iter()
            .map(|entry| {
                Ok(json!({
                    "marginCallId": entry.pmsg.margin_call_id,
                    "id": entry.id,
                    "message": entry.pmsg.msg.json_value()?,
                }))
            })
            .collect::<Result<Vec<_>, MessageError>>()?;
        Ok(json!({
            "idCounter": self.id_counter,
            "entries": entries,
        }))
    }

    pub fn from_checkpoint(json: &Value) -> Result<Self, MessageError> {
        let mut queue = Self::new();
        let entries = json
            .get("entries")
            .and_then(Value::as_array)
            .ok_or_else(|| MessageError::MalformedPayload {
                payload_type: "<queue-checkpoint>".into(),
                reason: "missing 'entries' array".into(),
            })?;
        for entry in entries {
            let msg = Message::from_json_message(entry.get("message").ok_or_else(|| {
                MessageError::MalformedPayload {
                    payload_type: "<queue-checkpoint>".into(),
                    reason: "entry missing 'message'".into(),
                }
            })?)?;
            let margin_call_id = entry
                .get("marginCallId")
                .and_then(Value::as_u64)
                .unwrap_or(NORMAL_MARGIN_CALL_ID);
            let id = entry.get("id").and_then(Value::as_u64).unwrap_or_default();
            queue.push_with_id(
                PrioritizedMessage {
                    msg,
                    margin_call_id,
                },
                id,
            );
        }
        if let Some(counter) = json.get("idCounter").and_then(Value::as_u64) {
            queue.id_counter = queue.id_counter.max(counter);
        }
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::Payload, types::Timestamp};

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
    fn api() {
        let mut queue = MessageQueue::new();

        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        const PUSH_COUNT: usize = 4;
        for _ in 0..PUSH_COUNT {
            queue.push(PrioritizedMessage::normal(message(0, "baz")));
        }

        assert!(!queue.is_empty());
        assert_eq!(queue.len(), PUSH_COUNT);

        const POP_COUNT: usize = 3;
        for _ in 0..POP_COUNT {
            queue.pop();
        }

        assert!(!queue.is_empty());
        assert_eq!(queue.len(), PUSH_COUNT - POP_COUNT);

        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_arrivals_pop_in_push_order() {
        let mut queue = MessageQueue::new();
        for test_id in ["1st", "2nd", "3rd", "4th"] {
            queue.push(PrioritizedMessage::normal(message(0, test_id)));
        }

        let mut popped = Vec::new();
        for _ in 0..3 {
            popped.push(queue.top().unwrap().message_type.clone());
            queue.pop();
        }

        assert_eq!(popped, vec!["1st", "2nd", "3rd"]);
    }

    #[test]
    fn differing_arrivals_pop_earliest_first() {
        let mut queue = MessageQueue::new();
        for (i, test_id) in ["1st", "2nd", "3rd", "4th"].into_iter().enumerate() {
            queue.push(PrioritizedMessage::normal(message(4 - i as u64, test_id)));
        }

        let mut popped = Vec::new();
        for _ in 0..3 {
            popped.push(queue.top().unwrap().message_type.clone());
            queue.pop();
        }

        assert_eq!(popped, vec!["4th", "3rd", "2nd"]);
    }

    #[test]
    fn margin_calls_preempt_equal_arrivals() {
        let mut queue = MessageQueue::new();
        for (i, test_id) in ["1st", "2nd", "3rd", "4th"].into_iter().enumerate() {
            queue.push(PrioritizedMessage::margin_call(
                message(0, test_id),
                4 - i as u64,
            ));
        }

        let mut popped = Vec::new();
        while let Some(pmsg) = queue.pop() {
            popped.push(pmsg.msg.message_type);
        }

        assert_eq!(popped, vec!["4th", "3rd", "2nd", "1st"]);
    }

    #[test]
    fn margin_call_beats_normal_traffic_at_same_arrival() {
        let mut queue = MessageQueue::new();
        queue.push(PrioritizedMessage::normal(message(0, "normal")));
        queue.push(PrioritizedMessage::margin_call(message(0, "liquidate"), 0));

        assert_eq!(queue.pop().unwrap().msg.message_type, "liquidate");
        assert_eq!(queue.pop().unwrap().msg.message_type, "normal");
    }

    /// Checkpointed messages reload through the payload factory, so the type
    /// must be a real one; the source field carries the label instead.
    fn labelled(arrival: u64, label: &str) -> Message {
        Message::new(
            Timestamp(0),
            Timestamp(arrival),
            label,
            "bar",
            "EMPTY",
            Payload::Empty,
        )
        .unwrap()
    }

    #[test]
    fn checkpoint_preserves_insertion_ids() {
        let mut queue = MessageQueue::new();
        for label in ["1st", "2nd", "3rd"] {
            queue.push(PrioritizedMessage::normal(labelled(0, label)));
        }

        let ckpt = queue.checkpoint().unwrap();
        let mut restored = MessageQueue::from_checkpoint(&ckpt).unwrap();

        let mut popped = Vec::new();
        while let Some(pmsg) = restored.pop() {
            popped.push(pmsg.msg.source);
        }
        assert_eq!(popped, vec!["1st", "2nd", "3rd"]);

        // Fresh pushes continue past the reloaded counter.
        restored.push(PrioritizedMessage::normal(labelled(0, "4th")));
        assert_eq!(restored.len(), 1);
    }
}
