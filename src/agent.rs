use crate::{
    error::{MessageError, MultibookResult},
    message::{Message, Payload, PrioritizedMessage},
    types::{Timespan, Timestamp},
};

/// Delivery context handed to an agent for one message: the current simulated
/// time plus an outbox. Everything an agent sends is stamped with its own
/// name as source and enqueued by the driver after the handler returns.
pub struct AgentCtx<'a> {
    now: Timestamp,
    source: &'a str,
    outbox: &'a mut Vec<PrioritizedMessage>,
}

impl<'a> AgentCtx<'a> {
    /// Builds a context over an explicit outbox. The driver does this per
    /// delivery; tests use it to exercise agents without a driver.
    pub fn new(
        now: Timestamp,
        source: &'a str,
        outbox: &'a mut Vec<PrioritizedMessage>,
    ) -> Self {
        Self {
            now,
            source,
            outbox,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Queues a message occurring now and arriving after `delay`.
    pub fn send(
        &mut self,
        delay: Timespan,
        target: &str,
        payload: Payload,
    ) -> Result<(), MessageError> {
        let msg = self.build(delay, target, payload)?;
        self.outbox.push(PrioritizedMessage::normal(msg));
        Ok(())
    }

    /// Queues a liquidation message with an explicit margin-call id, which
    /// pre-empts normal traffic at the same arrival.
    pub fn send_margin_call(
        &mut self,
        delay: Timespan,
        target: &str,
        payload: Payload,
        margin_call_id: u64,
    ) -> Result<(), MessageError> {
        let msg = self.build(delay, target, payload)?;
        self.outbox
            .push(PrioritizedMessage::margin_call(msg, margin_call_id));
        Ok(())
    }

    fn build(
        &self,
        delay: Timespan,
        target: &str,
        payload: Payload,
    ) -> Result<Message, MessageError> {
        let message_type = payload.type_string();
        Message::new(
            self.now,
            self.now + delay,
            self.source,
            target,
            message_type,
            payload,
        )
    }
}

/// A simulation participant: anything registered under a target name that
/// reacts to delivered messages.
///
/// Handlers run synchronously on the driver thread and must not block. All
/// shared state (books, accounts) lives behind the exchange agent; other
/// agents interact with it purely through message round-trips.
pub trait Agent {
    /// The name this agent is addressed by.
    fn name(&self) -> &str;

    /// Handles one delivered message.
    fn on_message(&mut self, ctx: &mut AgentCtx<'_>, msg: &Message) -> MultibookResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::queue::NORMAL_MARGIN_CALL_ID;

    #[test]
    fn sends_stamp_source_and_arrival() {
        let mut outbox = Vec::new();
        let mut ctx = AgentCtx::new(Timestamp(100), "trader-1", &mut outbox);
        ctx.send(Timespan(10), "EXCHANGE", Payload::Empty).unwrap();

        let pmsg = &outbox[0];
        assert_eq!(pmsg.margin_call_id, NORMAL_MARGIN_CALL_ID);
        assert_eq!(pmsg.msg.source, "trader-1");
        assert_eq!(pmsg.msg.occurrence, Timestamp(100));
        assert_eq!(pmsg.msg.arrival, Timestamp(110));
        assert_eq!(pmsg.msg.message_type, "EMPTY");
    }

    #[test]
    fn margin_call_sends_carry_their_id() {
        let mut outbox = Vec::new();
        let mut ctx = AgentCtx::new(Timestamp(0), "EXCHANGE", &mut outbox);
        ctx.send_margin_call(Timespan(0), "EXCHANGE", Payload::Empty, 3)
            .unwrap();
        assert_eq!(outbox[0].margin_call_id, 3);
    }
}
