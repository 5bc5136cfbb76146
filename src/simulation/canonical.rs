use crate::{
    message::{Message, Payload},
    types::{BlockIdx, BookId},
};

/// Applies `f` to every book id the payload carries, nested request payloads
/// and the trade context included. The visit order is stable; for trade
/// events the context id is visited last.
fn for_each_book_id(payload: &mut Payload, f: &mut impl FnMut(&mut BookId)) {
    match payload {
        Payload::PlaceOrderMarket(p) => f(&mut p.book_id),
        Payload::PlaceOrderMarketResponse(p) => f(&mut p.request_payload.book_id),
        Payload::PlaceOrderMarketErrorResponse(p) => f(&mut p.request_payload.book_id),
        Payload::PlaceOrderLimit(p) => f(&mut p.book_id),
        Payload::PlaceOrderLimitResponse(p) => f(&mut p.request_payload.book_id),
        Payload::PlaceOrderLimitErrorResponse(p) => f(&mut p.request_payload.book_id),
        Payload::CancelOrders(p) => f(&mut p.book_id),
        Payload::CancelOrdersResponse(p) => f(&mut p.request_payload.book_id),
        Payload::CancelOrdersErrorResponse(p) => f(&mut p.request_payload.book_id),
        Payload::RetrieveOrders(p) => f(&mut p.book_id),
        Payload::RetrieveOrdersResponse(p) => f(&mut p.book_id),
        Payload::RetrieveL1(p) => f(&mut p.book_id),
        Payload::RetrieveL1Response(p) => f(&mut p.book_id),
        Payload::RetrieveBook(p) => f(&mut p.book_id),
        Payload::EventTrade(p) => {
            f(&mut p.book_id);
            f(&mut p.context.book_id);
        }
        Payload::Empty | Payload::BookState(_) | Payload::DistributedAgentResponse(_) => {}
    }
}

/// Rewrites a cross-block message's local book ids into their global form
/// `block_idx * block_dim + local_id`. Only distributed-response wrappers are
/// touched; every other message passes through unchanged.
pub fn canonize(mut msg: Message, block_idx: BlockIdx, block_dim: u32) -> Message {
    let Payload::DistributedAgentResponse(wrapper) = &mut msg.payload else {
        return msg;
    };
    for_each_book_id(&mut wrapper.payload, &mut |book_id| {
        *book_id = BookId(block_idx.0 * block_dim + book_id.0);
    });
    msg
}

#[derive(Debug)]
pub struct DecanonizeResult {
    pub msg: Message,
    /// The originating block, recovered from the canonical book id; absent
    /// when the payload carries no book id.
    pub block_idx: Option<BlockIdx>,
}

/// Inverse of [`canonize`]: restores local book ids (`canonical % block_dim`)
/// and recovers the block index (`canonical / block_dim`).
pub fn decanonize(mut msg: Message, block_dim: u32) -> DecanonizeResult {
    let Payload::DistributedAgentResponse(wrapper) = &mut msg.payload else {
        return DecanonizeResult {
            msg,
            block_idx: None,
        };
    };
    let mut canonical: Option<BookId> = None;
    for_each_book_id(&mut wrapper.payload, &mut |book_id| {
        canonical = Some(*book_id);
        *book_id = BookId(book_id.0 % block_dim);
    });
    DecanonizeResult {
        msg,
        block_idx: canonical.map(|book_id| BlockIdx(book_id.0 / block_dim)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{Trade, TradeContext},
        message::payload::{
            DistributedAgentResponsePayload, EventTradePayload, PlaceOrderLimitPayload,
            PlaceOrderLimitResponsePayload, RetrieveL1Payload,
        },
        types::{AgentId, OrderDirection, OrderId, StpFlag, Timestamp},
    };
    use rust_decimal_macros::dec;

    fn wrap(payload: Payload) -> Message {
        Message::new(
            Timestamp(0),
            Timestamp(0),
            "remote",
            "EXCHANGE",
            format!("DISTRIBUTED_{}", payload.type_string()),
            Payload::DistributedAgentResponse(DistributedAgentResponsePayload {
                agent_id: AgentId(7),
                payload: Box::new(payload),
            }),
        )
        .unwrap()
    }

    fn limit_payload(book_id: u32) -> PlaceOrderLimitPayload {
        PlaceOrderLimitPayload {
            book_id: BookId(book_id),
            direction: OrderDirection::Buy,
            price: dec!(10),
            volume: dec!(1),
            leverage: dec!(1),
            time_in_force: None,
            post_only: None,
            expiry_period: None,
            client_order_id: None,
            stp_flag: StpFlag::default(),
        }
    }

    fn inner_book_id(msg: &Message) -> Option<BookId> {
        match &msg.payload {
            Payload::DistributedAgentResponse(wrapper) => wrapper.payload.book_id(),
            _ => None,
        }
    }

    #[test]
    fn canonize_then_decanonize_is_identity() {
        // block 2 of width 4, local book 3 -> canonical 11.
        let msg = wrap(Payload::PlaceOrderLimit(limit_payload(3)));
        let reference = msg.clone();

        let canonized = canonize(msg, BlockIdx(2), 4);
        assert_eq!(inner_book_id(&canonized), Some(BookId(11)));

        let result = decanonize(canonized, 4);
        assert_eq!(result.block_idx, Some(BlockIdx(2)));
        assert_eq!(result.msg, reference);
    }

    #[test]
    fn nested_request_payloads_are_covered() {
        let msg = wrap(Payload::PlaceOrderLimitResponse(
            PlaceOrderLimitResponsePayload {
                order_id: OrderId(1),
                request_payload: limit_payload(1),
            },
        ));
        let canonized = canonize(msg, BlockIdx(3), 8);
        assert_eq!(inner_book_id(&canonized), Some(BookId(25)));

        let result = decanonize(canonized, 8);
        assert_eq!(result.block_idx, Some(BlockIdx(3)));
        assert_eq!(inner_book_id(&result.msg), Some(BookId(1)));
    }

    #[test]
    fn trade_events_rewrite_both_book_ids() {
        let trade = Trade {
            resting_order_id: OrderId(1),
            aggressing_order_id: OrderId(2),
            resting_agent_id: AgentId(1),
            aggressing_agent_id: AgentId(2),
            direction: OrderDirection::Sell,
            price: dec!(5),
            volume: dec!(1),
            timestamp: Timestamp(0),
        };
        let msg = wrap(Payload::EventTrade(EventTradePayload {
            book_id: BookId(2),
            context: TradeContext { book_id: BookId(2) },
            trade,
        }));

        let canonized = canonize(msg, BlockIdx(1), 4);
        match &canonized.payload {
            Payload::DistributedAgentResponse(wrapper) => match wrapper.payload.as_ref() {
                Payload::EventTrade(p) => {
                    assert_eq!(p.book_id, BookId(6));
                    assert_eq!(p.context.book_id, BookId(6));
                }
                other => panic!("unexpected payload {other:?}"),
            },
            other => panic!("unexpected payload {other:?}"),
        }

        let result = decanonize(canonized, 4);
        assert_eq!(result.block_idx, Some(BlockIdx(1)));
    }

    #[test]
    fn non_distributed_messages_pass_through() {
        let msg = Message::new(
            Timestamp(0),
            Timestamp(0),
            "trader",
            "EXCHANGE",
            "RETRIEVE_L1",
            Payload::RetrieveL1(RetrieveL1Payload { book_id: BookId(3) }),
        )
        .unwrap();
        let reference = msg.clone();

        let canonized = canonize(msg, BlockIdx(9), 4);
        assert_eq!(canonized, reference);

        let result = decanonize(canonized, 4);
        assert_eq!(result.block_idx, None);
        assert_eq!(result.msg, reference);
    }

    #[test]
    fn payloads_without_book_ids_report_no_block() {
        let msg = wrap(Payload::Empty);
        let result = decanonize(msg, 4);
        assert_eq!(result.block_idx, None);
    }
}
