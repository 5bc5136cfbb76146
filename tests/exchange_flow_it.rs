//! End-to-end flow: scripted traders against the exchange through the driver.

use std::{cell::RefCell, rc::Rc};

use multibook::{
    Agent, AgentCtx, Message, MultibookResult, Simulation, SimulationConfig, SimulationState,
    message::{EXCHANGE_TARGET, Payload, RejectionReason},
    types::{AgentId, BookId, OrderDirection, StpFlag, Timespan, Timestamp},
};
use rust_decimal_macros::dec;
use serde_json::json;

/// Records every payload delivered to a named trader.
struct Recorder {
    name: String,
    log: Rc<RefCell<Vec<(Timestamp, String, Payload)>>>,
}

impl Agent for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, ctx: &mut AgentCtx<'_>, msg: &Message) -> MultibookResult<()> {
        self.log
            .borrow_mut()
            .push((ctx.now(), self.name.clone(), msg.payload.clone()));
        Ok(())
    }
}

fn config() -> SimulationConfig {
    serde_json::from_value(json!({
        "bookCount": 1,
        "blockDim": 4,
        "feePolicy": {"type": "static", "makerFee": 0.001, "takerFee": 0.002},
        "traders": [
            {"name": "alice", "agentId": 1, "baseFunding": 10.0, "quoteFunding": 10000.0, "quoteDecimals": 2},
            {"name": "bob", "agentId": 2, "baseFunding": 10.0, "quoteFunding": 10000.0, "quoteDecimals": 2, "subscribeTrades": true},
        ],
    }))
    .unwrap()
}

fn request(arrival: u64, source: &str, payload_json: serde_json::Value) -> Message {
    let mut wire = json!({
        "timestamp": arrival,
        "delay": 0,
        "source": source,
        "target": EXCHANGE_TARGET,
    });
    wire.as_object_mut()
        .unwrap()
        .extend(payload_json.as_object().cloned().unwrap());
    Message::from_json_message(&wire).unwrap()
}

fn wire_simulation() -> (Simulation, Rc<RefCell<Vec<(Timestamp, String, Payload)>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut sim = Simulation::new();
    sim.add_agent(Box::new(config().build_exchange().unwrap()));
    for name in ["alice", "bob"] {
        sim.add_agent(Box::new(Recorder {
            name: name.to_string(),
            log: Rc::clone(&log),
        }));
    }
    sim.agents_created();
    (sim, log)
}

#[test]
fn scripted_session_settles_and_notifies() {
    let (mut sim, log) = wire_simulation();

    // Alice quotes an ask, Bob lifts it, then asks for the top of book.
    sim.queue_message(request(
        10,
        "alice",
        json!({
            "type": "PLACE_ORDER_LIMIT",
            "payload": {"bookId": 0, "direction": "SELL", "price": 100.0, "volume": 2.0},
        }),
    ));
    sim.queue_message(request(
        20,
        "bob",
        json!({
            "type": "PLACE_ORDER_LIMIT",
            "payload": {"bookId": 0, "direction": "BUY", "price": 100.0, "volume": 1.5},
        }),
    ));
    sim.queue_message(request(
        30,
        "bob",
        json!({
            "type": "RETRIEVE_L1",
            "payload": {"bookId": 0},
        }),
    ));

    sim.run().unwrap();
    assert_eq!(sim.state(), SimulationState::Stopped);
    assert_eq!(sim.time(), Timestamp(30));

    let log = log.borrow();
    let alice: Vec<&Payload> = log
        .iter()
        .filter(|(_, name, _)| name == "alice")
        .map(|(_, _, p)| p)
        .collect();
    let bob: Vec<&Payload> = log
        .iter()
        .filter(|(_, name, _)| name == "bob")
        .map(|(_, _, p)| p)
        .collect();

    // Alice: one placement response.
    assert_eq!(alice.len(), 1);
    match alice[0] {
        Payload::PlaceOrderLimitResponse(response) => {
            assert_eq!(response.request_payload.direction, OrderDirection::Sell);
        }
        other => panic!("unexpected payload for alice: {other:?}"),
    }

    // Bob: placement response, the trade event he subscribed to, and L1.
    assert_eq!(bob.len(), 3);
    assert!(matches!(bob[0], Payload::PlaceOrderLimitResponse(_)));
    match bob[1] {
        Payload::EventTrade(event) => {
            assert_eq!(event.book_id, BookId(0));
            assert_eq!(event.context.book_id, BookId(0));
            assert_eq!(event.trade.price, dec!(100));
            assert_eq!(event.trade.volume, dec!(1.5));
            assert_eq!(event.trade.direction, OrderDirection::Buy);
            assert_eq!(event.trade.resting_agent_id, AgentId(1));
            assert_eq!(event.trade.aggressing_agent_id, AgentId(2));
        }
        other => panic!("expected trade event, got {other:?}"),
    }
    match bob[2] {
        Payload::RetrieveL1Response(response) => {
            let l1 = response.l1;
            assert_eq!(l1.best_ask_price, Some(dec!(100)));
            assert_eq!(l1.best_ask_volume, Some(dec!(0.5)));
            assert_eq!(l1.best_bid_price, None);
            assert_eq!(l1.last_trade_price, Some(dec!(100)));
        }
        other => panic!("expected L1 response, got {other:?}"),
    }
}

#[test]
fn balances_and_volume_invariants_hold_after_the_session() {
    let config = config();
    let mut exchange = config.build_exchange().unwrap();

    // Drive the exchange directly through messages, without the driver, to
    // inspect it afterwards.
    let mut outbox = Vec::new();
    let deliver = |exchange: &mut multibook::MultiBookExchangeAgent,
                       outbox: &mut Vec<multibook::PrioritizedMessage>,
                       at: u64,
                       source: &str,
                       payload_json: serde_json::Value| {
        let msg = request(at, source, payload_json);
        let mut ctx_outbox = Vec::new();
        let mut ctx = AgentCtx::new(Timestamp(at), EXCHANGE_TARGET, &mut ctx_outbox);
        exchange.on_message(&mut ctx, &msg).unwrap();
        outbox.extend(ctx_outbox);
    };

    deliver(
        &mut exchange,
        &mut outbox,
        10,
        "alice",
        json!({
            "type": "PLACE_ORDER_LIMIT",
            "payload": {"bookId": 0, "direction": "SELL", "price": 100.0, "volume": 2.0},
        }),
    );
    deliver(
        &mut exchange,
        &mut outbox,
        20,
        "bob",
        json!({
            "type": "PLACE_ORDER_LIMIT",
            "payload": {"bookId": 0, "direction": "BUY", "price": 100.0, "volume": 1.5},
        }),
    );

    // Notional 150 traded: maker fee 0.15, taker fee 0.30.
    let alice = exchange.account(AgentId(1)).unwrap();
    assert_eq!(alice.base.total(), dec!(8.5));
    assert_eq!(alice.base.reserved(), dec!(0.5), "unfilled ask stays reserved");
    assert_eq!(alice.quote.total(), dec!(10149.85));

    let bob = exchange.account(AgentId(2)).unwrap();
    assert_eq!(bob.base.total(), dec!(11.5));
    assert_eq!(bob.quote.total(), dec!(9849.70));

    // Book volume invariant: each side's aggregate equals the sum over orders.
    let book = exchange.book(BookId(0)).unwrap();
    for (side, container) in [
        (OrderDirection::Sell, book.asks()),
        (OrderDirection::Buy, book.bids()),
    ] {
        let from_orders: rust_decimal::Decimal = book
            .orders()
            .filter(|o| o.direction == side)
            .map(|o| o.total_volume())
            .sum();
        assert_eq!(container.volume(), from_orders);
    }
    assert_eq!(book.asks().volume(), dec!(0.5));
}

#[test]
fn rejections_travel_as_error_responses() {
    let (mut sim, log) = wire_simulation();

    // Book 3 does not exist on this block.
    sim.queue_message(request(
        5,
        "alice",
        json!({
            "type": "PLACE_ORDER_LIMIT",
            "payload": {"bookId": 3, "direction": "BUY", "price": 1.0, "volume": 1.0},
        }),
    ));
    sim.run().unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    match &log[0].2 {
        Payload::PlaceOrderLimitErrorResponse(error) => {
            assert_eq!(error.reason, RejectionReason::UnknownBookId);
            assert_eq!(error.request_payload.book_id, BookId(3));
        }
        other => panic!("expected error response, got {other:?}"),
    }
}

#[test]
fn wire_stp_and_expiry_fields_reach_the_order() {
    let (mut sim, log) = wire_simulation();

    sim.queue_message(request(
        1,
        "alice",
        json!({
            "type": "PLACE_ORDER_LIMIT",
            "payload": {
                "bookId": 0,
                "direction": "SELL",
                "price": 100.0,
                "volume": 1.0,
                "stpFlag": "CANCEL_BOTH",
                "timeInForce": "GTC",
                "expiryPeriod": 1000,
                "clientOrderId": 77,
            },
        }),
    ));
    sim.run().unwrap();

    let log = log.borrow();
    match &log[0].2 {
        Payload::PlaceOrderLimitResponse(response) => {
            let request = &response.request_payload;
            assert_eq!(request.stp_flag, StpFlag::CancelBoth);
            assert_eq!(request.expiry_period, Some(Timespan(1000)));
            assert_eq!(request.client_order_id.map(|c| c.0), Some(77));
        }
        other => panic!("expected response, got {other:?}"),
    }
}
