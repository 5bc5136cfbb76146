use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::{
    accounting::{Balance, Balances},
    agent::{Agent, AgentCtx},
    book::{Book, Order, Tick},
    decimal::round,
    error::{AccountingError, BookError, MultibookResult},
    event::{
        Cancellation, CancellationEvent, L3Entry, L3Record, L3RecordContainer, OrderEvent, Trade,
        TradeContext,
    },
    exchange::fees::{FeePolicy, TradeDesc},
    message::{
        EXCHANGE_TARGET, Message, Payload, RejectionReason,
        payload::{
            CancelOrdersErrorResponsePayload, CancelOrdersPayload, CancelOrdersResponsePayload,
            EventTradePayload, PlaceOrderLimitErrorResponsePayload, PlaceOrderLimitPayload,
            PlaceOrderLimitResponsePayload, PlaceOrderMarketErrorResponsePayload,
            PlaceOrderMarketPayload, PlaceOrderMarketResponsePayload, RetrieveBookPayload,
            RetrieveL1Payload, RetrieveL1ResponsePayload, RetrieveOrdersPayload,
            RetrieveOrdersResponsePayload, BookStateMessagePayload,
        },
    },
    subscription::SubscriptionRegistry,
    types::{AgentId, BookId, OrderDirection, OrderId, StpFlag, TimeInForce, Timespan, Timestamp},
};

/// What happened to an aggressing order inside the matching loop.
#[derive(Debug, Default)]
struct MatchOutcome {
    trades: Vec<Trade>,
    /// Set when self-trade prevention cancelled the aggressor's remainder.
    aggressor_cancelled: bool,
}

/// The multi-book exchange agent of one compute block.
///
/// Owns the block's books, every agent's balances and loans, the fee policy,
/// and the per-book L3 record, for the lifetime of the simulation. All state
/// mutation happens inside this agent's handlers; traders only ever see it
/// through request/response payloads and trade events.
pub struct MultiBookExchangeAgent {
    name: String,
    books: Vec<Book>,
    accounts: BTreeMap<AgentId, Balances>,
    trader_names: BTreeMap<String, AgentId>,
    fee_policy: Box<dyn FeePolicy + Send>,
    maintenance_margin: Decimal,
    response_delay: Timespan,
    next_order_id: u64,
    next_margin_call_id: u64,
    pending_liquidations: Vec<(BookId, AgentId)>,
    l3: L3RecordContainer,
    trade_subs: SubscriptionRegistry<String>,
}

impl MultiBookExchangeAgent {
    pub fn new(book_count: usize, fee_policy: Box<dyn FeePolicy + Send>) -> Self {
        Self {
            name: EXCHANGE_TARGET.to_string(),
            books: (0..book_count).map(|i| Book::new(BookId(i as u32))).collect(),
            accounts: BTreeMap::new(),
            trader_names: BTreeMap::new(),
            fee_policy,
            maintenance_margin: Decimal::new(25, 2),
            response_delay: Timespan(0),
            next_order_id: 0,
            next_margin_call_id: 0,
            pending_liquidations: Vec::new(),
            l3: L3RecordContainer::new(book_count),
            trade_subs: SubscriptionRegistry::new(),
        }
    }

    /// Maintenance fraction of outstanding debt an account's equity must
    /// cover; falling below triggers a margin call.
    pub fn with_maintenance_margin(mut self, maintenance_margin: Decimal) -> Self {
        self.maintenance_margin = maintenance_margin;
        self
    }

    pub fn with_response_delay(mut self, response_delay: Timespan) -> Self {
        self.response_delay = response_delay;
        self
    }

    /// Registers a trader's account under its target name.
    pub fn register_trader(
        &mut self,
        name: impl Into<String>,
        agent_id: AgentId,
        balances: Balances,
    ) {
        self.trader_names.insert(name.into(), agent_id);
        self.accounts.insert(agent_id, balances);
    }

    /// Subscribes a target name to `EventTrade` notifications. Duplicates
    /// are rejected; delivery follows subscription order.
    pub fn subscribe_trades(&mut self, name: impl Into<String>) -> bool {
        self.trade_subs.add(name.into())
    }

    pub fn book(&self, book_id: BookId) -> Result<&Book, BookError> {
        self.books
            .get(book_id.0 as usize)
            .ok_or(BookError::UnknownBookId(book_id))
    }

    pub fn account(&self, agent_id: AgentId) -> Option<&Balances> {
        self.accounts.get(&agent_id)
    }

    pub fn l3(&self) -> &L3RecordContainer {
        &self.l3
    }

    fn book_index(&self, book_id: BookId) -> Result<usize, RejectionReason> {
        let idx = book_id.0 as usize;
        if idx < self.books.len() {
            Ok(idx)
        } else {
            Err(RejectionReason::UnknownBookId)
        }
    }

    fn alloc_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    // ============================================================================================
    // Placement
    // ============================================================================================

    fn handle_place_market(
        &mut self,
        agent_id: AgentId,
        request: &PlaceOrderMarketPayload,
        now: Timestamp,
    ) -> Result<(OrderId, Vec<Trade>), RejectionReason> {
        let book_idx = self.book_index(request.book_id)?;
        if request.volume <= Decimal::ZERO {
            return Err(RejectionReason::InvalidVolume);
        }
        let volume = round(request.volume);

        // A leveraged market order borrows at the touch price.
        let reference_price = if request.leverage > Decimal::ONE {
            let Some(touch) = self.books[book_idx]
                .side(request.direction.opposite())
                .best()
                .map(Tick::price)
            else {
                debug!(agent = %agent_id, "no reference price for leveraged market order");
                return Err(RejectionReason::InsufficientFunds);
            };
            let account = self
                .accounts
                .get_mut(&agent_id)
                .ok_or(RejectionReason::InsufficientFunds)?;
            if let Err(e) = account.open_loan(request.direction, volume, touch, request.leverage) {
                debug!(agent = %agent_id, error = %e, "placement rejected on funding");
                return Err(RejectionReason::InsufficientFunds);
            }
            Some(touch)
        } else {
            None
        };

        let mut order = Order {
            id: self.alloc_order_id(),
            agent_id,
            client_order_id: request.client_order_id,
            direction: request.direction,
            price: None,
            volume,
            leverage: request.leverage,
            time_in_force: None,
            post_only: None,
            expiry_period: None,
            stp_flag: request.stp_flag,
            timestamp: now,
        };

        let book = &mut self.books[book_idx];
        let record = self
            .l3
            .record_mut(book_idx)
            .ok_or(RejectionReason::UnknownBookId)?;
        record.push(L3Entry::Place(OrderEvent::new(order.clone())));

        let outcome = match_order(
            book,
            &mut self.accounts,
            self.fee_policy.as_ref(),
            record,
            request.book_id,
            &mut order,
            now,
        );

        // The unfilled remainder of a market order never rests; a leveraged
        // one hands the remainder's borrowed principal back to free funds.
        if let Some(reference_price) = reference_price {
            let remainder = order.total_volume();
            if !remainder.is_zero() {
                if let Some(account) = self.accounts.get_mut(&agent_id) {
                    let result = match order.direction {
                        OrderDirection::Buy => account.quote.release(reference_price * remainder),
                        OrderDirection::Sell => account.base.release(remainder),
                    };
                    if let Err(e) = result {
                        warn!(order = %order.id, error = %e, "unfilled principal release failed");
                    }
                }
            }
        }

        if outcome.trades.is_empty() && outcome.aggressor_cancelled {
            return Err(RejectionReason::SelfTradePrevented);
        }
        Ok((order.id, outcome.trades))
    }

    fn handle_place_limit(
        &mut self,
        agent_id: AgentId,
        request: &PlaceOrderLimitPayload,
        now: Timestamp,
    ) -> Result<(OrderId, Vec<Trade>), RejectionReason> {
        let book_idx = self.book_index(request.book_id)?;
        if request.volume <= Decimal::ZERO || request.price <= Decimal::ZERO {
            return Err(RejectionReason::InvalidVolume);
        }

        let price = round(request.price);
        let volume = round(request.volume);
        let opposite = request.direction.opposite();
        let crosses = |best: Decimal| match request.direction {
            OrderDirection::Buy => best <= price,
            OrderDirection::Sell => best >= price,
        };

        if request.post_only == Some(true)
            && self.books[book_idx]
                .side(opposite)
                .best()
                .is_some_and(|tick| crosses(tick.price()))
        {
            return Err(RejectionReason::PostOnlyCross);
        }

        if request.time_in_force == Some(TimeInForce::Fok) {
            let matchable = matchable_volume(
                &self.books[book_idx],
                agent_id,
                request.direction,
                price,
                request.stp_flag,
                volume,
                now,
            );
            if matchable < volume {
                return Err(RejectionReason::FillOrKillUnsatisfiable);
            }
        }

        // Funds are encumbered before matching: a plain order reserves its
        // notional, a leveraged one opens a loan (principal + collateral).
        let account = self
            .accounts
            .get_mut(&agent_id)
            .ok_or(RejectionReason::InsufficientFunds)?;
        let funded = if request.leverage > Decimal::ONE {
            account
                .open_loan(request.direction, volume, price, request.leverage)
                .map(|_| ())
        } else {
            match request.direction {
                OrderDirection::Buy => account.quote.reserve(price * volume).map(|_| ()),
                OrderDirection::Sell => account.base.reserve(volume).map(|_| ()),
            }
        };
        if let Err(e) = funded {
            debug!(agent = %agent_id, error = %e, "placement rejected on funding");
            return Err(RejectionReason::InsufficientFunds);
        }

        let mut order = Order {
            id: self.alloc_order_id(),
            agent_id,
            client_order_id: request.client_order_id,
            direction: request.direction,
            price: Some(price),
            volume,
            leverage: request.leverage,
            time_in_force: request.time_in_force,
            post_only: request.post_only,
            expiry_period: request.expiry_period,
            stp_flag: request.stp_flag,
            timestamp: now,
        };

        let book = &mut self.books[book_idx];
        let record = self
            .l3
            .record_mut(book_idx)
            .ok_or(RejectionReason::UnknownBookId)?;
        record.push(L3Entry::Place(OrderEvent::new(order.clone())));

        let outcome = match_order(
            book,
            &mut self.accounts,
            self.fee_policy.as_ref(),
            record,
            request.book_id,
            &mut order,
            now,
        );

        if outcome.aggressor_cancelled && outcome.trades.is_empty() {
            release_remainder(&mut self.accounts, &order);
            return Err(RejectionReason::SelfTradePrevented);
        }

        if !order.total_volume().is_zero() {
            if order.time_in_force == Some(TimeInForce::Fok) {
                // All-or-nothing holds even if the admission check and the
                // match loop ever disagree.
                warn!(order = %order.id, "fill-or-kill left a remainder");
                release_remainder(&mut self.accounts, &order);
                return Err(RejectionReason::FillOrKillUnsatisfiable);
            }
            let cancel_remainder =
                outcome.aggressor_cancelled || order.time_in_force == Some(TimeInForce::Ioc);
            if cancel_remainder {
                release_remainder(&mut self.accounts, &order);
                record.push(L3Entry::Cancel(CancellationEvent {
                    cancellation: Cancellation::partial(order.id, order.total_volume()),
                    timestamp: now,
                    price,
                }));
            } else if let Err(e) = book.place_resting(order.clone()) {
                warn!(order = %order.id, error = %e, "failed to rest remainder");
            }
        }

        Ok((order.id, outcome.trades))
    }

    // ============================================================================================
    // Cancellation
    // ============================================================================================

    fn handle_cancel_orders(
        &mut self,
        request: &CancelOrdersPayload,
        now: Timestamp,
    ) -> Result<(), RejectionReason> {
        let book_idx = self.book_index(request.book_id)?;
        for cancellation in &request.cancellations {
            self.cancel_one(book_idx, cancellation, now)
                .map_err(|_| RejectionReason::UnknownOrderId)?;
        }
        Ok(())
    }

    fn cancel_one(
        &mut self,
        book_idx: usize,
        cancellation: &Cancellation,
        now: Timestamp,
    ) -> Result<(), BookError> {
        let book = &mut self.books[book_idx];
        let order = book.order(cancellation.id)?.clone();
        let outcome = book.cancel(cancellation.id, cancellation.volume)?;

        release_volume(&mut self.accounts, &order, outcome.cancelled_volume);
        if let Some(record) = self.l3.record_mut(book_idx) {
            record.push(L3Entry::Cancel(CancellationEvent {
                cancellation: *cancellation,
                timestamp: now,
                price: outcome.price,
            }));
        }
        Ok(())
    }

    // ============================================================================================
    // Margin
    // ============================================================================================

    /// Enqueues a liquidation for every borrower on `book_id` whose equity no
    /// longer covers the maintenance fraction of its debt, marked to the
    /// book's last trade price.
    fn check_margin(&mut self, ctx: &mut AgentCtx<'_>, book_id: BookId) -> MultibookResult<()> {
        let Ok(book_idx) = self.book_index(book_id) else {
            return Ok(());
        };
        let Some(mark) = self.books[book_idx].last_trade_price() else {
            return Ok(());
        };

        let mut calls: Vec<(AgentId, Vec<Cancellation>)> = Vec::new();
        for (agent_id, account) in &self.accounts {
            if !account.has_loans() {
                continue;
            }
            if self
                .pending_liquidations
                .iter()
                .any(|(b, a)| *b == book_id && a == agent_id)
            {
                continue;
            }
            let debt = account.quote_loan() + account.base_loan() * mark;
            let equity =
                account.quote.total() + account.base.total() * mark - debt;
            if equity < self.maintenance_margin * debt {
                let cancellations = self.books[book_idx]
                    .agent_orders(*agent_id)
                    .map(|order| Cancellation::full(order.id))
                    .collect();
                calls.push((*agent_id, cancellations));
            }
        }

        for (agent_id, cancellations) in calls {
            let margin_call_id = self.next_margin_call_id;
            self.next_margin_call_id += 1;
            warn!(agent = %agent_id, book = %book_id, margin_call_id, "margin call");
            self.pending_liquidations.push((book_id, agent_id));
            ctx.send_margin_call(
                Timespan(0),
                &self.name,
                Payload::CancelOrders(CancelOrdersPayload {
                    book_id,
                    cancellations,
                }),
                margin_call_id,
            )?;
        }
        Ok(())
    }

    /// Executes a previously scheduled liquidation: cancels the borrower's
    /// resting orders on the book and closes its loans. Orders that traded
    /// away between scheduling and delivery are simply gone.
    fn handle_liquidation(&mut self, request: &CancelOrdersPayload, now: Timestamp) {
        if let Ok(book_idx) = self.book_index(request.book_id) {
            for cancellation in &request.cancellations {
                if let Err(e) = self.cancel_one(book_idx, cancellation, now) {
                    debug!(order = %cancellation.id, error = %e, "liquidation cancel skipped");
                }
            }
        }

        let mut settled = Vec::new();
        self.pending_liquidations.retain(|(book_id, agent_id)| {
            if *book_id == request.book_id {
                settled.push(*agent_id);
                false
            } else {
                true
            }
        });
        for agent_id in settled {
            let Some(account) = self.accounts.get_mut(&agent_id) else {
                continue;
            };
            let loan_ids: Vec<_> = account.loans().map(|(id, _)| id).collect();
            for loan_id in loan_ids {
                if let Err(e) = account.close_loan(loan_id, Decimal::ZERO) {
                    warn!(agent = %agent_id, loan = %loan_id, error = %e, "liquidation left loan open");
                }
            }
        }
    }

    // ============================================================================================
    // Dispatch
    // ============================================================================================

    fn respond(
        &self,
        ctx: &mut AgentCtx<'_>,
        reply_to: &str,
        payload: Payload,
    ) -> MultibookResult<()> {
        ctx.send(self.response_delay, reply_to, payload)?;
        Ok(())
    }

    fn publish_trades(
        &self,
        ctx: &mut AgentCtx<'_>,
        book_id: BookId,
        trades: &[Trade],
    ) -> MultibookResult<()> {
        for trade in trades {
            for sub in &self.trade_subs {
                ctx.send(
                    Timespan(0),
                    sub,
                    Payload::EventTrade(EventTradePayload {
                        book_id,
                        context: TradeContext { book_id },
                        trade: *trade,
                    }),
                )?;
            }
        }
        Ok(())
    }

    fn process(
        &mut self,
        ctx: &mut AgentCtx<'_>,
        reply_to: &str,
        agent_id: AgentId,
        payload: &Payload,
        liquidation: bool,
    ) -> MultibookResult<()> {
        let now = ctx.now();
        match payload {
            Payload::PlaceOrderMarket(request) => {
                match self.handle_place_market(agent_id, request, now) {
                    Ok((order_id, trades)) => {
                        self.respond(
                            ctx,
                            reply_to,
                            Payload::PlaceOrderMarketResponse(PlaceOrderMarketResponsePayload {
                                order_id,
                                request_payload: request.clone(),
                            }),
                        )?;
                        self.publish_trades(ctx, request.book_id, &trades)?;
                        self.check_margin(ctx, request.book_id)?;
                    }
                    Err(reason) => {
                        debug!(agent = %agent_id, ?reason, "market order rejected");
                        self.respond(
                            ctx,
                            reply_to,
                            Payload::PlaceOrderMarketErrorResponse(
                                PlaceOrderMarketErrorResponsePayload {
                                    request_payload: request.clone(),
                                    reason,
                                },
                            ),
                        )?;
                    }
                }
            }
            Payload::PlaceOrderLimit(request) => {
                match self.handle_place_limit(agent_id, request, now) {
                    Ok((order_id, trades)) => {
                        self.respond(
                            ctx,
                            reply_to,
                            Payload::PlaceOrderLimitResponse(PlaceOrderLimitResponsePayload {
                                order_id,
                                request_payload: request.clone(),
                            }),
                        )?;
                        self.publish_trades(ctx, request.book_id, &trades)?;
                        self.check_margin(ctx, request.book_id)?;
                    }
                    Err(reason) => {
                        debug!(agent = %agent_id, ?reason, "limit order rejected");
                        self.respond(
                            ctx,
                            reply_to,
                            Payload::PlaceOrderLimitErrorResponse(
                                PlaceOrderLimitErrorResponsePayload {
                                    request_payload: request.clone(),
                                    reason,
                                },
                            ),
                        )?;
                    }
                }
            }
            Payload::CancelOrders(request) => {
                if liquidation {
                    self.handle_liquidation(request, now);
                    return Ok(());
                }
                match self.handle_cancel_orders(request, now) {
                    Ok(()) => self.respond(
                        ctx,
                        reply_to,
                        Payload::CancelOrdersResponse(CancelOrdersResponsePayload {
                            request_payload: request.clone(),
                        }),
                    )?,
                    Err(reason) => self.respond(
                        ctx,
                        reply_to,
                        Payload::CancelOrdersErrorResponse(CancelOrdersErrorResponsePayload {
                            request_payload: request.clone(),
                            reason,
                        }),
                    )?,
                }
            }
            Payload::RetrieveOrders(RetrieveOrdersPayload { book_id }) => {
                match self.book(*book_id) {
                    Ok(book) => {
                        let orders = book
                            .agent_orders(agent_id)
                            .map(Order::json_value)
                            .collect();
                        self.respond(
                            ctx,
                            reply_to,
                            Payload::RetrieveOrdersResponse(RetrieveOrdersResponsePayload {
                                book_id: *book_id,
                                orders,
                            }),
                        )?;
                    }
                    Err(e) => debug!(%book_id, error = %e, "order retrieval ignored"),
                }
            }
            Payload::RetrieveL1(RetrieveL1Payload { book_id }) => match self.book(*book_id) {
                Ok(book) => {
                    let l1 = book.l1();
                    self.respond(
                        ctx,
                        reply_to,
                        Payload::RetrieveL1Response(RetrieveL1ResponsePayload {
                            book_id: *book_id,
                            l1,
                        }),
                    )?;
                }
                Err(e) => debug!(%book_id, error = %e, "L1 retrieval ignored"),
            },
            Payload::RetrieveBook(RetrieveBookPayload { book_id }) => match self.book(*book_id) {
                Ok(book) => {
                    let state = book.json_value().to_string();
                    self.respond(
                        ctx,
                        reply_to,
                        Payload::BookState(BookStateMessagePayload {
                            book_state_json_str: state,
                        }),
                    )?;
                }
                Err(e) => debug!(%book_id, error = %e, "book retrieval ignored"),
            },
            other => {
                debug!(payload_type = %other.type_string(), "payload not handled by the exchange");
            }
        }
        Ok(())
    }
}

impl Agent for MultiBookExchangeAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, ctx: &mut AgentCtx<'_>, msg: &Message) -> MultibookResult<()> {
        match &msg.payload {
            Payload::DistributedAgentResponse(wrapper) => {
                let payload = wrapper.payload.as_ref().clone();
                self.process(ctx, &msg.source, wrapper.agent_id, &payload, false)
            }
            payload => {
                let liquidation = msg.source == self.name;
                let agent_id = if liquidation {
                    AgentId(-1)
                } else {
                    match self.trader_names.get(&msg.source) {
                        Some(agent_id) => *agent_id,
                        None => {
                            warn!(source = %msg.source, "message from unregistered trader dropped");
                            return Ok(());
                        }
                    }
                };
                self.process(ctx, &msg.source, agent_id, payload, liquidation)
            }
        }
    }
}

// ================================================================================================
// Matching internals
// ================================================================================================

/// Volume the match loop would actually consume for an aggressor of
/// `agent_id` at prices crossing `limit`, capped at `needed`.
///
/// Expired resting orders and own orders the STP flag would purge contribute
/// nothing; a CANCEL_NEWEST or CANCEL_BOTH self-match cancels the aggressor,
/// so the scan stops there. A DECREMENT_BOTH self-match consumes aggressor
/// volume without a trade and still counts.
fn matchable_volume(
    book: &Book,
    agent_id: AgentId,
    direction: OrderDirection,
    limit: Decimal,
    stp_flag: StpFlag,
    needed: Decimal,
    now: Timestamp,
) -> Decimal {
    let mut matchable = Decimal::ZERO;
    'ladder: for tick in book.side(direction.opposite()).iter() {
        let crosses = match direction {
            OrderDirection::Buy => tick.price() <= limit,
            OrderDirection::Sell => tick.price() >= limit,
        };
        if !crosses {
            break;
        }
        for id in tick.iter() {
            let Ok(resting) = book.order(id) else {
                continue;
            };
            if resting.is_expired(now) {
                continue;
            }
            if resting.agent_id == agent_id {
                match stp_flag {
                    StpFlag::CancelOldest => continue,
                    StpFlag::CancelNewest | StpFlag::CancelBoth => break 'ladder,
                    StpFlag::DecrementBoth => {}
                }
            }
            matchable += resting.total_volume();
            if matchable >= needed {
                break 'ladder;
            }
        }
    }
    matchable
}

/// Price-time matching of one aggressing order against the opposite ladder.
///
/// Every volume change routes through the book API so the tick and ladder
/// aggregates stay exact; every trade settles both accounts and charges fees
/// before the next iteration.
fn match_order(
    book: &mut Book,
    accounts: &mut BTreeMap<AgentId, Balances>,
    fee_policy: &dyn FeePolicy,
    record: &mut L3Record,
    book_id: BookId,
    order: &mut Order,
    now: Timestamp,
) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();
    let resting_side = order.direction.opposite();

    while !order.total_volume().is_zero() {
        let Some(best) = book.side(resting_side).best() else {
            break;
        };
        let best_price = best.price();
        if let Some(limit) = order.price {
            let crosses = match order.direction {
                OrderDirection::Buy => best_price <= limit,
                OrderDirection::Sell => best_price >= limit,
            };
            if !crosses {
                break;
            }
        }
        let Some(front_id) = best.front() else {
            break;
        };
        let resting = match book.order(front_id) {
            Ok(order) => order.clone(),
            Err(e) => {
                warn!(order = %front_id, error = %e, "front of tick missing from arena");
                break;
            }
        };

        // Lazily purge resting orders whose time in force ran out.
        if resting.is_expired(now) {
            purge_resting(book, accounts, record, &resting, now);
            continue;
        }

        // Self-trade prevention.
        if resting.agent_id == order.agent_id {
            match order.stp_flag {
                StpFlag::CancelOldest => {
                    purge_resting(book, accounts, record, &resting, now);
                    continue;
                }
                StpFlag::CancelNewest => {
                    outcome.aggressor_cancelled = true;
                    break;
                }
                StpFlag::CancelBoth => {
                    purge_resting(book, accounts, record, &resting, now);
                    outcome.aggressor_cancelled = true;
                    break;
                }
                StpFlag::DecrementBoth => {
                    let decrement = order.total_volume().min(resting.total_volume());
                    if let Ok(cancelled) = book.cancel(resting.id, Some(decrement)) {
                        release_volume(accounts, &resting, cancelled.cancelled_volume);
                        record.push(L3Entry::Cancel(CancellationEvent {
                            cancellation: Cancellation::partial(resting.id, decrement),
                            timestamp: now,
                            price: cancelled.price,
                        }));
                    }
                    release_volume(accounts, order, decrement);
                    order.fill(decrement);
                    continue;
                }
            }
        }

        let volume = order.total_volume().min(resting.total_volume());
        let trade = Trade {
            resting_order_id: resting.id,
            aggressing_order_id: order.id,
            resting_agent_id: resting.agent_id,
            aggressing_agent_id: order.agent_id,
            direction: order.direction,
            price: best_price,
            volume,
            timestamp: now,
        };

        if !settle_trade(accounts, fee_policy, book_id, &resting, order, &trade) {
            // The aggressor cannot pay for this fill; stop matching and let
            // the remainder be handled by the caller's TIF logic.
            break;
        }

        if let Err(e) = book.fill_order(resting.id, volume) {
            warn!(order = %resting.id, error = %e, "fill failed after settlement");
            break;
        }
        order.fill(volume);
        book.set_last_trade_price(best_price);
        record.push(L3Entry::Trade(trade));
        outcome.trades.push(trade);
    }

    outcome
}

/// Cancels a resting order outright, releasing its reservation.
fn purge_resting(
    book: &mut Book,
    accounts: &mut BTreeMap<AgentId, Balances>,
    record: &mut L3Record,
    resting: &Order,
    now: Timestamp,
) {
    match book.cancel(resting.id, None) {
        Ok(outcome) => {
            release_volume(accounts, resting, outcome.cancelled_volume);
            record.push(L3Entry::Cancel(CancellationEvent {
                cancellation: Cancellation::full(resting.id),
                timestamp: now,
                price: outcome.price,
            }));
        }
        Err(e) => warn!(order = %resting.id, error = %e, "purge failed"),
    }
}

/// Releases the reservation behind `volume` units of a priced order: the
/// quote notional for a buy, the base size for a sell. Loan collateral stays
/// encumbered until the loan itself closes.
fn release_volume(accounts: &mut BTreeMap<AgentId, Balances>, order: &Order, volume: Decimal) {
    let Some(price) = order.price else {
        return;
    };
    let Some(account) = accounts.get_mut(&order.agent_id) else {
        return;
    };
    let result = match order.direction {
        OrderDirection::Buy => account.quote.release(price * volume),
        OrderDirection::Sell => account.base.release(volume),
    };
    if let Err(e) = result {
        warn!(order = %order.id, error = %e, "reservation release failed");
    }
}

/// Releases whatever is still encumbered behind an order's unfilled volume.
fn release_remainder(accounts: &mut BTreeMap<AgentId, Balances>, order: &Order) {
    release_volume(accounts, order, order.total_volume());
}

/// Moves funds for one trade and charges fees. Returns `false` (without
/// side effects) when the aggressor cannot pay, which stops the match loop.
fn settle_trade(
    accounts: &mut BTreeMap<AgentId, Balances>,
    fee_policy: &dyn FeePolicy,
    book_id: BookId,
    resting: &Order,
    aggressor: &Order,
    trade: &Trade,
) -> bool {
    let cost = trade.price * trade.volume;
    let volume = trade.volume;

    // Market aggressors settle without a per-order reservation; check first
    // so a failed settlement has no effects. A leveraged one may also draw
    // on the reservation its loan made at admission.
    if aggressor.price.is_none() {
        let leveraged = aggressor.leverage > Decimal::ONE;
        let affordable = accounts.get(&aggressor.agent_id).is_some_and(|account| {
            let (balance, needed) = match aggressor.direction {
                OrderDirection::Buy => (&account.quote, cost),
                OrderDirection::Sell => (&account.base, volume),
            };
            let available = if leveraged {
                balance.free() + balance.reserved()
            } else {
                balance.free()
            };
            available >= needed
        });
        if !affordable {
            debug!(order = %aggressor.id, "market order stopped on funds");
            return false;
        }
    }

    let fees = fee_policy.calculate_fees(&TradeDesc {
        book_id,
        resting_agent_id: resting.agent_id,
        aggressing_agent_id: aggressor.agent_id,
        trade,
    });

    // Aggressor leg.
    if let Some(account) = accounts.get_mut(&aggressor.agent_id) {
        match aggressor.direction {
            OrderDirection::Buy => {
                let paid = match aggressor.price {
                    Some(limit) => {
                        let committed = account.quote.commit(cost);
                        // Price improvement frees part of the reservation.
                        if limit > trade.price {
                            let _ = account.quote.release((limit - trade.price) * volume);
                        }
                        committed
                    }
                    None => draw_market_funds(
                        &mut account.quote,
                        cost,
                        aggressor.leverage > Decimal::ONE,
                    ),
                };
                if let Err(e) = paid {
                    warn!(order = %aggressor.id, error = %e, "aggressor quote leg failed");
                }
                account.base.credit(volume);
            }
            OrderDirection::Sell => {
                let paid = match aggressor.price {
                    Some(_) => account.base.commit(volume),
                    None => draw_market_funds(
                        &mut account.base,
                        volume,
                        aggressor.leverage > Decimal::ONE,
                    ),
                };
                if let Err(e) = paid {
                    warn!(order = %aggressor.id, error = %e, "aggressor base leg failed");
                }
                account.quote.credit(cost);
            }
        }
        charge_fee(&mut account.quote, fees.taker);
    }

    // Resting leg: the maker's reservation was taken at its own limit price,
    // which is the trade price.
    if let Some(account) = accounts.get_mut(&resting.agent_id) {
        match resting.direction {
            OrderDirection::Buy => {
                if let Err(e) = account.quote.commit(cost) {
                    warn!(order = %resting.id, error = %e, "maker quote leg failed");
                }
                account.base.credit(volume);
            }
            OrderDirection::Sell => {
                if let Err(e) = account.base.commit(volume) {
                    warn!(order = %resting.id, error = %e, "maker base leg failed");
                }
                account.quote.credit(cost);
            }
        }
        charge_fee(&mut account.quote, fees.maker);
    }

    true
}

/// Funds one market fill: a leveraged order draws on its loan reservation
/// first and tops up from free funds, a plain one pays from free funds only.
fn draw_market_funds(
    balance: &mut Balance,
    amount: Decimal,
    leveraged: bool,
) -> Result<Decimal, AccountingError> {
    if !leveraged {
        return balance.debit(amount);
    }
    let from_reserved = amount.min(balance.reserved());
    balance.commit(from_reserved)?;
    balance.debit(amount - from_reserved)?;
    Ok(amount)
}

/// Fees come out of free quote funds, capped at what is actually there.
fn charge_fee(balance: &mut Balance, fee: Decimal) {
    if fee.is_zero() {
        return;
    }
    let charged = fee.min(balance.free());
    if let Err(e) = balance.debit(charged) {
        warn!(error = %e, "fee charge failed");
    }
}
