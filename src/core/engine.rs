// src/core/engine.rs
use crate::config::TradeConfig;
use crate::connectors::traits::{ExchangeClient, StreamClient};
use crate::core::constraints::{ConstraintModel, QtyBand};
use crate::core::lock::LockWaiter;
use crate::core::report;
use crate::core::resolver::{
    clip_target, eligibility, evaluate_tick, oco_stop, plan_sell, price_targets,
    resting_order_touched, Eligibility, RestingOrder, SellPlan, TickDecision, TickInput, Trigger,
};
use crate::error::{ExchangeError, TradeError};
use crate::types::{OrderHandle, OrderKind, Position, TradeTick};
use crate::utils::precision::percent_change;
use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

const STREAM_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Locked,
    Buying,
    Selling,
    Done,
    BailedOut,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleKind {
    Market,
    Limit,
    Oco,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleReport {
    pub kind: SaleKind,
    pub executed_qty: Decimal,
    /// Average fill price (market) or order price (limit/OCO leg).
    pub price: Decimal,
    pub profit_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Sold(SaleReport),
    /// `None` when nothing was left to liquidate.
    BailedOut(Option<SaleReport>),
    /// Stopped without liquidating; a resting order, if any, stays on the book.
    Interrupted { resting: Option<OrderHandle> },
}

/// Per-cycle data fixed at lock time.
#[derive(Clone)]
struct CycleContext {
    symbol: String,
    constraints: Arc<ConstraintModel>,
    plan: SellPlan,
}

pub struct TradeEngine {
    config: Arc<TradeConfig>,
    exchange: Arc<dyn ExchangeClient>,
    stream: Arc<dyn StreamClient>,
    waiter: Option<LockWaiter>,
    quote_amount: Decimal,
    state: EngineState,
    context: Option<CycleContext>,
    position: Option<Position>,
    /// Set once holdings exist; cleared while a liquidating sell is in flight.
    bailout_armed: bool,
}

impl TradeEngine {
    pub fn new(
        config: Arc<TradeConfig>,
        exchange: Arc<dyn ExchangeClient>,
        stream: Arc<dyn StreamClient>,
        waiter: LockWaiter,
        quote_amount: Decimal,
    ) -> Self {
        Self {
            config,
            exchange,
            stream,
            waiter: Some(waiter),
            quote_amount,
            state: EngineState::Idle,
            context: None,
            position: None,
            bailout_armed: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Waits until an input channel wins the pair lock.
    pub async fn await_lock(&mut self) -> Result<(), TradeError> {
        let waiter = self.waiter.take().ok_or_else(|| TradeError::InvalidState {
            expected: "Idle",
            actual: self.state.to_string(),
        })?;
        let pair = waiter.wait().await?;

        let plan = plan_sell(
            self.config.sell_strategy,
            self.config.stop_enabled(),
            pair.oco_allowed,
        );
        let constraints = ConstraintModel::new(pair);
        report::pair_locked(constraints.pair(), constraints.ticks(), &plan);

        self.context = Some(CycleContext {
            symbol: constraints.pair().symbol.clone(),
            constraints: Arc::new(constraints),
            plan,
        });
        self.state = EngineState::Locked;
        Ok(())
    }

    /// Runs the buy and the sell. `interrupt` resolving preempts the cycle at
    /// its next suspension point and triggers the bailout (when enabled).
    pub async fn run<F>(&mut self, interrupt: F) -> Result<CycleOutcome, TradeError>
    where
        F: Future<Output = ()>,
    {
        if self.state != EngineState::Locked {
            return Err(TradeError::InvalidState {
                expected: "Locked",
                actual: self.state.to_string(),
            });
        }

        let finished = {
            let cycle = self.trade_cycle();
            tokio::pin!(cycle);
            tokio::select! {
                res = &mut cycle => Some(res),
                _ = interrupt => None,
            }
        };

        match finished {
            Some(Ok(sale)) => {
                self.state = EngineState::Done;
                Ok(CycleOutcome::Sold(sale))
            }
            Some(Err(e)) => {
                self.state = EngineState::Failed;
                Err(e)
            }
            None => self.on_interrupt().await,
        }
    }

    async fn on_interrupt(&mut self) -> Result<CycleOutcome, TradeError> {
        if self.config.bailout && self.bailout_armed {
            return match self.bailout().await {
                Ok(sale) => {
                    self.state = EngineState::BailedOut;
                    Ok(CycleOutcome::BailedOut(sale))
                }
                Err(e) => {
                    self.state = EngineState::Failed;
                    Err(e)
                }
            };
        }
        let in_flight = !self.bailout_armed && self.position.is_some();
        if self.state == EngineState::Buying || in_flight {
            warn!("Interrupted while an order was in flight, verify the exchange state manually");
        }
        self.state = EngineState::Failed;
        let resting = self.position.as_ref().and_then(|p| p.outstanding.clone());
        Ok(CycleOutcome::Interrupted { resting })
    }

    /// Cancels any resting order and sells everything left at market.
    /// No-op before the buy completes and on every call after the first.
    pub async fn bailout(&mut self) -> Result<Option<SaleReport>, TradeError> {
        if !self.bailout_armed {
            return Ok(None);
        }
        self.bailout_armed = false;
        let ctx = self.context()?;
        warn!("Bailing out, selling on market immediately!");

        self.cancel_outstanding(&ctx).await?;

        let position = self.position_mut()?;
        let qty = ctx.constraints.market_lot_amount(position.remaining_qty);
        if qty.is_zero() {
            info!("Nothing left to sell");
            return Ok(None);
        }
        let mean_buy_price = position.mean_buy_price;

        let order = self.exchange.sell_market(&ctx.symbol, qty).await?;
        report::market_order(&order, ctx.constraints.pair());
        let price = order.average_price()?;
        self.position_mut()?.reduce(order.executed_qty);

        Ok(Some(SaleReport {
            kind: SaleKind::Market,
            executed_qty: order.executed_qty,
            price,
            profit_percent: percent_change(price, mean_buy_price),
        }))
    }

    fn context(&self) -> Result<CycleContext, TradeError> {
        self.context.clone().ok_or_else(|| TradeError::InvalidState {
            expected: "Locked",
            actual: self.state.to_string(),
        })
    }

    fn position_mut(&mut self) -> Result<&mut Position, TradeError> {
        let state = self.state;
        self.position.as_mut().ok_or_else(|| TradeError::InvalidState {
            expected: "Selling",
            actual: state.to_string(),
        })
    }

    async fn trade_cycle(&mut self) -> Result<SaleReport, TradeError> {
        let ctx = self.context()?;
        self.buy(&ctx).await?;
        self.check_sell_eligibility(&ctx).await?;
        self.sell(&ctx).await
    }

    /// Market buy for the configured quote amount. Never retried.
    async fn buy(&mut self, ctx: &CycleContext) -> Result<(), TradeError> {
        self.state = EngineState::Buying;
        let pair = ctx.constraints.pair();
        let amount = ctx.constraints.quote_amount(self.quote_amount);
        info!(
            "[MARKET BUY] Buying {} with {} {}",
            pair.base_asset, amount, pair.quote_asset
        );

        let order = self.exchange.buy_market(&ctx.symbol, amount).await?;
        report::market_order(&order, pair);
        let mean_buy_price = order.average_price()?;

        let sellable = order.executed_qty - order.commission_in(&pair.base_asset);
        if sellable <= Decimal::ZERO {
            return Err(TradeError::Integrity(format!(
                "bought {} {} but nothing is left after commissions",
                order.executed_qty, pair.base_asset
            )));
        }

        let (target_price, stop_price) = price_targets(
            mean_buy_price,
            self.config.profit_percent,
            self.config.stop_percent,
        );
        self.position = Some(Position {
            symbol: ctx.symbol.clone(),
            bought_qty: order.executed_qty,
            mean_buy_price,
            target_price,
            stop_price,
            remaining_qty: sellable,
            outstanding: None,
        });
        self.bailout_armed = true;
        self.state = EngineState::Selling;
        Ok(())
    }

    /// Fails the cycle when the bought quantity cannot be sold under the current filters.
    async fn check_sell_eligibility(&mut self, ctx: &CycleContext) -> Result<(), TradeError> {
        let avg = self.exchange.avg_price(&ctx.symbol).await?;
        let position = self.position_mut()?;
        let constraints = &ctx.constraints;

        let band: QtyBand = match ctx.plan.resting {
            RestingOrder::None => constraints.qty_band(avg, true),
            resting => {
                let prices = constraints.price_band(avg);
                let target = position.target_price.min(prices.high);
                let mut band = constraints.qty_band(target, false);
                if resting == RestingOrder::Oco {
                    let (stop, _) = oco_stop(position.stop_price, prices);
                    band.low = band.low.max(constraints.qty_band(stop, false).low);
                }
                band
            }
        };

        match eligibility(position.remaining_qty, band) {
            Eligibility::OutOfBounds => Err(TradeError::BoundsViolation {
                what: "sell quantity",
                value: position.remaining_qty,
                low: band.low,
                high: band.high,
            }),
            Eligibility::NearLimits => {
                report::near_limits(position.remaining_qty, &band);
                Ok(())
            }
            Eligibility::Clear => Ok(()),
        }
    }

    async fn sell(&mut self, ctx: &CycleContext) -> Result<SaleReport, TradeError> {
        let mut trades = self.subscribe(ctx).await?;
        let retry_interval = Duration::from_millis(self.config.retry_interval_ms);
        let mut next_placement = Instant::now();
        let mut next_fill_check = Instant::now();

        if ctx.plan.resting != RestingOrder::None {
            self.place_resting(ctx).await?;
            next_placement = Instant::now() + retry_interval;
        }

        let mut last_price = None;
        loop {
            let tick = self.next_tick(ctx, &mut trades).await?;
            let position = self.position_mut()?;
            let decision = evaluate_tick(
                &ctx.plan,
                TickInput {
                    price: tick.price,
                    last_price,
                    mean_buy_price: position.mean_buy_price,
                    target: position.target_price,
                    stop: position.stop_price,
                    resting: position.outstanding.is_some(),
                },
            );
            last_price = Some(tick.price);

            match decision {
                TickDecision::Repeat => continue,
                TickDecision::Hold { profit } => {
                    report::price_tick(ctx.constraints.pair(), tick.price, profit);
                    let touched = position.outstanding.as_ref().map(|order| {
                        resting_order_touched(tick.price, order.price, order.stop_price)
                    });
                    match touched {
                        Some(true) if Instant::now() >= next_fill_check => {
                            next_fill_check = Instant::now() + retry_interval;
                            if let Some(sale) = self.check_resting_fill(ctx, tick.price).await? {
                                return Ok(sale);
                            }
                        }
                        Some(_) => {}
                        None if ctx.plan.resting != RestingOrder::None
                            && Instant::now() >= next_placement =>
                        {
                            self.place_resting(ctx).await?;
                            next_placement = Instant::now() + retry_interval;
                        }
                        None => {}
                    }
                }
                TickDecision::Fire { trigger, profit } => {
                    report::price_tick(ctx.constraints.pair(), tick.price, profit);
                    if let Some(sale) = self.fire_market_sell(ctx, trigger, tick.price).await? {
                        return Ok(sale);
                    }
                }
            }
        }
    }

    async fn subscribe(&self, ctx: &CycleContext) -> Result<mpsc::Receiver<TradeTick>, TradeError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.stream.subscribe_trades(&ctx.symbol, tx).await?;
        Ok(rx)
    }

    /// Next trade print, reopening the stream whenever it ends.
    async fn next_tick(
        &self,
        ctx: &CycleContext,
        trades: &mut mpsc::Receiver<TradeTick>,
    ) -> Result<TradeTick, TradeError> {
        let delay = Duration::from_millis(self.config.resubscribe_delay_ms);
        loop {
            if let Some(tick) = trades.recv().await {
                return Ok(tick);
            }
            warn!("Trade stream for {} closed, resubscribing", ctx.symbol);
            tokio::time::sleep(delay).await;
            match self.subscribe(ctx).await {
                Ok(rx) => *trades = rx,
                Err(TradeError::Exchange(ExchangeError::WebSocket(e))) => {
                    warn!("Resubscribe failed: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Tries to rest a limit or OCO sell at the (possibly lowered) target.
    /// Returns whether an order is now on the book.
    async fn place_resting(&mut self, ctx: &CycleContext) -> Result<bool, TradeError> {
        let avg = self.exchange.avg_price(&ctx.symbol).await?;
        let constraints = &ctx.constraints;
        let prices = constraints.price_band(avg);
        let min_profit = self.config.min_profit();
        let position = self.position_mut()?;

        let clip = clip_target(
            position.target_price,
            position.mean_buy_price,
            prices,
            min_profit,
        );
        report::target_clip(&clip, &prices);
        let Some(target) = clip.price() else {
            return Ok(false);
        };

        let price = constraints.price_amount(target);
        let qty = constraints.lot_amount(position.remaining_qty);
        let stop = match ctx.plan.resting {
            RestingOrder::Oco => Some(oco_stop(position.stop_price, prices)),
            _ => None,
        };

        let mut band = constraints.qty_band(price, false);
        if let Some((stop_price, _)) = stop {
            band.low = band.low.max(constraints.qty_band(stop_price, false).low);
        }
        if qty.is_zero() || !band.contains(qty) {
            report::bounds_skip("limit sell quantity", qty, &band);
            return Ok(false);
        }

        let placed = match stop {
            Some((stop_price, stop_limit)) => {
                let stop_price = constraints.price_amount(stop_price);
                let stop_limit = constraints.price_amount(stop_limit);
                self.exchange
                    .sell_oco(&ctx.symbol, qty, price, stop_price, stop_limit)
                    .await
                    .map(|id| OrderHandle {
                        id,
                        kind: OrderKind::Oco,
                        qty,
                        price,
                        stop_price: Some(stop_price),
                    })
            }
            None => self
                .exchange
                .sell_limit(&ctx.symbol, qty, price)
                .await
                .map(|id| OrderHandle {
                    id,
                    kind: OrderKind::Limit,
                    qty,
                    price,
                    stop_price: None,
                }),
        };

        match placed {
            Ok(order) => {
                let position = self.position_mut()?;
                report::resting_placed(&order, position.mean_buy_price);
                position.outstanding = Some(order);
                Ok(true)
            }
            Err(e) if e.is_rejection() => {
                report::rejected("limit/OCO sell", &e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Polls the resting order; finishes the cycle once it is filled.
    async fn check_resting_fill(
        &mut self,
        ctx: &CycleContext,
        price: Decimal,
    ) -> Result<Option<SaleReport>, TradeError> {
        let Some(order) = self.position_mut()?.outstanding.clone() else {
            return Ok(None);
        };
        let progress = match self.exchange.query_order(&ctx.symbol, &order).await {
            Ok(progress) => progress,
            Err(e) if e.is_rejection() => {
                report::rejected("order status query", &e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !progress.closed && !progress.filled {
            return Ok(None);
        }

        let position = self.position_mut()?;
        position.outstanding = None;
        position.reduce(progress.executed_qty);
        let mean_buy_price = position.mean_buy_price;

        if !progress.filled {
            warn!(
                "Order #{} closed without filling ({} executed), placing a new one",
                order.id, progress.executed_qty
            );
            return Ok(None);
        }

        self.bailout_armed = false;
        let (kind, fill_price) = match order.kind {
            OrderKind::Limit => (SaleKind::Limit, order.price),
            OrderKind::Oco => match order.stop_price {
                Some(stop) if price < order.price => (SaleKind::Oco, stop),
                _ => (SaleKind::Oco, order.price),
            },
        };
        Ok(Some(SaleReport {
            kind,
            executed_qty: progress.executed_qty,
            price: fill_price,
            profit_percent: percent_change(fill_price, mean_buy_price),
        }))
    }

    /// Market sell for the whole remaining balance. Skips the tick when the
    /// quantity does not fit the current market band.
    async fn fire_market_sell(
        &mut self,
        ctx: &CycleContext,
        trigger: Trigger,
        price: Decimal,
    ) -> Result<Option<SaleReport>, TradeError> {
        self.cancel_outstanding(ctx).await?;

        let position = self.position_mut()?;
        let mean_buy_price = position.mean_buy_price;
        let qty = ctx.constraints.market_lot_amount(position.remaining_qty);
        let band = ctx.constraints.qty_band(price, true);
        if qty.is_zero() || !band.contains(qty) {
            report::bounds_skip("market sell quantity", qty, &band);
            return Ok(None);
        }

        report::trigger(trigger, price);
        self.bailout_armed = false;
        match self.exchange.sell_market(&ctx.symbol, qty).await {
            Ok(order) => {
                report::market_order(&order, ctx.constraints.pair());
                let avg = order.average_price()?;
                self.position_mut()?.reduce(order.executed_qty);
                Ok(Some(SaleReport {
                    kind: SaleKind::Market,
                    executed_qty: order.executed_qty,
                    price: avg,
                    profit_percent: percent_change(avg, mean_buy_price),
                }))
            }
            Err(e) if e.is_rejection() => {
                self.bailout_armed = true;
                report::rejected("market sell", &e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancels the resting order, if any, and books what it executed before
    /// cancellation. The handle stays on the position until the exchange confirms.
    async fn cancel_outstanding(&mut self, ctx: &CycleContext) -> Result<(), TradeError> {
        let Some(order) = self.position_mut()?.outstanding.clone() else {
            return Ok(());
        };
        let cancelled = match order.kind {
            OrderKind::Limit => self.exchange.cancel_order(&ctx.symbol, order.id).await,
            OrderKind::Oco => self.exchange.cancel_oco(&ctx.symbol, order.id).await,
        };
        let executed = cancelled.map_err(|source| TradeError::CancelFailed {
            order_id: order.id,
            source,
        })?;
        let position = self.position_mut()?;
        position.outstanding = None;
        position.reduce(executed);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connectors::traits::ExchangeResult;
    use crate::core::constraints::tests::pair_with;
    use crate::core::lock::PairLock;
    use crate::types::{
        Balance, ExchangeInfo, Fill, LotSizeFilter, MarketOrderReport, MinNotionalFilter,
        OrderProgress, PercentPriceFilter, PriceFilter, SellStrategy, Side, SymbolFilter,
        TradingPair,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        BuyMarket(Decimal),
        SellMarket(Decimal),
        SellLimit {
            qty: Decimal,
            price: Decimal,
        },
        SellOco {
            qty: Decimal,
            price: Decimal,
            stop: Decimal,
            stop_limit: Decimal,
        },
        Cancel(u64),
        CancelOco(u64),
        Query(u64),
    }

    /// In-memory exchange replaying scripted trade prices.
    pub(crate) struct ScriptedExchange {
        buy_price: Decimal,
        buy_rejected: bool,
        zero_fill: bool,
        sell_price: Decimal,
        avg_price: Decimal,
        cancel_executed: Decimal,
        cancel_fails: bool,
        progress: OrderProgress,
        streams: Mutex<VecDeque<Vec<Decimal>>>,
        parked: Mutex<Vec<mpsc::Sender<TradeTick>>>,
        subscriptions: Mutex<u32>,
        calls: Mutex<Vec<Call>>,
        placed: Notify,
        /// Cancels that hang forever before the exchange answers.
        stalled_cancels: Mutex<u32>,
        cancelling: Notify,
    }

    impl ScriptedExchange {
        pub(crate) fn new(buy_price: Decimal, streams: Vec<Vec<Decimal>>) -> Self {
            Self {
                buy_price,
                buy_rejected: false,
                zero_fill: false,
                sell_price: buy_price,
                avg_price: buy_price,
                cancel_executed: Decimal::ZERO,
                cancel_fails: false,
                progress: OrderProgress {
                    executed_qty: Decimal::ZERO,
                    closed: false,
                    filled: false,
                },
                streams: Mutex::new(streams.into()),
                parked: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(0),
                calls: Mutex::new(Vec::new()),
                placed: Notify::new(),
                stalled_cancels: Mutex::new(0),
                cancelling: Notify::new(),
            }
        }

        /// Parks the caller when a stalled cancel is scripted.
        async fn answer_cancel(&self) -> ExchangeResult<Decimal> {
            let stall = {
                let mut stalled = self.stalled_cancels.lock().unwrap();
                let stall = *stalled > 0;
                if stall {
                    *stalled -= 1;
                }
                stall
            };
            if stall {
                self.cancelling.notify_one();
                std::future::pending::<()>().await;
            }
            if self.cancel_fails {
                return Err(rejection());
            }
            Ok(self.cancel_executed)
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn market_report(&self, side: Side, qty: Decimal, price: Decimal) -> MarketOrderReport {
            MarketOrderReport {
                symbol: "ABCBTC".into(),
                side,
                status: "FILLED".into(),
                executed_qty: qty,
                cumulative_quote_qty: qty * price,
                fills: vec![Fill {
                    price,
                    qty,
                    commission: Decimal::ZERO,
                    commission_asset: "BNB".into(),
                }],
            }
        }
    }

    fn rejection() -> ExchangeError {
        ExchangeError::Rejected {
            status: 400,
            payload: serde_json::json!({"code": -2011, "msg": "Unknown order sent."}),
        }
    }

    #[async_trait]
    impl ExchangeClient for ScriptedExchange {
        async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
            Ok(ExchangeInfo { symbols: vec![] })
        }

        async fn avg_price(&self, _symbol: &str) -> ExchangeResult<Decimal> {
            Ok(self.avg_price)
        }

        async fn last_price(&self, _symbol: &str) -> ExchangeResult<Decimal> {
            Ok(self.avg_price)
        }

        async fn balances(&self) -> ExchangeResult<Vec<Balance>> {
            Ok(vec![])
        }

        async fn buy_market(
            &self,
            _symbol: &str,
            quote_amount: Decimal,
        ) -> ExchangeResult<MarketOrderReport> {
            self.record(Call::BuyMarket(quote_amount));
            if self.buy_rejected {
                return Err(rejection());
            }
            let qty = quote_amount / self.buy_price;
            if self.zero_fill {
                return Ok(self.market_report(Side::Buy, qty, Decimal::ZERO));
            }
            Ok(self.market_report(Side::Buy, qty, self.buy_price))
        }

        async fn sell_market(
            &self,
            _symbol: &str,
            qty: Decimal,
        ) -> ExchangeResult<MarketOrderReport> {
            self.record(Call::SellMarket(qty));
            Ok(self.market_report(Side::Sell, qty, self.sell_price))
        }

        async fn sell_limit(
            &self,
            _symbol: &str,
            qty: Decimal,
            price: Decimal,
        ) -> ExchangeResult<u64> {
            self.record(Call::SellLimit { qty, price });
            self.placed.notify_one();
            Ok(7)
        }

        async fn sell_oco(
            &self,
            _symbol: &str,
            qty: Decimal,
            price: Decimal,
            stop: Decimal,
            stop_limit: Decimal,
        ) -> ExchangeResult<u64> {
            self.record(Call::SellOco {
                qty,
                price,
                stop,
                stop_limit,
            });
            self.placed.notify_one();
            Ok(9)
        }

        async fn cancel_order(&self, _symbol: &str, order_id: u64) -> ExchangeResult<Decimal> {
            self.record(Call::Cancel(order_id));
            self.answer_cancel().await
        }

        async fn cancel_oco(&self, _symbol: &str, order_list_id: u64) -> ExchangeResult<Decimal> {
            self.record(Call::CancelOco(order_list_id));
            self.answer_cancel().await
        }

        async fn query_order(
            &self,
            _symbol: &str,
            order: &OrderHandle,
        ) -> ExchangeResult<OrderProgress> {
            self.record(Call::Query(order.id));
            Ok(self.progress.clone())
        }
    }

    #[async_trait]
    impl StreamClient for ScriptedExchange {
        async fn subscribe_trades(
            &self,
            _symbol: &str,
            sender: mpsc::Sender<TradeTick>,
        ) -> ExchangeResult<()> {
            *self.subscriptions.lock().unwrap() += 1;
            let mut streams = self.streams.lock().unwrap();
            let script = streams.pop_front().unwrap_or_default();
            for (i, price) in script.into_iter().enumerate() {
                sender
                    .try_send(TradeTick {
                        price,
                        timestamp: i as u64,
                    })
                    .expect("stream buffer");
            }
            // The last script stays open so the engine waits instead of resubscribing.
            if streams.is_empty() {
                self.parked.lock().unwrap().push(sender);
            }
            Ok(())
        }
    }

    fn test_pair(oco_allowed: bool, extra: Vec<SymbolFilter>) -> TradingPair {
        let mut filters = vec![
            SymbolFilter::Price(PriceFilter {
                min_price: dec!(0.01),
                max_price: dec!(10000),
                tick_size: dec!(0.01),
            }),
            SymbolFilter::LotSize(LotSizeFilter {
                min_qty: dec!(0.01),
                max_qty: dec!(10000),
                step_size: dec!(0.01),
            }),
        ];
        filters.extend(extra);
        let mut pair = pair_with(filters);
        pair.oco_allowed = oco_allowed;
        pair
    }

    fn config(strategy: SellStrategy, stop: Decimal) -> TradeConfig {
        TradeConfig {
            quote_asset: "BTC".into(),
            usd_value: None,
            quote_amount: Some(dec!(100)),
            buy_percent: dec!(100),
            sell_strategy: strategy,
            profit_percent: dec!(10),
            stop_percent: stop,
            min_profit_percent: dec!(0),
            bailout: true,
            retry_interval_ms: 2000,
            resubscribe_delay_ms: 10,
        }
    }

    async fn locked_engine(
        exchange: Arc<ScriptedExchange>,
        pair: TradingPair,
        config: TradeConfig,
    ) -> TradeEngine {
        let pairs = HashMap::from([(pair.base_asset.clone(), pair)]);
        let (lock, waiter) = PairLock::new("BTC", pairs);
        let mut engine = TradeEngine::new(
            Arc::new(config),
            exchange.clone(),
            exchange,
            waiter,
            dec!(100),
        );
        assert_eq!(engine.state(), EngineState::Idle);
        lock.attempt_lock("abc").unwrap();
        engine.await_lock().await.unwrap();
        assert_eq!(engine.state(), EngineState::Locked);
        engine
    }

    async fn later() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn market_strategy_sells_everything_above_target() {
        let mut exchange =
            ScriptedExchange::new(dec!(50), vec![vec![dec!(52), dec!(52), dec!(56)]]);
        exchange.sell_price = dec!(56);
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Market, dec!(-5)),
        )
        .await;

        let outcome = engine.run(later()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Sold(SaleReport {
                kind: SaleKind::Market,
                executed_qty: dec!(2),
                price: dec!(56),
                profit_percent: dec!(12),
            })
        );
        assert_eq!(
            exchange.calls(),
            vec![Call::BuyMarket(dec!(100)), Call::SellMarket(dec!(2))]
        );
        assert_eq!(engine.state(), EngineState::Done);
        let position = engine.position().unwrap();
        assert_eq!(position.target_price, dec!(55));
        assert_eq!(position.stop_price, dec!(47.5));
        assert!(position.is_closed());
    }

    #[tokio::test]
    async fn market_strategy_sells_below_stop() {
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(52), dec!(40)]]);
        exchange.sell_price = dec!(40);
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(true, vec![]),
            config(SellStrategy::Market, dec!(-5)),
        )
        .await;

        match engine.run(later()).await.unwrap() {
            CycleOutcome::Sold(sale) => {
                assert_eq!(sale.executed_qty, dec!(2));
                assert_eq!(sale.profit_percent, dec!(-20));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(exchange.calls().last(), Some(&Call::SellMarket(dec!(2))));
    }

    #[tokio::test]
    async fn prices_inside_the_range_trigger_nothing() {
        let exchange = Arc::new(ScriptedExchange::new(
            dec!(50),
            vec![vec![dec!(52), dec!(51), dec!(53)]],
        ));
        let mut cfg = config(SellStrategy::Market, dec!(-5));
        cfg.bailout = false;
        let mut engine = locked_engine(exchange.clone(), test_pair(false, vec![]), cfg).await;

        let outcome = engine.run(later()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Interrupted { resting: None });
        assert_eq!(exchange.calls(), vec![Call::BuyMarket(dec!(100))]);
        assert_eq!(engine.position().unwrap().remaining_qty, dec!(2));
    }

    #[tokio::test]
    async fn failed_buy_fails_the_cycle_without_retry() {
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(56)]]);
        exchange.buy_rejected = true;
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Market, dec!(-5)),
        )
        .await;

        let err = engine.run(later()).await.unwrap_err();

        assert!(matches!(
            err,
            TradeError::Exchange(ExchangeError::Rejected { .. })
        ));
        assert_eq!(engine.state(), EngineState::Failed);
        assert_eq!(exchange.calls(), vec![Call::BuyMarket(dec!(100))]);
        assert!(engine.position().is_none());
    }

    #[tokio::test]
    async fn zero_fill_price_is_fatal() {
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(56)]]);
        exchange.zero_fill = true;
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Market, dec!(-5)),
        )
        .await;

        let err = engine.run(later()).await.unwrap_err();

        assert!(matches!(err, TradeError::Integrity(_)));
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(engine.position().is_none());
    }

    #[tokio::test]
    async fn out_of_bounds_quantity_fails_before_selling() {
        let exchange = Arc::new(ScriptedExchange::new(dec!(50), vec![vec![dec!(56)]]));
        let pair = test_pair(
            false,
            vec![SymbolFilter::MarketLotSize(LotSizeFilter {
                min_qty: dec!(10),
                max_qty: dec!(1000),
                step_size: dec!(0),
            })],
        );
        let mut engine =
            locked_engine(exchange.clone(), pair, config(SellStrategy::Market, dec!(-5))).await;

        let err = engine.run(later()).await.unwrap_err();

        assert!(matches!(err, TradeError::BoundsViolation { .. }));
        assert_eq!(exchange.calls(), vec![Call::BuyMarket(dec!(100))]);
    }

    #[tokio::test]
    async fn market_sell_skips_ticks_outside_the_quantity_band() {
        // 90 / 50 * 1.05 = 1.89 passes at buy time, 90 / 40 * 1.05 = 2.3625 does not.
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(40), dec!(56)]]);
        exchange.sell_price = dec!(56);
        let exchange = Arc::new(exchange);
        let pair = test_pair(
            false,
            vec![SymbolFilter::MinNotional(MinNotionalFilter {
                min_notional: dec!(90),
                apply_to_market: true,
            })],
        );
        let mut engine =
            locked_engine(exchange.clone(), pair, config(SellStrategy::Market, dec!(-5))).await;

        let outcome = engine.run(later()).await.unwrap();

        assert!(
            matches!(outcome, CycleOutcome::Sold(SaleReport { price, .. }) if price == dec!(56))
        );
        let sells: Vec<_> = exchange
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SellMarket(_)))
            .collect();
        assert_eq!(sells, vec![Call::SellMarket(dec!(2))]);
    }

    #[tokio::test]
    async fn limit_strategy_rests_at_target_and_finishes_on_fill() {
        let mut exchange =
            ScriptedExchange::new(dec!(50), vec![vec![dec!(50), dec!(54), dec!(55.5)]]);
        exchange.progress = OrderProgress {
            executed_qty: dec!(2),
            closed: true,
            filled: true,
        };
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Limit, dec!(-100)),
        )
        .await;

        let outcome = engine.run(later()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Sold(SaleReport {
                kind: SaleKind::Limit,
                executed_qty: dec!(2),
                price: dec!(55),
                profit_percent: dec!(10),
            })
        );
        assert_eq!(
            exchange.calls(),
            vec![
                Call::BuyMarket(dec!(100)),
                Call::SellLimit {
                    qty: dec!(2),
                    price: dec!(55)
                },
                Call::Query(7),
            ]
        );
    }

    #[tokio::test]
    async fn limit_target_is_lowered_to_the_price_ceiling() {
        // ceiling: 50 * 1.15 * 0.95 = 54.625 -> 54.62 after tick rounding
        let exchange = Arc::new(ScriptedExchange::new(dec!(50), vec![vec![]]));
        let pair = test_pair(
            false,
            vec![SymbolFilter::PercentPrice(PercentPriceFilter {
                multiplier_up: dec!(1.15),
                multiplier_down: dec!(0.5),
                avg_price_mins: None,
            })],
        );
        let mut cfg = config(SellStrategy::Limit, dec!(-100));
        cfg.bailout = false;
        cfg.min_profit_percent = dec!(5);
        let mut engine = locked_engine(exchange.clone(), pair, cfg).await;

        let outcome = engine.run(later()).await.unwrap();

        let expected = OrderHandle {
            id: 7,
            kind: OrderKind::Limit,
            qty: dec!(2),
            price: dec!(54.62),
            stop_price: None,
        };
        assert_eq!(
            outcome,
            CycleOutcome::Interrupted {
                resting: Some(expected)
            }
        );
        assert_eq!(
            exchange.calls()[1],
            Call::SellLimit {
                qty: dec!(2),
                price: dec!(54.62)
            }
        );
    }

    #[tokio::test]
    async fn profit_floor_defers_the_limit_order() {
        let exchange = Arc::new(ScriptedExchange::new(dec!(50), vec![vec![dec!(51)]]));
        let pair = test_pair(
            false,
            vec![SymbolFilter::PercentPrice(PercentPriceFilter {
                multiplier_up: dec!(1.05),
                multiplier_down: dec!(0.5),
                avg_price_mins: None,
            })],
        );
        let mut cfg = config(SellStrategy::Limit, dec!(-100));
        cfg.bailout = false;
        cfg.min_profit_percent = dec!(5);
        let mut engine = locked_engine(exchange.clone(), pair, cfg).await;

        let outcome = engine.run(later()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Interrupted { resting: None });
        assert_eq!(exchange.calls(), vec![Call::BuyMarket(dec!(100))]);
    }

    #[tokio::test]
    async fn stop_level_uses_an_oco_when_the_pair_allows_it() {
        let exchange = Arc::new(ScriptedExchange::new(dec!(50), vec![vec![dec!(51)]]));
        let mut cfg = config(SellStrategy::Hybrid, dec!(-5));
        cfg.bailout = false;
        let mut engine = locked_engine(exchange.clone(), test_pair(true, vec![]), cfg).await;

        let outcome = engine.run(later()).await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Interrupted {
                resting: Some(OrderHandle {
                    kind: OrderKind::Oco,
                    id: 9,
                    ..
                })
            }
        ));
        assert_eq!(
            exchange.calls()[1],
            Call::SellOco {
                qty: dec!(2),
                price: dec!(55),
                stop: dec!(47.5),
                stop_limit: dec!(45.12),
            }
        );
    }

    #[tokio::test]
    async fn hybrid_stop_cancels_the_resting_limit_before_selling() {
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(49), dec!(45)]]);
        exchange.sell_price = dec!(45);
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Hybrid, dec!(-5)),
        )
        .await;

        let outcome = engine.run(later()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Sold(SaleReport { kind: SaleKind::Market, .. })));
        assert_eq!(
            exchange.calls(),
            vec![
                Call::BuyMarket(dec!(100)),
                Call::SellLimit {
                    qty: dec!(2),
                    price: dec!(55)
                },
                Call::Cancel(7),
                Call::SellMarket(dec!(2)),
            ]
        );
    }

    #[tokio::test]
    async fn bailout_subtracts_partial_fills_before_selling() {
        // 100 quote at 20 buys 5 units; the resting limit already sold 2.
        let mut exchange = ScriptedExchange::new(dec!(20), vec![vec![]]);
        exchange.cancel_executed = dec!(2);
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Limit, dec!(-100)),
        )
        .await;

        let placed = exchange.clone();
        let outcome = engine
            .run(async move { placed.placed.notified().await })
            .await
            .unwrap();

        match outcome {
            CycleOutcome::BailedOut(Some(sale)) => assert_eq!(sale.executed_qty, dec!(3)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            exchange.calls(),
            vec![
                Call::BuyMarket(dec!(100)),
                Call::SellLimit {
                    qty: dec!(5),
                    price: dec!(22)
                },
                Call::Cancel(7),
                Call::SellMarket(dec!(3)),
            ]
        );
        assert_eq!(engine.state(), EngineState::BailedOut);
        assert!(engine.position().unwrap().is_closed());

        // Never entered twice.
        assert_eq!(engine.bailout().await.unwrap(), None);
        assert_eq!(exchange.calls().len(), 4);
    }

    #[tokio::test]
    async fn failed_cancel_surfaces_from_bailout() {
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![]]);
        exchange.cancel_fails = true;
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Limit, dec!(-100)),
        )
        .await;

        let placed = exchange.clone();
        let err = engine
            .run(async move { placed.placed.notified().await })
            .await
            .unwrap_err();

        assert!(matches!(err, TradeError::CancelFailed { order_id: 7, .. }));
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(!exchange
            .calls()
            .iter()
            .any(|c| matches!(c, Call::SellMarket(_))));
    }

    #[tokio::test]
    async fn bailout_before_buy_is_a_noop() {
        let exchange = Arc::new(ScriptedExchange::new(dec!(50), vec![]));
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Market, dec!(-5)),
        )
        .await;

        assert_eq!(engine.bailout().await.unwrap(), None);
        assert!(exchange.calls().is_empty());
        assert_eq!(engine.state(), EngineState::Locked);
    }

    #[tokio::test]
    async fn closed_stream_is_resubscribed() {
        let mut exchange =
            ScriptedExchange::new(dec!(50), vec![vec![dec!(52)], vec![dec!(56)]]);
        exchange.sell_price = dec!(56);
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Market, dec!(-5)),
        )
        .await;

        let outcome = engine.run(later()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Sold(_)));
        assert_eq!(*exchange.subscriptions.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn run_is_single_shot() {
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(56)]]);
        exchange.sell_price = dec!(56);
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Market, dec!(-5)),
        )
        .await;

        engine.run(later()).await.unwrap();
        let err = engine.run(later()).await.unwrap_err();
        assert!(matches!(err, TradeError::InvalidState { expected: "Locked", .. }));
        assert!(matches!(
            engine.await_lock().await,
            Err(TradeError::InvalidState { expected: "Idle", .. })
        ));
    }

    #[tokio::test]
    async fn interrupted_cancel_is_retried_by_the_bailout() {
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(49), dec!(45)]]);
        exchange.sell_price = dec!(45);
        *exchange.stalled_cancels.lock().unwrap() = 1;
        let exchange = Arc::new(exchange);
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(false, vec![]),
            config(SellStrategy::Hybrid, dec!(-5)),
        )
        .await;

        let cancelling = exchange.clone();
        let outcome = engine
            .run(async move { cancelling.cancelling.notified().await })
            .await
            .unwrap();

        match outcome {
            CycleOutcome::BailedOut(Some(sale)) => assert_eq!(sale.executed_qty, dec!(2)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            exchange.calls(),
            vec![
                Call::BuyMarket(dec!(100)),
                Call::SellLimit {
                    qty: dec!(2),
                    price: dec!(55)
                },
                Call::Cancel(7),
                Call::Cancel(7),
                Call::SellMarket(dec!(2)),
            ]
        );
        assert!(engine.position().unwrap().outstanding.is_none());
    }

    #[tokio::test]
    async fn fill_checks_are_throttled_while_the_price_stays_at_the_limit() {
        let prices: Vec<Decimal> = (0..20).map(|i| dec!(55) + Decimal::new(i, 2)).collect();
        let exchange = Arc::new(ScriptedExchange::new(dec!(50), vec![prices]));
        let mut cfg = config(SellStrategy::Limit, dec!(-100));
        cfg.bailout = false;
        let mut engine = locked_engine(exchange.clone(), test_pair(false, vec![]), cfg).await;

        let outcome = engine.run(later()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Interrupted { resting: Some(_) }));
        let queries = exchange
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Query(_)))
            .count();
        assert_eq!(queries, 1);
    }

    #[tokio::test]
    async fn oco_bailout_cancels_the_order_list() {
        let exchange = Arc::new(ScriptedExchange::new(dec!(50), vec![vec![]]));
        let mut engine = locked_engine(
            exchange.clone(),
            test_pair(true, vec![]),
            config(SellStrategy::Limit, dec!(-5)),
        )
        .await;

        let placed = exchange.clone();
        let outcome = engine
            .run(async move { placed.placed.notified().await })
            .await
            .unwrap();

        assert!(matches!(outcome, CycleOutcome::BailedOut(Some(_))));
        let calls = exchange.calls();
        assert!(matches!(calls[1], Call::SellOco { .. }));
        assert_eq!(calls[2..], [Call::CancelOco(9), Call::SellMarket(dec!(2))]);
    }

    #[tokio::test]
    async fn hybrid_sells_at_market_while_the_limit_is_deferred() {
        // ceiling 50 * 1.05 * 0.95 = 49.875 leaves no room for the limit order
        let mut exchange = ScriptedExchange::new(dec!(50), vec![vec![dec!(51), dec!(56)]]);
        exchange.sell_price = dec!(56);
        let exchange = Arc::new(exchange);
        let pair = test_pair(
            false,
            vec![SymbolFilter::PercentPrice(PercentPriceFilter {
                multiplier_up: dec!(1.05),
                multiplier_down: dec!(0.5),
                avg_price_mins: None,
            })],
        );
        let mut engine =
            locked_engine(exchange.clone(), pair, config(SellStrategy::Hybrid, dec!(-100))).await;

        let outcome = engine.run(later()).await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Sold(SaleReport { kind: SaleKind::Market, .. })
        ));
        assert_eq!(
            exchange.calls(),
            vec![Call::BuyMarket(dec!(100)), Call::SellMarket(dec!(2))]
        );
    }
}
