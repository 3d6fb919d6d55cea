//! Order execution controller.
//!
//! One [`OrderController::run_tick`] call executes the latest signal for one
//! account:
//!
//! ```text
//! fetch signal -> idempotency check -+-> filled:  trail stop (maintenance)
//!                                    +-> pending: reconcile against positions
//!                                    +-> error:   abandoned
//!                                    +-> none:    size -> news gate -> create row
//!                                                 -> flatten -> place -> verify
//!                                                 -> mark filled -> attach stop
//! ```
//!
//! The entry row is created before the exchange is touched, so a restart
//! mid-flow finds it and never places a second entry for the same signal.
//! Placement is never attempted over exposure that could not be closed.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use sigexec_core::{
    Clock, NewOrder, Order, OrderDirection, OrderId, OrderStatus, OrderType, Position, Price,
    TradingSignal,
};
use sigexec_gateway::{DynGateway, DynNewsSource, OrderAck, OrderRequest, StopLossRequest};
use sigexec_persistence::{AuditException, AuditLevel, DynAuditSink, DynOrderStore, StatusChange};
use sigexec_position::{next_stop, plan_flatten, FlattenReason, FlattenRequest};
use sigexec_risk::{base_quantity, NewsGateConfig, RiskSession, RiskSizer, SizingDecision};
use sigexec_telemetry::Metrics;

use crate::bounded::CallGuard;
use crate::config::{AccountSettings, ControllerConfig};
use crate::error::{ControllerError, ControllerResult};
use crate::outcome::TickOutcome;
use crate::poll::{poll_until, PollSpec};
use crate::single_flight::SingleFlight;

const AUDIT_SERVICE: &str = "sigexec";
const AUDIT_MODULE: &str = "controller";

/// Collaborators injected into a controller.
#[derive(Clone)]
pub struct ControllerDeps {
    pub gateway: DynGateway,
    pub store: DynOrderStore,
    pub audit: DynAuditSink,
    /// `None` disables the news gate regardless of config.
    pub news: Option<DynNewsSource>,
    pub clock: Arc<dyn Clock>,
    /// Shared by every controller in the process.
    pub flights: Arc<SingleFlight>,
}

/// Facts gathered while a tick runs, attached to its audit record.
#[derive(Debug)]
struct TickContext {
    stage: &'static str,
    signal_id: Option<String>,
    order_id: Option<OrderId>,
}

impl Default for TickContext {
    fn default() -> Self {
        Self {
            stage: "start",
            signal_id: None,
            order_id: None,
        }
    }
}

/// Executes signals for one `(user, exchange, symbol)` account.
pub struct OrderController {
    account: AccountSettings,
    config: ControllerConfig,
    news_gate: NewsGateConfig,
    sizer: RiskSizer,
    gateway: DynGateway,
    store: DynOrderStore,
    audit: DynAuditSink,
    news: Option<DynNewsSource>,
    clock: Arc<dyn Clock>,
    flights: Arc<SingleFlight>,
}

impl OrderController {
    pub fn new(
        account: AccountSettings,
        config: ControllerConfig,
        news_gate: NewsGateConfig,
        deps: ControllerDeps,
    ) -> ControllerResult<Self> {
        account.validate()?;
        config.validate()?;
        news_gate
            .validate()
            .map_err(|e| ControllerError::Config(e.to_string()))?;

        let sizer = RiskSizer::new(account.risk.clone(), account.qty_step());
        Ok(Self {
            account,
            config,
            news_gate,
            sizer,
            gateway: deps.gateway,
            store: deps.store,
            audit: deps.audit,
            news: deps.news,
            clock: deps.clock,
            flights: deps.flights,
        })
    }

    pub fn account(&self) -> &AccountSettings {
        &self.account
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn exchange(&self) -> &str {
        self.gateway.name()
    }

    /// Run one tick. Overlapping calls for the same account return
    /// [`TickOutcome::InFlight`] without touching the store or exchange.
    ///
    /// Cancelling `cancel` aborts the in-progress call with
    /// [`ControllerError::Cancelled`].
    pub async fn run_tick(&self, cancel: &CancellationToken) -> ControllerResult<TickOutcome> {
        let exchange = self.gateway.name().to_string();
        let Some(_flight) = self.flights.try_acquire(&self.account.user_id, &exchange) else {
            Metrics::tick_finished(&exchange, TickOutcome::InFlight.label(), 0.0);
            return Ok(TickOutcome::InFlight);
        };

        let span = info_span!(
            "tick",
            user_id = %self.account.user_id,
            exchange = %exchange,
            symbol = %self.account.symbol
        );
        let guard = CallGuard::new(cancel.child_token(), self.config.call_timeout());
        let started = Instant::now();
        let mut ctx = TickContext::default();

        let result = self.tick(&guard, &mut ctx).instrument(span.clone()).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let _entered = span.enter();
        match &result {
            Ok(outcome) => {
                Metrics::tick_finished(&exchange, outcome.label(), elapsed_ms);
                match outcome {
                    TickOutcome::NoSignal
                    | TickOutcome::StopUnchanged { .. }
                    | TickOutcome::PendingInFlight { .. } => {
                        debug!(outcome = outcome.label(), elapsed_ms, "Tick finished");
                    }
                    _ => info!(outcome = outcome.label(), elapsed_ms, "Tick finished"),
                }
            }
            Err(ControllerError::Cancelled) => {
                Metrics::tick_failed(&exchange, "cancelled", elapsed_ms);
                info!(stage = ctx.stage, "Tick cancelled");
            }
            Err(e) => {
                Metrics::tick_failed(&exchange, e.kind(), elapsed_ms);
                error!(
                    stage = ctx.stage,
                    kind = e.kind(),
                    error = %e,
                    signal_id = ?ctx.signal_id,
                    order_id = ?ctx.order_id,
                    "Tick failed"
                );
                self.record_audit(
                    ctx.stage,
                    AuditLevel::Error,
                    e.to_string(),
                    json!({
                        "user_id": self.account.user_id,
                        "exchange": exchange,
                        "symbol": self.account.symbol,
                        "signal_id": ctx.signal_id,
                        "order_id": ctx.order_id.map(|id| id.0),
                        "kind": e.kind(),
                    }),
                );
            }
        }
        result
    }

    async fn tick(&self, guard: &CallGuard, ctx: &mut TickContext) -> ControllerResult<TickOutcome> {
        ctx.stage = "fetch_signal";
        let signals = guard
            .run(
                "find_latest_signal",
                self.store.find_latest_signal(
                    &self.account.symbol,
                    &self.account.exchange_name,
                    1,
                ),
            )
            .await?
            .map_err(|e| ControllerError::SignalSource(e.to_string()))?;
        let Some(signal) = signals.into_iter().next() else {
            debug!("No signal");
            return Ok(TickOutcome::NoSignal);
        };
        ctx.signal_id = Some(signal.id.clone());

        ctx.stage = "idempotency";
        let existing = guard
            .run(
                "find_order",
                self.store
                    .find_order(&self.account.user_id, &signal.id, OrderDirection::Entry),
            )
            .await??;

        if let Some(order) = existing {
            ctx.order_id = Some(order.id);
            return match order.status {
                OrderStatus::Filled => {
                    ctx.stage = "maintain_stop";
                    self.maintain_stop(guard, &order).await
                }
                OrderStatus::Pending => {
                    ctx.stage = "reconcile";
                    self.reconcile_pending(guard, &order).await
                }
                status => {
                    debug!(
                        order_id = %order.id,
                        status = %status,
                        reason = ?order.status_reason,
                        "Entry already failed, signal abandoned"
                    );
                    Ok(TickOutcome::Abandoned {
                        order_id: order.id,
                        status,
                    })
                }
            };
        }

        self.execute_signal(guard, ctx, &signal).await
    }

    async fn execute_signal(
        &self,
        guard: &CallGuard,
        ctx: &mut TickContext,
        signal: &TradingSignal,
    ) -> ControllerResult<TickOutcome> {
        let (side, pos_side) = signal
            .entry_sides()
            .map_err(|e| ControllerError::InvalidSignal(e.to_string()))?;
        let symbol = signal.exchange_symbol();
        let now = self.clock.now();

        ctx.stage = "size";
        let (price, decision) = self.size_entry(guard, &symbol, now).await?;
        if decision.is_no_trade() {
            info!(
                signal_id = %signal.id,
                session = %decision.classified,
                quantity = %decision.quantity,
                "No-trade sizing, flattening without entry"
            );
            ctx.stage = "flatten";
            let flattened = self
                .flatten(guard, signal, &symbol, FlattenReason::NoTrade)
                .await?;
            return Ok(TickOutcome::NoTrade {
                session: RiskSession::NoTrade,
                flattened,
            });
        }

        ctx.stage = "news_gate";
        if let Some(blocked) = self.check_news(guard, &symbol, now).await? {
            return Ok(blocked);
        }

        ctx.stage = "create_order";
        let new_order = NewOrder {
            user_id: self.account.user_id.clone(),
            exchange_id: self.gateway.name().to_string(),
            external_id: signal.id.clone(),
            symbol: symbol.clone(),
            side,
            pos_side,
            order_type: OrderType::Market,
            quantity: decision.quantity,
            price: Some(price),
            stop_loss_pct: self.account.stop_loss_pct,
            order_dir: OrderDirection::Entry,
        };
        let order = guard
            .run("create_order", self.store.create_order(new_order))
            .await??;
        ctx.order_id = Some(order.id);
        Metrics::order_status(OrderStatus::Pending.as_str(), "entry");
        info!(
            order_id = %order.id,
            signal_id = %signal.id,
            side = %side,
            pos_side = %pos_side,
            quantity = %order.quantity,
            session = %decision.session,
            "Entry order created"
        );

        ctx.stage = "flatten";
        let reason = FlattenReason::NewSignal {
            signal_id: signal.id.clone(),
        };
        match self.flatten(guard, signal, &symbol, reason).await {
            Ok(_) => {}
            Err(ControllerError::Cancelled) => return Err(self.leave_pending(&order)),
            Err(e) => {
                return Err(self
                    .fail_order(guard, &order, StatusChange::canceled(e.to_string()), e)
                    .await)
            }
        }

        ctx.stage = "place_entry";
        let ack = match self.place_entry(guard, &order).await {
            Ok(ack) => ack,
            Err(ControllerError::Cancelled) => return Err(self.leave_pending(&order)),
            Err(e) => {
                return Err(self
                    .fail_order(guard, &order, StatusChange::error(e.to_string()), e)
                    .await)
            }
        };

        ctx.stage = "verify_entry";
        let position = match self.verify_entry(guard, &order).await {
            Ok(position) => position,
            Err(ControllerError::Cancelled) => return Err(self.leave_pending(&order)),
            Err(e) => {
                let change = StatusChange::error(e.to_string()).with_response(ack.raw.clone());
                return Err(self.fail_order(guard, &order, change, e).await);
            }
        };

        ctx.stage = "mark_filled";
        let filled = guard
            .run(
                "update_status",
                self.store
                    .update_status(order.id, StatusChange::filled(Some(ack.raw))),
            )
            .await??;
        Metrics::order_status(OrderStatus::Filled.as_str(), "entry");
        info!(
            order_id = %filled.id,
            entry_price = %position.entry_price,
            size = %position.size,
            "Entry filled"
        );

        ctx.stage = "protect";
        let stop = self.protect(guard, &filled, position.entry_price).await?;

        Ok(TickOutcome::Filled {
            order_id: filled.id,
            quantity: filled.quantity,
            session: decision.session,
            stop,
        })
    }

    /// Margin and price lookups, then session sizing.
    async fn size_entry(
        &self,
        guard: &CallGuard,
        symbol: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ControllerResult<(Price, SizingDecision)> {
        let exchange = self.gateway.name();
        let margin = guard
            .gateway(
                exchange,
                "margin",
                self.gateway.get_available_margin(symbol),
            )
            .await?
            .map_err(|e| ControllerError::Sizing(format!("margin lookup: {e}")))?;
        let price = guard
            .gateway(exchange, "ticker", self.gateway.get_ticker(symbol))
            .await?
            .map_err(|e| ControllerError::Sizing(format!("ticker lookup: {e}")))?;

        let base = base_quantity(
            margin,
            self.account.percent_of_balance,
            self.account.leverage,
            price,
            self.account.qty_step(),
        )
        .map_err(|e| ControllerError::Sizing(e.to_string()))?;
        let decision = self.sizer.size(base, now);

        Metrics::sized_quantity(
            symbol,
            &decision.session.to_string(),
            decision.quantity.inner().to_f64().unwrap_or(0.0),
        );
        debug!(
            margin = %margin,
            price = %price,
            base = %base,
            quantity = %decision.quantity,
            session = %decision.session,
            multiplier = %decision.multiplier,
            "Sized entry"
        );
        Ok((price, decision))
    }

    /// `Some(Blocked)` when a high-importance event window is active.
    async fn check_news(
        &self,
        guard: &CallGuard,
        symbol: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ControllerResult<Option<TickOutcome>> {
        if !self.news_gate.enabled {
            return Ok(None);
        }
        let Some(source) = &self.news else {
            return Ok(None);
        };

        let (from, to) = self.news_gate.fetch_range(now);
        let fetched = match guard
            .run(
                "fetch_news",
                source.fetch_important_events(from, to, &self.news_gate.countries),
            )
            .await
        {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
            Err(e) => Err(e.to_string()),
        };

        let events = match fetched {
            Ok(events) => events,
            Err(reason) if self.news_gate.fail_open => {
                warn!(error = %reason, "News source unavailable, failing open");
                return Ok(None);
            }
            Err(reason) => {
                Metrics::news_blocked(symbol, "source_error");
                return Err(ControllerError::NewsSource(reason));
            }
        };

        let decision = self.news_gate.decide(now, &events);
        if decision.allowed {
            debug!(events = events.len(), "News gate open");
            return Ok(None);
        }

        Metrics::news_blocked(symbol, "event");
        info!(
            event_id = ?decision.blocking_event.as_ref().map(|e| e.id.as_str()),
            title = ?decision.blocking_event.as_ref().map(|e| e.title.as_str()),
            window_from = ?decision.block_window_from,
            window_to = ?decision.block_window_to,
            next_allowed = %decision.next_allowed_utc,
            "Entry blocked by news gate"
        );
        Ok(Some(TickOutcome::Blocked {
            event_id: decision.blocking_event.map(|e| e.id),
            next_allowed: decision.next_allowed_utc,
        }))
    }

    /// Close every open position on `symbol` and wait until it reads flat.
    /// Returns the number of positions closed.
    async fn flatten(
        &self,
        guard: &CallGuard,
        signal: &TradingSignal,
        symbol: &str,
        reason: FlattenReason,
    ) -> ControllerResult<usize> {
        let exchange = self.gateway.name();
        let positions = guard
            .gateway(
                exchange,
                "positions",
                self.gateway.get_open_positions(Some(symbol)),
            )
            .await?
            .map_err(|e| ControllerError::Flatten(format!("position lookup: {e}")))?;
        let requests = plan_flatten(&positions, symbol, reason)
            .map_err(|e| ControllerError::Flatten(e.to_string()))?;
        if requests.is_empty() {
            debug!(symbol, "Nothing to flatten");
            return Ok(0);
        }

        let mut closed: Vec<(Option<Order>, OrderAck)> = Vec::with_capacity(requests.len());
        for request in &requests {
            let exit_row = self.exit_row(guard, request, &signal.id).await?;
            match self.close_position(guard, request, &signal.id).await {
                Ok(ack) => closed.push((exit_row, ack)),
                Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
                Err(e) => {
                    self.fail_exit(guard, exit_row.as_ref(), &e).await;
                    for (row, _) in &closed {
                        self.fail_exit(guard, row.as_ref(), &e).await;
                    }
                    return Err(e);
                }
            }
        }

        let spec = self.poll_spec("flatten");
        let flat = poll_until(guard, spec, || async move {
            let positions = guard
                .gateway(
                    exchange,
                    "positions",
                    self.gateway.get_open_positions(Some(symbol)),
                )
                .await?
                .map_err(|e| ControllerError::Flatten(format!("position lookup: {e}")))?;
            let is_flat = positions
                .iter()
                .all(|p| p.symbol != symbol || p.size.is_zero());
            Ok::<_, ControllerError>(is_flat.then_some(()))
        })
        .await;
        if let Err(e) = flat {
            if matches!(e, ControllerError::Cancelled) {
                return Err(e);
            }
            for (row, _) in &closed {
                self.fail_exit(guard, row.as_ref(), &e).await;
            }
            return Err(e);
        }

        for (row, ack) in closed {
            let Some(row) = row else { continue };
            let recorded = guard
                .run(
                    "update_status",
                    self.store
                        .update_status(row.id, StatusChange::filled(Some(ack.raw))),
                )
                .await;
            match recorded {
                Ok(Ok(_)) => Metrics::order_status(OrderStatus::Filled.as_str(), "exit"),
                Ok(Err(e)) => warn!(order_id = %row.id, error = %e, "Failed to mark exit filled"),
                Err(e) => return Err(e),
            }
        }

        info!(symbol, closed = requests.len(), "Exposure flattened");
        Ok(requests.len())
    }

    /// Reduce-only market close for one position.
    async fn close_position(
        &self,
        guard: &CallGuard,
        request: &FlattenRequest,
        signal_id: &str,
    ) -> ControllerResult<OrderAck> {
        let order_request = OrderRequest::builder(
            request.symbol.clone(),
            request.side,
            request.pos_side,
            request.size,
        )
        .reduce_only(true)
        .client_order_id(NewOrder::exit_external_id(signal_id, request.pos_side))
        .build()
        .map_err(|e| ControllerError::Flatten(e.to_string()))?;

        info!(
            pos_side = %request.pos_side,
            size = %request.size,
            reason = %request.reason,
            "Closing position"
        );
        let ack = guard
            .gateway(
                self.gateway.name(),
                "place_order",
                self.gateway.place_order(order_request),
            )
            .await?
            .map_err(|e| {
                ControllerError::Flatten(format!(
                    "close {} {}: {e}",
                    request.symbol,
                    request.pos_side.as_str()
                ))
            })?;
        debug!(exchange_order_id = %ack.exchange_order_id, "Close accepted");
        Ok(ack)
    }

    /// Exit row for a close. A row already in a final state is left alone
    /// and the close proceeds without one.
    async fn exit_row(
        &self,
        guard: &CallGuard,
        request: &FlattenRequest,
        signal_id: &str,
    ) -> ControllerResult<Option<Order>> {
        let new_order = request.exit_order(
            &self.account.user_id,
            self.gateway.name(),
            signal_id,
        );
        let existing = guard
            .run(
                "find_order",
                self.store.find_order(
                    &self.account.user_id,
                    &new_order.external_id,
                    OrderDirection::Exit,
                ),
            )
            .await??;

        match existing {
            Some(row) if row.status == OrderStatus::Pending => Ok(Some(row)),
            Some(row) => {
                warn!(
                    order_id = %row.id,
                    external_id = %row.external_id,
                    status = %row.status,
                    "Exit row already final, closing without a new row"
                );
                Ok(None)
            }
            None => {
                let row = guard
                    .run("create_order", self.store.create_order(new_order))
                    .await??;
                Metrics::order_status(OrderStatus::Pending.as_str(), "exit");
                Ok(Some(row))
            }
        }
    }

    async fn place_entry(&self, guard: &CallGuard, order: &Order) -> ControllerResult<OrderAck> {
        let request = OrderRequest::builder(
            order.symbol.clone(),
            order.side,
            order.pos_side,
            order.quantity,
        )
        .client_order_id(order.external_id.clone())
        .build()
        .map_err(|e| ControllerError::Placement(e.to_string()))?;

        let ack = guard
            .gateway(
                self.gateway.name(),
                "place_order",
                self.gateway.place_order(request),
            )
            .await?
            .map_err(|e| ControllerError::Placement(e.to_string()))?;
        info!(
            order_id = %order.id,
            exchange_order_id = %ack.exchange_order_id,
            avg_price = ?ack.avg_price,
            "Entry order accepted"
        );
        Ok(ack)
    }

    /// Poll until a position matching the entry is observed.
    async fn verify_entry(&self, guard: &CallGuard, order: &Order) -> ControllerResult<Position> {
        let exchange = self.gateway.name();
        let spec = self.poll_spec("entry");
        let (position, _) = poll_until(guard, spec, || async move {
            let positions = guard
                .gateway(
                    exchange,
                    "positions",
                    self.gateway.get_open_positions(Some(&order.symbol)),
                )
                .await?
                .map_err(|e| ControllerError::Placement(format!("position lookup: {e}")))?;
            Ok::<_, ControllerError>(
                positions
                    .into_iter()
                    .find(|p| p.is_open(&order.symbol, order.pos_side)),
            )
        })
        .await?;
        Ok(position)
    }

    /// Attach the initial stop derived from the fill price.
    async fn protect(
        &self,
        guard: &CallGuard,
        order: &Order,
        entry_price: Price,
    ) -> ControllerResult<Option<Price>> {
        let Some(stop) = order.initial_stop(entry_price) else {
            debug!(order_id = %order.id, "No stop-loss configured");
            return Ok(None);
        };
        self.attach_stop(guard, order, stop).await
    }

    /// Push `stop` with bounded linear-backoff retries. Exhaustion is logged
    /// and audited but leaves the order `filled`; the maintenance path
    /// re-attaches on a later tick.
    async fn attach_stop(
        &self,
        guard: &CallGuard,
        order: &Order,
        stop: Price,
    ) -> ControllerResult<Option<Price>> {
        let attempts = self.config.stop_attach_attempts;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let request = StopLossRequest::new(order.symbol.clone(), order.pos_side, stop);
            let result = guard
                .gateway(
                    self.gateway.name(),
                    "stop_loss",
                    self.gateway.set_stop_loss(request),
                )
                .await;
            match result {
                Ok(Ok(_)) => {
                    self.persist_stop(guard, order.id, stop).await?;
                    info!(order_id = %order.id, stop = %stop, attempt, "Protective stop attached");
                    return Ok(Some(stop));
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
                Err(e) => last_error = e.to_string(),
            }
            warn!(
                order_id = %order.id,
                attempt,
                attempts,
                error = %last_error,
                "Stop attach failed"
            );
            if attempt < attempts {
                guard.sleep(self.config.stop_attach_backoff(attempt)).await?;
            }
        }

        warn!(order_id = %order.id, stop = %stop, "Position left without protective stop");
        self.record_audit(
            "attach_stop",
            AuditLevel::Warning,
            format!("stop attach failed after {attempts} attempts: {last_error}"),
            json!({
                "order_id": order.id.0,
                "symbol": order.symbol,
                "pos_side": order.pos_side.as_str(),
                "stop": stop.to_string(),
            }),
        );
        Ok(None)
    }

    /// Record a stop that is already live on the exchange. A store failure
    /// is logged; the next maintenance tick pushes the stop again.
    async fn persist_stop(&self, guard: &CallGuard, id: OrderId, stop: Price) -> ControllerResult<()> {
        match guard
            .run("update_stop_loss", self.store.update_stop_loss(id, stop))
            .await?
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(order_id = %id, stop = %stop, error = %e, "Failed to persist stop");
                Ok(())
            }
        }
    }

    /// Maintenance for a filled entry: trail the stop, never place orders.
    async fn maintain_stop(&self, guard: &CallGuard, order: &Order) -> ControllerResult<TickOutcome> {
        let exchange = self.gateway.name();
        let positions = guard
            .gateway(
                exchange,
                "positions",
                self.gateway.get_open_positions(Some(&order.symbol)),
            )
            .await?
            .map_err(|e| ControllerError::StopLoss(format!("position lookup: {e}")))?;
        if !positions
            .iter()
            .any(|p| p.is_open(&order.symbol, order.pos_side))
        {
            info!(order_id = %order.id, "Position closed since fill");
            return Ok(TickOutcome::PositionClosed { order_id: order.id });
        }

        let Some(current) = order.current_stop() else {
            debug!(order_id = %order.id, "No stop-loss configured");
            return Ok(TickOutcome::StopUnchanged { order_id: order.id });
        };

        let candles = guard
            .gateway(
                exchange,
                "candles",
                self.gateway.get_candles(
                    &order.symbol,
                    &self.config.candle_interval,
                    self.config.candle_limit(),
                ),
            )
            .await?
            .map_err(|e| ControllerError::StopLoss(format!("candle lookup: {e}")))?;

        let update = match next_stop(order.pos_side, current, &candles, self.config.candle_lookback) {
            Ok(update) => update,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Cannot trail stop");
                return Ok(TickOutcome::StopUnchanged { order_id: order.id });
            }
        };

        let target = if update.moved {
            update.new_stop
        } else if order.stop_price.is_none() {
            // Initial attach never succeeded; push the current stop.
            current
        } else {
            debug!(order_id = %order.id, stop = %current, "Trailing stop unchanged");
            return Ok(TickOutcome::StopUnchanged { order_id: order.id });
        };

        let request = StopLossRequest::new(order.symbol.clone(), order.pos_side, target);
        guard
            .gateway(exchange, "stop_loss", self.gateway.set_stop_loss(request))
            .await?
            .map_err(|e| ControllerError::StopLoss(e.to_string()))?;
        guard
            .run(
                "update_stop_loss",
                self.store.update_stop_loss(order.id, target),
            )
            .await??;

        Metrics::stop_moved(&order.symbol, order.pos_side.as_str());
        info!(
            order_id = %order.id,
            from = ?order.stop_price,
            to = %target,
            "Trailing stop moved"
        );
        Ok(TickOutcome::StopMoved {
            order_id: order.id,
            previous: order.stop_price,
            stop: target,
        })
    }

    /// A `pending` entry from an earlier tick: mark it filled if its position
    /// exists, `error` once stale, otherwise leave it in flight. Never places.
    async fn reconcile_pending(&self, guard: &CallGuard, order: &Order) -> ControllerResult<TickOutcome> {
        let positions = guard
            .gateway(
                self.gateway.name(),
                "positions",
                self.gateway.get_open_positions(Some(&order.symbol)),
            )
            .await?
            .map_err(|e| ControllerError::Reconcile(format!("position lookup: {e}")))?;

        if let Some(position) = positions
            .into_iter()
            .find(|p| p.is_open(&order.symbol, order.pos_side))
        {
            let change = StatusChange {
                status: OrderStatus::Filled,
                reason: Some("position observed on reconcile".to_string()),
                exchange_response: None,
            };
            let filled = guard
                .run("update_status", self.store.update_status(order.id, change))
                .await??;
            Metrics::order_status(OrderStatus::Filled.as_str(), "entry");
            info!(
                order_id = %order.id,
                entry_price = %position.entry_price,
                "Pending entry reconciled to filled"
            );
            self.protect(guard, &filled, position.entry_price).await?;
            return Ok(TickOutcome::Recovered { order_id: order.id });
        }

        let age = self.clock.now() - order.created_at;
        if age >= self.config.stale_pending_after() {
            let reason = format!(
                "no position observed {}s after creation",
                age.num_seconds()
            );
            let failed = guard
                .run(
                    "update_status",
                    self.store
                        .update_status(order.id, StatusChange::error(reason.clone())),
                )
                .await??;
            Metrics::order_status(OrderStatus::Error.as_str(), "entry");
            error!(order_id = %order.id, reason = %reason, "Stale pending entry marked error");
            self.record_audit(
                "reconcile",
                AuditLevel::Error,
                reason,
                json!({
                    "order_id": order.id.0,
                    "external_id": order.external_id,
                    "symbol": order.symbol,
                }),
            );
            return Ok(TickOutcome::Abandoned {
                order_id: order.id,
                status: failed.status,
            });
        }

        debug!(
            order_id = %order.id,
            age_secs = age.num_seconds(),
            "Entry still pending, skipping"
        );
        Ok(TickOutcome::PendingInFlight { order_id: order.id })
    }

    /// Record a failed entry and hand back the error that caused it.
    ///
    /// The write ignores tick cancellation so the row is not left `pending`
    /// for a failure that is already known.
    async fn fail_order(
        &self,
        guard: &CallGuard,
        order: &Order,
        change: StatusChange,
        cause: ControllerError,
    ) -> ControllerError {
        let recorder = CallGuard::new(CancellationToken::new(), self.config.call_timeout());
        let status = change.status;
        match recorder
            .run("update_status", self.store.update_status(order.id, change))
            .await
        {
            Ok(Ok(_)) => {
                Metrics::order_status(status.as_str(), "entry");
                error!(
                    order_id = %order.id,
                    status = %status,
                    cancelled = guard.is_cancelled(),
                    error = %cause,
                    "Entry order failed"
                );
            }
            Ok(Err(e)) => error!(order_id = %order.id, error = %e, "Failed to record entry failure"),
            Err(e) => error!(order_id = %order.id, error = %e, "Failed to record entry failure"),
        }
        cause
    }

    async fn fail_exit(&self, guard: &CallGuard, row: Option<&Order>, cause: &ControllerError) {
        let Some(row) = row else { return };
        let recorder = CallGuard::new(CancellationToken::new(), self.config.call_timeout());
        let result = recorder
            .run(
                "update_status",
                self.store
                    .update_status(row.id, StatusChange::error(cause.to_string())),
            )
            .await;
        match result {
            Ok(Ok(_)) => {
                Metrics::order_status(OrderStatus::Error.as_str(), "exit");
                error!(
                    order_id = %row.id,
                    cancelled = guard.is_cancelled(),
                    error = %cause,
                    "Exit order failed"
                );
            }
            Ok(Err(e)) => error!(order_id = %row.id, error = %e, "Failed to record exit failure"),
            Err(e) => error!(order_id = %row.id, error = %e, "Failed to record exit failure"),
        }
    }

    /// Cancelled while flattening, placing or verifying: the row stays
    /// `pending` for the next tick to reconcile.
    fn leave_pending(&self, order: &Order) -> ControllerError {
        warn!(
            order_id = %order.id,
            "Tick cancelled with entry in flight, leaving it pending"
        );
        ControllerError::Cancelled
    }

    fn poll_spec(&self, purpose: &'static str) -> PollSpec {
        PollSpec {
            purpose,
            interval: self.config.verify_poll_interval(),
            deadline: self.config.verify_deadline(),
        }
    }

    fn record_audit(
        &self,
        method: &str,
        level: AuditLevel,
        message: String,
        context: serde_json::Value,
    ) {
        let exception = AuditException::new(AUDIT_SERVICE, AUDIT_MODULE, method, level, message)
            .with_context(context)
            .at(self.clock.now());
        if let Err(e) = self.audit.record(&exception) {
            warn!(error = %e, "Failed to record audit exception");
        }
    }
}
