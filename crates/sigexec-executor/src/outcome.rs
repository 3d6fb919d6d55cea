//! Terminal paths of one controller tick.

use chrono::{DateTime, Utc};
use sigexec_core::{OrderId, OrderStatus, Price, Size};
use sigexec_risk::RiskSession;

/// How a tick ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No signal for the account's symbol and exchange.
    NoSignal,
    /// Another tick for the same account is still running.
    InFlight,
    /// Entry already filled; the trailing stop did not move.
    StopUnchanged { order_id: OrderId },
    /// Entry already filled; a tighter stop was pushed and persisted.
    StopMoved {
        order_id: OrderId,
        previous: Option<Price>,
        stop: Price,
    },
    /// Entry filled earlier but the position is gone (stopped out or closed).
    PositionClosed { order_id: OrderId },
    /// Entry is `pending`, younger than the stale threshold, no position yet.
    PendingInFlight { order_id: OrderId },
    /// A `pending` entry whose position was found; now `filled`.
    Recovered { order_id: OrderId },
    /// The signal's entry ended in `error`/`canceled_error`; not retried.
    Abandoned {
        order_id: OrderId,
        status: OrderStatus,
    },
    /// Session sizing resolved to zero; exposure flattened, nothing placed.
    NoTrade {
        session: RiskSession,
        flattened: usize,
    },
    /// News gate closed; no order row was created.
    Blocked {
        event_id: Option<String>,
        next_allowed: DateTime<Utc>,
    },
    /// Entry placed, verified and marked `filled`.
    Filled {
        order_id: OrderId,
        quantity: Size,
        session: RiskSession,
        stop: Option<Price>,
    },
}

impl TickOutcome {
    /// Stable label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoSignal => "no_signal",
            Self::InFlight => "in_flight",
            Self::StopUnchanged { .. } => "stop_unchanged",
            Self::StopMoved { .. } => "stop_moved",
            Self::PositionClosed { .. } => "position_closed",
            Self::PendingInFlight { .. } => "pending_in_flight",
            Self::Recovered { .. } => "recovered",
            Self::Abandoned { .. } => "abandoned",
            Self::NoTrade { .. } => "no_trade",
            Self::Blocked { .. } => "blocked",
            Self::Filled { .. } => "filled",
        }
    }
}
