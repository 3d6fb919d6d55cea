//! Order execution controller.
//!
//! Turns the latest trading signal for an account into at most one exchange
//! entry, with idempotency keyed on `(user_id, signal_id, entry)`.
//!
//! # Key Components
//!
//! - [`OrderController`]: One tick of the signal-to-position flow
//! - [`TickLoop`]: Interval driver with cooperative shutdown
//! - [`CallGuard`]: Per-call deadline and cancellation bound
//! - [`poll_until`]: Bounded position verification
//! - [`SingleFlight`]: At most one tick per `(user, exchange)` in a process
//!
//! # Tick Order
//!
//! 1. Latest signal, else `NoSignal`
//! 2. Existing entry row: filled -> trail stop, pending -> reconcile,
//!    failed -> abandoned
//! 3. Size (no-trade session -> flatten only)
//! 4. News gate
//! 5. Create `pending` entry row
//! 6. Flatten and confirm flat (failure -> `canceled_error`)
//! 7. Place, verify fill (failure -> `error`)
//! 8. Mark `filled`, attach protective stop

pub mod bounded;
pub mod config;
pub mod controller;
pub mod error;
pub mod outcome;
pub mod poll;
pub mod single_flight;
pub mod tick_loop;

pub use bounded::CallGuard;
pub use config::{AccountSettings, ControllerConfig};
pub use controller::{ControllerDeps, OrderController};
pub use error::{ControllerError, ControllerResult};
pub use outcome::TickOutcome;
pub use poll::{poll_until, PollSpec};
pub use single_flight::{FlightGuard, SingleFlight};
pub use tick_loop::TickLoop;
