//! JSON Lines journal store.
//!
//! Order rows are never rewritten in place. Each mutation appends one event
//! line to `orders.jsonl`, and opening the store replays the file to rebuild
//! the rows. Signals are read from `signals.jsonl`, which the external signal
//! generator appends to; it is re-read on every lookup.
//!
//! A line that fails to parse is skipped with a warning. A torn write at
//! the tail is terminated with a newline on open, before anything else is
//! appended, so it only costs that event.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sigexec_core::{
    BoxFuture, Clock, NewOrder, Order, OrderDirection, OrderId, OrderStatus, Price, SystemClock,
    TradingSignal,
};
use tracing::{debug, info, warn};

use crate::book::OrderBook;
use crate::error::{StoreError, StoreResult};
use crate::store::{select_signals, OrderStore, StatusChange};

pub const ORDERS_FILE: &str = "orders.jsonl";
pub const SIGNALS_FILE: &str = "signals.jsonl";

/// One line of the order journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JournalEvent {
    Created {
        order: Order,
    },
    StatusChanged {
        id: OrderId,
        status: OrderStatus,
        reason: Option<String>,
        exchange_response: Option<serde_json::Value>,
        at: DateTime<Utc>,
    },
    StopMoved {
        id: OrderId,
        stop_price: Price,
        at: DateTime<Utc>,
    },
}

struct JournalState {
    book: OrderBook,
    writer: BufWriter<File>,
    events_written: usize,
}

impl JournalState {
    fn append(&mut self, event: &JournalEvent) -> StoreResult<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        self.events_written += 1;
        Ok(())
    }
}

/// Order store backed by an append-only journal in `dir`.
pub struct JournalOrderStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<JournalState>,
}

impl JournalOrderStore {
    /// Open (or create) the journal in `dir` and replay it.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_clock(dir, Arc::new(SystemClock))
    }

    pub fn open_with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let orders_path = dir.join(ORDERS_FILE);
        let book = replay(&orders_path)?;

        info!(
            path = %orders_path.display(),
            orders = book.len(),
            "Opening order journal (append mode)"
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&orders_path)?;
        seal_torn_tail(&orders_path, &mut file)?;

        Ok(Self {
            dir,
            clock,
            state: Mutex::new(JournalState {
                book,
                writer: BufWriter::new(file),
                events_written: 0,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a signal to `signals.jsonl`. Used for paper runs and tests;
    /// in production the signal generator owns this file.
    pub fn append_signal(&self, signal: &TradingSignal) -> StoreResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(SIGNALS_FILE))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", serde_json::to_string(signal)?)?;
        writer.flush()?;
        Ok(())
    }

    /// All rows in id order.
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().book.all()
    }

    fn read_signals(&self) -> StoreResult<Vec<TradingSignal>> {
        let path = self.dir.join(SIGNALS_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut signals = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradingSignal>(&line) {
                Ok(signal) => signals.push(signal),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping unreadable signal line"
                ),
            }
        }
        Ok(signals)
    }
}

/// Rebuild the rows from the journal at `path`. A missing file is empty.
fn replay(path: &Path) -> StoreResult<OrderBook> {
    let mut book = OrderBook::default();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(book),
        Err(e) => return Err(e.into()),
    };

    let mut applied = 0usize;
    let mut skipped = 0usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let result = serde_json::from_str::<JournalEvent>(&line)
            .map_err(StoreError::from)
            .and_then(|event| apply(&mut book, event));
        match result {
            Ok(()) => applied += 1,
            Err(e) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping journal line"
                );
            }
        }
    }

    debug!(path = %path.display(), applied, skipped, "Replayed order journal");
    Ok(book)
}

/// Terminate a partial last line so the next append starts on its own line.
fn seal_torn_tail(path: &Path, file: &mut File) -> StoreResult<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    let mut reader = File::open(path)?;
    reader.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    reader.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!(path = %path.display(), "Journal ends mid-line, terminating torn tail");
        file.write_all(b"\n")?;
        file.flush()?;
    }
    Ok(())
}

fn apply(book: &mut OrderBook, event: JournalEvent) -> StoreResult<()> {
    let order = match event {
        JournalEvent::Created { order } => order,
        JournalEvent::StatusChanged {
            id,
            status,
            reason,
            exchange_response,
            at,
        } => {
            let change = StatusChange {
                status,
                reason,
                exchange_response,
            };
            book.prepare_status(id, &change, at)?
        }
        JournalEvent::StopMoved { id, stop_price, at } => book.prepare_stop(id, stop_price, at)?,
    };
    book.put(order);
    Ok(())
}

impl OrderStore for JournalOrderStore {
    fn find_latest_signal(
        &self,
        symbol: &str,
        exchange_name: &str,
        limit: usize,
    ) -> BoxFuture<'_, StoreResult<Vec<TradingSignal>>> {
        let symbol = symbol.to_string();
        let exchange_name = exchange_name.to_string();
        Box::pin(async move {
            let signals = self.read_signals()?;
            Ok(select_signals(&signals, &symbol, &exchange_name, limit))
        })
    }

    fn find_order(
        &self,
        user_id: &str,
        external_id: &str,
        order_dir: OrderDirection,
    ) -> BoxFuture<'_, StoreResult<Option<Order>>> {
        let user_id = user_id.to_string();
        let external_id = external_id.to_string();
        Box::pin(async move {
            let state = self.state.lock();
            Ok(state.book.find(&user_id, &external_id, order_dir).cloned())
        })
    }

    fn create_order(&self, order: NewOrder) -> BoxFuture<'_, StoreResult<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let created = state.book.prepare_create(order, self.clock.now())?;
            state.append(&JournalEvent::Created {
                order: created.clone(),
            })?;
            state.book.put(created.clone());
            debug!(order_id = %created.id, external_id = %created.external_id, "Journaled order");
            Ok(created)
        })
    }

    fn update_status(&self, id: OrderId, change: StatusChange) -> BoxFuture<'_, StoreResult<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let now = self.clock.now();
            let updated = state.book.prepare_status(id, &change, now)?;
            state.append(&JournalEvent::StatusChanged {
                id,
                status: change.status,
                reason: change.reason,
                exchange_response: change.exchange_response,
                at: now,
            })?;
            state.book.put(updated.clone());
            Ok(updated)
        })
    }

    fn update_stop_loss(&self, id: OrderId, stop_price: Price) -> BoxFuture<'_, StoreResult<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let now = self.clock.now();
            let updated = state.book.prepare_stop(id, stop_price, now)?;
            state.append(&JournalEvent::StopMoved {
                id,
                stop_price,
                at: now,
            })?;
            state.book.put(updated.clone());
            Ok(updated)
        })
    }
}

impl Drop for JournalOrderStore {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Err(e) = state.writer.flush() {
            warn!(?e, "Failed to flush order journal on drop");
        }
        info!(
            path = %self.dir.join(ORDERS_FILE).display(),
            events = state.events_written,
            "Closed order journal"
        );
    }
}
