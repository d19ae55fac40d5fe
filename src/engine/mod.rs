mod appointments;
mod availability;
mod catalog;
mod error;
mod queue;
mod ranking;
mod slots;
mod store;
#[cfg(test)]
mod tests;

pub use appointments::BookingRequest;
pub use availability::free_slots;
pub use catalog::{NewBarber, NewService, ServicePatch};
pub use error::{EngineError, Entity};
pub use ranking::{position_of, rank_all, Waiting};
pub use slots::generate_slots;
pub use store::Store;

use std::io;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};
use ulid::{Generator, Ulid};

use crate::limits::MAX_TEXT_LEN;
use crate::model::*;
use crate::wal::Wal;

/// Write locks are striped by record id so two writers on the same
/// appointment or queue entry apply in the order they were logged.
const LOCK_STRIPES: usize = 64;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Takes the first waiting append, drains whatever else is
/// already queued, and commits the lot with one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't ride along with the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One shop: barbers, services, appointments and the walk-in queue.
pub struct Engine {
    pub(super) store: Store,
    wal_tx: mpsc::Sender<WalCommand>,
    ids: StdMutex<Generator>,
    stripes: Vec<Mutex<()>>,
    /// Shared by every append-then-apply; exclusive while compacting, so a
    /// snapshot never misses an event the writer has already logged.
    commit_gate: RwLock<()>,
}

impl Engine {
    /// Replay `wal_path` (if present) and start the WAL writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Store::new();
        for event in &events {
            store.apply_event(event);
        }
        if !events.is_empty() {
            info!(
                "replayed {} events from {} ({} barbers, {} appointments, {} queue entries)",
                events.len(),
                wal_path.display(),
                store.barber_count(),
                store.appointment_count(),
                store.queue_count(),
            );
        }

        Ok(Self {
            store,
            wal_tx,
            ids: StdMutex::new(Generator::new()),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            commit_gate: RwLock::new(()),
        })
    }

    /// Monotonic within this engine, so ids sort in creation order even
    /// inside one millisecond.
    pub(super) fn next_id(&self) -> Ulid {
        let mut generator = match self.ids.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        generator.generate().unwrap_or_else(|_| Ulid::new())
    }

    pub(super) async fn lock_record(&self, id: &Ulid) -> MutexGuard<'_, ()> {
        let stripe = (id.0 % LOCK_STRIPES as u128) as usize;
        self.stripes[stripe].lock().await
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably log the event, then apply it. Nothing is applied if the log write fails.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.store.apply_event(&event);
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.store.snapshot_events();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

pub(super) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Trimmed, non-empty, bounded.
pub(super) fn required_text(field: &'static str, raw: &str) -> Result<String, EngineError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(EngineError::EmptyField(field));
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::FieldTooLong(field));
    }
    Ok(value.to_string())
}

/// Trimmed and bounded; blank becomes `None`.
pub(super) fn optional_text(
    field: &'static str,
    raw: Option<String>,
) -> Result<Option<String>, EngineError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) if value.len() > MAX_TEXT_LEN => Err(EngineError::FieldTooLong(field)),
        Some(value) => Ok(Some(value.to_string())),
    }
}
