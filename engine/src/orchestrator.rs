//! Cycle scheduling: one engine, one lock, foreground or background.
//!
//! The engine session and the carried temperature live in an
//! [`EngineSlot`] behind a single async mutex; every cycle takes the lock
//! for its whole duration, so the session is never driven from two places
//! at once. Cycles run on blocking worker threads because a decode step
//! blocks for as long as the model needs.
//!
//! Store connections are opened per operation rather than shared: a
//! connection is cheap next to a decode step and pins to whichever worker
//! thread runs the cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use edify_session::EngineSession;
use edify_store::DiscoveryStore;
use edify_types::{Hint, Temperature};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::{JoinError, JoinHandle};

use crate::config::{EdifyConfig, GenerationConfig};
use crate::cycle::{self, CycleError, CycleReport};
use crate::round::CancelFlag;
use crate::sink::{FileSink, Progress, RedirectableSink};

/// What the cycle lock protects: the session and the temperature that
/// carries from one cycle to the next.
#[derive(Debug)]
pub struct EngineSlot<S> {
    pub session: S,
    pub temperature: Temperature,
}

impl<S> EngineSlot<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            temperature: Temperature::ZERO,
        }
    }
}

/// A cycle running on a background worker.
///
/// Its narration goes through a [`RedirectableSink`], initially pointed at
/// a log file; when the user asks for a fact before the cycle finishes,
/// the sink is swung to the console and the caller waits on the handle.
pub struct CycleTask {
    cancel: CancelFlag,
    sink: RedirectableSink,
    join: Option<JoinHandle<Result<CycleReport, CycleError>>>,
}

impl CycleTask {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Points the narration at `sink` and waits for the cycle to finish.
    pub async fn redirect_and_wait(
        mut self,
        sink: Arc<dyn Progress>,
    ) -> Result<CycleReport, CycleError> {
        self.sink.redirect(sink);
        match self.join.take() {
            Some(join) => propagate(join.await),
            None => Err(CycleError::Cancelled),
        }
    }

    /// Asks the cycle to stop and waits briefly for the worker to notice.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take()
            && tokio::time::timeout(Duration::from_secs(5), join)
                .await
                .is_err()
        {
            tracing::warn!("background cycle did not stop within five seconds");
        }
    }
}

impl Drop for CycleTask {
    fn drop(&mut self) {
        // Best-effort stop if the caller exits early; never block in drop.
        self.cancel.cancel();
    }
}

/// Serializes cycles over one engine session.
pub struct Orchestrator<S: EngineSession + 'static> {
    slot: Arc<Mutex<EngineSlot<S>>>,
    db_path: PathBuf,
    background_log: PathBuf,
    generation: GenerationConfig,
    background: Option<CycleTask>,
}

impl<S: EngineSession + 'static> Orchestrator<S> {
    pub fn new(session: S, config: &EdifyConfig) -> Self {
        Self {
            slot: Arc::new(Mutex::new(EngineSlot::new(session))),
            db_path: config.storage.resolve_db_path(),
            background_log: config.storage.background_log(),
            generation: config.generation.clone(),
            background: None,
        }
    }

    #[must_use]
    pub fn background_running(&self) -> bool {
        self.background
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Runs one cycle on a blocking worker, narrating to `sink`, and
    /// waits for it.
    pub async fn run_cycle_foreground(
        &self,
        sink: Arc<dyn Progress>,
    ) -> Result<CycleReport, CycleError> {
        let slot = Arc::clone(&self.slot).lock_owned().await;
        let db_path = self.db_path.clone();
        let generation = self.generation.clone();
        let join = tokio::task::spawn_blocking(move || {
            run_locked_cycle(slot, &db_path, &generation, sink.as_ref(), &CancelFlag::new())
        });
        propagate(join.await)
    }

    /// Starts a cycle on a background worker narrating to the background
    /// log. The worker queues on the cycle lock, so a running foreground
    /// cycle finishes first. Replaces a finished task; callers check
    /// [`background_running`](Self::background_running) before starting a
    /// competing one.
    pub fn spawn_background(&mut self) -> Result<(), CycleError> {
        let file = FileSink::create(&self.background_log)?;
        let sink = RedirectableSink::new(Arc::new(file));
        let cancel = CancelFlag::new();

        let slot = Arc::clone(&self.slot);
        let db_path = self.db_path.clone();
        let generation = self.generation.clone();
        let worker_sink = sink.clone();
        let worker_cancel = cancel.clone();
        let join = tokio::task::spawn_blocking(move || {
            let slot = slot.blocking_lock_owned();
            run_locked_cycle(slot, &db_path, &generation, &worker_sink, &worker_cancel)
        });

        tracing::info!(log = %self.background_log.display(), "background cycle started");
        self.background = Some(CycleTask {
            cancel,
            sink,
            join: Some(join),
        });
        Ok(())
    }

    /// Serves the next fact, generating when none are queued.
    ///
    /// A queue made stale by preference changes is re-evaluated first.
    /// When the queue is empty, a running background cycle is redirected
    /// to `sink` and awaited instead of starting a competing one; with no
    /// background cycle, a foreground cycle runs. A cycle that yields no
    /// survivors returns `None`; the escalated temperature carries, so
    /// asking again retries hotter. Serving the last queued fact starts a
    /// background pre-fetch for the next request.
    pub async fn next_discovery(
        &mut self,
        sink: Arc<dyn Progress>,
    ) -> Result<Option<String>, CycleError> {
        if self.queue_is_stale()? {
            self.reevaluate_queue(Arc::clone(&sink)).await?;
        }

        if let Some(text) = self.promote(sink.as_ref())? {
            return Ok(Some(text));
        }

        if let Some(task) = self.background.take() {
            sink.line(
                "\nBringing the background generation into the foreground...",
                Hint::Note,
            );
            task.redirect_and_wait(Arc::clone(&sink)).await?;
        } else {
            self.run_cycle_foreground(Arc::clone(&sink)).await?;
        }

        let served = self.promote(sink.as_ref())?;
        if served.is_none() {
            sink.line("\nAsk again to retry at the raised temperature.", Hint::Note);
        }
        Ok(served)
    }

    /// Takes the front of the pending queue; taking the last queued fact
    /// starts a background pre-fetch.
    fn promote(&mut self, sink: &dyn Progress) -> Result<Option<String>, CycleError> {
        let promoted = {
            let mut store = DiscoveryStore::open(&self.db_path)?;
            let text = store.promote_next_pending()?;
            text.map(|text| (text, store.pending_count()))
        };
        let Some((text, remaining)) = promoted else {
            return Ok(None);
        };
        if remaining == 0 && !self.background_running() {
            match self.spawn_background() {
                Ok(()) => sink.line(
                    "\nThat was the last queued fact; generating more in the background.",
                    Hint::Note,
                ),
                Err(err) => {
                    tracing::warn!("could not start the pre-fetch cycle: {err}");
                }
            }
        }
        Ok(Some(text))
    }

    /// Stops any background cycle before exit.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.background.take() {
            task.shutdown().await;
        }
    }

    fn queue_is_stale(&self) -> Result<bool, CycleError> {
        let store = DiscoveryStore::open(&self.db_path)?;
        Ok(store.has_stale_pending()?)
    }

    async fn reevaluate_queue(&self, sink: Arc<dyn Progress>) -> Result<usize, CycleError> {
        let slot = Arc::clone(&self.slot).lock_owned().await;
        let db_path = self.db_path.clone();
        let generation = self.generation.clone();
        let join = tokio::task::spawn_blocking(move || {
            let mut slot = slot;
            let mut store = DiscoveryStore::open(&db_path)?;
            cycle::reevaluate_pending(
                &mut slot.session,
                &mut store,
                &generation,
                sink.as_ref(),
                &CancelFlag::new(),
            )
        });
        propagate(join.await)
    }
}

fn run_locked_cycle<S: EngineSession>(
    mut slot: OwnedMutexGuard<EngineSlot<S>>,
    db_path: &Path,
    generation: &GenerationConfig,
    sink: &dyn Progress,
    cancel: &CancelFlag,
) -> Result<CycleReport, CycleError> {
    let mut store = DiscoveryStore::open(db_path)?;
    let temperature = slot.temperature;
    let report = cycle::run_cycle(
        &mut slot.session,
        &mut store,
        temperature,
        generation,
        sink,
        cancel,
    )?;
    slot.temperature = report.temperature;
    Ok(report)
}

fn propagate<T>(result: Result<T, JoinError>) -> T {
    match result {
        Ok(value) => value,
        // Cycle workers are never aborted, so a join failure is a panic on
        // the worker thread; resume it here.
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}
