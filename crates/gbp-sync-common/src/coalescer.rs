//! Per-target single-flight sync coalescing.
//!
//! Submissions for one target are merged while they wait: the first pending
//! `before` is kept and the newest `after` wins. At most one synchronizer call
//! is in flight per target; submissions arriving during that call accumulate
//! into the next pair, which is dispatched as soon as the call completes.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{ConfigPair, PolicySynchronizer, SyncError, SyncStatus};

/// Configuration for [`SyncCoalescer`].
#[derive(Debug, Clone)]
pub struct SyncCoalescerConfig {
    /// Maximum synchronizer calls in flight across all targets.
    /// A value of 1 serializes every call.
    pub max_in_flight: usize,
    /// How long [`SyncCoalescer::close`] waits for in-flight calls.
    pub shutdown_timeout: Duration,
}

impl Default for SyncCoalescerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncCoalescerConfig {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Counters snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCoalescerStats {
    pub submitted: u64,
    pub coalesced: u64,
    pub applied: u64,
    pub not_applied: u64,
    pub failed: u64,
    pub rejected: u64,
}

/// Result of [`SyncCoalescer::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Every in-flight call finished within the timeout.
    Drained,
    /// In-flight calls were cancelled after the timeout expired.
    ForcedCancel,
    /// `close` had already been called.
    AlreadyClosed,
}

/// Completion handle returned by [`SyncCoalescer::submit`].
///
/// Resolves to `true` once the synchronization that absorbed the submission
/// succeeded, and to `false` on failure, rejection or shutdown.
#[derive(Debug)]
pub struct SyncTicket {
    rx: oneshot::Receiver<bool>,
}

impl SyncTicket {
    fn rejected() -> Self {
        let (_, rx) = oneshot::channel();
        Self { rx }
    }
}

impl Future for SyncTicket {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(false))
    }
}

struct PendingSync<C> {
    pair: ConfigPair<C>,
    waiters: Vec<oneshot::Sender<bool>>,
}

struct TargetSlot<C> {
    pending: Option<PendingSync<C>>,
    in_flight: bool,
}

impl<C> Default for TargetSlot<C> {
    fn default() -> Self {
        Self {
            pending: None,
            in_flight: false,
        }
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    coalesced: AtomicU64,
    applied: AtomicU64,
    not_applied: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

struct Shared<S: PolicySynchronizer> {
    synchronizer: Arc<S>,
    slots: DashMap<S::Target, TargetSlot<S::Config>>,
    queue: mpsc::UnboundedSender<S::Target>,
    sequence: AtomicU64,
    closed: AtomicBool,
    counters: Counters,
}

impl<S: PolicySynchronizer> Shared<S> {
    fn schedule(&self, target: S::Target) {
        if let Err(e) = self.queue.send(target) {
            debug!(
                "{}: dispatcher stopped, {:?} stays pending",
                self.synchronizer.name(),
                e.0
            );
        }
    }

    /// Moves the pending pair out of the slot and marks the target in flight.
    fn begin(&self, target: &S::Target) -> Option<PendingSync<S::Config>> {
        let mut slot = self.slots.get_mut(target)?;
        let pending = slot.pending.take()?;
        slot.in_flight = true;
        Some(pending)
    }

    /// Clears the in-flight mark. Returns true if a newer pair is waiting.
    fn finish(&self, target: &S::Target) -> bool {
        match self.slots.entry(target.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().in_flight = false;
                if entry.get().pending.is_some() {
                    true
                } else {
                    entry.remove();
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    fn record(&self, status: SyncStatus) {
        let counter = match status {
            SyncStatus::Applied => &self.counters.applied,
            SyncStatus::NotApplied => &self.counters.not_applied,
            SyncStatus::Failed => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Merges bursts of `(before, after)` submissions per target and drives a
/// [`PolicySynchronizer`] with at most one call in flight per target.
///
/// Must be created inside a tokio runtime; the dispatcher runs as a task.
pub struct SyncCoalescer<S: PolicySynchronizer> {
    shared: Arc<Shared<S>>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<CloseOutcome>>>,
    config: SyncCoalescerConfig,
}

impl<S: PolicySynchronizer> SyncCoalescer<S> {
    /// Creates a coalescer and starts its dispatcher.
    pub fn new(synchronizer: Arc<S>, config: SyncCoalescerConfig) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            synchronizer,
            slots: DashMap::new(),
            queue,
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        });
        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&shared),
            rx,
            shutdown.clone(),
            config.clone(),
        ));

        Self {
            shared,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
            config,
        }
    }

    /// Returns the coalescer configuration.
    pub fn config(&self) -> &SyncCoalescerConfig {
        &self.config
    }

    /// Submits a `(before, after)` pair for `target`.
    ///
    /// If a pair for `target` is already waiting, this submission is merged
    /// into it and the returned ticket resolves with that merged sync.
    pub fn submit(
        &self,
        target: S::Target,
        before: Option<S::Config>,
        after: Option<S::Config>,
    ) -> SyncTicket {
        let (tx, rx) = oneshot::channel();
        let schedule = {
            let entry = self.shared.slots.entry(target.clone());
            // close() sets the flag before it clears the slots.
            if self.shared.closed.load(Ordering::Acquire) {
                drop(entry);
                return self.reject(target);
            }
            let version = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

            let mut slot = entry.or_default();
            let idle = slot.pending.is_none() && !slot.in_flight;
            match slot.pending.as_mut() {
                Some(pending) => {
                    pending.pair.merge(after, version);
                    pending.waiters.push(tx);
                    self.shared.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "{}: merged submission {} for {:?} ({} waiters)",
                        self.shared.synchronizer.name(),
                        version,
                        target,
                        pending.waiters.len()
                    );
                }
                None => {
                    slot.pending = Some(PendingSync {
                        pair: ConfigPair::new(before, after, version),
                        waiters: vec![tx],
                    });
                }
            }
            idle
        };

        if schedule {
            self.shared.schedule(target);
        }
        SyncTicket { rx }
    }

    fn reject(&self, target: S::Target) -> SyncTicket {
        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            "{}: coalescer closed, rejecting sync for {:?}",
            self.shared.synchronizer.name(),
            target
        );
        SyncTicket::rejected()
    }

    /// Targets with a pair waiting to be dispatched.
    pub fn pending_targets(&self) -> Vec<S::Target> {
        self.shared
            .slots
            .iter()
            .filter(|slot| slot.pending.is_some())
            .map(|slot| slot.key().clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SyncCoalescerStats {
        let c = &self.shared.counters;
        SyncCoalescerStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            applied: c.applied.load(Ordering::Relaxed),
            not_applied: c.not_applied.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting work, waits up to the shutdown timeout for in-flight
    /// calls, then cancels whatever is left.
    ///
    /// Pairs that never reached the synchronizer are dropped and their
    /// tickets resolve to `false`.
    pub async fn close(&self) -> CloseOutcome {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return CloseOutcome::AlreadyClosed;
        }
        info!(
            "{}: closing sync coalescer",
            self.shared.synchronizer.name()
        );
        self.shutdown.cancel();

        let dispatcher = self.dispatcher.lock().await.take();
        let outcome = match dispatcher {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        "{}: dispatcher task failed: {}",
                        self.shared.synchronizer.name(),
                        e
                    );
                    CloseOutcome::ForcedCancel
                }
            },
            None => CloseOutcome::Drained,
        };

        let abandoned = self.shared.slots.len();
        self.shared.slots.clear();
        if abandoned > 0 {
            warn!(
                "{}: dropped {} undispatched targets on close",
                self.shared.synchronizer.name(),
                abandoned
            );
        }
        outcome
    }
}

impl<S: PolicySynchronizer> Drop for SyncCoalescer<S> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shutdown.cancel();
    }
}

async fn dispatch_loop<S: PolicySynchronizer>(
    shared: Arc<Shared<S>>,
    mut rx: mpsc::UnboundedReceiver<S::Target>,
    shutdown: CancellationToken,
    config: SyncCoalescerConfig,
) -> CloseOutcome {
    let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                log_join(shared.synchronizer.name(), result);
            }
            target = rx.recv() => {
                let Some(target) = target else { break };
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                tasks.spawn(run_sync(Arc::clone(&shared), target, permit));
            }
        }
    }

    let name = shared.synchronizer.name();
    let drain = async {
        while let Some(result) = tasks.join_next().await {
            log_join(name, result);
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_ok() {
        CloseOutcome::Drained
    } else {
        warn!(
            "{}: {} syncs still running after {:?}, cancelling",
            name,
            tasks.len(),
            config.shutdown_timeout
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        CloseOutcome::ForcedCancel
    }
}

async fn run_sync<S: PolicySynchronizer>(
    shared: Arc<Shared<S>>,
    target: S::Target,
    permit: OwnedSemaphorePermit,
) {
    let Some(PendingSync { pair, waiters }) = shared.begin(&target) else {
        return;
    };
    let name = shared.synchronizer.name();
    let version = pair.version;

    debug!("{}: syncing {:?} at version {}", name, target, version);
    let result = AssertUnwindSafe(shared.synchronizer.sync_policy(&target, pair))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(SyncError::panicked(panic_message(panic.as_ref()))));
    drop(permit);

    let status = SyncStatus::of(&result);
    shared.record(status);
    match &result {
        Ok(true) => debug!("{}: synced {:?} at version {}", name, target, version),
        Ok(false) => warn!(
            "{}: sync for {:?} at version {} was not applied",
            name, target, version
        ),
        Err(e) => error!(
            "{}: sync for {:?} at version {} failed: {}",
            name, target, version, e
        ),
    }

    let reschedule = shared.finish(&target);
    for waiter in waiters {
        let _ = waiter.send(status.is_success());
    }
    if reschedule && !shared.closed.load(Ordering::Acquire) {
        shared.schedule(target);
    }
}

fn log_join(name: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if !e.is_cancelled() {
            error!("{}: sync task failed: {}", name, e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
