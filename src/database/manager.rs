//! Database manager.
//!
//! One actor task owns the operation queue. Callers talk to it through the
//! cloneable [`DatabaseManager`] handle; drivers report back through the same
//! handle. Only one operation runs at a time across the whole system, and while
//! any work is scheduled or running the request queue and the poller are paused
//! so nothing else talks on the transport.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::database::driver::{run_operation, DatabaseOperation, Outcome};
use crate::database::reader::{ModemEnumeration, PeekLinkRead, StandardLinkRead};
use crate::database::writer::{ModemManageWrite, PokeLinkWrite, StandardLinkWrite};
use crate::database::DatabaseTuning;
use crate::device::{InsteonDevice, InsteonModem};
use crate::insteon::address::InsteonAddress;
use crate::insteon::transport::Transport;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
}

/// Whose database an operation works on.
#[derive(Clone)]
pub enum DatabaseTarget {
    Modem(Arc<InsteonModem>),
    Device(Arc<InsteonDevice>),
}

impl DatabaseTarget {
    pub fn address(&self) -> InsteonAddress {
        match self {
            DatabaseTarget::Modem(m) => m.address(),
            DatabaseTarget::Device(d) => d.address(),
        }
    }

    /// Pick the protocol strategy for this target and operation.
    fn operation(&self, kind: OperationKind, tuning: &DatabaseTuning) -> Box<dyn DatabaseOperation> {
        match (self, kind) {
            (DatabaseTarget::Modem(m), OperationKind::Read) => {
                Box::new(ModemEnumeration::new(m.clone(), tuning.modem_read_timeout))
            }
            (DatabaseTarget::Modem(m), OperationKind::Write) => {
                Box::new(ModemManageWrite::new(m.clone(), tuning.modem_write_timeout))
            }
            (DatabaseTarget::Device(d), OperationKind::Read) => {
                if d.engine().uses_peek_poke() {
                    Box::new(PeekLinkRead::new(d.clone(), tuning.link_read_timeout))
                } else {
                    Box::new(StandardLinkRead::new(d.clone(), tuning.link_read_timeout))
                }
            }
            (DatabaseTarget::Device(d), OperationKind::Write) => {
                if d.engine().uses_peek_poke() {
                    Box::new(PokeLinkWrite::new(d.clone(), tuning.link_write_timeout))
                } else {
                    Box::new(StandardLinkWrite::new(d.clone(), tuning.link_write_timeout))
                }
            }
        }
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::Modem(m) => write!(f, "modem {}", m.address()),
            DatabaseTarget::Device(d) => write!(f, "device {}", d.address()),
        }
    }
}

/// Another transport consumer that must stay quiet during database operations.
pub trait Pausable: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// Pausable that only records its state. Stands in for a consumer that has no
/// work of its own.
#[derive(Debug, Default)]
pub struct PauseFlag {
    paused: AtomicBool,
    pauses: AtomicU64,
    resumes: AtomicU64,
}

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause_count(&self) -> u64 {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> u64 {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl Pausable for PauseFlag {
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub queued: Vec<(InsteonAddress, OperationKind)>,
    pub in_flight: Option<(InsteonAddress, OperationKind)>,
    pub scheduled: bool,
    pub paused: bool,
    pub dispatched_total: u64,
    pub completed_total: u64,
    pub deduplicated_total: u64,
}

enum ManagerCommand {
    Enqueue {
        target: DatabaseTarget,
        kind: OperationKind,
        delay: Duration,
    },
    OperationCompleted(u64),
    Stop,
    Snapshot(oneshot::Sender<ManagerStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct DatabaseManager {
    tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl DatabaseManager {
    /// Spawn the manager task. Must be called from within a tokio runtime.
    pub fn start(
        tuning: DatabaseTuning,
        transport: Transport,
        request_queue: Arc<dyn Pausable>,
        poller: Arc<dyn Pausable>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DatabaseManager { tx };
        let actor = ManagerActor {
            tuning,
            transport,
            request_queue,
            poller,
            handle: handle.clone(),
            queue: VecDeque::new(),
            scheduled: None,
            running: None,
            paused: false,
            next_id: 1,
            stats: ManagerStats::default(),
        };
        tokio::spawn(actor.run(rx));
        handle
    }

    pub fn read(&self, target: DatabaseTarget, delay: Duration) {
        self.enqueue(target, OperationKind::Read, delay);
    }

    pub fn write(&self, target: DatabaseTarget, delay: Duration) {
        self.enqueue(target, OperationKind::Write, delay);
    }

    fn enqueue(&self, target: DatabaseTarget, kind: OperationKind, delay: Duration) {
        let _ = self.tx.send(ManagerCommand::Enqueue { target, kind, delay });
    }

    /// Reported by the driver task of operation `id` when its run ends.
    pub fn operation_completed(&self, id: u64) {
        let _ = self.tx.send(ManagerCommand::OperationCompleted(id));
    }

    /// Cancel the scheduled dispatch and any running operation, drop the queue
    /// and resume the other consumers. Safe to call repeatedly. Commands sent
    /// after this one are handled only once the cancelled driver has exited.
    pub fn stop(&self) {
        let _ = self.tx.send(ManagerCommand::Stop);
    }

    pub async fn snapshot(&self) -> Option<ManagerStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(ManagerCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    /// Stop and end the manager task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(ManagerCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

struct Running {
    id: u64,
    key: (InsteonAddress, OperationKind),
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

struct ManagerActor {
    tuning: DatabaseTuning,
    transport: Transport,
    request_queue: Arc<dyn Pausable>,
    poller: Arc<dyn Pausable>,
    handle: DatabaseManager,
    queue: VecDeque<(DatabaseTarget, OperationKind)>,
    scheduled: Option<Instant>,
    running: Option<Running>,
    paused: bool,
    next_id: u64,
    stats: ManagerStats,
}

impl ManagerActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ManagerCommand>) {
        loop {
            let deadline = self.scheduled;
            tokio::select! {
                biased;
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        ManagerCommand::Enqueue { target, kind, delay } => self.enqueue(target, kind, delay),
                        ManagerCommand::OperationCompleted(id) => self.completed(id),
                        ManagerCommand::Stop => self.stop().await,
                        ManagerCommand::Snapshot(resp) => { let _ = resp.send(self.stats()); }
                        ManagerCommand::Shutdown(done) => {
                            self.stop().await;
                            let _ = done.send(());
                            break;
                        }
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.dispatch_next();
                }
            }
        }
        debug!("database manager loop terminated");
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            queued: self.queue.iter().map(|(t, k)| (t.address(), *k)).collect(),
            in_flight: self.running.as_ref().map(|r| r.key),
            scheduled: self.scheduled.is_some(),
            paused: self.paused,
            ..self.stats.clone()
        }
    }

    fn enqueue(&mut self, target: DatabaseTarget, kind: OperationKind, delay: Duration) {
        let address = target.address();
        if self
            .queue
            .iter()
            .any(|(t, k)| *k == kind && t.address() == address)
        {
            debug!("{:?} of {:?} already queued", kind, target);
            self.stats.deduplicated_total += 1;
            return;
        }
        debug!("queueing {:?} of {:?}", kind, target);
        self.queue.push_back((target, kind));
        if self.scheduled.is_none() && self.running.is_none() {
            self.pause_consumers();
            self.scheduled = Some(Instant::now() + delay);
        }
    }

    fn dispatch_next(&mut self) {
        self.scheduled = None;
        match self.queue.pop_front() {
            Some((target, kind)) => self.spawn(target, kind),
            None => {
                debug!("database queue drained");
                self.resume_consumers();
            }
        }
    }

    fn spawn(&mut self, target: DatabaseTarget, kind: OperationKind) {
        let id = self.next_id;
        self.next_id += 1;
        let op = target.operation(kind, &self.tuning);
        let cancel = CancellationToken::new();
        match kind {
            OperationKind::Read => metrics::inc_reads_started(),
            OperationKind::Write => metrics::inc_writes_started(),
        }
        debug!("dispatching {:?} of {:?} (op {})", kind, target, id);

        let handle = self.handle.clone();
        let transport = self.transport.clone();
        let watchdog = self.tuning.watchdog_interval;
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = run_operation(op, transport, token, watchdog).await;
            if outcome != Outcome::Stopped {
                match kind {
                    OperationKind::Read => metrics::inc_reads_completed(),
                    OperationKind::Write => metrics::inc_writes_completed(),
                }
                handle.operation_completed(id);
            }
        });

        self.running = Some(Running {
            id,
            key: (target.address(), kind),
            task,
            cancel,
        });
        self.stats.dispatched_total += 1;
    }

    fn completed(&mut self, id: u64) {
        match &self.running {
            Some(running) if running.id == id => {
                self.running = None;
                self.stats.completed_total += 1;
                self.dispatch_next();
            }
            _ => trace!("ignoring completion of stale op {}", id),
        }
    }

    async fn stop(&mut self) {
        self.scheduled = None;
        self.queue.clear();
        if let Some(running) = self.running.take() {
            debug!("cancelling running {:?} of {}", running.key.1, running.key.0);
            running.cancel.cancel();
            if let Err(e) = running.task.await {
                warn!("driver task of op {} failed: {}", running.id, e);
            }
        }
        self.resume_consumers();
    }

    fn pause_consumers(&mut self) {
        if !self.paused {
            trace!("pausing request queue and poller");
            self.request_queue.pause();
            self.poller.pause();
            self.paused = true;
        }
    }

    fn resume_consumers(&mut self) {
        if self.paused {
            trace!("resuming request queue and poller");
            self.request_queue.resume();
            self.poller.resume();
            self.paused = false;
        }
    }
}
