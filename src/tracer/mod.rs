//! Scheduler event collector.
//!
//! The BPF probes write their records into one ring buffer per event kind.
//! Each ring buffer is consumed by its own worker thread, which decodes the
//! records and feeds them to the matching processor. Workers only share the
//! read-only context and the termination flag.
//!
//! The transport is abstracted behind three small traits so the worker loop
//! and the lifecycle coordination can run against something else than the
//! kernel:
//! - an `EventSourceBinding` hands out one `ChannelHandle` per event kind;
//! - a `ChannelHandle` is moved into its worker thread and opened there into
//!   an `EventChannel`;
//! - an `EventChannel` is polled with a bounded timeout and calls back for
//!   every record.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::context::AnalyzerContext;
use crate::processors::cpu::{FreqIdleHandler, NrRunningHandler};
use crate::processors::ipi::IpiHandler;
use crate::processors::load_balance::LoadBalanceHandler;
use crate::processors::pelt::{RqPeltHandler, SchedSwitchHandler, TaskPeltHandler};
use crate::processors::{RecordDecoder, RecordHandler, RecordStats};
use crate::symbols::SymbolResolver;
use crate::trace::session::{TraceRecorder, TraceSession};

#[cfg(target_os = "linux")]
pub mod bpf;
pub mod options;
pub mod probes;
pub mod raw;

/// Pause between two checks of the worker states.
const COORDINATOR_TICK: Duration = Duration::from_millis(50);

/// Kinds of records, one ring buffer each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RqPelt,
    TaskPelt,
    RqNrRunning,
    SchedSwitch,
    FreqIdle,
    LoadBalance,
    Ipi,
}

impl EventKind {
    /// Every kind, in worker start and join order.
    pub const ALL: [EventKind; 7] = [
        EventKind::RqPelt,
        EventKind::TaskPelt,
        EventKind::RqNrRunning,
        EventKind::SchedSwitch,
        EventKind::FreqIdle,
        EventKind::LoadBalance,
        EventKind::Ipi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RqPelt => "rq_pelt",
            EventKind::TaskPelt => "task_pelt",
            EventKind::RqNrRunning => "rq_nr_running",
            EventKind::SchedSwitch => "sched_switch",
            EventKind::FreqIdle => "freq_idle",
            EventKind::LoadBalance => "lb",
            EventKind::Ipi => "ipi",
        }
    }

    /// Name of the ring buffer map in the BPF object.
    pub fn map_name(&self) -> String {
        format!("{}_rb", self.name())
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    /// The wait was interrupted by a signal. Not an error.
    #[error("poll interrupted")]
    Interrupted,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Called synchronously by a channel for every record it delivers.
pub type RecordCallback = Box<dyn FnMut(&[u8])>;

/// A channel opened in its worker thread.
pub trait EventChannel {
    /// Waits at most `timeout` for records and delivers all the available
    /// ones to the record callback.
    fn poll(&mut self, timeout: Duration) -> Result<(), PollError>;
}

/// Owned, sendable reference to a channel.
pub trait ChannelHandle: Send + 'static {
    type Channel: EventChannel;

    fn open(self, on_record: RecordCallback) -> Result<Self::Channel>;
}

/// The attached instrumentation. Dropping it detaches every probe.
pub trait EventSourceBinding {
    type Handle: ChannelHandle;

    fn channel(&self, kind: EventKind) -> Result<Self::Handle>;
}

/// What a worker did during the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub kind: EventKind,
    pub polls: u64,
    pub interrupted: u64,
    pub records: RecordStats,
    /// The worker stopped on a channel error.
    pub failed: bool,
}

impl WorkerStats {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            polls: 0,
            interrupted: 0,
            records: RecordStats::default(),
            failed: false,
        }
    }
}

/// Polls `channel` until `term` is raised or the channel fails.
pub fn poll_loop<C: EventChannel + ?Sized>(
    channel: &mut C,
    term: &AtomicBool,
    timeout: Duration,
    interval: Duration,
    stats: &mut WorkerStats,
) {
    // Paired with the store in `Collector::run` or in the signal handler.
    while !term.load(Ordering::Acquire) {
        stats.polls += 1;

        match channel.poll(timeout) {
            Ok(()) => {}
            Err(PollError::Interrupted) => stats.interrupted += 1,
            Err(PollError::Transport(e)) => {
                error!("{}: polling failed: {:#}", stats.kind, e);
                stats.failed = true;
                break;
            }
        }

        std::thread::sleep(interval);
    }
}

type BoxedHandler = Box<dyn RecordHandler + Send>;

/// Body of a worker thread.
fn run_worker<H: ChannelHandle>(
    kind: EventKind,
    handle: H,
    handler: BoxedHandler,
    term: Arc<AtomicBool>,
    timeout: Duration,
    interval: Duration,
) -> WorkerStats {
    let mut stats = WorkerStats::new(kind);
    let handler = Rc::new(RefCell::new(handler));
    let on_record = {
        let handler = Rc::clone(&handler);
        Box::new(move |data: &[u8]| handler.borrow_mut().consume(data))
    };

    match handle.open(on_record) {
        Ok(mut channel) => poll_loop(&mut channel, &term, timeout, interval, &mut stats),
        Err(e) => {
            error!("{}: failed to open channel: {:#}", kind, e);
            stats.failed = true;
        }
    }

    // The channel, and with it the record callback, is gone by now.
    stats.records = handler.borrow_mut().finish();

    debug!(
        "{}: {} polls ({} interrupted), {} records, {} malformed",
        kind, stats.polls, stats.interrupted, stats.records.decoded, stats.records.malformed
    );

    stats
}

/// Builds the processor consuming `kind` records.
fn make_handler(
    kind: EventKind,
    ctx: &AnalyzerContext,
    symbols: &Arc<dyn SymbolResolver>,
    recorder: TraceRecorder,
) -> BoxedHandler {
    let s = ctx.signals;

    match kind {
        EventKind::RqPelt => Box::new(RecordDecoder::new(RqPeltHandler::new(s), recorder)),
        EventKind::TaskPelt => Box::new(RecordDecoder::new(
            TaskPeltHandler::new(s, ctx.filter.clone()),
            recorder,
        )),
        EventKind::RqNrRunning => Box::new(RecordDecoder::new(NrRunningHandler::new(s), recorder)),
        EventKind::SchedSwitch => Box::new(RecordDecoder::new(
            SchedSwitchHandler::new(s, ctx.filter.clone()),
            recorder,
        )),
        EventKind::FreqIdle => Box::new(RecordDecoder::new(FreqIdleHandler::new(s), recorder)),
        EventKind::LoadBalance => {
            Box::new(RecordDecoder::new(LoadBalanceHandler::new(s), recorder))
        }
        EventKind::Ipi => Box::new(RecordDecoder::new(
            IpiHandler::new(s, Arc::clone(symbols)),
            recorder,
        )),
    }
}

/// Summary of a collection.
#[derive(Debug, Default, Clone)]
pub struct CollectionReport {
    pub workers: Vec<WorkerStats>,
    pub records_written: usize,
}

impl CollectionReport {
    pub fn decoded(&self) -> u64 {
        self.workers.iter().map(|w| w.records.decoded).sum()
    }
}

/// Ties the lifetime of the workers to the termination flag and the lifetime
/// of the instrumentation to the collection.
pub struct Collector<B: EventSourceBinding> {
    binding: Option<B>,
    ctx: Arc<AnalyzerContext>,
    symbols: Arc<dyn SymbolResolver>,
    term: Arc<AtomicBool>,
}

impl<B: EventSourceBinding> Collector<B> {
    pub fn new(binding: B, ctx: Arc<AnalyzerContext>, symbols: Arc<dyn SymbolResolver>) -> Self {
        Self {
            binding: Some(binding),
            ctx,
            symbols,
            term: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag that stops the collection once raised.
    pub fn term_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.term)
    }

    /// Raise the termination flag on SIGINT and SIGTERM.
    pub fn install_signal_handlers(&self) -> Result<()> {
        for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(sig, Arc::clone(&self.term))
                .with_context(|| format!("Failed to install handler for signal {}", sig))?;
        }

        Ok(())
    }

    fn spawn_workers(
        &self,
        binding: &B,
        session: &TraceSession,
    ) -> Result<Vec<(EventKind, JoinHandle<WorkerStats>)>> {
        // Get every handle first, so that a broken binding fails before any
        // thread is running.
        let mut channels = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            let handle = binding
                .channel(kind)
                .with_context(|| format!("Failed to get the {} channel", kind))?;
            let handler = make_handler(kind, &self.ctx, &self.symbols, session.recorder()?);

            channels.push((kind, handle, handler));
        }

        let mut workers = Vec::with_capacity(channels.len());

        for (kind, handle, handler) in channels {
            let term = Arc::clone(&self.term);
            let timeout = self.ctx.poll_timeout;
            let interval = self.ctx.poll_interval;

            let spawned = std::thread::Builder::new()
                .name(format!("sa-{}", kind))
                .spawn(move || run_worker(kind, handle, handler, term, timeout, interval));

            match spawned {
                Ok(h) => workers.push((kind, h)),
                Err(e) => {
                    self.term.store(true, Ordering::Release);
                    Self::join_workers(workers);

                    return Err(e).with_context(|| format!("Failed to start the {} worker", kind));
                }
            }
        }

        Ok(workers)
    }

    fn join_workers(workers: Vec<(EventKind, JoinHandle<WorkerStats>)>) -> Vec<WorkerStats> {
        let mut stats = Vec::with_capacity(workers.len());

        for (kind, h) in workers {
            match h.join() {
                Ok(s) => stats.push(s),
                Err(_) => error!("{}: worker thread panicked", kind),
            }
        }

        stats
    }

    /// Runs the collection until the termination flag is raised or every
    /// worker exited on its own, then drains the trace session.
    pub fn run(mut self, session: TraceSession) -> Result<CollectionReport> {
        let binding = self
            .binding
            .take()
            .context("Collector already ran")?;

        let workers = match self.spawn_workers(&binding, &session) {
            Ok(w) => w,
            Err(e) => {
                drop(binding);
                if let Err(se) = session.stop() {
                    warn!("Failed to close the trace: {:#}", se);
                }

                return Err(e);
            }
        };

        info!("Collecting (press Ctrl+C to stop)");

        loop {
            if self.term.load(Ordering::Acquire) {
                debug!("Termination requested");
                break;
            }

            if workers.iter().all(|(_, h)| h.is_finished()) {
                warn!("Every worker exited, stopping");
                break;
            }

            std::thread::sleep(COORDINATOR_TICK);
        }

        // Paired with the loads in `poll_loop`.
        self.term.store(true, Ordering::Release);

        let stats = Self::join_workers(workers);

        // Detach the probes.
        drop(binding);

        let records_written = match session.stop() {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to write the trace: {:#}", e);
                0
            }
        };

        Ok(CollectionReport {
            workers: stats,
            records_written,
        })
    }
}
