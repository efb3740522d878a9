//! Event processors.
//!
//! One processor per ring buffer. A processor turns the raw records of its
//! channel into decoded events, filters them according to the
//! `AnalyzerContext`, and emits the resulting signals into a `TraceSink`.
//!
//! Processors are plugged into channel workers through the object safe
//! `RecordHandler` trait, which `RecordDecoder` implements for any
//! `EventHandler`.

use log::{debug, warn};
use plain::Plain;

use crate::trace::TraceSink;
use crate::tracer::raw::{self, DecodeError};

pub mod cpu;
pub mod ipi;
pub mod load_balance;
pub mod pelt;

/// Decoded record counters of one channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordStats {
    pub decoded: u64,
    pub malformed: u64,
}

/// Consumes the decoded events of one channel.
pub trait EventHandler {
    /// Record layout written by the probes.
    type Raw: Plain + Default;
    /// Decoded event.
    type Event: for<'a> TryFrom<&'a Self::Raw, Error = DecodeError>;

    /// Record name used in logs.
    const RECORD: &'static str;

    fn handle(&mut self, event: &Self::Event, sink: &mut dyn TraceSink);

    /// Called once the channel is closed.
    fn finish(&mut self) {}
}

/// Raw record consumer, as seen by a channel worker.
pub trait RecordHandler {
    fn consume(&mut self, data: &[u8]);

    /// Flushes any buffered output and returns the record counters.
    fn finish(&mut self) -> RecordStats;
}

/// Decodes ring buffer samples and feeds them to an `EventHandler`.
pub struct RecordDecoder<H, S> {
    handler: H,
    sink: S,
    stats: RecordStats,
}

impl<H: EventHandler, S: TraceSink> RecordDecoder<H, S> {
    pub fn new(handler: H, sink: S) -> Self {
        Self {
            handler,
            sink,
            stats: RecordStats::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<H: EventHandler, S: TraceSink + Flush> RecordHandler for RecordDecoder<H, S> {
    fn consume(&mut self, data: &[u8]) {
        let decoded = raw::parse::<H::Raw>(H::RECORD, data).and_then(|r| H::Event::try_from(&r));

        match decoded {
            Ok(event) => {
                self.stats.decoded += 1;
                self.handler.handle(&event, &mut self.sink);
            }
            Err(e @ DecodeError::InvalidCpu { .. }) => {
                self.stats.malformed += 1;
                debug!("Skipping record: {}", e);
            }
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Skipping record: {}", e);
            }
        }
    }

    fn finish(&mut self) -> RecordStats {
        self.handler.finish();
        self.sink.flush_records();

        debug!(
            "{}: {} records decoded, {} malformed",
            H::RECORD,
            self.stats.decoded,
            self.stats.malformed
        );

        self.stats
    }
}

/// Sinks that may hold records back.
pub trait Flush {
    fn flush_records(&mut self);
}

impl Flush for crate::trace::session::TraceRecorder {
    fn flush_records(&mut self) {
        self.flush();
    }
}

impl Flush for Vec<crate::trace::TraceRecord> {
    fn flush_records(&mut self) {}
}
