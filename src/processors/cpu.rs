//! Run queue length and idle state processors.

use crate::context::SignalSwitches;
use crate::events::{FreqIdleEvent, NrRunningEvent};
use crate::trace::{CpuSignal, TraceRecord, TraceSink, Track};
use crate::tracer::raw::{RawFreqIdle, RawNrRunning};

use super::EventHandler;

pub struct NrRunningHandler {
    signals: SignalSwitches,
}

impl NrRunningHandler {
    pub fn new(signals: SignalSwitches) -> Self {
        Self { signals }
    }
}

impl EventHandler for NrRunningHandler {
    type Raw = RawNrRunning;
    type Event = NrRunningEvent;

    const RECORD: &'static str = "rq_nr_running";

    fn handle(&mut self, e: &NrRunningEvent, sink: &mut dyn TraceSink) {
        if self.signals.cpu_nr_running {
            sink.emit(TraceRecord::Counter {
                ts: e.ts,
                track: Track::Cpu {
                    cpu: e.cpu,
                    signal: CpuSignal::NrRunning,
                },
                value: e.nr_running as i64,
            });
        }
    }
}

pub struct FreqIdleHandler {
    signals: SignalSwitches,
}

impl FreqIdleHandler {
    pub fn new(signals: SignalSwitches) -> Self {
        Self { signals }
    }

    fn counter(e: &FreqIdleEvent, signal: CpuSignal, value: i32) -> TraceRecord {
        TraceRecord::Counter {
            ts: e.ts,
            track: Track::Cpu { cpu: e.cpu, signal },
            value: value as i64,
        }
    }
}

impl EventHandler for FreqIdleHandler {
    type Raw = RawFreqIdle;
    type Event = FreqIdleEvent;

    const RECORD: &'static str = "freq_idle";

    fn handle(&mut self, e: &FreqIdleEvent, sink: &mut dyn TraceSink) {
        if !self.signals.cpu_idle {
            return;
        }

        // Idle state -1 is the exit from idle.
        sink.emit(Self::counter(e, CpuSignal::Idle, e.idle_state));

        if e.idle_miss != 0 {
            sink.emit(Self::counter(e, CpuSignal::IdleMiss, e.idle_miss));
        }
    }
}
