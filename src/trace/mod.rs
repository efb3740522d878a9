//! Trace output.
//!
//! Event processors never write to the output directly. They describe each
//! emitted signal as a `TraceRecord` and hand it to a `TraceSink`. The
//! `session` module provides the sink used at runtime, which batches records
//! and forwards them to a single writer thread.

use std::fmt::Display;

use serde::Serialize;

use crate::events::SdStats;

pub mod perfetto;
pub mod session;
pub mod writer;

/// Per-CPU signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuSignal {
    LoadAvg,
    RunnableAvg,
    UtilAvg,
    UclampedAvg,
    UtilAvgRt,
    UtilAvgDl,
    UtilAvgIrq,
    LoadAvgThermal,
    UtilEstEnqueued,
    NrRunning,
    Idle,
    IdleMiss,
    Misfit,
}

impl CpuSignal {
    pub fn name(&self) -> &'static str {
        match self {
            CpuSignal::LoadAvg => "load_avg",
            CpuSignal::RunnableAvg => "runnable_avg",
            CpuSignal::UtilAvg => "util_avg",
            CpuSignal::UclampedAvg => "uclamped_avg",
            CpuSignal::UtilAvgRt => "util_avg_rt",
            CpuSignal::UtilAvgDl => "util_avg_dl",
            CpuSignal::UtilAvgIrq => "util_avg_irq",
            CpuSignal::LoadAvgThermal => "load_avg_thermal",
            CpuSignal::UtilEstEnqueued => "util_est.enqueued",
            CpuSignal::NrRunning => "nr_running",
            CpuSignal::Idle => "idle_state",
            CpuSignal::IdleMiss => "idle_miss",
            CpuSignal::Misfit => "misfit_task_load",
        }
    }
}

/// Per-task signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSignal {
    LoadAvg,
    RunnableAvg,
    UtilAvg,
    UclampedAvg,
    UtilEstEnqueued,
    UtilEstEwma,
}

impl TaskSignal {
    pub fn name(&self) -> &'static str {
        match self {
            TaskSignal::LoadAvg => "load_avg",
            TaskSignal::RunnableAvg => "runnable_avg",
            TaskSignal::UtilAvg => "util_avg",
            TaskSignal::UclampedAvg => "uclamped_avg",
            TaskSignal::UtilEstEnqueued => "util_est.enqueued",
            TaskSignal::UtilEstEwma => "util_est.ewma",
        }
    }
}

/// The time series a counter value belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "subject")]
pub enum Track {
    Cpu {
        cpu: u32,
        signal: CpuSignal,
    },
    Task {
        comm: String,
        pid: i32,
        signal: TaskSignal,
    },
    Overloaded,
    Overutilized,
}

impl Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Track::Cpu { cpu, signal } => write!(f, "CPU{} {}", cpu, signal.name()),
            Track::Task { comm, pid, signal } => write!(f, "{}-{} {}", comm, pid, signal.name()),
            Track::Overloaded => f.write_str("overloaded"),
            Track::Overutilized => f.write_str("overutilized"),
        }
    }
}

/// A resolved kernel address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeAddress {
    pub addr: u64,
    pub name: Option<String>,
}

/// One logical call into the trace sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "record")]
pub enum TraceRecord {
    Counter {
        ts: u64,
        #[serde(flatten)]
        track: Track,
        value: i64,
    },
    LbEntry {
        ts: u64,
        this_cpu: i32,
        lb_cpu: i32,
        phase: &'static str,
    },
    LbExit {
        ts: u64,
        this_cpu: i32,
        lb_cpu: i32,
    },
    LbSdStats {
        ts: u64,
        stats: SdStats,
    },
    Ipi {
        ts: u64,
        from_cpu: i32,
        target_cpu: i32,
        callsite: CodeAddress,
        callback: CodeAddress,
    },
}

impl TraceRecord {
    pub fn ts(&self) -> u64 {
        match self {
            TraceRecord::Counter { ts, .. }
            | TraceRecord::LbEntry { ts, .. }
            | TraceRecord::LbExit { ts, .. }
            | TraceRecord::LbSdStats { ts, .. }
            | TraceRecord::Ipi { ts, .. } => *ts,
        }
    }
}

/// Receives the signals produced by event processors.
pub trait TraceSink {
    fn emit(&mut self, record: TraceRecord);

    fn cpu_counter(&mut self, ts: u64, cpu: u32, signal: CpuSignal, value: u64) {
        self.emit(TraceRecord::Counter {
            ts,
            track: Track::Cpu { cpu, signal },
            value: value as i64,
        });
    }

    fn task_counter(&mut self, ts: u64, comm: &str, pid: i32, signal: TaskSignal, value: u64) {
        self.emit(TraceRecord::Counter {
            ts,
            track: Track::Task {
                comm: comm.to_string(),
                pid,
                signal,
            },
            value: value as i64,
        });
    }
}

impl TraceSink for Vec<TraceRecord> {
    fn emit(&mut self, record: TraceRecord) {
        self.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_names() {
        let t = Track::Cpu {
            cpu: 3,
            signal: CpuSignal::UtilEstEnqueued,
        };
        assert_eq!(t.to_string(), "CPU3 util_est.enqueued");

        let t = Track::Task {
            comm: "kworker/0:1".into(),
            pid: 12,
            signal: TaskSignal::UclampedAvg,
        };
        assert_eq!(t.to_string(), "kworker/0:1-12 uclamped_avg");
        assert_eq!(Track::Overutilized.to_string(), "overutilized");
    }

    #[test]
    fn test_record_json() {
        let r = TraceRecord::Counter {
            ts: 5,
            track: Track::Cpu {
                cpu: 1,
                signal: CpuSignal::NrRunning,
            },
            value: 2,
        };

        let v = serde_json::to_value(&r).unwrap();

        assert_eq!(v["record"], "counter");
        assert_eq!(v["subject"], "cpu");
        assert_eq!(v["signal"], "nr_running");
        assert_eq!(v["value"], 2);
        assert_eq!(r.ts(), 5);
    }
}
