//! PELT signal processors.
//!
//! Run queue and task records carry the same PELT signals. Any of them may be
//! unavailable, in which case it is not emitted at all. When util_avg and both
//! uclamp bounds are known, the clamped util_avg is emitted as well.

use log::warn;

use crate::context::SignalSwitches;
use crate::events::{PeltKind, RqPeltEvent, SchedSwitchEvent, TaskPeltEvent};
use crate::filter::TaskFilter;
use crate::trace::{CpuSignal, TaskSignal, TraceSink};
use crate::tracer::raw::{RawRqPelt, RawSchedSwitch, RawTaskPelt};

use super::EventHandler;

pub struct RqPeltHandler {
    signals: SignalSwitches,
}

impl RqPeltHandler {
    pub fn new(signals: SignalSwitches) -> Self {
        Self { signals }
    }

    fn emit(sink: &mut dyn TraceSink, e: &RqPeltEvent, on: bool, signal: CpuSignal, v: Option<u64>) {
        if let (true, Some(v)) = (on, v) {
            sink.cpu_counter(e.ts, e.cpu, signal, v);
        }
    }
}

impl EventHandler for RqPeltHandler {
    type Raw = RawRqPelt;
    type Event = RqPeltEvent;

    const RECORD: &'static str = "rq_pelt";

    fn handle(&mut self, e: &RqPeltEvent, sink: &mut dyn TraceSink) {
        let s = &self.signals;
        let p = &e.pelt;

        match e.kind {
            PeltKind::Fair => {
                Self::emit(sink, e, s.load_avg_cpu, CpuSignal::LoadAvg, p.load_avg);
                Self::emit(sink, e, s.runnable_avg_cpu, CpuSignal::RunnableAvg, p.runnable_avg);
                Self::emit(sink, e, s.util_avg_cpu, CpuSignal::UtilAvg, p.util_avg);

                if p.util_avg.is_some() {
                    Self::emit(sink, e, s.util_avg_cpu, CpuSignal::UclampedAvg, p.uclamped_avg());
                }

                Self::emit(
                    sink,
                    e,
                    s.util_est_cpu,
                    CpuSignal::UtilEstEnqueued,
                    p.util_est_enqueued,
                );
            }
            PeltKind::Rt => Self::emit(sink, e, s.util_avg_rt, CpuSignal::UtilAvgRt, p.util_avg),
            PeltKind::Dl => Self::emit(sink, e, s.util_avg_dl, CpuSignal::UtilAvgDl, p.util_avg),
            PeltKind::Irq => Self::emit(sink, e, s.util_avg_irq, CpuSignal::UtilAvgIrq, p.util_avg),
            PeltKind::Thermal => Self::emit(
                sink,
                e,
                s.load_avg_thermal,
                CpuSignal::LoadAvgThermal,
                p.load_avg,
            ),
            PeltKind::Unknown(t) => {
                warn!("Unexpected PELT type {} on CPU{}", t, e.cpu);
            }
        }
    }
}

pub struct TaskPeltHandler {
    signals: SignalSwitches,
    filter: TaskFilter,
}

impl TaskPeltHandler {
    pub fn new(signals: SignalSwitches, filter: TaskFilter) -> Self {
        Self { signals, filter }
    }
}

impl EventHandler for TaskPeltHandler {
    type Raw = RawTaskPelt;
    type Event = TaskPeltEvent;

    const RECORD: &'static str = "task_pelt";

    fn handle(&mut self, e: &TaskPeltEvent, sink: &mut dyn TraceSink) {
        let comm = e.comm.to_string_lossy();

        if !self.filter.accept(e.pid, &comm) {
            return;
        }

        let s = &self.signals;
        let p = &e.pelt;
        let mut emit = |on: bool, signal: TaskSignal, v: Option<u64>| {
            if let (true, Some(v)) = (on, v) {
                sink.task_counter(e.ts, &comm, e.pid, signal, v);
            }
        };

        emit(s.load_avg_task, TaskSignal::LoadAvg, p.load_avg);
        emit(s.runnable_avg_task, TaskSignal::RunnableAvg, p.runnable_avg);
        emit(s.util_avg_task, TaskSignal::UtilAvg, p.util_avg);
        emit(s.util_avg_task, TaskSignal::UclampedAvg, p.uclamped_avg());

        // ewma is only meaningful next to a valid enqueued value.
        if p.util_est_enqueued.is_some() {
            emit(s.util_est_task, TaskSignal::UtilEstEnqueued, p.util_est_enqueued);
            emit(s.util_est_task, TaskSignal::UtilEstEwma, e.util_est_ewma);
        }
    }
}

/// Zeroes the signals of tasks that stopped running, so that their tracks do
/// not stay stuck on the last value.
pub struct SchedSwitchHandler {
    signals: SignalSwitches,
    filter: TaskFilter,
}

impl SchedSwitchHandler {
    pub fn new(signals: SignalSwitches, filter: TaskFilter) -> Self {
        Self { signals, filter }
    }
}

impl EventHandler for SchedSwitchHandler {
    type Raw = RawSchedSwitch;
    type Event = SchedSwitchEvent;

    const RECORD: &'static str = "sched_switch";

    fn handle(&mut self, e: &SchedSwitchEvent, sink: &mut dyn TraceSink) {
        if e.running {
            return;
        }

        let comm = e.comm.to_string_lossy();

        if !self.filter.accept(e.pid, &comm) {
            return;
        }

        let s = &self.signals;
        let mut reset = |signal: TaskSignal| sink.task_counter(e.ts, &comm, e.pid, signal, 0);

        if s.load_avg_task {
            reset(TaskSignal::LoadAvg);
        }

        if s.util_avg_task {
            reset(TaskSignal::UtilAvg);
            reset(TaskSignal::UclampedAvg);
        }

        if s.util_est_task {
            reset(TaskSignal::UtilEstEnqueued);
            reset(TaskSignal::UtilEstEwma);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PeltSignals, TaskComm};
    use crate::trace::{Track, TraceRecord};

    fn rq(kind: PeltKind, pelt: PeltSignals) -> RqPeltEvent {
        RqPeltEvent {
            ts: 100,
            cpu: 1,
            kind,
            pelt,
        }
    }

    fn task(pid: i32, comm: &str, pelt: PeltSignals) -> TaskPeltEvent {
        TaskPeltEvent {
            ts: 200,
            pid,
            comm: TaskComm::from(comm),
            pelt,
            util_est_ewma: Some(77),
        }
    }

    fn clamped(util: u64) -> PeltSignals {
        PeltSignals {
            util_avg: Some(util),
            uclamp_min: Some(256),
            uclamp_max: Some(768),
            ..Default::default()
        }
    }

    fn cpu_values(out: &[TraceRecord]) -> Vec<(CpuSignal, i64)> {
        out.iter()
            .map(|r| match r {
                TraceRecord::Counter {
                    track: Track::Cpu { signal, .. },
                    value,
                    ..
                } => (*signal, *value),
                r => panic!("unexpected record {:?}", r),
            })
            .collect()
    }

    fn task_values(out: &[TraceRecord]) -> Vec<(TaskSignal, i64)> {
        out.iter()
            .map(|r| match r {
                TraceRecord::Counter {
                    track: Track::Task { signal, .. },
                    value,
                    ..
                } => (*signal, *value),
                r => panic!("unexpected record {:?}", r),
            })
            .collect()
    }

    #[test]
    fn test_cpu_util_within_clamp() {
        let mut h = RqPeltHandler::new(SignalSwitches {
            util_avg_cpu: true,
            ..Default::default()
        });
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&rq(PeltKind::Fair, clamped(512)), &mut out);

        assert_eq!(
            cpu_values(&out),
            vec![(CpuSignal::UtilAvg, 512), (CpuSignal::UclampedAvg, 512)]
        );
    }

    #[test]
    fn test_cpu_util_above_clamp() {
        let mut h = RqPeltHandler::new(SignalSwitches {
            util_avg_cpu: true,
            ..Default::default()
        });
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&rq(PeltKind::Fair, clamped(900)), &mut out);

        assert_eq!(
            cpu_values(&out),
            vec![(CpuSignal::UtilAvg, 900), (CpuSignal::UclampedAvg, 768)]
        );
    }

    #[test]
    fn test_unavailable_fields_are_not_emitted() {
        let mut h = RqPeltHandler::new(SignalSwitches {
            load_avg_cpu: true,
            runnable_avg_cpu: true,
            util_avg_cpu: true,
            util_est_cpu: true,
            ..Default::default()
        });
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(
            &rq(
                PeltKind::Fair,
                PeltSignals {
                    runnable_avg: Some(10),
                    util_avg: Some(20),
                    uclamp_min: Some(0),
                    ..Default::default()
                },
            ),
            &mut out,
        );

        assert_eq!(
            cpu_values(&out),
            vec![(CpuSignal::RunnableAvg, 10), (CpuSignal::UtilAvg, 20)]
        );
    }

    #[test]
    fn test_class_dispatch() {
        let mut h = RqPeltHandler::new(SignalSwitches {
            util_avg_cpu: true,
            util_avg_dl: true,
            load_avg_thermal: true,
            load_avg_cpu: true,
            ..Default::default()
        });
        let mut out: Vec<TraceRecord> = Vec::new();
        let pelt = PeltSignals {
            load_avg: Some(5),
            util_avg: Some(30),
            ..Default::default()
        };

        h.handle(&rq(PeltKind::Rt, pelt), &mut out);
        h.handle(&rq(PeltKind::Dl, pelt), &mut out);
        h.handle(&rq(PeltKind::Thermal, pelt), &mut out);
        h.handle(&rq(PeltKind::Unknown(9), pelt), &mut out);

        assert_eq!(
            cpu_values(&out),
            vec![(CpuSignal::UtilAvgDl, 30), (CpuSignal::LoadAvgThermal, 5)]
        );
    }

    #[test]
    fn test_switched_off_signals() {
        let mut h = RqPeltHandler::new(SignalSwitches::default());
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&rq(PeltKind::Fair, clamped(512)), &mut out);

        assert!(out.is_empty());
    }

    #[test]
    fn test_task_filtered_out() {
        let mut h = TaskPeltHandler::new(
            SignalSwitches {
                util_avg_task: true,
                ..Default::default()
            },
            TaskFilter::new(vec![1], vec!["app".into()]),
        );
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&task(2, "bash", clamped(512)), &mut out);
        assert!(out.is_empty());

        h.handle(&task(3, "myapp", clamped(100)), &mut out);
        assert_eq!(
            task_values(&out),
            vec![(TaskSignal::UtilAvg, 100), (TaskSignal::UclampedAvg, 256)]
        );
    }

    #[test]
    fn test_task_util_est() {
        let mut h = TaskPeltHandler::new(
            SignalSwitches {
                util_est_task: true,
                ..Default::default()
            },
            TaskFilter::default(),
        );
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&task(3, "app", PeltSignals::default()), &mut out);
        assert!(out.is_empty());

        let pelt = PeltSignals {
            util_est_enqueued: Some(40),
            ..Default::default()
        };
        h.handle(&task(3, "app", pelt), &mut out);

        assert_eq!(
            task_values(&out),
            vec![(TaskSignal::UtilEstEnqueued, 40), (TaskSignal::UtilEstEwma, 77)]
        );
        match &out[0] {
            TraceRecord::Counter {
                track: Track::Task { comm, pid, .. },
                ..
            } => {
                assert_eq!(comm, "app");
                assert_eq!(*pid, 3);
            }
            r => panic!("unexpected record {:?}", r),
        }
    }

    #[test]
    fn test_stopped_task_reset() {
        let mut h = SchedSwitchHandler::new(
            SignalSwitches {
                load_avg_task: true,
                util_est_task: true,
                ..Default::default()
            },
            TaskFilter::default(),
        );
        let mut out: Vec<TraceRecord> = Vec::new();
        let mut e = SchedSwitchEvent {
            ts: 5,
            pid: 10,
            comm: TaskComm::from("app"),
            running: true,
        };

        h.handle(&e, &mut out);
        assert!(out.is_empty());

        e.running = false;
        h.handle(&e, &mut out);

        assert_eq!(
            task_values(&out),
            vec![
                (TaskSignal::LoadAvg, 0),
                (TaskSignal::UtilEstEnqueued, 0),
                (TaskSignal::UtilEstEwma, 0)
            ]
        );
    }

    #[test]
    fn test_stopped_task_reset_util() {
        let mut h = SchedSwitchHandler::new(
            SignalSwitches {
                util_avg_task: true,
                ..Default::default()
            },
            TaskFilter::new(vec![10], vec![]),
        );
        let mut out: Vec<TraceRecord> = Vec::new();
        let mut e = SchedSwitchEvent {
            ts: 5,
            pid: 11,
            comm: TaskComm::from("app"),
            running: false,
        };

        h.handle(&e, &mut out);
        assert!(out.is_empty());

        e.pid = 10;
        h.handle(&e, &mut out);
        assert_eq!(
            task_values(&out),
            vec![(TaskSignal::UtilAvg, 0), (TaskSignal::UclampedAvg, 0)]
        );
    }
}
