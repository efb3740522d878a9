//! Load balance processor.
//!
//! Load balance records come in entry/exit pairs, one pair per balancing code
//! path (phase) and per (this_cpu, lb_cpu). The processor keeps track of open
//! phases, emits them as slices, and forwards the root domain state reported
//! along with every record.

use std::collections::HashMap;

use log::debug;

use crate::context::SignalSwitches;
use crate::events::{LbPhase, LoadBalanceEvent};
use crate::trace::{CpuSignal, TraceRecord, TraceSink, Track};
use crate::tracer::raw::RawLoadBalance;

use super::EventHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PhaseKey {
    phase: LbPhase,
    this_cpu: i32,
    lb_cpu: i32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    #[default]
    Closed,
    Open {
        since: u64,
    },
}

/// Pairs entry and exit records.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phases: HashMap<PhaseKey, PhaseState>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, phase: LbPhase, this_cpu: i32, lb_cpu: i32) -> PhaseState {
        let key = PhaseKey {
            phase,
            this_cpu,
            lb_cpu,
        };

        self.phases.get(&key).copied().unwrap_or_default()
    }

    /// Applies one record. Returns the previous state.
    pub fn update(&mut self, e: &LoadBalanceEvent) -> PhaseState {
        let key = PhaseKey {
            phase: e.phase,
            this_cpu: e.this_cpu,
            lb_cpu: e.lb_cpu,
        };

        let state = self.phases.entry(key).or_default();
        let prev = *state;

        *state = match (prev, e.entry) {
            (PhaseState::Closed, true) => PhaseState::Open { since: e.ts },
            (open @ PhaseState::Open { .. }, true) => open,
            (_, false) => PhaseState::Closed,
        };

        prev
    }

    /// Number of phases currently open.
    pub fn open_count(&self) -> usize {
        self.phases
            .values()
            .filter(|s| matches!(s, PhaseState::Open { .. }))
            .count()
    }
}

pub struct LoadBalanceHandler {
    signals: SignalSwitches,
    tracker: PhaseTracker,
}

impl LoadBalanceHandler {
    pub fn new(signals: SignalSwitches) -> Self {
        Self {
            signals,
            tracker: PhaseTracker::new(),
        }
    }

    pub fn tracker(&self) -> &PhaseTracker {
        &self.tracker
    }
}

impl EventHandler for LoadBalanceHandler {
    type Raw = RawLoadBalance;
    type Event = LoadBalanceEvent;

    const RECORD: &'static str = "lb";

    fn handle(&mut self, e: &LoadBalanceEvent, sink: &mut dyn TraceSink) {
        if !self.signals.load_balance {
            return;
        }

        let prev = self.tracker.update(e);

        if e.phase == LbPhase::RebalanceDomains && e.entry {
            sink.emit(TraceRecord::LbSdStats {
                ts: e.ts,
                stats: e.sd_stats.clone(),
            });
        }

        if let Some(v) = e.overloaded {
            sink.emit(TraceRecord::Counter {
                ts: e.ts,
                track: Track::Overloaded,
                value: v as i64,
            });
        }

        if let Some(v) = e.overutilized {
            sink.emit(TraceRecord::Counter {
                ts: e.ts,
                track: Track::Overutilized,
                value: v as i64,
            });
        }

        if let Some(v) = e.misfit_task_load {
            match u32::try_from(e.lb_cpu) {
                Ok(cpu) => sink.cpu_counter(e.ts, cpu, CpuSignal::Misfit, v),
                Err(_) => debug!("misfit_task_load reported for invalid CPU {}", e.lb_cpu),
            }
        }

        if e.entry {
            sink.emit(TraceRecord::LbEntry {
                ts: e.ts,
                this_cpu: e.this_cpu,
                lb_cpu: e.lb_cpu,
                phase: e.phase.label(),
            });
        } else {
            if prev == PhaseState::Closed {
                debug!(
                    "{} exit without entry on CPU{}/CPU{}",
                    e.phase.label(),
                    e.this_cpu,
                    e.lb_cpu
                );
            }

            sink.emit(TraceRecord::LbExit {
                ts: e.ts,
                this_cpu: e.this_cpu,
                lb_cpu: e.lb_cpu,
            });
        }
    }

    fn finish(&mut self) {
        for (key, state) in self.tracker.phases.iter() {
            if let PhaseState::Open { since } = state {
                debug!(
                    "{} still open on CPU{}/CPU{} since {}",
                    key.phase.label(),
                    key.this_cpu,
                    key.lb_cpu,
                    since
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SdLevel, SdStats};

    fn lb(phase: LbPhase, entry: bool) -> LoadBalanceEvent {
        LoadBalanceEvent {
            ts: 10,
            phase,
            this_cpu: 0,
            lb_cpu: 1,
            entry,
            overloaded: None,
            overutilized: None,
            misfit_task_load: None,
            sd_stats: SdStats {
                cpu: 0,
                levels: vec![SdLevel {
                    name: "MC".into(),
                    balance_interval: 8,
                }],
            },
        }
    }

    fn handler() -> LoadBalanceHandler {
        LoadBalanceHandler::new(SignalSwitches {
            load_balance: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_rebalance_domains_entry_exit() {
        let mut h = handler();
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&lb(LbPhase::RebalanceDomains, true), &mut out);

        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], TraceRecord::LbSdStats { stats, .. } if stats.levels.len() == 1));
        assert_eq!(
            out[1],
            TraceRecord::LbEntry {
                ts: 10,
                this_cpu: 0,
                lb_cpu: 1,
                phase: "rebalance_domains()"
            }
        );
        assert_eq!(
            h.tracker().state(LbPhase::RebalanceDomains, 0, 1),
            PhaseState::Open { since: 10 }
        );

        out.clear();
        h.handle(&lb(LbPhase::RebalanceDomains, false), &mut out);

        assert_eq!(
            out,
            vec![TraceRecord::LbExit {
                ts: 10,
                this_cpu: 0,
                lb_cpu: 1
            }]
        );
        assert_eq!(h.tracker().open_count(), 0);
    }

    #[test]
    fn test_sd_stats_only_for_rebalance_domains() {
        let mut h = handler();
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&lb(LbPhase::LoadBalance, true), &mut out);
        h.handle(&lb(LbPhase::Unknown(42), true), &mut out);

        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[1],
            TraceRecord::LbEntry {
                phase: "unknown",
                ..
            }
        ));
    }

    #[test]
    fn test_root_domain_state() {
        let mut h = handler();
        let mut out: Vec<TraceRecord> = Vec::new();
        let mut e = lb(LbPhase::BalanceFair, false);
        e.overloaded = Some(1);
        e.overutilized = Some(0);
        e.misfit_task_load = Some(300);

        h.handle(&e, &mut out);

        assert_eq!(
            out,
            vec![
                TraceRecord::Counter {
                    ts: 10,
                    track: Track::Overloaded,
                    value: 1
                },
                TraceRecord::Counter {
                    ts: 10,
                    track: Track::Overutilized,
                    value: 0
                },
                TraceRecord::Counter {
                    ts: 10,
                    track: Track::Cpu {
                        cpu: 1,
                        signal: CpuSignal::Misfit
                    },
                    value: 300
                },
                TraceRecord::LbExit {
                    ts: 10,
                    this_cpu: 0,
                    lb_cpu: 1
                },
            ]
        );
    }

    #[test]
    fn test_tracker_transitions() {
        let mut t = PhaseTracker::new();
        let mut e = lb(LbPhase::NewidleBalance, true);

        assert_eq!(t.update(&e), PhaseState::Closed);
        e.ts = 20;
        assert_eq!(t.update(&e), PhaseState::Open { since: 10 });
        assert_eq!(t.open_count(), 1);

        // Distinct CPU pairs are tracked separately.
        e.lb_cpu = 3;
        t.update(&e);
        assert_eq!(t.open_count(), 2);

        e.entry = false;
        assert_eq!(t.update(&e), PhaseState::Open { since: 20 });
        assert_eq!(t.update(&e), PhaseState::Closed);
        assert_eq!(t.open_count(), 1);
    }

    #[test]
    fn test_switched_off() {
        let mut h = LoadBalanceHandler::new(SignalSwitches::default());
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(&lb(LbPhase::RebalanceDomains, true), &mut out);

        assert!(out.is_empty());
        assert_eq!(h.tracker().open_count(), 0);
    }
}
