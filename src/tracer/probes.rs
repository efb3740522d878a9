//! Probe selection.
//!
//! Decides, from the requested signals only, which BPF programs of the
//! object are loaded and attached. Attaching a probe nobody listens to costs
//! scheduler hot path cycles, so every group is off unless a signal needs it.

use std::collections::BTreeSet;

use crate::context::SignalSwitches;

/// A set of BPF programs feeding the same signals.
struct ProbeGroup {
    programs: &'static [&'static str],
    wanted: fn(&SignalSwitches) -> bool,
}

const PROBE_GROUPS: &[ProbeGroup] = &[
    ProbeGroup {
        programs: &["handle_pelt_cfs"],
        wanted: |s| s.load_avg_cpu || s.runnable_avg_cpu || s.util_avg_cpu,
    },
    ProbeGroup {
        programs: &["handle_pelt_se"],
        wanted: |s| s.load_avg_task || s.runnable_avg_task || s.util_avg_task,
    },
    ProbeGroup {
        programs: &["handle_pelt_rt"],
        wanted: |s| s.util_avg_rt,
    },
    ProbeGroup {
        programs: &["handle_pelt_dl"],
        wanted: |s| s.util_avg_dl,
    },
    ProbeGroup {
        programs: &["handle_pelt_irq"],
        wanted: |s| s.util_avg_irq,
    },
    ProbeGroup {
        programs: &["handle_pelt_thermal"],
        wanted: |s| s.load_avg_thermal,
    },
    ProbeGroup {
        programs: &["handle_util_est_cfs"],
        wanted: |s| s.util_est_cpu,
    },
    ProbeGroup {
        programs: &["handle_util_est_se"],
        wanted: |s| s.util_est_task,
    },
    ProbeGroup {
        programs: &["handle_sched_update_nr_running"],
        wanted: |s| s.cpu_nr_running,
    },
    ProbeGroup {
        programs: &["handle_cpu_idle", "handle_cpu_idle_miss"],
        wanted: |s| s.cpu_idle,
    },
    ProbeGroup {
        programs: &[
            "handle_run_rebalance_domains_entry",
            "handle_run_rebalance_domains_exit",
            "handle_rebalance_domains_entry",
            "handle_rebalance_domains_exit",
            "handle_balance_fair_entry",
            "handle_balance_fair_exit",
            "handle_pick_next_task_fair_entry",
            "handle_pick_next_task_fair_exit",
            "handle_newidle_balance_entry",
            "handle_newidle_balance_exit",
            "handle_load_balance_entry",
            "handle_load_balance_exit",
        ],
        wanted: |s| s.load_balance,
    },
    ProbeGroup {
        programs: &["handle_ipi_send_cpu"],
        wanted: |s| s.ipi,
    },
    // Zeroes the PELT signals of exiting tasks.
    ProbeGroup {
        programs: &["handle_sched_process_free"],
        wanted: SignalSwitches::any_task_signal,
    },
];

/// Programs that are never attached, whatever the configuration.
pub const ALWAYS_DISABLED: &[&str] = &[
    // Can't be attached reliably yet.
    "handle_nohz_idle_balance_entry",
    "handle_nohz_idle_balance_exit",
    // Only used by the old csv mode.
    "handle_cpu_frequency",
    "handle_softirq_entry",
    "handle_softirq_exit",
    // Replaced by handle_sched_process_free to reset task signals.
    "handle_sched_switch",
];

/// Programs to activate before the object is loaded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbePlan {
    enabled: BTreeSet<&'static str>,
}

impl ProbePlan {
    pub fn resolve(signals: &SignalSwitches) -> Self {
        let enabled = PROBE_GROUPS
            .iter()
            .filter(|g| (g.wanted)(signals))
            .flat_map(|g| g.programs.iter().copied())
            .filter(|p| !ALWAYS_DISABLED.contains(p))
            .collect();

        Self { enabled }
    }

    pub fn is_enabled(&self, program: &str) -> bool {
        self.enabled.contains(program)
    }

    /// Returns true if `program` belongs to any probe group or to the
    /// exclusion list.
    pub fn is_known(program: &str) -> bool {
        ALWAYS_DISABLED.contains(&program)
            || PROBE_GROUPS
                .iter()
                .any(|g| g.programs.contains(&program))
    }

    pub fn programs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.enabled.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> SignalSwitches {
        SignalSwitches {
            load_avg_cpu: true,
            runnable_avg_cpu: true,
            util_avg_cpu: true,
            util_avg_rt: true,
            util_avg_dl: true,
            util_avg_irq: true,
            load_avg_thermal: true,
            util_est_cpu: true,
            load_avg_task: true,
            runnable_avg_task: true,
            util_avg_task: true,
            util_est_task: true,
            cpu_nr_running: true,
            cpu_idle: true,
            load_balance: true,
            ipi: true,
        }
    }

    #[test]
    fn test_nothing_requested() {
        let plan = ProbePlan::resolve(&SignalSwitches::default());

        assert!(plan.is_empty());
    }

    #[test]
    fn test_exclusions_hold_with_everything_on() {
        let plan = ProbePlan::resolve(&all_on());

        for p in ALWAYS_DISABLED {
            assert!(!plan.is_enabled(p), "{} should never be enabled", p);
            assert!(ProbePlan::is_known(p));
        }

        assert!(plan.is_enabled("handle_load_balance_exit"));
        assert!(plan.is_enabled("handle_sched_process_free"));
        assert_eq!(plan.len(), 25);
    }

    #[test]
    fn test_cpu_util_only() {
        let plan = ProbePlan::resolve(&SignalSwitches {
            util_avg_cpu: true,
            ..Default::default()
        });

        assert_eq!(plan.programs().collect::<Vec<_>>(), vec!["handle_pelt_cfs"]);
    }

    #[test]
    fn test_task_exit_reset_follows_task_signals() {
        let plan = ProbePlan::resolve(&SignalSwitches {
            util_est_task: true,
            ..Default::default()
        });

        assert!(plan.is_enabled("handle_util_est_se"));
        assert!(plan.is_enabled("handle_sched_process_free"));
        assert!(!plan.is_enabled("handle_pelt_se"));

        // CPU-scoped signals alone never need the reset.
        let plan = ProbePlan::resolve(&SignalSwitches {
            load_avg_cpu: true,
            util_est_cpu: true,
            cpu_idle: true,
            ..Default::default()
        });

        assert!(!plan.is_enabled("handle_sched_process_free"));
        assert!(plan.is_enabled("handle_cpu_idle_miss"));
    }

    #[test]
    fn test_unknown_program() {
        assert!(!ProbePlan::is_known("handle_something_new"));
        assert!(ProbePlan::is_known("handle_pelt_thermal"));
    }
}
