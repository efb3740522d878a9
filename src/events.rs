//! Scheduler events definition
//!
//! These are the decoded forms of the records written by the BPF probes.
//! Decoding from the raw ring buffer layout is implemented by the
//! `tracer::raw` module; by the time an event is built every "unavailable"
//! sentinel has already been turned into `None`.

use std::fmt::{Debug, Display};

use serde::Serialize;

pub const TASK_COMM_LEN: usize = 16;

/// Fixed width task name as found in kernel records. The name is not
/// necessarily NUL terminated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskComm([u8; TASK_COMM_LEN]);

impl TaskComm {
    pub fn new(raw: [u8; TASK_COMM_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN);

        &self.0[..len]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl From<&str> for TaskComm {
    fn from(s: &str) -> Self {
        let mut raw = [0u8; TASK_COMM_LEN];
        let len = s.len().min(TASK_COMM_LEN);
        raw[..len].copy_from_slice(&s.as_bytes()[..len]);

        Self(raw)
    }
}

impl Display for TaskComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl Debug for TaskComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// Scheduling class (or pressure source) a run queue PELT record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeltKind {
    Fair,
    Rt,
    Dl,
    Irq,
    Thermal,
    Unknown(i32),
}

impl From<i32> for PeltKind {
    fn from(tag: i32) -> Self {
        match tag {
            0 => PeltKind::Fair,
            1 => PeltKind::Rt,
            2 => PeltKind::Dl,
            3 => PeltKind::Irq,
            4 => PeltKind::Thermal,
            t => PeltKind::Unknown(t),
        }
    }
}

/// PELT values shared by run queue and task records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeltSignals {
    pub load_avg: Option<u64>,
    pub runnable_avg: Option<u64>,
    pub util_avg: Option<u64>,
    pub uclamp_min: Option<u64>,
    pub uclamp_max: Option<u64>,
    pub util_est_enqueued: Option<u64>,
}

impl PeltSignals {
    /// util_avg bounded by [uclamp_min, uclamp_max]. Requires all three values.
    pub fn uclamped_avg(&self) -> Option<u64> {
        match (self.util_avg, self.uclamp_min, self.uclamp_max) {
            (Some(util), Some(lo), Some(hi)) => Some(util.min(hi).max(lo)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RqPeltEvent {
    pub ts: u64,
    pub cpu: u32,
    pub kind: PeltKind,
    pub pelt: PeltSignals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPeltEvent {
    pub ts: u64,
    pub pid: i32,
    pub comm: TaskComm,
    pub pelt: PeltSignals,
    pub util_est_ewma: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NrRunningEvent {
    pub ts: u64,
    pub cpu: u32,
    pub nr_running: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedSwitchEvent {
    pub ts: u64,
    pub pid: i32,
    pub comm: TaskComm,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreqIdleEvent {
    pub ts: u64,
    pub cpu: u32,
    pub idle_state: i32,
    /// Zero when the idle state selection was right, otherwise the direction
    /// of the miss.
    pub idle_miss: i32,
}

/// Load balance code paths reported by the probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LbPhase {
    NohzIdleBalance,
    RunRebalanceDomains,
    RebalanceDomains,
    BalanceFair,
    PickNextTaskFair,
    NewidleBalance,
    LoadBalance,
    Unknown(i32),
}

impl From<i32> for LbPhase {
    fn from(id: i32) -> Self {
        match id {
            0 => LbPhase::NohzIdleBalance,
            1 => LbPhase::RunRebalanceDomains,
            2 => LbPhase::RebalanceDomains,
            3 => LbPhase::BalanceFair,
            4 => LbPhase::PickNextTaskFair,
            5 => LbPhase::NewidleBalance,
            6 => LbPhase::LoadBalance,
            p => LbPhase::Unknown(p),
        }
    }
}

impl LbPhase {
    pub fn label(&self) -> &'static str {
        match self {
            LbPhase::NohzIdleBalance => "_nohz_idle_balance()",
            LbPhase::RunRebalanceDomains => "run_rebalance_domains()",
            LbPhase::RebalanceDomains => "rebalance_domains()",
            LbPhase::BalanceFair => "balance_fair()",
            LbPhase::PickNextTaskFair => "pick_next_task_fair()",
            LbPhase::NewidleBalance => "newidle_balance()",
            LbPhase::LoadBalance => "load_balance()",
            LbPhase::Unknown(_) => "unknown",
        }
    }
}

/// One level of the scheduling domain hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SdLevel {
    pub name: String,
    pub balance_interval: u64,
}

/// Scheduling domain statistics attached to `rebalance_domains()` entries.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SdStats {
    pub cpu: i32,
    pub levels: Vec<SdLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalanceEvent {
    pub ts: u64,
    pub phase: LbPhase,
    pub this_cpu: i32,
    pub lb_cpu: i32,
    pub entry: bool,
    pub overloaded: Option<i32>,
    pub overutilized: Option<i32>,
    pub misfit_task_load: Option<u64>,
    pub sd_stats: SdStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpiEvent {
    pub ts: u64,
    pub from_cpu: i32,
    pub target_cpu: i32,
    pub callsite: u64,
    pub callback: u64,
}
