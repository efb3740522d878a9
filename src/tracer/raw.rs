//! Ring buffer record layouts.
//!
//! Each struct mirrors, field for field, the record a BPF probe reserves in
//! its ring buffer. Unsigned fields set to all ones (`-1` on the C side) mean
//! the probe could not read the value. The padding the C compiler inserts is
//! spelled out as `_pad` fields, so that every byte of a record is a field.

use plain::Plain;
use thiserror::Error;

use crate::events::{
    FreqIdleEvent, IpiEvent, LbPhase, LoadBalanceEvent, NrRunningEvent, PeltKind, PeltSignals,
    RqPeltEvent, SchedSwitchEvent, SdLevel, SdStats, TaskComm, TaskPeltEvent, TASK_COMM_LEN,
};

/// Value of an unavailable unsigned long field.
pub const UNAVAILABLE: u64 = u64::MAX;
/// Value of an unavailable int field.
pub const UNAVAILABLE_INT: i32 = -1;

pub const MAX_SD_LEVELS: usize = 3;
pub const SD_NAME_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{record} record too short: got {got} bytes, expected {expected}")]
    TooShort {
        record: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("{record} record for invalid CPU {cpu}")]
    InvalidCpu { record: &'static str, cpu: i32 },
}

#[inline]
fn available(v: u64) -> Option<u64> {
    (v != UNAVAILABLE).then_some(v)
}

fn cpu_id(record: &'static str, cpu: i32) -> Result<u32, DecodeError> {
    u32::try_from(cpu).map_err(|_| DecodeError::InvalidCpu { record, cpu })
}

#[inline]
fn available_int(v: i32) -> Option<i32> {
    (v != UNAVAILABLE_INT).then_some(v)
}

/// Copies a record out of a ring buffer sample.
pub fn parse<T: Plain + Default>(record: &'static str, data: &[u8]) -> Result<T, DecodeError> {
    let mut raw = T::default();

    plain::copy_from_bytes(&mut raw, data).map_err(|_| DecodeError::TooShort {
        record,
        got: data.len(),
        expected: std::mem::size_of::<T>(),
    })?;

    Ok(raw)
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawRqPelt {
    pub ts: u64,
    pub cpu: i32,
    pub kind: i32,
    pub load_avg: u64,
    pub runnable_avg: u64,
    pub util_avg: u64,
    pub util_est_enqueued: u64,
    pub uclamp_min: u64,
    pub uclamp_max: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawTaskPelt {
    pub ts: u64,
    pub pid: i32,
    pub comm: [u8; TASK_COMM_LEN],
    pub _pad: [u8; 4],
    pub load_avg: u64,
    pub runnable_avg: u64,
    pub util_avg: u64,
    pub util_est_enqueued: u64,
    pub util_est_ewma: u64,
    pub uclamp_min: u64,
    pub uclamp_max: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawNrRunning {
    pub ts: u64,
    pub cpu: i32,
    pub nr_running: i32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSchedSwitch {
    pub ts: u64,
    pub pid: i32,
    pub comm: [u8; TASK_COMM_LEN],
    pub running: u8,
    pub _pad: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFreqIdle {
    pub ts: u64,
    pub cpu: i32,
    pub idle_state: i32,
    pub idle_miss: i32,
    pub _pad: [u8; 4],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSdStats {
    pub cpu: i32,
    pub level: [[u8; SD_NAME_LEN]; MAX_SD_LEVELS],
    pub _pad: [u8; 4],
    pub balance_interval: [u64; MAX_SD_LEVELS],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawLoadBalance {
    pub ts: u64,
    pub phase: i32,
    pub this_cpu: i32,
    pub lb_cpu: i32,
    pub entry: u8,
    pub _pad: [u8; 3],
    pub overloaded: i32,
    pub overutilized: i32,
    pub misfit_task_load: u64,
    pub sd_stats: RawSdStats,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawIpi {
    pub ts: u64,
    pub from_cpu: i32,
    pub target_cpu: i32,
    pub callsite: u64,
    pub callback: u64,
}

// SAFETY: all of the above are plain C structs made of integers and byte
// arrays, with no implicit padding; any bit pattern is a valid value.
unsafe impl Plain for RawRqPelt {}
unsafe impl Plain for RawTaskPelt {}
unsafe impl Plain for RawNrRunning {}
unsafe impl Plain for RawSchedSwitch {}
unsafe impl Plain for RawFreqIdle {}
unsafe impl Plain for RawSdStats {}
unsafe impl Plain for RawLoadBalance {}
unsafe impl Plain for RawIpi {}

impl TryFrom<&RawRqPelt> for RqPeltEvent {
    type Error = DecodeError;

    fn try_from(e: &RawRqPelt) -> Result<Self, DecodeError> {
        Ok(Self {
            ts: e.ts,
            cpu: cpu_id("rq_pelt", e.cpu)?,
            kind: PeltKind::from(e.kind),
            pelt: PeltSignals {
                load_avg: available(e.load_avg),
                runnable_avg: available(e.runnable_avg),
                util_avg: available(e.util_avg),
                uclamp_min: available(e.uclamp_min),
                uclamp_max: available(e.uclamp_max),
                util_est_enqueued: available(e.util_est_enqueued),
            },
        })
    }
}

impl TryFrom<&RawTaskPelt> for TaskPeltEvent {
    type Error = DecodeError;

    fn try_from(e: &RawTaskPelt) -> Result<Self, DecodeError> {
        Ok(Self {
            ts: e.ts,
            pid: e.pid,
            comm: TaskComm::new(e.comm),
            pelt: PeltSignals {
                load_avg: available(e.load_avg),
                runnable_avg: available(e.runnable_avg),
                util_avg: available(e.util_avg),
                uclamp_min: available(e.uclamp_min),
                uclamp_max: available(e.uclamp_max),
                util_est_enqueued: available(e.util_est_enqueued),
            },
            util_est_ewma: available(e.util_est_ewma),
        })
    }
}

impl TryFrom<&RawNrRunning> for NrRunningEvent {
    type Error = DecodeError;

    fn try_from(e: &RawNrRunning) -> Result<Self, DecodeError> {
        Ok(Self {
            ts: e.ts,
            cpu: cpu_id("rq_nr_running", e.cpu)?,
            nr_running: e.nr_running,
        })
    }
}

impl TryFrom<&RawSchedSwitch> for SchedSwitchEvent {
    type Error = DecodeError;

    fn try_from(e: &RawSchedSwitch) -> Result<Self, DecodeError> {
        Ok(Self {
            ts: e.ts,
            pid: e.pid,
            comm: TaskComm::new(e.comm),
            running: e.running != 0,
        })
    }
}

impl TryFrom<&RawFreqIdle> for FreqIdleEvent {
    type Error = DecodeError;

    fn try_from(e: &RawFreqIdle) -> Result<Self, DecodeError> {
        Ok(Self {
            ts: e.ts,
            cpu: cpu_id("freq_idle", e.cpu)?,
            idle_state: e.idle_state,
            idle_miss: e.idle_miss,
        })
    }
}

impl From<&RawSdStats> for SdStats {
    fn from(s: &RawSdStats) -> Self {
        let levels = s
            .level
            .iter()
            .zip(s.balance_interval.iter())
            .filter_map(|(name, interval)| {
                let len = name.iter().position(|&b| b == 0).unwrap_or(SD_NAME_LEN);
                if len == 0 {
                    return None;
                }

                Some(SdLevel {
                    name: String::from_utf8_lossy(&name[..len]).into_owned(),
                    balance_interval: *interval,
                })
            })
            .collect();

        Self { cpu: s.cpu, levels }
    }
}

impl TryFrom<&RawLoadBalance> for LoadBalanceEvent {
    type Error = DecodeError;

    fn try_from(e: &RawLoadBalance) -> Result<Self, DecodeError> {
        Ok(Self {
            ts: e.ts,
            phase: LbPhase::from(e.phase),
            this_cpu: e.this_cpu,
            lb_cpu: e.lb_cpu,
            entry: e.entry != 0,
            overloaded: available_int(e.overloaded),
            overutilized: available_int(e.overutilized),
            misfit_task_load: available(e.misfit_task_load),
            sd_stats: SdStats::from(&e.sd_stats),
        })
    }
}

impl TryFrom<&RawIpi> for IpiEvent {
    type Error = DecodeError;

    fn try_from(e: &RawIpi) -> Result<Self, DecodeError> {
        Ok(Self {
            ts: e.ts,
            from_cpu: e.from_cpu,
            target_cpu: e.target_cpu,
            callsite: e.callsite,
            callback: e.callback,
        })
    }
}

/// Views a record as the bytes a probe would have written.
#[cfg(test)]
pub(crate) fn as_bytes<T: Plain>(record: &T) -> &[u8] {
    // SAFETY: T is Plain, hence a POD C struct.
    unsafe {
        std::slice::from_raw_parts((record as *const T) as *const u8, std::mem::size_of::<T>())
    }
}
