//! Options handed to the BPF programs.
//!
//! The BPF object declares a `sa_opts` global as the first variable of its
//! `.bss` section. It is filled from the context before the object is loaded,
//! so that the programs skip work for signals that are switched off and for
//! tasks the filter rejects.

use log::warn;
use plain::Plain;

use crate::context::SignalSwitches;
use crate::events::TASK_COMM_LEN;
use crate::filter::TaskFilter;

/// Capacity of the pid and comm filter tables.
pub const MAX_FILTERS: usize = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOptions {
    pub load_avg_cpu: u8,
    pub runnable_avg_cpu: u8,
    pub util_avg_cpu: u8,
    pub util_avg_rt: u8,
    pub util_avg_dl: u8,
    pub util_avg_irq: u8,
    pub load_avg_thermal: u8,
    pub util_est_cpu: u8,
    pub load_avg_task: u8,
    pub runnable_avg_task: u8,
    pub util_avg_task: u8,
    pub util_est_task: u8,
    pub cpu_nr_running: u8,
    pub cpu_idle: u8,
    pub load_balance: u8,
    pub ipi: u8,
    pub num_pids: u32,
    pub num_comms: u32,
    pub pid: [i32; MAX_FILTERS],
    pub comm: [[u8; TASK_COMM_LEN]; MAX_FILTERS],
}

// SAFETY: integers and byte arrays only, without padding.
unsafe impl Plain for RawOptions {}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            load_avg_cpu: 0,
            runnable_avg_cpu: 0,
            util_avg_cpu: 0,
            util_avg_rt: 0,
            util_avg_dl: 0,
            util_avg_irq: 0,
            load_avg_thermal: 0,
            util_est_cpu: 0,
            load_avg_task: 0,
            runnable_avg_task: 0,
            util_avg_task: 0,
            util_est_task: 0,
            cpu_nr_running: 0,
            cpu_idle: 0,
            load_balance: 0,
            ipi: 0,
            num_pids: 0,
            num_comms: 0,
            pid: [0; MAX_FILTERS],
            comm: [[0; TASK_COMM_LEN]; MAX_FILTERS],
        }
    }
}

impl RawOptions {
    /// Filters beyond `MAX_FILTERS` entries are dropped. Comms are cut to
    /// fit a NUL terminated `TASK_COMM_LEN` buffer.
    pub fn new(s: &SignalSwitches, filter: &TaskFilter) -> Self {
        let mut opts = Self {
            load_avg_cpu: s.load_avg_cpu as u8,
            runnable_avg_cpu: s.runnable_avg_cpu as u8,
            util_avg_cpu: s.util_avg_cpu as u8,
            util_avg_rt: s.util_avg_rt as u8,
            util_avg_dl: s.util_avg_dl as u8,
            util_avg_irq: s.util_avg_irq as u8,
            load_avg_thermal: s.load_avg_thermal as u8,
            util_est_cpu: s.util_est_cpu as u8,
            load_avg_task: s.load_avg_task as u8,
            runnable_avg_task: s.runnable_avg_task as u8,
            util_avg_task: s.util_avg_task as u8,
            util_est_task: s.util_est_task as u8,
            cpu_nr_running: s.cpu_nr_running as u8,
            cpu_idle: s.cpu_idle as u8,
            load_balance: s.load_balance as u8,
            ipi: s.ipi as u8,
            ..Default::default()
        };

        if filter.pids().len() > MAX_FILTERS || filter.comms().len() > MAX_FILTERS {
            warn!("Only the first {} pid and comm filters are applied", MAX_FILTERS);
        }

        for (slot, pid) in opts.pid.iter_mut().zip(filter.pids()) {
            *slot = *pid;
            opts.num_pids += 1;
        }

        for (slot, comm) in opts.comm.iter_mut().zip(filter.comms()) {
            let len = comm.len().min(TASK_COMM_LEN - 1);
            slot[..len].copy_from_slice(&comm.as_bytes()[..len]);
            opts.num_comms += 1;
        }

        opts
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: RawOptions is Plain and has no padding bytes.
        unsafe { plain::as_bytes(self) }
    }
}
