//! sched-analyzer runtime parameters.
//!
//! This module defines the `AnalyzerContext` struct containing all the
//! parameters needed at runtime. The context is built once from command line
//! parameters and is never modified afterwards; every worker gets a shared
//! read-only reference to it.
//! ```no_run
//! use sched_analyzer::{cli::Cli, context::AnalyzerContext};
//! use clap::Parser;
//!
//! let args = Cli::parse();
//! let ctx = AnalyzerContext::from(&args);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::filter::TaskFilter;
use crate::io::OutputFile;
use crate::trace::writer::TraceFormat;

/// One switch per observable signal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SignalSwitches {
    pub load_avg_cpu: bool,
    pub runnable_avg_cpu: bool,
    pub util_avg_cpu: bool,
    pub util_avg_rt: bool,
    pub util_avg_dl: bool,
    pub util_avg_irq: bool,
    pub load_avg_thermal: bool,
    pub util_est_cpu: bool,

    pub load_avg_task: bool,
    pub runnable_avg_task: bool,
    pub util_avg_task: bool,
    pub util_est_task: bool,

    pub cpu_nr_running: bool,
    pub cpu_idle: bool,
    pub load_balance: bool,
    pub ipi: bool,
}

impl SignalSwitches {
    /// Returns true if at least one per-task signal is traced.
    pub fn any_task_signal(&self) -> bool {
        self.load_avg_task || self.runnable_avg_task || self.util_avg_task || self.util_est_task
    }

    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

impl From<&Cli> for SignalSwitches {
    fn from(cli: &Cli) -> Self {
        Self {
            load_avg_cpu: cli.cpu_load_avg,
            runnable_avg_cpu: cli.cpu_runnable_avg,
            util_avg_cpu: cli.cpu_util_avg,
            util_avg_rt: cli.cpu_util_avg_rt,
            util_avg_dl: cli.cpu_util_avg_dl,
            util_avg_irq: cli.cpu_util_avg_irq,
            load_avg_thermal: cli.cpu_load_avg_thermal,
            util_est_cpu: cli.cpu_util_est,
            load_avg_task: cli.task_load_avg,
            runnable_avg_task: cli.task_runnable_avg,
            util_avg_task: cli.task_util_avg,
            util_est_task: cli.task_util_est,
            cpu_nr_running: cli.cpu_nr_running,
            cpu_idle: cli.cpu_idle,
            load_balance: cli.load_balance,
            ipi: cli.ipi,
        }
    }
}

/// Contains all sched-analyzer parameters
#[derive(Debug, Clone)]
pub struct AnalyzerContext {
    pub signals: SignalSwitches,
    /// Task filter applied to per-task events.
    pub filter: TaskFilter,
    pub output: OutputFile,
    pub output_format: TraceFormat,
    /// Precompiled BPF object holding the scheduler probes.
    pub bpf_obj: PathBuf,
    /// Upper bound on a single ring buffer poll.
    pub poll_timeout: Duration,
    /// EBPF ring buffer poll interval
    pub poll_interval: Duration,
    pub tx_batch_size: usize,
    pub verbose: bool,
}

impl AnalyzerContext {
    /// Worst case delay between the termination flag being raised and a worker
    /// noticing it.
    pub fn shutdown_latency(&self) -> Duration {
        self.poll_timeout + self.poll_interval
    }
}

impl Default for AnalyzerContext {
    fn default() -> Self {
        Self {
            signals: SignalSwitches::default(),
            filter: TaskFilter::default(),
            output: OutputFile::new(None, None, TraceFormat::default()),
            output_format: TraceFormat::default(),
            bpf_obj: PathBuf::from("sched-analyzer.bpf.o"),
            poll_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(10),
            tx_batch_size: 4 * 1024,
            verbose: false,
        }
    }
}

impl From<&Cli> for AnalyzerContext {
    fn from(cli_opts: &Cli) -> Self {
        Self {
            signals: SignalSwitches::from(cli_opts),
            filter: TaskFilter::new(cli_opts.pids.clone(), cli_opts.comms.clone()),
            output: OutputFile::from(cli_opts),
            output_format: cli_opts.format,
            bpf_obj: cli_opts.bpf_obj.clone(),
            poll_timeout: cli_opts.poll_timeout(),
            poll_interval: cli_opts.poll_interval(),
            tx_batch_size: cli_opts.tx_batch_size.max(1),
            verbose: cli_opts.verbose,
        }
    }
}
