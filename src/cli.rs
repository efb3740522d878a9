//! Command line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::trace::writer::TraceFormat;

fn parse_duration(s: &str) -> Result<Duration, String> {
    duration_str::parse(s).map_err(|e| e.to_string())
}

/// Collect scheduler PELT, idle, load balance and IPI signals into a trace.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Trace CPU load_avg
    #[arg(long)]
    pub cpu_load_avg: bool,

    /// Trace CPU runnable_avg
    #[arg(long)]
    pub cpu_runnable_avg: bool,

    /// Trace CPU util_avg (and uclamped util_avg when available)
    #[arg(long)]
    pub cpu_util_avg: bool,

    /// Trace CPU util_avg of the RT class
    #[arg(long)]
    pub cpu_util_avg_rt: bool,

    /// Trace CPU util_avg of the DL class
    #[arg(long)]
    pub cpu_util_avg_dl: bool,

    /// Trace CPU util_avg of IRQs
    #[arg(long)]
    pub cpu_util_avg_irq: bool,

    /// Trace CPU thermal pressure load_avg
    #[arg(long)]
    pub cpu_load_avg_thermal: bool,

    /// Trace CPU util_est.enqueued
    #[arg(long)]
    pub cpu_util_est: bool,

    /// Trace CPU run queue length
    #[arg(long)]
    pub cpu_nr_running: bool,

    /// Trace CPU idle states and idle misses
    #[arg(long)]
    pub cpu_idle: bool,

    /// Trace task load_avg
    #[arg(long)]
    pub task_load_avg: bool,

    /// Trace task runnable_avg
    #[arg(long)]
    pub task_runnable_avg: bool,

    /// Trace task util_avg (and uclamped util_avg when available)
    #[arg(long)]
    pub task_util_avg: bool,

    /// Trace task util_est (enqueued and ewma)
    #[arg(long)]
    pub task_util_est: bool,

    /// Trace load balance phases
    #[arg(long)]
    pub load_balance: bool,

    /// Trace IPIs sent between CPUs
    #[arg(long)]
    pub ipi: bool,

    /// Only trace tasks with this pid (can be repeated)
    #[arg(long = "pid", value_name = "PID", action = ArgAction::Append)]
    pub pids: Vec<i32>,

    /// Only trace tasks whose name contains this string (can be repeated)
    #[arg(long = "comm", value_name = "COMM", action = ArgAction::Append)]
    pub comms: Vec<String>,

    /// Output file name
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    /// Directory the output file is created in
    #[arg(long, value_name = "DIR")]
    pub output_path: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = TraceFormat::Perfetto)]
    pub format: TraceFormat,

    /// Precompiled BPF object containing the scheduler probes
    #[arg(long, value_name = "PATH", default_value = "sched-analyzer.bpf.o")]
    pub bpf_obj: PathBuf,

    /// Maximum time a worker waits on its ring buffer per poll
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub poll_timeout: Option<Duration>,

    /// Pause between two polls of the same ring buffer
    #[arg(long, value_parser = parse_duration, default_value = "10ms")]
    pub poll_interval: Option<Duration>,

    /// Number of trace records a worker batches before handing them to the writer
    #[arg(long, default_value_t = 4 * 1024)]
    pub tx_batch_size: usize,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout.unwrap_or(Duration::from_millis(1000))
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters_and_switches() {
        let cli = Cli::parse_from([
            "sched-analyzer",
            "--cpu-util-avg",
            "--task-util-est",
            "--pid",
            "42",
            "--pid",
            "7",
            "--comm",
            "kworker",
            "--poll-interval",
            "20ms",
        ]);

        assert!(cli.cpu_util_avg);
        assert!(cli.task_util_est);
        assert!(!cli.ipi);
        assert_eq!(cli.pids, vec![42, 7]);
        assert_eq!(cli.comms, vec!["kworker".to_string()]);
        assert_eq!(cli.poll_interval(), Duration::from_millis(20));
        assert_eq!(cli.poll_timeout(), Duration::from_secs(1));
        assert_eq!(cli.format, TraceFormat::Perfetto);
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;

        Cli::command().debug_assert();
    }
}
