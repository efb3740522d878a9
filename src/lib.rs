//! A live scheduler telemetry collector.
//!
//! sched-analyzer attaches eBPF probes to the Linux scheduler and turns what
//! they report (PELT signals, run queue length, idle states, load balance
//! phases and IPIs) into a trace that can be loaded in Perfetto.
//!
//! sched-analyzer's main components are:
//! - the __tracer__, which loads the probes selected by the configuration and
//!   runs one worker thread per ring buffer;
//! - the __processors__, which decode the ring buffer records, filter them and
//!   convert them into trace records;
//! - the __trace session__, which serializes the trace records of every worker
//!   on a single writer thread.

pub mod cli;
pub mod context;
pub mod events;
pub mod filter;
pub mod io;
#[cfg(target_os = "linux")]
pub mod preflight;
pub mod processors;
pub mod symbols;
pub mod trace;
pub mod tracer;
