use anyhow::Result;
use clap::Parser;
use log::{error, warn};

use sched_analyzer::{cli::Cli, context::AnalyzerContext};

#[cfg(target_os = "linux")]
fn run(ctx: AnalyzerContext) -> Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use log::info;
    use sched_analyzer::preflight::run_preflight_checks;
    use sched_analyzer::symbols::{Kallsyms, NoSymbols, SymbolResolver};
    use sched_analyzer::trace::{session::TraceSession, writer::TraceEventWriter};
    use sched_analyzer::tracer::{bpf::BpfSource, options::RawOptions, probes::ProbePlan, Collector};

    run_preflight_checks(&ctx.bpf_obj)?;

    let symbols: Arc<dyn SymbolResolver> = if ctx.signals.ipi {
        match Kallsyms::load() {
            Ok(k) => Arc::new(k),
            Err(e) => {
                warn!("IPI callbacks will not be resolved: {:#}", e);
                Arc::new(NoSymbols)
            }
        }
    } else {
        Arc::new(NoSymbols)
    };

    let plan = ProbePlan::resolve(&ctx.signals);
    info!("{} probes selected", plan.len());

    let opts = RawOptions::new(&ctx.signals, &ctx.filter);
    let source = BpfSource::open(&ctx.bpf_obj, &opts, &plan)?;

    let out_path = ctx.output.path();
    let out = ctx.output.create()?;
    let session = TraceSession::start(
        TraceEventWriter::new(out, ctx.output_format),
        ctx.tx_batch_size,
    )
    .context("Failed to start the trace session")?;

    let collector = Collector::new(source, Arc::new(ctx), symbols);
    collector.install_signal_handlers()?;

    let report = collector.run(session)?;

    info!(
        "{} records decoded, {} trace records written",
        report.decoded(),
        report.records_written
    );

    println!("Collected {}", out_path.display());

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run(_ctx: AnalyzerContext) -> Result<()> {
    anyhow::bail!("sched-analyzer only runs on Linux")
}

fn main() {
    let opts = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opts.verbose { "debug" } else { "info" }),
    )
    .init();

    let ctx = AnalyzerContext::from(&opts);

    if !ctx.signals.any() {
        warn!("No signal selected, the trace will be empty");
    }

    if let Err(e) = run(ctx) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
