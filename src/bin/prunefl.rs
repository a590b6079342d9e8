use clap::Parser;

use feddst::opts::CommonOpts;
use federation::ExperimentKind;

/// PruneFL baseline: a single-client warmup finds the initial mask, then the
/// server readjusts it from aggregated gradients.
#[derive(Debug, Parser)]
#[command(name = "prunefl", version)]
struct Opts {
    #[command(flatten)]
    common: CommonOpts,

    /// Warmup rounds of iterative pruning on one volunteer client
    #[arg(long, default_value_t = 100)]
    initial_rounds: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let mut cfg = opts.common.run_config(ExperimentKind::PruneFl);
    cfg.initial_rounds = opts.initial_rounds;
    feddst::run(cfg)?;
    Ok(())
}
