use clap::Parser;

use feddst::opts::CommonOpts;
use federation::ExperimentKind;

/// DST followed by a retraining tail with the mask frozen and hard pruning
/// enforced.
#[derive(Debug, Parser)]
#[command(name = "dst_hard_retrain", version)]
struct Opts {
    #[command(flatten)]
    common: CommonOpts,

    /// Frozen-mask rounds appended after the main loop (default: rounds / 4)
    #[arg(long)]
    retrain_rounds: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let mut cfg = opts.common.run_config(ExperimentKind::HardRetrain);
    cfg.retrain_rounds = opts.retrain_rounds.unwrap_or(cfg.rounds / 4);
    feddst::run(cfg)?;
    Ok(())
}
