use clap::Parser;

use feddst::opts::CommonOpts;
use federation::ExperimentKind;

/// DST with a per-client co-learner head trained on the penultimate feature.
#[derive(Debug, Parser)]
#[command(name = "ours", version)]
struct Opts {
    #[command(flatten)]
    common: CommonOpts,

    /// Loss scaling factor for the co-learner
    #[arg(long, default_value_t = 1.0)]
    loss_scaling: f32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let mut cfg = opts.common.run_config(ExperimentKind::CoLearner);
    cfg.loss_scaling = opts.loss_scaling;
    feddst::run(cfg)?;
    Ok(())
}
