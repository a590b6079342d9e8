use clap::Parser;

use feddst::opts::CommonOpts;
use federation::ExperimentKind;

/// Ablation of `ours` where regrowth picks weights uniformly at random
/// instead of by gradient magnitude.
#[derive(Debug, Parser)]
#[command(name = "cs", version)]
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
    let mut cfg = opts.common.run_config(ExperimentKind::RandomMask);
    cfg.loss_scaling = opts.loss_scaling;
    feddst::run(cfg)?;
    Ok(())
}
