use clap::Parser;

use feddst::opts::CommonOpts;
use federation::ExperimentKind;

/// Federated dynamic sparse training. FedAvg falls out of
/// `--readjustment-ratio 0 --sparsity 0`, FedProx out of `--prox`.
#[derive(Debug, Parser)]
#[command(name = "dst", version)]
struct Opts {
    #[command(flatten)]
    common: CommonOpts,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let cfg = opts.common.run_config(ExperimentKind::Dst);
    feddst::run(cfg)?;
    Ok(())
}
