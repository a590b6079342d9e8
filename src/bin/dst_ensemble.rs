use clap::Parser;

use feddst::opts::CommonOpts;
use federation::ExperimentKind;

/// DST where every client trains two nets with independent masks and merges
/// them before upload (entries both kept survive).
#[derive(Debug, Parser)]
#[command(name = "dst_ensemble", version)]
struct Opts {
    #[command(flatten)]
    common: CommonOpts,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let cfg = opts.common.run_config(ExperimentKind::Ensemble);
    feddst::run(cfg)?;
    Ok(())
}
