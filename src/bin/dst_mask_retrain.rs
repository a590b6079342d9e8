use clap::Parser;

use feddst::opts::{train_mode_from_type_value, CommonOpts};
use federation::ExperimentKind;

/// DST where `--type-value` decides how masked weights take part in local
/// training: 0 part use, 1 full use, 2 dynamic pruning with feedback.
#[derive(Debug, Parser)]
#[command(name = "dst_mask_retrain", version)]
struct Opts {
    #[command(flatten)]
    common: CommonOpts,

    /// 0: part use, 1: full use, 2: dpf
    #[arg(long, default_value_t = 0)]
    type_value: u8,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let mut cfg = opts.common.run_config(ExperimentKind::MaskRetrain);
    cfg.train_mode = train_mode_from_type_value(opts.type_value);
    feddst::run(cfg)?;
    Ok(())
}
