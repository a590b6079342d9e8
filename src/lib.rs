pub mod opts;

use federation::{Experiment, OutputWriter, RunConfig, RunSummary};

/// Builds and drives an experiment from an assembled configuration; every
/// binary funnels through here.
pub fn run(cfg: RunConfig) -> anyhow::Result<RunSummary> {
    log::info!(experiment = cfg.kind.name(); "starting run");
    let outfile = cfg.outfile.clone();
    let mut out = OutputWriter::new(outfile.as_deref())?;
    let mut experiment = Experiment::new(cfg)?;
    Ok(experiment.run(&mut out)?)
}
