use crate::IndexArgs;
use clap::Args;

#[derive(Args)]
pub struct CheckArgs {
  #[command(flatten)]
  index: IndexArgs,
}

impl CheckArgs {
  pub fn exec(self) -> napg::Result<()> {
    let index = self.index.load()?;
    let report = index.check_integrity()?;
    if report.orphans > 0 {
      tracing::warn!(
        orphans = report.orphans,
        "some elements have no inbound links"
      );
    }
    tracing::info!(
      elements = report.elements,
      connections = report.connections,
      min_inbound = report.min_inbound,
      max_inbound = report.max_inbound,
      "integrity ok"
    );
    Ok(())
  }
}
