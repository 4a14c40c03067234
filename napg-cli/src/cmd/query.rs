use crate::read_vecs;
use crate::IndexArgs;
use clap::Args;
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Args)]
pub struct QueryArgs {
  #[command(flatten)]
  index: IndexArgs,

  /// Path to a packed f32 matrix where each row is a query vector.
  #[arg(long, short)]
  queries: PathBuf,

  /// Number of nearest neighbors to query for.
  #[arg(long, short, default_value_t = 10)]
  k: usize,

  /// Query beam width.
  #[arg(long)]
  ef: Option<usize>,
}

impl QueryArgs {
  pub fn exec(self) -> napg::Result<()> {
    let index = self.index.load()?;
    if let Some(ef) = self.ef {
      index.set_ef(ef);
    }
    let queries = read_vecs(&self.queries, self.index.dim)?;
    for (i, q) in queries.iter().enumerate() {
      let (results, stats) = index.search_knn_with_stats(q, self.k, None)?;
      let mut line = format!("{i}:");
      for (dist, label) in results {
        // Writing to a String cannot fail.
        let _ = write!(line, " {label}:{dist}");
      }
      println!("{line}");
      tracing::debug!(
        query = i,
        hops = stats.hops,
        distance_computations = stats.distance_computations,
        "searched"
      );
    }
    Ok(())
  }
}
