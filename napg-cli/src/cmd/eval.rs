use crate::new_pb_with_msg;
use crate::read_vecs;
use crate::IndexArgs;
use ahash::HashSet;
use clap::Args;
use napg::BruteforceIndex;
use napg::LabelType;
use napg::SearchStats;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

#[derive(Args)]
pub struct EvalArgs {
  #[command(flatten)]
  index: IndexArgs,

  /// Path to the packed f32 matrix the index was built from. Row numbers are labels.
  #[arg(long, short)]
  vectors: PathBuf,

  /// Path to a packed f32 matrix where each row is a query vector.
  #[arg(long, short)]
  queries: PathBuf,

  /// Number of nearest neighbors to query for.
  #[arg(long, short, default_value_t = 10)]
  k: usize,

  /// Query beam widths to evaluate.
  #[arg(long, value_delimiter = ',', default_value = "10,50,100")]
  ef: Vec<usize>,
}

impl EvalArgs {
  pub fn exec(self) -> napg::Result<()> {
    let index = self.index.load()?;
    let dim = self.index.dim;

    let mut bf = BruteforceIndex::new(self.index.space());
    for (i, v) in read_vecs(&self.vectors, dim)?.iter().enumerate() {
      bf.insert(v, i as LabelType)?;
    }
    let queries = read_vecs(&self.queries, dim)?;
    tracing::info!(n = queries.len(), "loaded query vectors");

    let expected: Vec<HashSet<LabelType>> = queries
      .par_iter()
      .map(|q| {
        bf.search_knn(q, self.k, None)
          .map(|res| res.into_iter().map(|(_, l)| l).collect())
      })
      .collect::<napg::Result<_>>()?;
    tracing::info!("computed exact k-NN");

    for &ef in &self.ef {
      index.set_ef(ef);
      let pb = new_pb_with_msg(queries.len());
      let correct = AtomicUsize::new(0);
      let total = AtomicUsize::new(0);
      let stats = queries
        .par_iter()
        .zip(&expected)
        .map(|(q, knn_expected)| -> napg::Result<SearchStats> {
          let (res, stats) = index.search_knn_with_stats(q, self.k, None)?;
          let knn_got: HashSet<LabelType> = res.into_iter().map(|(_, l)| l).collect();
          let hits = knn_expected.intersection(&knn_got).count();
          let correct = correct.fetch_add(hits, Ordering::Relaxed) + hits;
          let k = knn_expected.len();
          let total = total.fetch_add(k, Ordering::Relaxed) + k;
          let pc = correct as f64 / total.max(1) as f64 * 100.0;
          pb.set_message(format!("Correct: {pc:.2}% ({correct}/{total})"));
          pb.inc(1);
          Ok(stats)
        })
        .try_reduce(SearchStats::default, |mut a, b| {
          a += b;
          Ok(a)
        })?;
      pb.finish();

      let correct = correct.into_inner();
      let total = total.into_inner();
      let n = queries.len().max(1) as f64;
      tracing::info!(
        ef,
        correct,
        total,
        recall = correct as f64 / total.max(1) as f64,
        mean_hops = stats.hops as f64 / n,
        mean_distance_computations = stats.distance_computations as f64 / n,
        "evaluated"
      );
    }
    Ok(())
  }
}
