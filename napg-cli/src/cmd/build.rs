use crate::new_pb;
use crate::read_vecs;
use crate::Metric;
use clap::Args;
use napg::HnswCfg;
use napg::HnswIndex;
use napg::LabelType;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::path::PathBuf;

#[derive(Args)]
pub struct BuildArgs {
  /// Path to a packed f32 matrix where each row is a vector. Row numbers are used as labels.
  #[arg()]
  vectors: PathBuf,

  /// Output path for the index file.
  #[arg(long, short)]
  out: PathBuf,

  /// TOML file with index parameters. Flags below override it.
  #[arg(long)]
  cfg: Option<PathBuf>,

  /// Dimension of vectors.
  #[arg(long, short)]
  dim: Option<usize>,

  #[arg(long, value_enum)]
  metric: Option<Metric>,

  #[arg(long, short)]
  m: Option<usize>,

  #[arg(long)]
  ef_construction: Option<usize>,

  #[arg(long)]
  seed: Option<u64>,

  /// Calibrate norm-range factors before inserting.
  #[arg(long)]
  norm_adjust: bool,

  /// How many leading rows to calibrate norm factors on.
  #[arg(long, default_value_t = 10_000)]
  calibration_rows: usize,
}

impl BuildArgs {
  fn cfg(&self) -> napg::Result<HnswCfg> {
    let mut cfg = match &self.cfg {
      Some(path) => HnswCfg::load(path)?,
      None => HnswCfg::default(),
    };
    if let Some(dim) = self.dim {
      cfg.dim = dim;
    }
    if let Some(metric) = self.metric {
      cfg.metric = metric.into();
    }
    if let Some(m) = self.m {
      cfg.m = m;
    }
    if let Some(ef_construction) = self.ef_construction {
      cfg.ef_construction = ef_construction;
    }
    if let Some(seed) = self.seed {
      cfg.random_seed = seed;
    }
    if self.norm_adjust {
      cfg.norm_adjust.enabled = true;
    }
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn exec(self) -> napg::Result<()> {
    let mut cfg = self.cfg()?;
    let vectors = read_vecs(&self.vectors, cfg.dim)?;
    let n = vectors.len();
    tracing::info!(n, dim = cfg.dim, "loaded vectors");

    cfg.max_elements = n;
    let index = HnswIndex::from_cfg(&cfg)?;

    let sample = &vectors[..self.calibration_rows.min(n)];
    if index.calibrate_norms(&cfg.norm_adjust, sample)? {
      tracing::info!(rows = sample.len(), "calibrated norm factors");
    }

    let pb = new_pb(n);
    for (batch_no, batch) in vectors.chunks(1000).enumerate() {
      batch
        .par_iter()
        .enumerate()
        .try_for_each(|(i, v)| {
          let label = (batch_no * 1000 + i) as LabelType;
          index.insert(v, label).map(|_| ())
        })?;
      pb.inc(batch.len() as u64);
    }
    pb.finish();
    tracing::info!(
      n,
      max_level = index.max_level(),
      bytes = index.serialized_size(),
      "built index"
    );

    index.save(&self.out)?;
    tracing::info!(path = %self.out.display(), "saved index");
    Ok(())
  }
}
