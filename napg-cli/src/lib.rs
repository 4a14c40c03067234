use clap::Args;
use clap::ValueEnum;
use indicatif::ProgressBar;
use indicatif::ProgressStyle;
use napg::HnswIndex;
use napg::StdMetric;
use napg::StdSpace;
use num_traits::ToPrimitive;
use std::io;
use std::mem::size_of;
use std::path::Path;
use std::path::PathBuf;

pub mod cmd;

pub fn new_pb_with_template(len: impl ToPrimitive, template: &'static str) -> ProgressBar {
  let pb = ProgressBar::new(len.to_u64().unwrap_or(0));
  let style = ProgressStyle::with_template(template)
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
  pb.set_style(style);
  pb
}

/// Create a new progress bar that will show a custom message instead of the progress ratio.
/// This custom message can be set using `.set_message(...)`.
pub fn new_pb_with_msg(len: impl ToPrimitive) -> ProgressBar {
  new_pb_with_template(
    len,
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {msg} ({eta})",
  )
}

/// Create a new progress bar.
pub fn new_pb(len: impl ToPrimitive) -> ProgressBar {
  new_pb_with_template(
    len,
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
  )
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Metric {
  L2,
  InnerProduct,
}

impl From<Metric> for StdMetric {
  fn from(m: Metric) -> Self {
    match m {
      Metric::L2 => StdMetric::L2,
      Metric::InnerProduct => StdMetric::InnerProduct,
    }
  }
}

/// Where an index lives and how to interpret its vectors.
#[derive(Args)]
pub struct IndexArgs {
  /// Path to a napg index file.
  #[arg()]
  pub index: PathBuf,

  /// Dimension of the indexed vectors.
  #[arg(long, short)]
  pub dim: usize,

  #[arg(long, value_enum, default_value_t = Metric::L2)]
  pub metric: Metric,
}

impl IndexArgs {
  pub fn space(&self) -> StdSpace {
    StdSpace::new(self.metric.into(), self.dim)
  }

  pub fn load(&self) -> napg::Result<HnswIndex<StdSpace>> {
    let idx = HnswIndex::load(self.space(), &self.index)?;
    tracing::info!(
      elements = idx.len(),
      deleted = idx.deleted_count(),
      max_level = idx.max_level(),
      "loaded index"
    );
    Ok(idx)
  }
}

/// Reads a packed little-endian f32 matrix where each row is a vector.
pub fn read_vecs(path: &Path, dim: usize) -> napg::Result<Vec<Vec<f32>>> {
  let raw = std::fs::read(path)?;
  let row_bytes = dim * size_of::<f32>();
  if dim == 0 || raw.len() % row_bytes != 0 {
    return Err(
      io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
          "{} is not a packed f32 matrix with {dim} columns",
          path.display()
        ),
      )
      .into(),
    );
  }
  let mut flat = vec![0f32; raw.len() / size_of::<f32>()];
  bytemuck::cast_slice_mut::<f32, u8>(&mut flat).copy_from_slice(&raw);
  Ok(flat.chunks_exact(dim).map(|row| row.to_vec()).collect())
}
