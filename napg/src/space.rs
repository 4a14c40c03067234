use serde::Deserialize;
use serde::Serialize;
use std::mem::size_of;

/// Distance function over fixed-length `f32` vectors.
///
/// The index never interprets vector contents itself; every comparison goes through
/// [`Space::distance`], and storage is sized from [`Space::data_size`].
pub trait Space: Clone + Send + Sync + 'static {
  fn dim(&self) -> usize;
  fn distance(&self, a: &[f32], b: &[f32]) -> f32;

  /// Bytes occupied by one vector in the storage arena.
  fn data_size(&self) -> usize {
    self.dim() * size_of::<f32>()
  }
}

// Eight independent accumulators keep the dependency chain short enough for the compiler to
// vectorize the loop.
const LANES: usize = 8;

pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
  debug_assert_eq!(a.len(), b.len());
  let mut acc = [0.0_f32; LANES];
  let a_chunks = a.chunks_exact(LANES);
  let b_chunks = b.chunks_exact(LANES);
  let tail: f32 = a_chunks
    .remainder()
    .iter()
    .zip(b_chunks.remainder())
    .map(|(x, y)| x * y)
    .sum();
  for (ca, cb) in a_chunks.zip(b_chunks) {
    for i in 0..LANES {
      acc[i] += ca[i] * cb[i];
    }
  }
  acc.iter().sum::<f32>() + tail
}

pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
  debug_assert_eq!(a.len(), b.len());
  let mut acc = [0.0_f32; LANES];
  let a_chunks = a.chunks_exact(LANES);
  let b_chunks = b.chunks_exact(LANES);
  let tail: f32 = a_chunks
    .remainder()
    .iter()
    .zip(b_chunks.remainder())
    .map(|(x, y)| (x - y) * (x - y))
    .sum();
  for (ca, cb) in a_chunks.zip(b_chunks) {
    for i in 0..LANES {
      let d = ca[i] - cb[i];
      acc[i] += d * d;
    }
  }
  acc.iter().sum::<f32>() + tail
}

/// Euclidean norm.
pub fn vector_norm(v: &[f32]) -> f32 {
  inner_product(v, v).sqrt()
}

/// Squared Euclidean distance.
#[derive(Clone, Debug)]
pub struct L2Space {
  dim: usize,
}

impl L2Space {
  pub fn new(dim: usize) -> Self {
    Self { dim }
  }
}

impl Space for L2Space {
  fn dim(&self) -> usize {
    self.dim
  }

  fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), self.dim);
    debug_assert_eq!(b.len(), self.dim);
    l2_sq(a, b)
  }
}

/// `1 - <a, b>`. Vectors are not normalized; callers wanting cosine distance should normalize
/// before inserting and querying.
#[derive(Clone, Debug)]
pub struct InnerProductSpace {
  dim: usize,
}

impl InnerProductSpace {
  pub fn new(dim: usize) -> Self {
    Self { dim }
  }
}

impl Space for InnerProductSpace {
  fn dim(&self) -> usize {
    self.dim
  }

  fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), self.dim);
    debug_assert_eq!(b.len(), self.dim);
    1.0 - inner_product(a, b)
  }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum StdMetric {
  L2,
  InnerProduct,
}

/// A space picked at runtime, e.g. from configuration.
#[derive(Clone, Debug)]
pub enum StdSpace {
  L2(L2Space),
  InnerProduct(InnerProductSpace),
}

impl StdSpace {
  pub fn new(metric: StdMetric, dim: usize) -> Self {
    match metric {
      StdMetric::L2 => Self::L2(L2Space::new(dim)),
      StdMetric::InnerProduct => Self::InnerProduct(InnerProductSpace::new(dim)),
    }
  }

  pub fn metric(&self) -> StdMetric {
    match self {
      Self::L2(_) => StdMetric::L2,
      Self::InnerProduct(_) => StdMetric::InnerProduct,
    }
  }
}

impl Space for StdSpace {
  fn dim(&self) -> usize {
    match self {
      Self::L2(s) => s.dim(),
      Self::InnerProduct(s) => s.dim(),
    }
  }

  fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
    match self {
      Self::L2(s) => s.distance(a, b),
      Self::InnerProduct(s) => s.distance(a, b),
    }
  }
}
