//! Norm-range correction factors for neighbor selection.
//!
//! Calibration sorts a buffered sample of the data by Euclidean norm and splits it into
//! contiguous ranges. From each range a few vectors are used as queries, and their nearest
//! neighbors by inner product are found by brute force over the whole buffer. The range's
//! factor is
//!
//! ```text
//! mean <p_i, p_j> over distinct neighbor pairs / mean <x, p> over query-neighbor pairs
//! ```
//!
//! During graph construction the heuristic multiplies a candidate's distance to the query by
//! the factor of the candidate's range. Query-time ranking never sees the factors.
//!
//! Calibration costs `O(samples * ranges * n * dim)` and is meant to run once, before
//! inserting.

use crate::cfg::NormAdjustCfg;
use crate::error::Error;
use crate::error::Result;
use crate::hnsw::HnswIndex;
use crate::space::inner_product;
use crate::space::vector_norm;
use crate::Space;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator;
use std::cmp::Reverse;
use tracing::info;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub struct NormFactors {
  range_start_norms: Vec<f32>,
  factors: Vec<f32>,
}

impl NormFactors {
  pub fn new(range_start_norms: Vec<f32>, factors: Vec<f32>) -> Result<Self> {
    if range_start_norms.is_empty() || range_start_norms.len() != factors.len() {
      return Err(Error::Config(
        "norm ranges and factors must be non-empty and of equal length".to_string(),
      ));
    }
    if range_start_norms.windows(2).any(|w| w[0] > w[1]) {
      return Err(Error::Config(
        "norm range starts must be ascending".to_string(),
      ));
    }
    Ok(Self {
      range_start_norms,
      factors,
    })
  }

  pub fn calibrate(dataset: &[Vec<f32>], cfg: &NormAdjustCfg) -> Result<Self> {
    let n = dataset.len();
    if cfg.subranges == 0 || cfg.samples == 0 || cfg.neighbors == 0 {
      return Err(Error::Config(
        "norm calibration needs positive subranges, samples and neighbors".to_string(),
      ));
    }
    if n < cfg.subranges {
      return Err(Error::Config(format!(
        "norm calibration needs at least {} vectors, got {n}",
        cfg.subranges
      )));
    }

    let norms: Vec<f32> = dataset.iter().map(|v| vector_norm(v)).collect();
    let by_norm: Vec<usize> = (0..n).sorted_by_key(|&i| OrderedFloat(norms[i])).collect();

    let range_len = n / cfg.subranges;
    let neighbors = cfg.neighbors.min(n);
    if neighbors < 2 {
      warn!(n, "too few vectors to measure neighbor spread; using neutral factors");
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut range_start_norms = Vec::with_capacity(cfg.subranges);
    let mut factors = Vec::with_capacity(cfg.subranges);
    for r in 0..cfg.subranges {
      let start = r * range_len;
      let end = if r + 1 == cfg.subranges {
        n
      } else {
        start + range_len
      };
      range_start_norms.push(norms[by_norm[start]]);

      let queries: Vec<usize> = (0..cfg.samples)
        .map(|_| by_norm[rng.gen_range(start..end)])
        .collect();
      let (xp_sum, pp_sum) = queries
        .into_par_iter()
        .map(|q| sample_sums(dataset, &dataset[q], neighbors))
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

      let samples = cfg.samples as f64;
      let xp_mean = xp_sum / (samples * neighbors as f64);
      let pp_pairs = samples * (neighbors * neighbors.saturating_sub(1)) as f64;
      let factor = if pp_pairs == 0.0 || xp_mean == 0.0 {
        1.0
      } else {
        ((pp_sum / pp_pairs) / xp_mean) as f32
      };
      let factor = if factor.is_finite() {
        factor
      } else {
        warn!(range = r, "non-finite norm factor; using 1.0");
        1.0
      };
      factors.push(factor);
    }

    info!(
      ranges = cfg.subranges,
      ?range_start_norms,
      ?factors,
      "calibrated norm factors"
    );
    Self::new(range_start_norms, factors)
  }

  pub fn num_ranges(&self) -> usize {
    self.factors.len()
  }

  pub fn ranges(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
    self
      .range_start_norms
      .iter()
      .copied()
      .zip(self.factors.iter().copied())
  }

  pub fn factor_for_norm(&self, norm: f32) -> f32 {
    // Values below the first start still belong to range 0.
    let idx = self.range_start_norms[1..].partition_point(|&s| s <= norm);
    self.factors[idx]
  }

  pub fn factor_for(&self, vector: &[f32]) -> f32 {
    self.factor_for_norm(vector_norm(vector))
  }
}

/// Sums of `<x, p>` over the top neighbors `p` of `x`, and of `<p_i, p_j>` over distinct
/// ordered neighbor pairs.
fn sample_sums(dataset: &[Vec<f32>], query: &[f32], neighbors: usize) -> (f64, f64) {
  let top = dataset
    .iter()
    .enumerate()
    .map(|(i, v)| (Reverse(OrderedFloat(inner_product(query, v))), i))
    .k_smallest(neighbors)
    .collect_vec();

  let mut xp = 0.0_f64;
  let mut sum = vec![0.0_f64; query.len()];
  let mut sq_norms = 0.0_f64;
  for &(Reverse(OrderedFloat(ip)), i) in &top {
    xp += ip as f64;
    let p = &dataset[i];
    for (s, &x) in sum.iter_mut().zip(p) {
      *s += x as f64;
    }
    sq_norms += inner_product(p, p) as f64;
  }
  // sum over i != j of <p_i, p_j> = |sum p|^2 - sum |p|^2
  let pp = sum.iter().map(|s| s * s).sum::<f64>() - sq_norms;
  (xp, pp)
}

/// Holds vectors until there are enough to calibrate.
#[derive(Debug, Default)]
pub struct NormCalibrator {
  buffer: Vec<Vec<f32>>,
}

impl NormCalibrator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, vector: &[f32]) {
    self.buffer.push(vector.to_vec());
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn finish(self, cfg: &NormAdjustCfg) -> Result<NormFactors> {
    NormFactors::calibrate(&self.buffer, cfg)
  }
}

impl<S: Space> HnswIndex<S> {
  /// Calibrates norm factors from `sample` and installs them if `cfg.enabled`, returning
  /// whether it did. Meant to run before the first insert.
  pub fn calibrate_norms(&self, cfg: &NormAdjustCfg, sample: &[Vec<f32>]) -> Result<bool> {
    if !cfg.enabled {
      return Ok(false);
    }
    for v in sample {
      self.check_dim(v)?;
    }
    let factors = NormFactors::calibrate(sample, cfg)?;
    self.set_norm_factors(Some(factors));
    Ok(true)
  }
}
