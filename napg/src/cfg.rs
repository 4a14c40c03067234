use crate::error::Error;
use crate::error::Result;
use crate::space::StdMetric;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;

pub const MAX_M: usize = 10_000;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct NormAdjustCfg {
  pub enabled: bool,
  pub subranges: usize,
  pub samples: usize,
  pub neighbors: usize,
  pub seed: u64,
}

impl Default for NormAdjustCfg {
  fn default() -> Self {
    Self {
      enabled: false,
      subranges: 5,
      samples: 50,
      neighbors: 100,
      seed: 100,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct HnswCfg {
  pub dim: usize,
  pub metric: StdMetric,
  pub max_elements: usize,
  /// Target degree above level 0; level 0 allows twice as many links.
  pub m: usize,
  pub ef_construction: usize,
  /// Query beam width. Searches use `max(ef, k)`.
  pub ef: usize,
  pub random_seed: u64,
  /// Calibration needs data, so `HnswIndex::from_cfg` leaves it to
  /// `HnswIndex::calibrate_norms`.
  pub norm_adjust: NormAdjustCfg,
}

impl Default for HnswCfg {
  fn default() -> Self {
    Self {
      metric: StdMetric::L2,
      max_elements: 10_000,
      m: 16,
      ef_construction: 200,
      ef: 10,
      random_seed: 100,
      norm_adjust: NormAdjustCfg::default(),
      // Must be set manually.
      dim: 0,
    }
  }
}

impl HnswCfg {
  pub fn from_toml_str(raw: &str) -> Result<Self> {
    let cfg: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let raw = std::fs::read_to_string(path)?;
    Self::from_toml_str(&raw)
  }

  #[cfg(test)]
  pub fn to_toml_string(&self) -> Result<String> {
    toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
  }

  pub fn validate(&self) -> Result<()> {
    if self.dim == 0 {
      return Err(Error::Config("dim must be > 0".to_string()));
    }
    if self.m < 2 {
      return Err(Error::Config("m must be >= 2".to_string()));
    }
    if self.ef == 0 {
      return Err(Error::Config("ef must be > 0".to_string()));
    }
    if self.norm_adjust.enabled && self.norm_adjust.subranges == 0 {
      return Err(Error::Config(
        "norm_adjust.subranges must be > 0".to_string(),
      ));
    }
    Ok(())
  }
}
