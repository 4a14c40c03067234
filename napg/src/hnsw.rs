use crate::arena::linklist_count;
use crate::arena::Level0Arena;
use crate::cfg::HnswCfg;
use crate::cfg::MAX_M;
use crate::error::Error;
use crate::error::Result;
use crate::levels::LevelStore;
use crate::locks::LockTable;
use crate::norm::NormFactors;
use crate::space::StdSpace;
use crate::visited::VisitedPool;
use crate::LabelType;
use crate::Space;
use crate::TableInt;
use ahash::HashMap;
use ahash::HashMapExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;
use tracing::warn;

const NO_ENTRY: u64 = 0;

/// Packs the entry point and max level into one word so they are always read together.
/// The high half stores `max_level + 1`; zero means the graph is empty.
fn pack_entry(entry_point: TableInt, max_level: usize) -> u64 {
  ((max_level as u64 + 1) << 32) | entry_point as u64
}

fn unpack_entry(raw: u64) -> Option<(TableInt, usize)> {
  if raw == NO_ENTRY {
    return None;
  }
  Some((raw as u32, ((raw >> 32) - 1) as usize))
}

/// A link list snapshot: ids are read lazily from the underlying atomics.
#[derive(Clone, Copy)]
pub(crate) struct LinkList<'a> {
  slots: &'a [AtomicU32],
}

pub(crate) struct LinkListIter<'a>(std::slice::Iter<'a, AtomicU32>);

impl Iterator for LinkListIter<'_> {
  type Item = TableInt;

  fn next(&mut self) -> Option<TableInt> {
    self.0.next().map(|a| a.load(Ordering::Acquire))
  }
}

impl<'a> IntoIterator for LinkList<'a> {
  type Item = TableInt;
  type IntoIter = LinkListIter<'a>;

  fn into_iter(self) -> Self::IntoIter {
    LinkListIter(self.slots.iter())
  }
}

#[derive(Debug)]
pub struct HnswIndex<S: Space> {
  pub(crate) space: S,

  pub(crate) max_elements: usize,

  pub(crate) m: usize,
  pub(crate) max_m: usize,
  pub(crate) max_m0: usize,
  pub(crate) ef_construction: usize,

  pub(crate) mult: f64,

  pub(crate) visited_pool: VisitedPool,

  /// Keeps `save_to_*` from racing mutations.
  pub(crate) mutation_lock: RwLock<()>,

  pub(crate) locks: LockTable,

  pub(crate) label_lookup: Mutex<HashMap<LabelType, TableInt>>,

  pub(crate) cur_element_count: AtomicUsize,
  pub(crate) num_deleted: AtomicUsize,

  pub(crate) ef: AtomicUsize,
  entry: AtomicU64,

  pub(crate) arena: Level0Arena,
  pub(crate) levels: LevelStore,

  pub(crate) norm_factors: RwLock<Option<Arc<NormFactors>>>,

  level_rng: Mutex<StdRng>,
}

impl HnswIndex<StdSpace> {
  /// Builds an empty index. Norm factors are not calibrated here; see
  /// [`HnswIndex::calibrate_norms`].
  pub fn from_cfg(cfg: &HnswCfg) -> Result<Self> {
    cfg.validate()?;
    let idx = Self::new(
      StdSpace::new(cfg.metric, cfg.dim),
      cfg.max_elements,
      cfg.m,
      cfg.ef_construction,
      cfg.random_seed,
    )?;
    idx.set_ef(cfg.ef);
    Ok(idx)
  }
}

impl<S: Space> HnswIndex<S> {
  pub fn new(
    space: S,
    max_elements: usize,
    m: usize,
    ef_construction: usize,
    random_seed: u64,
  ) -> Result<Self> {
    if space.dim() == 0 {
      return Err(Error::Config("dim must be > 0".to_string()));
    }
    if m < 2 {
      return Err(Error::Config("M must be >= 2".to_string()));
    }
    if max_elements > TableInt::MAX as usize {
      return Err(Error::CapacityOverflow(max_elements));
    }

    let m = if m <= MAX_M {
      m
    } else {
      warn!(m, "M parameter exceeds {MAX_M}; capping");
      MAX_M
    };
    let max_m = m;
    let max_m0 = m * 2;

    Ok(Self {
      arena: Level0Arena::new(max_elements, max_m0, space.data_size())?,
      levels: LevelStore::new(max_elements, max_m)?,
      locks: LockTable::new(max_elements)?,
      visited_pool: VisitedPool::new(1, max_elements),
      space,
      max_elements,
      m,
      max_m,
      max_m0,
      ef_construction: ef_construction.max(m),
      mult: 1.0 / (m as f64).ln(),
      mutation_lock: RwLock::new(()),
      label_lookup: Mutex::new(HashMap::new()),
      cur_element_count: AtomicUsize::new(0),
      num_deleted: AtomicUsize::new(0),
      ef: AtomicUsize::new(10),
      entry: AtomicU64::new(NO_ENTRY),
      norm_factors: RwLock::new(None),
      level_rng: Mutex::new(StdRng::seed_from_u64(random_seed)),
    })
  }

  pub fn space(&self) -> &S {
    &self.space
  }

  pub fn dim(&self) -> usize {
    self.space.dim()
  }

  pub fn m(&self) -> usize {
    self.m
  }

  pub fn ef_construction(&self) -> usize {
    self.ef_construction
  }

  pub fn ef(&self) -> usize {
    self.ef.load(Ordering::Acquire)
  }

  pub fn set_ef(&self, ef: usize) {
    self.ef.store(ef, Ordering::Release);
  }

  pub fn max_elements(&self) -> usize {
    self.max_elements
  }

  pub fn len(&self) -> usize {
    self.cur_element_count.load(Ordering::Acquire)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn deleted_count(&self) -> usize {
    self.num_deleted.load(Ordering::Acquire)
  }

  /// Entry point and the graph's max level, read together.
  pub fn entry_point(&self) -> Option<(TableInt, usize)> {
    unpack_entry(self.entry.load(Ordering::Acquire))
  }

  /// -1 for an empty graph.
  pub fn max_level(&self) -> i32 {
    self.entry_point().map_or(-1, |(_, l)| l as i32)
  }

  pub(crate) fn set_entry_point(&self, entry_point: TableInt, max_level: usize) {
    self
      .entry
      .store(pack_entry(entry_point, max_level), Ordering::Release);
  }

  pub fn norm_factors(&self) -> Option<Arc<NormFactors>> {
    self.norm_factors.read().clone()
  }

  /// Factors only affect elements connected after this call.
  pub fn set_norm_factors(&self, factors: Option<NormFactors>) {
    *self.norm_factors.write() = factors.map(Arc::new);
  }

  /// Draws `floor(-ln(U) / ln(M))` for uniform `U` in (0, 1).
  pub(crate) fn random_level(&self) -> usize {
    let mut u: f64 = self.level_rng.lock().gen();
    if u == 0.0 {
      u = f64::MIN_POSITIVE;
    }
    (-u.ln() * self.mult) as usize
  }

  pub fn level_of(&self, internal_id: TableInt) -> usize {
    self.levels.level(internal_id)
  }

  pub(crate) fn link_block(&self, internal_id: TableInt, level: usize) -> &[AtomicU32] {
    if level == 0 {
      self.arena.link_block(internal_id)
    } else {
      self.levels.block(internal_id, level)
    }
  }

  pub(crate) fn degree_cap(&self, level: usize) -> usize {
    if level == 0 {
      self.max_m0
    } else {
      self.max_m
    }
  }

  pub(crate) fn linklist_at_level(&self, internal_id: TableInt, level: usize) -> LinkList<'_> {
    let block = self.link_block(internal_id, level);
    let cnt = linklist_count(block[0].load(Ordering::Acquire));
    let cap = self.degree_cap(level);
    assert!(
      cnt <= cap,
      "element {internal_id} has {cnt} links at level {level}, cap is {cap}"
    );
    LinkList {
      slots: &block[1..1 + cnt],
    }
  }

  /// Copy of an element's links at `level`, taken under its link lock.
  pub fn get_connections(&self, internal_id: TableInt, level: usize) -> Vec<TableInt> {
    let _lock = self.locks.link(internal_id).lock();
    self
      .linklist_at_level(internal_id, level)
      .into_iter()
      .collect()
  }

  pub(crate) fn vector(&self, internal_id: TableInt) -> &[f32] {
    self.arena.vector(internal_id)
  }

  pub(crate) fn distance_to(&self, query: &[f32], internal_id: TableInt) -> f32 {
    self.space.distance(query, self.vector(internal_id))
  }

  pub(crate) fn distance_between(&self, a: TableInt, b: TableInt) -> f32 {
    self.space.distance(self.vector(a), self.vector(b))
  }

  pub(crate) fn check_dim(&self, v: &[f32]) -> Result<()> {
    if v.len() != self.space.dim() {
      return Err(Error::DimensionMismatch {
        expected: self.space.dim(),
        actual: v.len(),
      });
    }
    Ok(())
  }

  /// Waits for an insert still writing `internal_id` to finish.
  pub fn get_external_label(&self, internal_id: TableInt) -> Option<LabelType> {
    if internal_id as usize >= self.len() {
      return None;
    }
    let _update_guard = self.locks.update(internal_id).lock();
    Some(self.arena.label(internal_id))
  }

  pub fn get_internal_id(&self, label: LabelType) -> Option<TableInt> {
    self.label_lookup.lock().get(&label).copied()
  }

  pub fn get_data_by_label(&self, label: LabelType) -> Result<Vec<f32>> {
    let internal_id = self
      .get_internal_id(label)
      .ok_or(Error::LabelNotFound(label))?;
    // The label becomes visible before its record is written; the inserter holds this lock
    // until it is.
    let _update_guard = self.locks.update(internal_id).lock();
    if self.arena.is_deleted(internal_id) {
      return Err(Error::LabelNotFound(label));
    }
    Ok(self.vector(internal_id).to_vec())
  }

  /// Grows every per-element structure to `new_max_elements`. Exclusive access stands in for
  /// external synchronization: no reader holds a reference across the reallocation.
  pub fn resize(&mut self, new_max_elements: usize) -> Result<()> {
    let cur_count = self.len();
    if new_max_elements < cur_count {
      return Err(Error::ResizeBelowCount {
        requested: new_max_elements,
        current: cur_count,
      });
    }
    if new_max_elements > TableInt::MAX as usize {
      return Err(Error::CapacityOverflow(new_max_elements));
    }

    self.arena.grow(new_max_elements)?;
    self.levels.grow(new_max_elements)?;
    self.locks.grow(new_max_elements)?;
    self.visited_pool = VisitedPool::new(1, new_max_elements);
    debug!(
      from = self.max_elements,
      to = new_max_elements,
      "resized index"
    );
    self.max_elements = new_max_elements;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::space::L2Space;
  use crate::StdMetric;

  #[test]
  fn entry_packing_roundtrips() {
    assert_eq!(unpack_entry(NO_ENTRY), None);
    assert_eq!(unpack_entry(pack_entry(0, 0)), Some((0, 0)));
    assert_eq!(
      unpack_entry(pack_entry(TableInt::MAX - 1, 17)),
      Some((TableInt::MAX - 1, 17))
    );
  }

  #[test]
  fn invalid_parameters_are_rejected() {
    assert!(matches!(
      HnswIndex::new(L2Space::new(0), 10, 16, 200, 1),
      Err(Error::Config(_))
    ));
    assert!(matches!(
      HnswIndex::new(L2Space::new(2), 10, 1, 200, 1),
      Err(Error::Config(_))
    ));
  }

  #[test]
  fn derived_parameters() {
    let idx = HnswIndex::new(L2Space::new(2), 10, 16, 4, 1).unwrap();
    assert_eq!(idx.max_m, 16);
    assert_eq!(idx.max_m0, 32);
    // ef_construction is raised to at least M.
    assert_eq!(idx.ef_construction(), 16);
    assert_eq!(idx.max_level(), -1);
    assert_eq!(idx.entry_point(), None);
    assert!(idx.is_empty());
  }

  #[test]
  fn oversized_m_is_capped() {
    let idx = HnswIndex::new(L2Space::new(1), 1, MAX_M + 5, 1, 1).unwrap();
    assert_eq!(idx.m(), MAX_M);
  }

  #[test]
  fn level_sequence_is_reproducible_for_a_seed() {
    let a = HnswIndex::new(L2Space::new(2), 1, 16, 200, 42).unwrap();
    let b = HnswIndex::new(L2Space::new(2), 1, 16, 200, 42).unwrap();
    let la: Vec<usize> = (0..1000).map(|_| a.random_level()).collect();
    let lb: Vec<usize> = (0..1000).map(|_| b.random_level()).collect();
    assert_eq!(la, lb);
  }

  #[test]
  fn level_distribution_is_geometric() {
    let idx = HnswIndex::new(L2Space::new(2), 1, 16, 200, 3).unwrap();
    let n = 100_000;
    let above_zero = (0..n).filter(|_| idx.random_level() > 0).count();
    // P(level >= 1) = 1 / M.
    let expected = n / 16;
    assert!(above_zero.abs_diff(expected) < expected / 5, "{above_zero}");
  }

  #[test]
  fn from_cfg_applies_ef() {
    let cfg = HnswCfg {
      dim: 4,
      metric: StdMetric::InnerProduct,
      ef: 33,
      ..Default::default()
    };
    let idx = HnswIndex::from_cfg(&cfg).unwrap();
    assert_eq!(idx.ef(), 33);
    assert_eq!(idx.dim(), 4);
    assert_eq!(idx.space().metric(), StdMetric::InnerProduct);
  }
}
