use crate::arena::linklist_count;
use crate::error::Error;
use crate::error::Result;
use crate::hnsw::HnswIndex;
use crate::Space;
use crate::TableInt;
use ahash::HashSet;
use ahash::HashSetExt;
use itertools::Itertools;
use itertools::MinMaxResult;
use std::sync::atomic::Ordering;
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
  pub elements: usize,
  /// Directed edges over all levels.
  pub connections: usize,
  pub min_inbound: usize,
  pub max_inbound: usize,
  /// Elements no link points to. Only meaningful with more than one element.
  pub orphans: usize,
}

impl<S: Space> HnswIndex<S> {
  /// Walks every link list, failing on out-of-range ids, self loops, duplicate edges, links
  /// to a level the target lacks, and lists above their degree cap. Blocks mutations for the
  /// duration.
  pub fn check_integrity(&self) -> Result<IntegrityReport> {
    let _mutation_guard = self.mutation_lock.write();

    let cur_element_count = self.len();
    let mut inbound: Vec<usize> = vec![0; cur_element_count];
    let mut connections = 0;
    for i in 0..cur_element_count as TableInt {
      for level in 0..=self.level_of(i) {
        let block = self.link_block(i, level);
        let size = linklist_count(block[0].load(Ordering::Acquire));
        if size > self.degree_cap(level) {
          return Err(Error::Corrupted(format!(
            "element {i} has {size} links at level {level}"
          )));
        }
        let mut s = HashSet::new();
        for slot in &block[1..1 + size] {
          let to = slot.load(Ordering::Acquire);
          if to as usize >= cur_element_count {
            return Err(Error::Corrupted(format!(
              "element {i} links to unknown element {to}"
            )));
          }
          if to == i {
            return Err(Error::Corrupted(format!("self loop on element {i}")));
          }
          if self.level_of(to) < level {
            return Err(Error::Corrupted(format!(
              "element {i} links to {to} at level {level}, which it lacks"
            )));
          }
          if !s.insert(to) {
            return Err(Error::Corrupted(format!(
              "duplicate edge {i} -> {to} at level {level}"
            )));
          }
          inbound[to as usize] += 1;
          connections += 1;
        }
      }
    }

    let (min_inbound, max_inbound) = match inbound.iter().minmax() {
      MinMaxResult::NoElements => (0, 0),
      MinMaxResult::OneElement(&n) => (n, n),
      MinMaxResult::MinMax(&lo, &hi) => (lo, hi),
    };
    let orphans = if cur_element_count > 1 {
      inbound.iter().filter(|&&n| n == 0).count()
    } else {
      0
    };
    let report = IntegrityReport {
      elements: cur_element_count,
      connections,
      min_inbound,
      max_inbound,
      orphans,
    };
    debug!(?report, "integrity ok");
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::store_linklist_count;
  use crate::space::L2Space;
  use crate::LabelType;

  fn line(n: usize) -> HnswIndex<L2Space> {
    let idx = HnswIndex::new(L2Space::new(1), n, 4, 16, 2).unwrap();
    for i in 0..n {
      idx.insert(&[i as f32], i as LabelType).unwrap();
    }
    idx
  }

  #[test]
  fn empty_and_single_element_graphs_are_fine() {
    let idx = line(0);
    assert_eq!(idx.check_integrity().unwrap(), IntegrityReport::default());
    let idx = line(1);
    let report = idx.check_integrity().unwrap();
    assert_eq!(report.elements, 1);
    assert_eq!(report.connections, 0);
  }

  #[test]
  fn counts_edges_and_inbound_degrees() {
    // Three elements on level 0 with room to spare: every pair is linked both ways.
    let idx = HnswIndex::new(L2Space::new(1), 3, 4, 16, 2).unwrap();
    for i in 0..3 {
      idx.insert_at_level(&[i as f32], i, Some(0)).unwrap();
    }
    let report = idx.check_integrity().unwrap();
    assert_eq!(report.connections, 6);
    assert_eq!(report.min_inbound, 2);
    assert_eq!(report.max_inbound, 2);
    assert_eq!(report.orphans, 0);
  }

  #[test]
  fn built_graph_passes() {
    let idx = line(300);
    let report = idx.check_integrity().unwrap();
    assert_eq!(report.elements, 300);
    assert!(report.connections >= 299);
    assert!(report.max_inbound <= 300);
  }

  #[test]
  fn self_loop_is_reported() {
    let idx = line(4);
    let block = idx.link_block(2, 0);
    block[1].store(2, Ordering::Relaxed);
    store_linklist_count(&block[0], 1);
    assert!(matches!(idx.check_integrity(), Err(Error::Corrupted(_))));
  }

  #[test]
  fn duplicate_edge_is_reported() {
    let idx = line(4);
    let block = idx.link_block(0, 0);
    block[1].store(3, Ordering::Relaxed);
    block[2].store(3, Ordering::Relaxed);
    store_linklist_count(&block[0], 2);
    assert!(matches!(idx.check_integrity(), Err(Error::Corrupted(_))));
  }

  #[test]
  fn out_of_range_link_is_reported() {
    let idx = line(4);
    let block = idx.link_block(1, 0);
    block[1].store(40, Ordering::Relaxed);
    store_linklist_count(&block[0], 1);
    assert!(matches!(idx.check_integrity(), Err(Error::Corrupted(_))));
  }
}
