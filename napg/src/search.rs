use crate::error::Result;
use crate::heuristic::Candidate;
use crate::hnsw::HnswIndex;
use crate::LabelType;
use crate::Space;
use crate::TableInt;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;
use std::ops::AddAssign;

/// Work done by one query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStats {
  /// Nodes whose link lists were expanded, across all levels.
  pub hops: usize,
  pub distance_computations: usize,
}

impl AddAssign for SearchStats {
  fn add_assign(&mut self, rhs: Self) {
    self.hops += rhs.hops;
    self.distance_computations += rhs.distance_computations;
  }
}

pub type LabelFilter<'a> = &'a dyn Fn(LabelType) -> bool;

impl<S: Space> HnswIndex<S> {
  /// Moves to strictly closer neighbors at `level` until none is closer. With `LOCKED`, each
  /// node's link list is read under its link lock.
  pub(crate) fn greedy_closest<const LOCKED: bool>(
    &self,
    query: &[f32],
    mut cur_obj: TableInt,
    mut cur_dist: f32,
    level: usize,
    stats: &mut SearchStats,
  ) -> (TableInt, f32) {
    let mut changed = true;
    while changed {
      changed = false;
      stats.hops += 1;
      let _guard = LOCKED.then(|| self.locks.link(cur_obj).lock());
      for cand in self.linklist_at_level(cur_obj, level) {
        stats.distance_computations += 1;
        let d = self.distance_to(query, cand);
        if d < cur_dist {
          cur_dist = d;
          cur_obj = cand;
          changed = true;
        }
      }
    }
    (cur_obj, cur_dist)
  }

  /// Best-first beam search within one level.
  ///
  /// Returns a max-heap of at most `ef` results. With `FILTERED`, deleted elements and
  /// elements rejected by `filter` are traversed but never returned. The search stops once
  /// the closest unexpanded candidate is farther than the worst result and the result set is
  /// full.
  pub(crate) fn search_layer<const FILTERED: bool>(
    &self,
    ep_id: TableInt,
    query: &[f32],
    level: usize,
    ef: usize,
    filter: Option<LabelFilter<'_>>,
    stats: &mut SearchStats,
  ) -> BinaryHeap<Candidate> {
    let accepts = |id: TableInt| {
      !FILTERED
        || (!self.arena.is_deleted(id) && filter.map_or(true, |f| f(self.arena.label(id))))
    };

    let mut visited = self.visited_pool.acquire();
    let mut top_candidates: BinaryHeap<Candidate> = BinaryHeap::new();
    // Min-heap by way of negated distances.
    let mut candidate_set: BinaryHeap<Candidate> = BinaryHeap::new();

    let mut lower_bound;
    let ep_dist = self.distance_to(query, ep_id);
    stats.distance_computations += 1;
    if accepts(ep_id) {
      top_candidates.push((OrderedFloat(ep_dist), ep_id));
      lower_bound = ep_dist;
    } else {
      lower_bound = f32::INFINITY;
    }
    candidate_set.push((OrderedFloat(-ep_dist), ep_id));
    visited.check_and_mark(ep_id as usize);

    while let Some((neg_dist, cur_node)) = candidate_set.pop() {
      if -neg_dist.0 > lower_bound && top_candidates.len() >= ef {
        break;
      }
      stats.hops += 1;

      for cand in self.linklist_at_level(cur_node, level) {
        if visited.check_and_mark(cand as usize) {
          continue;
        }
        let dist = self.distance_to(query, cand);
        stats.distance_computations += 1;
        if top_candidates.len() < ef || dist < lower_bound {
          candidate_set.push((OrderedFloat(-dist), cand));
          if accepts(cand) {
            top_candidates.push((OrderedFloat(dist), cand));
          }
          if top_candidates.len() > ef {
            top_candidates.pop();
          }
          if let Some((worst, _)) = top_candidates.peek() {
            lower_bound = worst.0;
          }
        }
      }
    }
    top_candidates
  }

  /// The `k` nearest non-deleted elements, closest first, as `(distance, label)` pairs.
  pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(f32, LabelType)>> {
    Ok(self.search_knn_with_stats(query, k, None)?.0)
  }

  /// Like [`Self::search_knn`], but only returns elements whose label passes `filter`.
  /// Rejected elements are still used for navigation.
  pub fn search_knn_filtered(
    &self,
    query: &[f32],
    k: usize,
    filter: LabelFilter<'_>,
  ) -> Result<Vec<(f32, LabelType)>> {
    Ok(self.search_knn_with_stats(query, k, Some(filter))?.0)
  }

  pub fn search_knn_with_stats(
    &self,
    query: &[f32],
    k: usize,
    filter: Option<LabelFilter<'_>>,
  ) -> Result<(Vec<(f32, LabelType)>, SearchStats)> {
    self.check_dim(query)?;
    let mut stats = SearchStats::default();
    let Some((enterpoint, max_level)) = self.entry_point() else {
      return Ok((Vec::new(), stats));
    };
    if k == 0 {
      return Ok((Vec::new(), stats));
    }

    let mut cur_obj = enterpoint;
    let mut cur_dist = self.distance_to(query, cur_obj);
    stats.distance_computations += 1;
    for level in (1..=max_level).rev() {
      (cur_obj, cur_dist) =
        self.greedy_closest::<false>(query, cur_obj, cur_dist, level, &mut stats);
    }

    let ef = self.ef().max(k);
    let mut top_candidates = if self.deleted_count() > 0 || filter.is_some() {
      self.search_layer::<true>(cur_obj, query, 0, ef, filter, &mut stats)
    } else {
      self.search_layer::<false>(cur_obj, query, 0, ef, None, &mut stats)
    };
    while top_candidates.len() > k {
      top_candidates.pop();
    }

    let results = top_candidates
      .into_sorted_vec()
      .into_iter()
      .map(|(dist, id)| (dist.0, self.arena.label(id)))
      .collect();
    Ok((results, stats))
  }
}
