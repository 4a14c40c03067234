use crate::hnsw::HnswIndex;
use crate::norm::NormFactors;
use crate::Space;
use crate::TableInt;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

pub(crate) type Candidate = (OrderedFloat<f32>, TableInt);

impl<S: Space> HnswIndex<S> {
  /// Picks at most `m` neighbors from `candidates`, whose distances are measured to some
  /// base point, and returns them closest first.
  ///
  /// Candidates are walked in ascending distance. One is accepted only if it is strictly closer
  /// to the base point than to every already accepted neighbor, which spreads the result around
  /// the base point instead of letting it cluster on one side. With norm factors, the
  /// candidate's distance to the base point is scaled by its norm range's factor before the
  /// comparison; distances between candidates are not.
  ///
  /// Pools smaller than `m` are returned whole.
  pub(crate) fn select_neighbors(
    &self,
    candidates: BinaryHeap<Candidate>,
    m: usize,
    factors: Option<&NormFactors>,
  ) -> Vec<Candidate> {
    let sorted = candidates.into_sorted_vec();
    if sorted.len() < m {
      return sorted;
    }

    let mut selected: Vec<Candidate> = Vec::with_capacity(m);
    for (dist, cur_id) in sorted {
      if selected.len() >= m {
        break;
      }
      let mut dist_to_base = dist.0;
      if let Some(f) = factors {
        dist_to_base *= f.factor_for(self.vector(cur_id));
      }
      let good = selected
        .iter()
        .all(|&(_, sel_id)| self.distance_between(sel_id, cur_id) > dist_to_base);
      if good {
        selected.push((dist, cur_id));
      }
    }
    selected
  }
}
