use crate::error::Error;
use crate::error::Result;
use crate::search::LabelFilter;
use crate::LabelType;
use crate::Space;
use ahash::HashMap;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// Exact k-NN by scanning every vector. Used as ground truth when measuring recall.
#[derive(Debug, Clone)]
pub struct BruteforceIndex<S: Space> {
  space: S,
  vectors: Vec<f32>,
  labels: Vec<LabelType>,
  label_to_internal: HashMap<LabelType, usize>,
}

impl<S: Space> BruteforceIndex<S> {
  pub fn new(space: S) -> Self {
    Self {
      space,
      vectors: Vec::new(),
      labels: Vec::new(),
      label_to_internal: HashMap::default(),
    }
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  fn check_dim(&self, v: &[f32]) -> Result<()> {
    if v.len() != self.space.dim() {
      return Err(Error::DimensionMismatch {
        expected: self.space.dim(),
        actual: v.len(),
      });
    }
    Ok(())
  }

  /// Adds a vector, replacing the one already stored under `label`.
  pub fn insert(&mut self, vector: &[f32], label: LabelType) -> Result<()> {
    self.check_dim(vector)?;
    let dim = self.space.dim();
    if let Some(&existing) = self.label_to_internal.get(&label) {
      self.vectors[existing * dim..existing * dim + dim].copy_from_slice(vector);
      return Ok(());
    }
    self.label_to_internal.insert(label, self.labels.len());
    self.labels.push(label);
    self.vectors.extend_from_slice(vector);
    Ok(())
  }

  /// Returns whether `label` was present.
  #[cfg(test)]
  fn remove(&mut self, label: LabelType) -> bool {
    let Some(idx) = self.label_to_internal.remove(&label) else {
      return false;
    };
    let dim = self.space.dim();
    let last = self.labels.len() - 1;
    if idx != last {
      let (before_last, last_and_after) = self.vectors.split_at_mut(last * dim);
      before_last[idx * dim..idx * dim + dim].copy_from_slice(&last_and_after[..dim]);
      let last_label = self.labels[last];
      self.labels[idx] = last_label;
      self.label_to_internal.insert(last_label, idx);
    }
    self.labels.pop();
    self.vectors.truncate(last * dim);
    true
  }

  /// Up to `k` `(distance, label)` pairs, closest first.
  pub fn search_knn(
    &self,
    query: &[f32],
    k: usize,
    filter: Option<LabelFilter<'_>>,
  ) -> Result<Vec<(f32, LabelType)>> {
    self.check_dim(query)?;
    if k == 0 {
      return Ok(Vec::new());
    }
    let mut heap: BinaryHeap<(OrderedFloat<f32>, LabelType)> = BinaryHeap::new();
    for (v, &label) in self.vectors.chunks_exact(self.space.dim()).zip(&self.labels) {
      if filter.is_some_and(|f| !f(label)) {
        continue;
      }
      let dist = OrderedFloat(self.space.distance(query, v));
      if heap.len() < k {
        heap.push((dist, label));
      } else if heap.peek().is_some_and(|&(worst, _)| dist < worst) {
        heap.pop();
        heap.push((dist, label));
      }
    }
    Ok(
      heap
        .into_sorted_vec()
        .into_iter()
        .map(|(d, l)| (d.0, l))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::space::InnerProductSpace;
  use crate::space::L2Space;
  use approx::assert_relative_eq;

  #[test]
  fn returns_exact_neighbors_in_order() {
    let mut bf = BruteforceIndex::new(L2Space::new(1));
    for i in 0..10 {
      bf.insert(&[i as f32], i).unwrap();
    }
    let res = bf.search_knn(&[4.1], 3, None).unwrap();
    let labels: Vec<LabelType> = res.iter().map(|r| r.1).collect();
    assert_eq!(labels, vec![4, 5, 3]);
    assert_relative_eq!(res[0].0, 0.01, epsilon = 1e-5);
  }

  #[test]
  fn insert_replaces_and_remove_compacts() {
    let mut bf = BruteforceIndex::new(L2Space::new(1));
    bf.insert(&[0.0], 1).unwrap();
    bf.insert(&[10.0], 2).unwrap();
    bf.insert(&[20.0], 3).unwrap();
    bf.insert(&[5.0], 1).unwrap();
    assert_eq!(bf.len(), 3);
    assert!(bf.remove(1));
    assert!(!bf.remove(1));
    assert_eq!(bf.len(), 2);
    let res = bf.search_knn(&[19.0], 5, None).unwrap();
    let labels: Vec<LabelType> = res.iter().map(|r| r.1).collect();
    assert_eq!(labels, vec![3, 2]);
  }

  #[test]
  fn filter_and_inner_product() {
    let mut bf = BruteforceIndex::new(InnerProductSpace::new(2));
    bf.insert(&[1.0, 0.0], 1).unwrap();
    bf.insert(&[0.0, 1.0], 2).unwrap();
    bf.insert(&[0.7, 0.7], 3).unwrap();
    let not_one = |l: LabelType| l != 1;
    let res = bf.search_knn(&[1.0, 0.0], 1, Some(&not_one)).unwrap();
    assert_eq!(res[0].1, 3);
    assert!(matches!(
      bf.search_knn(&[1.0], 1, None),
      Err(Error::DimensionMismatch { .. })
    ));
  }
}
