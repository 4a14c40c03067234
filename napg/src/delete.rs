use crate::error::Error;
use crate::error::Result;
use crate::hnsw::HnswIndex;
use crate::LabelType;
use crate::Space;
use crate::TableInt;
use std::sync::atomic::Ordering;
use tracing::trace;

impl<S: Space> HnswIndex<S> {
  fn resolve_label(&self, label: LabelType) -> Result<TableInt> {
    self
      .get_internal_id(label)
      .ok_or(Error::LabelNotFound(label))
  }

  /// Hides an element from search results. It keeps its links and still routes traversals.
  pub fn mark_deleted(&self, label: LabelType) -> Result<()> {
    let _mutation_guard = self.mutation_lock.read();
    let internal_id = self.resolve_label(label)?;
    let _update_guard = self.locks.update(internal_id).lock();
    if self.arena.set_deleted(internal_id) {
      return Err(Error::AlreadyDeleted(label));
    }
    self.num_deleted.fetch_add(1, Ordering::AcqRel);
    trace!(label, id = internal_id, "marked deleted");
    Ok(())
  }

  pub fn unmark_deleted(&self, label: LabelType) -> Result<()> {
    let _mutation_guard = self.mutation_lock.read();
    let internal_id = self.resolve_label(label)?;
    let _update_guard = self.locks.update(internal_id).lock();
    if !self.arena.clear_deleted(internal_id) {
      return Err(Error::NotDeleted(label));
    }
    self.num_deleted.fetch_sub(1, Ordering::AcqRel);
    trace!(label, id = internal_id, "unmarked deleted");
    Ok(())
  }

  pub fn is_deleted(&self, label: LabelType) -> Result<bool> {
    let internal_id = self.resolve_label(label)?;
    Ok(self.arena.is_deleted(internal_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::space::L2Space;
  use std::sync::Arc;
  use std::thread;

  fn small_index() -> HnswIndex<L2Space> {
    let idx = HnswIndex::new(L2Space::new(2), 16, 4, 16, 1).unwrap();
    for i in 0..10u64 {
      idx.insert(&[i as f32, 0.0], i).unwrap();
    }
    idx
  }

  #[test]
  fn deleted_elements_leave_results_but_keep_their_links() {
    let idx = small_index();
    let id = idx.get_internal_id(3).unwrap();
    let links_before = idx.get_connections(id, 0);

    idx.mark_deleted(3).unwrap();
    assert!(idx.is_deleted(3).unwrap());
    assert_eq!(idx.deleted_count(), 1);
    assert_eq!(idx.get_connections(id, 0), links_before);

    idx.set_ef(10);
    let res = idx.search_knn(&[3.0, 0.0], 10).unwrap();
    assert_eq!(res.len(), 9);
    assert!(res.iter().all(|r| r.1 != 3));
    assert!(matches!(
      idx.get_data_by_label(3),
      Err(Error::LabelNotFound(3))
    ));
  }

  #[test]
  fn unmark_restores_visibility() {
    let idx = small_index();
    idx.mark_deleted(5).unwrap();
    idx.unmark_deleted(5).unwrap();
    assert_eq!(idx.deleted_count(), 0);
    assert!(!idx.is_deleted(5).unwrap());
    let res = idx.search_knn(&[5.0, 0.0], 1).unwrap();
    assert_eq!(res[0].1, 5);
  }

  #[test]
  fn double_mark_and_unmark_are_errors() {
    let idx = small_index();
    idx.mark_deleted(1).unwrap();
    assert!(matches!(idx.mark_deleted(1), Err(Error::AlreadyDeleted(1))));
    assert_eq!(idx.deleted_count(), 1);
    assert!(matches!(idx.unmark_deleted(2), Err(Error::NotDeleted(2))));
    assert_eq!(idx.deleted_count(), 1);
  }

  #[test]
  fn unknown_labels_are_reported() {
    let idx = small_index();
    assert!(matches!(idx.mark_deleted(99), Err(Error::LabelNotFound(99))));
    assert!(matches!(
      idx.unmark_deleted(99),
      Err(Error::LabelNotFound(99))
    ));
    assert!(matches!(idx.is_deleted(99), Err(Error::LabelNotFound(99))));
  }

  #[test]
  fn deleting_everything_yields_empty_results() {
    let idx = small_index();
    for i in 0..10 {
      idx.mark_deleted(i).unwrap();
    }
    assert!(idx.search_knn(&[0.0, 0.0], 3).unwrap().is_empty());
  }

  #[test]
  fn concurrent_deletes_count_each_label_once() {
    let idx = Arc::new(small_index());
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let idx = idx.clone();
        thread::spawn(move || (0..10).filter(|&l| idx.mark_deleted(l).is_ok()).count())
      })
      .collect();
    let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(succeeded, 10);
    assert_eq!(idx.deleted_count(), 10);
  }
}
