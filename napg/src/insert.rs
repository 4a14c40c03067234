use crate::arena::linklist_count;
use crate::arena::store_linklist_count;
use crate::error::Error;
use crate::error::Result;
use crate::heuristic::Candidate;
use crate::hnsw::HnswIndex;
use crate::norm::NormFactors;
use crate::search::SearchStats;
use crate::LabelType;
use crate::Space;
use crate::TableInt;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering;
use tracing::debug;
use tracing::warn;

impl<S: Space> HnswIndex<S> {
  /// Adds a vector under `label` and returns its internal id.
  ///
  /// Safe to call from many threads at once, and concurrently with searches. Reusing a label
  /// points it at the new element; the old element stays in the graph but can no longer be
  /// reached by label.
  pub fn insert(&self, data_point: &[f32], label: LabelType) -> Result<TableInt> {
    self.insert_at_level(data_point, label, None)
  }

  /// Like [`Self::insert`], but places the element at `level` instead of drawing one.
  pub fn insert_at_level(
    &self,
    data_point: &[f32],
    label: LabelType,
    level: Option<usize>,
  ) -> Result<TableInt> {
    self.check_dim(data_point)?;
    let _mutation_guard = self.mutation_lock.read();
    let curlevel = level.unwrap_or_else(|| self.random_level());
    // Allocated before claiming a slot so a failure leaves no trace in the index.
    let upper_blocks = self.levels.new_blocks(curlevel)?;

    let (cur_c, _update_guard) = {
      let mut lookup = self.label_lookup.lock();
      let cur_count = self.cur_element_count.load(Ordering::Acquire);
      if cur_count >= self.max_elements {
        return Err(Error::IndexFull {
          max_elements: self.max_elements,
        });
      }
      let cur_c = cur_count as TableInt;
      // Taken before the id becomes visible by label, so a concurrent delete of this label
      // waits until the record is initialized.
      let update_guard = self.locks.update(cur_c).lock();
      if let Some(previous) = lookup.insert(label, cur_c) {
        warn!(
          label,
          previous,
          "label inserted again; the old element is no longer reachable by label"
        );
      }
      self
        .cur_element_count
        .store(cur_count + 1, Ordering::Release);
      (cur_c, update_guard)
    };

    let _el_guard = self.locks.link(cur_c).lock();
    self.arena.init_record(cur_c, data_point, label);
    self.levels.attach(cur_c, upper_blocks);

    let global_guard = self.locks.global().lock();
    let entry = self.entry_point();
    let _global_guard = match entry {
      Some((_, maxlevel)) if curlevel <= maxlevel => {
        drop(global_guard);
        None
      }
      _ => Some(global_guard),
    };

    let Some((enterpoint_copy, maxlevelcopy)) = entry else {
      self.set_entry_point(cur_c, curlevel);
      debug!(id = cur_c, level = curlevel, "first element is the entry point");
      return Ok(cur_c);
    };

    let mut stats = SearchStats::default();
    let mut curr_obj = enterpoint_copy;
    if curlevel < maxlevelcopy {
      let mut cur_dist = self.distance_to(data_point, curr_obj);
      for level in (curlevel + 1..=maxlevelcopy).rev() {
        (curr_obj, cur_dist) =
          self.greedy_closest::<true>(data_point, curr_obj, cur_dist, level, &mut stats);
      }
    }

    let factors = self.norm_factors();
    let ep_deleted = self.arena.is_deleted(enterpoint_copy);
    for level in (0..=curlevel.min(maxlevelcopy)).rev() {
      let mut top_candidates = self.search_layer::<true>(
        curr_obj,
        data_point,
        level,
        self.ef_construction,
        None,
        &mut stats,
      );
      if ep_deleted {
        let dist = self.distance_to(data_point, enterpoint_copy);
        top_candidates.push((OrderedFloat(dist), enterpoint_copy));
        if top_candidates.len() > self.ef_construction {
          top_candidates.pop();
        }
      }
      if top_candidates.is_empty() {
        // Everything reachable is deleted; keep the graph connected through the start node.
        let dist = self.distance_to(data_point, curr_obj);
        top_candidates.push((OrderedFloat(dist), curr_obj));
      }
      curr_obj =
        self.mutually_connect_new_element(cur_c, top_candidates, level, factors.as_deref());
    }

    if curlevel > maxlevelcopy {
      self.set_entry_point(cur_c, curlevel);
      debug!(
        id = cur_c,
        from = maxlevelcopy,
        to = curlevel,
        "promoted entry point"
      );
    }
    Ok(cur_c)
  }

  /// Overwrites an element's link list at `level`.
  pub(crate) fn write_links(&self, internal_id: TableInt, level: usize, ids: &[TableInt]) {
    let block = self.link_block(internal_id, level);
    let cap = self.degree_cap(level);
    assert!(
      ids.len() <= cap,
      "{} links for element {internal_id} at level {level}, cap is {cap}",
      ids.len()
    );
    for (slot, &id) in block[1..].iter().zip(ids) {
      slot.store(id, Ordering::Release);
    }
    store_linklist_count(&block[0], ids.len());
  }

  /// Links `cur_c` to the selected candidates at `level` and adds the reverse edges. Returns
  /// the closest selected neighbor, which seeds the search one level down.
  ///
  /// The caller holds `cur_c`'s link lock.
  fn mutually_connect_new_element(
    &self,
    cur_c: TableInt,
    top_candidates: BinaryHeap<Candidate>,
    level: usize,
    factors: Option<&NormFactors>,
  ) -> TableInt {
    let m_curmax = self.degree_cap(level);
    let selected: Vec<TableInt> = self
      .select_neighbors(
        top_candidates
          .into_iter()
          .filter(|&(_, id)| id != cur_c)
          .collect(),
        m_curmax,
        factors,
      )
      .into_iter()
      .map(|(_, id)| id)
      .collect();
    assert!(!selected.is_empty(), "no neighbors selected for element {cur_c}");

    let own = self.link_block(cur_c, level);
    assert_eq!(
      linklist_count(own[0].load(Ordering::Acquire)),
      0,
      "element {cur_c} already has links at level {level}"
    );
    for &neighbor in &selected {
      assert!(
        level <= self.level_of(neighbor),
        "neighbor {neighbor} has no level {level}"
      );
    }
    self.write_links(cur_c, level, &selected);

    for &neighbor in &selected {
      self.connect_backlink(neighbor, cur_c, level, factors);
    }
    selected[0]
  }

  /// Adds `cur_c` to `neighbor`'s list at `level`, re-pruning the list when it is full.
  fn connect_backlink(
    &self,
    neighbor: TableInt,
    cur_c: TableInt,
    level: usize,
    factors: Option<&NormFactors>,
  ) {
    assert_ne!(neighbor, cur_c, "element {cur_c} linked to itself");
    let m_curmax = self.degree_cap(level);
    let _lock = self.locks.link(neighbor).lock();
    let current: Vec<TableInt> = self.linklist_at_level(neighbor, level).into_iter().collect();
    if current.contains(&cur_c) {
      return;
    }

    if current.len() < m_curmax {
      let block = self.link_block(neighbor, level);
      block[1 + current.len()].store(cur_c, Ordering::Release);
      store_linklist_count(&block[0], current.len() + 1);
      return;
    }

    let candidates: BinaryHeap<Candidate> = current
      .iter()
      .chain(std::iter::once(&cur_c))
      .map(|&id| (OrderedFloat(self.distance_between(id, neighbor)), id))
      .collect();
    let pruned: Vec<TableInt> = self
      .select_neighbors(candidates, m_curmax, factors)
      .into_iter()
      .map(|(_, id)| id)
      .collect();
    self.write_links(neighbor, level, &pruned);
  }
}
