use parking_lot::Mutex;

pub type VisitTag = u16;

/// Visit marks for one traversal. A slot counts as visited when it holds the current tag, so
/// starting a new traversal only bumps the tag; the marks are cleared only on tag wraparound.
#[derive(Debug, Default)]
pub struct VisitedSet {
  tag: VisitTag,
  marks: Vec<VisitTag>,
}

impl VisitedSet {
  fn new(num_elements: usize) -> Self {
    Self {
      tag: VisitTag::MAX,
      marks: vec![0; num_elements],
    }
  }

  fn advance(&mut self) {
    self.tag = self.tag.wrapping_add(1);
    if self.tag == 0 {
      self.marks.fill(0);
      self.tag = 1;
    }
  }

  /// Marks `id` visited and returns whether it already was.
  #[inline]
  pub fn check_and_mark(&mut self, id: usize) -> bool {
    let seen = self.marks[id] == self.tag;
    self.marks[id] = self.tag;
    seen
  }

  #[cfg(test)]
  fn is_visited(&self, id: usize) -> bool {
    self.marks[id] == self.tag
  }

  #[cfg(test)]
  fn tag(&self) -> VisitTag {
    self.tag
  }
}

#[derive(Debug)]
pub struct VisitedPool {
  pool: Mutex<Vec<VisitedSet>>,
  num_elements: usize,
}

impl VisitedPool {
  pub fn new(initial_pool_size: usize, num_elements: usize) -> Self {
    let pool = (0..initial_pool_size)
      .map(|_| VisitedSet::new(num_elements))
      .collect();
    Self {
      pool: Mutex::new(pool),
      num_elements,
    }
  }

  /// Hands out a set no other caller holds. It goes back to the pool when the handle drops.
  pub fn acquire(&self) -> VisitedHandle<'_> {
    let mut set = self
      .pool
      .lock()
      .pop()
      .unwrap_or_else(|| VisitedSet::new(self.num_elements));
    set.advance();
    VisitedHandle {
      pool: &self.pool,
      set,
    }
  }
}

pub struct VisitedHandle<'a> {
  pool: &'a Mutex<Vec<VisitedSet>>,
  set: VisitedSet,
}

impl std::ops::Deref for VisitedHandle<'_> {
  type Target = VisitedSet;

  fn deref(&self) -> &VisitedSet {
    &self.set
  }
}

impl std::ops::DerefMut for VisitedHandle<'_> {
  fn deref_mut(&mut self) -> &mut VisitedSet {
    &mut self.set
  }
}

impl Drop for VisitedHandle<'_> {
  fn drop(&mut self) {
    let set = std::mem::take(&mut self.set);
    self.pool.lock().push(set);
  }
}
