use crate::error::Error;
use crate::error::Result;
use crate::TableInt;
use parking_lot::Mutex;

pub const UPDATE_LOCK_BUCKETS: usize = 65_536;

/// The three synchronization domains of the graph.
///
/// - `link(id)` guards read-modify-write of one element's link lists.
/// - `update(id)` serializes insert/delete bookkeeping touching the same internal id; it is
///   hashed into a fixed number of buckets and independent of the link lock.
/// - `global()` guards promotion of the entry point and max level.
#[derive(Debug)]
pub struct LockTable {
  link_locks: Vec<Mutex<()>>,
  update_locks: Vec<Mutex<()>>,
  global: Mutex<()>,
}

impl LockTable {
  pub fn new(capacity: usize) -> Result<Self> {
    let mut update_locks = Vec::with_capacity(UPDATE_LOCK_BUCKETS);
    update_locks.resize_with(UPDATE_LOCK_BUCKETS, || Mutex::new(()));
    let mut table = Self {
      link_locks: Vec::new(),
      update_locks,
      global: Mutex::new(()),
    };
    table.grow(capacity)?;
    Ok(table)
  }

  pub fn grow(&mut self, new_capacity: usize) -> Result<()> {
    if new_capacity <= self.link_locks.len() {
      return Ok(());
    }
    self
      .link_locks
      .try_reserve_exact(new_capacity - self.link_locks.len())
      .map_err(|_| Error::OutOfMemory { what: "lock table" })?;
    self.link_locks.resize_with(new_capacity, || Mutex::new(()));
    Ok(())
  }

  pub fn link(&self, id: TableInt) -> &Mutex<()> {
    &self.link_locks[id as usize]
  }

  pub fn update(&self, id: TableInt) -> &Mutex<()> {
    &self.update_locks[id as usize & (UPDATE_LOCK_BUCKETS - 1)]
  }

  pub fn global(&self) -> &Mutex<()> {
    &self.global
  }
}
