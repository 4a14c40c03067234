//! Link lists for levels above 0, allocated per element only when its level is positive.
//!
//! An element of level `L` owns `L` blocks of `1 + maxM` words, formatted like the level-0
//! link block (count header followed by ids) but never carrying the delete mark. Level `l`
//! lives at word offset `(l - 1) * (1 + maxM)`. The element's level is implied by the length
//! of its allocation.

use crate::error::Error;
use crate::error::Result;
use crate::TableInt;
use std::mem::size_of;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;

#[derive(Debug)]
pub struct LevelStore {
  lists: Vec<OnceLock<Box<[AtomicU32]>>>,
  words_per_level: usize,
}

impl LevelStore {
  pub fn new(capacity: usize, max_m: usize) -> Result<Self> {
    let mut store = Self {
      lists: Vec::new(),
      words_per_level: 1 + max_m,
    };
    store.grow(capacity)?;
    Ok(store)
  }

  /// Bytes per level block.
  pub fn level_stride_bytes(&self) -> usize {
    self.words_per_level * size_of::<u32>()
  }

  pub fn words_per_level(&self) -> usize {
    self.words_per_level
  }

  pub fn grow(&mut self, new_capacity: usize) -> Result<()> {
    if new_capacity <= self.lists.len() {
      return Ok(());
    }
    self
      .lists
      .try_reserve_exact(new_capacity - self.lists.len())
      .map_err(|_| Error::OutOfMemory {
        what: "level-list store",
      })?;
    self.lists.resize_with(new_capacity, OnceLock::new);
    Ok(())
  }

  /// Zeroed blocks for levels `1..=level`, or `None` for a level-0 element.
  pub fn new_blocks(&self, level: usize) -> Result<Option<Box<[AtomicU32]>>> {
    if level == 0 {
      return Ok(None);
    }
    let words = level
      .checked_mul(self.words_per_level)
      .ok_or(Error::CapacityOverflow(level))?;
    let mut blocks: Vec<AtomicU32> = Vec::new();
    blocks
      .try_reserve_exact(words)
      .map_err(|_| Error::OutOfMemory { what: "level lists" })?;
    blocks.resize_with(words, || AtomicU32::new(0));
    Ok(Some(blocks.into_boxed_slice()))
  }

  /// Gives `id` the blocks from [`Self::new_blocks`]. Must be called at most once per element,
  /// before the element is reachable.
  pub fn attach(&self, id: TableInt, blocks: Option<Box<[AtomicU32]>>) {
    let Some(blocks) = blocks else {
      return;
    };
    let installed = self.lists[id as usize].set(blocks).is_ok();
    assert!(installed, "level lists for element {id} allocated twice");
  }

  /// Installs deserialized blocks. Requires exclusive access.
  pub fn install(&mut self, id: TableInt, words: Vec<u32>) -> Result<()> {
    if words.len() % self.words_per_level != 0 {
      return Err(Error::InvalidIndexFormat(format!(
        "level list for element {id} is not a whole number of levels"
      )));
    }
    let blocks: Box<[AtomicU32]> = words.into_iter().map(AtomicU32::new).collect();
    self.lists[id as usize] = OnceLock::from(blocks);
    Ok(())
  }

  pub fn level(&self, id: TableInt) -> usize {
    self.lists[id as usize]
      .get()
      .map_or(0, |b| b.len() / self.words_per_level)
  }

  /// Block (header + `maxM` slots) for `level >= 1`. Panics if the element lacks that level.
  pub fn block(&self, id: TableInt, level: usize) -> &[AtomicU32] {
    assert!(level > 0, "level 0 links live in the arena");
    let Some(raw) = self.lists[id as usize].get() else {
      panic!("element {id} has no level {level}");
    };
    let start = (level - 1) * self.words_per_level;
    assert!(
      start + self.words_per_level <= raw.len(),
      "element {id} has no level {level}"
    );
    &raw[start..start + self.words_per_level]
  }

  /// All words of an element's upper levels, for serialization. Empty for level-0 elements.
  pub fn raw_words(&self, id: TableInt) -> impl Iterator<Item = u32> + '_ {
    self.lists[id as usize]
      .get()
      .into_iter()
      .flat_map(|b| b.iter().map(|w| w.load(Ordering::Acquire)))
  }
}
