//! Fixed-stride storage for level-0 records.
//!
//! Each record is laid out in 32-bit words as
//!
//! ```text
//! [header][link 0 .. link maxM0-1][vector data ...][label lo][label hi]
//! ```
//!
//! The header holds the link count in its low 16 bits and flag bits above; bit 16 (byte 2 in
//! little-endian order) is the soft-delete mark. Every offset is `id * stride + constant`.

use crate::error::Error;
use crate::error::Result;
use crate::LabelType;
use crate::TableInt;
use std::mem::size_of;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

pub const DELETE_MARK: u32 = 0x01 << 16;
const COUNT_MASK: u32 = 0xffff;

pub fn linklist_count(header: u32) -> usize {
  (header & COUNT_MASK) as usize
}

fn with_linklist_count(header: u32, count: usize) -> u32 {
  assert!(count <= COUNT_MASK as usize, "link count {count} overflows header");
  (header & !COUNT_MASK) | count as u32
}

/// Stores `count` into a link block header without disturbing its flag bits.
pub fn store_linklist_count(header: &AtomicU32, count: usize) {
  let mut old = header.load(Ordering::Relaxed);
  loop {
    let new = with_linklist_count(old, count);
    match header.compare_exchange_weak(old, new, Ordering::Release, Ordering::Relaxed) {
      Ok(_) => return,
      Err(actual) => old = actual,
    }
  }
}

#[derive(Debug)]
pub struct Level0Arena {
  words: Vec<AtomicU32>,
  capacity: usize,
  max_m0: usize,
  data_words: usize,
  stride: usize,
}

impl Level0Arena {
  pub fn new(capacity: usize, max_m0: usize, data_size: usize) -> Result<Self> {
    assert_eq!(
      data_size % size_of::<u32>(),
      0,
      "vector data must be a whole number of words"
    );
    let data_words = data_size / size_of::<u32>();
    let mut arena = Self {
      words: Vec::new(),
      capacity: 0,
      max_m0,
      data_words,
      stride: 1 + max_m0 + data_words + 2,
    };
    arena.grow(capacity)?;
    Ok(arena)
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Record size in bytes.
  pub fn stride_bytes(&self) -> usize {
    self.stride * size_of::<u32>()
  }

  /// Byte offset of the vector data within a record.
  pub fn data_offset_bytes(&self) -> usize {
    (1 + self.max_m0) * size_of::<u32>()
  }

  /// Byte offset of the label within a record.
  pub fn label_offset_bytes(&self) -> usize {
    (1 + self.max_m0 + self.data_words) * size_of::<u32>()
  }

  /// Reallocates to `new_capacity` records, copying existing ones. Requires exclusive access,
  /// so no reader can hold a reference into the old allocation.
  pub fn grow(&mut self, new_capacity: usize) -> Result<()> {
    if new_capacity <= self.capacity {
      return Ok(());
    }
    let total = new_capacity
      .checked_mul(self.stride)
      .ok_or(Error::CapacityOverflow(new_capacity))?;
    let mut words: Vec<AtomicU32> = Vec::new();
    words
      .try_reserve_exact(total)
      .map_err(|_| Error::OutOfMemory {
        what: "level-0 arena",
      })?;
    words.extend(
      self
        .words
        .iter()
        .map(|w| AtomicU32::new(w.load(Ordering::Relaxed))),
    );
    words.resize_with(total, || AtomicU32::new(0));
    self.words = words;
    self.capacity = new_capacity;
    Ok(())
  }

  fn record(&self, id: TableInt) -> &[AtomicU32] {
    let start = id as usize * self.stride;
    assert!(
      (id as usize) < self.capacity,
      "internal id {id} out of arena bounds ({})",
      self.capacity
    );
    &self.words[start..start + self.stride]
  }

  pub fn header(&self, id: TableInt) -> &AtomicU32 {
    &self.record(id)[0]
  }

  /// Header followed by `maxM0` link slots.
  pub fn link_block(&self, id: TableInt) -> &[AtomicU32] {
    &self.record(id)[..1 + self.max_m0]
  }

  pub fn is_deleted(&self, id: TableInt) -> bool {
    self.header(id).load(Ordering::Acquire) & DELETE_MARK != 0
  }

  /// Sets the delete mark, returning whether it was already set.
  pub fn set_deleted(&self, id: TableInt) -> bool {
    self.header(id).fetch_or(DELETE_MARK, Ordering::AcqRel) & DELETE_MARK != 0
  }

  /// Clears the delete mark, returning whether it was set.
  pub fn clear_deleted(&self, id: TableInt) -> bool {
    self.header(id).fetch_and(!DELETE_MARK, Ordering::AcqRel) & DELETE_MARK != 0
  }

  pub fn vector(&self, id: TableInt) -> &[f32] {
    let start = 1 + self.max_m0;
    let words = &self.record(id)[start..start + self.data_words];
    // SAFETY: AtomicU32 has the size and alignment of u32, and therefore of f32. Vector words
    // are written once, by `init_record`, while the inserting thread holds the element's update
    // lock and before the id is stored into any link slot or the entry point. Every reader
    // reaches the id either through a Release/Acquire pair on a link slot, link count or entry
    // point, or by taking that update lock, so the writes happen before the read.
    unsafe { std::slice::from_raw_parts(words.as_ptr().cast::<f32>(), self.data_words) }
  }

  pub fn label(&self, id: TableInt) -> LabelType {
    let rec = self.record(id);
    let lo = rec[self.stride - 2].load(Ordering::Acquire) as u64;
    let hi = rec[self.stride - 1].load(Ordering::Acquire) as u64;
    lo | (hi << 32)
  }

  /// Zeroes the record, then writes its vector and label.
  pub fn init_record(&self, id: TableInt, vector: &[f32], label: LabelType) {
    assert_eq!(vector.len(), self.data_words);
    let rec = self.record(id);
    for w in &rec[..1 + self.max_m0] {
      w.store(0, Ordering::Relaxed);
    }
    let start = 1 + self.max_m0;
    let bits: &[u32] = bytemuck::cast_slice(vector);
    for (w, &b) in rec[start..start + self.data_words].iter().zip(bits) {
      w.store(b, Ordering::Relaxed);
    }
    rec[self.stride - 2].store(label as u32, Ordering::Relaxed);
    rec[self.stride - 1].store((label >> 32) as u32, Ordering::Release);
  }

  /// Raw words of one record, for serialization.
  pub fn record_words(&self, id: TableInt) -> impl Iterator<Item = u32> + '_ {
    self.record(id).iter().map(|w| w.load(Ordering::Acquire))
  }

  /// Overwrites one record from serialized words. Requires exclusive access.
  pub fn load_record(&mut self, id: TableInt, words: &[u32]) {
    assert_eq!(words.len(), self.stride);
    for (dst, &src) in self.record(id).iter().zip(words) {
      dst.store(src, Ordering::Relaxed);
    }
  }

  pub fn stride_words(&self) -> usize {
    self.stride
  }
}
