//! Binary index format.
//!
//! All scalars are little-endian. The layout follows hnswlib's, so an index without norm
//! factors is readable by hnswlib and vice versa:
//!
//! ```text
//! offset_level0 u64 | max_elements u64 | cur_element_count u64 | size_data_per_element u64
//! label_offset u64 | offset_data u64 | max_level i32 | entry_point u32
//! max_m u64 | max_m0 u64 | m u64 | mult f64 | ef_construction u64
//! level-0 records, cur_element_count * size_data_per_element bytes
//! per element: u32 byte length, then that many bytes of upper-level link blocks
//! optional: b"NAPGNORM" | u32 range count | (f32 start norm, f32 factor) per range
//! ```

use crate::arena::linklist_count;
use crate::error::Error;
use crate::error::Result;
use crate::hnsw::HnswIndex;
use crate::norm::NormFactors;
use crate::LabelType;
use crate::Space;
use crate::TableInt;
use byteorder::ByteOrder;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::mem::size_of;
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::debug;

const NORM_TRAILER_MAGIC: &[u8; 8] = b"NAPGNORM";
const NO_ENTRY_POINT: u32 = u32::MAX;
const DEFAULT_RANDOM_SEED: u64 = 100;

const HEADER_BYTES: usize =
  10 * size_of::<u64>() + size_of::<f64>() + size_of::<i32>() + size_of::<u32>();

fn truncated(_: std::io::Error) -> Error {
  Error::InvalidIndexFormat("unexpected EOF".to_string())
}

fn read_len(rd: &mut &[u8]) -> Result<usize> {
  let v = rd.read_u64::<LittleEndian>().map_err(truncated)?;
  usize::try_from(v).map_err(|_| Error::InvalidIndexFormat(format!("length {v} out of range")))
}

fn take<'a>(rd: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
  if rd.len() < n {
    return Err(Error::InvalidIndexFormat("unexpected EOF".to_string()));
  }
  let (head, rest) = rd.split_at(n);
  *rd = rest;
  Ok(head)
}

impl<S: Space> HnswIndex<S> {
  /// Exact size in bytes of what [`Self::save_to_writer`] would write right now.
  pub fn serialized_size(&self) -> usize {
    let count = self.len();
    let level_bytes: usize = (0..count as TableInt)
      .map(|id| size_of::<u32>() + self.level_of(id) * self.levels.level_stride_bytes())
      .sum();
    let trailer = self.norm_factors().map_or(0, |f| {
      NORM_TRAILER_MAGIC.len() + size_of::<u32>() + f.num_ranges() * 2 * size_of::<f32>()
    });
    HEADER_BYTES + count * self.arena.stride_bytes() + level_bytes + trailer
  }

  pub fn save_to_writer(&self, mut w: impl Write) -> Result<()> {
    let _mutation_guard = self.mutation_lock.write();
    let cur_element_count = self.len();
    let (entry_point, max_level) = match self.entry_point() {
      Some((ep, level)) => (ep, level as i32),
      None => (NO_ENTRY_POINT, -1),
    };

    w.write_u64::<LittleEndian>(0)?;
    w.write_u64::<LittleEndian>(self.max_elements as u64)?;
    w.write_u64::<LittleEndian>(cur_element_count as u64)?;
    w.write_u64::<LittleEndian>(self.arena.stride_bytes() as u64)?;
    w.write_u64::<LittleEndian>(self.arena.label_offset_bytes() as u64)?;
    w.write_u64::<LittleEndian>(self.arena.data_offset_bytes() as u64)?;
    w.write_i32::<LittleEndian>(max_level)?;
    w.write_u32::<LittleEndian>(entry_point)?;
    w.write_u64::<LittleEndian>(self.max_m as u64)?;
    w.write_u64::<LittleEndian>(self.max_m0 as u64)?;
    w.write_u64::<LittleEndian>(self.m as u64)?;
    w.write_f64::<LittleEndian>(self.mult)?;
    w.write_u64::<LittleEndian>(self.ef_construction as u64)?;

    for id in 0..cur_element_count as TableInt {
      for word in self.arena.record_words(id) {
        w.write_u32::<LittleEndian>(word)?;
      }
    }

    for id in 0..cur_element_count as TableInt {
      let link_list_size = self.level_of(id) * self.levels.level_stride_bytes();
      w.write_u32::<LittleEndian>(link_list_size as u32)?;
      for word in self.levels.raw_words(id) {
        w.write_u32::<LittleEndian>(word)?;
      }
    }

    if let Some(factors) = self.norm_factors() {
      w.write_all(NORM_TRAILER_MAGIC)?;
      w.write_u32::<LittleEndian>(factors.num_ranges() as u32)?;
      for (start, factor) in factors.ranges() {
        w.write_f32::<LittleEndian>(start)?;
        w.write_f32::<LittleEndian>(factor)?;
      }
    }
    w.flush()?;

    debug!(
      elements = cur_element_count,
      max_level,
      entry_point,
      "saved index"
    );
    Ok(())
  }

  pub fn save_to_vec(&self) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(self.serialized_size());
    self.save_to_writer(&mut out)?;
    Ok(out)
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
    let f = File::create(path)?;
    self.save_to_writer(BufWriter::new(f))
  }

  pub fn load(space: S, path: impl AsRef<Path>) -> Result<Self> {
    Self::load_from_reader(space, BufReader::new(File::open(path)?))
  }

  pub fn load_from_reader(space: S, mut r: impl Read) -> Result<Self> {
    let mut data = Vec::new();
    r.read_to_end(&mut data)?;
    Self::load_from_bytes(space, &data)
  }

  pub fn load_from_bytes(space: S, data: &[u8]) -> Result<Self> {
    Self::load_with_capacity(space, data, None)
  }

  /// Loads an index, growing it to `max_elements` if that exceeds the stored element count.
  pub fn load_with_capacity(space: S, data: &[u8], max_elements: Option<usize>) -> Result<Self> {
    let mut rd = data;

    let offset_level0 = read_len(&mut rd)?;
    let file_max_elements = read_len(&mut rd)?;
    let cur_element_count = read_len(&mut rd)?;
    let size_data_per_element = read_len(&mut rd)?;
    let label_offset = read_len(&mut rd)?;
    let offset_data = read_len(&mut rd)?;
    let max_level = rd.read_i32::<LittleEndian>().map_err(truncated)?;
    let entry_point = rd.read_u32::<LittleEndian>().map_err(truncated)?;
    let max_m = read_len(&mut rd)?;
    let max_m0 = read_len(&mut rd)?;
    let m = read_len(&mut rd)?;
    let mult = rd.read_f64::<LittleEndian>().map_err(truncated)?;
    let ef_construction = read_len(&mut rd)?;

    if offset_level0 != 0 {
      return Err(Error::InvalidIndexFormat(format!(
        "unsupported offset_level0={offset_level0}"
      )));
    }
    if m < 2 {
      return Err(Error::InvalidIndexFormat("invalid M".to_string()));
    }
    if max_m != m {
      return Err(Error::InvalidIndexFormat(
        "unsupported: maxM != M".to_string(),
      ));
    }
    if max_m0 != m.saturating_mul(2) {
      return Err(Error::InvalidIndexFormat(
        "unsupported: maxM0 != 2*M".to_string(),
      ));
    }
    if cur_element_count > file_max_elements {
      return Err(Error::InvalidIndexFormat(
        "cur_element_count > max_elements".to_string(),
      ));
    }
    if !(mult.is_finite() && mult > 0.0) {
      return Err(Error::InvalidIndexFormat(format!("invalid mult {mult}")));
    }

    let capacity = match max_elements {
      Some(requested) if requested >= cur_element_count => requested,
      _ => file_max_elements,
    };
    let mut idx = Self::new(space, capacity, m, ef_construction, DEFAULT_RANDOM_SEED)
      .map_err(|e| match e {
        Error::Config(msg) => Error::InvalidIndexFormat(msg),
        other => other,
      })?;
    if idx.m != m {
      return Err(Error::InvalidIndexFormat(format!("M={m} exceeds the supported maximum")));
    }
    idx.mult = mult;

    if size_data_per_element != idx.arena.stride_bytes()
      || offset_data != idx.arena.data_offset_bytes()
      || label_offset != idx.arena.label_offset_bytes()
    {
      return Err(Error::InvalidIndexFormat(
        "incompatible dimension for index".to_string(),
      ));
    }

    let mut record = vec![0u32; idx.arena.stride_words()];
    for id in 0..cur_element_count as TableInt {
      let bytes = take(&mut rd, size_data_per_element)?;
      LittleEndian::read_u32_into(bytes, &mut record);
      idx.arena.load_record(id, &record);
    }

    let level_stride = idx.levels.level_stride_bytes();
    for id in 0..cur_element_count as TableInt {
      let link_list_size = rd.read_u32::<LittleEndian>().map_err(truncated)? as usize;
      if link_list_size % level_stride != 0 {
        return Err(Error::InvalidIndexFormat(format!(
          "level list of element {id} has {link_list_size} bytes"
        )));
      }
      if link_list_size == 0 {
        continue;
      }
      let bytes = take(&mut rd, link_list_size)?;
      let mut words = vec![0u32; link_list_size / size_of::<u32>()];
      LittleEndian::read_u32_into(bytes, &mut words);
      idx.levels.install(id, words)?;
    }

    if !rd.is_empty() {
      let magic = take(&mut rd, NORM_TRAILER_MAGIC.len())?;
      if magic != NORM_TRAILER_MAGIC {
        return Err(Error::InvalidIndexFormat(
          "unexpected trailing bytes".to_string(),
        ));
      }
      let n = rd.read_u32::<LittleEndian>().map_err(truncated)? as usize;
      let mut starts = Vec::new();
      let mut factors = Vec::new();
      for _ in 0..n {
        starts.push(rd.read_f32::<LittleEndian>().map_err(truncated)?);
        factors.push(rd.read_f32::<LittleEndian>().map_err(truncated)?);
      }
      if !rd.is_empty() {
        return Err(Error::InvalidIndexFormat(
          "unexpected trailing bytes".to_string(),
        ));
      }
      let factors = NormFactors::new(starts, factors)
        .map_err(|e| Error::InvalidIndexFormat(format!("norm trailer: {e}")))?;
      idx.set_norm_factors(Some(factors));
    }

    idx.validate_loaded_links(cur_element_count)?;

    if cur_element_count == 0 {
      if entry_point != NO_ENTRY_POINT || max_level != -1 {
        return Err(Error::InvalidIndexFormat(
          "empty index with an entry point".to_string(),
        ));
      }
    } else {
      if entry_point as usize >= cur_element_count || max_level < 0 {
        return Err(Error::InvalidIndexFormat(format!(
          "invalid entry point {entry_point}"
        )));
      }
      if idx.level_of(entry_point) != max_level as usize {
        return Err(Error::InvalidIndexFormat(format!(
          "entry point {entry_point} is not at max level {max_level}"
        )));
      }
      idx.set_entry_point(entry_point, max_level as usize);
    }

    let mut num_deleted = 0;
    {
      let lookup = idx.label_lookup.get_mut();
      for id in 0..cur_element_count as TableInt {
        let label: LabelType = idx.arena.label(id);
        lookup.insert(label, id);
        if idx.arena.is_deleted(id) {
          num_deleted += 1;
        }
      }
    }
    idx.num_deleted.store(num_deleted, Ordering::Release);
    idx
      .cur_element_count
      .store(cur_element_count, Ordering::Release);

    debug!(
      elements = cur_element_count,
      deleted = num_deleted,
      capacity,
      "loaded index"
    );
    Ok(idx)
  }

  /// Checks every stored link so that traversals of the loaded graph cannot hit an invariant
  /// panic.
  fn validate_loaded_links(&self, count: usize) -> Result<()> {
    for id in 0..count as TableInt {
      for level in 0..=self.level_of(id) {
        let block = self.link_block(id, level);
        let cnt = linklist_count(block[0].load(Ordering::Relaxed));
        if cnt > self.degree_cap(level) {
          return Err(Error::InvalidIndexFormat(format!(
            "element {id} has {cnt} links at level {level}"
          )));
        }
        for slot in &block[1..1 + cnt] {
          let n = slot.load(Ordering::Relaxed);
          if n as usize >= count || self.level_of(n) < level {
            return Err(Error::InvalidIndexFormat(format!(
              "element {id} links to invalid element {n} at level {level}"
            )));
          }
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::space::L2Space;

  fn build(n: usize) -> HnswIndex<L2Space> {
    let idx = HnswIndex::new(L2Space::new(3), n + 5, 4, 32, 9).unwrap();
    for i in 0..n {
      let x = i as f32;
      idx.insert(&[x, x.sin(), x.cos()], 1000 + i as LabelType).unwrap();
    }
    idx
  }

  #[test]
  fn roundtrip_is_byte_identical() {
    let idx = build(60);
    idx.mark_deleted(1003).unwrap();
    let bytes = idx.save_to_vec().unwrap();
    assert_eq!(bytes.len(), idx.serialized_size());

    let loaded = HnswIndex::load_from_bytes(L2Space::new(3), &bytes).unwrap();
    assert_eq!(loaded.len(), 60);
    assert_eq!(loaded.max_elements(), 65);
    assert_eq!(loaded.deleted_count(), 1);
    assert_eq!(loaded.entry_point(), idx.entry_point());
    assert_eq!(loaded.save_to_vec().unwrap(), bytes);
  }

  #[test]
  fn empty_index_roundtrips() {
    let idx = HnswIndex::new(L2Space::new(2), 3, 4, 16, 1).unwrap();
    let bytes = idx.save_to_vec().unwrap();
    assert_eq!(bytes.len(), HEADER_BYTES);
    let loaded = HnswIndex::load_from_bytes(L2Space::new(2), &bytes).unwrap();
    assert!(loaded.is_empty());
    assert_eq!(loaded.max_level(), -1);
  }

  #[test]
  fn header_fields_are_where_hnswlib_expects_them() {
    let idx = build(3);
    let bytes = idx.save_to_vec().unwrap();
    assert_eq!(LittleEndian::read_u64(&bytes[0..8]), 0);
    assert_eq!(LittleEndian::read_u64(&bytes[8..16]), 8);
    assert_eq!(LittleEndian::read_u64(&bytes[16..24]), 3);
    // (1 + 8) link words, 3 floats, one u64 label.
    assert_eq!(LittleEndian::read_u64(&bytes[24..32]), 36 + 12 + 8);
    assert_eq!(LittleEndian::read_u64(&bytes[32..40]), 48);
    assert_eq!(LittleEndian::read_u64(&bytes[40..48]), 36);
    assert_eq!(LittleEndian::read_u64(&bytes[56..64]), 4);
    assert_eq!(LittleEndian::read_u64(&bytes[64..72]), 8);
  }

  #[test]
  fn norm_factors_survive_roundtrip() {
    let idx = build(10);
    let factors = NormFactors::new(vec![0.0, 2.0], vec![1.0, 0.75]).unwrap();
    idx.set_norm_factors(Some(factors.clone()));
    let bytes = idx.save_to_vec().unwrap();
    assert_eq!(bytes.len(), idx.serialized_size());
    let loaded = HnswIndex::load_from_bytes(L2Space::new(3), &bytes).unwrap();
    assert_eq!(loaded.norm_factors().as_deref(), Some(&factors));
  }

  #[test]
  fn capacity_can_be_raised_on_load() {
    let bytes = build(5).save_to_vec().unwrap();
    let loaded = HnswIndex::load_with_capacity(L2Space::new(3), &bytes, Some(100)).unwrap();
    assert_eq!(loaded.max_elements(), 100);
    let loaded = HnswIndex::load_with_capacity(L2Space::new(3), &bytes, Some(2)).unwrap();
    assert_eq!(loaded.max_elements(), 10);
  }

  #[test]
  fn reinserted_label_resolves_to_latest_element() {
    let idx = build(4);
    let id = idx.insert(&[9.0, 9.0, 9.0], 1001).unwrap();
    let bytes = idx.save_to_vec().unwrap();
    let loaded = HnswIndex::load_from_bytes(L2Space::new(3), &bytes).unwrap();
    assert_eq!(loaded.get_internal_id(1001), Some(id));
  }

  #[test]
  fn wrong_dimension_is_rejected() {
    let bytes = build(5).save_to_vec().unwrap();
    assert!(matches!(
      HnswIndex::load_from_bytes(L2Space::new(4), &bytes),
      Err(Error::InvalidIndexFormat(_))
    ));
  }

  #[test]
  fn truncated_and_padded_inputs_are_rejected() {
    let bytes = build(20).save_to_vec().unwrap();
    for cut in [0, 10, HEADER_BYTES, bytes.len() - 1] {
      assert!(
        matches!(
          HnswIndex::load_from_bytes(L2Space::new(3), &bytes[..cut]),
          Err(Error::InvalidIndexFormat(_))
        ),
        "cut at {cut}"
      );
    }
    let mut padded = bytes.clone();
    padded.extend_from_slice(&[0; 3]);
    assert!(matches!(
      HnswIndex::load_from_bytes(L2Space::new(3), &padded),
      Err(Error::InvalidIndexFormat(_))
    ));
  }

  #[test]
  fn out_of_range_link_is_rejected() {
    let idx = build(3);
    let mut bytes = idx.save_to_vec().unwrap();
    // Element 0: link count 1, first link pointing past the element count.
    let rec = HEADER_BYTES;
    LittleEndian::write_u32(&mut bytes[rec..rec + 4], 1);
    LittleEndian::write_u32(&mut bytes[rec + 4..rec + 8], 77);
    assert!(matches!(
      HnswIndex::load_from_bytes(L2Space::new(3), &bytes),
      Err(Error::InvalidIndexFormat(_))
    ));
  }

  #[test]
  fn file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.bin");
    let idx = build(30);
    idx.save(&path).unwrap();
    let loaded = HnswIndex::load(L2Space::new(3), &path).unwrap();
    assert_eq!(loaded.len(), 30);
    let q = idx.get_data_by_label(1010).unwrap();
    assert_eq!(loaded.search_knn(&q, 1).unwrap()[0].1, 1010);
  }
}
