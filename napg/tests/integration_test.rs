//! End-to-end behavior of the index through its public API.

use napg::cfg::NormAdjustCfg;
use napg::norm::NormCalibrator;
use napg::BruteforceIndex;
use napg::Error;
use napg::HnswCfg;
use napg::HnswIndex;
use napg::L2Space;
use napg::LabelType;
use napg::StdMetric;
use napg::StdSpace;
use napg::TableInt;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::collections::VecDeque;

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n)
    .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
    .collect()
}

fn build(data: &[Vec<f32>], m: usize, ef_construction: usize) -> HnswIndex<L2Space> {
  let idx = HnswIndex::new(
    L2Space::new(data[0].len()),
    data.len(),
    m,
    ef_construction,
    100,
  )
  .unwrap();
  for (i, v) in data.iter().enumerate() {
    idx.insert(v, i as LabelType).unwrap();
  }
  idx
}

#[test]
fn test_self_match_then_delete() {
  let data = random_vectors(5, 8, 1);
  let idx = HnswIndex::new(L2Space::new(8), 10, 16, 200, 100).unwrap();
  for (i, v) in data.iter().enumerate() {
    idx.insert(v, i as LabelType + 1).unwrap();
  }

  let res = idx.search_knn(&data[2], 1).unwrap();
  assert_eq!(res, vec![(0.0, 3)]);

  idx.mark_deleted(3).unwrap();
  let res = idx.search_knn(&data[2], 1).unwrap();
  assert_eq!(res.len(), 1);
  assert_ne!(res[0].1, 3);
  assert!(matches!(idx.mark_deleted(3), Err(Error::AlreadyDeleted(3))));
}

#[test]
fn test_capacity_and_resize() {
  let data = random_vectors(6, 4, 2);
  let mut idx = HnswIndex::new(L2Space::new(4), 5, 16, 200, 100).unwrap();
  for (i, v) in data[..5].iter().enumerate() {
    idx.insert(v, i as LabelType).unwrap();
  }

  assert!(matches!(
    idx.insert(&data[5], 5),
    Err(Error::IndexFull { max_elements: 5 })
  ));
  assert_eq!(idx.len(), 5);

  assert!(matches!(
    idx.resize(4),
    Err(Error::ResizeBelowCount {
      requested: 4,
      current: 5
    })
  ));
  assert_eq!(idx.max_elements(), 5);
  assert_eq!(idx.len(), 5);

  idx.resize(20).unwrap();
  assert_eq!(idx.max_elements(), 20);
  idx.insert(&data[5], 5).unwrap();
  assert_eq!(idx.len(), 6);
  for (i, v) in data.iter().enumerate() {
    assert_eq!(idx.search_knn(v, 1).unwrap()[0].1, i as LabelType);
  }
}

#[test]
fn test_degree_caps_hold() {
  let data = random_vectors(2000, 6, 3);
  let idx = build(&data, 6, 40);
  for id in 0..idx.len() as TableInt {
    assert!(idx.get_connections(id, 0).len() <= 12);
    for level in 1..=idx.level_of(id) {
      assert!(idx.get_connections(id, level).len() <= 6);
    }
  }
  idx.check_integrity().unwrap();
}

#[test]
fn test_upper_level_elements_are_navigable() {
  let data = random_vectors(1500, 4, 4);
  let idx = build(&data, 4, 32);
  let (ep, max_level) = idx.entry_point().unwrap();

  // States are (element, level). From each state we may follow a link on the same level or
  // step down a level on the same element.
  let mut seen: HashSet<(TableInt, usize)> = HashSet::new();
  let mut queue = VecDeque::from([(ep, max_level)]);
  seen.insert((ep, max_level));
  while let Some((id, level)) = queue.pop_front() {
    let mut next: Vec<(TableInt, usize)> = idx
      .get_connections(id, level)
      .into_iter()
      .map(|n| (n, level))
      .collect();
    if level > 0 {
      next.push((id, level - 1));
    }
    for state in next {
      if seen.insert(state) {
        queue.push_back(state);
      }
    }
  }

  let reached: HashSet<TableInt> = seen.iter().map(|&(id, _)| id).collect();
  for id in 0..idx.len() as TableInt {
    if idx.level_of(id) >= 1 {
      assert!(reached.contains(&id), "element {id} is unreachable");
    }
  }
}

#[test]
fn test_exhaustive_ef_matches_brute_force() {
  let data = random_vectors(800, 3, 5);
  let idx = build(&data, 16, 200);
  idx.set_ef(data.len());

  let mut bf = BruteforceIndex::new(L2Space::new(3));
  for (i, v) in data.iter().enumerate() {
    bf.insert(v, i as LabelType).unwrap();
  }

  for q in random_vectors(30, 3, 6) {
    let got = idx.search_knn(&q, 10).unwrap();
    let want = bf.search_knn(&q, 10, None).unwrap();
    let got_d: Vec<f32> = got.iter().map(|r| r.0).collect();
    let want_d: Vec<f32> = want.iter().map(|r| r.0).collect();
    assert_eq!(got_d, want_d);
  }
}

#[test]
fn test_save_load_roundtrip() {
  let data = random_vectors(400, 5, 7);
  let idx = build(&data, 8, 64);
  idx.mark_deleted(17).unwrap();
  idx.mark_deleted(200).unwrap();

  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("napg.idx");
  idx.save(&path).unwrap();
  let loaded = HnswIndex::load(L2Space::new(5), &path).unwrap();

  assert_eq!(loaded.entry_point(), idx.entry_point());
  assert_eq!(loaded.max_level(), idx.max_level());
  assert_eq!(loaded.len(), idx.len());
  assert_eq!(loaded.deleted_count(), 2);
  for id in 0..idx.len() as TableInt {
    let label = idx.get_external_label(id).unwrap();
    assert_eq!(loaded.get_external_label(id), Some(label));
    assert_eq!(loaded.level_of(id), idx.level_of(id));
    for level in 0..=idx.level_of(id) {
      let a: HashSet<TableInt> = idx.get_connections(id, level).into_iter().collect();
      let b: HashSet<TableInt> = loaded.get_connections(id, level).into_iter().collect();
      assert_eq!(a, b);
    }
    match idx.get_data_by_label(label) {
      Ok(v) => assert_eq!(loaded.get_data_by_label(label).unwrap(), v),
      Err(_) => assert!(loaded.is_deleted(label).unwrap()),
    }
  }

  assert_eq!(
    std::fs::metadata(&path).unwrap().len() as usize,
    idx.serialized_size()
  );
}

#[test]
fn test_norm_adjusted_build() {
  let cfg = HnswCfg {
    dim: 8,
    metric: StdMetric::InnerProduct,
    max_elements: 1000,
    m: 12,
    ef_construction: 100,
    norm_adjust: NormAdjustCfg {
      enabled: true,
      subranges: 4,
      samples: 20,
      neighbors: 20,
      seed: 3,
    },
    ..Default::default()
  };
  let idx = HnswIndex::from_cfg(&cfg).unwrap();
  // Norms spread over roughly an order of magnitude.
  let data: Vec<Vec<f32>> = random_vectors(1000, 8, 8)
    .into_iter()
    .enumerate()
    .map(|(i, v)| {
      let scale = 0.2 + 2.0 * (i % 10) as f32 / 10.0;
      v.into_iter().map(|x| x * scale).collect()
    })
    .collect();

  let mut calibrator = NormCalibrator::new();
  for v in &data[..500] {
    calibrator.push(v);
  }
  let factors = calibrator.finish(&cfg.norm_adjust).unwrap();
  assert_eq!(factors.num_ranges(), 4);
  idx.set_norm_factors(Some(factors));

  for (i, v) in data.iter().enumerate() {
    idx.insert(v, i as LabelType).unwrap();
  }
  idx.set_ef(64);
  idx.check_integrity().unwrap();

  let mut bf = BruteforceIndex::new(StdSpace::new(StdMetric::InnerProduct, 8));
  for (i, v) in data.iter().enumerate() {
    bf.insert(v, i as LabelType).unwrap();
  }
  let mut hits = 0;
  let queries = random_vectors(50, 8, 9);
  for q in &queries {
    let got: HashSet<LabelType> = idx.search_knn(q, 10).unwrap().iter().map(|r| r.1).collect();
    hits += bf
      .search_knn(q, 10, None)
      .unwrap()
      .iter()
      .filter(|r| got.contains(&r.1))
      .count();
  }
  let recall = hits as f64 / (queries.len() * 10) as f64;
  assert!(recall > 0.7, "recall {recall}");
}

#[test]
fn test_cfg_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("index.toml");
  std::fs::write(&path, "dim = 3\nm = 4\nef = 7\n").unwrap();
  let cfg = HnswCfg::load(&path).unwrap();
  let idx = HnswIndex::from_cfg(&cfg).unwrap();
  assert_eq!(idx.m(), 4);
  assert_eq!(idx.ef(), 7);
  idx.insert(&[1.0, 2.0, 3.0], 42).unwrap();
  assert_eq!(idx.search_knn(&[1.0, 2.0, 3.0], 1).unwrap(), vec![(0.0, 42)]);
}
