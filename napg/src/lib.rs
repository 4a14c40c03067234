//! Approximate nearest-neighbor search over a navigable multi-layer proximity graph.
//!
//! [`HnswIndex`] supports concurrent insertion and search, soft deletion, growth, and a
//! binary on-disk format. Neighbor selection can optionally be biased by norm-range
//! correction factors computed from a sample of the data (see [`norm`]).

pub mod arena;
pub mod bruteforce;
pub mod cfg;
pub mod delete;
pub mod error;
pub mod heuristic;
pub mod hnsw;
pub mod insert;
pub mod integrity;
pub mod levels;
pub mod locks;
pub mod norm;
pub mod persist;
pub mod search;
pub mod space;
pub mod visited;

pub use bruteforce::BruteforceIndex;
pub use cfg::HnswCfg;
pub use cfg::NormAdjustCfg;
pub use error::Error;
pub use error::Result;
pub use hnsw::HnswIndex;
pub use integrity::IntegrityReport;
pub use norm::NormFactors;
pub use search::SearchStats;
pub use space::InnerProductSpace;
pub use space::L2Space;
pub use space::Space;
pub use space::StdMetric;
pub use space::StdSpace;

pub type TableInt = u32; // Internal ID.
pub type LabelType = u64; // External ID.
