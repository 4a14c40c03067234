pub mod build;
pub mod check;
pub mod eval;
pub mod query;
