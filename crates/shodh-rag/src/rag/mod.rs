//! Query condensation (C8). The teacher's broader query-rewriting/
//! decomposition/evaluation modules were dropped — see DESIGN.md's final
//! trimming pass.

pub mod query_condenser;

pub use query_condenser::{condense, should_condense};
