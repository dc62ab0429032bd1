//! Order and position lifecycle: simulated fills, the position table,
//! and the append-only trade ledger.

mod engine;

pub use engine::{ExecutionEngine, OrderRequest};
