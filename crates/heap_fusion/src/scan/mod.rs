//! Heap scan machinery: shared scan state, per-worker state, the pull
//! driver and filter translation.

pub mod driver;
pub mod filter;
pub mod global;
pub mod local;

pub use driver::{DriverState, ScanDriver, ScanPull};
pub use filter::translate_filter;
pub use global::{
    init_relation_missing_attrs, InitInput, ScanColumn, ScanColumns, ScanGlobalState, ScanRun,
};
pub use local::ScanLocalState;
