pub mod report;
pub mod scheduler;

pub use report::{format_snapshot, CycleSnapshot, PositionLine};
pub use scheduler::{CycleOutcome, RebalancingLoop};
