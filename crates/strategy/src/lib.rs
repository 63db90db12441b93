pub mod allocator;

pub use allocator::{AllocationError, AllocationManager, RebalanceReport};
