//! Block manager and its supporting data structures: address cookies, the
//! file descriptor block, per-block headers, and the free-extent list.

pub mod addr;
pub mod descriptor;
pub mod extent;
pub mod header;
pub mod manager;

pub use addr::{AddressCookie, DisaggregatedAddr};
pub use descriptor::Descriptor;
pub use extent::{AllocStrategy, Extent, ExtentList};
pub use header::{BlockFlags, BlockHeader};
pub use manager::BlockManager;
