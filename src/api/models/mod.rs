pub mod listings;
pub mod system;

pub use listings::*;
pub use system::*;
