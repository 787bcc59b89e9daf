pub mod trace;
pub mod rate_limit;
pub mod security;

pub use trace::*;
pub use rate_limit::*;
pub use security::*;
