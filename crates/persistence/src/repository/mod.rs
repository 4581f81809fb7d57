//! Repository implementations for database operations

pub mod nodes;
pub mod pings;
pub mod rates;
pub mod rewards;

pub use nodes::*;
pub use pings::*;
pub use rates::*;
pub use rewards::*;
