pub mod config;
pub mod error;
pub mod external;
pub mod firework;
pub mod log;
pub mod pipeline;
pub mod resolver;
pub mod scan;
mod serde_default;
pub mod staging;
pub mod utils;

pub use markers;
