//! Handlers 模块

pub mod alerts;
pub mod cache;
pub mod events;
pub mod metrics;
pub mod org;

pub use alerts::*;
pub use cache::*;
pub use events::*;
pub use metrics::*;
pub use org::*;
