pub mod apply;
pub mod diff;
pub mod pipeline;
pub mod planner;
pub mod resolve;
pub mod script;
pub mod sql;
pub mod strategy;
pub mod sync;
pub mod sync_pipeline;
pub mod version;

pub use apply::*;
pub use diff::*;
pub use pipeline::*;
pub use planner::*;
pub use resolve::*;
pub use script::*;
pub use strategy::{strategy_for, KindStrategy};
pub use sync::*;
pub use sync_pipeline::*;
pub use version::*;
