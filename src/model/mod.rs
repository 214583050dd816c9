pub mod common;
pub mod diff;
pub mod graph;
pub mod merge;
pub mod plan;
pub mod script;
pub mod sync;
pub mod version;

pub use common::*;
pub use diff::*;
pub use graph::*;
pub use merge::*;
pub use plan::*;
pub use script::*;
pub use sync::*;
pub use version::*;
