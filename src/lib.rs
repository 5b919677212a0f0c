//! Local maze maps for exploring agents, and the merge that lets two agents
//! standing in the same chamber pool what they know.

pub mod agent;
pub mod config;
pub mod core;
pub mod snapshot;

#[cfg(test)]
mod testing;

pub use crate::agent::{Colony, CooperativeRat, Rat, RatChat, checked_turn};
pub use crate::config::{ConfigError, ExplorerConfig, MergeOptions, RatConfig};
pub use crate::core::explore::Explorer;
pub use crate::core::graph::{LocalMap, MapError, Node};
pub use crate::core::mapping::{Alias, Anchor, Correspondence};
pub use crate::core::propagate::MergeReport;
pub use crate::core::state::{Cursor, ExplorerState};
pub use crate::core::types::{NodeId, Rotation, Slot};
