pub mod alias;
pub mod classify;
pub mod delta;
pub mod explore;
pub mod graph;
pub mod mapping;
pub mod propagate;
pub mod state;
pub mod types;
