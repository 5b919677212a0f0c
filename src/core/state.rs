// where the agent is: cursor fields and the lazily materialised arrival chamber
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::graph::{LocalMap, MapError};
use crate::core::types::{NodeId, Rotation, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerState {
    /// Mid-tunnel toward a chamber the map has no handle for yet.
    AtUnknownNext,
    /// Heading for (or standing in) a chamber the map already holds.
    AtKnownNext,
}

/// Positional state of the agent, addressed through the node it just left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub prev_node: Option<NodeId>,
    pub prev_edge: usize,
    pub next_node: Option<NodeId>,
    /// Slot of `next_node` the agent entered by, when it is known without
    /// looking up `prev_node` (a freshly created chamber is always entered by slot 0).
    pub arrival_edge: Option<usize>,
    pub start: Option<NodeId>,
    /// Offset from the shared start frame to this map's numbering at `start`.
    pub start_rotation: Rotation,
}

impl Cursor {
    pub fn state(&self) -> ExplorerState {
        match self.next_node {
            None => ExplorerState::AtUnknownNext,
            Some(_) => ExplorerState::AtKnownNext,
        }
    }

    /// Leave `from` by `edge`, toward whatever that slot currently records.
    pub fn depart(&mut self, from: NodeId, edge: usize, towards: Slot) {
        self.prev_node = Some(from);
        self.prev_edge = edge;
        self.next_node = towards.node();
        self.arrival_edge = None;
    }

    pub fn forget(&mut self) {
        self.prev_node = None;
        self.prev_edge = 0;
        self.next_node = None;
        self.arrival_edge = None;
    }
}

impl LocalMap {
    /// Slot of the current chamber the agent entered by, if the map can tell.
    pub fn arrival_slot(&self) -> Option<usize> {
        let next = self.cursor.next_node?;
        if let Some(edge) = self.cursor.arrival_edge {
            return Some(edge);
        }
        let prev = self.cursor.prev_node?;
        self.node(next).ok()?.position_of(prev)
    }

    /// Make sure the chamber the agent is arriving at has a handle.
    ///
    /// Returns the handle and whether it was created by this call. If a merge
    /// filled in the departure slot while the agent was in the tunnel, the
    /// agent arrives at that known chamber instead of a duplicate.
    pub fn materialize(&mut self, exits: usize) -> Result<(NodeId, bool), MapError> {
        if let Some(next) = self.cursor.next_node {
            self.check_exits(next, exits)?;
            return Ok((next, false));
        }

        let prev = self.cursor.prev_node;
        if let Some(p) = prev {
            if let Slot::Node(known) = self.slot(p, self.cursor.prev_edge)? {
                self.check_exits(known, exits)?;
                self.cursor.next_node = Some(known);
                return Ok((known, false));
            }
        }

        let id = self.add_node(exits);
        if let Some(p) = prev {
            self.set_slot(id, 0, Slot::Node(p))?;
            if self.slot(p, self.cursor.prev_edge)?.is_unknown() {
                self.set_slot(p, self.cursor.prev_edge, Slot::Node(id))?;
            }
        }
        if self.cursor.start.is_none() {
            self.cursor.start = Some(id);
            self.cursor.start_rotation = 0;
        }
        self.cursor.next_node = Some(id);
        self.cursor.arrival_edge = Some(0);
        debug!(node = id, exits, from = ?prev, "materialized chamber");
        Ok((id, true))
    }

    pub(crate) fn check_exits(&self, node: NodeId, reported: usize) -> Result<(), MapError> {
        let recorded = self.exits(node)?;
        if recorded != reported {
            return Err(MapError::Lost {
                node,
                recorded,
                reported,
            });
        }
        Ok(())
    }
}
