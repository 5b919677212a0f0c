// the per-agent partial maze model: an arena of chambers addressed by dense handles
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::state::Cursor;
use crate::core::types::{NodeId, Rotation, Slot, rotate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// A revisited chamber reports a different exit count than the one recorded.
    #[error("lost at node {node}: recorded {recorded} exits, environment reports {reported}")]
    Lost {
        node: NodeId,
        recorded: usize,
        reported: usize,
    },

    /// The correspondence finder paired two chambers that disagree on exit count.
    #[error("node {this} ({this_exits} exits) cannot correspond to other node {other} ({other_exits} exits)")]
    Mismatch {
        this: NodeId,
        other: NodeId,
        this_exits: usize,
        other_exits: usize,
    },

    #[error("cannot unify node {alias} {alias_slots:?} into node {base} {base_slots:?}: {reason}")]
    Unification {
        alias: NodeId,
        base: NodeId,
        alias_slots: Vec<Slot>,
        base_slots: Vec<Slot>,
        reason: &'static str,
    },

    #[error("direction {direction} is out of range for a chamber with {exits} exits")]
    ProtocolViolation { direction: u32, exits: u32 },

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("node {node} has no slot {slot}")]
    SlotOutOfRange { node: NodeId, slot: usize },

    #[error("agent {0} is not part of this colony")]
    UnknownAgent(usize),

    /// Post-merge verification failed; only raised when verification is enabled.
    #[error("merge left the maps inconsistent: {0}")]
    Inconsistent(String),
}

/// One modelled chamber.
///
/// The slot count is fixed at creation. Slot 0 points back the way the agent
/// came in when the node was first materialised; every other direction is
/// only meaningful relative to that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub slots: Vec<Slot>,
    /// Set once the node has been collapsed into another one by alias
    /// resolution: `(survivor, rotation)` with `survivor_slot = slot + rotation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<(NodeId, Rotation)>,
}

impl Node {
    pub fn new(exits: usize) -> Self {
        Self {
            slots: vec![Slot::Unknown; exits],
            forward: None,
        }
    }

    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            forward: None,
        }
    }

    pub fn exits(&self) -> usize {
        self.slots.len()
    }

    pub fn is_live(&self) -> bool {
        self.forward.is_none()
    }

    /// First slot leading to `target`. Mazes never hold two passages between
    /// the same pair of chambers, so the first is the only one.
    pub fn position_of(&self, target: NodeId) -> Option<usize> {
        self.slots.iter().position(|&s| s == Slot::Node(target))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMap {
    pub nodes: Vec<Node>,
    /// Chambers known to have at most one exit worth taking.
    #[serde(default)]
    pub dead_ends: BTreeSet<NodeId>,
    #[serde(default)]
    pub cursor: Cursor,
}

impl LocalMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from an adjacency picture, one row of slots per node.
    pub fn from_slots(picture: Vec<Vec<Slot>>) -> Result<Self, MapError> {
        let map = Self {
            nodes: picture.into_iter().map(Node::from_slots).collect(),
            ..Self::default()
        };
        map.validate()?;
        Ok(map)
    }

    pub fn add_node(&mut self, exits: usize) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node::new(exits));
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, MapError> {
        self.nodes
            .get(id as usize)
            .ok_or(MapError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, MapError> {
        self.nodes
            .get_mut(id as usize)
            .ok_or(MapError::NodeNotFound(id))
    }

    /// Like [`node`](Self::node) but refuses handles that were collapsed away.
    pub fn live(&self, id: NodeId) -> Result<&Node, MapError> {
        match self.node(id)? {
            n if n.is_live() => Ok(n),
            _ => Err(MapError::NodeNotFound(id)),
        }
    }

    pub fn exits(&self, id: NodeId) -> Result<usize, MapError> {
        Ok(self.node(id)?.exits())
    }

    pub fn slot(&self, id: NodeId, slot: usize) -> Result<Slot, MapError> {
        self.node(id)?
            .slots
            .get(slot)
            .copied()
            .ok_or(MapError::SlotOutOfRange { node: id, slot })
    }

    pub fn set_slot(&mut self, id: NodeId, slot: usize, value: Slot) -> Result<Slot, MapError> {
        let cell = self
            .node_mut(id)?
            .slots
            .get_mut(slot)
            .ok_or(MapError::SlotOutOfRange { node: id, slot })?;
        Ok(std::mem::replace(cell, value))
    }

    /// Follow forwarding references to the surviving handle, accumulating the
    /// rotation from `id`'s slot numbering into the survivor's.
    pub fn resolve(&self, id: NodeId) -> Result<(NodeId, Rotation), MapError> {
        let mut current = id;
        let mut rotation = 0;
        // forwards only ever point at older survivors, the bound is a guard against corrupt input
        for _ in 0..=self.nodes.len() {
            let node = self.node(current)?;
            match node.forward {
                None => return Ok((current, rotation)),
                Some((target, r)) => {
                    let exits = self.exits(target)?;
                    rotation = rotate(rotation, r, exits);
                    current = target;
                }
            }
        }
        Err(MapError::Inconsistent(format!("forwarding cycle through node {id}")))
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_live())
            .map(|(i, n)| (i as NodeId, n))
    }

    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_live()).count()
    }

    pub fn is_dead_end(&self, id: NodeId) -> bool {
        self.dead_ends.contains(&id)
    }

    /// Every neighbour reference, dead end, forward and cursor field must name
    /// an existing chamber; neighbour references must name a live one.
    pub fn validate(&self) -> Result<(), MapError> {
        for (id, node) in self.nodes.iter().enumerate() {
            for &slot in &node.slots {
                if let Slot::Node(target) = slot {
                    self.live(target)?;
                }
            }
            if let Some((target, _)) = node.forward {
                self.node(target)?;
                self.resolve(id as NodeId)?;
            }
        }
        for &id in &self.dead_ends {
            self.node(id)?;
        }
        let c = &self.cursor;
        for id in [c.prev_node, c.next_node, c.start].into_iter().flatten() {
            self.live(id)?;
        }
        if let Some(prev) = c.prev_node {
            self.slot(prev, c.prev_edge)?;
        }
        Ok(())
    }
}
