// handles, slots and the cyclic slot arithmetic everything else leans on
use serde::{Deserialize, Serialize};

/// Dense handle into a [`LocalMap`](crate::core::graph::LocalMap) arena.
pub type NodeId = u32;

/// Cyclic offset between two slot numberings of the same chamber.
///
/// A rotation `r` from frame A to frame B means `slot_b = (slot_a + r) mod exits`.
pub type Rotation = usize;

/// One exit of a modelled chamber.
///
/// Serialised as a plain integer, the same picture format the walking code
/// prints: `-1` unknown, `-2` dead end, anything else a neighbour handle.
///
/// The explorer never writes `DeadEnd`; it records dead chambers in
/// `LocalMap::dead_ends`. The marker only enters a map through
/// `LocalMap::from_slots` or a snapshot, and a merge copies it from there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Slot {
    #[default]
    Unknown,
    DeadEnd,
    Node(NodeId),
}

impl Slot {
    pub fn node(self) -> Option<NodeId> {
        match self {
            Slot::Node(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Slot::Unknown)
    }
}

impl From<Slot> for i64 {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Unknown => -1,
            Slot::DeadEnd => -2,
            Slot::Node(id) => i64::from(id),
        }
    }
}

impl TryFrom<i64> for Slot {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Slot::Unknown),
            -2 => Ok(Slot::DeadEnd),
            v => NodeId::try_from(v)
                .map(Slot::Node)
                .map_err(|_| format!("slot value {v} is neither a handle nor a marker")),
        }
    }
}

/// `(slot + rotation) mod exits`
pub fn rotate(slot: usize, rotation: Rotation, exits: usize) -> usize {
    if exits == 0 {
        return 0;
    }
    (slot + rotation % exits) % exits
}

/// Inverse of [`rotate`].
pub fn unrotate(slot: usize, rotation: Rotation, exits: usize) -> usize {
    if exits == 0 {
        return 0;
    }
    (slot + exits - rotation % exits) % exits
}

/// The rotation `r` such that `rotate(from, r, exits) == to`.
pub fn offset(from: usize, to: usize, exits: usize) -> Rotation {
    unrotate(to, from, exits)
}

/// `-rotation mod exits`
pub fn negate(rotation: Rotation, exits: usize) -> Rotation {
    unrotate(0, rotation, exits)
}
