// correspondence finder: pairs this map's chambers with another map's, with rotation
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::graph::{LocalMap, MapError};
use crate::core::types::{NodeId, Rotation, Slot, negate, offset, rotate, unrotate};

/// A pair of chambers known to be the same physical place, with the rotation
/// from this map's numbering into the other's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub this: NodeId,
    pub other: NodeId,
    pub rotation: Rotation,
}

/// Two handles in one map for the same physical chamber.
///
/// `base_slot = alias_slot + rotation` when the rotation is known; `None`
/// leaves it to the resolver to find one by trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alias {
    pub alias: NodeId,
    pub base: NodeId,
    pub rotation: Option<Rotation>,
}

impl Alias {
    /// Orient a discovered duplicate so the older (smaller) handle survives.
    ///
    /// `rotation` maps `first`'s numbering to `second`'s.
    pub fn oriented(first: NodeId, second: NodeId, rotation: Option<Rotation>, exits: usize) -> Self {
        if first > second {
            Alias {
                alias: first,
                base: second,
                rotation,
            }
        } else {
            Alias {
                alias: second,
                base: first,
                rotation: rotation.map(|r| negate(r, exits)),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correspondence {
    /// other handle -> (this handle, rotation this -> other)
    pub maps_to: BTreeMap<NodeId, (NodeId, Rotation)>,
    pub aliases: Vec<Alias>,
}

impl Correspondence {
    pub fn get(&self, other: NodeId) -> Option<(NodeId, Rotation)> {
        self.maps_to.get(&other).copied()
    }

    pub fn is_mapped(&self, other: NodeId) -> bool {
        self.maps_to.contains_key(&other)
    }

    pub fn len(&self) -> usize {
        self.maps_to.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps_to.is_empty()
    }

    /// other handles in ascending order, for reports
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId, Rotation)> + '_ {
        self.maps_to.iter().map(|(&o, &(t, r))| (o, t, r))
    }
}

impl LocalMap {
    /// The anchor pairs two maps can agree on: their shared start, and the
    /// chamber both agents are standing in when `tunnel` is given.
    ///
    /// `tunnel` is the physical offset from this agent's arrival passage to the
    /// other agent's. Anchors whose handles or arrival slots are not known
    /// are left out.
    pub fn anchors(&self, other: &LocalMap, tunnel: Option<usize>) -> Result<Vec<Anchor>, MapError> {
        let mut anchors = Vec::with_capacity(2);

        if let (Some(a), Some(b)) = (self.cursor.start, other.cursor.start) {
            let exits = self.exits(a)?;
            anchors.push(Anchor {
                this: a,
                other: b,
                rotation: offset(self.cursor.start_rotation, other.cursor.start_rotation, exits),
            });
        }

        if let Some(tunnel) = tunnel {
            let here = (self.cursor.next_node, other.cursor.next_node);
            let arrivals = (self.arrival_slot(), other.arrival_slot());
            if let ((Some(a), Some(b)), (Some(alpha), Some(beta))) = (here, arrivals) {
                let exits = self.exits(a)?;
                // this slot s is physical s - alpha + back, the other's slot is that + beta - back'
                let rotation = unrotate(offset(alpha, beta, exits), tunnel, exits);
                anchors.push(Anchor {
                    this: a,
                    other: b,
                    rotation,
                });
            }
        }
        Ok(anchors)
    }

    /// Walk both maps outward from the anchors in lockstep, pairing chambers
    /// whose connecting passage is recorded from both ends on both sides.
    ///
    /// A chamber of the other map reached a second time at a different chamber
    /// of this map means this map holds a duplicate; it is reported as an alias
    /// and not descended into again.
    pub fn correspond(&self, other: &LocalMap, anchors: &[Anchor]) -> Result<Correspondence, MapError> {
        let mut corr = Correspondence::default();
        let mut stack: Vec<Anchor> = anchors.iter().rev().copied().collect();

        while let Some(Anchor { this: a, other: b, rotation }) = stack.pop() {
            let an = self.live(a)?;
            let bn = other.live(b)?;
            let exits = an.exits();

            if let Some((seen, seen_rotation)) = corr.get(b) {
                if seen == a {
                    if seen_rotation != rotation {
                        warn!(this = a, other = b, seen_rotation, rotation, "conflicting rotation for an already paired chamber");
                    }
                    continue;
                }
                // b's numbering reads a as slot + rotation and seen as slot + seen_rotation
                let alias = Alias::oriented(a, seen, Some(unrotate(rotation, seen_rotation, exits)), exits);
                debug!(alias = alias.alias, base = alias.base, "duplicate chamber discovered");
                if !corr.aliases.contains(&alias) {
                    corr.aliases.push(alias);
                }
                continue;
            }

            if exits != bn.exits() {
                return Err(MapError::Mismatch {
                    this: a,
                    other: b,
                    this_exits: exits,
                    other_exits: bn.exits(),
                });
            }
            corr.maps_to.insert(b, (a, rotation));

            for i in 0..exits {
                let (Slot::Node(a2), Slot::Node(b2)) = (an.slots[i], bn.slots[rotate(i, rotation, exits)]) else {
                    continue;
                };
                // rotation at the neighbour comes only from back-links both maps have confirmed
                let (Some(p), Some(q)) = (self.live(a2)?.position_of(a), other.live(b2)?.position_of(b)) else {
                    continue;
                };
                stack.push(Anchor {
                    this: a2,
                    other: b2,
                    rotation: offset(p, q, self.exits(a2)?),
                });
            }
        }

        Ok(corr)
    }
}
