// classification of slots and whole maps: liveness, dead ends, identity,
// mutual consistency and knowledge preservation
use crate::core::graph::{LocalMap, MapError};
use crate::core::mapping::{Anchor, Correspondence};
use crate::core::types::{NodeId, Slot, rotate};

/// A resolved slot on each side of a correspondence that disagree about
/// which chamber the passage leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contradiction {
    pub this: NodeId,
    pub this_slot: usize,
    pub found: Slot,
    pub other: NodeId,
    pub other_slot: usize,
    pub expected: Slot,
}

impl LocalMap {
    /// Dead when it is a recorded dead end or leads into a dead-end chamber.
    pub fn is_dead_slot(&self, slot: Slot) -> bool {
        match slot {
            Slot::Unknown => false,
            Slot::DeadEnd => true,
            Slot::Node(id) => self.is_dead_end(id),
        }
    }

    /// Slots of `node` still worth walking into.
    pub fn live_slots(&self, node: NodeId) -> Result<Vec<usize>, MapError> {
        Ok(self
            .node(node)?
            .slots
            .iter()
            .enumerate()
            .filter(|&(_, &s)| !self.is_dead_slot(s))
            .map(|(i, _)| i)
            .collect())
    }

    /// Returns false if it was already marked.
    pub fn mark_dead_end(&mut self, node: NodeId) -> bool {
        self.dead_ends.insert(node)
    }

    pub fn same_structure(&self, other: &LocalMap) -> bool {
        self.nodes == other.nodes && self.dead_ends == other.dead_ends
    }

    /// Nothing for a merge to do: identical knowledge and both agents already
    /// standing in materialised chambers.
    ///
    /// Deliberately stricter than [`consistent_with`](Self::consistent_with):
    /// unknown slots must match exactly, so maps that merely agree still merge.
    pub fn is_settled_copy_of(&self, other: &LocalMap) -> bool {
        self.cursor.next_node.is_some() && other.cursor.next_node.is_some() && self.same_structure(other)
    }

    /// Resolved slots that disagree across a correspondence. Unknown on either
    /// side matches anything, and a dead-end marker does not contradict a
    /// neighbour handle.
    pub fn contradictions(
        &self,
        other: &LocalMap,
        corr: &Correspondence,
    ) -> Result<Vec<Contradiction>, MapError> {
        let mut found = Vec::new();
        for (b, a, rotation) in corr.iter() {
            let an = self.live(a)?;
            let bn = other.live(b)?;
            let exits = an.exits();
            for i in 0..exits {
                let j = rotate(i, rotation, exits);
                let (Slot::Node(a2), Slot::Node(b2)) = (an.slots[i], bn.slots[j]) else {
                    continue;
                };
                if let Some((expected, _)) = corr.get(b2) {
                    if expected != a2 {
                        found.push(Contradiction {
                            this: a,
                            this_slot: i,
                            found: Slot::Node(a2),
                            other: b,
                            other_slot: j,
                            expected: Slot::Node(expected),
                        });
                    }
                }
            }
        }
        Ok(found)
    }

    /// Equality with wildcards up to rotation: the maps pair up from the
    /// anchors without duplicates and no resolved slot contradicts another.
    pub fn consistent_with(&self, other: &LocalMap, anchors: &[Anchor]) -> Result<bool, MapError> {
        let corr = match self.correspond(other, anchors) {
            Ok(corr) => corr,
            Err(MapError::Mismatch { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(corr.aliases.is_empty() && self.contradictions(other, &corr)?.is_empty())
    }

    /// Everything `before` knew is still known here: no resolved slot went
    /// back to unknown or changed target (modulo alias forwarding), and no
    /// dead end was dropped.
    pub fn preserves(&self, before: &LocalMap) -> Result<bool, MapError> {
        for (id, old) in before.live_nodes() {
            let (now_id, rotation) = self.resolve(id)?;
            let now = self.live(now_id)?;
            let exits = old.exits();
            if now.exits() != exits {
                return Ok(false);
            }
            for (s, &slot) in old.slots.iter().enumerate() {
                let current = now.slots[rotate(s, rotation, exits)];
                let kept = match slot {
                    Slot::Unknown => true,
                    Slot::DeadEnd => self.is_dead_slot(current),
                    Slot::Node(target) => current == Slot::Node(self.resolve(target)?.0),
                };
                if !kept {
                    return Ok(false);
                }
            }
        }
        for &id in &before.dead_ends {
            let (now_id, _) = self.resolve(id)?;
            if !self.is_dead_end(now_id) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
