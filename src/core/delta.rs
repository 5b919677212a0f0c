// undo journal: every mutation the alias resolver makes is recorded so a failed
// rotation trial can be rolled back to its checkpoint
use crate::core::graph::{LocalMap, MapError};
use crate::core::state::Cursor;
use crate::core::types::{NodeId, Rotation, Slot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Slot { node: NodeId, slot: usize, old: Slot },
    DeadEnd { node: NodeId, was_member: bool },
    Forward { node: NodeId, old: Option<(NodeId, Rotation)> },
    Cursor(Cursor),
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<Delta>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position to roll back to.
    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LocalMap {
    pub fn set_slot_logged(
        &mut self,
        journal: &mut Journal,
        node: NodeId,
        slot: usize,
        value: Slot,
    ) -> Result<(), MapError> {
        let old = self.set_slot(node, slot, value)?;
        if old != value {
            journal.entries.push(Delta::Slot { node, slot, old });
        }
        Ok(())
    }

    pub fn set_dead_end_logged(&mut self, journal: &mut Journal, node: NodeId, member: bool) {
        let was_member = if member {
            !self.dead_ends.insert(node)
        } else {
            self.dead_ends.remove(&node)
        };
        if was_member != member {
            journal.entries.push(Delta::DeadEnd { node, was_member });
        }
    }

    pub fn set_forward_logged(
        &mut self,
        journal: &mut Journal,
        node: NodeId,
        forward: Option<(NodeId, Rotation)>,
    ) -> Result<(), MapError> {
        let old = std::mem::replace(&mut self.node_mut(node)?.forward, forward);
        journal.entries.push(Delta::Forward { node, old });
        Ok(())
    }

    pub fn set_cursor_logged(&mut self, journal: &mut Journal, cursor: Cursor) {
        if self.cursor != cursor {
            let old = std::mem::replace(&mut self.cursor, cursor);
            journal.entries.push(Delta::Cursor(old));
        }
    }

    /// Undo everything recorded after `checkpoint`, newest first.
    pub fn rollback(&mut self, journal: &mut Journal, checkpoint: usize) {
        while journal.entries.len() > checkpoint {
            let Some(delta) = journal.entries.pop() else {
                break;
            };
            match delta {
                Delta::Slot { node, slot, old } => {
                    // the entry was only recorded after a successful write, so the slot exists
                    let _ = self.set_slot(node, slot, old);
                }
                Delta::DeadEnd { node, was_member } => {
                    if was_member {
                        self.dead_ends.insert(node);
                    } else {
                        self.dead_ends.remove(&node);
                    }
                }
                Delta::Forward { node, old } => {
                    if let Ok(n) = self.node_mut(node) {
                        n.forward = old;
                    }
                }
                Delta::Cursor(old) => self.cursor = old,
            }
        }
    }
}
