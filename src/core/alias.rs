// alias resolver: collapses duplicate handles for one physical chamber until no
// duplicates remain, journaling every write so rotation trials can roll back
use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::config::MergeOptions;
use crate::core::delta::Journal;
use crate::core::graph::{LocalMap, MapError};
use crate::core::mapping::Alias;
use crate::core::types::{NodeId, Rotation, Slot, offset, rotate, unrotate};

impl LocalMap {
    /// Collapse every alias (and every duplicate the collapses uncover).
    /// Returns how many handles were retired. On error the map is left as it
    /// was before the call.
    pub fn resolve_aliases(&mut self, aliases: Vec<Alias>, options: &MergeOptions) -> Result<usize, MapError> {
        let before = self.live_count();
        let mut journal = Journal::new();
        let mut work: VecDeque<Alias> = aliases.into();

        if let Err(e) = self.drain_aliases(&mut work, &mut journal, 0, options.trial_depth_limit) {
            self.rollback(&mut journal, 0);
            return Err(e);
        }
        Ok(before - self.live_count())
    }

    fn drain_aliases(
        &mut self,
        work: &mut VecDeque<Alias>,
        journal: &mut Journal,
        depth: usize,
        limit: usize,
    ) -> Result<(), MapError> {
        while let Some(pending) = work.pop_front() {
            let Some(alias) = self.canonical(pending)? else {
                continue;
            };
            match alias.rotation {
                Some(r) => self.unify(alias.alias, alias.base, r, work, journal)?,
                None => self.unify_by_trial(alias.alias, alias.base, journal, depth, limit)?,
            }
        }
        Ok(())
    }

    /// Re-express an alias in terms of surviving handles, or `None` once both
    /// sides already collapsed into the same chamber.
    fn canonical(&self, pending: Alias) -> Result<Option<Alias>, MapError> {
        let (x, rx) = self.resolve(pending.alias)?;
        let (y, ry) = self.resolve(pending.base)?;
        let exits = self.exits(x)?;
        // x slot = alias slot + rx, y slot = alias slot + r + ry
        let rotation = pending.rotation.map(|r| unrotate(rotate(r, ry, exits), rx, exits));
        if x == y {
            if let Some(r) = rotation.filter(|&r| r != 0) {
                warn!(node = x, rotation = r, "ignoring self-alias with a residual rotation");
            }
            return Ok(None);
        }
        Ok(Some(Alias::oriented(x, y, rotation, exits)))
    }

    fn unification_error(&self, alias: NodeId, base: NodeId, reason: &'static str) -> MapError {
        let slots = |id| self.node(id).map(|n| n.slots.clone()).unwrap_or_default();
        MapError::Unification {
            alias,
            base,
            alias_slots: slots(alias),
            base_slots: slots(base),
            reason,
        }
    }

    /// Merge `alias` into `base` with `base_slot = alias_slot + rotation`.
    fn unify(
        &mut self,
        alias: NodeId,
        base: NodeId,
        rotation: Rotation,
        work: &mut VecDeque<Alias>,
        journal: &mut Journal,
    ) -> Result<(), MapError> {
        let alias_slots = self.live(alias)?.slots.clone();
        let exits = self.live(base)?.exits();
        if alias_slots.len() != exits {
            return Err(self.unification_error(alias, base, "exit counts differ"));
        }
        if alias_slots.contains(&Slot::Node(base)) || self.node(base)?.position_of(alias).is_some() {
            return Err(self.unification_error(alias, base, "a chamber cannot neighbour itself"));
        }

        // point every reference to the alias at the base
        for id in 0..self.nodes.len() as NodeId {
            if id == alias || !self.node(id)?.is_live() {
                continue;
            }
            let Some(s) = self.node(id)?.position_of(alias) else {
                continue;
            };
            if self.node(id)?.position_of(base).is_some() {
                return Err(self.unification_error(alias, base, "a neighbour would hold two passages to one chamber"));
            }
            self.set_slot_logged(journal, id, s, Slot::Node(base))?;
        }

        // fold the alias's slots into the base
        for (s, &incoming) in alias_slots.iter().enumerate() {
            let t = rotate(s, rotation, exits);
            let current = self.slot(base, t)?;
            match (current, incoming) {
                (_, Slot::Unknown) => {}
                (c, v) if c == v => {}
                (Slot::Unknown | Slot::DeadEnd, Slot::Node(x)) => {
                    if self.node(base)?.position_of(x).is_some_and(|p| p != t) {
                        return Err(self.unification_error(alias, base, "the base would hold two passages to one chamber"));
                    }
                    self.set_slot_logged(journal, base, t, Slot::Node(x))?;
                    if current == Slot::DeadEnd {
                        self.set_dead_end_logged(journal, x, true);
                    }
                }
                (Slot::Unknown, value) => self.set_slot_logged(journal, base, t, value)?,
                (Slot::Node(x), Slot::DeadEnd) => self.set_dead_end_logged(journal, x, true),
                (Slot::Node(x), Slot::Node(y)) => {
                    // the same passage leads to both: they are one chamber
                    let found = self.alias_rotation(y, x, base)?;
                    work.push_back(Alias::oriented(y, x, found, self.exits(y)?));
                }
                (Slot::DeadEnd, Slot::DeadEnd) => {}
            }
        }

        if self.is_dead_end(alias) {
            self.set_dead_end_logged(journal, alias, false);
            self.set_dead_end_logged(journal, base, true);
        }

        let mut cursor = self.cursor.clone();
        if cursor.prev_node == Some(alias) {
            cursor.prev_node = Some(base);
            cursor.prev_edge = rotate(cursor.prev_edge, rotation, exits);
        }
        if cursor.next_node == Some(alias) {
            cursor.next_node = Some(base);
            cursor.arrival_edge = cursor.arrival_edge.map(|e| rotate(e, rotation, exits));
        }
        if cursor.start == Some(alias) {
            cursor.start = Some(base);
            cursor.start_rotation = rotate(cursor.start_rotation, rotation, exits);
        }
        self.set_cursor_logged(journal, cursor);

        for s in 0..exits {
            self.set_slot_logged(journal, alias, s, Slot::Unknown)?;
        }
        self.set_forward_logged(journal, alias, Some((base, rotation)))?;
        debug!(alias, base, rotation, "collapsed duplicate chamber");
        Ok(())
    }

    /// Rotation taking `alias`'s numbering into `base`'s, for two handles that
    /// both sit behind the same passage of `via`.
    ///
    /// Tries the passage back to `via` first, then any other neighbour the two
    /// have in common. `None` when neither anchors the rotation.
    pub fn alias_rotation(&self, alias: NodeId, base: NodeId, via: NodeId) -> Result<Option<Rotation>, MapError> {
        let a = self.live(alias)?;
        let b = self.live(base)?;
        let exits = b.exits();
        if a.exits() != exits {
            return Err(self.unification_error(alias, base, "one passage leads to chambers with different exit counts"));
        }

        if let (Some(p), Some(q)) = (a.position_of(via), b.position_of(via)) {
            return Ok(Some(offset(p, q, exits)));
        }
        for (p, &slot) in a.slots.iter().enumerate() {
            let Slot::Node(shared) = slot else { continue };
            if shared == via {
                continue;
            }
            if let Some(q) = b.position_of(shared) {
                return Ok(Some(offset(p, q, exits)));
            }
        }
        Ok(None)
    }

    /// Rotations in the order worth trying: most agreeing slots first, then
    /// fewest conflicting ones.
    fn rotation_candidates(&self, alias: NodeId, base: NodeId) -> Result<Vec<Rotation>, MapError> {
        let a = &self.live(alias)?.slots;
        let b = &self.live(base)?.slots;
        let exits = b.len();
        let mut scored: Vec<(usize, usize, Rotation)> = (0..exits)
            .map(|r| {
                let (mut agree, mut clash) = (0, 0);
                for (s, &slot) in a.iter().enumerate() {
                    let other = b[rotate(s, r, exits)];
                    if slot.is_unknown() || other.is_unknown() {
                        continue;
                    }
                    if slot == other {
                        agree += 1;
                    } else {
                        clash += 1;
                    }
                }
                (agree, clash, r)
            })
            .collect();
        scored.sort_by(|x, y| y.0.cmp(&x.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));
        Ok(scored.into_iter().map(|(_, _, r)| r).collect())
    }

    /// No anchor fixes the rotation: try each one, keeping the first whose
    /// whole cascade of follow-up collapses goes through.
    fn unify_by_trial(
        &mut self,
        alias: NodeId,
        base: NodeId,
        journal: &mut Journal,
        depth: usize,
        limit: usize,
    ) -> Result<(), MapError> {
        if self.exits(alias)? != self.exits(base)? {
            return Err(self.unification_error(alias, base, "exit counts differ"));
        }
        if depth >= limit {
            return Err(self.unification_error(alias, base, "rotation trials nested too deeply"));
        }

        for rotation in self.rotation_candidates(alias, base)? {
            let checkpoint = journal.checkpoint();
            let mut local = VecDeque::from([Alias {
                alias,
                base,
                rotation: Some(rotation),
            }]);
            match self.drain_aliases(&mut local, journal, depth + 1, limit) {
                Ok(()) => {
                    debug!(alias, base, rotation, "rotation trial succeeded");
                    return Ok(());
                }
                Err(MapError::Unification { reason, .. }) => {
                    trace!(alias, base, rotation, reason, "rotation trial failed, rolling back");
                    self.rollback(journal, checkpoint);
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.unification_error(alias, base, "no rotation reconciles the two chambers"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_map(picture: &[&[i64]]) -> LocalMap {
        LocalMap::from_slots(
            picture
                .iter()
                .map(|row| row.iter().map(|&v| Slot::try_from(v).unwrap()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn alias(alias: NodeId, base: NodeId, rotation: Option<Rotation>) -> Alias {
        Alias { alias, base, rotation }
    }

    fn references_to(m: &LocalMap, id: NodeId) -> usize {
        m.live_nodes()
            .map(|(_, n)| n.slots.iter().filter(|&&s| s == Slot::Node(id)).count())
            .sum()
    }

    #[test]
    fn collapse_rewrites_references_and_folds_slots() {
        // 1 and 2 are the same three-exit chamber; 3 hangs off the duplicate
        let mut m = mk_map(&[&[-1, 1], &[0, -1, -1], &[-1, 3, -1], &[2]]);
        m.cursor.prev_node = Some(3);
        m.cursor.next_node = Some(2);
        m.mark_dead_end(3);

        let retired = m
            .resolve_aliases(vec![alias(2, 1, Some(0))], &MergeOptions::default())
            .unwrap();

        assert_eq!(retired, 1);
        assert_eq!(m.live_count(), 3);
        assert_eq!(references_to(&m, 2), 0);
        assert_eq!(m.node(1).unwrap().slots, vec![Slot::Node(0), Slot::Node(3), Slot::Unknown]);
        assert_eq!(m.node(3).unwrap().slots, vec![Slot::Node(1)]);
        assert_eq!(m.node(2).unwrap().forward, Some((1, 0)));
        assert_eq!(m.cursor.next_node, Some(1));
        assert_eq!(m.arrival_slot(), Some(1));
        assert!(m.is_dead_end(3));
    }

    #[test]
    fn collapse_applies_rotation_to_slots_and_cursor() {
        // 2 numbers its exits one step behind 1
        let mut m = mk_map(&[&[-1, 1], &[0, -1, -1], &[-1, -1, 3], &[2]]);
        m.cursor.start = Some(2);
        m.cursor.start_rotation = 1;
        m.cursor.prev_node = Some(2);
        m.cursor.prev_edge = 2;

        m.resolve_aliases(vec![alias(2, 1, Some(2))], &MergeOptions::default())
            .unwrap();

        // alias slot 2 lands on base slot (2 + 2) mod 3 = 1
        assert_eq!(m.slot(1, 1).unwrap(), Slot::Node(3));
        assert_eq!(m.cursor.start, Some(1));
        assert_eq!(m.cursor.start_rotation, 0);
        assert_eq!((m.cursor.prev_node, m.cursor.prev_edge), (Some(1), 1));
    }

    #[test]
    fn conflicting_neighbours_cascade_into_further_collapses() {
        // chambers 1 and 3 are one place, and so are their far neighbours 2 and 4
        let mut m = mk_map(&[
            &[1, 3, -1],
            &[0, 2],
            &[1, -1, -1],
            &[0, 4],
            &[3, -1, -1],
        ]);
        // 0 cannot really have two passages to one chamber, so clear one side first
        m.set_slot(0, 1, Slot::Unknown).unwrap();

        let retired = m
            .resolve_aliases(vec![alias(3, 1, Some(0))], &MergeOptions::default())
            .unwrap();

        assert_eq!(retired, 2);
        assert_eq!(m.resolve(4).unwrap().0, 2);
        assert_eq!(references_to(&m, 3) + references_to(&m, 4), 0);
        assert_eq!(m.node(1).unwrap().slots, vec![Slot::Node(0), Slot::Node(2)]);
    }

    #[test]
    fn trial_rolls_back_failed_rotations() {
        // base 0 has three neighbours; only the two-exit one (2) can be the alias's neighbour
        let mut m = mk_map(&[
            &[1, 2, 3],
            &[0, -1, -1],
            &[0, -1],
            &[0, -1, -1],
            &[5, -1, -1],
            &[4, -1],
        ]);

        let retired = m
            .resolve_aliases(vec![alias(4, 0, None)], &MergeOptions::default())
            .unwrap();

        assert_eq!(retired, 2);
        assert_eq!(m.node(4).unwrap().forward, Some((0, 1)));
        assert_eq!(m.resolve(5).unwrap(), (2, 0));
        assert_eq!(m.node(0).unwrap().slots, vec![Slot::Node(1), Slot::Node(2), Slot::Node(3)]);
        assert_eq!(m.node(1).unwrap().slots, vec![Slot::Node(0), Slot::Unknown, Slot::Unknown]);
    }

    #[test]
    fn irreconcilable_alias_errors_and_leaves_map_untouched() {
        // every neighbour of the base has three exits, the alias's has two
        let mut m = mk_map(&[
            &[1, 2, 3],
            &[0, -1, -1],
            &[0, -1, -1],
            &[0, -1, -1],
            &[5, -1, -1],
            &[4, -1],
        ]);
        let before = m.clone();

        let err = m
            .resolve_aliases(vec![alias(4, 0, None)], &MergeOptions::default())
            .unwrap_err();

        match err {
            MapError::Unification { alias, base, alias_slots, base_slots, .. } => {
                assert_eq!((alias, base), (4, 0));
                assert_eq!(alias_slots.len(), 3);
                assert_eq!(base_slots.len(), 3);
            }
            other => panic!("expected Unification, got {:?}", other),
        }
        assert_eq!(m, before);
    }

    #[test]
    fn folding_a_second_passage_to_one_neighbour_is_rejected() {
        // at rotation 0 the alias's passage to 1 would land on the base's slot 1,
        // but the base already reaches 1 by slot 0
        let mut m = mk_map(&[&[1, -1, -1], &[0, -1], &[-1, 1, -1]]);
        let before = m.clone();

        let err = m
            .resolve_aliases(vec![alias(2, 0, Some(0))], &MergeOptions::default())
            .unwrap_err();

        assert!(matches!(err, MapError::Unification { alias: 2, base: 0, .. }));
        assert_eq!(m, before);
    }

    #[test]
    fn trial_skips_rotations_that_would_double_a_passage() {
        let mut m = mk_map(&[&[1, -1, -1], &[0, -1], &[-1, 1, -1]]);

        m.resolve_aliases(vec![alias(2, 0, None)], &MergeOptions::default())
            .unwrap();

        assert_eq!(m.node(0).unwrap().slots, vec![Slot::Node(1), Slot::Unknown, Slot::Unknown]);
        assert_eq!(m.node(2).unwrap().forward, Some((0, 2)));
    }

    #[test]
    fn self_adjacent_alias_is_rejected() {
        let mut m = mk_map(&[&[1, -1], &[0, -1]]);
        let err = m
            .resolve_aliases(vec![alias(1, 0, Some(0))], &MergeOptions::default())
            .unwrap_err();
        assert!(matches!(err, MapError::Unification { .. }));
    }

    #[test]
    fn alias_rotation_prefers_the_shared_passage() {
        let m = mk_map(&[&[1, 2, -1], &[-1, 0, 3], &[0, -1, -1], &[1, -1]]);
        // 1 reaches 0 by slot 1, 2 by slot 0
        assert_eq!(m.alias_rotation(1, 2, 0).unwrap(), Some(2));
    }
}
