use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::config::MergeOptions;
use crate::core::graph::{LocalMap, MapError};
use crate::core::mapping::{Alias, Correspondence};
use crate::core::types::{NodeId, Rotation, Slot, negate, offset, rotate, unrotate};

/// What a merge changed, summed over both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub nodes_added: usize,
    pub slots_filled: usize,
    pub dead_ends_added: usize,
    pub aliases_collapsed: usize,
    /// Passages filled in on one side whose return slot on the far chamber
    /// could not be located. Left unknown for a later merge to settle.
    pub back_links_unresolved: usize,
    pub passes: usize,
    /// The maps were already identical and nothing was attempted.
    pub skipped: bool,
}

impl MergeReport {
    fn absorb(&mut self, other: MergeReport) {
        self.nodes_added += other.nodes_added;
        self.slots_filled += other.slots_filled;
        self.dead_ends_added += other.dead_ends_added;
        self.aliases_collapsed += other.aliases_collapsed;
        self.back_links_unresolved += other.back_links_unresolved;
        self.passes += other.passes;
    }

    /// Whether any knowledge was added (collapses aside).
    pub fn grew(&self) -> bool {
        self.nodes_added + self.slots_filled + self.dead_ends_added > 0
    }
}

/// Output of one fill pass: the counters plus duplicates it ran into.
#[derive(Debug, Default)]
struct Fill {
    report: MergeReport,
    aliases: Vec<Alias>,
}

impl Fill {
    fn alias(&mut self, alias: Alias) {
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
    }
}

impl LocalMap {
    /// Merge with the map of an agent standing in the same chamber, using the
    /// default options.
    pub fn merge(&mut self, other: &mut LocalMap, exits: usize, tunnel: usize) -> Result<MergeReport, MapError> {
        self.merge_with(other, exits, tunnel, &MergeOptions::default())
    }

    /// Exchange everything two co-located agents know.
    ///
    /// `exits` is the chamber's exit count and `tunnel` the physical offset
    /// from this agent's arrival passage to the other's.
    ///
    /// Steps:
    /// 1) Skip if both maps are identical and both agents stand in a known chamber
    /// 2) Materialise the meeting chamber on both sides
    /// 3) Fill this map from the other, then the other from this one
    /// 4) Verify nothing was lost and nothing contradicts, unless the options opt out
    /// 5) Commit both, or neither if any step failed
    pub fn merge_with(
        &mut self,
        other: &mut LocalMap,
        exits: usize,
        tunnel: usize,
        options: &MergeOptions,
    ) -> Result<MergeReport, MapError> {
        if self.is_settled_copy_of(other) {
            trace!("maps already identical, nothing to merge");
            return Ok(MergeReport {
                skipped: true,
                ..MergeReport::default()
            });
        }

        let mut this = self.clone();
        let mut that = other.clone();
        this.materialize(exits)?;
        that.materialize(exits)?;

        let mut report = this.merge_from(&that, Some(tunnel), options)?;
        report.absorb(that.merge_from(&this, Some(negate(tunnel, exits)), options)?);

        if options.verify {
            verify(self, other, &this, &that, tunnel)?;
        }

        debug!(
            nodes_added = report.nodes_added,
            slots_filled = report.slots_filled,
            aliases_collapsed = report.aliases_collapsed,
            passes = report.passes,
            "merge complete"
        );
        *self = this;
        *other = that;
        Ok(report)
    }

    /// Copy into this map whatever `other` knows that it does not, until a
    /// pass changes nothing.
    ///
    /// Every pass recomputes the correspondence from scratch: once a
    /// duplicate has been collapsed, pairings found beyond it are stale.
    pub fn merge_from(
        &mut self,
        other: &LocalMap,
        tunnel: Option<usize>,
        options: &MergeOptions,
    ) -> Result<MergeReport, MapError> {
        let mut report = MergeReport::default();
        loop {
            report.passes += 1;
            // each pass either collapses a handle or adds knowledge; this only trips on corrupt maps
            if report.passes > 4 * (self.nodes.len() + other.nodes.len()) + 8 {
                return Err(MapError::Inconsistent(format!(
                    "merge did not settle after {} passes",
                    report.passes - 1
                )));
            }

            let anchors = self.anchors(other, tunnel)?;
            let corr = self.correspond(other, &anchors)?;
            if !corr.aliases.is_empty() {
                let collapsed = self.resolve_aliases(corr.aliases.clone(), options)?;
                report.aliases_collapsed += collapsed;
                if collapsed > 0 {
                    continue;
                }
            }

            let fill = self.fill_from(other, &corr)?;
            let grew = fill.report.grew();
            debug!(pass = report.passes, mapped = corr.len(), grew, aliases = fill.aliases.len(), "merge pass");
            report.absorb(fill.report);
            if !fill.aliases.is_empty() {
                let collapsed = self.resolve_aliases(fill.aliases, options)?;
                report.aliases_collapsed += collapsed;
                if collapsed > 0 {
                    continue;
                }
            }
            if !grew {
                break;
            }
        }
        Ok(report)
    }

    /// Walk the paired region and copy across every slot `other` has resolved
    /// and this map has not, creating chambers for neighbours it has never seen.
    fn fill_from(&mut self, other: &LocalMap, corr: &Correspondence) -> Result<Fill, MapError> {
        let mut fill = Fill::default();
        let mut maps: BTreeMap<NodeId, (NodeId, Rotation)> = corr.maps_to.clone();
        let mut work: VecDeque<NodeId> = maps.keys().copied().collect();

        while let Some(b) = work.pop_front() {
            let Some(&(a, rotation)) = maps.get(&b) else {
                continue;
            };
            if other.is_dead_end(b) && self.mark_dead_end(a) {
                fill.report.dead_ends_added += 1;
            }

            let theirs = other.live(b)?.slots.clone();
            let exits = self.exits(a)?;
            for i in 0..exits {
                let j = rotate(i, rotation, exits);
                match (self.slot(a, i)?, theirs[j]) {
                    (_, Slot::Unknown) => {}
                    (Slot::Unknown, Slot::DeadEnd) => {
                        self.set_slot(a, i, Slot::DeadEnd)?;
                        fill.report.slots_filled += 1;
                    }
                    (Slot::Node(a2), Slot::DeadEnd) => {
                        if self.mark_dead_end(a2) {
                            fill.report.dead_ends_added += 1;
                        }
                    }
                    (Slot::DeadEnd, _) => {}
                    (Slot::Unknown, Slot::Node(b2)) => match maps.get(&b2).copied() {
                        Some((a2, rotation2)) => {
                            if a2 == a || self.node(a)?.position_of(a2).is_some() {
                                warn!(node = a, slot = i, neighbour = a2, "pairing would duplicate a passage, skipping");
                                continue;
                            }
                            self.set_slot(a, i, Slot::Node(a2))?;
                            fill.report.slots_filled += 1;
                            trace!(node = a, slot = i, neighbour = a2, "filled passage to known chamber");
                            self.fill_back_link(other, a, a2, rotation2, b, b2, &mut fill)?;
                        }
                        None => {
                            let c = self.add_node(other.exits(b2)?);
                            self.set_slot(a, i, Slot::Node(c))?;
                            fill.report.nodes_added += 1;
                            fill.report.slots_filled += 1;
                            // the copy keeps the other map's numbering
                            match other.node(b2)?.position_of(b) {
                                Some(q) => {
                                    self.set_slot(c, q, Slot::Node(a))?;
                                    fill.report.slots_filled += 1;
                                }
                                None => fill.report.back_links_unresolved += 1,
                            }
                            trace!(node = a, slot = i, copy = c, of = b2, "copied unseen chamber");
                            maps.insert(b2, (c, 0));
                            work.push_back(b2);
                        }
                    },
                    (Slot::Node(a2), Slot::Node(b2)) => match maps.get(&b2).copied() {
                        Some((mapped, _)) if mapped == a2 => {}
                        Some((mapped, mapped_rotation)) => {
                            // one passage, two handles on this side
                            let exits2 = self.exits(a2)?;
                            let rotation = self
                                .pair_rotation(other, a, a2, b, b2)?
                                .map(|r| unrotate(r, mapped_rotation, exits2));
                            fill.alias(Alias::oriented(a2, mapped, rotation, exits2));
                        }
                        None => {
                            if let Some(r) = self.pair_rotation(other, a, a2, b, b2)? {
                                maps.insert(b2, (a2, r));
                                work.push_back(b2);
                            } else if let Some(r) = self.shared_rotation(other, a2, b2, &maps)? {
                                maps.insert(b2, (a2, r));
                                work.push_back(b2);
                            }
                        }
                    },
                }
            }
        }
        Ok(fill)
    }

    /// Rotation from `a2`'s numbering to `b2`'s, read off the passages both
    /// record back to `a` and `b`.
    fn pair_rotation(
        &self,
        other: &LocalMap,
        a: NodeId,
        a2: NodeId,
        b: NodeId,
        b2: NodeId,
    ) -> Result<Option<Rotation>, MapError> {
        let mine = self.live(a2)?;
        let theirs = other.live(b2)?;
        if mine.exits() != theirs.exits() {
            return Err(MapError::Mismatch {
                this: a2,
                other: b2,
                this_exits: mine.exits(),
                other_exits: theirs.exits(),
            });
        }
        Ok(match (mine.position_of(a), theirs.position_of(b)) {
            (Some(p), Some(q)) => Some(offset(p, q, mine.exits())),
            _ => None,
        })
    }

    /// Rotation from `a2` to `b2` anchored on any other neighbour they have
    /// in common under the current pairing.
    fn shared_rotation(
        &self,
        other: &LocalMap,
        a2: NodeId,
        b2: NodeId,
        maps: &BTreeMap<NodeId, (NodeId, Rotation)>,
    ) -> Result<Option<Rotation>, MapError> {
        let mine = self.live(a2)?;
        for (q, &slot) in other.live(b2)?.slots.iter().enumerate() {
            let Slot::Node(n) = slot else { continue };
            let Some(&(m, _)) = maps.get(&n) else { continue };
            if let Some(p) = mine.position_of(m) {
                return Ok(Some(offset(p, q, mine.exits())));
            }
        }
        Ok(None)
    }

    /// `a`'s passage now leads to `a2`; record the way back on `a2` if the
    /// other map knows which of `b2`'s slots leads to `b`.
    ///
    /// Leaves the slot unknown (and counts it) when it cannot tell: that gap
    /// may never be closable from local information alone.
    #[allow(clippy::too_many_arguments)]
    fn fill_back_link(
        &mut self,
        other: &LocalMap,
        a: NodeId,
        a2: NodeId,
        rotation2: Rotation,
        b: NodeId,
        b2: NodeId,
        fill: &mut Fill,
    ) -> Result<(), MapError> {
        if self.node(a2)?.position_of(a).is_some() {
            return Ok(());
        }
        let Some(q) = other.node(b2)?.position_of(b) else {
            fill.report.back_links_unresolved += 1;
            trace!(node = a2, towards = a, "back-link unresolved");
            return Ok(());
        };
        let exits = self.exits(a2)?;
        let p = unrotate(q, rotation2, exits);
        match self.slot(a2, p)? {
            Slot::Unknown => {
                self.set_slot(a2, p, Slot::Node(a))?;
                fill.report.slots_filled += 1;
            }
            Slot::Node(n) if n == a => {}
            Slot::Node(n) => {
                // a2's passage p leads to both n and a
                let rotation = self.alias_rotation(n, a, a2)?;
                fill.alias(Alias::oriented(n, a, rotation, self.exits(n)?));
            }
            Slot::DeadEnd => {
                warn!(node = a2, slot = p, towards = a, "back-link lands on a passage recorded as dead");
            }
        }
        Ok(())
    }
}

/// Post-merge check: neither side forgot anything and the two now agree.
fn verify(
    this_before: &LocalMap,
    that_before: &LocalMap,
    this: &LocalMap,
    that: &LocalMap,
    tunnel: usize,
) -> Result<(), MapError> {
    if !this.preserves(this_before)? || !that.preserves(that_before)? {
        return Err(MapError::Inconsistent("merge dropped previously known structure".to_string()));
    }
    let anchors = this.anchors(that, Some(tunnel))?;
    let corr = this.correspond(that, &anchors)?;
    if !corr.aliases.is_empty() {
        return Err(MapError::Inconsistent(format!(
            "{} duplicate chambers survived the merge",
            corr.aliases.len()
        )));
    }
    let contradictions = this.contradictions(that, &corr)?;
    if let Some(first) = contradictions.first() {
        return Err(MapError::Inconsistent(format!(
            "{} contradicting slots, first at node {} slot {}",
            contradictions.len(),
            first.this,
            first.this_slot
        )));
    }
    Ok(())
}

/*
What these tests cover:

    1. Merging a settled map with a copy of itself changes nothing

    2. Two agents meeting mid-tunnel both materialise the meeting chamber
       and end up with identical maps

    3. A map holding one chamber under two handles loses exactly one handle
       and keeps no reference to the retired one

    4. Knowledge flows both ways: each side gains the branch only the other
       had explored, the results agree and nothing known before is lost

    5. A failed merge leaves both maps as they were

    6. A passage filled in between two known chambers gets its way back
       recorded on the far side, or is counted when the other map cannot
       say which slot that is
*/
