// the contract with the driving loop: agents that turn, agents that chat, and
// the colony that notices when two of them share a chamber
use std::collections::BTreeMap;

use tracing::debug;

use crate::config::{MergeOptions, RatConfig};
use crate::core::explore::Explorer;
use crate::core::graph::{LocalMap, MapError};
use crate::core::propagate::MergeReport;

/// Anything that can be asked which way to go.
pub trait Rat {
    /// Direction out of a chamber with `exits` exits, relative to the arrival
    /// passage (0 is straight back). Must be below `exits`.
    fn turn(&mut self, exits: u32) -> Result<u32, MapError>;
}

/// Agents that can pool what they know when they meet.
pub trait RatChat: Rat {
    /// Called on the newly arrived agent with a peer already in the chamber.
    /// `tunnel` is the physical offset from this agent's arrival passage to
    /// the peer's. Both sides may change.
    fn chat(&mut self, peer: &mut Self, exits: u32, tunnel: u32) -> Result<MergeReport, MapError>;
}

/// An exploring agent that merges maps with every agent it meets.
#[derive(Debug, Clone)]
pub struct CooperativeRat {
    id: usize,
    explorer: Explorer,
    options: MergeOptions,
}

impl CooperativeRat {
    pub fn new(id: usize, config: &RatConfig) -> Self {
        Self {
            id,
            explorer: Explorer::new(&config.explorer_for(id)),
            options: config.merge.clone(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn map(&self) -> &LocalMap {
        self.explorer.map()
    }
}

impl Rat for CooperativeRat {
    fn turn(&mut self, exits: u32) -> Result<u32, MapError> {
        self.explorer.turn(exits)
    }
}

impl RatChat for CooperativeRat {
    fn chat(&mut self, peer: &mut Self, exits: u32, tunnel: u32) -> Result<MergeReport, MapError> {
        let report = self.explorer.map_mut().merge_with(
            peer.explorer.map_mut(),
            exits as usize,
            tunnel as usize,
            &self.options,
        )?;
        debug!(rat = self.id, peer = peer.id, nodes_added = report.nodes_added, "rats compared maps");
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Arrival {
    agent: usize,
    back: usize,
}

/// A group of agents in one maze plus the registry of who stands where.
///
/// Chambers are identified by the environment's own token, which the agents
/// themselves never see.
#[derive(Debug)]
pub struct Colony<R> {
    rats: Vec<R>,
    position_of: BTreeMap<usize, u64>,
    present: BTreeMap<u64, Vec<Arrival>>,
}

impl<R: RatChat> Colony<R> {
    pub fn new(rats: Vec<R>) -> Self {
        Self {
            rats,
            position_of: BTreeMap::new(),
            present: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rats.is_empty()
    }

    pub fn rat(&self, agent: usize) -> Result<&R, MapError> {
        self.rats.get(agent).ok_or(MapError::UnknownAgent(agent))
    }

    pub fn rats(&self) -> &[R] {
        &self.rats
    }

    /// Agents registered at `node`, in the order they arrived.
    pub fn agents_at(&self, node: u64) -> Vec<usize> {
        self.present
            .get(&node)
            .map(|v| v.iter().map(|a| a.agent).collect())
            .unwrap_or_default()
    }

    /// `agent` has just arrived at `node` by physical passage `back`.
    ///
    /// Every agent already there chats with it, earliest arrival first.
    /// Returns one report per chat.
    pub fn report_position(
        &mut self,
        node: u64,
        back: usize,
        exits: usize,
        agent: usize,
    ) -> Result<Vec<MergeReport>, MapError> {
        if agent >= self.rats.len() {
            return Err(MapError::UnknownAgent(agent));
        }
        if back >= exits {
            return Err(MapError::ProtocolViolation {
                direction: back as u32,
                exits: exits as u32,
            });
        }
        if self.position_of.get(&agent) == Some(&node) {
            return Ok(Vec::new());
        }
        self.invalidate_position(agent);

        let peers = self.present.get(&node).cloned().unwrap_or_default();
        let mut reports = Vec::with_capacity(peers.len());
        for peer in peers {
            let tunnel = (peer.back + exits - back) % exits;
            let (me, them) = self.pair_mut(agent, peer.agent)?;
            reports.push(me.chat(them, exits as u32, tunnel as u32)?);
        }

        self.position_of.insert(agent, node);
        self.present.entry(node).or_default().push(Arrival { agent, back });
        Ok(reports)
    }

    /// `agent` left its chamber and is somewhere in a tunnel.
    pub fn invalidate_position(&mut self, agent: usize) {
        let Some(node) = self.position_of.remove(&agent) else {
            return;
        };
        if let Some(here) = self.present.get_mut(&node) {
            here.retain(|a| a.agent != agent);
            if here.is_empty() {
                self.present.remove(&node);
            }
        }
    }

    /// Ask `agent` for a direction and reject anything out of range.
    pub fn turn(&mut self, agent: usize, exits: u32) -> Result<u32, MapError> {
        let rat = self.rats.get_mut(agent).ok_or(MapError::UnknownAgent(agent))?;
        checked_turn(rat, exits)
    }

    fn pair_mut(&mut self, a: usize, b: usize) -> Result<(&mut R, &mut R), MapError> {
        if a == b {
            return Err(MapError::Inconsistent(format!("agent {a} cannot chat with itself")));
        }
        if a.max(b) >= self.rats.len() {
            return Err(MapError::UnknownAgent(a.max(b)));
        }
        if a < b {
            let (left, right) = self.rats.split_at_mut(b);
            Ok((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.rats.split_at_mut(a);
            Ok((&mut right[0], &mut left[b]))
        }
    }
}

/// Call `rat.turn` and turn an out-of-range answer into a protocol violation.
pub fn checked_turn<R: Rat + ?Sized>(rat: &mut R, exits: u32) -> Result<u32, MapError> {
    let direction = rat.turn(exits)?;
    if direction >= exits {
        return Err(MapError::ProtocolViolation { direction, exits });
    }
    Ok(direction)
}
