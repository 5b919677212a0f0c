// single-agent exploration: decide a direction each turn and grow the map from it
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{trace, warn};

use crate::config::ExplorerConfig;
use crate::core::graph::{LocalMap, MapError};
use crate::core::state::ExplorerState;
use crate::core::types::{NodeId, offset};

/// Walks an unknown maze one chamber at a time, recording what it sees.
#[derive(Debug, Clone)]
pub struct Explorer {
    map: LocalMap,
    rng: StdRng,
}

impl Explorer {
    pub fn new(config: &ExplorerConfig) -> Self {
        Self::from_map(LocalMap::new(), config)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            map: LocalMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Resume exploring with a map recorded earlier, e.g. from a snapshot.
    pub fn from_map(map: LocalMap, config: &ExplorerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { map, rng }
    }

    pub fn map(&self) -> &LocalMap {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut LocalMap {
        &mut self.map
    }

    pub fn state(&self) -> ExplorerState {
        self.map.cursor.state()
    }

    /// Pick a direction out of the current chamber, which has `exits` exits.
    ///
    /// The answer is relative to the passage the agent arrived by: 0 goes
    /// back, 1 is the next exit round, and so on.
    pub fn turn(&mut self, exits: u32) -> Result<u32, MapError> {
        if exits == 0 {
            return Err(MapError::ProtocolViolation { direction: 0, exits });
        }
        let n = exits as usize;
        let (here, created) = self.map.materialize(n)?;
        let direction = if created {
            self.leave_new(here, n)?
        } else {
            self.leave_known(here, n)?
        };
        Ok(direction as u32)
    }

    fn leave_new(&mut self, here: NodeId, exits: usize) -> Result<usize, MapError> {
        if exits == 1 {
            self.map.mark_dead_end(here);
            let back = self.map.slot(here, 0)?;
            self.map.cursor.depart(here, 0, back);
            trace!(node = here, "dead end, turning back");
            return Ok(0);
        }
        // never straight back out of a fresh chamber, except at the very start
        let lowest = if self.map.cursor.prev_node.is_some() { 1 } else { 0 };
        let choice = self.rng.random_range(lowest..exits);
        let towards = self.map.slot(here, choice)?;
        self.map.cursor.depart(here, choice, towards);
        Ok(choice)
    }

    fn leave_known(&mut self, here: NodeId, exits: usize) -> Result<usize, MapError> {
        let Some(back) = self.map.arrival_slot() else {
            warn!(node = here, "cannot tell which passage we came in by, forgetting position");
            self.map.cursor.forget();
            return Ok(self.rng.random_range(0..exits));
        };

        let live = self.map.live_slots(here)?;
        if live.len() <= 1 {
            self.map.mark_dead_end(here);
        }
        let choice = match live.as_slice() {
            [] => back,
            [only] => *only,
            _ => live[self.rng.random_range(0..live.len())],
        };
        let towards = self.map.slot(here, choice)?;
        self.map.cursor.depart(here, choice, towards);
        Ok(offset(back, choice, exits))
    }
}
