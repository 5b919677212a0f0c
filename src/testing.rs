// test-only maze and walking loops that drive agents through it
use crate::agent::{Colony, Rat, RatChat, checked_turn};
use crate::core::graph::{LocalMap, MapError};
use crate::core::propagate::MergeReport;
use crate::core::types::Slot;

/// Chambers `0..len`, each listing the chambers its exits lead to. Index
/// `len` is the way out. Agents start in chamber 0 as if they had come in
/// by its last exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Maze {
    edges: Vec<Vec<usize>>,
}

impl Maze {
    /// With `fill_back_steps`, every passage missing its return direction
    /// gets one appended on the far side.
    pub fn new(mut edges: Vec<Vec<usize>>, fill_back_steps: bool) -> Result<Self, String> {
        let end = edges.len();
        if end == 0 {
            return Err("a maze needs at least one chamber".to_string());
        }
        let mut has_end = false;
        for from in 0..end {
            let mut i = 0;
            while i < edges[from].len() {
                let to = edges[from][i];
                if edges[from].iter().filter(|&&t| t == to).count() > 1 {
                    return Err(format!("chamber {from} has two passages to {to}"));
                }
                if to == end {
                    has_end = true;
                } else if to > end {
                    return Err(format!("chamber {from} leads to {to}, past the exit"));
                } else if to == from {
                    return Err(format!("chamber {from} leads to itself"));
                } else if !edges[to].contains(&from) {
                    if !fill_back_steps {
                        return Err(format!("no way back from {to} to {from}"));
                    }
                    edges[to].push(from);
                }
                i += 1;
            }
        }
        if !has_end {
            return Err("no passage leads out".to_string());
        }
        Ok(Self { edges })
    }

    pub fn edges(&self) -> &[Vec<usize>] {
        &self.edges
    }

    pub fn end(&self) -> usize {
        self.edges.len()
    }

    fn start_back(&self) -> usize {
        self.edges[0].len() - 1
    }

    /// Take the turn `direction` out of `pos`, entered by `back`. Returns the
    /// new chamber and the exit of it that leads back.
    fn step(&self, pos: usize, back: usize, direction: u32) -> (usize, usize) {
        let exits = self.edges[pos].len();
        let next = self.edges[pos][(direction as usize + back) % exits];
        let next_back = if next == self.end() {
            0
        } else {
            self.edges[next].iter().position(|&t| t == pos).unwrap_or(0)
        };
        (next, next_back)
    }

    /// Walk one agent until it gets out. Returns the ticks used, or
    /// `max + 1` if it was still inside after `max`.
    pub fn solve<R: Rat>(&self, rat: &mut R, max: usize) -> Result<usize, MapError> {
        let (mut pos, mut back) = (0, self.start_back());
        let mut ticks = 0;
        while pos != self.end() && ticks <= max {
            ticks += 1;
            let direction = checked_turn(rat, self.edges[pos].len() as u32)?;
            (pos, back) = self.step(pos, back, direction);
        }
        Ok(ticks)
    }

    /// Walk a colony until any agent gets out. Agent `i` moves every
    /// `speeds[i]` ticks and reports its position on the tick after moving.
    pub fn solve_colony<R: RatChat>(
        &self,
        colony: &mut Colony<R>,
        speeds: &[usize],
        max: usize,
    ) -> Result<usize, MapError> {
        let n = colony.len();
        let mut pos = vec![0; n];
        let mut back = vec![self.start_back(); n];
        let mut ticks = 0;
        while !pos.contains(&self.end()) && ticks <= max {
            ticks += 1;
            for i in 0..n {
                if (ticks - 1) % speeds[i] == 0 {
                    colony.report_position(pos[i] as u64, back[i], self.edges[pos[i]].len(), i)?;
                }
            }
            for i in 0..n {
                if ticks % speeds[i] != 0 {
                    continue;
                }
                let direction = colony.turn(i, self.edges[pos[i]].len() as u32)?;
                colony.invalidate_position(i);
                (pos[i], back[i]) = self.step(pos[i], back[i], direction);
            }
        }
        Ok(ticks)
    }

    /// The maze as a fully explored map would record it, in the maze's own
    /// exit numbering. Passages out are left unknown.
    pub fn truth(&self) -> Result<LocalMap, MapError> {
        let end = self.end();
        let picture = self
            .edges
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&to| if to == end { Slot::Unknown } else { Slot::Node(to as u32) })
                    .collect()
            })
            .collect();
        LocalMap::from_slots(picture)
    }
}

/// Always takes the first exit round from the one it came in by.
#[derive(Debug, Default)]
pub struct AlwaysLeft;

impl Rat for AlwaysLeft {
    fn turn(&mut self, exits: u32) -> Result<u32, MapError> {
        Ok(if exits > 1 { 1 } else { 0 })
    }
}

impl RatChat for AlwaysLeft {
    fn chat(&mut self, _peer: &mut Self, _exits: u32, _tunnel: u32) -> Result<MergeReport, MapError> {
        Ok(MergeReport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CooperativeRat;
    use crate::config::{ExplorerConfig, MergeOptions, RatConfig};
    use crate::core::explore::Explorer;
    use crate::core::mapping::Anchor;

    const MAX_TICKS: usize = 10;

    fn mk_tree() -> Maze {
        // 0 branches to 1 and 2; 1 has two blind children, 2 leads out
        Maze::new(vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![], vec![], vec![]], true).unwrap()
    }

    fn mk_looped() -> Maze {
        // 2 sits on three loops: 0-2-3, 1-2-3 and 2-4-5
        Maze::new(
            vec![vec![3, 2], vec![2, 3], vec![5, 0, 1, 3, 4], vec![0, 2, 1, 6], vec![5, 2], vec![2, 4]],
            false,
        )
        .unwrap()
    }

    fn mk_colony(seed: u64) -> Colony<CooperativeRat> {
        let config = RatConfig {
            explorer: ExplorerConfig { seed: Some(seed) },
            merge: MergeOptions {
                verify: true,
                ..MergeOptions::default()
            },
        };
        Colony::new((0..3).map(|id| CooperativeRat::new(id, &config)).collect())
    }

    struct Walker(Explorer);

    impl Rat for Walker {
        fn turn(&mut self, exits: u32) -> Result<u32, MapError> {
            self.0.turn(exits)
        }
    }

    #[test]
    fn back_steps_are_filled_in() {
        let maze = Maze::new(vec![vec![1, 3], vec![2], vec![3, 0]], true).unwrap();
        assert_eq!(maze.edges(), &[vec![1, 3, 2], vec![2, 0], vec![3, 0, 1]]);
    }

    #[test]
    fn invalid_mazes_are_rejected() {
        assert!(Maze::new(vec![], true).is_err());
        assert!(Maze::new(vec![vec![0, 1]], true).is_err());
        assert!(Maze::new(vec![vec![1, 1, 2], vec![]], true).is_err());
        assert!(Maze::new(vec![vec![1], vec![0]], true).is_err());
        assert!(Maze::new(vec![vec![1, 2], vec![]], false).is_err());
    }

    #[test]
    fn always_left_solves_a_loop_free_maze() {
        let maze = Maze::new(vec![vec![1, 3], vec![2], vec![3, 0]], true).unwrap();
        let ticks = maze.solve(&mut AlwaysLeft, MAX_TICKS).unwrap();
        assert_eq!(ticks, 3);
    }

    #[test]
    fn always_left_circles_forever_in_a_loop() {
        let maze = Maze::new(vec![vec![1, 3], vec![2], vec![0, 3]], true).unwrap();
        let ticks = maze.solve(&mut AlwaysLeft, MAX_TICKS).unwrap();
        assert!(ticks > MAX_TICKS);
    }

    #[test]
    fn always_left_pair_solves_a_loop_free_maze() {
        let maze = Maze::new(vec![vec![1, 3], vec![2], vec![3, 0]], true).unwrap();
        let mut colony = Colony::new(vec![AlwaysLeft, AlwaysLeft]);
        let ticks = maze.solve_colony(&mut colony, &[2, 3], MAX_TICKS).unwrap();
        assert!(ticks > 0 && ticks <= MAX_TICKS);
    }

    #[test]
    fn explorer_map_matches_the_tree_it_walked() {
        let maze = mk_tree();
        let truth = maze.truth().unwrap();
        for seed in 0..5 {
            let mut walker = Walker(Explorer::with_seed(seed));
            let ticks = maze.solve(&mut walker, 500).unwrap();
            assert!(ticks <= 500, "seed {seed} did not get out");

            // the explorer's slot 0 at the start is the maze's last exit there
            let anchor = Anchor {
                this: 0,
                other: 0,
                rotation: maze.start_back(),
            };
            let map = walker.0.map();
            assert!(map.consistent_with(&truth, &[anchor]).unwrap(), "seed {seed}");
            assert!(map.live_count() <= truth.live_count());
        }
    }

    #[test]
    fn cooperating_colony_gets_out_of_a_tree() {
        let maze = mk_tree();
        for seed in [1, 17, 99] {
            let mut colony = mk_colony(seed);

            let ticks = maze.solve_colony(&mut colony, &[1, 2, 3], 1000).unwrap();

            assert!(ticks <= 1000, "seed {seed} did not get out");
            let truth = maze.truth().unwrap();
            for rat in colony.rats() {
                let anchor = Anchor {
                    this: 0,
                    other: 0,
                    rotation: maze.start_back(),
                };
                assert!(rat.map().consistent_with(&truth, &[anchor]).unwrap(), "seed {seed}");
            }
        }
    }

    #[test]
    fn cooperating_colony_collapses_duplicates_in_a_looped_maze() {
        let maze = mk_looped();
        let mut collapsed = 0;
        for seed in 0..8 {
            let mut colony = mk_colony(seed);

            let ticks = maze.solve_colony(&mut colony, &[1, 2, 3], 1000).unwrap();

            assert!(ticks <= 1000, "seed {seed} did not get out");
            for rat in colony.rats() {
                let map = rat.map();
                map.validate().unwrap();
                // retired handles are forwarded, never referenced
                for (_, node) in map.live_nodes() {
                    for slot in &node.slots {
                        if let Slot::Node(target) = *slot {
                            assert!(map.node(target).unwrap().is_live(), "seed {seed}");
                        }
                    }
                }
                collapsed += map.nodes.iter().filter(|n| !n.is_live()).count();
            }
        }
        assert!(collapsed > 0);
    }
}
