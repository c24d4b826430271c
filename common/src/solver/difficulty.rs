use serde::{Deserialize, Serialize};

/// The deduction kind that resolved a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// A number whose hidden neighbours are all safe or all mines.
    Single,
    /// The difference of two nested constraints.
    Subset,
    /// Exhaustive enumeration of one connected component.
    Enumerated { component_size: usize },
    /// Enumeration combined with the number of mines left on the board.
    MineCount,
}

impl Tier {
    /// Score of one cell resolved at this tier, for a solver that enumerates
    /// components of up to `enumeration_ceiling` cells.
    ///
    /// `MineCount` always outweighs the largest component the ceiling lets
    /// through. It is 48 at ceilings up to 31.
    pub fn weight(self, enumeration_ceiling: usize) -> u64 {
        match self {
            Tier::Single => 1,
            Tier::Subset => 4,
            Tier::Enumerated { component_size } => 16 + component_size as u64,
            Tier::MineCount => 17 + enumeration_ceiling.max(31) as u64,
        }
    }
}

/// How much non-trivial deduction a field needed.
///
/// `score` is the sum of [`Tier::weight`] over every cell the solver resolved
/// itself. Cells opened by a zero cascade are free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difficulty {
    pub score: u64,
    pub single: usize,
    pub subset: usize,
    pub enumerated: usize,
    pub mine_count: usize,
    pub largest_component: usize,
    pub sweeps: usize,
}

impl Difficulty {
    pub(crate) fn record(&mut self, tier: Tier, enumeration_ceiling: usize) {
        self.score += tier.weight(enumeration_ceiling);
        match tier {
            Tier::Single => self.single += 1,
            Tier::Subset => self.subset += 1,
            Tier::Enumerated { component_size } => {
                self.enumerated += 1;
                self.largest_component = self.largest_component.max(component_size);
            }
            Tier::MineCount => self.mine_count += 1,
        }
    }

    /// Cells resolved by the solver, excluding cascades.
    pub fn resolved(&self) -> usize {
        self.single + self.subset + self.enumerated + self.mine_count
    }

    /// The most expensive tier the solver had to reach.
    pub fn hardest(&self) -> Option<Tier> {
        if self.mine_count > 0 {
            Some(Tier::MineCount)
        } else if self.enumerated > 0 {
            Some(Tier::Enumerated {
                component_size: self.largest_component,
            })
        } else if self.subset > 0 {
            Some(Tier::Subset)
        } else if self.single > 0 {
            Some(Tier::Single)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_grow_with_tier() {
        assert!(Tier::Single.weight(20) < Tier::Subset.weight(20));
        assert!(Tier::Subset.weight(20) < Tier::Enumerated { component_size: 1 }.weight(20));
        assert!(
            Tier::Enumerated { component_size: 3 }.weight(20)
                < Tier::Enumerated { component_size: 9 }.weight(20)
        );
        assert!(Tier::Enumerated { component_size: 20 }.weight(20) < Tier::MineCount.weight(20));
        assert_eq!(Tier::MineCount.weight(20), 48);
    }

    #[test]
    fn test_mine_count_outweighs_any_enumerable_component() {
        for ceiling in [0, 20, 31, 32, 64, 500] {
            let largest = Tier::Enumerated {
                component_size: ceiling,
            };
            assert!(largest.weight(ceiling) < Tier::MineCount.weight(ceiling));
        }
        assert_eq!(Tier::MineCount.weight(64), 81);
        assert!(Tier::Enumerated { component_size: 33 }.weight(64) < Tier::MineCount.weight(64));
    }

    #[test]
    fn test_record_tallies() {
        let mut difficulty = Difficulty::default();
        difficulty.record(Tier::Single, 20);
        difficulty.record(Tier::Single, 20);
        difficulty.record(Tier::Enumerated { component_size: 5 }, 20);
        difficulty.record(Tier::Enumerated { component_size: 3 }, 20);

        assert_eq!(difficulty.score, 1 + 1 + 21 + 19);
        assert_eq!(difficulty.resolved(), 4);
        assert_eq!(difficulty.largest_component, 5);
        assert_eq!(
            difficulty.hardest(),
            Some(Tier::Enumerated { component_size: 5 })
        );
    }
}
