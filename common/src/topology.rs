//! Adjacency rules for the three supported field shapes.
//!
//! A topology is a pure function from a coordinate (and the board bounds) to
//! the coordinates of its neighbours. Nothing here holds state, so the same
//! rule is shared by the field, the generator and the solver.

use std::fmt;
use std::iter;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A cell position. Rows grow downwards and columns grow to the right.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// The adjacency rule of a field.
///
/// Hexagonal fields use offset rows: every odd row is drawn half a cell to the
/// right of the even rows, so the two row parities have mirrored diagonals.
///
/// ```text
///  / \ / \ / \
/// |0,0|0,1|0,2|
///  \ / \ / \ / \
///   |1,0|1,1|1,2|
///  / \ / \ / \ /
/// |2,0|2,1|2,2|
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    VonNeumann,
    Hexagonal,
    Moore,
}

const VON_NEUMANN: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];

const MOORE: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

const HEX_EVEN_ROW: [(isize, isize); 6] = [(-1, -1), (-1, 0), (0, -1), (0, 1), (1, -1), (1, 0)];

const HEX_ODD_ROW: [(isize, isize); 6] = [(-1, 0), (-1, 1), (0, -1), (0, 1), (1, 0), (1, 1)];

impl Topology {
    pub const ALL: [Topology; 3] = [Topology::VonNeumann, Topology::Hexagonal, Topology::Moore];

    /// Number of neighbours an interior cell has.
    pub const fn max_neighbors(self) -> usize {
        match self {
            Topology::VonNeumann => 4,
            Topology::Hexagonal => 6,
            Topology::Moore => 8,
        }
    }

    fn offsets(self, row: usize) -> &'static [(isize, isize)] {
        match self {
            Topology::VonNeumann => &VON_NEUMANN,
            Topology::Moore => &MOORE,
            Topology::Hexagonal if row % 2 == 0 => &HEX_EVEN_ROW,
            Topology::Hexagonal => &HEX_ODD_ROW,
        }
    }

    /// The in-bounds neighbours of `coord` on a `width` x `height` board.
    ///
    /// Never yields `coord` itself and never yields the same neighbour twice.
    pub fn neighbors(self, coord: Coord, width: usize, height: usize) -> Neighbors {
        Neighbors {
            origin: coord,
            width,
            height,
            offsets: self.offsets(coord.row),
            next: 0,
        }
    }

    /// `coord` followed by its neighbours.
    pub fn closed_neighborhood(
        self,
        coord: Coord,
        width: usize,
        height: usize,
    ) -> impl Iterator<Item = Coord> {
        iter::once(coord).chain(self.neighbors(coord, width, height))
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::VonNeumann => "neumann",
            Topology::Hexagonal => "hex",
            Topology::Moore => "moore",
        };
        f.write_str(name)
    }
}

impl FromStr for Topology {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "neumann" | "vonneumann" | "von-neumann" => Ok(Topology::VonNeumann),
            "hex" | "hexagonal" => Ok(Topology::Hexagonal),
            "moore" => Ok(Topology::Moore),
            other => Err(Error::InvalidParameters(format!(
                "unknown topology {other:?}, expected moore, hex or neumann"
            ))),
        }
    }
}

/// Iterator over the in-bounds neighbours of a cell.
#[derive(Debug, Clone)]
pub struct Neighbors {
    origin: Coord,
    width: usize,
    height: usize,
    offsets: &'static [(isize, isize)],
    next: usize,
}

impl Iterator for Neighbors {
    type Item = Coord;

    fn next(&mut self) -> Option<Coord> {
        while let Some(&(d_row, d_col)) = self.offsets.get(self.next) {
            self.next += 1;
            let row = self.origin.row.checked_add_signed(d_row);
            let col = self.origin.col.checked_add_signed(d_col);
            if let (Some(row), Some(col)) = (row, col) {
                if row < self.height && col < self.width {
                    return Some(Coord { row, col });
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.offsets.len() - self.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn collect(topology: Topology, coord: Coord, width: usize, height: usize) -> Vec<Coord> {
        topology.neighbors(coord, width, height).collect()
    }

    #[test]
    fn test_interior_neighbor_counts() {
        for topology in Topology::ALL {
            // Both row parities matter for hexagonal fields.
            for coord in [Coord::new(2, 2), Coord::new(3, 2)] {
                let neighbors = collect(topology, coord, 6, 6);
                assert_eq!(neighbors.len(), topology.max_neighbors(), "{topology} at {coord}");
            }
        }
    }

    #[test]
    fn test_corner_and_edge_counts() {
        // Top-left corner.
        assert_eq!(collect(Topology::Moore, Coord::new(0, 0), 5, 5).len(), 3);
        assert_eq!(collect(Topology::VonNeumann, Coord::new(0, 0), 5, 5).len(), 2);
        assert_eq!(collect(Topology::Hexagonal, Coord::new(0, 0), 5, 5).len(), 2);

        // Top edge.
        assert_eq!(collect(Topology::Moore, Coord::new(0, 2), 5, 5).len(), 5);
        assert_eq!(collect(Topology::VonNeumann, Coord::new(0, 2), 5, 5).len(), 3);
        assert_eq!(collect(Topology::Hexagonal, Coord::new(0, 2), 5, 5).len(), 4);

        // Odd-row right edge of a hex field loses three neighbours.
        assert_eq!(collect(Topology::Hexagonal, Coord::new(1, 4), 5, 5).len(), 3);
    }

    #[test]
    fn test_no_duplicates_or_self() {
        for topology in Topology::ALL {
            for row in 0..5 {
                for col in 0..4 {
                    let coord = Coord::new(row, col);
                    let neighbors = collect(topology, coord, 4, 5);
                    let unique: HashSet<_> = neighbors.iter().copied().collect();
                    assert_eq!(unique.len(), neighbors.len());
                    assert!(!unique.contains(&coord));
                }
            }
        }
    }

    #[test]
    fn test_adjacency_is_symmetric() {
        for topology in Topology::ALL {
            for row in 0..6 {
                for col in 0..6 {
                    let coord = Coord::new(row, col);
                    for neighbor in topology.neighbors(coord, 6, 6) {
                        assert!(
                            topology.neighbors(neighbor, 6, 6).any(|back| back == coord),
                            "{topology}: {neighbor} does not see {coord}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_hexagonal_offset_rows() {
        // Even rows lean left, odd rows lean right.
        let even = collect(Topology::Hexagonal, Coord::new(2, 2), 6, 6);
        assert!(even.contains(&Coord::new(1, 1)));
        assert!(!even.contains(&Coord::new(1, 3)));

        let odd = collect(Topology::Hexagonal, Coord::new(3, 2), 6, 6);
        assert!(odd.contains(&Coord::new(2, 3)));
        assert!(!odd.contains(&Coord::new(2, 1)));
    }

    #[test]
    fn test_topology_parsing() {
        assert_eq!("Moore".parse::<Topology>().unwrap(), Topology::Moore);
        assert_eq!("hex".parse::<Topology>().unwrap(), Topology::Hexagonal);
        assert_eq!("von-neumann".parse::<Topology>().unwrap(), Topology::VonNeumann);
        assert!("triangle".parse::<Topology>().is_err());
    }
}
