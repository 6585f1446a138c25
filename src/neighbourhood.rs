use std::str::FromStr;

use crate::{error::SimulationError, position::Position};

/// Strategy enumerating the neighbours of a cell.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Neighbourhood {
    /// Every cell of the surrounding rectangle (8-connected for radius 1).
    #[default]
    Moore,
    /// Cells along the two axes only (4-connected for radius 1).
    VonNeumann,
}

impl FromStr for Neighbourhood {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "moore" => Ok(Neighbourhood::Moore),
            "neumann" | "von_neumann" | "vonneumann" => Ok(Neighbourhood::VonNeumann),
            _ => Err(SimulationError::unsupported("neighbourhood type", s)),
        }
    }
}

impl Neighbourhood {
    /// Offsets around the origin reaching `rx` columns and `ry` rows out.
    /// The origin itself is never included.
    pub fn offsets(self, rx: i32, ry: i32) -> impl Iterator<Item = (i32, i32)> {
        // The radii of the unused shape are zero, which leaves it empty.
        let ((sx, sy), (ax, ay)) = match self {
            Neighbourhood::Moore => ((rx, ry), (0, 0)),
            Neighbourhood::VonNeumann => ((0, 0), (rx, ry)),
        };

        let square = (-sx..=sx)
            .flat_map(move |i| (-sy..=sy).map(move |j| (i, j)))
            .filter(|&offset| offset != (0, 0));
        let axes = (-ax..=ax)
            .filter(|&i| i != 0)
            .map(|i| (i, 0))
            .chain((-ay..=ay).filter(|&j| j != 0).map(|j| (0, j)));
        square.chain(axes)
    }

    /// Neighbours of `center` that lie inside a `width` x `height` area.
    pub fn neighbours(
        self,
        center: Position,
        rx: i32,
        ry: i32,
        width: usize,
        height: usize,
    ) -> impl Iterator<Item = Position> {
        self.offsets(rx, ry)
            .map(move |(dx, dy)| center.add(dx, dy))
            .filter(move |p| p.is_inside(width, height))
    }
}
