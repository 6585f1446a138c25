use std::{fmt::Debug, str::FromStr};

use ndarray::Array2;

use crate::{
    error::{SimResult, SimulationError},
    neighbourhood::Neighbourhood,
    pedestrian::PedestrianId,
    position::Position,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellState {
    #[default]
    Free,
    Occupied,
    Obstacle,
}

impl CellState {
    const fn bit(self) -> u8 {
        match self {
            CellState::Free => 1,
            CellState::Occupied => 2,
            CellState::Obstacle => 4,
        }
    }
}

impl FromStr for CellState {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(CellState::Free),
            "occupied" => Ok(CellState::Occupied),
            "obstacle" => Ok(CellState::Obstacle),
            _ => Err(SimulationError::unsupported("cell state", s)),
        }
    }
}

/// Set of cell states, used by heatmap generators as their blocked states.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellStates(u8);

impl CellStates {
    pub const EMPTY: CellStates = CellStates(0);
    pub const OCCUPIED: CellStates = CellStates(CellState::Occupied.bit());
    pub const OBSTACLE: CellStates = CellStates(CellState::Obstacle.bit());

    pub const fn with(self, state: CellState) -> Self {
        CellStates(self.0 | state.bit())
    }

    pub const fn contains(self, state: CellState) -> bool {
        self.0 & state.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<CellState> for CellStates {
    fn from_iter<I: IntoIterator<Item = CellState>>(iter: I) -> Self {
        iter.into_iter().fold(CellStates::EMPTY, CellStates::with)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    position: Position,
    state: CellState,
    occupant: Option<PedestrianId>,
}

impl Cell {
    fn new(position: Position) -> Self {
        Cell {
            position,
            state: CellState::Free,
            occupant: None,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn occupant(&self) -> Option<PedestrianId> {
        self.occupant
    }

    pub fn is_free(&self) -> bool {
        self.state == CellState::Free
    }

    pub fn is_occupied(&self) -> bool {
        self.state == CellState::Occupied
    }

    pub fn is_obstacle(&self) -> bool {
        self.state == CellState::Obstacle
    }

    fn set_pedestrian(&mut self, pedestrian: PedestrianId) -> SimResult<()> {
        match (self.state, self.occupant) {
            (CellState::Obstacle, _) => Err(SimulationError::CellBlocked {
                position: self.position,
            }),
            (CellState::Occupied, Some(occupant)) => Err(SimulationError::CellOccupied {
                position: self.position,
                occupant,
            }),
            _ => {
                self.state = CellState::Occupied;
                self.occupant = Some(pedestrian);
                Ok(())
            }
        }
    }

    fn remove_pedestrian(&mut self) -> SimResult<PedestrianId> {
        match (self.state, self.occupant.take()) {
            (CellState::Occupied, Some(occupant)) => {
                self.state = CellState::Free;
                Ok(occupant)
            }
            _ => Err(SimulationError::CellNotOccupied {
                position: self.position,
            }),
        }
    }
}

/// Dense grid of cells.
///
/// The grid never owns pedestrians; an occupied cell only records the id of its
/// occupant.
pub struct Grid {
    cells: Array2<Cell>,
    width: usize,
    height: usize,
    neighbourhood: Neighbourhood,
}

impl Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = self.cells.rows().into_iter().map(|row| {
            row.iter()
                .map(|cell| match cell.state {
                    CellState::Free => '.',
                    CellState::Occupied => 'P',
                    CellState::Obstacle => '#',
                })
                .collect::<String>()
        });
        f.debug_list().entries(rows).finish()
    }
}

impl Grid {
    pub fn new(width: usize, height: usize, neighbourhood: Neighbourhood) -> Self {
        let cells = Array2::from_shape_fn((height, width), |(y, x)| {
            Cell::new(Position::new(x as i32, y as i32))
        });

        Grid {
            cells,
            width,
            height,
            neighbourhood,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn neighbourhood(&self) -> Neighbourhood {
        self.neighbourhood
    }

    pub fn is_in_bounds(&self, position: Position) -> bool {
        position.is_inside(self.width, self.height)
    }

    pub fn check_bounds(&self, position: Position) -> SimResult<()> {
        if self.is_in_bounds(position) {
            Ok(())
        } else {
            Err(SimulationError::InvalidCoordinates {
                x: position.x,
                y: position.y,
            })
        }
    }

    pub fn cell(&self, position: Position) -> SimResult<&Cell> {
        self.cells
            .get(position)
            .ok_or(SimulationError::InvalidCoordinates {
                x: position.x,
                y: position.y,
            })
    }

    fn cell_mut(&mut self, position: Position) -> SimResult<&mut Cell> {
        self.cells
            .get_mut(position)
            .ok_or(SimulationError::InvalidCoordinates {
                x: position.x,
                y: position.y,
            })
    }

    pub fn state(&self, position: Position) -> SimResult<CellState> {
        self.cell(position).map(Cell::state)
    }

    /// Row-major iterator over all cells.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn count(&self, state: CellState) -> usize {
        self.cells.iter().filter(|c| c.state == state).count()
    }

    pub fn set_obstacle(&mut self, position: Position) -> SimResult<()> {
        let cell = self.cell_mut(position)?;
        if let Some(occupant) = cell.occupant {
            return Err(SimulationError::CellOccupied { position, occupant });
        }
        cell.state = CellState::Obstacle;
        Ok(())
    }

    /// Place a pedestrian on a free cell.
    pub fn occupy(&mut self, position: Position, pedestrian: PedestrianId) -> SimResult<()> {
        self.cell_mut(position)?.set_pedestrian(pedestrian)
    }

    /// Free an occupied cell, returning its former occupant.
    pub fn vacate(&mut self, position: Position) -> SimResult<PedestrianId> {
        self.cell_mut(position)?.remove_pedestrian()
    }

    /// Direct neighbours according to the grid's neighbourhood strategy.
    pub fn neighbours(&self, position: Position) -> impl Iterator<Item = &Cell> {
        self.neighbours_within(position, 1, 1)
    }

    /// Neighbours reaching `rx` columns and `ry` rows away from `position`.
    pub fn neighbours_within(
        &self,
        position: Position,
        rx: i32,
        ry: i32,
    ) -> impl Iterator<Item = &Cell> {
        self.neighbourhood
            .neighbours(position, rx, ry, self.width, self.height)
            .map(move |p| &self.cells[p])
    }
}
