mod fast_marching;
mod queue;
mod repulsion;
mod shortest_path;

use std::{fmt::Debug, str::FromStr};

use ndarray::Array2;

pub use self::{
    fast_marching::FastMarchingGenerator, queue::PathfindingQueue, repulsion::RepulsionGenerator,
    shortest_path::ShortestPathGenerator,
};
use crate::{
    distance::Distance,
    error::{SimResult, SimulationError},
    grid::{CellStates, Grid},
    position::Position,
};

/// Dense scalar field over the grid, e.g. the travel cost to some set of cells.
#[derive(Clone, PartialEq)]
pub struct Heatmap {
    values: Array2<f64>,
}

impl Debug for Heatmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.values.rows()).finish()
    }
}

impl Heatmap {
    /// Create a heatmap where every cell is unreachable.
    pub fn new(width: usize, height: usize) -> Self {
        Heatmap::filled(width, height, f64::INFINITY)
    }

    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Heatmap {
            values: Array2::from_elem((height, width), value),
        }
    }

    pub fn for_grid(grid: &Grid) -> Self {
        Heatmap::new(grid.width(), grid.height())
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    pub fn get(&self, position: Position) -> SimResult<f64> {
        self.values
            .get(position)
            .copied()
            .ok_or(SimulationError::InvalidCoordinates {
                x: position.x,
                y: position.y,
            })
    }

    pub fn set(&mut self, position: Position, value: f64) -> SimResult<()> {
        let cell = self
            .values
            .get_mut(position)
            .ok_or(SimulationError::InvalidCoordinates {
                x: position.x,
                y: position.y,
            })?;
        *cell = value;
        Ok(())
    }

    /// Raw values laid out as `(y, x)`.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Largest finite value, if any cell is reachable.
    pub fn max_finite(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f64::max)
    }
}

/// Algorithm turning a set of target cells into a [`Heatmap`] over a grid.
///
/// Generators are pure: they keep no state between calls, so owners
/// (targets, waypoints, the simulation) decide when to cache a result.
pub trait HeatmapGenerator: Send + Sync {
    fn generate(&self, targets: &[Position], grid: &Grid) -> SimResult<Heatmap>;

    /// Cell states this generator treats as impassable.
    fn blocked(&self) -> CellStates;
}

/// Heatmap generator algorithm selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    ShortestPath,
    FastMarching,
}

impl FromStr for GeneratorKind {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dijkstra" | "shortest_path" => Ok(GeneratorKind::ShortestPath),
            "fast_marching" | "fmm" => Ok(GeneratorKind::FastMarching),
            _ => Err(SimulationError::unsupported("heatmap generator", s)),
        }
    }
}

impl GeneratorKind {
    pub fn build(self, distance: Distance, blocked: CellStates) -> Box<dyn HeatmapGenerator> {
        match self {
            GeneratorKind::ShortestPath => {
                Box::new(ShortestPathGenerator::with_blocked(distance, blocked))
            }
            GeneratorKind::FastMarching => {
                Box::new(FastMarchingGenerator::with_blocked(distance, blocked))
            }
        }
    }
}
