use std::fmt;

use log::debug;

use crate::{
    error::{SimResult, SimulationError},
    grid::{CellState, Grid},
    heatmaps::{Heatmap, HeatmapGenerator},
    position::Position,
};

/// Index of a target in the simulation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub usize);

/// Destination zone pedestrians leave the simulation through.
pub struct Target {
    name: String,
    cells: Vec<Position>,
    generator: Box<dyn HeatmapGenerator>,
    heatmap: Option<Heatmap>,
    exit_count: usize,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("cells", &self.cells.len())
            .field("static", &self.is_static())
            .field("exit_count", &self.exit_count)
            .finish()
    }
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        cells: Vec<Position>,
        generator: Box<dyn HeatmapGenerator>,
    ) -> Self {
        Target {
            name: name.into(),
            cells,
            generator,
            heatmap: None,
            exit_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Position] {
        &self.cells
    }

    pub fn contains(&self, position: Position) -> bool {
        self.cells.contains(&position)
    }

    /// Whether the heatmap ignores pedestrians and only needs computing once.
    pub fn is_static(&self) -> bool {
        !self.generator.blocked().contains(CellState::Occupied)
    }

    pub fn exit_count(&self) -> usize {
        self.exit_count
    }

    pub(crate) fn increment_exit_count(&mut self) {
        self.exit_count += 1;
    }

    pub fn heatmap(&self) -> SimResult<&Heatmap> {
        self.heatmap
            .as_ref()
            .ok_or(SimulationError::NotInitialized { value: "heatmap" })
    }

    pub fn update_heatmap(&mut self, grid: &Grid) -> SimResult<()> {
        if self.heatmap.is_some() && self.is_static() {
            return Ok(());
        }

        debug!("Computing heatmap of target {:?}", self.name);
        self.heatmap = Some(self.generator.generate(&self.cells, grid)?);
        Ok(())
    }
}
