use log::debug;

use crate::{
    error::SimResult,
    grid::{CellState, Grid},
    heatmaps::{Heatmap, HeatmapGenerator},
    pedestrian::PedestrianId,
    position::Position,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaypointId(pub u64);

/// Short-lived sub-goal routing one stalled pedestrian around congestion.
#[derive(Debug, Clone)]
pub struct Waypoint {
    id: WaypointId,
    cell: Position,
    pedestrian: PedestrianId,
    heatmap: Heatmap,
    dynamic: bool,
}

impl Waypoint {
    pub fn new(
        id: WaypointId,
        cell: Position,
        pedestrian: PedestrianId,
        generator: &dyn HeatmapGenerator,
        grid: &Grid,
    ) -> SimResult<Self> {
        debug!("Creating waypoint {} at {cell} for pedestrian {pedestrian}", id.0);
        Ok(Waypoint {
            id,
            cell,
            pedestrian,
            heatmap: generator.generate(&[cell], grid)?,
            dynamic: generator.blocked().contains(CellState::Occupied),
        })
    }

    pub fn id(&self) -> WaypointId {
        self.id
    }

    pub fn cell(&self) -> Position {
        self.cell
    }

    pub fn pedestrian(&self) -> PedestrianId {
        self.pedestrian
    }

    pub fn heatmap(&self) -> &Heatmap {
        &self.heatmap
    }

    pub fn is_reached(&self, position: Position) -> bool {
        self.cell == position
    }

    /// Recompute the heatmap if it depends on occupancy.
    pub fn update(&mut self, generator: &dyn HeatmapGenerator, grid: &Grid) -> SimResult<()> {
        if self.dynamic {
            self.heatmap = generator.generate(&[self.cell], grid)?;
        }
        Ok(())
    }
}
