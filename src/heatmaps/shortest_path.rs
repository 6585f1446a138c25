use super::{Heatmap, HeatmapGenerator, PathfindingQueue};
use crate::{
    distance::Distance,
    error::SimResult,
    grid::{CellStates, Grid},
    position::Position,
};

/// Multi-source shortest path (Dijkstra style) over the grid's own neighbourhood.
///
/// A cell keeps the cost it was first discovered with. On layouts where a
/// detour reaches a cell before its true shortest path does, the recorded
/// value may exceed the true distance.
#[derive(Debug, Clone)]
pub struct ShortestPathGenerator {
    distance: Distance,
    blocked: CellStates,
}

impl ShortestPathGenerator {
    /// Generator treating obstacles as impassable.
    pub fn new(distance: Distance) -> Self {
        Self::with_blocked(distance, CellStates::OBSTACLE)
    }

    pub fn with_blocked(distance: Distance, blocked: CellStates) -> Self {
        ShortestPathGenerator { distance, blocked }
    }
}

impl HeatmapGenerator for ShortestPathGenerator {
    fn generate(&self, targets: &[Position], grid: &Grid) -> SimResult<Heatmap> {
        let mut heatmap = Heatmap::for_grid(grid);
        let mut queue = PathfindingQueue::new();

        for &target in targets {
            heatmap.set(target, 0.0)?;
            queue.push(target, 0.0);
        }

        for cell in grid.cells() {
            let position = cell.position();
            if self.blocked.contains(cell.state()) && !queue.contains(&position) {
                heatmap.set(position, f64::INFINITY)?;
                queue.mark_visited(position);
            }
        }

        while let Some(current) = queue.pop() {
            let cost = heatmap.get(current)?;

            for neighbour in grid.neighbours(current) {
                let position = neighbour.position();
                if queue.contains(&position) {
                    continue;
                }

                let candidate = cost + self.distance.between(current, position);
                if candidate < heatmap.get(position)? {
                    heatmap.set(position, candidate)?;
                    queue.push(position, candidate);
                }
            }
        }

        Ok(heatmap)
    }

    fn blocked(&self) -> CellStates {
        self.blocked
    }
}
