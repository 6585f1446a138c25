use super::{Heatmap, HeatmapGenerator};
use crate::{
    distance::Distance,
    error::SimResult,
    grid::{CellStates, Grid},
    position::Position,
};

/// Additive repulsion field around every source cell whose state is blocked.
///
/// Each source contributes a compactly supported bump
/// `intensity * height * exp(1 / ((d / width)^2 - 1))` which vanishes
/// smoothly at `d = width`. The intensity is the distance scale.
#[derive(Debug, Clone)]
pub struct RepulsionGenerator {
    distance: Distance,
    width: f64,
    height: f64,
    reach: (i32, i32),
    blocked: CellStates,
}

impl RepulsionGenerator {
    /// Social distancing field around occupied cells.
    pub fn social_distancing(distance: Distance, width: f64, height: f64) -> Self {
        Self::with_blocked(distance, width, height, CellStates::OCCUPIED)
    }

    /// Repulsion field around obstacles.
    pub fn obstacle_repulsion(distance: Distance, width: f64, height: f64) -> Self {
        Self::with_blocked(distance, width, height, CellStates::OBSTACLE)
    }

    pub fn with_blocked(distance: Distance, width: f64, height: f64, blocked: CellStates) -> Self {
        RepulsionGenerator {
            distance,
            width,
            height,
            reach: ((width / 2.0).ceil() as i32, (height / 2.0).ceil() as i32),
            blocked,
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    fn value(&self, d: f64) -> f64 {
        if d.abs() < self.width {
            let t = d / self.width;
            self.distance.scale() * self.height * (1.0 / (t * t - 1.0)).exp()
        } else {
            0.0
        }
    }

    /// Raw bump value `neighbour` receives from a source at `center`.
    pub fn get_bias(&self, center: Position, neighbour: Position) -> f64 {
        self.value(self.distance.between(center, neighbour))
    }

    /// Upper bound for normalizing rendered fields.
    pub fn get_max_value(&self) -> f64 {
        8.0 * self.value(self.distance.scale())
    }
}

impl HeatmapGenerator for RepulsionGenerator {
    fn generate(&self, targets: &[Position], grid: &Grid) -> SimResult<Heatmap> {
        let mut heatmap = Heatmap::filled(grid.width(), grid.height(), 0.0);
        let (rx, ry) = self.reach;

        for &source in targets {
            if !self.blocked.contains(grid.state(source)?) {
                continue;
            }

            heatmap.set(source, self.value(0.0))?;
            for neighbour in grid.neighbours_within(source, rx, ry) {
                let position = neighbour.position();
                let current = heatmap.get(position)?;
                if current.is_finite() {
                    let bump = self.value(self.distance.between(source, position));
                    heatmap.set(position, current + bump)?;
                }
            }
        }

        Ok(heatmap)
    }

    fn blocked(&self) -> CellStates {
        self.blocked
    }
}
