use ndarray::Array2;

use super::{Heatmap, HeatmapGenerator, PathfindingQueue};
use crate::{
    distance::Distance,
    error::SimResult,
    grid::{CellStates, Grid},
    neighbourhood::Neighbourhood,
    position::Position,
};

/// Arrival times using Sethian's [fast marching method](https://en.wikipedia.org/wiki/Fast_marching_method).
///
/// The stencil always uses the 4-connected neighbourhood, whatever the grid's
/// own neighbourhood is. The distance scale is the grid spacing.
#[derive(Debug, Clone)]
pub struct FastMarchingGenerator {
    distance: Distance,
    blocked: CellStates,
}

impl FastMarchingGenerator {
    pub fn new(distance: Distance) -> Self {
        Self::with_blocked(distance, CellStates::OBSTACLE)
    }

    pub fn with_blocked(distance: Distance, blocked: CellStates) -> Self {
        FastMarchingGenerator { distance, blocked }
    }

    fn narrow_band(&self, position: Position, grid: &Grid) -> impl Iterator<Item = Position> {
        Neighbourhood::VonNeumann.neighbours(position, 1, 1, grid.width(), grid.height())
    }

    /// Solve the first-order upwind stencil for `cell` from its fixed neighbours.
    fn travel_time(
        &self,
        cell: Position,
        heatmap: &Heatmap,
        fixed: &Array2<bool>,
        grid: &Grid,
    ) -> SimResult<f64> {
        let mut known = Vec::with_capacity(4);
        for neighbour in self.narrow_band(cell, grid) {
            if fixed[neighbour] {
                known.push((neighbour, heatmap.get(neighbour)?));
            }
        }

        let time = match known.as_slice() {
            [] => f64::INFINITY,
            &[(a, ta)] => ta + self.distance.between(cell, a),
            &[a, b] => self.solve(cell, a, b),
            &[n0, n1, n2] => {
                let (single, others) = if n1.0.shares_axis(n2.0) {
                    (n0, [n1, n2])
                } else if n0.0.shares_axis(n2.0) {
                    (n1, [n0, n2])
                } else {
                    (n2, [n0, n1])
                };
                self.solve(cell, single, upwind(others))
            }
            // Fully enclosed: take the smaller arrival time along each axis.
            &[left, right, up, down] => self.solve(cell, upwind([left, right]), upwind([up, down])),
            _ => unreachable!("a cell has at most four axis neighbours"),
        };

        Ok(time)
    }

    fn solve(&self, cell: Position, a: (Position, f64), b: (Position, f64)) -> f64 {
        let (ta, tb) = (a.1, b.1);
        let inv_dx = 1.0 / self.distance.scale();
        let sq = 2.0 * inv_dx * inv_dx - (ta - tb).powi(2);

        if sq >= 0.0 {
            (ta + tb + sq.sqrt()) / 2.0
        } else {
            let later = if ta >= tb { a } else { b };
            later.1 + self.distance.between(cell, later.0)
        }
    }
}

fn upwind(pair: [(Position, f64); 2]) -> (Position, f64) {
    if pair[0].1 <= pair[1].1 {
        pair[0]
    } else {
        pair[1]
    }
}

impl HeatmapGenerator for FastMarchingGenerator {
    fn generate(&self, targets: &[Position], grid: &Grid) -> SimResult<Heatmap> {
        let mut heatmap = Heatmap::for_grid(grid);
        let mut fixed = Array2::from_elem((grid.height(), grid.width()), false);
        let mut queue = PathfindingQueue::new();

        for &target in targets {
            heatmap.set(target, 0.0)?;
            queue.push(target, 0.0);
        }

        while let Some(current) = queue.pop() {
            if fixed[current] {
                continue;
            }
            fixed[current] = true;

            for neighbour in self.narrow_band(current, grid) {
                if fixed[neighbour] {
                    continue;
                }

                if self.blocked.contains(grid.state(neighbour)?) {
                    if !queue.contains(&neighbour) {
                        heatmap.set(neighbour, f64::INFINITY)?;
                        queue.mark_visited(neighbour);
                    }
                    continue;
                }

                let time = self.travel_time(neighbour, &heatmap, &fixed, grid)?;
                if time < heatmap.get(neighbour)? {
                    heatmap.set(neighbour, time)?;
                    queue.push(neighbour, time);
                }
            }
        }

        Ok(heatmap)
    }

    fn blocked(&self) -> CellStates {
        self.blocked
    }
}
