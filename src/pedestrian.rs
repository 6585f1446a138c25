use std::fmt;

use thin_vec::{thin_vec, ThinVec};

use crate::{
    distance::Distance,
    error::{SimResult, SimulationError},
    grid::Grid,
    position::Position,
    spawner::SpawnerId,
    target::TargetId,
    waypoint::WaypointId,
};

/// Number of trailing path cells considered "recent".
pub const RECENT_PATH_LEN: usize = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PedestrianId(pub u64);

impl fmt::Display for PedestrianId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source owned by the simulation.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn next_pedestrian(&mut self) -> PedestrianId {
        PedestrianId(self.bump())
    }

    pub fn next_waypoint(&mut self) -> WaypointId {
        WaypointId(self.bump())
    }

    fn bump(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Agent walking cell by cell toward its target.
///
/// Moving to the next cell takes `distance(position, target_cell) / speed`
/// seconds. The countdown in `current_distance` tracks how much of that
/// distance is left; once it drops below zero the pedestrian may step.
#[derive(Debug, Clone)]
pub struct Pedestrian {
    id: PedestrianId,
    position: Position,
    optimal_speed: f64,
    current_speed: f64,
    target: TargetId,
    spawner: SpawnerId,
    distance: Distance,
    target_cell: Option<Position>,
    current_distance: f64,
    distance_to_target: f64,
    time_alive: f64,
    total_distance_moved: f64,
    reached: bool,
    waypoint: Option<WaypointId>,
    path: ThinVec<Position>,
}

impl Pedestrian {
    pub fn new(
        id: PedestrianId,
        position: Position,
        speed: f64,
        target: TargetId,
        spawner: SpawnerId,
        distance: Distance,
    ) -> Self {
        Pedestrian {
            id,
            position,
            optimal_speed: speed,
            current_speed: speed,
            target,
            spawner,
            distance,
            target_cell: None,
            current_distance: f64::INFINITY,
            distance_to_target: 0.0,
            time_alive: 0.0,
            total_distance_moved: 0.0,
            reached: false,
            waypoint: None,
            path: thin_vec![position],
        }
    }

    pub fn id(&self) -> PedestrianId {
        self.id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn optimal_speed(&self) -> f64 {
        self.optimal_speed
    }

    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn set_current_speed(&mut self, speed: f64) {
        self.current_speed = speed;
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn spawner(&self) -> SpawnerId {
        self.spawner
    }

    pub fn target_cell(&self) -> Option<Position> {
        self.target_cell
    }

    /// Remaining distance before the pedestrian arrives at its target cell.
    pub fn current_distance(&self) -> f64 {
        self.current_distance
    }

    pub fn time_alive(&self) -> f64 {
        self.time_alive
    }

    pub fn total_distance_moved(&self) -> f64 {
        self.total_distance_moved
    }

    pub fn average_speed(&self) -> f64 {
        if self.time_alive > 0.0 {
            self.total_distance_moved / self.time_alive
        } else {
            0.0
        }
    }

    pub fn is_reached(&self) -> bool {
        self.reached
    }

    pub(crate) fn mark_reached(&mut self) {
        self.reached = true;
        self.target_cell = None;
        self.waypoint = None;
    }

    pub fn waypoint(&self) -> Option<WaypointId> {
        self.waypoint
    }

    pub(crate) fn set_waypoint(&mut self, waypoint: Option<WaypointId>) {
        self.waypoint = waypoint;
    }

    /// Every cell visited so far, starting with the spawn cell.
    pub fn path(&self) -> &[Position] {
        &self.path
    }

    pub fn recent_path(&self) -> &[Position] {
        let start = self.path.len().saturating_sub(RECENT_PATH_LEN);
        &self.path[start..]
    }

    /// Position visited right before the current one.
    pub fn last_position(&self) -> Position {
        match self.path.len() {
            0 | 1 => self.position,
            n => self.path[n - 2],
        }
    }

    /// Set the next cell to walk to, or clear it with `None`.
    ///
    /// Clearing makes the countdown negative infinity so that the pedestrian
    /// picks a new cell right away.
    pub fn set_target_cell(&mut self, cell: Option<Position>) -> SimResult<()> {
        match cell {
            None => {
                self.target_cell = None;
                self.current_distance = f64::NEG_INFINITY;
            }
            Some(cell) if cell == self.position => {
                return Err(SimulationError::AlreadyInCell { position: cell });
            }
            Some(cell) => {
                let distance = self.distance.between(self.position, cell);
                self.target_cell = Some(cell);
                self.current_distance = distance;
                self.distance_to_target = distance;
            }
        }
        Ok(())
    }

    pub fn can_move(&self, grid: &Grid) -> bool {
        if self.reached || self.current_distance >= 0.0 {
            return false;
        }
        self.target_cell
            .and_then(|cell| grid.cell(cell).ok())
            .is_some_and(|cell| cell.is_free())
    }

    /// Step onto the target cell. The grid is not touched.
    pub(crate) fn move_to_target(&mut self, grid: &Grid) -> SimResult<()> {
        let cell = match self.target_cell {
            Some(cell) if self.can_move(grid) => cell,
            _ => return Err(SimulationError::CannotMove { pedestrian: self.id }),
        };

        self.total_distance_moved += self.distance.between(self.position, cell);
        self.position = cell;
        self.path.push(cell);
        self.target_cell = None;
        self.current_distance = f64::INFINITY;
        Ok(())
    }

    pub fn update(&mut self, dt: f64) {
        self.time_alive += dt;
        self.current_distance -= self.current_speed * dt;
    }

    /// How close the pedestrian is to leaving its current cell, in `[0, 1]`.
    pub fn occupation_bias(&self) -> f64 {
        if self.target_cell.is_some() && self.distance_to_target > 0.0 {
            1.0 - self.current_distance.max(0.0) / self.distance_to_target
        } else {
            1.0
        }
    }
}
