pub mod diagnostic;
pub mod distance;
pub mod error;
pub mod grid;
pub mod heatmaps;
pub mod neighbourhood;
pub mod pedestrian;
pub mod position;
pub mod scenario;
pub mod spawner;
pub mod target;
pub mod waypoint;

use std::{fmt, time::Instant};

use diagnostic::{DiagnosticLog, StepMetrics};
use distance::Distance;
use error::{ConfigIssue, SimResult, SimulationError};
use grid::Grid;
use heatmaps::{Heatmap, HeatmapGenerator, PathfindingQueue, RepulsionGenerator};
use log::{debug, info, trace};
use ordered_float::OrderedFloat;
use pedestrian::{IdGenerator, Pedestrian, PedestrianId};
use position::Position;
use rustc_hash::FxHashMap;
use spawner::{Spawner, SpawnerId};
use target::Target;
use waypoint::{Waypoint, WaypointId};

/// Grid based crowd simulation.
///
/// Every call to [`Simulation::update`] runs one tick: spawn, recompute the
/// repulsion fields, refresh target heatmaps and waypoints, then resolve the
/// pedestrians in ascending order of their remaining distance.
pub struct Simulation {
    grid: Grid,
    distance: Distance,
    pedestrians: Vec<Pedestrian>,
    spawners: Vec<Spawner>,
    targets: Vec<Target>,
    social_distancing: RepulsionGenerator,
    obstacle_repulsion: Option<RepulsionGenerator>,
    social_heatmap: Option<Heatmap>,
    obstacle_heatmap: Option<Heatmap>,
    waypoints: Vec<Waypoint>,
    options: SimulationOptions,
    ids: IdGenerator,
    rng: fastrand::Rng,
    steps: u64,
    run_time: f64,
    finished: bool,
    diagnostic_log: DiagnosticLog,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("name", &self.options.name)
            .field("grid", &self.grid)
            .field("pedestrians", &self.pedestrians.len())
            .field("targets", &self.targets)
            .field("waypoints", &self.waypoints.len())
            .field("steps", &self.steps)
            .field("run_time", &self.run_time)
            .finish()
    }
}

impl Simulation {
    pub fn new(
        grid: Grid,
        distance: Distance,
        targets: Vec<Target>,
        mut spawners: Vec<Spawner>,
        social_distancing: RepulsionGenerator,
        obstacle_repulsion: Option<RepulsionGenerator>,
        options: SimulationOptions,
    ) -> SimResult<Self> {
        let mut issues = Vec::new();
        if !options.time_resolution.is_finite() || options.time_resolution <= 0.0 {
            issues.push(ConfigIssue::new("time_resolution", "must be positive and finite"));
        }
        for target in &targets {
            if let Some(cell) = target.cells().iter().find(|&&c| !grid.is_in_bounds(c)) {
                issues.push(ConfigIssue::new(
                    format!("targets.{}.cells", target.name()),
                    format!("{cell} is outside of the grid"),
                ));
            }
        }
        for spawner in &spawners {
            if let Some(cell) = spawner.cells().iter().find(|&&c| !grid.is_in_bounds(c)) {
                issues.push(ConfigIssue::new(
                    format!("spawners.{}.cells", spawner.name()),
                    format!("{cell} is outside of the grid"),
                ));
            }
            if spawner.targets().iter().any(|t| t.0 >= targets.len()) {
                issues.push(ConfigIssue::new(
                    format!("spawners.{}.targets", spawner.name()),
                    "refers to a missing target",
                ));
            }
        }
        if !issues.is_empty() {
            return Err(SimulationError::InvalidConfig(issues));
        }

        for (i, spawner) in spawners.iter_mut().enumerate() {
            spawner.set_id(SpawnerId(i));
        }

        info!("Simulation initialization finished");
        info!("Simulation options: {options:#?}");

        Ok(Simulation {
            rng: fastrand::Rng::with_seed(options.seed),
            diagnostic_log: DiagnosticLog::new(options.name.clone()),
            grid,
            distance,
            pedestrians: Vec::new(),
            spawners,
            targets,
            social_distancing,
            obstacle_repulsion,
            social_heatmap: None,
            obstacle_heatmap: None,
            waypoints: Vec::new(),
            options,
            ids: IdGenerator::default(),
            steps: 0,
            run_time: 0.0,
            finished: false,
        })
    }

    /// Advance by the configured time resolution.
    pub fn step(&mut self) -> SimResult<StepMetrics> {
        self.update(self.options.time_resolution)
    }

    /// Step until the simulation is done or `max_steps` ticks have run.
    /// Returns the number of ticks run.
    pub fn run(&mut self, max_steps: u64) -> SimResult<u64> {
        let mut count = 0;
        while count < max_steps && !self.is_done() {
            self.step()?;
            count += 1;
        }
        Ok(count)
    }

    pub fn update(&mut self, dt: f64) -> SimResult<StepMetrics> {
        let mut metrics = StepMetrics {
            step: self.steps + 1,
            ..Default::default()
        };

        let instant = Instant::now();
        self.spawn_pedestrians(dt, &mut metrics)?;
        metrics.time_spawn = instant.elapsed().as_secs_f64();

        let instant = Instant::now();
        self.update_fields()?;
        metrics.time_fields = instant.elapsed().as_secs_f64();

        let instant = Instant::now();
        self.resolve_pedestrians(dt, &mut metrics)?;
        metrics.time_resolve = instant.elapsed().as_secs_f64();

        self.steps += 1;
        self.run_time += dt;
        metrics.active_ped_count = self.pedestrians.len();

        debug!(
            "Step {}: {} pedestrians, {} spawned, {} moved, {} arrived",
            metrics.step, metrics.active_ped_count, metrics.spawned, metrics.moved, metrics.arrived
        );
        if !self.finished && self.is_done() {
            self.finished = true;
            info!(
                "Simulation finished after {} steps ({:.2}s)",
                self.steps, self.run_time
            );
        }

        self.diagnostic_log.push(metrics.clone());
        Ok(metrics)
    }

    fn spawn_pedestrians(&mut self, dt: f64, metrics: &mut StepMetrics) -> SimResult<()> {
        for spawner in self.spawners.iter_mut() {
            let spawned = spawner.update(dt, &self.grid, &self.targets, &mut self.rng, &mut self.ids)?;
            for pedestrian in spawned {
                self.grid.occupy(pedestrian.position(), pedestrian.id())?;
                self.pedestrians.push(pedestrian);
                metrics.spawned += 1;
            }
        }
        Ok(())
    }

    fn update_fields(&mut self) -> SimResult<()> {
        let occupied: Vec<Position> = self.pedestrians.iter().map(Pedestrian::position).collect();
        self.social_heatmap = Some(self.social_distancing.generate(&occupied, &self.grid)?);

        // Obstacles never move.
        if self.obstacle_heatmap.is_none() {
            let heatmap = match &self.obstacle_repulsion {
                Some(generator) => {
                    let cells: Vec<Position> = self.grid.cells().map(|c| c.position()).collect();
                    generator.generate(&cells, &self.grid)?
                }
                None => Heatmap::filled(self.grid.width(), self.grid.height(), 0.0),
            };
            self.obstacle_heatmap = Some(heatmap);
        }

        for target in self.targets.iter_mut() {
            target.update_heatmap(&self.grid)?;
        }

        if let Some(options) = &self.options.waypoints {
            for waypoint in self.waypoints.iter_mut() {
                waypoint.update(options.generator.as_ref(), &self.grid)?;
            }
        }
        Ok(())
    }

    fn resolve_pedestrians(&mut self, dt: f64, metrics: &mut StepMetrics) -> SimResult<()> {
        let mut order: Vec<usize> = (0..self.pedestrians.len()).collect();
        order.sort_by(|&a, &b| {
            let a = self.pedestrians[a].current_distance();
            let b = self.pedestrians[b].current_distance();
            a.total_cmp(&b)
        });

        for index in order {
            self.resolve(index, dt, metrics)?;
        }

        self.pedestrians.retain(|p| !p.is_reached());
        Ok(())
    }

    fn resolve(&mut self, index: usize, dt: f64, metrics: &mut StepMetrics) -> SimResult<()> {
        self.pedestrians[index].update(dt);
        self.leave_reached_waypoint(index);

        let pedestrian = &self.pedestrians[index];
        let position = pedestrian.position();

        if pedestrian.can_move(&self.grid) {
            let id = pedestrian.id();
            self.grid.vacate(position)?;
            let pedestrian = &mut self.pedestrians[index];
            pedestrian.move_to_target(&self.grid)?;
            self.grid.occupy(pedestrian.position(), id)?;
            trace!("Pedestrian {id} moved {position} -> {}", pedestrian.position());
            metrics.moved += 1;

            self.leave_reached_waypoint(index);
            self.advance(index, position, metrics)?;
        } else if pedestrian.target_cell().is_none() {
            self.advance(index, position, metrics)?;
        } else if self.should_retarget(pedestrian) {
            if let Some(cell) = self.retarget_cell(pedestrian)? {
                self.pedestrians[index].set_target_cell(Some(cell))?;
                metrics.retargeted += 1;
            }
        } else if self.should_create_waypoint(pedestrian) {
            if let Some(cell) = self.find_waypoint_cell(pedestrian)? {
                self.create_waypoint(index, cell)?;
                metrics.waypoints_created += 1;
            }
        }

        Ok(())
    }

    /// Leave through the target if standing in it, otherwise pick the next cell.
    fn advance(
        &mut self,
        index: usize,
        last_position: Position,
        metrics: &mut StepMetrics,
    ) -> SimResult<()> {
        let pedestrian = &self.pedestrians[index];
        if self.targets[pedestrian.target().0].contains(pedestrian.position()) {
            self.arrive(index)?;
            metrics.arrived += 1;
            return Ok(());
        }

        let next = self.next_target_cell(pedestrian, last_position)?;
        self.pedestrians[index].set_target_cell(next)
    }

    fn arrive(&mut self, index: usize) -> SimResult<()> {
        let pedestrian = &mut self.pedestrians[index];
        self.grid.vacate(pedestrian.position())?;
        self.targets[pedestrian.target().0].increment_exit_count();
        if let Some(id) = pedestrian.waypoint() {
            self.waypoints.retain(|w| w.id() != id);
        }
        pedestrian.mark_reached();

        debug!(
            "Pedestrian {} reached target {:?} after {:.2}s",
            pedestrian.id(),
            self.targets[pedestrian.target().0].name(),
            pedestrian.time_alive()
        );
        Ok(())
    }

    fn should_retarget(&self, pedestrian: &Pedestrian) -> bool {
        let blocked = pedestrian
            .target_cell()
            .and_then(|cell| self.grid.cell(cell).ok())
            .is_some_and(|cell| cell.is_occupied());

        blocked
            && self
                .options
                .retargeting_threshold
                .is_some_and(|threshold| threshold > pedestrian.current_distance())
    }

    fn should_create_waypoint(&self, pedestrian: &Pedestrian) -> bool {
        pedestrian.waypoint().is_none()
            && self
                .options
                .waypoints
                .as_ref()
                .is_some_and(|w| w.threshold > pedestrian.current_distance())
    }

    /// Best neighbour of `pedestrian` to walk to.
    ///
    /// Occupied cells are candidates when an occupation bias modifier is set.
    fn next_target_cell(
        &self,
        pedestrian: &Pedestrian,
        last_position: Position,
    ) -> SimResult<Option<Position>> {
        let claim_occupied = self.options.occupation_bias_modifier.is_some();
        Ok(self
            .ranked_neighbours(pedestrian, last_position)?
            .into_iter()
            .find(|&(_, _, free)| claim_occupied || free)
            .map(|(_, cell, _)| cell))
    }

    /// Best free neighbour other than the blocked target cell.
    fn retarget_cell(&self, pedestrian: &Pedestrian) -> SimResult<Option<Position>> {
        let current = pedestrian.target_cell();
        Ok(self
            .ranked_neighbours(pedestrian, pedestrian.position())?
            .into_iter()
            .find(|&(_, cell, free)| free && Some(cell) != current)
            .map(|(_, cell, _)| cell))
    }

    /// Score the neighbours of `pedestrian`, lowest first, flagging free cells.
    /// Obstacles are left out.
    ///
    /// `last_position` is where the pedestrian stood when the social
    /// distancing field was computed; its own contribution is taken out.
    fn ranked_neighbours(
        &self,
        pedestrian: &Pedestrian,
        last_position: Position,
    ) -> SimResult<Vec<(OrderedFloat<f64>, Position, bool)>> {
        let heatmap = match pedestrian.waypoint().and_then(|id| self.waypoint(id)) {
            Some(waypoint) => waypoint.heatmap(),
            None => self.targets[pedestrian.target().0].heatmap()?,
        };
        let social = self
            .social_heatmap
            .as_ref()
            .ok_or(SimulationError::NotInitialized { value: "social distancing heatmap" })?;
        let obstacle = self
            .obstacle_heatmap
            .as_ref()
            .ok_or(SimulationError::NotInitialized { value: "obstacle repulsion heatmap" })?;
        let recent = pedestrian.recent_path();

        let mut scored = Vec::with_capacity(8);
        for cell in self.grid.neighbours(pedestrian.position()) {
            if cell.is_obstacle() {
                continue;
            }
            let n = cell.position();

            let mut score = heatmap.get(n)? + obstacle.get(n)?;
            score += (social.get(n)? - self.social_distancing.get_bias(last_position, n)).min(0.0);
            if let (Some(modifier), Some(occupant)) =
                (self.options.occupation_bias_modifier, cell.occupant())
            {
                if let Some(other) = self.pedestrian(occupant) {
                    score += modifier * other.occupation_bias();
                }
            }
            if let Some(bias) = self.options.last_position_bias {
                if recent.contains(&n) {
                    score += bias;
                }
            }

            scored.push((OrderedFloat(score), n, cell.is_free()));
        }
        scored.sort_by_key(|&(score, _, _)| score);
        Ok(scored)
    }

    /// Search around a stalled pedestrian for the free cell closest to its
    /// target, within the configured waypoint distance.
    ///
    /// Occupied cells are crossed but never chosen. Only cells strictly closer
    /// to the target than the pedestrian qualify.
    fn find_waypoint_cell(&self, pedestrian: &Pedestrian) -> SimResult<Option<Position>> {
        let Some(options) = &self.options.waypoints else {
            return Ok(None);
        };
        let heatmap = self.targets[pedestrian.target().0].heatmap()?;
        let origin = pedestrian.position();
        let current = heatmap.get(origin)?;

        let mut queue = PathfindingQueue::new();
        let mut costs = FxHashMap::default();
        queue.push(origin, 0.0);
        costs.insert(origin, 0.0);

        let mut best: Option<(f64, Position)> = None;
        while let Some(position) = queue.pop() {
            let cost = costs.get(&position).copied().unwrap_or_default();

            if position != origin && self.grid.cell(position)?.is_free() {
                let value = heatmap.get(position)?;
                if value < current && best.map_or(true, |(b, _)| value < b) {
                    best = Some((value, position));
                }
            }

            for neighbour in self.grid.neighbours(position) {
                let n = neighbour.position();
                if neighbour.is_obstacle() || queue.contains(&n) {
                    continue;
                }
                let next = cost + self.distance.between(position, n);
                if next <= options.distance {
                    costs.insert(n, next);
                    queue.push(n, next);
                }
            }
        }

        Ok(best.map(|(_, position)| position))
    }

    fn create_waypoint(&mut self, index: usize, cell: Position) -> SimResult<()> {
        let Some(options) = &self.options.waypoints else {
            return Ok(());
        };
        let pedestrian = &self.pedestrians[index];
        let waypoint = Waypoint::new(
            self.ids.next_waypoint(),
            cell,
            pedestrian.id(),
            options.generator.as_ref(),
            &self.grid,
        )?;
        let id = waypoint.id();
        self.waypoints.push(waypoint);
        self.pedestrians[index].set_waypoint(Some(id));

        // Head for the waypoint right away.
        let pedestrian = &self.pedestrians[index];
        if let Some(next) = self.next_target_cell(pedestrian, pedestrian.position())? {
            if self.grid.cell(next)?.is_free() {
                self.pedestrians[index].set_target_cell(Some(next))?;
            }
        }
        Ok(())
    }

    fn leave_reached_waypoint(&mut self, index: usize) {
        let pedestrian = &mut self.pedestrians[index];
        let Some(id) = pedestrian.waypoint() else {
            return;
        };

        let active = self
            .waypoints
            .iter()
            .any(|w| w.id() == id && !w.is_reached(pedestrian.position()));
        if !active {
            debug!("Pedestrian {} reached waypoint {}", pedestrian.id(), id.0);
            pedestrian.set_waypoint(None);
            self.waypoints.retain(|w| w.id() != id);
        }
    }

    fn waypoint(&self, id: WaypointId) -> Option<&Waypoint> {
        self.waypoints.iter().find(|w| w.id() == id)
    }

    /// Live pedestrian by id. Pedestrians are kept sorted by id.
    pub fn pedestrian(&self, id: PedestrianId) -> Option<&Pedestrian> {
        self.pedestrians
            .binary_search_by_key(&id, Pedestrian::id)
            .ok()
            .map(|i| &self.pedestrians[i])
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    pub fn pedestrians(&self) -> &[Pedestrian] {
        &self.pedestrians
    }

    pub fn spawners(&self) -> &[Spawner] {
        &self.spawners
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Target whose zone contains `(x, y)`.
    pub fn target_at(&self, x: i32, y: i32) -> Option<&Target> {
        let position = Position::new(x, y);
        self.targets.iter().find(|t| t.contains(position))
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// `None` before the first tick.
    pub fn social_distancing_heatmap(&self) -> Option<&Heatmap> {
        self.social_heatmap.as_ref()
    }

    /// `None` before the first tick.
    pub fn obstacle_repulsion_heatmap(&self) -> Option<&Heatmap> {
        self.obstacle_heatmap.as_ref()
    }

    pub fn social_distancing(&self) -> &RepulsionGenerator {
        &self.social_distancing
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn run_time(&self) -> f64 {
        self.run_time
    }

    pub fn time_resolution(&self) -> f64 {
        self.options.time_resolution
    }

    /// Distance between opposite corners of the grid.
    pub fn max_grid_distance(&self) -> f64 {
        let corner = Position::new(self.grid.width() as i32, self.grid.height() as i32);
        self.distance.between(Position::new(0, 0), corner)
    }

    pub fn is_done(&self) -> bool {
        self.spawners.iter().all(Spawner::is_done) && self.pedestrians.is_empty()
    }

    pub fn diagnostic_log(&self) -> &DiagnosticLog {
        &self.diagnostic_log
    }
}

/// Simulation options.
#[derive(Debug)]
pub struct SimulationOptions {
    /// Name recorded in the diagnostic log.
    pub name: String,
    /// Seconds advanced by [`Simulation::step`].
    pub time_resolution: f64,
    /// Seed of the random generator used for spawning.
    pub seed: u64,
    /// Weight of an occupant's occupation bias when scoring its cell.
    /// When set, pedestrians may also target occupied cells.
    pub occupation_bias_modifier: Option<f64>,
    /// Pick another cell once the remaining distance falls below this value
    /// while the target cell is occupied.
    pub retargeting_threshold: Option<f64>,
    /// Penalty for cells on the pedestrian's recent path.
    pub last_position_bias: Option<f64>,
    pub waypoints: Option<WaypointOptions>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        SimulationOptions {
            name: String::from("simulation"),
            time_resolution: 0.1,
            seed: 0,
            occupation_bias_modifier: Some(1.0),
            retargeting_threshold: Some(-1.0),
            last_position_bias: None,
            waypoints: None,
        }
    }
}

/// Stall handling through waypoints.
pub struct WaypointOptions {
    /// Create a waypoint once the remaining distance falls below this value.
    pub threshold: f64,
    /// Search radius around the stalled pedestrian.
    pub distance: f64,
    pub generator: Box<dyn HeatmapGenerator>,
}

impl fmt::Debug for WaypointOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaypointOptions")
            .field("threshold", &self.threshold)
            .field("distance", &self.distance)
            .field("blocked", &self.generator.blocked())
            .finish()
    }
}

impl WaypointOptions {
    /// Waypoints are enabled when all three parts are given and disabled when
    /// none is.
    pub fn from_parts(
        threshold: Option<f64>,
        distance: Option<f64>,
        generator: Option<Box<dyn HeatmapGenerator>>,
    ) -> SimResult<Option<Self>> {
        match (threshold, distance, generator) {
            (None, None, None) => Ok(None),
            (Some(threshold), Some(distance), Some(generator)) => Ok(Some(WaypointOptions {
                threshold,
                distance,
                generator,
            })),
            (threshold, distance, generator) => {
                let missing = [
                    ("waypoints.threshold", threshold.is_none()),
                    ("waypoints.distance", distance.is_none()),
                    ("waypoints.generator", generator.is_none()),
                ];
                let issues = missing
                    .into_iter()
                    .filter(|&(_, missing)| missing)
                    .map(|(field, _)| {
                        ConfigIssue::new(field, "required when any waypoint option is set")
                    })
                    .collect();
                Err(SimulationError::InvalidConfig(issues))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_float_eq::*;

    use super::*;
    use crate::{
        error::ErrorCode,
        grid::CellState,
        heatmaps::{FastMarchingGenerator, ShortestPathGenerator},
        neighbourhood::Neighbourhood,
        target::TargetId,
    };

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn simulation(
        grid: Grid,
        spawner_cells: Vec<Position>,
        target_cells: Vec<Position>,
        total_spawns: u32,
        options: SimulationOptions,
    ) -> Simulation {
        let distance = Distance::euclidean(1.0);
        let target = Target::new(
            "exit",
            target_cells,
            Box::new(ShortestPathGenerator::new(distance)),
        );
        let batch_size = spawner_cells.len();
        let spawner = Spawner::new("entrance", spawner_cells, vec![TargetId(0)], distance)
            .with_total_spawns(Some(total_spawns))
            .with_batch_size(batch_size);
        let social = RepulsionGenerator::social_distancing(distance, 2.0, 2.0);

        Simulation::new(grid, distance, vec![target], vec![spawner], social, None, options)
            .unwrap()
    }

    fn assert_consistent(simulation: &Simulation) {
        let grid = simulation.grid();
        assert_eq!(grid.count(CellState::Occupied), simulation.pedestrians().len());
        for pedestrian in simulation.pedestrians() {
            let cell = grid.cell(pedestrian.position()).unwrap();
            assert_eq!(cell.occupant(), Some(pedestrian.id()));
        }
    }

    /// Simulation that never spawns, with pedestrians standing on `cells`.
    fn with_pedestrians(
        grid: Grid,
        target: Position,
        cells: &[Position],
        options: SimulationOptions,
    ) -> Simulation {
        let mut simulation = simulation(grid, vec![Position::new(0, 0)], vec![target], 0, options);
        let distance = simulation.distance();
        for (i, &cell) in cells.iter().enumerate() {
            let id = PedestrianId(100 + i as u64);
            simulation.grid.occupy(cell, id).unwrap();
            simulation.pedestrians.push(Pedestrian::new(
                id,
                cell,
                1.0,
                TargetId(0),
                SpawnerId(0),
                distance,
            ));
        }
        simulation.update_fields().unwrap();
        simulation
    }

    fn score(simulation: &Simulation, index: usize, last_position: Position, cell: Position) -> f64 {
        let pedestrian = &simulation.pedestrians[index];
        simulation
            .ranked_neighbours(pedestrian, last_position)
            .unwrap()
            .into_iter()
            .find(|&(_, n, _)| n == cell)
            .map(|(score, _, _)| score.0)
            .unwrap()
    }

    #[test]
    fn test_occupied_cells_are_claimed_only_with_modifier() {
        let sides = [Position::new(2, 0), Position::new(2, 2)];
        let blocker = Position::new(2, 1);

        let options = SimulationOptions {
            occupation_bias_modifier: None,
            ..Default::default()
        };
        let grid = Grid::new(5, 3, Neighbourhood::Moore);
        let simulation =
            with_pedestrians(grid, Position::new(4, 1), &[Position::new(1, 1), blocker], options);
        let pedestrian = &simulation.pedestrians()[0];
        let next = simulation.next_target_cell(pedestrian, pedestrian.position()).unwrap();
        assert!(sides.contains(&next.unwrap()));

        // The occupant is about to leave, so a light penalty keeps its cell first.
        let options = SimulationOptions {
            occupation_bias_modifier: Some(0.1),
            ..Default::default()
        };
        let grid = Grid::new(5, 3, Neighbourhood::Moore);
        let simulation =
            with_pedestrians(grid, Position::new(4, 1), &[Position::new(1, 1), blocker], options);
        let pedestrian = &simulation.pedestrians()[0];
        let next = simulation.next_target_cell(pedestrian, pedestrian.position()).unwrap();
        assert_eq!(next, Some(blocker));
        assert_float_absolute_eq!(score(&simulation, 0, Position::new(1, 1), blocker), 2.1, 1e-9);

        // A full penalty makes the free cells win again.
        let grid = Grid::new(5, 3, Neighbourhood::Moore);
        let simulation = with_pedestrians(
            grid,
            Position::new(4, 1),
            &[Position::new(1, 1), blocker],
            SimulationOptions::default(),
        );
        let pedestrian = &simulation.pedestrians()[0];
        let next = simulation.next_target_cell(pedestrian, pedestrian.position()).unwrap();
        assert!(sides.contains(&next.unwrap()));
    }

    #[test]
    fn test_obstacles_are_never_proposed() {
        let mut grid = Grid::new(3, 3, Neighbourhood::Moore);
        grid.set_obstacle(Position::new(1, 1)).unwrap();
        let simulation = with_pedestrians(
            grid,
            Position::new(2, 1),
            &[Position::new(0, 1)],
            SimulationOptions::default(),
        );
        let pedestrian = &simulation.pedestrians()[0];

        let ranked = simulation
            .ranked_neighbours(pedestrian, pedestrian.position())
            .unwrap();
        assert_eq!(ranked.len(), 4);
        assert!(ranked.iter().all(|&(_, cell, _)| cell != Position::new(1, 1)));

        let next = simulation.next_target_cell(pedestrian, pedestrian.position()).unwrap();
        assert!([Position::new(1, 0), Position::new(1, 2)].contains(&next.unwrap()));
    }

    #[test]
    fn test_recent_path_is_penalized() {
        let grid = Grid::new(5, 3, Neighbourhood::Moore);
        let mut simulation = with_pedestrians(
            grid,
            Position::new(4, 1),
            &[Position::new(1, 1)],
            SimulationOptions::default(),
        );
        let (from, to) = (Position::new(1, 1), Position::new(2, 1));
        let pedestrian = &mut simulation.pedestrians[0];
        pedestrian.set_target_cell(Some(to)).unwrap();
        pedestrian.update(2.0);
        simulation.grid.vacate(from).unwrap();
        simulation.pedestrians[0].move_to_target(&simulation.grid).unwrap();
        simulation.grid.occupy(to, PedestrianId(100)).unwrap();
        simulation.update_fields().unwrap();

        let plain_back = score(&simulation, 0, to, from);
        let plain_ahead = score(&simulation, 0, to, Position::new(3, 1));
        simulation.options.last_position_bias = Some(0.5);

        assert_float_absolute_eq!(score(&simulation, 0, to, from), plain_back + 0.5, 1e-9);
        assert_float_absolute_eq!(score(&simulation, 0, to, Position::new(3, 1)), plain_ahead, 1e-9);
    }

    #[test]
    fn test_own_social_distancing_is_taken_out() {
        let grid = Grid::new(5, 3, Neighbourhood::Moore);
        let simulation = with_pedestrians(
            grid,
            Position::new(4, 1),
            &[Position::new(2, 1)],
            SimulationOptions::default(),
        );
        let heatmap = simulation.targets()[0].heatmap().unwrap();
        let here = Position::new(2, 1);

        for (_, cell, _) in simulation
            .ranked_neighbours(&simulation.pedestrians()[0], here)
            .unwrap()
        {
            let expected = heatmap.get(cell).unwrap();
            assert_float_absolute_eq!(score(&simulation, 0, here, cell), expected, 1e-9);
        }

        // Seen from another cell, the own bump no longer cancels out.
        let elsewhere = Position::new(1, 1);
        let cell = Position::new(1, 0);
        let social = simulation.social_distancing();
        let adjustment = social.get_bias(here, cell) - social.get_bias(elsewhere, cell);
        assert!(adjustment < 0.0);
        assert_float_absolute_eq!(
            score(&simulation, 0, elsewhere, cell),
            heatmap.get(cell).unwrap() + adjustment,
            1e-9
        );
    }

    #[test]
    fn test_stalled_pedestrian_retargets_to_free_cell() {
        let blocker = Position::new(2, 1);
        let grid = Grid::new(5, 3, Neighbourhood::Moore);
        let mut simulation = with_pedestrians(
            grid,
            Position::new(4, 1),
            &[Position::new(1, 1), blocker],
            SimulationOptions::default(),
        );
        let pedestrian = &mut simulation.pedestrians[0];
        pedestrian.set_target_cell(Some(blocker)).unwrap();
        pedestrian.update(3.0);

        let mut metrics = StepMetrics::default();
        simulation.resolve(0, 0.1, &mut metrics).unwrap();

        assert_eq!(metrics.retargeted, 1);
        assert_eq!(metrics.moved, 0);
        let pedestrian = &simulation.pedestrians()[0];
        let cell = pedestrian.target_cell().unwrap();
        assert_ne!(cell, blocker);
        assert!(simulation.grid().cell(cell).unwrap().is_free());
        assert!(pedestrian.current_distance() > 0.0);
    }

    #[test]
    fn test_counter_flow_clears() {
        init_logger();
        let grid = Grid::new(12, 6, Neighbourhood::Moore);
        let distance = Distance::euclidean(1.0);
        let west: Vec<_> = (0..6).map(|y| Position::new(0, y)).collect();
        let east: Vec<_> = (0..6).map(|y| Position::new(11, y)).collect();
        let targets = vec![
            Target::new("west", west.clone(), Box::new(ShortestPathGenerator::new(distance))),
            Target::new("east", east.clone(), Box::new(ShortestPathGenerator::new(distance))),
        ];
        let spawners = vec![
            Spawner::new("west", west, vec![TargetId(1)], distance)
                .with_total_spawns(Some(20))
                .with_batch_size(6),
            Spawner::new("east", east, vec![TargetId(0)], distance)
                .with_total_spawns(Some(20))
                .with_batch_size(6),
        ];
        let mut simulation = Simulation::new(
            grid,
            distance,
            targets,
            spawners,
            RepulsionGenerator::social_distancing(distance, 2.0, 2.0),
            None,
            SimulationOptions::default(),
        )
        .unwrap();

        simulation.run(20_000).unwrap();

        assert!(simulation.is_done());
        assert_eq!(simulation.targets()[0].exit_count(), 20);
        assert_eq!(simulation.targets()[1].exit_count(), 20);
        let retargeted: usize = simulation.diagnostic_log().step_metrics.retargeted.iter().sum();
        assert!(retargeted > 0);
    }

    #[test]
    fn test_single_pedestrian_reaches_target() {
        init_logger();
        let grid = Grid::new(10, 10, Neighbourhood::Moore);
        let mut simulation = simulation(
            grid,
            vec![Position::new(0, 0)],
            vec![Position::new(9, 9)],
            1,
            SimulationOptions::default(),
        );

        let mut steps = 0;
        while !simulation.is_done() && steps < 1000 {
            simulation.step().unwrap();
            assert_consistent(&simulation);
            assert!(simulation.pedestrians().len() <= 1);
            steps += 1;
        }

        assert!(simulation.is_done());
        assert!(simulation.pedestrians().is_empty());
        assert_eq!(simulation.targets()[0].exit_count(), 1);
        assert_eq!(simulation.grid().count(CellState::Occupied), 0);
        assert_eq!(simulation.steps(), steps);
        assert_float_absolute_eq!(simulation.run_time(), steps as f64 * 0.1, 1e-9);

        let log = simulation.diagnostic_log();
        assert_eq!(log.total_steps as u64, steps);
        assert_eq!(log.total_spawned, 1);
        assert_eq!(log.total_arrived, 1);
    }

    #[test]
    fn test_obstacle_forces_detour() {
        let mut grid = Grid::new(5, 3, Neighbourhood::Moore);
        grid.set_obstacle(Position::new(2, 0)).unwrap();
        grid.set_obstacle(Position::new(2, 1)).unwrap();
        let mut simulation = simulation(
            grid,
            vec![Position::new(0, 1)],
            vec![Position::new(4, 1)],
            1,
            SimulationOptions::default(),
        );

        let mut path = Vec::new();
        for _ in 0..500 {
            simulation.step().unwrap();
            if let Some(pedestrian) = simulation.pedestrians().first() {
                path = pedestrian.path().to_vec();
            }
            if simulation.is_done() {
                break;
            }
        }

        assert!(simulation.is_done());
        assert_eq!(simulation.targets()[0].exit_count(), 1);
        assert!(path.contains(&Position::new(2, 2)));
        assert!(!path.contains(&Position::new(2, 1)));
        assert!(!path.contains(&Position::new(2, 0)));
    }

    #[test]
    fn test_crowd_keeps_grid_consistent() {
        init_logger();
        let grid = Grid::new(8, 8, Neighbourhood::Moore);
        let spawn: Vec<_> = (0..8).map(|y| Position::new(0, y)).collect();
        let exit: Vec<_> = (0..8).map(|y| Position::new(7, y)).collect();
        let options = SimulationOptions {
            last_position_bias: Some(0.5),
            ..Default::default()
        };
        let mut simulation = simulation(grid, spawn, exit, 24, options);

        for _ in 0..400 {
            simulation.step().unwrap();
            assert_consistent(&simulation);
        }

        let log = simulation.diagnostic_log();
        assert_eq!(
            log.total_spawned,
            log.total_arrived + simulation.pedestrians().len()
        );
        assert_eq!(
            simulation.targets()[0].exit_count(),
            log.total_arrived
        );
        assert!(log.total_arrived > 0);
    }

    #[test]
    fn test_fields_follow_pedestrians() {
        let grid = Grid::new(6, 6, Neighbourhood::Moore);
        let mut simulation = simulation(
            grid,
            vec![Position::new(2, 2)],
            vec![Position::new(5, 5)],
            1,
            SimulationOptions::default(),
        );
        assert!(simulation.social_distancing_heatmap().is_none());

        simulation.step().unwrap();

        let social = simulation.social_distancing_heatmap().unwrap();
        assert!(social.get(Position::new(2, 2)).unwrap() > 0.0);
        assert_eq!(social.get(Position::new(5, 0)), Ok(0.0));
        let obstacle = simulation.obstacle_repulsion_heatmap().unwrap();
        assert!(obstacle.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_waypoint_search() {
        let grid = Grid::new(7, 3, Neighbourhood::Moore);
        let options = SimulationOptions {
            waypoints: WaypointOptions::from_parts(
                Some(-0.5),
                Some(3.0),
                Some(Box::new(ShortestPathGenerator::new(Distance::euclidean(1.0)))),
            )
            .unwrap(),
            ..Default::default()
        };
        let mut simulation = simulation(
            grid,
            vec![Position::new(0, 1)],
            vec![Position::new(6, 1)],
            1,
            options,
        );
        simulation.update(0.1).unwrap();

        let pedestrian = &simulation.pedestrians()[0];
        let cell = simulation.find_waypoint_cell(pedestrian).unwrap();
        assert_eq!(cell, Some(Position::new(3, 1)));

        simulation.create_waypoint(0, Position::new(3, 1)).unwrap();
        let id = simulation.pedestrians()[0].waypoint().unwrap();
        assert_eq!(simulation.waypoints().len(), 1);
        assert_eq!(simulation.waypoints()[0].id(), id);
        assert_eq!(simulation.waypoints()[0].pedestrian(), simulation.pedestrians()[0].id());

        for _ in 0..100 {
            simulation.step().unwrap();
            if simulation.waypoints().is_empty() {
                break;
            }
        }
        assert!(simulation.waypoints().is_empty());
        let pedestrian = &simulation.pedestrians()[0];
        assert_eq!(pedestrian.waypoint(), None);
        assert!(pedestrian.path().contains(&Position::new(3, 1)));
    }

    #[test]
    fn test_partial_waypoint_options() {
        let error = WaypointOptions::from_parts(Some(1.0), None, None).unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidConfiguration);
        match error {
            SimulationError::InvalidConfig(issues) => {
                assert_eq!(issues.len(), 2);
                assert_eq!(issues[0].field, "waypoints.distance");
                assert_eq!(issues[1].field, "waypoints.generator");
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(WaypointOptions::from_parts(None, None, None).unwrap().is_none());
    }

    #[test]
    fn test_invalid_setup_lists_every_issue() {
        let grid = Grid::new(4, 4, Neighbourhood::Moore);
        let distance = Distance::default();
        let target = Target::new(
            "exit",
            vec![Position::new(4, 0)],
            Box::new(FastMarchingGenerator::new(distance)),
        );
        let spawner = Spawner::new("entrance", vec![Position::new(0, 0)], vec![TargetId(3)], distance);
        let options = SimulationOptions {
            time_resolution: 0.0,
            ..Default::default()
        };

        let result = Simulation::new(
            grid,
            distance,
            vec![target],
            vec![spawner],
            RepulsionGenerator::social_distancing(distance, 2.0, 2.0),
            None,
            options,
        );

        match result {
            Err(SimulationError::InvalidConfig(issues)) => {
                let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec!["time_resolution", "targets.exit.cells", "spawners.entrance.targets"]
                );
            }
            _ => panic!("setup should be rejected"),
        }
    }

    #[test]
    fn test_queries() {
        let grid = Grid::new(10, 10, Neighbourhood::Moore);
        let simulation = simulation(
            grid,
            vec![Position::new(0, 0)],
            vec![Position::new(9, 9), Position::new(9, 8)],
            1,
            SimulationOptions::default(),
        );

        assert_float_absolute_eq!(simulation.max_grid_distance(), 200f64.sqrt());
        assert_eq!(simulation.target_at(9, 8).map(Target::name), Some("exit"));
        assert!(simulation.target_at(0, 0).is_none());
        assert!(!simulation.is_done());
        assert_eq!(simulation.spawners()[0].id(), SpawnerId(0));
        assert!(format!("{simulation:?}").starts_with("Simulation"));
    }
}
