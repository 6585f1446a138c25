use std::str::FromStr;

use fastrand_contrib::RngExt;
use log::{trace, warn};
use ordered_float::OrderedFloat;

use crate::{
    distance::Distance,
    error::{ConfigIssue, SimResult, SimulationError},
    grid::Grid,
    pedestrian::{IdGenerator, Pedestrian},
    position::Position,
    target::{Target, TargetId},
};

const SPEED_MEAN: f64 = 1.34;
const SPEED_DEVIATION: f64 = 0.26;
const SPEED_MIN: f64 = 0.1;
const SPEED_MAX: f64 = 3.0;

/// Index of a spawner in the simulation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpawnerId(pub usize);

/// How a spawner assigns one of its targets to a new pedestrian.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TargetingStrategy {
    #[default]
    Random,
    Closest,
    Farthest,
}

impl FromStr for TargetingStrategy {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(TargetingStrategy::Random),
            "closest" => Ok(TargetingStrategy::Closest),
            "farthest" => Ok(TargetingStrategy::Farthest),
            _ => Err(SimulationError::unsupported("targeting strategy", s)),
        }
    }
}

/// Releases pedestrians in batches from a pool of cells.
#[derive(Debug, Clone)]
pub struct Spawner {
    id: SpawnerId,
    name: String,
    cells: Vec<Position>,
    targets: Vec<TargetId>,
    strategy: TargetingStrategy,
    /// `None` spawns forever.
    total_spawns: Option<u32>,
    batch_size: usize,
    spawn_delay: f64,
    current_delay: f64,
    distance: Distance,
}

impl Spawner {
    /// Spawner releasing one pedestrian per tick, forever, with random targeting.
    pub fn new(
        name: impl Into<String>,
        cells: Vec<Position>,
        targets: Vec<TargetId>,
        distance: Distance,
    ) -> Self {
        Spawner {
            id: SpawnerId::default(),
            name: name.into(),
            batch_size: cells.len().min(1),
            cells,
            targets,
            strategy: TargetingStrategy::Random,
            total_spawns: None,
            spawn_delay: 0.0,
            current_delay: 0.0,
            distance,
        }
    }

    pub fn with_strategy(mut self, strategy: TargetingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_total_spawns(mut self, total_spawns: Option<u32>) -> Self {
        self.total_spawns = total_spawns;
        self
    }

    /// Batch size is capped by the number of cells in the pool.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.min(self.cells.len());
        self
    }

    pub fn with_spawn_delay(mut self, spawn_delay: f64) -> Self {
        self.spawn_delay = spawn_delay;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: f64) -> Self {
        self.current_delay = initial_delay;
        self
    }

    pub(crate) fn set_id(&mut self, id: SpawnerId) {
        self.id = id;
    }

    pub fn id(&self) -> SpawnerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Position] {
        &self.cells
    }

    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn strategy(&self) -> TargetingStrategy {
        self.strategy
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Pedestrians left to spawn, `None` if unlimited.
    pub fn remaining_spawns(&self) -> Option<u32> {
        self.total_spawns
    }

    pub fn current_delay(&self) -> f64 {
        self.current_delay
    }

    pub fn is_done(&self) -> bool {
        self.total_spawns == Some(0)
    }

    fn can_spawn(&self) -> bool {
        !self.is_done() && self.current_delay <= 0.0
    }

    /// Advance the delay and release a batch when due.
    ///
    /// Returned pedestrians stand on free cells of the pool, but the grid is
    /// not modified; the caller places them.
    pub fn update(
        &mut self,
        dt: f64,
        grid: &Grid,
        targets: &[Target],
        rng: &mut fastrand::Rng,
        ids: &mut IdGenerator,
    ) -> SimResult<Vec<Pedestrian>> {
        if !self.is_done() {
            self.current_delay -= dt;
        }
        if !self.can_spawn() {
            return Ok(Vec::new());
        }
        self.current_delay = self.spawn_delay;

        let mut free: Vec<Position> = self
            .cells
            .iter()
            .copied()
            .filter(|&cell| grid.cell(cell).is_ok_and(|c| c.is_free()))
            .collect();
        if free.is_empty() {
            warn!("Spawner {:?} is due but has no free cell", self.name);
            return Ok(Vec::new());
        }
        rng.shuffle(&mut free);

        let mut count = self.batch_size.min(free.len());
        if let Some(remaining) = self.total_spawns {
            count = count.min(remaining as usize);
        }

        let mut spawned = Vec::with_capacity(count);
        for &cell in &free[..count] {
            let target = self.choose_target(cell, targets, rng)?;
            let speed = rng
                .f64_normal_approx(SPEED_MEAN, SPEED_DEVIATION)
                .clamp(SPEED_MIN, SPEED_MAX);
            let pedestrian =
                Pedestrian::new(ids.next_pedestrian(), cell, speed, target, self.id, self.distance);
            trace!("Spawner {:?} released pedestrian {} at {cell}", self.name, pedestrian.id());
            spawned.push(pedestrian);

            if let Some(remaining) = self.total_spawns.as_mut() {
                *remaining -= 1;
            }
        }

        Ok(spawned)
    }

    fn choose_target(
        &self,
        position: Position,
        targets: &[Target],
        rng: &mut fastrand::Rng,
    ) -> SimResult<TargetId> {
        let distances = |id: TargetId| {
            targets
                .get(id.0)
                .into_iter()
                .flat_map(|t| t.cells())
                .map(move |&cell| OrderedFloat(self.distance.between(position, cell)))
        };

        let chosen = match self.strategy {
            TargetingStrategy::Random => rng.choice(self.targets.iter()).copied(),
            TargetingStrategy::Closest => self
                .targets
                .iter()
                .min_by_key(|id| distances(**id).min())
                .copied(),
            TargetingStrategy::Farthest => self
                .targets
                .iter()
                .max_by_key(|id| distances(**id).max())
                .copied(),
        };

        chosen.ok_or_else(|| {
            SimulationError::InvalidConfig(vec![ConfigIssue::new(
                format!("spawners.{}.targets", self.name),
                "no target to assign",
            )])
        })
    }
}
