//! Scenario files.
//!
//! A scenario is a TOML document describing the grid, its obstacles, targets
//! and spawners, and the behaviour options of the simulation. Parsing only
//! checks the document shape; [`Scenario::build`] validates the content and
//! reports every problem it finds at once.

use std::{fs, path::Path, str::FromStr};

use anyhow::Context;
use geo::Line;
use geo_rasterize::BinaryBuilder;
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::{
    distance::{Distance, DistanceKind},
    error::{ConfigIssue, SimResult, SimulationError},
    grid::{CellState, CellStates, Grid},
    heatmaps::{GeneratorKind, HeatmapGenerator, RepulsionGenerator},
    neighbourhood::Neighbourhood,
    position::Position,
    spawner::{Spawner, TargetingStrategy},
    target::{Target, TargetId},
    Simulation, SimulationOptions, WaypointOptions,
};

fn default_name() -> String {
    String::from("scenario")
}

const fn f_time_resolution() -> f64 {
    0.1
}

const fn f_one() -> f64 {
    1.0
}

const fn f_three() -> f64 {
    3.0
}

const fn one() -> usize {
    1
}

fn moore() -> String {
    String::from("moore")
}

fn euclidean() -> String {
    String::from("euclidean")
}

fn dijkstra() -> String {
    String::from("dijkstra")
}

fn random() -> String {
    String::from("random")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "f_time_resolution")]
    pub time_resolution: f64,
    pub grid: GridConfig,
    #[serde(default)]
    pub distance: DistanceConfig,
    #[serde(default)]
    pub social_distancing: RepulsionConfig,
    pub obstacle_repulsion: Option<RepulsionConfig>,
    #[serde(default)]
    pub behaviour: BehaviourConfig,
    #[serde(default)]
    pub waypoints: WaypointConfig,
    #[serde(default)]
    pub obstacles: AreaConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub spawners: Vec<SpawnerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    pub width: usize,
    pub height: usize,
    #[serde(default = "moore")]
    pub neighbourhood: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistanceConfig {
    #[serde(default = "euclidean")]
    pub kind: String,
    #[serde(default = "f_one")]
    pub scale: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        DistanceConfig {
            kind: euclidean(),
            scale: 1.0,
        }
    }
}

/// Footprint of a repulsion bump, in distance units.
#[derive(Debug, Clone, Deserialize)]
pub struct RepulsionConfig {
    #[serde(default = "f_three")]
    pub width: f64,
    #[serde(default = "f_three")]
    pub height: f64,
}

impl Default for RepulsionConfig {
    fn default() -> Self {
        RepulsionConfig {
            width: 3.0,
            height: 3.0,
        }
    }
}

/// Option that can be switched off with `false`, kept at its default with
/// `true`, or given a value.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Setting {
    Enabled(bool),
    Value(f64),
}

impl Setting {
    pub fn resolve(self, default: f64) -> Option<f64> {
        match self {
            Setting::Enabled(true) => Some(default),
            Setting::Enabled(false) => None,
            Setting::Value(value) => Some(value),
        }
    }
}

impl Default for Setting {
    fn default() -> Self {
        Setting::Enabled(true)
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviourConfig {
    pub occupation_bias_modifier: Setting,
    pub retargeting_threshold: Setting,
    pub last_position_bias: Option<f64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    pub threshold: Option<f64>,
    pub distance: Option<f64>,
    pub generator: Option<String>,
    pub blocked: Option<Vec<String>>,
}

/// Set of cells given as single cells, inclusive rectangles and line segments.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    pub cells: Vec<[i32; 2]>,
    pub rects: Vec<RectConfig>,
    /// Segments between cell coordinates, rasterized onto the grid.
    pub lines: Vec<[[f64; 2]; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RectConfig {
    pub min: [i32; 2],
    pub max: [i32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(flatten)]
    pub area: AreaConfig,
    #[serde(default = "dijkstra")]
    pub generator: String,
    pub blocked: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnerConfig {
    pub name: String,
    #[serde(flatten)]
    pub area: AreaConfig,
    pub targets: Vec<String>,
    pub total_spawns: Option<u32>,
    #[serde(default = "one")]
    pub batch_size: usize,
    #[serde(default)]
    pub spawn_delay: f64,
    #[serde(default)]
    pub initial_delay: f64,
    #[serde(default = "random")]
    pub strategy: String,
}

impl Scenario {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    /// Validate the scenario and set up a simulation from it.
    pub fn build(&self) -> SimResult<Simulation> {
        let mut issues = Vec::new();

        if self.grid.width == 0 || self.grid.height == 0 {
            issues.push(ConfigIssue::new("grid", "width and height must be positive"));
        }
        let neighbourhood: Neighbourhood =
            parse(&self.grid.neighbourhood, "grid.neighbourhood", &mut issues).unwrap_or_default();
        let kind = parse(&self.distance.kind, "distance.kind", &mut issues)
            .unwrap_or(DistanceKind::Euclidean);
        if !is_positive(self.distance.scale) {
            issues.push(ConfigIssue::new("distance.scale", "must be positive and finite"));
        }
        if !is_positive(self.time_resolution) {
            issues.push(ConfigIssue::new("time_resolution", "must be positive and finite"));
        }
        let distance = Distance::new(kind, self.distance.scale);

        let mut grid = Grid::new(self.grid.width, self.grid.height, neighbourhood);
        for position in self.obstacles.positions(&grid, "obstacles", &mut issues) {
            if let Err(err) = grid.set_obstacle(position) {
                issues.push(ConfigIssue::new("obstacles", err.to_string()));
            }
        }

        let social_distancing = self.social_distancing.build(
            distance,
            CellStates::OCCUPIED,
            "social_distancing",
            &mut issues,
        );
        let obstacle_repulsion = self.obstacle_repulsion.as_ref().map(|config| {
            config.build(distance, CellStates::OBSTACLE, "obstacle_repulsion", &mut issues)
        });

        let targets: Vec<Target> = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, config)| config.build(i, distance, &grid, &mut issues))
            .collect();
        let mut names = FxHashSet::default();
        for config in &self.targets {
            if !names.insert(config.name.as_str()) {
                issues.push(ConfigIssue::new(
                    "targets",
                    format!("duplicate target name {:?}", config.name),
                ));
            }
        }

        let spawners: Vec<Spawner> = self
            .spawners
            .iter()
            .enumerate()
            .map(|(i, config)| config.build(i, &self.targets, distance, &grid, &mut issues))
            .collect();

        let waypoints = self.waypoints.build(distance, &mut issues);

        if !issues.is_empty() {
            return Err(SimulationError::InvalidConfig(issues));
        }

        let options = SimulationOptions {
            name: self.name.clone(),
            time_resolution: self.time_resolution,
            seed: self.seed,
            occupation_bias_modifier: self.behaviour.occupation_bias_modifier.resolve(1.0),
            retargeting_threshold: self.behaviour.retargeting_threshold.resolve(-1.0),
            last_position_bias: self.behaviour.last_position_bias,
            waypoints,
        };

        Simulation::new(
            grid,
            distance,
            targets,
            spawners,
            social_distancing,
            obstacle_repulsion,
            options,
        )
    }
}

impl RepulsionConfig {
    fn build(
        &self,
        distance: Distance,
        blocked: CellStates,
        field: &str,
        issues: &mut Vec<ConfigIssue>,
    ) -> RepulsionGenerator {
        if !is_positive(self.width) || !is_positive(self.height) {
            issues.push(ConfigIssue::new(
                field,
                "width and height must be positive and finite",
            ));
        }
        RepulsionGenerator::with_blocked(distance, self.width, self.height, blocked)
    }
}

impl WaypointConfig {
    fn build(&self, distance: Distance, issues: &mut Vec<ConfigIssue>) -> Option<WaypointOptions> {
        let generator = self.generator.as_ref().and_then(|name| {
            let blocked = self
                .blocked
                .as_deref()
                .map_or(CellStates::OBSTACLE, |names| {
                    parse_states(names, "waypoints.blocked", issues)
                });
            parse::<GeneratorKind>(name, "waypoints.generator", issues)
                .map(|kind| kind.build(distance, blocked))
        });
        if self.distance.is_some_and(|d| !is_positive(d)) {
            issues.push(ConfigIssue::new("waypoints.distance", "must be positive and finite"));
        }

        // An unparsable generator has been reported already.
        if self.generator.is_some() && generator.is_none() {
            return None;
        }

        match WaypointOptions::from_parts(self.threshold, self.distance, generator) {
            Ok(options) => options,
            Err(SimulationError::InvalidConfig(more)) => {
                issues.extend(more);
                None
            }
            Err(err) => {
                issues.push(ConfigIssue::new("waypoints", err.to_string()));
                None
            }
        }
    }
}

impl TargetConfig {
    fn build(
        &self,
        index: usize,
        distance: Distance,
        grid: &Grid,
        issues: &mut Vec<ConfigIssue>,
    ) -> Target {
        let field = format!("targets[{index}]");
        let cells = self.area.positions(grid, &field, issues);
        if cells.is_empty() {
            issues.push(ConfigIssue::new(&field, "has no cells"));
        }

        let blocked = self
            .blocked
            .as_deref()
            .map_or(CellStates::OBSTACLE, |names| {
                parse_states(names, &format!("{field}.blocked"), issues)
            });
        let generator: Box<dyn HeatmapGenerator> =
            parse::<GeneratorKind>(&self.generator, &format!("{field}.generator"), issues)
                .unwrap_or(GeneratorKind::ShortestPath)
                .build(distance, blocked);

        Target::new(&self.name, cells, generator)
    }
}

impl SpawnerConfig {
    fn build(
        &self,
        index: usize,
        targets: &[TargetConfig],
        distance: Distance,
        grid: &Grid,
        issues: &mut Vec<ConfigIssue>,
    ) -> Spawner {
        let field = format!("spawners[{index}]");
        let cells = self.area.positions(grid, &field, issues);
        if cells.is_empty() {
            issues.push(ConfigIssue::new(&field, "has no cells"));
        }
        if self.targets.is_empty() {
            issues.push(ConfigIssue::new(format!("{field}.targets"), "must name at least one target"));
        }

        let mut target_ids = Vec::with_capacity(self.targets.len());
        for name in &self.targets {
            match targets.iter().position(|t| &t.name == name) {
                Some(i) => target_ids.push(TargetId(i)),
                None => issues.push(ConfigIssue::new(
                    format!("{field}.targets"),
                    format!("unknown target {name:?}"),
                )),
            }
        }

        if self.batch_size == 0 {
            issues.push(ConfigIssue::new(format!("{field}.batch_size"), "must be positive"));
        }
        if self.spawn_delay < 0.0 {
            issues.push(ConfigIssue::new(format!("{field}.spawn_delay"), "must not be negative"));
        }
        let strategy: TargetingStrategy =
            parse(&self.strategy, &format!("{field}.strategy"), issues).unwrap_or_default();

        Spawner::new(&self.name, cells, target_ids, distance)
            .with_strategy(strategy)
            .with_total_spawns(self.total_spawns)
            .with_batch_size(self.batch_size)
            .with_spawn_delay(self.spawn_delay)
            .with_initial_delay(self.initial_delay)
    }
}

impl AreaConfig {
    /// In-bounds cells of the area without duplicates, in declaration order.
    /// Out of bounds cells are reported.
    pub fn positions(&self, grid: &Grid, field: &str, issues: &mut Vec<ConfigIssue>) -> Vec<Position> {
        let mut seen = FxHashSet::default();
        let mut positions = Vec::new();
        let mut add = |position: Position, issues: &mut Vec<ConfigIssue>| {
            if !grid.is_in_bounds(position) {
                issues.push(ConfigIssue::new(field, format!("{position} is outside of the grid")));
            } else if seen.insert(position) {
                positions.push(position);
            }
        };

        for &[x, y] in &self.cells {
            add(Position::new(x, y), issues);
        }

        for rect in &self.rects {
            let [x0, y0] = rect.min;
            let [x1, y1] = rect.max;
            if x0 > x1 || y0 > y1 {
                issues.push(ConfigIssue::new(field, "rect min must not exceed max"));
                continue;
            }
            for y in y0..=y1 {
                for x in x0..=x1 {
                    add(Position::new(x, y), issues);
                }
            }
        }

        for &line in &self.lines {
            match rasterize_line(line, grid.width(), grid.height()) {
                Ok(cells) => cells.into_iter().for_each(|p| add(p, issues)),
                Err(message) => issues.push(ConfigIssue::new(field, message)),
            }
        }

        positions
    }
}

/// Cells touched by a segment joining two cell centers.
fn rasterize_line(line: [[f64; 2]; 2], width: usize, height: usize) -> Result<Vec<Position>, String> {
    let shape = Line::from(line.map(|[x, y]| (x + 0.5, y + 0.5)));

    let mut rasterizer = BinaryBuilder::new()
        .width(width)
        .height(height)
        .build()
        .map_err(|err| format!("cannot rasterize line: {err:?}"))?;
    rasterizer
        .rasterize(&shape)
        .map_err(|err| format!("cannot rasterize line: {err:?}"))?;

    Ok(rasterizer
        .finish()
        .indexed_iter()
        .filter(|&(_, &hit)| hit)
        .map(|((y, x), _)| Position::new(x as i32, y as i32))
        .collect())
}

/// Finite and strictly above zero.
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn parse<T>(value: &str, field: &str, issues: &mut Vec<ConfigIssue>) -> Option<T>
where
    T: FromStr<Err = SimulationError>,
{
    match value.parse() {
        Ok(value) => Some(value),
        Err(err) => {
            issues.push(ConfigIssue::new(field, err.to_string()));
            None
        }
    }
}

fn parse_states(names: &[String], field: &str, issues: &mut Vec<ConfigIssue>) -> CellStates {
    names
        .iter()
        .filter_map(|name| parse::<CellState>(name, field, issues))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const CORRIDOR: &str = r#"
        name = "corridor"
        seed = 7

        [grid]
        width = 10
        height = 4

        [obstacles]
        lines = [[[4, 0], [4, 2]]]

        [[targets]]
        name = "exit"
        rects = [{ min = [9, 0], max = [9, 3] }]

        [[spawners]]
        name = "entrance"
        cells = [[0, 0], [0, 1], [0, 2], [0, 3]]
        targets = ["exit"]
        total_spawns = 6
        batch_size = 2
        spawn_delay = 0.5
    "#;

    #[test]
    fn test_parse_defaults() {
        let scenario = Scenario::from_toml_str(CORRIDOR).unwrap();
        assert_eq!(scenario.name, "corridor");
        assert_eq!(scenario.time_resolution, 0.1);
        assert_eq!(scenario.grid.neighbourhood, "moore");
        assert_eq!(scenario.distance.kind, "euclidean");
        assert_eq!(scenario.social_distancing.width, 3.0);
        assert!(scenario.obstacle_repulsion.is_none());
        assert_eq!(scenario.targets[0].generator, "dijkstra");
        assert_eq!(scenario.spawners[0].strategy, "random");
        assert_eq!(scenario.spawners[0].initial_delay, 0.0);
        assert_eq!(scenario.behaviour.occupation_bias_modifier, Setting::Enabled(true));
    }

    #[test]
    fn test_build_and_run() {
        let scenario = Scenario::from_toml_str(CORRIDOR).unwrap();
        let mut simulation = scenario.build().unwrap();

        let grid = simulation.grid();
        assert!(grid.cell(Position::new(4, 1)).unwrap().is_obstacle());
        assert!(grid.cell(Position::new(4, 3)).unwrap().is_free());
        assert!(grid.cell(Position::new(3, 1)).unwrap().is_free());
        assert_eq!(simulation.targets()[0].cells().len(), 4);
        assert_eq!(simulation.spawners()[0].batch_size(), 2);
        assert_eq!(simulation.options().occupation_bias_modifier, Some(1.0));
        assert_eq!(simulation.options().retargeting_threshold, Some(-1.0));

        simulation.run(3000).unwrap();

        assert!(simulation.is_done());
        assert_eq!(simulation.targets()[0].exit_count(), 6);
        assert_eq!(simulation.diagnostic_log().scenario, "corridor");
    }

    #[test]
    fn test_every_issue_is_reported() {
        let source = r#"
            time_resolution = 0.0

            [grid]
            width = 5
            height = 5
            neighbourhood = "hexagonal"

            [distance]
            kind = "chebyshev"

            [waypoints]
            threshold = -1.0

            [obstacles]
            cells = [[5, 5]]

            [[targets]]
            name = "exit"
            cells = [[4, 4]]
            generator = "a_star"
            blocked = ["obstacle", "wall"]

            [[spawners]]
            name = "entrance"
            cells = [[0, 0]]
            targets = ["exit", "roof"]
            strategy = "nearest"
        "#;
        let scenario = Scenario::from_toml_str(source).unwrap();

        let error = scenario.build().unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidConfiguration);
        let SimulationError::InvalidConfig(issues) = error else {
            panic!("expected configuration issues");
        };
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "grid.neighbourhood",
                "distance.kind",
                "time_resolution",
                "obstacles",
                "targets[0].blocked",
                "targets[0].generator",
                "spawners[0].targets",
                "spawners[0].strategy",
                "waypoints.distance",
                "waypoints.generator",
            ]
        );
        assert!(issues[7].message.contains("nearest"));
    }

    #[test]
    fn test_disabled_settings() {
        let source = r#"
            [grid]
            width = 3
            height = 3
            neighbourhood = "von_neumann"

            [distance]
            kind = "taxicab"
            scale = 0.5

            [behaviour]
            occupation_bias_modifier = false
            retargeting_threshold = -2

            [waypoints]
            threshold = -0.5
            distance = 2.0
            generator = "fast_marching"
            blocked = ["obstacle", "occupied"]

            [[targets]]
            name = "exit"
            cells = [[2, 2]]
            generator = "fmm"

            [[spawners]]
            name = "entrance"
            cells = [[0, 0]]
            targets = ["exit"]
            strategy = "closest"
        "#;
        let scenario = Scenario::from_toml_str(source).unwrap();
        let simulation = scenario.build().unwrap();

        let options = simulation.options();
        assert_eq!(options.occupation_bias_modifier, None);
        assert_eq!(options.retargeting_threshold, Some(-2.0));
        let waypoints = options.waypoints.as_ref().unwrap();
        assert_eq!(waypoints.distance, 2.0);
        assert!(waypoints.generator.blocked().contains(CellState::Occupied));
        assert_eq!(simulation.grid().neighbourhood(), Neighbourhood::VonNeumann);
        assert_eq!(simulation.distance(), Distance::taxicab(0.5));
        assert_eq!(simulation.spawners()[0].strategy(), TargetingStrategy::Closest);
        assert_eq!(simulation.spawners()[0].remaining_spawns(), None);
    }

    #[test]
    fn test_infinite_sizes_are_rejected() {
        let source = r#"
            time_resolution = inf

            [grid]
            width = 4
            height = 4

            [distance]
            scale = inf

            [social_distancing]
            width = inf

            [waypoints]
            threshold = -1.0
            distance = inf
            generator = "dijkstra"

            [[targets]]
            name = "exit"
            cells = [[3, 3]]

            [[spawners]]
            name = "entrance"
            cells = [[0, 0]]
            targets = ["exit"]
        "#;
        let scenario = Scenario::from_toml_str(source).unwrap();

        let Err(SimulationError::InvalidConfig(issues)) = scenario.build() else {
            panic!("infinite sizes should be rejected");
        };
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "distance.scale",
                "time_resolution",
                "social_distancing",
                "waypoints.distance",
            ]
        );
    }

    #[test]
    fn test_area_cells() {
        let grid = Grid::new(6, 6, Neighbourhood::Moore);
        let area = AreaConfig {
            cells: vec![[0, 0], [1, 1]],
            rects: vec![RectConfig {
                min: [0, 0],
                max: [1, 1],
            }],
            lines: vec![[[3.0, 0.0], [3.0, 5.0]]],
        };
        let mut issues = Vec::new();

        let cells = area.positions(&grid, "area", &mut issues);

        assert!(issues.is_empty());
        assert_eq!(&cells[..4], &[
            Position::new(0, 0),
            Position::new(1, 1),
            Position::new(1, 0),
            Position::new(0, 1),
        ]);
        for y in 1..5 {
            assert!(cells.contains(&Position::new(3, y)));
        }
        assert!(!cells.contains(&Position::new(2, 2)));
        assert!(!cells.contains(&Position::new(4, 2)));
    }

    #[test]
    fn test_load_scenario_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/corridor.toml");
        let scenario = Scenario::from_path(path).unwrap();
        assert!(scenario.build().is_ok());

        let error = Scenario::from_path("scenarios/missing.toml").unwrap_err();
        assert!(error.to_string().contains("missing.toml"));
    }
}
