use serde::Serialize;

#[derive(Debug, Default, Clone, Serialize)]
pub struct DiagnosticLog {
    pub scenario: String,
    pub total_steps: usize,
    pub total_spawned: usize,
    pub total_arrived: usize,
    pub step_metrics: StepMetricsCollection,
}

impl DiagnosticLog {
    pub fn new(scenario: impl Into<String>) -> Self {
        DiagnosticLog {
            scenario: scenario.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, step_metrics: StepMetrics) {
        self.total_spawned += step_metrics.spawned;
        self.total_arrived += step_metrics.arrived;
        self.step_metrics.push(step_metrics);
        self.total_steps += 1;
    }
}

/// Step metrics stored column by column.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StepMetricsCollection {
    pub active_ped_count: Vec<usize>,
    pub spawned: Vec<usize>,
    pub arrived: Vec<usize>,
    pub moved: Vec<usize>,
    pub retargeted: Vec<usize>,
    pub waypoints_created: Vec<usize>,
    pub time_spawn: Vec<f64>,
    pub time_fields: Vec<f64>,
    pub time_resolve: Vec<f64>,
}

impl StepMetricsCollection {
    pub fn push(&mut self, metrics: StepMetrics) {
        self.active_ped_count.push(metrics.active_ped_count);
        self.spawned.push(metrics.spawned);
        self.arrived.push(metrics.arrived);
        self.moved.push(metrics.moved);
        self.retargeted.push(metrics.retargeted);
        self.waypoints_created.push(metrics.waypoints_created);
        self.time_spawn.push(metrics.time_spawn);
        self.time_fields.push(metrics.time_fields);
        self.time_resolve.push(metrics.time_resolve);
    }

    pub fn len(&self) -> usize {
        self.active_ped_count.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_ped_count.is_empty()
    }
}

/// What happened during one tick. Times are wall-clock seconds.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StepMetrics {
    pub step: u64,
    pub active_ped_count: usize,
    pub spawned: usize,
    pub arrived: usize,
    pub moved: usize,
    pub retargeted: usize,
    pub waypoints_created: usize,
    pub time_spawn: f64,
    pub time_fields: f64,
    pub time_resolve: f64,
}
