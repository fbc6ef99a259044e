use crate::{
    validate_goal, LqrWeights, QuadrotorParams, RiccatiOptions, ScheduledEvents, SimEvent,
    SimulationError, State, Viewport,
};
use nalgebra::{Matrix2, Matrix6, Vector6};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;

#[derive(Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub quadrotor: QuadrotorConfig,
    pub controller: ControllerConfig,
    pub viewport: ViewportConfig,
    pub goal_schedule: Vec<GoalPick>,
    pub visualization: VisualizationConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    pub dt: f64,
    /// Seconds of simulated time before the run terminates and exports its plots
    pub duration: f64,
    pub realtime: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct QuadrotorConfig {
    pub mass: f64,
    pub arm_length: f64,
    pub inertia: f64,
    pub gravity: f64,
    pub initial_state: [f64; 6],
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    pub goal: [f64; 6],
    pub q_diagonal: [f64; 6],
    /// Row-major control effort weights
    pub r: [[f64; 2]; 2],
    pub tolerance: f64,
    pub max_iterations: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ViewportConfig {
    pub width: u32,
    pub height: u32,
    pub pixels_per_meter: f64,
}

/// A scripted position pick, fired at the start of `step`
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GoalPick {
    pub step: usize,
    pub pixel: [i32; 2],
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct VisualizationConfig {
    pub enabled: bool,
    /// Record to this `.rrd` file instead of spawning a viewer
    pub save_path: Option<String>,
    pub render_interval: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: 0.001,
            duration: 10.0,
            realtime: false,
        }
    }
}

impl Default for QuadrotorConfig {
    fn default() -> Self {
        let params = QuadrotorParams::default();
        Self {
            mass: params.mass,
            arm_length: params.arm_length,
            inertia: params.inertia,
            gravity: params.gravity,
            initial_state: [0.0; 6],
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let weights = LqrWeights::default();
        let options = RiccatiOptions::default();
        Self {
            goal: [0.0; 6],
            q_diagonal: weights.q.diagonal().into(),
            r: [
                [weights.r[(0, 0)], weights.r[(0, 1)]],
                [weights.r[(1, 0)], weights.r[(1, 1)]],
            ],
            tolerance: options.tolerance,
            max_iterations: options.max_iterations,
        }
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        let viewport = Viewport::default();
        Self {
            width: viewport.width,
            height: viewport.height,
            pixels_per_meter: viewport.pixels_per_meter,
        }
    }
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            save_path: None,
            render_interval: 10,
        }
    }
}

impl Config {
    /// Loads a configuration from a YAML file; missing keys take their defaults
    /// # Errors
    /// * `IoError` if the file cannot be read, `YamlError` if it cannot be parsed
    pub fn from_yaml(filename: &str) -> Result<Self, SimulationError> {
        let mut contents = String::new();
        File::open(filename)?.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, SimulationError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Rejects any configuration the simulation must not start with
    /// # Errors
    /// * `InvalidConfig` for bad physical constants, timestep, weights or viewport
    /// * `InvalidGoal` if the initial goal is not a hover pose
    pub fn validate(&self) -> Result<(), SimulationError> {
        let sim = &self.simulation;
        if !(sim.dt.is_finite() && sim.dt > 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "dt must be positive, got {}",
                sim.dt
            )));
        }
        if !(sim.duration.is_finite() && sim.duration >= 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "duration must be non-negative, got {}",
                sim.duration
            )));
        }
        self.quadrotor_params().validate()?;
        if self.initial_state().iter().any(|v| !v.is_finite()) {
            return Err(SimulationError::InvalidConfig(
                "initial_state must be finite".to_string(),
            ));
        }
        if self.controller.q_diagonal.iter().any(|&q| !(q >= 0.0)) {
            return Err(SimulationError::InvalidConfig(
                "q_diagonal entries must be non-negative".to_string(),
            ));
        }
        self.lqr_weights().validate()?;
        let options = self.riccati_options();
        if !(options.tolerance.is_finite() && options.tolerance > 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                options.tolerance
            )));
        }
        if options.max_iterations == 0 {
            return Err(SimulationError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        validate_goal(&self.goal())?;
        self.viewport()?;
        Ok(())
    }

    pub fn quadrotor_params(&self) -> QuadrotorParams {
        QuadrotorParams {
            mass: self.quadrotor.mass,
            arm_length: self.quadrotor.arm_length,
            inertia: self.quadrotor.inertia,
            gravity: self.quadrotor.gravity,
        }
    }

    pub fn initial_state(&self) -> State {
        State::from(self.quadrotor.initial_state)
    }

    pub fn goal(&self) -> State {
        State::from(self.controller.goal)
    }

    pub fn lqr_weights(&self) -> LqrWeights {
        let [[r00, r01], [r10, r11]] = self.controller.r;
        LqrWeights {
            q: Matrix6::from_diagonal(&Vector6::from(self.controller.q_diagonal)),
            r: Matrix2::new(r00, r01, r10, r11),
        }
    }

    pub fn riccati_options(&self) -> RiccatiOptions {
        RiccatiOptions {
            tolerance: self.controller.tolerance,
            max_iterations: self.controller.max_iterations,
        }
    }

    pub fn viewport(&self) -> Result<Viewport, SimulationError> {
        Viewport::new(
            self.viewport.width,
            self.viewport.height,
            self.viewport.pixels_per_meter,
        )
    }

    /// Position picks from `goal_schedule` plus a terminate event once `duration` has elapsed
    pub fn event_schedule(&self) -> ScheduledEvents {
        let schedule = self
            .goal_schedule
            .iter()
            .map(|pick| {
                let [x, y] = pick.pixel;
                (pick.step, SimEvent::PickPosition { x, y })
            })
            .collect();
        let terminate_at = (self.simulation.duration / self.simulation.dt).round() as usize;
        ScheduledEvents::new(schedule, Some(terminate_at))
    }
}
