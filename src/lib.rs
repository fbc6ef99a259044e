//! # Planar Quadrotor Simulation
//!
//! This crate simulates the rigid-body dynamics of a planar (2-D) quadrotor driven
//! toward a goal pose by a discrete-time linear-quadratic regulator.
//!
//! ## Features
//!
//! - Nonlinear planar quadrotor model with forward Euler integration
//! - Closed-form linearization about an arbitrary operating point
//! - First-order discretization of the continuous linear model
//! - Infinite-horizon LQR gain synthesis through the discrete Riccati recursion
//! - A fixed-timestep simulation loop fed by a goal/terminate event queue
//! - Integration with the `rerun` crate for rendering and trajectory plots
//!
//! ## Usage
//!
//! ```rust
//! use planar_quad::{
//!     LqrController, LqrWeights, NullSink, PlanarQuadrotor, QuadrotorParams, RiccatiOptions,
//!     Simulation, State, Viewport,
//! };
//!
//! let dt = 0.001;
//! let quad = PlanarQuadrotor::new(QuadrotorParams::default(), State::zeros()).unwrap();
//! let controller =
//!     LqrController::design(&quad, &LqrWeights::default(), dt, &RiccatiOptions::default())
//!         .unwrap();
//! let mut sim = Simulation::new(quad, controller, Viewport::default(), dt).unwrap();
//! sim.tick(&mut NullSink).unwrap();
//! assert_eq!(sim.history().len(), 1);
//! ```
pub mod config;

use nalgebra::{Matrix2, Matrix2x6, Matrix6, Matrix6x2, Vector2, Vector6};
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Planar quadrotor state `[x, y, theta, x_dot, y_dot, theta_dot]`
pub type State = Vector6<f64>;
/// Time derivative of [`State`]
pub type StateRate = Vector6<f64>;
/// Rotor thrust commands `[u1, u2]`
pub type Input = Vector2<f64>;
/// Feedback gain mapping a state deviation to an input correction
pub type Gain = Matrix2x6<f64>;

/// Largest `dt * ||A||_inf` accepted by [`discretize`]
pub const MAX_DISCRETIZATION_STEP: f64 = 0.1;
/// Smallest eigenvalue ratio accepted for `R + B'PB` before it is treated as singular
const GRAM_CONDITION_LIMIT: f64 = 1e-12;

#[derive(thiserror::Error, Debug)]
/// Represents errors that can occur during simulation
pub enum SimulationError {
    /// Error related to Rerun visualization
    #[error("Rerun error: {0}")]
    RerunError(#[from] rerun::RecordingStreamError),
    /// Error related to Rerun spawn process
    #[error("Rerun spawn error: {0}")]
    RerunSpawnError(#[from] rerun::SpawnError),
    /// Error reading the configuration file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// Error parsing the configuration file
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// Physically or numerically invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Timestep too coarse for the first-order discretization
    #[error("Timestep {dt} s is too large for first-order discretization (fastest rate {max_rate:.3} 1/s)")]
    TimestepTooLarge {
        /// Requested timestep
        dt: f64,
        /// Induced infinity norm of the continuous system matrix
        max_rate: f64,
    },
    /// The Riccati recursion failed to converge
    #[error("Uncontrollable or non-convergent system: Riccati recursion stopped after {iterations} iterations (residual {residual:e})")]
    RiccatiNonConvergence {
        /// Number of iterations performed
        iterations: usize,
        /// Frobenius norm of the last `P` update
        residual: f64,
    },
    /// Error related to linear algebra operations
    #[error("Nalgebra error: {0}")]
    NalgebraError(String),
    /// Converged gain that does not stabilize the discrete closed loop
    #[error("Closed loop is unstable: spectral radius {spectral_radius}")]
    UnstableClosedLoop {
        /// Spectral radius of `A_d - B_d K`
        spectral_radius: f64,
    },
    /// Goal pose incompatible with the hover gain
    #[error("Invalid goal: {0}")]
    InvalidGoal(String),
    /// NaN or Inf in the integrated state
    #[error("Non-finite state at tick {tick}: {state:?}")]
    NumericDivergence {
        /// Index of the offending tick
        tick: usize,
        /// State values produced by the integration step
        state: [f64; 6],
    },
}
/// Physical constants of a planar quadrotor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadrotorParams {
    /// Mass of the quadrotor in kg
    pub mass: f64,
    /// Distance from the center of mass to each rotor in m
    pub arm_length: f64,
    /// Moment of inertia about the out-of-plane axis in kg m^2
    pub inertia: f64,
    /// Gravitational acceleration in m/s^2
    pub gravity: f64,
}

impl Default for QuadrotorParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            arm_length: 0.3,
            inertia: 1.0,
            gravity: 9.81,
        }
    }
}

impl QuadrotorParams {
    /// Checks that the parameters describe a physical vehicle
    /// # Errors
    /// * `InvalidConfig` if mass, arm length or inertia are not positive, or gravity is not finite
    pub fn validate(&self) -> Result<(), SimulationError> {
        for (name, value) in [
            ("mass", self.mass),
            ("arm_length", self.arm_length),
            ("inertia", self.inertia),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimulationError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !self.gravity.is_finite() {
            return Err(SimulationError::InvalidConfig(format!(
                "gravity must be finite, got {}",
                self.gravity
            )));
        }
        Ok(())
    }
}
/// Represents a planar quadrotor with its physical properties and state
///
/// The state is only changed through [`PlanarQuadrotor::step`].
/// # Example
/// ```
/// use planar_quad::{PlanarQuadrotor, QuadrotorParams, State};
/// let quad = PlanarQuadrotor::new(QuadrotorParams::default(), State::zeros()).unwrap();
/// let hover = quad.equilibrium_input();
/// assert!((hover[0] - 0.5 * 9.81).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct PlanarQuadrotor {
    params: QuadrotorParams,
    state: State,
}

impl PlanarQuadrotor {
    /// Creates a new PlanarQuadrotor
    /// # Arguments
    /// * `params` - The physical constants of the vehicle
    /// * `initial_state` - The state at the start of the simulation
    /// # Returns
    /// * A new PlanarQuadrotor instance
    /// # Errors
    /// * Returns `InvalidConfig` if the parameters are not physical or the state is not finite
    pub fn new(params: QuadrotorParams, initial_state: State) -> Result<Self, SimulationError> {
        params.validate()?;
        if !is_finite(&initial_state) {
            return Err(SimulationError::InvalidConfig(format!(
                "initial state must be finite, got {:?}",
                initial_state.as_slice()
            )));
        }
        Ok(Self {
            params,
            state: initial_state,
        })
    }
    /// Physical constants of the vehicle
    pub fn params(&self) -> &QuadrotorParams {
        &self.params
    }
    /// Current state of the vehicle
    pub fn state(&self) -> &State {
        &self.state
    }
    /// Rotor thrusts that balance gravity with zero net torque
    /// # Returns
    /// * Each rotor carries half of the weight `m * g`
    pub fn equilibrium_input(&self) -> Input {
        let half_weight = 0.5 * self.params.mass * self.params.gravity;
        Input::new(half_weight, half_weight)
    }
    /// Evaluates the nonlinear equations of motion
    /// # Arguments
    /// * `state` - The state to evaluate at
    /// * `input` - The rotor thrusts
    /// # Returns
    /// * The state derivative `[x_dot, y_dot, theta_dot, x_ddot, y_ddot, theta_ddot]`
    pub fn derivative(&self, state: &State, input: &Input) -> StateRate {
        let QuadrotorParams {
            mass,
            arm_length,
            inertia,
            gravity,
        } = self.params;
        let (sin_theta, cos_theta) = state[2].sin_cos();
        let thrust = input[0] + input[1];
        StateRate::new(
            state[3],
            state[4],
            state[5],
            -thrust * sin_theta / mass,
            thrust * cos_theta / mass - gravity,
            arm_length * (input[0] - input[1]) / inertia,
        )
    }
    /// Advances a state by one forward Euler step
    ///
    /// The local error grows with `dt`; the simulation runs at `dt` around 1e-3 s where the
    /// drift stays well below what the controller corrects every tick.
    /// # Arguments
    /// * `state` - The state at the start of the step
    /// * `input` - The rotor thrusts held over the step
    /// * `dt` - The step length in seconds
    /// # Returns
    /// * The state at the end of the step
    pub fn integrate(&self, state: &State, input: &Input, dt: f64) -> State {
        state + self.derivative(state, input) * dt
    }
    /// Integrates the owned state in place
    /// # Arguments
    /// * `input` - The rotor thrusts held over the step
    /// * `dt` - The step length in seconds
    /// * `tick` - Index of the tick, reported on failure
    /// # Errors
    /// * `NumericDivergence` if the new state contains NaN or Inf; the previous state is kept
    pub fn step(&mut self, input: &Input, dt: f64, tick: usize) -> Result<(), SimulationError> {
        let next = self.integrate(&self.state, input, dt);
        if !is_finite(&next) {
            return Err(SimulationError::NumericDivergence {
                tick,
                state: next.into(),
            });
        }
        self.state = next;
        Ok(())
    }
    /// Computes the Jacobians of [`PlanarQuadrotor::derivative`]
    ///
    /// The result is only valid near the operating point it was computed at.
    /// # Arguments
    /// * `state` - The operating point state
    /// * `input` - The operating point input
    /// # Returns
    /// * The continuous-time matrices `(A, B)`
    pub fn linearize(&self, state: &State, input: &Input) -> (Matrix6<f64>, Matrix6x2<f64>) {
        let QuadrotorParams {
            mass,
            arm_length,
            inertia,
            ..
        } = self.params;
        let (sin_theta, cos_theta) = state[2].sin_cos();
        let thrust = input[0] + input[1];
        let mut a = Matrix6::zeros();
        a[(0, 3)] = 1.0;
        a[(1, 4)] = 1.0;
        a[(2, 5)] = 1.0;
        a[(3, 2)] = -thrust * cos_theta / mass;
        a[(4, 2)] = -thrust * sin_theta / mass;
        let mut b = Matrix6x2::zeros();
        b[(3, 0)] = -sin_theta / mass;
        b[(3, 1)] = -sin_theta / mass;
        b[(4, 0)] = cos_theta / mass;
        b[(4, 1)] = cos_theta / mass;
        b[(5, 0)] = arm_length / inertia;
        b[(5, 1)] = -arm_length / inertia;
        (a, b)
    }
    /// Linearizes about hover at the origin with the equilibrium input
    pub fn linearize_at_hover(&self) -> (Matrix6<f64>, Matrix6x2<f64>) {
        self.linearize(&State::zeros(), &self.equilibrium_input())
    }
}
/// Converts continuous-time matrices to a first-order discrete-time model
///
/// `A_d = I + dt * A`, `B_d = dt * B`. Cheaper than the matrix exponential and only
/// accurate while `dt` is small against the fastest rate of `A`.
/// # Arguments
/// * `a` - The continuous state matrix
/// * `b` - The continuous input matrix
/// * `dt` - The timestep in seconds
/// # Returns
/// * The discrete matrices `(A_d, B_d)`
/// # Errors
/// * `InvalidConfig` if `dt` is not positive and finite
/// * `TimestepTooLarge` if `dt * ||A||_inf` exceeds [`MAX_DISCRETIZATION_STEP`]
pub fn discretize(
    a: &Matrix6<f64>,
    b: &Matrix6x2<f64>,
    dt: f64,
) -> Result<(Matrix6<f64>, Matrix6x2<f64>), SimulationError> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(SimulationError::InvalidConfig(format!(
            "timestep must be positive, got {}",
            dt
        )));
    }
    let max_rate = a
        .row_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    if dt * max_rate > MAX_DISCRETIZATION_STEP {
        return Err(SimulationError::TimestepTooLarge { dt, max_rate });
    }
    Ok((Matrix6::identity() + a * dt, b * dt))
}
/// Cost weights of the quadratic regulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LqrWeights {
    /// State deviation penalty, symmetric positive semidefinite
    pub q: Matrix6<f64>,
    /// Control effort penalty, symmetric positive definite
    pub r: Matrix2<f64>,
}

impl Default for LqrWeights {
    fn default() -> Self {
        Self {
            q: Matrix6::from_diagonal(&Vector6::new(10.0, 10.0, 10.0, 1.0, 10.0, 0.25 / 2.0 / PI)),
            r: Matrix2::new(0.1, 0.05, 0.05, 0.1),
        }
    }
}

impl LqrWeights {
    /// Checks that `Q` is symmetric positive semidefinite and `R` symmetric positive definite
    /// # Errors
    /// * `InvalidConfig` describing the offending matrix
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !is_finite(&self.q) || !is_finite(&self.r) {
            return Err(SimulationError::InvalidConfig(
                "cost weights must be finite".to_string(),
            ));
        }
        if !is_symmetric(&self.q) {
            return Err(SimulationError::InvalidConfig(
                "Q must be symmetric".to_string(),
            ));
        }
        let q_scale = self.q.amax().max(1.0);
        if self.q.symmetric_eigenvalues().min() < -1e-12 * q_scale {
            return Err(SimulationError::InvalidConfig(
                "Q must be positive semidefinite".to_string(),
            ));
        }
        if !is_symmetric(&self.r) || self.r.cholesky().is_none() {
            return Err(SimulationError::InvalidConfig(
                "R must be symmetric positive definite".to_string(),
            ));
        }
        Ok(())
    }
}
/// Termination settings of the Riccati recursion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiccatiOptions {
    /// Frobenius norm of the `P` update below which the recursion has converged
    pub tolerance: f64,
    /// Hard bound on the number of iterations
    pub max_iterations: usize,
}

impl Default for RiccatiOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 100_000,
        }
    }
}
/// Computes the infinite-horizon discrete-time LQR gain
///
/// Iterates `P <- Q + A'PA - A'PB K` from `P = Q` with `K = (R + B'PB)^-1 B'PA` until the
/// update is smaller than the tolerance, then checks that `A_d - B_d K` is stable.
/// # Arguments
/// * `a_d` - The discrete state matrix
/// * `b_d` - The discrete input matrix
/// * `weights` - The cost weights `Q` and `R`
/// * `options` - Tolerance and iteration bound
/// # Returns
/// * The gain `K` of the last iteration
/// # Errors
/// * `InvalidConfig` if the weights or options are invalid
/// * `NalgebraError` if `R + B'PB` becomes singular
/// * `RiccatiNonConvergence` if the iteration bound is hit or `P` stops being finite
/// * `UnstableClosedLoop` if the resulting gain does not stabilize the pair
pub fn solve_lqr(
    a_d: &Matrix6<f64>,
    b_d: &Matrix6x2<f64>,
    weights: &LqrWeights,
    options: &RiccatiOptions,
) -> Result<Gain, SimulationError> {
    weights.validate()?;
    if !(options.tolerance.is_finite() && options.tolerance > 0.0) || options.max_iterations == 0
    {
        return Err(SimulationError::InvalidConfig(format!(
            "invalid Riccati options: {:?}",
            options
        )));
    }
    let (q, r) = (&weights.q, &weights.r);
    let (a_t, b_t) = (a_d.transpose(), b_d.transpose());
    let mut p = *q;
    let mut residual = f64::INFINITY;
    for iteration in 1..=options.max_iterations {
        let gram = r + b_t * p * b_d;
        let gain = solve_gram(&gram, &(b_t * p * a_d))?;
        let mut p_next = q + a_t * p * a_d - a_t * p * b_d * gain;
        p_next = (p_next + p_next.transpose()) * 0.5;
        if !is_finite(&p_next) {
            return Err(SimulationError::RiccatiNonConvergence {
                iterations: iteration,
                residual,
            });
        }
        residual = (p_next - p).norm();
        p = p_next;
        if residual < options.tolerance {
            let radius = spectral_radius(&(a_d - b_d * gain));
            log::info!(
                "Riccati converged after {} iterations, closed-loop spectral radius {:.6}",
                iteration,
                radius
            );
            if radius.is_nan() || radius >= 1.0 {
                return Err(SimulationError::UnstableClosedLoop {
                    spectral_radius: radius,
                });
            }
            return Ok(gain);
        }
        if iteration % 10_000 == 0 {
            log::debug!("Riccati iteration {}: residual {:e}", iteration, residual);
        }
    }
    Err(SimulationError::RiccatiNonConvergence {
        iterations: options.max_iterations,
        residual,
    })
}
// Solves `gram * K = rhs`, refusing a near-singular `gram`
fn solve_gram(gram: &Matrix2<f64>, rhs: &Gain) -> Result<Gain, SimulationError> {
    let eigenvalues = gram.symmetric_eigenvalues();
    let (min, max) = (eigenvalues.min(), eigenvalues.max());
    if !(min > GRAM_CONDITION_LIMIT * max.max(f64::MIN_POSITIVE)) {
        return Err(SimulationError::NalgebraError(format!(
            "R + B'PB is singular or indefinite (eigenvalues {:e}, {:e})",
            min, max
        )));
    }
    let cholesky = gram.cholesky().ok_or(SimulationError::NalgebraError(
        "Failed to factorize R + B'PB".to_string(),
    ))?;
    let gain = cholesky.solve(rhs);
    if !is_finite(&gain) {
        return Err(SimulationError::NalgebraError(
            "Non-finite gain from R + B'PB".to_string(),
        ));
    }
    Ok(gain)
}
/// Largest eigenvalue modulus of a square matrix
pub fn spectral_radius(m: &Matrix6<f64>) -> f64 {
    m.complex_eigenvalues()
        .iter()
        .map(|c| c.re.hypot(c.im))
        .fold(0.0, f64::max)
}
/// Applies the state feedback law `u = u_eq - K (state - goal)`
/// # Arguments
/// * `state` - The current state
/// * `goal` - The goal pose
/// * `gain` - The feedback gain
/// * `equilibrium_input` - The input the gain was designed around
/// # Returns
/// * The rotor thrusts to apply
pub fn control_law(state: &State, goal: &State, gain: &Gain, equilibrium_input: &Input) -> Input {
    equilibrium_input - gain * (state - goal)
}
/// Checks that a goal is a hover pose `[x, y, 0, 0, 0, 0]`
/// # Errors
/// * `InvalidGoal` if any angle or velocity component is nonzero, or any entry is not finite
pub fn validate_goal(goal: &State) -> Result<(), SimulationError> {
    if !is_finite(goal) {
        return Err(SimulationError::InvalidGoal(format!(
            "goal must be finite, got {:?}",
            goal.as_slice()
        )));
    }
    if goal.rows(2, 4).iter().any(|&v| v != 0.0) {
        return Err(SimulationError::InvalidGoal(format!(
            "goal must have zero angle and velocities, got {:?}",
            goal.as_slice()
        )));
    }
    Ok(())
}
/// Fixed-gain LQR regulator designed around the hover equilibrium
///
/// The gain is computed once and never rescheduled, so tracking is only as good as the
/// hover linearization is for the current state.
#[derive(Debug, Clone)]
pub struct LqrController {
    gain: Gain,
    equilibrium_input: Input,
    goal: State,
}

impl LqrController {
    /// Creates a controller from an existing gain
    /// # Arguments
    /// * `gain` - The feedback gain
    /// * `equilibrium_input` - The input the gain was designed around
    /// * `goal` - The initial goal pose
    /// # Errors
    /// * `InvalidGoal` if the goal is not a hover pose
    /// * `NalgebraError` if the gain is not finite
    pub fn new(gain: Gain, equilibrium_input: Input, goal: State) -> Result<Self, SimulationError> {
        if !is_finite(&gain) || !is_finite(&equilibrium_input) {
            return Err(SimulationError::NalgebraError(
                "controller gain must be finite".to_string(),
            ));
        }
        validate_goal(&goal)?;
        Ok(Self {
            gain,
            equilibrium_input,
            goal,
        })
    }
    /// Designs the hover regulator for a quadrotor
    ///
    /// Linearizes at hover, discretizes at `dt` and solves the Riccati recursion. The goal
    /// starts at the origin.
    /// # Arguments
    /// * `quad` - The vehicle to control
    /// * `weights` - The cost weights
    /// * `dt` - The control timestep in seconds
    /// * `options` - The Riccati termination settings
    /// # Errors
    /// * Any error of [`discretize`] or [`solve_lqr`]
    pub fn design(
        quad: &PlanarQuadrotor,
        weights: &LqrWeights,
        dt: f64,
        options: &RiccatiOptions,
    ) -> Result<Self, SimulationError> {
        let (a, b) = quad.linearize_at_hover();
        let (a_d, b_d) = discretize(&a, &b, dt)?;
        let gain = solve_lqr(&a_d, &b_d, weights, options)?;
        log::info!("LQR gain computed: {:.4}", gain);
        Self::new(gain, quad.equilibrium_input(), State::zeros())
    }
    /// The frozen feedback gain
    pub fn gain(&self) -> &Gain {
        &self.gain
    }
    /// The active goal pose
    pub fn goal(&self) -> &State {
        &self.goal
    }
    /// Replaces the goal pose
    /// # Errors
    /// * `InvalidGoal` if the goal is not a hover pose; the previous goal stays active
    pub fn set_goal(&mut self, goal: State) -> Result<(), SimulationError> {
        validate_goal(&goal)?;
        self.goal = goal;
        Ok(())
    }
    /// Evaluates the control law for the active goal
    pub fn control(&self, state: &State) -> Input {
        control_law(state, &self.goal, &self.gain, &self.equilibrium_input)
    }
}
/// Mapping between screen pixels and world coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Screen width in pixels
    pub width: u32,
    /// Screen height in pixels
    pub height: u32,
    /// Number of pixels per meter
    pub pixels_per_meter: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            pixels_per_meter: 40.0,
        }
    }
}

impl Viewport {
    /// Creates a viewport
    /// # Errors
    /// * `InvalidConfig` if the scale is not positive
    pub fn new(width: u32, height: u32, pixels_per_meter: f64) -> Result<Self, SimulationError> {
        if !(pixels_per_meter.is_finite() && pixels_per_meter > 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "pixels_per_meter must be positive, got {}",
                pixels_per_meter
            )));
        }
        Ok(Self {
            width,
            height,
            pixels_per_meter,
        })
    }
    /// Maps a picked pixel to a hover goal
    ///
    /// The screen center is the world origin and screen y grows downwards.
    /// # Arguments
    /// * `px` - Horizontal pixel coordinate
    /// * `py` - Vertical pixel coordinate
    /// # Returns
    /// * The goal `[x, y, 0, 0, 0, 0]`
    pub fn pick_to_goal(&self, px: i32, py: i32) -> State {
        let s = self.pixels_per_meter;
        let x = px as f64 / s - self.width as f64 / (2.0 * s);
        let y = -(py as f64) / s + self.height as f64 / (2.0 * s);
        State::new(x, y, 0.0, 0.0, 0.0, 0.0)
    }
}
/// Input events consumed by the simulation loop
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A position picked on screen, in pixels
    PickPosition {
        /// Horizontal pixel coordinate
        x: i32,
        /// Vertical pixel coordinate
        y: i32,
    },
    /// A goal pose given directly in world coordinates
    SetGoal(State),
    /// Cursor motion, only reported in the log
    CursorMoved {
        /// Horizontal pixel coordinate
        x: i32,
        /// Vertical pixel coordinate
        y: i32,
    },
    /// Stop the simulation and export the plots
    Terminate,
}
/// Producer of input events, polled once before every tick
pub trait EventSource {
    /// Appends the events pending at `tick` to `queue`
    fn poll(&mut self, tick: usize, queue: &mut VecDeque<SimEvent>);
}
/// Event source replaying a fixed schedule of events
#[derive(Debug, Clone, Default)]
pub struct ScheduledEvents {
    /// Events paired with the tick at which they fire
    pub schedule: Vec<(usize, SimEvent)>,
    /// Tick at which a terminate event fires
    pub terminate_at: Option<usize>,
}

impl ScheduledEvents {
    /// Creates a schedule
    /// # Arguments
    /// * `schedule` - Events paired with the tick at which they fire
    /// * `terminate_at` - Tick at which the simulation is stopped, if any
    pub fn new(schedule: Vec<(usize, SimEvent)>, terminate_at: Option<usize>) -> Self {
        Self {
            schedule,
            terminate_at,
        }
    }
}

impl EventSource for ScheduledEvents {
    fn poll(&mut self, tick: usize, queue: &mut VecDeque<SimEvent>) {
        queue.extend(
            self.schedule
                .iter()
                .filter(|(step, _)| *step == tick)
                .map(|(_, event)| event.clone()),
        );
        if self.terminate_at == Some(tick) {
            queue.push_back(SimEvent::Terminate);
        }
    }
}
/// Append-only trajectory samples, one per tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    /// Horizontal positions
    pub x: Vec<f64>,
    /// Vertical positions
    pub y: Vec<f64>,
    /// Tilt angles
    pub theta: Vec<f64>,
    /// Elapsed simulated time
    pub time: Vec<f64>,
}

impl History {
    /// Appends one sample
    pub fn record(&mut self, time: f64, state: &State) {
        self.x.push(state[0]);
        self.y.push(state[1]);
        self.theta.push(state[2]);
        self.time.push(time);
    }
    /// Number of recorded samples
    pub fn len(&self) -> usize {
        self.time.len()
    }
    /// Whether no sample has been recorded
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}
/// Consumer of the state once per tick
pub trait RenderSink {
    /// Draws the vehicle
    /// # Errors
    /// * If the rendering backend fails
    fn render(&mut self, time: f64, state: &State, goal: &State) -> Result<(), SimulationError>;
}
/// Consumer of the trajectory history at termination
pub trait PlotSink {
    /// Exports the history plots
    /// # Errors
    /// * If the plotting backend fails
    fn plot(&mut self, history: &History) -> Result<(), SimulationError>;
}
/// Sink that discards everything, for headless runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _time: f64, _state: &State, _goal: &State) -> Result<(), SimulationError> {
        Ok(())
    }
}

impl PlotSink for NullSink {
    fn plot(&mut self, _history: &History) -> Result<(), SimulationError> {
        Ok(())
    }
}
/// Lifecycle of the simulation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    /// Ticking normally
    Running,
    /// Stopped; terminal
    Terminating,
}
/// Fixed-timestep simulation of a quadrotor under a fixed-gain controller
pub struct Simulation {
    quad: PlanarQuadrotor,
    controller: LqrController,
    viewport: Viewport,
    dt: f64,
    step_index: usize,
    status: SimStatus,
    events: VecDeque<SimEvent>,
    history: History,
    realtime: bool,
}

impl Simulation {
    /// Creates a simulation in the `Running` state
    /// # Arguments
    /// * `quad` - The vehicle, owning the initial state
    /// * `controller` - The controller with its initial goal
    /// * `viewport` - The pixel to world mapping for position picks
    /// * `dt` - The timestep in seconds
    /// # Errors
    /// * `InvalidConfig` if `dt` is not positive
    pub fn new(
        quad: PlanarQuadrotor,
        controller: LqrController,
        viewport: Viewport,
        dt: f64,
    ) -> Result<Self, SimulationError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "timestep must be positive, got {}",
                dt
            )));
        }
        Ok(Self {
            quad,
            controller,
            viewport,
            dt,
            step_index: 0,
            status: SimStatus::Running,
            events: VecDeque::new(),
            history: History::default(),
            realtime: false,
        })
    }
    /// Sleeps for `dt` after every tick when enabled
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
    /// Queues an event for the next tick
    pub fn push_event(&mut self, event: SimEvent) {
        self.events.push_back(event);
    }
    /// Current vehicle state
    pub fn state(&self) -> &State {
        self.quad.state()
    }
    /// Active goal pose
    pub fn goal(&self) -> &State {
        self.controller.goal()
    }
    /// The vehicle
    pub fn quadrotor(&self) -> &PlanarQuadrotor {
        &self.quad
    }
    /// The controller
    pub fn controller(&self) -> &LqrController {
        &self.controller
    }
    /// Recorded trajectory
    pub fn history(&self) -> &History {
        &self.history
    }
    /// Loop status
    pub fn status(&self) -> SimStatus {
        self.status
    }
    /// Number of completed ticks
    pub fn ticks(&self) -> usize {
        self.step_index
    }
    /// Elapsed simulated time in seconds
    pub fn elapsed(&self) -> f64 {
        self.step_index as f64 * self.dt
    }
    /// Runs one tick: drain events, control, integrate, record, render
    ///
    /// A terminate event ends the tick before any integration. Once terminated, further
    /// calls do nothing.
    /// # Arguments
    /// * `render` - The render sink receiving the new state
    /// # Returns
    /// * The loop status after the tick
    /// # Errors
    /// * `NumericDivergence` if the integrated state is not finite; the loop terminates
    /// * Errors of the render sink
    pub fn tick(&mut self, render: &mut dyn RenderSink) -> Result<SimStatus, SimulationError> {
        if self.status == SimStatus::Terminating {
            return Ok(self.status);
        }
        while let Some(event) = self.events.pop_front() {
            if event == SimEvent::Terminate {
                log::info!(
                    "Time: {:.3} s,\tTerminate after {} ticks",
                    self.elapsed(),
                    self.step_index
                );
                self.status = SimStatus::Terminating;
                self.events.clear();
                return Ok(self.status);
            }
            self.handle_event(event);
        }
        let input = self.controller.control(self.quad.state());
        if let Err(e) = self.quad.step(&input, self.dt, self.step_index) {
            log::error!("{}", e);
            self.status = SimStatus::Terminating;
            return Err(e);
        }
        self.step_index += 1;
        let time = self.elapsed();
        self.history.record(time, self.quad.state());
        log::trace!("Time: {:.3} s,\tState: {:?}", time, self.quad.state().as_slice());
        render.render(time, self.quad.state(), self.controller.goal())?;
        if self.realtime {
            std::thread::sleep(std::time::Duration::from_secs_f64(self.dt));
        }
        Ok(self.status)
    }
    fn handle_event(&mut self, event: SimEvent) {
        let goal = match event {
            SimEvent::PickPosition { x, y } => self.viewport.pick_to_goal(x, y),
            SimEvent::SetGoal(goal) => goal,
            SimEvent::CursorMoved { x, y } => {
                log::debug!("Mouse position: ({}, {})", x, y);
                return;
            }
            SimEvent::Terminate => return,
        };
        match self.controller.set_goal(goal) {
            Ok(()) => log::info!(
                "Time: {:.3} s,\tGoal set to ({:.3}, {:.3})",
                self.elapsed(),
                goal[0],
                goal[1]
            ),
            Err(e) => log::warn!("{}; keeping goal {:?}", e, self.controller.goal().as_slice()),
        }
    }
    /// Runs until a terminate event, then exports the history once
    /// # Arguments
    /// * `events` - The event source polled before every tick
    /// * `sink` - The render and plot sink
    /// # Errors
    /// * Errors of [`Simulation::tick`] or of the plot sink
    pub fn run<S: RenderSink + PlotSink>(
        &mut self,
        events: &mut dyn EventSource,
        sink: &mut S,
    ) -> Result<(), SimulationError> {
        while self.status == SimStatus::Running {
            events.poll(self.step_index, &mut self.events);
            self.tick(sink)?;
        }
        sink.plot(&self.history)?;
        log::info!(
            "Exported {} samples, final state {:?}",
            self.history.len(),
            self.state().as_slice()
        );
        Ok(())
    }
    /// Runs up to `ticks` ticks without rendering
    /// # Errors
    /// * Errors of [`Simulation::tick`]
    pub fn run_for(&mut self, ticks: usize) -> Result<SimStatus, SimulationError> {
        for _ in 0..ticks {
            if self.tick(&mut NullSink)? == SimStatus::Terminating {
                break;
            }
        }
        Ok(self.status)
    }
}
/// Renders the vehicle and exports plots to a rerun recording stream
pub struct RerunSink {
    rec: rerun::RecordingStream,
    arm_length: f32,
    render_interval: usize,
    frame: usize,
}

impl RerunSink {
    /// Wraps an existing recording stream
    /// # Arguments
    /// * `rec` - The rerun::RecordingStream instance
    /// * `arm_length` - Arm length used to draw the vehicle
    /// * `render_interval` - Number of ticks between rendered frames
    pub fn new(rec: rerun::RecordingStream, arm_length: f64, render_interval: usize) -> Self {
        Self {
            rec,
            arm_length: arm_length as f32,
            render_interval: render_interval.max(1),
            frame: 0,
        }
    }
    /// Spawns a rerun viewer and connects to it
    /// # Errors
    /// * If the viewer cannot be spawned
    pub fn spawn(arm_length: f64, render_interval: usize) -> Result<Self, SimulationError> {
        let rec = rerun::RecordingStreamBuilder::new("planar_quad").spawn()?;
        Ok(Self::new(rec, arm_length, render_interval))
    }
    /// Records to an `.rrd` file
    /// # Errors
    /// * If the file cannot be created
    pub fn save(
        path: &str,
        arm_length: f64,
        render_interval: usize,
    ) -> Result<Self, SimulationError> {
        let rec = rerun::RecordingStreamBuilder::new("planar_quad").save(path)?;
        Ok(Self::new(rec, arm_length, render_interval))
    }
}

impl RenderSink for RerunSink {
    fn render(&mut self, time: f64, state: &State, goal: &State) -> Result<(), SimulationError> {
        self.frame += 1;
        if self.frame % self.render_interval != 0 {
            return Ok(());
        }
        self.rec.set_time_seconds("timestamp", time);
        let (x, y) = (state[0] as f32, state[1] as f32);
        let (sin_theta, cos_theta) = (state[2] as f32).sin_cos();
        let (dx, dz) = (self.arm_length * cos_theta, self.arm_length * sin_theta);
        self.rec.log(
            "world/quad/body",
            &rerun::LineStrips3D::new([vec![(x - dx, 0.0, y - dz), (x + dx, 0.0, y + dz)]])
                .with_radii([0.03])
                .with_colors([rerun::Color::from_rgb(0, 255, 255)]),
        )?;
        self.rec.log(
            "world/goal",
            &rerun::Points3D::new([(goal[0] as f32, 0.0, goal[1] as f32)])
                .with_radii([0.05])
                .with_colors([rerun::Color::from_rgb(255, 255, 255)]),
        )?;
        Ok(())
    }
}

impl PlotSink for RerunSink {
    fn plot(&mut self, history: &History) -> Result<(), SimulationError> {
        for i in 0..history.len() {
            self.rec.set_time_seconds("timestamp", history.time[i]);
            for (name, value) in [
                ("x", history.x[i]),
                ("y", history.y[i]),
                ("theta", history.theta[i]),
            ] {
                self.rec
                    .log(format!("plots/{}", name), &rerun::Scalar::new(value))?;
            }
        }
        let planar_path: Vec<(f32, f32, f32)> = history
            .x
            .iter()
            .zip(&history.y)
            .map(|(&x, &y)| (x as f32, y as f32, 0.0))
            .collect();
        self.rec.log(
            "plots/path_xy",
            &rerun::LineStrips3D::new([planar_path])
                .with_colors([rerun::Color::from_rgb(0, 255, 255)]),
        )?;
        let trajectory: Vec<(f32, f32, f32)> = history
            .x
            .iter()
            .zip(&history.y)
            .zip(&history.time)
            .map(|((&x, &y), &t)| (x as f32, y as f32, t as f32))
            .collect();
        self.rec.log(
            "plots/trajectory_xyt",
            &rerun::LineStrips3D::new([trajectory])
                .with_colors([rerun::Color::from_rgb(255, 128, 128)]),
        )?;
        Ok(())
    }
}

fn is_finite<R: nalgebra::Dim, C: nalgebra::Dim, S: nalgebra::RawStorage<f64, R, C>>(
    m: &nalgebra::Matrix<f64, R, C, S>,
) -> bool {
    m.iter().all(|v| v.is_finite())
}

fn is_symmetric<D: nalgebra::Dim, S: nalgebra::RawStorage<f64, D, D>>(
    m: &nalgebra::Matrix<f64, D, D, S>,
) -> bool {
    let scale = m.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    (0..m.nrows()).all(|i| (0..i).all(|j| (m[(i, j)] - m[(j, i)]).abs() <= 1e-12 * scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn hover_quad() -> PlanarQuadrotor {
        PlanarQuadrotor::new(QuadrotorParams::default(), State::zeros()).unwrap()
    }

    fn hover_pair(dt: f64) -> (Matrix6<f64>, Matrix6x2<f64>) {
        let (a, b) = hover_quad().linearize_at_hover();
        discretize(&a, &b, dt).unwrap()
    }

    #[test]
    fn hover_is_an_equilibrium() {
        let quad = hover_quad();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let (x, y) = (rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0));
            let state = State::new(x, y, 0.0, 0.0, 0.0, 0.0);
            let rate = quad.derivative(&state, &quad.equilibrium_input());
            assert_eq!(rate, StateRate::zeros());
        }
    }

    #[test]
    fn derivative_uses_full_nonlinear_angle() {
        let quad = hover_quad();
        let state = State::new(0.0, 0.0, PI / 2.0, 1.0, -2.0, 0.5);
        let rate = quad.derivative(&state, &Input::new(3.0, 1.0));
        assert_relative_eq!(rate[0], 1.0);
        assert_relative_eq!(rate[1], -2.0);
        assert_relative_eq!(rate[2], 0.5);
        assert_relative_eq!(rate[3], -4.0, epsilon = 1e-12);
        assert_relative_eq!(rate[4], -9.81, epsilon = 1e-12);
        assert_relative_eq!(rate[5], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn integrate_is_forward_euler() {
        let quad = hover_quad();
        let state = State::new(1.0, 2.0, 0.1, 0.3, -0.2, 0.05);
        let input = Input::new(5.0, 4.5);
        let next = quad.integrate(&state, &input, 0.01);
        assert_eq!(next, state + quad.derivative(&state, &input) * 0.01);
    }

    #[test]
    fn step_rejects_non_finite_state() {
        let mut quad = hover_quad();
        let err = quad.step(&Input::new(f64::NAN, 0.0), 0.001, 42).unwrap_err();
        match err {
            SimulationError::NumericDivergence { tick, state } => {
                assert_eq!(tick, 42);
                assert!(state.iter().any(|v| v.is_nan()));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(quad.state(), &State::zeros());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        for params in [
            QuadrotorParams { mass: 0.0, ..Default::default() },
            QuadrotorParams { inertia: -1.0, ..Default::default() },
            QuadrotorParams { arm_length: f64::NAN, ..Default::default() },
            QuadrotorParams { gravity: f64::INFINITY, ..Default::default() },
        ] {
            assert!(matches!(
                PlanarQuadrotor::new(params, State::zeros()),
                Err(SimulationError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn linearization_matches_finite_differences() {
        let quad = hover_quad();
        let state = State::new(0.4, -1.2, 0.3, 0.2, -0.1, 0.7);
        let input = Input::new(5.5, 4.0);
        let (a, b) = quad.linearize(&state, &input);
        let h = 1e-6;
        for j in 0..6 {
            let mut dx = State::zeros();
            dx[j] = h;
            let column = (quad.derivative(&(state + dx), &input)
                - quad.derivative(&(state - dx), &input))
                / (2.0 * h);
            for i in 0..6 {
                assert_relative_eq!(a[(i, j)], column[i], epsilon = 1e-6);
            }
        }
        for j in 0..2 {
            let mut du = Input::zeros();
            du[j] = h;
            let column = (quad.derivative(&state, &(input + du))
                - quad.derivative(&state, &(input - du)))
                / (2.0 * h);
            for i in 0..6 {
                assert_relative_eq!(b[(i, j)], column[i], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn hover_linearization_structure() {
        let (a, b) = hover_quad().linearize_at_hover();
        assert_relative_eq!(a[(3, 2)], -9.81, epsilon = 1e-12);
        assert_eq!(a[(4, 2)], 0.0);
        assert_eq!(b[(3, 0)], 0.0);
        assert_relative_eq!(b[(4, 0)], 1.0);
        assert_relative_eq!(b[(5, 0)], 0.3);
        assert_relative_eq!(b[(5, 1)], -0.3);
    }

    #[test]
    fn discretization_limits_to_identity() {
        let (a, b) = hover_quad().linearize_at_hover();
        let (a_d, b_d) = discretize(&a, &b, 1e-9).unwrap();
        assert_relative_eq!(a_d, Matrix6::identity(), epsilon = 1e-7);
        assert_relative_eq!(b_d, Matrix6x2::zeros(), epsilon = 1e-8);
    }

    #[test]
    fn discretization_rejects_bad_timesteps() {
        let (a, b) = hover_quad().linearize_at_hover();
        assert!(matches!(
            discretize(&a, &b, -0.001),
            Err(SimulationError::InvalidConfig(_))
        ));
        assert!(matches!(
            discretize(&a, &b, 0.0),
            Err(SimulationError::InvalidConfig(_))
        ));
        assert!(matches!(
            discretize(&a, &b, 0.5),
            Err(SimulationError::TimestepTooLarge { .. })
        ));
    }

    #[test]
    fn lqr_stabilizes_hover() {
        let (a_d, b_d) = hover_pair(0.001);
        let gain = solve_lqr(&a_d, &b_d, &LqrWeights::default(), &RiccatiOptions::default())
            .unwrap();
        let radius = spectral_radius(&(a_d - b_d * gain));
        assert!(radius < 1.0, "spectral radius {}", radius);
        // rotor split: x and angle act antisymmetrically, y symmetrically
        assert_relative_eq!(gain[(0, 0)], -gain[(1, 0)], epsilon = 1e-6);
        assert_relative_eq!(gain[(0, 1)], gain[(1, 1)], epsilon = 1e-6);
        assert!(gain[(0, 1)] > 0.0);
    }

    #[test]
    fn lqr_reports_non_stabilizable_pair() {
        let (a_d, _) = hover_pair(0.001);
        let weights = LqrWeights {
            r: Matrix2::identity(),
            ..Default::default()
        };
        let options = RiccatiOptions {
            max_iterations: 2_000,
            ..Default::default()
        };
        let err = solve_lqr(&a_d, &Matrix6x2::zeros(), &weights, &options).unwrap_err();
        match err {
            SimulationError::RiccatiNonConvergence { iterations, residual } => {
                assert_eq!(iterations, 2_000);
                assert!(residual.is_finite());
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn lqr_rejects_singular_gram() {
        let (a_d, _) = hover_pair(0.001);
        let gram = Matrix2::zeros();
        assert!(matches!(
            solve_gram(&gram, &Gain::zeros()),
            Err(SimulationError::NalgebraError(_))
        ));
        let weights = LqrWeights {
            r: Matrix2::new(1.0, 1.0, 1.0, 1.0),
            ..Default::default()
        };
        assert!(matches!(
            solve_lqr(&a_d, &Matrix6x2::zeros(), &weights, &RiccatiOptions::default()),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn weights_validation() {
        assert!(LqrWeights::default().validate().is_ok());
        let mut weights = LqrWeights::default();
        weights.q[(0, 0)] = -1.0;
        assert!(weights.validate().is_err());
        let weights = LqrWeights {
            r: Matrix2::new(0.1, 0.05, 0.0, 0.1),
            ..Default::default()
        };
        assert!(weights.validate().is_err());
        let weights = LqrWeights {
            r: Matrix2::new(-0.1, 0.0, 0.0, 0.1),
            ..Default::default()
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn control_law_adds_correction_to_equilibrium() {
        let gain = Gain::from_fn(|i, j| (i + j) as f64);
        let u_eq = Input::new(4.9, 4.9);
        let goal = State::new(1.0, 2.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(control_law(&goal, &goal, &gain, &u_eq), u_eq);
        let state = State::new(2.0, 2.0, 0.0, 0.0, 0.0, 0.0);
        let u = control_law(&state, &goal, &gain, &u_eq);
        assert_relative_eq!(u[0], 4.9, epsilon = 1e-12);
        assert_relative_eq!(u[1], 3.9, epsilon = 1e-12);
    }

    #[test]
    fn invalid_goal_keeps_previous() {
        let mut controller =
            LqrController::new(Gain::zeros(), Input::new(4.905, 4.905), State::zeros()).unwrap();
        let valid = State::new(1.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        controller.set_goal(valid).unwrap();
        let err = controller
            .set_goal(State::new(1.0, 1.0, 0.2, 0.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, SimulationError::InvalidGoal(_)));
        assert!(controller
            .set_goal(State::new(0.0, f64::NAN, 0.0, 0.0, 0.0, 0.0))
            .is_err());
        assert!(controller
            .set_goal(State::new(0.0, 0.0, 0.0, 0.0, 1.0, 0.0))
            .is_err());
        assert_eq!(controller.goal(), &valid);
    }

    #[test]
    fn viewport_maps_center_to_origin() {
        let viewport = Viewport::default();
        assert_eq!(viewport.pick_to_goal(640, 360), State::zeros());
        let goal = viewport.pick_to_goal(800, 240);
        assert_relative_eq!(goal[0], 4.0);
        assert_relative_eq!(goal[1], 3.0);
        assert!(Viewport::new(1280, 720, 0.0).is_err());
    }

    #[test]
    fn scheduled_events_fire_on_their_tick() {
        let mut source = ScheduledEvents::new(
            vec![(2, SimEvent::PickPosition { x: 0, y: 0 })],
            Some(3),
        );
        let mut queue = VecDeque::new();
        source.poll(1, &mut queue);
        assert!(queue.is_empty());
        source.poll(2, &mut queue);
        assert_eq!(queue.pop_front(), Some(SimEvent::PickPosition { x: 0, y: 0 }));
        source.poll(3, &mut queue);
        assert_eq!(queue.pop_front(), Some(SimEvent::Terminate));
    }

    struct RecordingSink {
        frames: Vec<(f64, State)>,
        plots: usize,
        samples: usize,
    }

    impl RenderSink for RecordingSink {
        fn render(&mut self, time: f64, state: &State, _goal: &State) -> Result<(), SimulationError> {
            self.frames.push((time, *state));
            Ok(())
        }
    }

    impl PlotSink for RecordingSink {
        fn plot(&mut self, history: &History) -> Result<(), SimulationError> {
            self.plots += 1;
            self.samples = history.len();
            Ok(())
        }
    }

    fn hover_simulation() -> Simulation {
        let quad = PlanarQuadrotor::new(
            QuadrotorParams::default(),
            State::new(0.5, -0.5, 0.0, 0.0, 0.0, 0.0),
        )
        .unwrap();
        let controller =
            LqrController::design(&quad, &LqrWeights::default(), 0.001, &RiccatiOptions::default())
                .unwrap();
        Simulation::new(quad, controller, Viewport::default(), 0.001).unwrap()
    }

    #[test]
    fn tick_controls_from_start_state() {
        let mut sim = hover_simulation();
        let start = *sim.state();
        let input = sim.controller().control(&start);
        let expected = sim.quadrotor().integrate(&start, &input, 0.001);
        let mut sink = RecordingSink { frames: vec![], plots: 0, samples: 0 };
        assert_eq!(sim.tick(&mut sink).unwrap(), SimStatus::Running);
        assert_eq!(sim.state(), &expected);
        assert_eq!(sink.frames, vec![(0.001, expected)]);
        assert_eq!(sim.history().x, vec![expected[0]]);
        assert_eq!(sim.history().time, vec![0.001]);
    }

    #[test]
    fn run_terminates_and_plots_once() {
        let mut sim = hover_simulation();
        let mut events = ScheduledEvents::new(
            vec![
                (5, SimEvent::PickPosition { x: 800, y: 240 }),
                (6, SimEvent::CursorMoved { x: 1, y: 2 }),
                (7, SimEvent::SetGoal(State::new(1.0, 1.0, 0.2, 0.0, 0.0, 0.0))),
            ],
            Some(20),
        );
        let mut sink = RecordingSink { frames: vec![], plots: 0, samples: 0 };
        sim.run(&mut events, &mut sink).unwrap();
        assert_eq!(sim.status(), SimStatus::Terminating);
        assert_eq!(sim.ticks(), 20);
        assert_eq!(sink.frames.len(), 20);
        assert_eq!((sink.plots, sink.samples), (1, 20));
        assert_eq!(sim.goal(), &State::new(4.0, 3.0, 0.0, 0.0, 0.0, 0.0));
        assert_eq!(sim.tick(&mut sink).unwrap(), SimStatus::Terminating);
        assert_eq!(sim.ticks(), 20);
    }

    #[test]
    fn divergence_halts_the_loop() {
        let quad = hover_quad();
        let controller =
            LqrController::new(Gain::from_element(1e300), quad.equilibrium_input(), State::zeros())
                .unwrap();
        let mut sim = Simulation::new(quad, controller, Viewport::default(), 0.001).unwrap();
        sim.push_event(SimEvent::SetGoal(State::new(1e10, 0.0, 0.0, 0.0, 0.0, 0.0)));
        let err = sim.run_for(10).unwrap_err();
        assert!(matches!(err, SimulationError::NumericDivergence { tick: 0, .. }));
        assert_eq!(sim.status(), SimStatus::Terminating);
        assert!(sim.history().is_empty());
    }
}
