use planar_quad::config::Config;
use planar_quad::{LqrController, NullSink, PlanarQuadrotor, RerunSink, SimulationError, Simulation};
/// Main function for the simulation
fn main() -> Result<(), SimulationError> {
    env_logger::builder()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/quad.yaml".to_string());
    log::info!("Loading configuration from {}", config_path);
    let config = Config::from_yaml(&config_path)?;
    config.validate()?;
    let dt = config.simulation.dt;
    let quad = PlanarQuadrotor::new(config.quadrotor_params(), config.initial_state())?;
    let mut controller =
        LqrController::design(&quad, &config.lqr_weights(), dt, &config.riccati_options())?;
    controller.set_goal(config.goal())?;
    let mut simulation = Simulation::new(quad, controller, config.viewport()?, dt)?
        .with_realtime(config.simulation.realtime);
    let mut events = config.event_schedule();
    if config.visualization.enabled {
        let (arm_length, interval) = (
            config.quadrotor.arm_length,
            config.visualization.render_interval,
        );
        let mut sink = match &config.visualization.save_path {
            Some(path) => {
                log::info!("Recording to {}", path);
                RerunSink::save(path, arm_length, interval)?
            }
            None => RerunSink::spawn(arm_length, interval)?,
        };
        simulation.run(&mut events, &mut sink)?;
    } else {
        simulation.run(&mut events, &mut NullSink)?;
    }
    log::info!(
        "Simulation finished at {:.3} s after {} ticks",
        simulation.elapsed(),
        simulation.ticks()
    );
    Ok(())
}
