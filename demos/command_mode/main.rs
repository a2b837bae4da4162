//! Minimal single-drone command-mode session: connect, take off, fly a
//! short square, land.

use std::time::Duration;
use tello::Drone;

fn main() -> tello::TelloResult<()> {
    env_logger::init();

    let drone = Drone::new("192.168.10.1")?;
    drone.connect(true)?;

    log::info!("battery: {}", drone.query_battery()?);

    drone.takeoff()?;
    std::thread::sleep(Duration::from_secs(2));

    for _ in 0..4 {
        drone.move_forward(60)?;
        drone.rotate_cw(90)?;
    }

    drone.land()?;
    Ok(())
}
