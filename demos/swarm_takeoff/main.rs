//! Fan out a takeoff/land cycle across a hardcoded list of drone IPs, with a
//! mid-flight rendezvous so every drone finishes rising before drone 2 flips
//! and the whole group lands together. To read the IP list from a file
//! instead, swap the `Swarm::from_ips` call below for `Swarm::from_file`.

use std::time::Duration;
use tello::Swarm;

fn main() -> tello::TelloResult<()> {
    env_logger::init();

    let swarm = Swarm::from_ips(&["192.168.10.1", "192.168.10.2", "192.168.10.3"], 3)?;

    let sync = swarm.sync_handle();
    swarm.parallel(move |index, drone| {
        if let Err(e) = drone.takeoff() {
            log::warn!("drone {} failed to take off: {}", index, e);
        }

        // rendezvous: nobody proceeds past here until every drone is airborne
        if sync.wait(Duration::from_secs(10)).is_err() {
            log::warn!("drone {} never saw the rest of the swarm rise", index);
        }

        if index == 1 {
            if let Err(e) = drone.flip_forward() {
                log::warn!("drone {} failed to flip: {}", index, e);
            }
        }
    });

    std::thread::sleep(Duration::from_secs(2));

    for (index, result) in swarm.land().into_iter().enumerate() {
        if let Err(e) = result {
            log::warn!("drone {} failed to land: {}", index, e);
        }
    }

    Ok(())
}
