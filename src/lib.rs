//! # tello
//!
//! A client for the Ryze/DJI Tello text-based SDK (2.0/3.0), the protocol
//! spoken over UDP by the consumer Tello and Tello EDU drones. It covers the
//! control channel (port 8889), the telemetry channel (port 8890) and a
//! background worker for the raw H.264 video channel (port 11111 by
//! default), plus a swarm coordinator for driving many drones from one
//! process.
//!
//! ## Single drone
//!
//! ```no_run
//! use tello::Drone;
//!
//! # fn main() -> tello::TelloResult<()> {
//! let drone = Drone::new("192.168.10.1")?;
//! drone.connect(true)?;
//! drone.takeoff()?;
//! drone.move_up(50)?;
//! drone.land()?;
//! # Ok(())
//! # }
//! ```
//!
//! Every `Drone` shares one process-wide [`Fabric`] (socket pair + receiver
//! threads) the first time [`Drone::new`] is called — the radio on a real
//! Tello answers on a single fixed port, so binding a second control socket
//! in the same process would just race the first for that port.
//!
//! ## Swarm
//!
//! ```no_run
//! use tello::Swarm;
//! use std::time::Duration;
//!
//! # fn main() -> tello::TelloResult<()> {
//! let swarm = Swarm::from_ips(&["192.168.10.1", "192.168.10.2"], 3)?;
//! swarm.takeoff();
//! swarm.sync(Duration::from_secs(5))?;
//! swarm.land();
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! This crate logs through the [`log`] facade rather than bringing in a
//! subscriber of its own — wire up `env_logger`, `fern`, or whatever your
//! application already uses to see it.

mod drone;
mod error;
mod fabric;
mod registry;
mod state;
mod swarm;
mod video;

pub use drone::{Drone, Flip, VideoFps, VideoResolution};
pub use error::{TelloError, TelloResult};
pub use fabric::{Fabric, CONTROL_PORT, STATE_PORT};
pub use registry::DroneRegistry;
pub use state::{StateSnapshot, StateValue};
pub use swarm::{SyncHandle, Swarm};
pub use video::{Frame, FrameSource, VideoWorker};
