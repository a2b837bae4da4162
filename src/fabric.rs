//! The shared UDP transport fabric: one control-channel socket and one
//! state-channel socket, each with a long-lived receiver thread that
//! demultiplexes inbound datagrams by source IP into the right drone's
//! mailbox. All drones in a process share one `Fabric` — the radio
//! multiplexes every drone onto the client's single control port, so a
//! per-drone socket would simply race for port 8889.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, OnceLock};
use std::thread;

use crate::error::{TelloError, TelloResult};
use crate::registry::DroneRegistry;
use crate::state::parse_state;

/// Default local port the client binds for sending/receiving control datagrams.
pub const CONTROL_PORT: u16 = 8889;
/// Default local port the client binds for receiving state telemetry.
pub const STATE_PORT: u16 = 8890;

const MAX_DATAGRAM: usize = 1024;

/// Owns the control and state sockets and their receiver threads.
///
/// Constructed once per process via [`shared`] for real drones. Tests that
/// need an isolated transport (so a mock drone on an ephemeral port doesn't
/// collide with another test) use [`Fabric::start`] directly with distinct
/// ports.
pub struct Fabric {
    control_socket: UdpSocket,
    /// Port on the *drone's* side that control datagrams are sent to.
    /// Always 8889 against a real Tello; overridable so tests can point at a
    /// mock drone bound to an ephemeral port.
    drone_control_port: u16,
}

impl Fabric {
    /// Bind both sockets and spawn the two receiver threads. Binding failure
    /// is fatal and surfaces as [`TelloError::TransportInit`].
    pub fn start(
        registry: Arc<DroneRegistry>,
        control_bind_port: u16,
        state_bind_port: u16,
        drone_control_port: u16,
    ) -> TelloResult<Arc<Fabric>> {
        let control_socket = bind(control_bind_port)?;
        let state_socket = bind(state_bind_port)?;

        let response_registry = registry.clone();
        let response_socket = control_socket
            .try_clone()
            .map_err(|e| TelloError::TransportInit(format!("failed to clone control socket: {}", e)))?;
        thread::Builder::new()
            .name("tello-response-receiver".into())
            .spawn(move || response_receiver_loop(response_socket, response_registry))
            .map_err(|e| TelloError::TransportInit(format!("failed to spawn response receiver: {}", e)))?;

        thread::Builder::new()
            .name("tello-state-receiver".into())
            .spawn(move || state_receiver_loop(state_socket, registry))
            .map_err(|e| TelloError::TransportInit(format!("failed to spawn state receiver: {}", e)))?;

        Ok(Arc::new(Fabric {
            control_socket,
            drone_control_port,
        }))
    }

    /// Unreliable fire-and-forget send to `(ip, drone_control_port)`.
    pub fn send(&self, ip: Ipv4Addr, bytes: &[u8]) -> TelloResult<()> {
        let target = SocketAddrV4::new(ip, self.drone_control_port);
        self.control_socket
            .send_to(bytes, target)
            .map(|_| ())
            .map_err(|e| TelloError::TransportInit(format!("send to {} failed: {}", target, e)))
    }
}

fn bind(port: u16) -> TelloResult<UdpSocket> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    UdpSocket::bind(addr).map_err(|e| TelloError::TransportInit(format!("couldn't bind to {}: {}", addr, e)))
}

fn response_receiver_loop(socket: UdpSocket, registry: Arc<DroneRegistry>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(src))) => {
                let ip = *src.ip();
                match registry.lookup(ip) {
                    Some(mailbox) => mailbox.push_response(buf[..len].to_vec()),
                    None => log::debug!("response from unknown drone {}, dropping", ip),
                }
            }
            Ok((_, SocketAddr::V6(src))) => {
                log::debug!("ignoring ipv6 response from {}", src);
            }
            Err(e) => {
                log::error!("response receiver error: {}", e);
                break;
            }
        }
    }
}

fn state_receiver_loop(socket: UdpSocket, registry: Arc<DroneRegistry>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(src))) => {
                let ip = *src.ip();
                match registry.lookup(ip) {
                    Some(mailbox) => {
                        let text = String::from_utf8_lossy(&buf[..len]);
                        let fields = parse_state(&text);
                        mailbox.set_state(fields);
                    }
                    None => log::debug!("state from unknown drone {}, dropping", ip),
                }
            }
            Ok((_, SocketAddr::V6(src))) => {
                log::debug!("ignoring ipv6 state packet from {}", src);
            }
            Err(e) => {
                log::error!("state receiver error: {}", e);
                break;
            }
        }
    }
}

static SHARED: OnceLock<TelloResult<(Arc<DroneRegistry>, Arc<Fabric>)>> = OnceLock::new();

/// The process-wide registry + fabric pair used by [`crate::drone::Drone::new`].
/// First call binds the sockets and spawns the receivers; every later call
/// reuses the same pair.
pub fn shared() -> TelloResult<(Arc<DroneRegistry>, Arc<Fabric>)> {
    SHARED
        .get_or_init(|| {
            let registry = Arc::new(DroneRegistry::new());
            let fabric = Fabric::start(registry.clone(), CONTROL_PORT, STATE_PORT, CONTROL_PORT)?;
            Ok((registry, fabric))
        })
        .clone()
}

#[cfg(test)]
use std::time::Duration;

#[test]
fn send_and_demux_response_round_trip() {
    let registry = Arc::new(DroneRegistry::new());

    // mock drone: an ordinary socket standing in for the physical drone
    let mock_drone = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mock_port = mock_drone.local_addr().unwrap().port();

    let fabric = Fabric::start(registry.clone(), 0, 0, mock_port).unwrap();
    let client_ip: Ipv4Addr = "127.0.0.1".parse().unwrap();
    let mailbox = registry.register(client_ip);

    fabric.send(client_ip, b"command").unwrap();

    let mut buf = [0u8; 32];
    let (len, from) = mock_drone.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"command");

    mock_drone.send_to(b"ok", from).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(resp) = mailbox.pop_response() {
            assert_eq!(resp, b"ok");
            break;
        }
        assert!(std::time::Instant::now() < deadline, "timed out waiting for response demux");
        thread::sleep(Duration::from_millis(10));
    }
}
