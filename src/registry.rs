//! Per-drone mailboxes and the process-wide registry that maps a drone's IP
//! address to its mailbox. Shared by [`crate::fabric::Fabric`]'s two
//! receiver threads and every [`crate::drone::Drone`]'s command loop.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::state::StateSnapshot;

const MAX_PENDING_RESPONSES: usize = 64;

/// Response FIFO plus latest state snapshot for one drone.
///
/// Invariant: only the response receiver thread appends to `responses`; only
/// the owning `Drone`'s command loop pops from it. Only the state receiver
/// thread writes `state`; any number of readers may observe it concurrently.
#[derive(Default)]
pub struct Mailbox {
    responses: Mutex<VecDeque<Vec<u8>>>,
    state: RwLock<StateSnapshot>,
}

impl Mailbox {
    fn new() -> Self {
        Mailbox {
            responses: Mutex::new(VecDeque::new()),
            state: RwLock::new(StateSnapshot::default()),
        }
    }

    /// Append a raw response datagram, dropping the oldest if the queue is
    /// already at capacity — a drone that floods us with unawaited responses
    /// must not grow this queue without bound.
    pub fn push_response(&self, data: Vec<u8>) {
        let mut responses = self.responses.lock().expect("mailbox response queue poisoned");
        if responses.len() >= MAX_PENDING_RESPONSES {
            responses.pop_front();
        }
        responses.push_back(data);
    }

    /// Pop the oldest pending response, if any.
    pub fn pop_response(&self) -> Option<Vec<u8>> {
        self.responses.lock().expect("mailbox response queue poisoned").pop_front()
    }

    /// Replace the state snapshot wholesale (atomic from readers' point of view).
    pub fn set_state(&self, fields: std::collections::HashMap<String, crate::state::StateValue>) {
        let snapshot = StateSnapshot {
            fields,
            received_at: Some(Instant::now()),
        };
        *self.state.write().expect("mailbox state lock poisoned") = snapshot;
    }

    /// Snapshot the current state (cheap clone of a small map).
    pub fn state(&self) -> StateSnapshot {
        self.state.read().expect("mailbox state lock poisoned").clone()
    }
}

/// Process-wide mapping from drone IP to its [`Mailbox`].
///
/// Safe for concurrent reads and rare writes: the two fabric receiver threads
/// only ever call [`DroneRegistry::lookup`], never `register`/`remove`.
#[derive(Default)]
pub struct DroneRegistry {
    mailboxes: RwLock<HashMap<Ipv4Addr, Arc<Mailbox>>>,
}

impl DroneRegistry {
    pub fn new() -> Self {
        DroneRegistry::default()
    }

    pub fn register(&self, ip: Ipv4Addr) -> Arc<Mailbox> {
        let mut mailboxes = self.mailboxes.write().expect("registry lock poisoned");
        mailboxes.entry(ip).or_insert_with(|| Arc::new(Mailbox::new())).clone()
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<Arc<Mailbox>> {
        self.mailboxes.read().expect("registry lock poisoned").get(&ip).cloned()
    }

    pub fn remove(&self, ip: Ipv4Addr) {
        self.mailboxes.write().expect("registry lock poisoned").remove(&ip);
    }
}

#[test]
fn register_then_lookup_returns_same_mailbox() {
    let registry = DroneRegistry::new();
    let ip: Ipv4Addr = "192.168.10.1".parse().unwrap();

    let mailbox = registry.register(ip);
    mailbox.push_response(b"ok".to_vec());

    let looked_up = registry.lookup(ip).expect("mailbox should exist");
    assert_eq!(looked_up.pop_response(), Some(b"ok".to_vec()));
}

#[test]
fn remove_drops_mailbox() {
    let registry = DroneRegistry::new();
    let ip: Ipv4Addr = "192.168.10.1".parse().unwrap();

    registry.register(ip);
    registry.remove(ip);

    assert!(registry.lookup(ip).is_none());
}

#[test]
fn demux_isolates_drones_by_ip() {
    let registry = DroneRegistry::new();
    let a: Ipv4Addr = "192.168.10.1".parse().unwrap();
    let b: Ipv4Addr = "192.168.10.2".parse().unwrap();

    let mailbox_a = registry.register(a);
    let mailbox_b = registry.register(b);

    mailbox_a.push_response(b"ok".to_vec());

    assert!(mailbox_a.pop_response().is_some());
    assert!(mailbox_b.pop_response().is_none());
}
