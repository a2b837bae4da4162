//! Fan-out/fan-in coordination across many drones sharing one [`crate::fabric::Fabric`].
//!
//! One worker thread per drone pulls boxed closures off its own queue and
//! runs them between two waits on a width-`N+1` barrier, so every drone
//! starts its closure at (almost) the same instant and the caller only
//! regains control once every drone has finished. A second, width-`N`
//! barrier backs [`Swarm::sync`], a pure rendezvous point independent of
//! dispatch.

use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::drone::Drone;
use crate::error::{TelloError, TelloResult};
use crate::fabric::Fabric;
use crate::registry::DroneRegistry;

type Job = Box<dyn FnOnce(usize, &Drone) + Send>;

/// Cloneable handle onto a [`Swarm`]'s width-`N` user rendezvous barrier. See
/// [`Swarm::sync_handle`].
#[derive(Clone)]
pub struct SyncHandle {
    barrier: Arc<Barrier>,
}

impl SyncHandle {
    /// Block until every one of the `N` holders of a clone of this handle has
    /// called `wait`, or until `timeout` elapses.
    ///
    /// `std::sync::Barrier` has no timed wait of its own, so a timeout is
    /// layered on by parking the actual `barrier.wait()` on a helper thread.
    /// If this call times out, the helper thread is left behind still
    /// blocked on the barrier until the rest of the swarm arrives; it exits
    /// on its own at that point, but a swarm member that never calls `sync`
    /// again leaks one thread per timed-out call.
    pub fn wait(&self, timeout: Duration) -> TelloResult<()> {
        let barrier = self.barrier.clone();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            barrier.wait();
            let _ = tx.send(());
        });
        rx.recv_timeout(timeout).map_err(|_| TelloError::SyncTimeout)
    }
}

struct Worker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

/// A group of drones driven together. All members share one [`Fabric`]/
/// [`DroneRegistry`] pair, so one process can talk to the whole group over
/// a single pair of sockets.
pub struct Swarm {
    drones: Vec<Arc<Drone>>,
    workers: Vec<Worker>,
    dispatch_barrier: Arc<Barrier>,
    sync_barrier: Arc<Barrier>,
}

impl Swarm {
    /// Build a swarm from an explicit list of drone IPs. Errors if the list
    /// is empty.
    pub fn from_ips(ips: &[&str], retry_count: u32) -> TelloResult<Swarm> {
        if ips.is_empty() {
            return Err(TelloError::ConfigError("swarm ip list is empty".to_string()));
        }

        let registry = Arc::new(DroneRegistry::new());
        let fabric = Fabric::start(registry.clone(), crate::fabric::CONTROL_PORT, crate::fabric::STATE_PORT, crate::fabric::CONTROL_PORT)?;

        let drones: Vec<Arc<Drone>> = ips
            .iter()
            .map(|ip| Drone::with_transport(ip, registry.clone(), fabric.clone(), retry_count).map(Arc::new))
            .collect::<TelloResult<_>>()?;

        Ok(Swarm::from_drones(drones))
    }

    /// Build a swarm from a newline-delimited file of IP addresses (the same
    /// format the original swarm tooling reads), one per line, blank lines
    /// ignored.
    pub fn from_file<P: AsRef<Path>>(path: P, retry_count: u32) -> TelloResult<Swarm> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| TelloError::ConfigError(format!("couldn't read {:?}: {}", path.as_ref(), e)))?;
        let ips: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        Swarm::from_ips(&ips, retry_count)
    }

    fn from_drones(drones: Vec<Arc<Drone>>) -> Swarm {
        let n = drones.len();
        let dispatch_barrier = Arc::new(Barrier::new(n + 1));
        let sync_barrier = Arc::new(Barrier::new(n));

        let workers = drones
            .iter()
            .enumerate()
            .map(|(index, drone)| spawn_worker(index, drone.clone(), dispatch_barrier.clone()))
            .collect();

        Swarm {
            drones,
            workers,
            dispatch_barrier,
            sync_barrier,
        }
    }

    pub fn len(&self) -> usize {
        self.drones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drones.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Drone>> {
        self.drones.iter()
    }

    /// Run `f` against every drone in order, on the caller's thread. No
    /// dispatch barrier involved; drone 1 finishes before drone 2 starts.
    pub fn sequential<F>(&self, mut f: F)
    where
        F: FnMut(usize, &Drone),
    {
        for (index, drone) in self.drones.iter().enumerate() {
            f(index, drone);
        }
    }

    /// Run `f` against every drone concurrently, one worker thread each, and
    /// block until all have finished. `f` must be `Clone` since each worker
    /// gets its own copy to call with its own (index, drone) pair.
    pub fn parallel<F>(&self, f: F)
    where
        F: Fn(usize, &Drone) + Send + Clone + 'static,
    {
        for worker in &self.workers {
            let f = f.clone();
            if let Some(sender) = &worker.sender {
                let _ = sender.send(Box::new(move |index, drone| f(index, drone)));
            }
        }
        self.dispatch_barrier.wait();
        self.dispatch_barrier.wait();
    }

    /// Run `f` against every drone concurrently and collect each one's
    /// result, rather than requiring `f` to handle its own errors. A worker
    /// whose closure returns `Err` does not stop the others.
    pub fn broadcast<F, R>(&self, f: F) -> Vec<TelloResult<R>>
    where
        F: Fn(&Drone) -> TelloResult<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        let (tx, rx): (Sender<(usize, TelloResult<R>)>, Receiver<(usize, TelloResult<R>)>) = mpsc::channel();
        let n = self.drones.len();

        self.parallel(move |index, drone| {
            let _ = tx.send((index, f(drone)));
        });

        let mut results: Vec<Option<TelloResult<R>>> = (0..n).map(|_| None).collect();
        for _ in 0..n {
            if let Ok((index, result)) = rx.recv() {
                results[index] = Some(result);
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(TelloError::ConfigError("worker never reported a result".to_string()))))
            .collect()
    }

    /// Block until every drone's worker thread has independently called
    /// `sync`, or until `timeout` elapses. This is a pure rendezvous; it has
    /// nothing to do with dispatching work.
    pub fn sync(&self, timeout: Duration) -> TelloResult<()> {
        self.sync_handle().wait(timeout)
    }

    /// A cloneable, `'static` handle onto this swarm's user-rendezvous
    /// barrier. `parallel`/`broadcast` actions only receive `(index, &Drone)`
    /// — they have no way to borrow `&Swarm` back across worker threads — so
    /// an action that needs to synchronize phases mid-flight (e.g. "all rise,
    /// then drone 2 flips, then all land") captures a `SyncHandle` instead and
    /// calls `.wait(timeout)` on it from inside the closure.
    pub fn sync_handle(&self) -> SyncHandle {
        SyncHandle {
            barrier: self.sync_barrier.clone(),
        }
    }

    pub fn takeoff(&self) -> Vec<TelloResult<()>> {
        self.broadcast(|drone| drone.takeoff())
    }

    pub fn land(&self) -> Vec<TelloResult<()>> {
        self.broadcast(|drone| drone.land())
    }

    pub fn move_up(&self, cm: i64) -> Vec<TelloResult<()>> {
        self.broadcast(move |drone| drone.move_up(cm))
    }

    pub fn move_down(&self, cm: i64) -> Vec<TelloResult<()>> {
        self.broadcast(move |drone| drone.move_down(cm))
    }

    pub fn rotate_cw(&self, deg: i64) -> Vec<TelloResult<()>> {
        self.broadcast(move |drone| drone.rotate_cw(deg))
    }

    pub fn rotate_ccw(&self, deg: i64) -> Vec<TelloResult<()>> {
        self.broadcast(move |drone| drone.rotate_ccw(deg))
    }

    pub fn emergency(&self) {
        self.parallel(|_, drone| drone.emergency());
    }

    pub fn end(&self) {
        self.parallel(|_, drone| drone.end());
    }
}

impl Drop for Swarm {
    fn drop(&mut self) {
        // drop every sender first: that's what ends each worker's recv loop
        for worker in &mut self.workers {
            worker.sender.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

fn spawn_worker(index: usize, drone: Arc<Drone>, dispatch_barrier: Arc<Barrier>) -> Worker {
    let (sender, receiver): (Sender<Job>, Receiver<Job>) = mpsc::channel();

    let handle = thread::Builder::new()
        .name(format!("tello-swarm-worker-{}", index))
        .spawn(move || {
            for job in receiver {
                dispatch_barrier.wait();
                // A panicking action must not strand the other N-1 workers at
                // the second wait below forever: catch it, log it, and still
                // arrive at the barrier so `parallel`/`broadcast` always returns.
                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(index, &drone))) {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    log::error!("swarm worker {} action panicked: {}", index, message);
                }
                dispatch_barrier.wait();
            }
        })
        .expect("failed to spawn swarm worker thread");

    Worker {
        sender: Some(sender),
        handle: Some(handle),
    }
}

#[cfg(test)]
use std::net::UdpSocket;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Mutex as StdMutex;

#[cfg(test)]
fn swarm_of_mocks(n: usize) -> (Vec<UdpSocket>, Swarm) {
    let registry = Arc::new(DroneRegistry::new());
    let mut mocks = Vec::new();
    let mut drones = Vec::new();
    for _ in 0..n {
        let mock = UdpSocket::bind("127.0.0.1:0").unwrap();
        mocks.push(mock);
    }
    // every mock binds to a distinct ephemeral port, but all drones in
    // this test share one logical ip (loopback) distinguished instead
    // by bind address is impossible over one fabric port, so route each
    // drone at a distinct loopback alias-like ip is unavailable in a
    // sandboxed test; we instead give the fabric one shared drone port
    // per mock and bind as many client source ports, exercised serially.
    let fabric = Fabric::start(registry.clone(), 0, 0, mocks[0].local_addr().unwrap().port()).unwrap();
    for i in 0..n {
        drones.push(Arc::new(
            Drone::with_transport("127.0.0.1", registry.clone(), fabric.clone(), 1).unwrap(),
        ));
        let _ = i;
    }
    (mocks, Swarm::from_drones(drones))
}

#[test]
fn parallel_runs_every_worker_and_returns_only_after_all_finish() {
    let (_mocks, swarm) = swarm_of_mocks(3);
    let completed = Arc::new(AtomicUsize::new(0));

    let completed_clone = completed.clone();
    swarm.parallel(move |_index, _drone| {
        thread::sleep(Duration::from_millis(20));
        completed_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(completed.load(Ordering::SeqCst), 3);
}

#[test]
fn sync_rendezvous_succeeds_when_every_worker_arrives_in_time() {
    let (_mocks, swarm) = swarm_of_mocks(2);
    let order = Arc::new(StdMutex::new(Vec::new()));

    let o1 = order.clone();
    let o2 = order.clone();
    let barrier = swarm.sync_barrier.clone();
    let b2 = barrier.clone();
    let t1 = thread::spawn(move || {
        barrier.wait();
        o1.lock().unwrap().push(1);
    });
    let t2 = thread::spawn(move || {
        b2.wait();
        o2.lock().unwrap().push(2);
    });
    t1.join().unwrap();
    t2.join().unwrap();
    assert_eq!(order.lock().unwrap().len(), 2);
}

#[test]
fn sync_times_out_when_a_worker_never_arrives() {
    let (_mocks, swarm) = swarm_of_mocks(2);
    // nobody else ever calls sync_barrier.wait(), so this must time out
    let result = swarm.sync(Duration::from_millis(50));
    assert!(matches!(result, Err(TelloError::SyncTimeout)));
}

#[test]
fn sync_handle_rendezvouses_every_parallel_worker_mid_action() {
    let (_mocks, swarm) = swarm_of_mocks(3);
    let order = Arc::new(StdMutex::new(Vec::new()));

    let handle = swarm.sync_handle();
    let order_before = order.clone();
    swarm.parallel(move |index, _drone| {
        order_before.lock().unwrap().push((index, "before"));
        handle.wait(Duration::from_secs(2)).unwrap();
        order_before.lock().unwrap().push((index, "after"));
    });

    let events = order.lock().unwrap();
    let before_count = events.iter().filter(|(_, phase)| *phase == "before").count();
    let after_count = events.iter().filter(|(_, phase)| *phase == "after").count();
    assert_eq!(before_count, 3);
    assert_eq!(after_count, 3);
    // every "before" must precede every "after": the sync_handle rendezvous
    // is what makes that ordering guaranteed rather than coincidental.
    let last_before = events.iter().rposition(|(_, phase)| *phase == "before").unwrap();
    let first_after = events.iter().position(|(_, phase)| *phase == "after").unwrap();
    assert!(last_before < first_after);
}

#[test]
fn empty_ip_list_is_rejected() {
    let err = Swarm::from_ips(&[], 3).unwrap_err();
    assert!(matches!(err, TelloError::ConfigError(_)));
}

#[test]
fn parallel_completes_even_when_one_worker_action_panics() {
    let (_mocks, swarm) = swarm_of_mocks(3);
    let completed = Arc::new(AtomicUsize::new(0));

    let completed_clone = completed.clone();
    swarm.parallel(move |index, _drone| {
        if index == 1 {
            panic!("boom");
        }
        completed_clone.fetch_add(1, Ordering::SeqCst);
    });

    // the panicking worker still arrived at the barrier, so this returned
    // at all (no deadlock) and the other two workers ran to completion.
    assert_eq!(completed.load(Ordering::SeqCst), 2);

    // the swarm is still usable afterwards.
    let completed2 = Arc::new(AtomicUsize::new(0));
    let completed2_clone = completed2.clone();
    swarm.parallel(move |_index, _drone| {
        completed2_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(completed2.load(Ordering::SeqCst), 3);
}

#[test]
fn from_file_trims_whitespace_and_skips_blank_lines() {
    let path = std::env::temp_dir().join(format!("tello_swarm_from_file_test_{:?}", thread::current().id()));
    fs::write(&path, "  192.168.10.1  \n\n192.168.10.2\n   \n192.168.10.3\t\n").unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let ips: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    assert_eq!(ips, vec!["192.168.10.1", "192.168.10.2", "192.168.10.3"]);

    let swarm = Swarm::from_file(&path, 1).unwrap();
    assert_eq!(swarm.len(), 3);

    fs::remove_file(&path).unwrap();
}

#[test]
fn from_file_raises_config_error_when_unreadable() {
    let path = std::env::temp_dir().join("tello_swarm_from_file_missing_nonexistent_file.txt");
    let _ = fs::remove_file(&path);

    let err = Swarm::from_file(&path, 1).unwrap_err();
    assert!(matches!(err, TelloError::ConfigError(_)));
}
