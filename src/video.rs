//! Background video ingestion. The H.264 bitstream itself arrives on a raw
//! UDP socket (port 11111 by default) and is decoded by whatever the caller
//! plugs in as a [`FrameSource`] — linking a real decoder is outside this
//! crate; [`FrameSource`] exists so the worker loop can be tested without one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{TelloError, TelloResult};

const DEFAULT_WIDTH: usize = 400;
const DEFAULT_HEIGHT: usize = 300;
const BOUNDED_QUEUE_DEPTH: usize = 32;

/// One decoded RGB frame. `data.len()` is always `width * height * 3`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Frame {
    fn blank(width: usize, height: usize) -> Frame {
        Frame {
            width,
            height,
            data: vec![0u8; width * height * 3],
        }
    }
}

/// Abstracts the external H.264 decoder feeding raw video datagrams in and
/// handing decoded RGB frames out. A real implementation wraps something
/// like an ffmpeg/openh264 pipe; tests use a stub that synthesizes frames
/// without linking a decoder at all.
pub trait FrameSource: Send {
    /// Open the underlying decode pipeline. Called once, from the worker
    /// thread, before the first `next_frame`.
    fn open(&mut self) -> TelloResult<()>;

    /// Block until the next decoded frame is ready, or return `None` if the
    /// source has been shut down.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Tear down the decode pipeline. Called once as the worker thread exits.
    fn close(&mut self);
}

enum Buffer {
    /// `BackgroundFrameRead`-style: only the most recent frame is kept.
    Latest(Mutex<Frame>),
    /// Bounded FIFO: up to `BOUNDED_QUEUE_DEPTH` frames, oldest dropped first.
    Fifo(Mutex<VecDeque<Frame>>, Condvar),
}

struct Shared {
    buffer: Buffer,
    stopped: AtomicBool,
}

/// Handle to a running background video worker. Cheap to clone; every clone
/// shares the same underlying thread and buffer.
#[derive(Clone)]
pub struct VideoWorker {
    shared: Arc<Shared>,
    stop_flag: Arc<AtomicBool>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl VideoWorker {
    /// Start the worker in latest-only mode (mirrors `BackgroundFrameRead`):
    /// `get_frame` never blocks and always returns the most recent frame,
    /// falling back to a blank `400x300` frame until the first one arrives.
    pub fn start<S: FrameSource + 'static>(source: S, open_timeout: Duration) -> TelloResult<VideoWorker> {
        Self::start_with(source, open_timeout, Buffer::Latest(Mutex::new(Frame::blank(DEFAULT_WIDTH, DEFAULT_HEIGHT))))
    }

    /// Start the worker in bounded-FIFO mode: up to 32 queued frames, oldest
    /// dropped on overflow, `get_frame` blocks for the next frame in order.
    pub fn start_buffered<S: FrameSource + 'static>(source: S, open_timeout: Duration) -> TelloResult<VideoWorker> {
        Self::start_with(
            source,
            open_timeout,
            Buffer::Fifo(Mutex::new(VecDeque::with_capacity(BOUNDED_QUEUE_DEPTH)), Condvar::new()),
        )
    }

    fn start_with<S: FrameSource + 'static>(mut source: S, open_timeout: Duration, buffer: Buffer) -> TelloResult<VideoWorker> {
        let opened = Arc::new(Mutex::new(None::<TelloResult<()>>));
        let opened_cond = Arc::new(Condvar::new());

        let shared = Arc::new(Shared {
            buffer,
            stopped: AtomicBool::new(false),
        });
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker_shared = shared.clone();
        let worker_stop = stop_flag.clone();
        let worker_opened = opened.clone();
        let worker_opened_cond = opened_cond.clone();

        let handle = thread::Builder::new()
            .name("tello-video-worker".into())
            .spawn(move || {
                let open_result = source.open();
                {
                    let mut slot = worker_opened.lock().expect("video open signal poisoned");
                    *slot = Some(open_result.clone());
                    worker_opened_cond.notify_all();
                }
                if open_result.is_err() {
                    return;
                }

                while !worker_stop.load(Ordering::SeqCst) {
                    match source.next_frame() {
                        Some(frame) => push_frame(&worker_shared, frame),
                        None => break,
                    }
                }
                source.close();
                worker_shared.stopped.store(true, Ordering::SeqCst);
            })
            .map_err(|e| TelloError::VideoInit(format!("failed to spawn video worker thread: {}", e)))?;

        let mut slot = opened.lock().expect("video open signal poisoned");
        let deadline = Instant::now() + open_timeout;
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return Err(TelloError::VideoInit("timed out waiting for video source to open".to_string()));
            }
            let (guard, _) = opened_cond
                .wait_timeout(slot, deadline - now)
                .expect("video open signal poisoned");
            slot = guard;
        }
        match slot.take().expect("checked is_none above") {
            Ok(()) => {}
            Err(e) => return Err(e),
        }

        Ok(VideoWorker {
            shared,
            stop_flag,
            handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Latest-only mode: the most recently decoded frame, or a blank frame
    /// if none has arrived yet. Bounded-FIFO mode: blocks for the next frame
    /// in arrival order, or returns `None` once the worker has stopped and
    /// drained.
    pub fn get_frame(&self) -> Option<Frame> {
        match &self.shared.buffer {
            Buffer::Latest(slot) => Some(slot.lock().expect("video frame slot poisoned").clone()),
            Buffer::Fifo(queue, cond) => {
                let mut queue = queue.lock().expect("video frame queue poisoned");
                loop {
                    if let Some(frame) = queue.pop_front() {
                        return Some(frame);
                    }
                    if self.shared.stopped.load(Ordering::SeqCst) {
                        return None;
                    }
                    queue = cond
                        .wait_timeout(queue, Duration::from_millis(200))
                        .expect("video frame queue poisoned")
                        .0;
                }
            }
        }
    }

    /// Signal the worker thread to stop and join it. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().expect("video handle lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn push_frame(shared: &Shared, frame: Frame) {
    match &shared.buffer {
        Buffer::Latest(slot) => {
            *slot.lock().expect("video frame slot poisoned") = frame;
        }
        Buffer::Fifo(queue, cond) => {
            let mut queue = queue.lock().expect("video frame queue poisoned");
            if queue.len() >= BOUNDED_QUEUE_DEPTH {
                queue.pop_front();
            }
            queue.push_back(frame);
            cond.notify_one();
        }
    }
}

#[cfg(test)]
use std::sync::atomic::AtomicUsize;

#[cfg(test)]
struct StubSource {
    frames_remaining: usize,
    emitted: Arc<AtomicUsize>,
}

#[cfg(test)]
impl FrameSource for StubSource {
    fn open(&mut self) -> TelloResult<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.frames_remaining == 0 {
            return None;
        }
        self.frames_remaining -= 1;
        self.emitted.fetch_add(1, Ordering::SeqCst);
        Some(Frame::blank(8, 8))
    }

    fn close(&mut self) {}
}

#[cfg(test)]
struct FailingSource;

#[cfg(test)]
impl FrameSource for FailingSource {
    fn open(&mut self) -> TelloResult<()> {
        Err(TelloError::VideoInit("mock open failure".to_string()))
    }
    fn next_frame(&mut self) -> Option<Frame> {
        None
    }
    fn close(&mut self) {}
}

#[test]
fn latest_mode_returns_blank_frame_before_any_decoded_frame_arrives() {
    let emitted = Arc::new(AtomicUsize::new(0));
    let worker = VideoWorker::start(
        StubSource { frames_remaining: 0, emitted },
        Duration::from_secs(1),
    )
    .unwrap();

    let frame = worker.get_frame().unwrap();
    assert_eq!(frame.width, DEFAULT_WIDTH);
    assert_eq!(frame.height, DEFAULT_HEIGHT);
    assert!(frame.data.iter().all(|&b| b == 0));
    worker.stop();
}

#[test]
fn latest_mode_eventually_observes_decoded_frame() {
    let emitted = Arc::new(AtomicUsize::new(0));
    let worker = VideoWorker::start(
        StubSource { frames_remaining: 100, emitted: emitted.clone() },
        Duration::from_secs(1),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let frame = worker.get_frame().unwrap();
        if frame.width == 8 {
            break;
        }
        assert!(Instant::now() < deadline, "never observed a decoded frame");
        thread::sleep(Duration::from_millis(10));
    }
    worker.stop();
}

#[test]
fn bounded_fifo_preserves_order_and_drops_oldest_on_overflow() {
    let emitted = Arc::new(AtomicUsize::new(0));
    let worker = VideoWorker::start_buffered(
        StubSource { frames_remaining: BOUNDED_QUEUE_DEPTH * 2, emitted: emitted.clone() },
        Duration::from_secs(1),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(100));

    let mut drained = 0;
    while worker.get_frame().is_some() {
        drained += 1;
        if drained > BOUNDED_QUEUE_DEPTH + 1 {
            break;
        }
    }
    assert!(drained <= BOUNDED_QUEUE_DEPTH, "fifo should never hold more than its capacity");
    worker.stop();
}

#[test]
fn open_failure_surfaces_as_video_init_error() {
    let err = VideoWorker::start(FailingSource, Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, TelloError::VideoInit(_)));
}

#[test]
fn stop_is_idempotent() {
    let emitted = Arc::new(AtomicUsize::new(0));
    let worker = VideoWorker::start(
        StubSource { frames_remaining: 5, emitted },
        Duration::from_secs(1),
    )
    .unwrap();
    worker.stop();
    worker.stop();
}
