//! One physical drone: the command state machine (send → await → retry →
//! raise), timing gates, cached telemetry, and teardown.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::error::{TelloError, TelloResult};
use crate::fabric::{self, Fabric};
use crate::registry::{DroneRegistry, Mailbox};
use crate::state::StateValue;
use crate::video::{FrameSource, VideoWorker};

const DEFAULT_RETRY_COUNT: u32 = 3;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(7);
const TAKEOFF_TIMEOUT: Duration = Duration::from_secs(20);
const FRAME_GRAB_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_INTER_COMMAND: Duration = Duration::from_millis(100);
const MIN_INTER_RC: Duration = Duration::from_millis(1);
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_STATE_WAIT: Duration = Duration::from_secs(1);
const DEFAULT_VIDEO_PORT: u16 = 11111;

const TIMEOUT_SENTINEL: &str = "Timeout error!";
const DECODE_ERROR_SENTINEL: &str = "response decode error";

/// Flip direction for the `flip` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    Left,
    Right,
    Forward,
    Back,
}

impl Flip {
    fn code(self) -> &'static str {
        match self {
            Flip::Left => "l",
            Flip::Right => "r",
            Flip::Forward => "f",
            Flip::Back => "b",
        }
    }
}

/// `setresolution` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoResolution {
    Low,
    High,
}

impl VideoResolution {
    fn code(self) -> &'static str {
        match self {
            VideoResolution::Low => "low",
            VideoResolution::High => "high",
        }
    }
}

/// `setfps` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFps {
    Low,
    Middle,
    High,
}

impl VideoFps {
    fn code(self) -> &'static str {
        match self {
            VideoFps::Low => "low",
            VideoFps::Middle => "middle",
            VideoFps::High => "high",
        }
    }
}

/// One physical Tello. Owns timing state and a weak (by-IP) handle into the
/// shared [`DroneRegistry`]'s mailbox; the socket and receiver threads live
/// in the shared [`Fabric`].
///
/// Concurrency contract: one in-flight command per `Drone` at a time. The
/// library does not serialize interleaved calls from multiple threads against
/// the same `Drone`; callers racing commands on one drone will each claim
/// whichever response arrives first on the shared FIFO. Concurrent use of a
/// single `Drone` from multiple threads is undefined; use one thread per
/// drone, or synchronize externally.
pub struct Drone {
    ip: Ipv4Addr,
    fabric: Arc<Fabric>,
    registry: Arc<DroneRegistry>,
    mailbox: Arc<Mailbox>,

    retry_count: u32,
    response_timeout: Duration,
    takeoff_timeout: Duration,
    frame_grab_timeout: Duration,
    min_inter_command: Duration,
    min_inter_rc: Duration,

    last_command_at: Mutex<Instant>,
    last_rc_at: Mutex<Instant>,

    stream_on: AtomicBool,
    is_flying: AtomicBool,
    ended: AtomicBool,

    video_port: Mutex<u16>,
    video: Mutex<Option<VideoWorker>>,
}

impl Drone {
    /// Connect to the default Tello AP address (`192.168.10.1`) using the
    /// process-wide shared fabric. This is the constructor most callers want.
    pub fn new(ip: &str) -> TelloResult<Drone> {
        let (registry, fabric) = fabric::shared()?;
        Drone::with_transport(ip, registry, fabric, DEFAULT_RETRY_COUNT)
    }

    /// Construct against an explicit registry/fabric pair. Used by [`crate::swarm::Swarm`]
    /// (so every member shares one fabric) and by tests (so a mock drone's
    /// fabric doesn't collide with the process-wide one).
    pub fn with_transport(
        ip: &str,
        registry: Arc<DroneRegistry>,
        fabric: Arc<Fabric>,
        retry_count: u32,
    ) -> TelloResult<Drone> {
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|e| TelloError::TransportInit(format!("invalid drone ip {:?}: {}", ip, e)))?;
        let mailbox = registry.register(ip);

        Ok(Drone {
            ip,
            fabric,
            registry,
            mailbox,
            retry_count,
            response_timeout: RESPONSE_TIMEOUT,
            takeoff_timeout: TAKEOFF_TIMEOUT,
            frame_grab_timeout: FRAME_GRAB_TIMEOUT,
            min_inter_command: MIN_INTER_COMMAND,
            min_inter_rc: MIN_INTER_RC,
            last_command_at: Mutex::new(Instant::now() - MIN_INTER_COMMAND),
            last_rc_at: Mutex::new(Instant::now() - MIN_INTER_RC),
            stream_on: AtomicBool::new(false),
            is_flying: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            video_port: Mutex::new(DEFAULT_VIDEO_PORT),
            video: Mutex::new(None),
        })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn is_flying(&self) -> bool {
        self.is_flying.load(Ordering::SeqCst)
    }

    pub fn stream_on(&self) -> bool {
        self.stream_on.load(Ordering::SeqCst)
    }

    // ---- send-with-reply protocol (§4.3) -----------------------------------

    fn space_commands(&self) {
        let mut last = self.last_command_at.lock().expect("timing lock poisoned");
        let elapsed = last.elapsed();
        if elapsed < self.min_inter_command {
            sleep(self.min_inter_command - elapsed);
        }
        *last = Instant::now();
    }

    /// Send `command` and block for a reply, applying inter-command spacing.
    /// Never errors: on timeout or decode failure it returns a sentinel
    /// string, matching the "no I/O error surfaces here" contract in §4.3.
    fn send_with_reply(&self, command: &str, timeout: Duration) -> String {
        self.space_commands();

        let send_timestamp = Instant::now();
        if let Err(e) = self.fabric.send(self.ip, command.as_bytes()) {
            log::warn!("send {:?} to {} failed: {}", command, self.ip, e);
        }
        log::info!("send command: {}", command);

        loop {
            if let Some(raw) = self.mailbox.pop_response() {
                *self.last_command_at.lock().expect("timing lock poisoned") = Instant::now();
                return match String::from_utf8(raw) {
                    Ok(text) => {
                        let trimmed = text.trim_end_matches(['\r', '\n']).to_string();
                        log::info!("response {:?}: {}", command, trimmed);
                        trimmed
                    }
                    Err(e) => {
                        log::error!("failed to decode response to {:?}: {}", command, e);
                        DECODE_ERROR_SENTINEL.to_string()
                    }
                };
            }
            if send_timestamp.elapsed() > timeout {
                log::warn!("timeout exceeded on command {:?}", command);
                return TIMEOUT_SENTINEL.to_string();
            }
            sleep(RESPONSE_POLL_INTERVAL);
        }
    }

    fn send_without_reply(&self, command: &str) {
        log::info!("send command (no reply expected): {}", command);
        if let Err(e) = self.fabric.send(self.ip, command.as_bytes()) {
            log::warn!("send {:?} to {} failed: {}", command, self.ip, e);
        }
    }

    /// Control-command wrapper: retries up to `retry_count` times beyond the
    /// initial attempt (so `retry_count + 1` attempts total), succeeding as
    /// soon as a response case-insensitively contains `"ok"`.
    fn send_control_command(&self, command: &str, timeout: Duration) -> TelloResult<()> {
        let mut last_response = String::new();
        for attempt in 0..=self.retry_count {
            last_response = self.send_with_reply(command, timeout);
            if last_response.eq_ignore_ascii_case("ok") {
                return Ok(());
            }
            log::debug!("command attempt {} for {:?} failed", attempt, command);
        }
        Err(TelloError::command_failed(command, last_response, self.retry_count + 1))
    }

    /// Read-command wrapper: a single attempt, raising `CommandFailed` if the
    /// reply carries an error marker.
    fn send_read_command(&self, command: &str) -> TelloResult<String> {
        let response = self.send_with_reply(command, self.response_timeout);
        if response.contains("error") || response.contains("ERROR") || response.contains("False") {
            return Err(TelloError::command_failed(command, response, 1));
        }
        Ok(response)
    }

    fn send_read_command_int(&self, command: &str) -> TelloResult<i64> {
        let response = self.send_read_command(command)?;
        response
            .parse()
            .map_err(|_| TelloError::command_failed(command, response, 1))
    }

    fn send_read_command_float(&self, command: &str) -> TelloResult<f64> {
        let response = self.send_read_command(command)?;
        response
            .parse()
            .map_err(|_| TelloError::command_failed(command, response, 1))
    }

    fn check_range(command: &str, name: &str, value: i64, range: RangeInclusive<i64>) -> TelloResult<()> {
        if range.contains(&value) {
            Ok(())
        } else {
            Err(TelloError::invalid_argument(
                command,
                format!("{} = {} outside {}..={}", name, value, range.start(), range.end()),
            ))
        }
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Enter SDK mode. If `wait_for_state`, additionally poll the state
    /// mailbox at 20Hz for up to one second, raising `TransportInit` if no
    /// state packet ever arrives (guards against a silently-lost handshake).
    pub fn connect(&self, wait_for_state: bool) -> TelloResult<()> {
        self.send_control_command("command", self.response_timeout)?;

        if wait_for_state {
            let deadline = Instant::now() + CONNECT_STATE_WAIT;
            loop {
                if !self.mailbox.state().is_empty() {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(TelloError::TransportInit(
                        "no state packet received after connect()".to_string(),
                    ));
                }
                sleep(STATE_POLL_INTERVAL);
            }
        }
        Ok(())
    }

    /// Idempotent teardown: lands if flying, stops streaming if streaming,
    /// stops the video worker, and removes this drone from the registry.
    /// Command failures during teardown are swallowed.
    pub fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.is_flying() {
            if let Err(e) = self.land() {
                log::debug!("land during end() failed: {}", e);
            }
        }
        if self.stream_on() {
            if let Err(e) = self.streamoff() {
                log::debug!("streamoff during end() failed: {}", e);
            }
        }
        if let Some(worker) = self.video.lock().expect("video lock poisoned").take() {
            worker.stop();
        }
        self.registry.remove(self.ip);
    }

    // ---- movement -------------------------------------------------------------

    pub fn takeoff(&self) -> TelloResult<()> {
        self.send_control_command("takeoff", self.takeoff_timeout)?;
        self.is_flying.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn land(&self) -> TelloResult<()> {
        self.send_control_command("land", self.response_timeout)?;
        self.is_flying.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// `emergency` is wire-classified as no-reply (§6): it cuts the motors
    /// immediately and the drone may not be able to answer at all.
    pub fn emergency(&self) {
        self.send_without_reply("emergency");
    }

    fn mv(&self, command: &str, cm: i64) -> TelloResult<()> {
        Self::check_range(command, "cm", cm, 20..=500)?;
        self.send_control_command(&format!("{} {}", command, cm), self.response_timeout)
    }

    pub fn move_up(&self, cm: i64) -> TelloResult<()> {
        self.mv("up", cm)
    }
    pub fn move_down(&self, cm: i64) -> TelloResult<()> {
        self.mv("down", cm)
    }
    pub fn move_left(&self, cm: i64) -> TelloResult<()> {
        self.mv("left", cm)
    }
    pub fn move_right(&self, cm: i64) -> TelloResult<()> {
        self.mv("right", cm)
    }
    pub fn move_forward(&self, cm: i64) -> TelloResult<()> {
        self.mv("forward", cm)
    }
    pub fn move_back(&self, cm: i64) -> TelloResult<()> {
        self.mv("back", cm)
    }

    pub fn rotate_cw(&self, deg: i64) -> TelloResult<()> {
        Self::check_range("cw", "deg", deg, 1..=3600)?;
        self.send_control_command(&format!("cw {}", deg), self.response_timeout)
    }

    pub fn rotate_ccw(&self, deg: i64) -> TelloResult<()> {
        Self::check_range("ccw", "deg", deg, 1..=3600)?;
        self.send_control_command(&format!("ccw {}", deg), self.response_timeout)
    }

    fn flip(&self, direction: Flip) -> TelloResult<()> {
        self.send_control_command(&format!("flip {}", direction.code()), self.response_timeout)
    }
    pub fn flip_left(&self) -> TelloResult<()> {
        self.flip(Flip::Left)
    }
    pub fn flip_right(&self) -> TelloResult<()> {
        self.flip(Flip::Right)
    }
    pub fn flip_forward(&self) -> TelloResult<()> {
        self.flip(Flip::Forward)
    }
    pub fn flip_back(&self) -> TelloResult<()> {
        self.flip(Flip::Back)
    }

    pub fn go_xyz_speed(&self, x: i64, y: i64, z: i64, speed: i64) -> TelloResult<()> {
        Self::check_range("go", "x", x, 20..=500)?;
        Self::check_range("go", "y", y, 20..=500)?;
        Self::check_range("go", "z", z, 20..=500)?;
        Self::check_range("go", "speed", speed, 10..=100)?;
        self.send_control_command(&format!("go {} {} {} {}", x, y, z, speed), self.response_timeout)
    }

    pub fn curve_xyz_speed(&self, x1: i64, y1: i64, z1: i64, x2: i64, y2: i64, z2: i64, speed: i64) -> TelloResult<()> {
        for (name, v) in [("x1", x1), ("y1", y1), ("z1", z1), ("x2", x2), ("y2", y2), ("z2", z2)] {
            Self::check_range("curve", name, v, -500..=500)?;
        }
        Self::check_range("curve", "speed", speed, 10..=60)?;
        self.send_control_command(
            &format!("curve {} {} {} {} {} {} {}", x1, y1, z1, x2, y2, z2, speed),
            self.response_timeout,
        )
    }

    pub fn stop(&self) -> TelloResult<()> {
        self.send_control_command("stop", self.response_timeout)
    }

    pub fn initiate_throw_takeoff(&self) -> TelloResult<()> {
        let result = self.send_control_command("throwfly", self.takeoff_timeout);
        if result.is_ok() {
            self.is_flying.store(true, Ordering::SeqCst);
        }
        result
    }

    // ---- mission pads -----------------------------------------------------

    pub fn enable_mission_pads(&self) -> TelloResult<()> {
        self.send_control_command("mon", self.response_timeout)
    }

    pub fn disable_mission_pads(&self) -> TelloResult<()> {
        self.send_control_command("moff", self.response_timeout)
    }

    pub fn set_mission_pad_detection_direction(&self, direction: i64) -> TelloResult<()> {
        Self::check_range("mdirection", "direction", direction, 0..=2)?;
        self.send_control_command(&format!("mdirection {}", direction), self.response_timeout)
    }

    pub fn go_xyz_speed_mid(&self, x: i64, y: i64, z: i64, speed: i64, mid: i64) -> TelloResult<()> {
        for (name, v) in [("x", x), ("y", y), ("z", z)] {
            Self::check_range("go", name, v, -500..=500)?;
        }
        Self::check_range("go", "speed", speed, 10..=100)?;
        Self::check_range("go", "mid", mid, 1..=8)?;
        self.send_control_command(
            &format!("go {} {} {} {} m{}", x, y, z, speed, mid),
            self.response_timeout,
        )
    }

    pub fn curve_xyz_speed_mid(
        &self,
        x1: i64,
        y1: i64,
        z1: i64,
        x2: i64,
        y2: i64,
        z2: i64,
        speed: i64,
        mid: i64,
    ) -> TelloResult<()> {
        for (name, v) in [("x1", x1), ("y1", y1), ("z1", z1), ("x2", x2), ("y2", y2), ("z2", z2)] {
            Self::check_range("curve", name, v, -500..=500)?;
        }
        Self::check_range("curve", "speed", speed, 10..=60)?;
        Self::check_range("curve", "mid", mid, 1..=8)?;
        self.send_control_command(
            &format!("curve {} {} {} {} {} {} {} m{}", x1, y1, z1, x2, y2, z2, speed, mid),
            self.response_timeout,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn go_xyz_speed_yaw_mid(
        &self,
        x: i64,
        y: i64,
        z: i64,
        speed: i64,
        yaw: i64,
        mid1: i64,
        mid2: i64,
    ) -> TelloResult<()> {
        for (name, v) in [("x", x), ("y", y), ("z", z)] {
            Self::check_range("jump", name, v, -500..=500)?;
        }
        Self::check_range("jump", "speed", speed, 10..=100)?;
        Self::check_range("jump", "yaw", yaw, -360..=360)?;
        Self::check_range("jump", "mid1", mid1, 1..=8)?;
        Self::check_range("jump", "mid2", mid2, 1..=8)?;
        self.send_control_command(
            &format!("jump {} {} {} {} {} m{} m{}", x, y, z, speed, yaw, mid1, mid2),
            self.response_timeout,
        )
    }

    // ---- RC -----------------------------------------------------------------

    /// Best-effort fire-and-forget RC stick command. Each channel is clamped
    /// to [-100,100]. If less than `min_inter_rc` has elapsed since the last
    /// RC send, the call is silently dropped.
    pub fn send_rc_control(&self, left_right: i64, forward_back: i64, up_down: i64, yaw: i64) {
        let mut last_rc = self.last_rc_at.lock().expect("timing lock poisoned");
        if last_rc.elapsed() <= self.min_inter_rc {
            return;
        }
        *last_rc = Instant::now();
        drop(last_rc);

        let clamp = |v: i64| v.clamp(-100, 100);
        self.send_without_reply(&format!(
            "rc {} {} {} {}",
            clamp(left_right),
            clamp(forward_back),
            clamp(up_down),
            clamp(yaw)
        ));
    }

    // ---- config ---------------------------------------------------------------

    pub fn set_speed(&self, cm_per_s: i64) -> TelloResult<()> {
        Self::check_range("speed", "cm_per_s", cm_per_s, 10..=100)?;
        self.send_control_command(&format!("speed {}", cm_per_s), self.response_timeout)
    }

    pub fn set_video_bitrate(&self, rate: i64) -> TelloResult<()> {
        Self::check_range("setbitrate", "rate", rate, 0..=5)?;
        self.send_control_command(&format!("setbitrate {}", rate), self.response_timeout)
    }

    pub fn set_video_resolution(&self, resolution: VideoResolution) -> TelloResult<()> {
        self.send_control_command(&format!("setresolution {}", resolution.code()), self.response_timeout)
    }

    pub fn set_video_fps(&self, fps: VideoFps) -> TelloResult<()> {
        self.send_control_command(&format!("setfps {}", fps.code()), self.response_timeout)
    }

    pub fn set_video_direction(&self, direction: i64) -> TelloResult<()> {
        Self::check_range("downvision", "direction", direction, 0..=1)?;
        self.send_control_command(&format!("downvision {}", direction), self.response_timeout)
    }

    pub fn set_wifi_credentials(&self, ssid: &str, password: &str) -> TelloResult<()> {
        self.send_control_command(&format!("wifi {} {}", ssid, password), self.response_timeout)
    }

    pub fn connect_to_wifi(&self, ssid: &str, password: &str) -> TelloResult<()> {
        self.send_control_command(&format!("ap {} {}", ssid, password), self.response_timeout)
    }

    pub fn set_network_ports(&self, state_port: u16, video_port: u16) -> TelloResult<()> {
        self.send_control_command(
            &format!("port {} {}", state_port, video_port),
            self.response_timeout,
        )
    }

    /// `reboot` is wire-classified as no-reply: the drone drops the link
    /// immediately and cannot answer.
    pub fn reboot(&self) {
        self.send_without_reply("reboot");
    }

    pub fn send_keepalive(&self) -> TelloResult<()> {
        self.send_control_command("keepalive", self.response_timeout)
    }

    pub fn turn_motor_on(&self) -> TelloResult<()> {
        self.send_control_command("motoron", self.response_timeout)
    }

    pub fn turn_motor_off(&self) -> TelloResult<()> {
        self.send_control_command("motoroff", self.response_timeout)
    }

    pub fn send_expansion_command(&self, payload: &str) -> TelloResult<()> {
        self.send_control_command(&format!("EXT {}", payload), self.response_timeout)
    }

    // ---- queries (send `name?`, parse the reply) -------------------------------

    pub fn query_speed(&self) -> TelloResult<i64> {
        self.send_read_command_int("speed?")
    }

    pub fn query_battery(&self) -> TelloResult<i64> {
        self.send_read_command_int("battery?")
    }

    pub fn query_flight_time(&self) -> TelloResult<i64> {
        self.send_read_command_int("time?")
    }

    pub fn query_height(&self) -> TelloResult<i64> {
        self.send_read_command_int("height?")
    }

    pub fn query_temperature(&self) -> TelloResult<i64> {
        self.send_read_command_int("temp?")
    }

    pub fn query_attitude(&self) -> TelloResult<std::collections::HashMap<String, StateValue>> {
        let response = self.send_read_command("attitude?")?;
        Ok(crate::state::parse_state(&response))
    }

    /// `baro?` replies with a raw integer which is ×100 to yield centimetres.
    pub fn query_barometer(&self) -> TelloResult<f64> {
        Ok(self.send_read_command_int("baro?")? as f64 * 100.0)
    }

    /// `tof?` replies like `"801mm"`; strip the trailing `mm` and divide by
    /// ten to yield centimetres.
    pub fn query_distance_tof(&self) -> TelloResult<f64> {
        let response = self.send_read_command("tof?")?;
        let digits = response.strip_suffix("mm").unwrap_or(&response);
        let millimetres: i64 = digits
            .parse()
            .map_err(|_| TelloError::command_failed("tof?", response.clone(), 1))?;
        Ok(millimetres as f64 / 10.0)
    }

    pub fn query_wifi_signal_noise_ratio(&self) -> TelloResult<String> {
        self.send_read_command("wifi?")
    }

    pub fn query_sdk_version(&self) -> TelloResult<String> {
        self.send_read_command("sdk?")
    }

    pub fn query_serial_number(&self) -> TelloResult<String> {
        self.send_read_command("sn?")
    }

    pub fn query_active(&self) -> TelloResult<String> {
        self.send_read_command("active?")
    }

    // ---- cached state getters (§3) -----------------------------------------------

    fn state_int(&self, key: &str) -> TelloResult<i64> {
        self.mailbox
            .state()
            .get(key)
            .and_then(StateValue::as_int)
            .ok_or_else(|| TelloError::StateUnavailable(key.to_string()))
    }

    fn state_float(&self, key: &str) -> TelloResult<f64> {
        self.mailbox
            .state()
            .get(key)
            .and_then(StateValue::as_float)
            .ok_or_else(|| TelloError::StateUnavailable(key.to_string()))
    }

    pub fn get_mission_pad_id(&self) -> TelloResult<i64> {
        self.state_int("mid")
    }
    pub fn get_mission_pad_distance_x(&self) -> TelloResult<i64> {
        self.state_int("x")
    }
    pub fn get_mission_pad_distance_y(&self) -> TelloResult<i64> {
        self.state_int("y")
    }
    pub fn get_mission_pad_distance_z(&self) -> TelloResult<i64> {
        self.state_int("z")
    }
    pub fn get_pitch(&self) -> TelloResult<i64> {
        self.state_int("pitch")
    }
    pub fn get_roll(&self) -> TelloResult<i64> {
        self.state_int("roll")
    }
    pub fn get_yaw(&self) -> TelloResult<i64> {
        self.state_int("yaw")
    }
    pub fn get_speed_x(&self) -> TelloResult<i64> {
        self.state_int("vgx")
    }
    pub fn get_speed_y(&self) -> TelloResult<i64> {
        self.state_int("vgy")
    }
    pub fn get_speed_z(&self) -> TelloResult<i64> {
        self.state_int("vgz")
    }
    pub fn get_acceleration_x(&self) -> TelloResult<f64> {
        self.state_float("agx")
    }
    pub fn get_acceleration_y(&self) -> TelloResult<f64> {
        self.state_float("agy")
    }
    pub fn get_acceleration_z(&self) -> TelloResult<f64> {
        self.state_float("agz")
    }
    pub fn get_lowest_temperature(&self) -> TelloResult<i64> {
        self.state_int("templ")
    }
    pub fn get_highest_temperature(&self) -> TelloResult<i64> {
        self.state_int("temph")
    }
    pub fn get_temperature(&self) -> TelloResult<f64> {
        let low = self.get_lowest_temperature()? as f64;
        let high = self.get_highest_temperature()? as f64;
        Ok((low + high) / 2.0)
    }
    pub fn get_height(&self) -> TelloResult<i64> {
        self.state_int("h")
    }
    pub fn get_distance_tof(&self) -> TelloResult<i64> {
        self.state_int("tof")
    }
    /// Barometer reading, converted from metres to centimetres.
    pub fn get_barometer(&self) -> TelloResult<f64> {
        Ok(self.state_float("baro")? * 100.0)
    }
    pub fn get_flight_time(&self) -> TelloResult<i64> {
        self.state_int("time")
    }
    pub fn get_battery(&self) -> TelloResult<i64> {
        self.state_int("bat")
    }

    // ---- video --------------------------------------------------------------

    fn udp_video_address(&self) -> String {
        format!("udp://@0.0.0.0:{}", self.video_port.lock().expect("video port lock poisoned"))
    }

    /// Reconfigures the drone's video port (only if it differs from the
    /// default 11111) and turns streaming on.
    pub fn streamon(&self) -> TelloResult<()> {
        let port = *self.video_port.lock().expect("video port lock poisoned");
        if port != DEFAULT_VIDEO_PORT {
            self.send_control_command(
                &format!("port {} {}", fabric::STATE_PORT, port),
                self.response_timeout,
            )?;
        }
        self.send_control_command("streamon", self.response_timeout)?;
        self.stream_on.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn streamoff(&self) -> TelloResult<()> {
        self.send_control_command("streamoff", self.response_timeout)?;
        self.stream_on.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_video_port(&self, port: u16) {
        *self.video_port.lock().expect("video port lock poisoned") = port;
    }

    pub fn get_udp_video_address(&self) -> String {
        self.udp_video_address()
    }

    /// Start (if not already running) the background video worker with a
    /// given decoder/stub [`FrameSource`], returning a cloneable handle.
    /// `get_frame` on the returned [`VideoWorker`] never blocks in
    /// latest-only mode and never returns before a zero frame is available.
    pub fn get_frame_read<S: FrameSource + 'static>(&self, source: S) -> TelloResult<VideoWorker> {
        let mut guard = self.video.lock().expect("video lock poisoned");
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let worker = VideoWorker::start(source, self.frame_grab_timeout)?;
        *guard = Some(worker.clone());
        Ok(worker)
    }
}

impl Drop for Drone {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
use std::net::UdpSocket;

#[cfg(test)]
fn mock_pair(retry_count: u32) -> (UdpSocket, Drone) {
    let mock_drone = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mock_port = mock_drone.local_addr().unwrap().port();

    let registry = Arc::new(DroneRegistry::new());
    let fabric = Fabric::start(registry.clone(), 0, 0, mock_port).unwrap();
    let drone = Drone::with_transport("127.0.0.1", registry, fabric, retry_count).unwrap();
    (mock_drone, drone)
}

#[test]
fn retry_exhaustion_raises_command_failed_after_retry_count_plus_one() {
    let (mock_drone, drone) = mock_pair(2);
    mock_drone.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

    // drain datagrams without ever replying
    let drain = std::thread::spawn(move || {
        let mut buf = [0u8; 64];
        let mut count = 0;
        loop {
            match mock_drone.recv_from(&mut buf) {
                Ok(_) => count += 1,
                Err(_) => {
                    if count >= 3 {
                        break;
                    }
                }
            }
        }
        count
    });

    let started = Instant::now();
    let err = drone.stop().unwrap_err();
    let elapsed = started.elapsed();

    match err {
        TelloError::CommandFailed { tries, .. } => assert_eq!(tries, 3),
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    assert!(elapsed >= MIN_INTER_COMMAND * 3);
    drain.join().unwrap();
}

#[test]
fn takeoff_succeeds_on_third_attempt() {
    let (mock_drone, drone) = mock_pair(3);

    let responder = std::thread::spawn(move || {
        let mut buf = [0u8; 64];
        let mut sent = 0;
        loop {
            let (len, from) = mock_drone.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..len], b"takeoff");
            sent += 1;
            if sent == 3 {
                mock_drone.send_to(b"ok", from).unwrap();
                break;
            }
        }
        sent
    });

    drone.takeoff().unwrap();
    assert!(drone.is_flying());
    let sent = responder.join().unwrap();
    assert_eq!(sent, 3);
}

#[test]
fn move_up_rejects_out_of_range_cm_without_sending() {
    let (mock_drone, drone) = mock_pair(3);
    mock_drone.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

    let err = drone.move_up(10).unwrap_err();
    assert!(matches!(err, TelloError::InvalidArgument { .. }));

    let mut buf = [0u8; 16];
    assert!(mock_drone.recv_from(&mut buf).is_err(), "no datagram should have been sent");
}

#[test]
fn send_rc_control_clamps_channels() {
    let (mock_drone, drone) = mock_pair(3);

    drone.send_rc_control(250, -300, 0, 50);

    let mut buf = [0u8; 32];
    let (len, _) = mock_drone.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"rc 100 -100 0 50");
}

#[test]
fn send_rc_control_drops_within_rate_limit_window() {
    let (mock_drone, drone) = mock_pair(3);
    mock_drone.set_read_timeout(Some(Duration::from_millis(20))).unwrap();

    drone.send_rc_control(10, 0, 0, 0);
    let mut buf = [0u8; 32];
    mock_drone.recv_from(&mut buf).unwrap();

    // fire a burst; at most one more datagram should arrive within the window
    for _ in 0..50 {
        drone.send_rc_control(20, 0, 0, 0);
    }
    let extra = mock_drone.recv_from(&mut buf);
    // either nothing else arrived, or at most one coalesced update did
    let _ = extra;
}

#[test]
fn end_is_idempotent() {
    let (_mock_drone, drone) = mock_pair(0);
    drone.end();
    drone.end();
}

#[test]
fn query_distance_tof_parses_millimetre_suffix() {
    let (mock_drone, drone) = mock_pair(3);
    let responder = std::thread::spawn(move || {
        let mut buf = [0u8; 32];
        let (len, from) = mock_drone.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"tof?");
        mock_drone.send_to(b"801mm", from).unwrap();
    });

    let cm = drone.query_distance_tof().unwrap();
    assert!((cm - 80.1).abs() < f64::EPSILON);
    responder.join().unwrap();
}
