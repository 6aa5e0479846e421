//! End-to-end scenarios for the node.
//!
//! A `Node` is driven over virtual time with a shared-level sensor, scripted
//! buttons and a recording tone output, so every actuator change can be
//! checked against the millisecond it happened. The last tests go through
//! the dispatcher and the HTTP front end.

use crossbeam_channel::unbounded;
use serde_json::json;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use light_orchestra::config::NodeConfig;
use light_orchestra::dispatcher::{parse_request, Command, NodeHandle, NodeRequest, Reply};
use light_orchestra::error::{NodeError, Rejection};
use light_orchestra::http_server::HttpServer;
use light_orchestra::node::{Node, NodeHardware};
use light_orchestra::simulator::{
    ButtonPresser, LightLevel, ScriptedSensor, SimButtons, ToneCall, ToneLog,
};
use light_orchestra::types::*;

// ─── Helpers ───────────────────────────────────────────────────────────────

/// Raw readings for the default fallback range (1000–50000) at range 100.
const RAW_440: u16 = 25500; // n = 0.5
const RAW_587: u16 = 40200; // n = 0.8
const RAW_DARK: u16 = 1000;

struct Rig {
    node: Node,
    log: ToneLog,
    level: LightLevel,
    presser: ButtonPresser,
}

fn rig(config: NodeConfig, raw: u16) -> Rig {
    let log = ToneLog::new();
    let (sensor, level) = ScriptedSensor::shared(raw);
    let (buttons, presser) = SimButtons::new();
    let hw = NodeHardware {
        sensor: Box::new(sensor),
        output: Box::new(log.clone()),
        buttons: Box::new(buttons),
    };
    Rig {
        node: Node::new(config, hw, 0),
        log,
        level,
        presser,
    }
}

fn quiet_config() -> NodeConfig {
    NodeConfig {
        calibrate_on_boot: false,
        ..NodeConfig::default()
    }
}

impl Rig {
    /// Advance one deadline at a time so the log stamps every call.
    fn advance(&mut self, t: u64) {
        while self.node.next_deadline() <= t {
            let at = self.node.next_deadline();
            self.log.set_time(at);
            self.node.advance_to(at);
        }
    }

    fn call(&mut self, method: &str, path: &str, body: &str, now: u64) -> serde_json::Value {
        self.log.set_time(now);
        let command = parse_request(method, path, body).unwrap();
        let reply = self.node.handle(command, now).unwrap();
        serde_json::to_value(&reply).unwrap()
    }

    fn plays(&self) -> Vec<(u64, u32)> {
        self.log
            .plays()
            .iter()
            .map(|p| (p.at_ms, p.frequency_hz))
            .collect()
    }
}

/// Record 440 → 587 → silence from t = 0 and stop at 2500.
fn record_three_events(r: &mut Rig) {
    r.node.set_mode(Mode::RecordAndPlay, 0);
    r.node.start_recording(0).unwrap();
    r.advance(1000);
    r.level.set(RAW_587);
    r.advance(2000);
    r.level.set(RAW_DARK);
    r.advance(2500);
    r.log.set_time(2500);
    assert_eq!(r.node.stop_recording(2500), Ok(3));
}

// ─── Record & Play ─────────────────────────────────────────────────────────

#[test]
fn test_record_then_play_preserves_gaps() {
    let mut r = rig(quiet_config(), RAW_440);
    record_three_events(&mut r);

    // sensing resumes at 400 once the two start beeps are over
    let melody: Vec<(u64, u32)> = r
        .node
        .melody()
        .events()
        .iter()
        .map(|e| (e.timestamp_ms, e.frequency_hz))
        .collect();
    assert_eq!(melody, vec![(400, 440), (1025, 587), (2025, 0)]);

    r.advance(3000);
    r.log.clear();
    r.log.set_time(3000);
    r.node.start_playback(3000).unwrap();
    assert_eq!(r.node.state(), RecordingState::Playing);
    r.advance(6000);

    // cue at 3000, timeline origin at 3300
    assert_eq!(r.plays(), vec![(3000, 600), (3700, 440), (4325, 587)]);
    assert_eq!(r.log.last(), Some(ToneCall::Silence));
    let silence_at = r.log.entries().last().map(|e| e.at_ms);
    assert_eq!(silence_at, Some(5325));
    assert_eq!(r.node.state(), RecordingState::Idle);
}

#[test]
fn test_busy_while_playing() {
    let mut r = rig(quiet_config(), RAW_440);
    record_three_events(&mut r);
    r.advance(3000);
    r.node.start_playback(3000).unwrap();
    r.advance(3500);

    assert_eq!(r.node.start_recording(3500), Err(Rejection::Busy));
    assert_eq!(r.node.start_playback(3500), Err(Rejection::Busy));
    assert_eq!(r.call("POST", "/record/start", "", 3500), json!({"status": "busy"}));
    assert_eq!(r.call("POST", "/record/play", "", 3500), json!({"status": "busy"}));
    assert_eq!(
        r.call("POST", "/record/stop", "", 3500),
        json!({"status": "error", "events": 3})
    );
    assert_eq!(r.node.state(), RecordingState::Playing);
    assert_eq!(r.node.melody().len(), 3);
}

#[test]
fn test_api_tone_during_playback_does_not_stall_timeline() {
    let mut r = rig(quiet_config(), RAW_440);
    record_three_events(&mut r);
    r.advance(3000);
    r.log.clear();
    r.log.set_time(3000);
    r.node.start_playback(3000).unwrap();
    r.advance(3800);
    assert_eq!(
        r.call("POST", "/tone", r#"{"freq": 880, "ms": 300}"#, 3800),
        json!({"status": "ok"})
    );
    r.advance(6000);

    assert_eq!(
        r.plays(),
        vec![(3000, 600), (3700, 440), (3800, 880), (4325, 587)]
    );
    let silences: Vec<u64> = r
        .log
        .entries()
        .iter()
        .filter(|e| e.call == ToneCall::Silence)
        .map(|e| e.at_ms)
        .collect();
    assert!(silences.contains(&4100), "silences: {:?}", silences);
    assert_eq!(silences.last(), Some(&5325));
    assert_eq!(r.node.state(), RecordingState::Idle);
}

#[test]
fn test_nothing_to_play() {
    let mut r = rig(quiet_config(), RAW_440);
    assert_eq!(r.node.start_playback(0), Err(Rejection::NothingToPlay));
    assert_eq!(
        r.call("POST", "/record/play", "", 0),
        json!({"status": "nothing to play"})
    );
    assert_eq!(r.node.state(), RecordingState::Idle);
    assert_eq!(r.log.activations(), 0);
}

#[test]
fn test_recording_rejected_in_live_play() {
    let mut r = rig(quiet_config(), RAW_440);
    assert_eq!(r.node.start_recording(0), Err(Rejection::WrongMode));
    assert_eq!(r.call("POST", "/record/start", "", 0), json!({"status": "error"}));
    assert_eq!(r.node.state(), RecordingState::Idle);
}

#[test]
fn test_auto_stop_after_limit() {
    let mut r = rig(quiet_config(), RAW_440);
    r.node.set_mode(Mode::RecordAndPlay, 0);
    r.node.start_recording(0).unwrap();

    r.advance(30_000);
    assert_eq!(r.node.state(), RecordingState::Recording);

    r.advance(31_000);
    assert_eq!(r.node.state(), RecordingState::Idle);
    assert_eq!(r.node.melody().len(), 1);
    assert!(r.plays().contains(&(30_025, 400)), "stop cue: {:?}", r.plays());
}

#[test]
fn test_auto_stop_while_sensing_is_suppressed() {
    let mut r = rig(quiet_config(), RAW_440);
    r.node.set_mode(Mode::RecordAndPlay, 0);
    r.node.start_recording(0).unwrap();
    r.advance(1000);
    assert_eq!(
        r.call("POST", "/tone", r#"{"freq": 880, "ms": 60000}"#, 1000),
        json!({"status": "busy"})
    );

    r.advance(29_000);
    assert_eq!(r.call("POST", "/calibrate", "", 29_000), json!({"status": "calibrating"}));
    r.advance(30_000);
    assert_eq!(r.node.state(), RecordingState::Recording);

    r.advance(30_100);
    assert!(r.node.is_calibrating());
    assert_eq!(r.node.state(), RecordingState::Idle);
    assert!(r.plays().contains(&(30_025, 400)), "stop cue: {:?}", r.plays());
    assert!(r.node.melody().duration_ms() <= RECORD_LIMIT_MS);
}

#[test]
fn test_api_tone_busy_while_recording() {
    let mut r = rig(quiet_config(), RAW_440);
    r.node.set_mode(Mode::RecordAndPlay, 0);
    r.node.start_recording(0).unwrap();
    r.advance(1000);
    assert_eq!(
        r.call("POST", "/tone", r#"{"freq": 880, "ms": 5000}"#, 1000),
        json!({"status": "busy"})
    );
    r.level.set(RAW_587);
    r.advance(1500);

    // capture and echo carry on untouched
    assert!(!r.plays().iter().any(|p| p.1 == 880));
    let freqs: Vec<u32> = r.node.melody().events().iter().map(|e| e.frequency_hz).collect();
    assert_eq!(freqs, vec![440, 587]);
    assert_eq!(r.node.state(), RecordingState::Recording);
}

#[test]
fn test_new_recording_discards_previous_take() {
    let mut r = rig(quiet_config(), RAW_440);
    record_three_events(&mut r);
    r.advance(3000);
    r.level.set(RAW_587);
    r.node.start_recording(3000).unwrap();
    r.advance(4000);
    r.node.stop_recording(4000).unwrap();

    let events = r.node.melody().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].frequency_hz, 587);
    // first sensing tick after the 400 ms start cue
    assert!((400..450).contains(&events[0].timestamp_ms));
}

// ─── Buttons ───────────────────────────────────────────────────────────────

#[test]
fn test_button_record_stop_play() {
    let mut r = rig(quiet_config(), RAW_440);
    r.node.set_mode(Mode::RecordAndPlay, 0);

    r.presser.press(Button::A);
    r.advance(0);
    assert_eq!(r.node.state(), RecordingState::Recording);

    r.advance(1000);
    r.presser.press(Button::A);
    r.advance(1050);
    assert_eq!(r.node.state(), RecordingState::Idle);
    assert_eq!(r.node.melody().len(), 1);

    r.advance(2000);
    r.log.clear();
    r.presser.press(Button::B);
    r.advance(2050);
    assert_eq!(r.node.state(), RecordingState::Playing);

    r.advance(4000);
    assert_eq!(r.node.state(), RecordingState::Idle);
    // cue at 2050, origin 2350, first event 400 ms in
    assert_eq!(r.plays(), vec![(2050, 600), (2750, 440)]);
}

#[test]
fn test_button_b_ignored_while_recording() {
    let mut r = rig(quiet_config(), RAW_440);
    r.node.set_mode(Mode::RecordAndPlay, 0);
    r.node.start_recording(0).unwrap();
    r.advance(500);
    r.presser.press(Button::B);
    r.advance(600);
    assert_eq!(r.node.state(), RecordingState::Recording);
}

// ─── Calibration & live play ───────────────────────────────────────────────

#[test]
fn test_boot_calibration_four_activations() {
    let mut r = rig(
        NodeConfig {
            calibration_ms: 100,
            ..NodeConfig::default()
        },
        25000,
    );
    assert!(r.node.is_calibrating());
    r.advance(1300);
    assert!(!r.node.is_calibrating());
    assert_eq!(r.log.activations(), 4);
    let freqs: Vec<u32> = r.plays().iter().map(|p| p.1).collect();
    assert_eq!(freqs, vec![1000, 1000, 1000, 523]);

    let health = r.call("GET", "/health", "", 1300);
    assert_eq!(health["calibrated"], json!(true));
    let range = r.call("GET", "/get_range", "", 1300);
    assert_eq!(
        range,
        json!({"floor": 25000, "ceiling": 26000, "range": 1000, "sensor_range": 100})
    );
}

#[test]
fn test_calibrate_while_running_is_noop() {
    let mut r = rig(
        NodeConfig {
            calibration_ms: 100,
            ..NodeConfig::default()
        },
        25000,
    );
    r.advance(500);
    assert_eq!(r.call("POST", "/calibrate", "", 500), json!({"status": "calibrating"}));
    r.advance(2000);
    assert_eq!(r.log.activations(), 4);
}

#[test]
fn test_api_tone_suppresses_live() {
    let mut r = rig(quiet_config(), RAW_440);
    r.advance(100);
    assert_eq!(
        r.call("POST", "/tone", r#"{"freq": 880, "ms": 200}"#, 100),
        json!({"status": "ok"})
    );
    r.advance(500);

    let plays = r.plays();
    assert_eq!(plays[0], (0, 440));
    assert_eq!(plays[1], (100, 880));
    // live resumes on the first sensing tick after expiry at 300
    assert_eq!(plays[2], (325, 440));
    assert_eq!(plays.len(), 3);
}

#[test]
fn test_live_play_silences_in_darkness() {
    let mut r = rig(quiet_config(), RAW_587);
    r.advance(100);
    assert_eq!(r.plays(), vec![(0, 587)]);
    r.level.set(RAW_DARK);
    r.advance(200);
    assert_eq!(r.log.last(), Some(ToneCall::Silence));
}

#[test]
fn test_mode_switch_cancels_live_tone() {
    let mut r = rig(quiet_config(), RAW_440);
    r.advance(100);
    let reply = r.call("POST", "/post_mode", r#"{"mode": "Record & Play"}"#, 100);
    assert_eq!(reply, json!({"status": "ok", "mode": "Record & Play"}));
    assert_eq!(r.log.last(), Some(ToneCall::Silence));
    r.advance(500);
    // idle in Record & Play: sensing leaves the actuator alone
    assert_eq!(r.log.activations(), 1);
}

// ─── Dispatcher ────────────────────────────────────────────────────────────

#[test]
fn test_queries_wire_shape() {
    let mut r = rig(quiet_config(), RAW_440);
    assert_eq!(
        r.call("GET", "/health", "", 0),
        json!({"status": "active", "device_id": "light-node", "api": "v2.0", "calibrated": false})
    );
    assert_eq!(
        r.call("GET", "/sensor", "", 0),
        json!({"raw": 25500, "norm": 0.5, "floor": 1000, "ceiling": 50000, "calibrated": false})
    );
    r.call("POST", "/post_mode", r#"{"mode": "r"}"#, 0);
    assert_eq!(
        r.call("GET", "/get_mode", "", 0),
        json!({"mode": "Record & Play", "is_recording": false, "is_playing": false, "melody_length": 0})
    );
    assert_eq!(
        r.call("GET", "/melody", "", 0),
        json!({"melody": [], "total_events": 0, "duration_ms": 0})
    );
}

#[test]
fn test_range_update_and_rejection() {
    let mut r = rig(quiet_config(), RAW_440);
    assert_eq!(
        r.call("POST", "/post_range", r#"{"range": 250}"#, 0),
        json!({"status": "ok", "range": 250})
    );
    let err = parse_request("POST", "/post_range", r#"{"range": 1001}"#).unwrap_err();
    assert!(matches!(err, NodeError::RangeOutOfBounds(1001)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(r.node.sensor_range(), 250);
}

#[test]
fn test_melody_query_returns_last_hundred() {
    let mut r = rig(quiet_config(), RAW_440);
    r.node.set_mode(Mode::RecordAndPlay, 0);
    r.node.start_recording(0).unwrap();
    r.advance(399);
    // a pitch change on every sensing tick from 400 on
    for k in 0..120u64 {
        r.level.set(if k % 2 == 0 { RAW_440 } else { RAW_587 });
        r.advance(400 + 25 * k);
    }
    assert_eq!(r.node.stop_recording(3400), Ok(120));

    let reply = r.call("GET", "/melody", "", 3400);
    let melody = reply["melody"].as_array().unwrap();
    assert_eq!(melody.len(), 100);
    assert_eq!(melody[0]["time"], json!(900));
    assert_eq!(reply["total_events"], json!(120));
    assert_eq!(reply["duration_ms"], json!(3375));
}

#[test]
fn test_handle_reports_unavailable_node() {
    let (tx, rx) = unbounded::<NodeRequest>();
    drop(rx);
    let handle = NodeHandle::new(tx);
    assert!(matches!(
        handle.call(Command::Health),
        Err(NodeError::NodeUnavailable)
    ));
}

#[test]
fn test_timed_out_request_leaves_node_untouched() {
    let (tx, rx) = unbounded::<NodeRequest>();
    let handle = NodeHandle::new(tx);

    // nothing drains the channel yet, so the requester gives up
    assert!(matches!(
        handle.call(Command::SetMode(Mode::RecordAndPlay)),
        Err(NodeError::NodeUnavailable)
    ));

    thread::spawn(move || {
        let (sensor, _level) = ScriptedSensor::shared(RAW_440);
        let (buttons, _presser) = SimButtons::new();
        let hw = NodeHardware {
            sensor: Box::new(sensor),
            output: Box::new(ToneLog::new()),
            buttons: Box::new(buttons),
        };
        let clock = SessionClock::new();
        let mut node = Node::new(quiet_config(), hw, clock.now_ms());
        node.run(rx, &clock);
    });

    let reply = serde_json::to_value(handle.call(Command::GetMode).unwrap()).unwrap();
    assert_eq!(reply["mode"], json!("Live Play"));
}

// ─── HTTP ──────────────────────────────────────────────────────────────────

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn http(addr: &str, request: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut stream = loop {
        match TcpStream::connect(addr) {
            Ok(s) => break s,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Err(e) => panic!("connect {}: {}", addr, e),
        }
    };
    stream.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn test_http_round_trip() {
    let addr = format!("127.0.0.1:{}", free_port());
    let (tx, rx) = unbounded::<NodeRequest>();

    thread::spawn(move || {
        let (sensor, _level) = ScriptedSensor::shared(RAW_440);
        let (buttons, _presser) = SimButtons::new();
        let hw = NodeHardware {
            sensor: Box::new(sensor),
            output: Box::new(ToneLog::new()),
            buttons: Box::new(buttons),
        };
        let clock = SessionClock::new();
        let mut node = Node::new(quiet_config(), hw, clock.now_ms());
        node.run(rx, &clock);
    });
    let server = HttpServer::new(addr.clone(), NodeHandle::new(tx));
    thread::spawn(move || server.run());

    let health = http(&addr, "GET /health HTTP/1.1\r\nHost: node\r\n\r\n");
    assert!(health.starts_with("HTTP/1.0 200 OK"), "{}", health);
    assert!(health.contains(r#""status":"active""#));

    let body = r#"{"mode":"R"}"#;
    let set = http(
        &addr,
        &format!(
            "POST /post_mode HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ),
    );
    assert!(set.contains(r#""mode":"Record & Play""#), "{}", set);

    let bad = http(&addr, "POST /post_range HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}");
    assert!(bad.starts_with("HTTP/1.0 400"), "{}", bad);

    let missing = http(&addr, "GET /nope HTTP/1.1\r\n\r\n");
    assert!(missing.starts_with("HTTP/1.0 404"), "{}", missing);

    let wrong_method = http(&addr, "GET /tone HTTP/1.1\r\n\r\n");
    assert!(wrong_method.starts_with("HTTP/1.0 405"), "{}", wrong_method);

    let page = http(&addr, "GET / HTTP/1.1\r\n\r\n");
    assert!(page.contains("text/html"));
    assert!(page.contains("Record &amp; Play"));
}

#[test]
fn test_parse_request_reaches_every_route() {
    let routes = [
        ("GET", "/health", Command::Health),
        ("GET", "/sensor", Command::Sensor),
        ("GET", "/get_mode", Command::GetMode),
        ("GET", "/get_range", Command::GetRange),
        ("GET", "/melody", Command::Melody),
        ("GET", "/", Command::Snapshot),
        ("POST", "/calibrate", Command::Calibrate),
        ("POST", "/record/start", Command::StartRecording),
        ("POST", "/record/stop", Command::StopRecording),
        ("POST", "/record/play", Command::Play),
    ];
    for (method, path, expected) in routes {
        assert_eq!(parse_request(method, path, "").unwrap(), expected, "{} {}", method, path);
    }
    assert!(matches!(
        parse_request("GET", "/health?x=1", ""),
        Ok(Command::Health)
    ));
    let reply = Reply::Status(light_orchestra::dispatcher::StatusReply { status: "ok" });
    assert_eq!(serde_json::to_string(&reply).unwrap(), r#"{"status":"ok"}"#);
}
