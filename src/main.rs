use light_orchestra::config::NodeConfig;
use light_orchestra::dispatcher::{NodeHandle, NodeRequest};
use light_orchestra::hardware::{ButtonInputs, LightSensor, ToneOutput};
use light_orchestra::http_server::HttpServer;
use light_orchestra::node::{Node, NodeHardware};
use light_orchestra::osc_output::OscOutput;
use light_orchestra::simulator::{self, Gesture, LogBuzzer, ScriptedSensor, SimButtons, TeeOutput};
use light_orchestra::types::*;
#[cfg(feature = "audio")]
use light_orchestra::audio_output;
#[cfg(feature = "hardware")]
use light_orchestra::serial_bridge;

use clap::Parser;
use crossbeam_channel::unbounded;
use log::{error, info, warn};
use std::path::PathBuf;
use std::thread;

#[derive(Parser)]
#[command(name = "light-orchestra")]
#[command(about = "Light-controlled instrument node")]
struct Cli {
    /// JSON config file (missing or malformed → built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective config to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// HTTP API bind address (overrides the config file)
    #[arg(long)]
    http_addr: Option<String>,

    /// Do not start the HTTP API; the node runs on buttons only
    #[arg(long)]
    no_http: bool,

    /// Use the simulated sensor and buttons even if --port is given
    #[arg(long)]
    simulate: bool,

    /// Simulator scenario: "sweep", "wave", "dark", or "demo"
    /// (wave plus scripted record / stop / play presses)
    #[arg(long, default_value = "sweep")]
    scenario: String,

    /// Mirror the actuator to an OSC synth (e.g., 127.0.0.1:9000)
    #[arg(long)]
    osc_target: Option<String>,

    /// Serial port of the sensor board (e.g., /dev/ttyACM0)
    #[arg(long)]
    port: Option<String>,

    /// Render tones on the default audio output device
    #[arg(long)]
    audio: bool,

    /// Sensitivity range, 0-1000
    #[arg(long)]
    range: Option<u16>,

    /// Calibration sampling window (ms)
    #[arg(long)]
    calibration_ms: Option<u64>,

    /// Skip the boot calibration
    #[arg(long)]
    no_calibrate: bool,
}

type Inputs = (Box<dyn LightSensor>, Box<dyn ButtonInputs>);

fn simulated_inputs(scenario: &str, clock: &SessionClock) -> Inputs {
    let gesture = Gesture::from_name(scenario).unwrap_or_else(|| {
        warn!("Unknown scenario {:?}, using sweep", scenario);
        Gesture::Sweep
    });
    let (buttons, _presser) = SimButtons::new();
    let buttons = if scenario == "demo" {
        buttons.with_script(clock.clone(), simulator::demo_script())
    } else {
        buttons
    };
    (
        Box::new(ScriptedSensor::gesture(gesture, clock.clone())),
        Box::new(buttons),
    )
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let clock = SessionClock::new();

    // ─── Config: file, then CLI overrides ───────────────────────────
    let mut config = cli
        .config
        .as_deref()
        .and_then(NodeConfig::load)
        .unwrap_or_default();
    if let Some(addr) = &cli.http_addr {
        config.http_addr = addr.clone();
    }
    if let Some(range) = cli.range {
        config.sensor_range = range;
    }
    if let Some(ms) = cli.calibration_ms {
        config.calibration_ms = ms;
    }
    if cli.no_calibrate {
        config.calibrate_on_boot = false;
    }
    let use_hardware = cli.port.is_some() && !cli.simulate;
    if !use_hardware && cli.scenario == "demo" {
        // the scripted presses need Record & Play
        config.initial_mode = Mode::RecordAndPlay;
    }
    let config = config.sanitized();

    if let Some(path) = &cli.write_config {
        if let Err(e) = config.save(path) {
            error!("Failed to write config {:?}: {}", path, e);
            std::process::exit(1);
        }
        return;
    }

    info!("═══════════════════════════════════════════════");
    info!("  LIGHT ORCHESTRA v{}", env!("CARGO_PKG_VERSION"));
    info!("  Device: {}", config.device_id);
    info!("  Mode: {}", config.initial_mode);
    info!("  Input: {}", if use_hardware { "HARDWARE" } else { "SIMULATOR" });
    if !cli.no_http { info!("  API: http://{}", config.http_addr); }
    if let Some(t) = &cli.osc_target { info!("  OSC: {}", t); }
    info!("═══════════════════════════════════════════════");

    // ─── Tone outputs ───────────────────────────────────────────────
    let mut outputs: Vec<Box<dyn ToneOutput>> = vec![Box::new(LogBuzzer)];

    if let Some(target) = &cli.osc_target {
        match OscOutput::new(target.clone()) {
            Ok(osc) => outputs.push(Box::new(osc)),
            Err(e) => error!("OSC output disabled: {}", e),
        }
    }

    if cli.audio {
        #[cfg(feature = "audio")]
        {
            match audio_output::start() {
                Ok(audio) => outputs.push(Box::new(audio)),
                Err(e) => error!("Audio output disabled: {}", e),
            }
        }
        #[cfg(not(feature = "audio"))]
        {
            error!("--audio requires the 'audio' feature. Continuing without it.");
        }
    }

    // ─── Inputs ─────────────────────────────────────────────────────
    let (sensor, buttons) = match (&cli.port, use_hardware) {
        (Some(port), true) => {
            #[cfg(feature = "hardware")]
            {
                let link = serial_bridge::Link::new();
                match serial_bridge::open(port, &link) {
                    Ok(tone) => {
                        outputs.push(Box::new(tone));
                        (
                            Box::new(link.sensor()) as Box<dyn LightSensor>,
                            Box::new(link.buttons()) as Box<dyn ButtonInputs>,
                        )
                    }
                    Err(e) => {
                        error!("Serial open failed ({}). Falling back to simulator.", e);
                        simulated_inputs(&cli.scenario, &clock)
                    }
                }
            }
            #[cfg(not(feature = "hardware"))]
            {
                error!(
                    "Port {} needs the 'hardware' feature. Falling back to simulator.",
                    port
                );
                simulated_inputs(&cli.scenario, &clock)
            }
        }
        _ => {
            info!("Starting simulator ({})...", cli.scenario);
            simulated_inputs(&cli.scenario, &clock)
        }
    };

    let hw = NodeHardware {
        sensor,
        output: Box::new(TeeOutput::new(outputs)),
        buttons,
    };
    let mut node = Node::new(config.clone(), hw, clock.now_ms());

    // ─── HTTP API ───────────────────────────────────────────────────
    let (command_tx, command_rx) = unbounded::<NodeRequest>();
    if cli.no_http {
        drop(command_tx);
    } else {
        let server = HttpServer::new(config.http_addr.clone(), NodeHandle::new(command_tx));
        let spawned = thread::Builder::new().name("http".into()).spawn(move || {
            if let Err(e) = server.run() {
                error!("HTTP server stopped: {}", e);
            }
        });
        if let Err(e) = spawned {
            error!("Failed to start HTTP thread: {}", e);
        }
    }

    // ─── Control loop on the main thread ────────────────────────────
    info!("Running. Press Ctrl+C to stop.");
    node.run(command_rx, &clock);
}
