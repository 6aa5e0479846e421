pub mod arbiter;
pub mod audio_output;
pub mod buttons;
pub mod calibration;
pub mod config;
pub mod cue;
pub mod dispatcher;
pub mod error;
pub mod hardware;
pub mod http_server;
pub mod live;
pub mod mapping;
pub mod mode;
pub mod node;
pub mod osc_output;
pub mod playback;
pub mod recording;
pub mod serial_bridge;
pub mod simulator;
pub mod types;
