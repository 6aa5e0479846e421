use crate::error::{NodeError, Result};
use crate::hardware::ToneOutput;
use log::{debug, info};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

pub const TONE_ADDR: &str = "/orchestra/tone";
pub const SILENCE_ADDR: &str = "/orchestra/silence";

/// Mirrors actuator state to an OSC synth over UDP.
///
/// `/orchestra/tone <freq:int> <duty:float>` on every tone change and
/// `/orchestra/silence` when the actuator goes quiet. Send failures are
/// logged and dropped; the node never waits on the network.
pub struct OscOutput {
    socket: UdpSocket,
    target: String,
}

impl OscOutput {
    pub fn new(target: String) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        info!("OSC output → {}", target);
        Ok(Self { socket, target })
    }

    fn send(&self, addr: &str, args: Vec<OscType>) -> Result<()> {
        let buf = encode(addr, args)?;
        self.socket.send_to(&buf, &self.target)?;
        Ok(())
    }
}

/// Encode one OSC message.
pub fn encode(addr: &str, args: Vec<OscType>) -> Result<Vec<u8>> {
    let msg = OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    });
    rosc::encoder::encode(&msg).map_err(|e| NodeError::Hardware(format!("OSC encode: {}", e)))
}

impl ToneOutput for OscOutput {
    fn play(&mut self, frequency_hz: u32, duty: f32) {
        let args = vec![OscType::Int(frequency_hz as i32), OscType::Float(duty)];
        if let Err(e) = self.send(TONE_ADDR, args) {
            debug!("OSC send error: {}", e);
        }
    }

    fn silence(&mut self) {
        if let Err(e) = self.send(SILENCE_ADDR, Vec::new()) {
            debug!("OSC send error: {}", e);
        }
    }
}
