use crate::hardware::{duty_to_u16, ButtonInputs, LightSensor};
use crate::types::Button;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::Cursor;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Binary protocol with the microcontroller that owns the ADC, the two
/// buttons and the PWM buzzer.
///
/// Device → host, one frame per ADC sample:
///
/// | Offset | Size | Field        |
/// |--------|------|--------------|
/// | 0      | 2    | sync (0xBEEF)|
/// | 2      | 2    | raw light (u16) |
/// | 4      | 1    | buttons: bit0=A, bit1=B, 1=released |
/// | 5      | 1    | sequence (u8, wrapping) |
/// | 6      | 2    | reserved (0) |
/// | 8      | 2    | CRC16        |
/// | Total: 10 bytes              |
///
/// Host → device, on every actuator change:
///
/// | Offset | Size | Field        |
/// |--------|------|--------------|
/// | 0      | 2    | sync (0xCAFE)|
/// | 2      | 2    | frequency Hz (u16, 0 = silent) |
/// | 4      | 2    | duty (u16 PWM compare) |
/// | 6      | 1    | pad          |
/// | 7      | 2    | CRC16        |
/// | Total: 9 bytes               |
///
/// All fields little-endian; CRC-16/CCITT-FALSE over every byte before it.
pub const SENSOR_FRAME_SIZE: usize = 10;
pub const SENSOR_SYNC: u16 = 0xBEEF;
pub const TONE_FRAME_SIZE: usize = 9;
pub const TONE_SYNC: u16 = 0xCAFE;

const BIT_A: u8 = 0b01;
const BIT_B: u8 = 0b10;

fn button_bit(button: Button) -> u8 {
    match button {
        Button::A => BIT_A,
        Button::B => BIT_B,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFrame {
    pub raw: u16,
    pub buttons: u8,
    pub seq: u8,
}

impl SensorFrame {
    /// Pin level of `button` (true = released).
    pub fn level(&self, button: Button) -> bool {
        self.buttons & button_bit(button) != 0
    }
}

// ─── Codec ──────────────────────────────────────────────────────────────────

fn find_sync(buf: &[u8]) -> Option<usize> {
    (0..buf.len().saturating_sub(1)).find(|&i| buf[i] == 0xEF && buf[i + 1] == 0xBE)
}

pub fn parse_frame(data: &[u8]) -> Result<SensorFrame, String> {
    if data.len() != SENSOR_FRAME_SIZE {
        return Err(format!("wrong size: {}", data.len()));
    }

    let mut cursor = Cursor::new(data);
    let sync = cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| e.to_string())?;
    if sync != SENSOR_SYNC {
        return Err(format!("bad sync: 0x{:04X}", sync));
    }

    let raw = cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| e.to_string())?;
    let buttons = cursor.read_u8().map_err(|e| e.to_string())?;
    let seq = cursor.read_u8().map_err(|e| e.to_string())?;
    let _reserved = cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| e.to_string())?;

    let received_crc = cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| e.to_string())?;
    let computed_crc = crc16(&data[..SENSOR_FRAME_SIZE - 2]);
    if received_crc != computed_crc {
        return Err(format!(
            "CRC mismatch: received 0x{:04X}, computed 0x{:04X}",
            received_crc, computed_crc
        ));
    }

    Ok(SensorFrame { raw, buttons, seq })
}

/// Build a tone frame. Frequencies above 65535 Hz are clamped.
pub fn encode_tone(frequency_hz: u32, duty: f32) -> [u8; TONE_FRAME_SIZE] {
    let mut buf = [0u8; TONE_FRAME_SIZE];
    {
        let mut w = &mut buf[..];
        // writes into a fixed-size slice of exactly the right length
        let _ = w.write_u16::<LittleEndian>(TONE_SYNC);
        let _ = w.write_u16::<LittleEndian>(frequency_hz.min(u16::MAX as u32) as u16);
        let _ = w.write_u16::<LittleEndian>(duty_to_u16(duty));
        let _ = w.write_u8(0);
    }
    let crc = crc16(&buf[..TONE_FRAME_SIZE - 2]);
    buf[TONE_FRAME_SIZE - 2..].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// CRC-16/CCITT-FALSE
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Reassembles frames from an arbitrary byte stream, resyncing on garbage.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    errors: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Feed bytes; returns every complete valid frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SensorFrame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while self.buf.len() >= SENSOR_FRAME_SIZE {
            let Some(sync_pos) = find_sync(&self.buf) else {
                // no sync found; keep the last byte, it may start one
                let keep = self.buf.len().saturating_sub(1);
                self.buf.drain(..keep);
                break;
            };
            if sync_pos > 0 {
                debug!("Skipping {} bytes to sync", sync_pos);
                self.buf.drain(..sync_pos);
            }
            if self.buf.len() < SENSOR_FRAME_SIZE {
                break;
            }
            match parse_frame(&self.buf[..SENSOR_FRAME_SIZE]) {
                Ok(frame) => {
                    self.buf.drain(..SENSOR_FRAME_SIZE);
                    frames.push(frame);
                }
                Err(e) => {
                    // drop the false sync and search again
                    self.errors += 1;
                    debug!("Frame parse error: {}", e);
                    self.buf.drain(..1);
                }
            }
        }
        frames
    }
}

// ─── Shared link state ──────────────────────────────────────────────────────

struct LinkInner {
    raw: AtomicU16,
    levels: AtomicU8,
    /// Buttons seen low since the last poll
    latched: AtomicU8,
    last_seq: AtomicU16,
    dropped: AtomicU64,
}

/// Latest device state, written by the reader thread and read by the node.
#[derive(Clone)]
pub struct Link(Arc<LinkInner>);

impl Link {
    pub fn new() -> Self {
        Self(Arc::new(LinkInner {
            raw: AtomicU16::new(0),
            levels: AtomicU8::new(BIT_A | BIT_B),
            latched: AtomicU8::new(0),
            last_seq: AtomicU16::new(u16::MAX),
            dropped: AtomicU64::new(0),
        }))
    }

    pub fn apply(&self, frame: &SensorFrame) {
        let prev = self.0.last_seq.swap(frame.seq as u16, Ordering::Relaxed);
        if prev != u16::MAX {
            let gap = frame.seq.wrapping_sub(prev as u8).wrapping_sub(1);
            if gap > 0 {
                self.0.dropped.fetch_add(gap as u64, Ordering::Relaxed);
            }
        }
        self.0.raw.store(frame.raw, Ordering::Relaxed);
        self.0.levels.store(frame.buttons, Ordering::Relaxed);
        // a press shorter than the poll period still registers
        self.0
            .latched
            .fetch_or(!frame.buttons & (BIT_A | BIT_B), Ordering::Relaxed);
    }

    /// Frames lost according to the sequence counter.
    pub fn dropped(&self) -> u64 {
        self.0.dropped.load(Ordering::Relaxed)
    }

    pub fn sensor(&self) -> LinkSensor {
        LinkSensor(self.clone())
    }

    pub fn buttons(&self) -> LinkButtons {
        LinkButtons(self.clone())
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// Light sensor view of the link: the most recent sample.
pub struct LinkSensor(Link);

impl LightSensor for LinkSensor {
    fn read_raw(&mut self) -> u16 {
        self.0 .0.raw.load(Ordering::Relaxed)
    }
}

/// Button view of the link.
pub struct LinkButtons(Link);

impl ButtonInputs for LinkButtons {
    fn level(&mut self, button: Button) -> bool {
        let bit = button_bit(button);
        let latched = self.0 .0.latched.fetch_and(!bit, Ordering::Relaxed) & bit != 0;
        let level = self.0 .0.levels.load(Ordering::Relaxed) & bit != 0;
        level && !latched
    }
}

// ─── Port I/O ───────────────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
pub use port::{open, SerialTone};

#[cfg(feature = "hardware")]
mod port {
    use super::*;
    use crate::error::{NodeError, Result};
    use crate::hardware::ToneOutput;
    use log::{error, info, warn};
    use std::io::{self, Read, Write};
    use std::thread;
    use std::time::Duration;

    const BAUD_RATE: u32 = 115200;

    /// Tone output that writes tone frames to the device.
    pub struct SerialTone {
        port: Box<dyn serialport::SerialPort>,
    }

    impl SerialTone {
        fn write(&mut self, frequency_hz: u32, duty: f32) {
            if let Err(e) = self.port.write_all(&encode_tone(frequency_hz, duty)) {
                // fatal to this write only; the next change retries
                warn!("Serial write error: {}", e);
            }
        }
    }

    impl ToneOutput for SerialTone {
        fn play(&mut self, frequency_hz: u32, duty: f32) {
            self.write(frequency_hz, duty);
        }

        fn silence(&mut self) {
            self.write(0, 0.0);
        }
    }

    /// Open the device and start the reader thread.
    pub fn open(port_name: &str, link: &Link) -> Result<SerialTone> {
        info!("Opening serial port: {} @ {}", port_name, BAUD_RATE);
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| NodeError::Hardware(format!("{}: {}", port_name, e)))?;
        let reader = port
            .try_clone()
            .map_err(|e| NodeError::Hardware(format!("{}: {}", port_name, e)))?;

        let link = link.clone();
        thread::Builder::new()
            .name("serial".into())
            .spawn(move || read_loop(reader, link))?;

        info!("Serial port opened. Reading frames...");
        Ok(SerialTone { port })
    }

    fn read_loop(mut port: Box<dyn serialport::SerialPort>, link: Link) {
        let mut buf = [0u8; 256];
        let mut decoder = FrameDecoder::new();
        let mut frame_count: u64 = 0;

        loop {
            match port.read(&mut buf) {
                Ok(n) => {
                    for frame in decoder.push(&buf[..n]) {
                        link.apply(&frame);
                        frame_count += 1;
                        if frame_count % 5000 == 0 {
                            info!(
                                "Serial: {} frames, {} errors, {} dropped",
                                frame_count,
                                decoder.errors(),
                                link.dropped()
                            );
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    error!("Serial read error: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}
