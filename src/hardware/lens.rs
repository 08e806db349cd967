//! Motorized focus lens driven through the camera's serial tunnel.
//!
//! The lens controller listens on the camera's serial line and accepts a single
//! fixed-size command, "set focus voltage":
//!
//! ```text
//! byte  0     1     2     3     4         5         6
//!       STX   CMD   ADDR  LEN   VALUE_LO  VALUE_HI  CHECKSUM
//!       0x02  0x37  0x00  0x02  ...       ...       sum(0..=5) mod 256
//! ```
//!
//! The setpoint is a voltage clamped to [`MIN_VOLTAGE`, `MAX_VOLTAGE`] and
//! encoded as millivolts above the minimum, little-endian.
//!
//! [`FocusCommand`] is the pure codec. [`LensFocus`] owns a
//! [`RegisterFileChannel`] on the serial selector and pushes encoded commands
//! through it.

use std::fmt;

use tracing::{debug, info, instrument};

use crate::error::{DaqError, DaqResult};
use crate::hardware::file_access::{FileOpenMode, RegisterFileChannel};

/// Lowest focus voltage the controller accepts.
pub const MIN_VOLTAGE: f64 = 24.0;
/// Highest focus voltage the controller accepts.
pub const MAX_VOLTAGE: f64 = 70.0;
/// Length of an encoded command on the wire.
pub const PACKET_LEN: usize = 7;

const STX: u8 = 0x02;
const CMD_SET_VOLTAGE: u8 = 0x37;
const ADDR: u8 = 0x00;
const PAYLOAD_LEN: u8 = 0x02;

/// Clamp a requested voltage into the controller's range. NaN maps to the minimum.
#[must_use]
pub fn clamp_voltage(voltage: f64) -> f64 {
    if voltage.is_nan() {
        return MIN_VOLTAGE;
    }
    voltage.clamp(MIN_VOLTAGE, MAX_VOLTAGE)
}

/// An encoded, immutable "set focus voltage" packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FocusCommand([u8; PACKET_LEN]);

impl FocusCommand {
    /// Encode a focus setpoint. Out-of-range voltages are clamped.
    #[must_use]
    pub fn encode(voltage: f64) -> Self {
        let clamped = clamp_voltage(voltage);
        // In range by construction: (70 - 24) * 1000 = 46000 < u16::MAX.
        let raw = ((clamped - MIN_VOLTAGE) * 1000.0).round() as u16;
        let [lo, hi] = raw.to_le_bytes();

        let mut packet = [STX, CMD_SET_VOLTAGE, ADDR, PAYLOAD_LEN, lo, hi, 0];
        packet[6] = checksum(&packet[..6]);
        Self(packet)
    }

    /// Parse a packet received on the wire, checking header and checksum.
    pub fn decode(bytes: &[u8]) -> DaqResult<Self> {
        let packet: [u8; PACKET_LEN] = bytes.try_into().map_err(|_| {
            DaqError::ProtocolError(format!(
                "focus packet must be {PACKET_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;

        if packet[..4] != [STX, CMD_SET_VOLTAGE, ADDR, PAYLOAD_LEN] {
            return Err(DaqError::ProtocolError(format!(
                "unexpected focus packet header {:02X?}",
                &packet[..4]
            )));
        }
        let expected = checksum(&packet[..6]);
        if packet[6] != expected {
            return Err(DaqError::ProtocolError(format!(
                "focus packet checksum {:#04X}, expected {expected:#04X}",
                packet[6]
            )));
        }
        Ok(Self(packet))
    }

    /// Wire bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.0
    }

    /// Millivolts above [`MIN_VOLTAGE`].
    #[must_use]
    pub fn raw_value(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    /// Setpoint voltage carried by this packet.
    #[must_use]
    pub fn voltage(&self) -> f64 {
        MIN_VOLTAGE + f64::from(self.raw_value()) / 1000.0
    }

    /// Checksum byte.
    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.0[6]
    }
}

impl fmt::Debug for FocusCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FocusCommand")
            .field("raw", &self.raw_value())
            .field("bytes", &format_args!("{:02X?}", self.0))
            .finish()
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Focus actuator on the camera's serial port.
///
/// The serial file is opened on the first setpoint and stays open until
/// [`LensFocus::close`] (or drop).
pub struct LensFocus {
    channel: RegisterFileChannel,
    selector: String,
    last_command: Option<FocusCommand>,
}

impl LensFocus {
    /// Create an actuator that writes through `channel` to the serial file `selector`.
    pub fn new(channel: RegisterFileChannel, selector: impl Into<String>) -> Self {
        Self {
            channel,
            selector: selector.into(),
            last_command: None,
        }
    }

    /// Serial file selector in use.
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// The last command accepted by the controller.
    #[must_use]
    pub fn last_command(&self) -> Option<FocusCommand> {
        self.last_command
    }

    /// Whether the serial file is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Send a focus setpoint.
    ///
    /// # Errors
    /// `ProtocolError` if the device accepted fewer than [`PACKET_LEN`] bytes,
    /// plus any error of the underlying channel.
    #[instrument(skip(self), fields(selector = %self.selector))]
    pub fn set_focus(&mut self, voltage: f64) -> DaqResult<FocusCommand> {
        let command = FocusCommand::encode(voltage);
        debug!(
            voltage = clamp_voltage(voltage),
            raw = command.raw_value(),
            "Encoded focus setpoint"
        );

        if !self.channel.is_open() {
            self.channel.open(&self.selector, FileOpenMode::Write)?;
        }

        let accepted = self.channel.write(command.as_bytes())?;
        if accepted != PACKET_LEN {
            return Err(DaqError::ProtocolError(format!(
                "lens controller accepted {accepted} of {PACKET_LEN} bytes"
            )));
        }

        info!(voltage = command.voltage(), "Focus setpoint sent");
        self.last_command = Some(command);
        Ok(command)
    }

    /// Close the serial file. No-op if it was never opened.
    pub fn close(&mut self) -> DaqResult<()> {
        self.channel.close()
    }
}
