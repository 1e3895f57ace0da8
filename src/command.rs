//! Command byte and image packet framing.
//!
//! Every exchange with the accelerator starts with a one-byte command:
//!
//! ```text
//!   7   6   5   4   3   2   1   0
//! +-------+---------------+-------+
//! |return |   operation   |channel|
//! +-------+---------------+-------+
//! ```
//!
//! Image packets follow the command with the height and width as big-endian
//! `u16`s and then the raw channel plane.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Byte sent between protocol phases so the slave can realign its framing.
pub const FILLER: u8 = 0x00;

/// Bytes preceding the payload of an image packet.
pub const PACKET_HEADER_LEN: usize = 5;

const RETURN_SHIFT: u8 = 6;
const OP_SHIFT: u8 = 2;
const RETURN_MASK: u8 = 0b11;
const OP_MASK: u8 = 0b1111;
const CHANNEL_MASK: u8 = 0b11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnFlag {
    NoReturn = 0b00,
    Running = 0b01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    NoOp = 0b0000,
    SendImage = 0b0001,
    RecvImage = 0b0010,
    ExecPdi = 0b0011,
    HandArea = 0b0100,
    HandPerimeter = 0b0101,
    HandPeak = 0b0110,
    GestureEval = 0b0111,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Channel {
    Default = 0b00,
    R = 0b01,
    G = 0b10,
    B = 0b11,
}

impl ReturnFlag {
    pub const ALL: [ReturnFlag; 2] = [ReturnFlag::NoReturn, ReturnFlag::Running];

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00 => Some(ReturnFlag::NoReturn),
            0b01 => Some(ReturnFlag::Running),
            _ => None,
        }
    }
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::NoOp,
        Operation::SendImage,
        Operation::RecvImage,
        Operation::ExecPdi,
        Operation::HandArea,
        Operation::HandPerimeter,
        Operation::HandPeak,
        Operation::GestureEval,
    ];

    fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| *op as u8 == bits)
    }
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Default, Channel::R, Channel::G, Channel::B];

    fn from_bits(bits: u8) -> Self {
        match bits & CHANNEL_MASK {
            0b00 => Channel::Default,
            0b01 => Channel::R,
            0b10 => Channel::G,
            _ => Channel::B,
        }
    }
}

/// A decoded command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub return_flag: ReturnFlag,
    pub operation: Operation,
    pub channel: Channel,
}

impl Command {
    pub const fn new(return_flag: ReturnFlag, operation: Operation, channel: Channel) -> Self {
        Command {
            return_flag,
            operation,
            channel,
        }
    }

    /// Command with no return flag and the default channel.
    pub const fn op(operation: Operation) -> Self {
        Command::new(ReturnFlag::NoReturn, operation, Channel::Default)
    }

    pub const fn to_byte(self) -> u8 {
        make_command(self.return_flag, self.operation, self.channel)
    }

    /// Split a byte back into its fields. Returns `None` when the return or
    /// operation field holds a value the protocol does not define.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let return_flag = ReturnFlag::from_bits((byte >> RETURN_SHIFT) & RETURN_MASK)?;
        let operation = Operation::from_bits((byte >> OP_SHIFT) & OP_MASK)?;
        Some(Command::new(return_flag, operation, Channel::from_bits(byte)))
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command.to_byte()
    }
}

pub const fn make_command(return_flag: ReturnFlag, operation: Operation, channel: Channel) -> u8 {
    ((return_flag as u8) << RETURN_SHIFT) | ((operation as u8) << OP_SHIFT) | channel as u8
}

/// Dimensions of one channel plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    pub height: u16,
    pub width: u16,
}

impl ImageGeometry {
    pub const fn new(height: u16, width: u16) -> Self {
        ImageGeometry { height, width }
    }

    pub const fn pixels(&self) -> usize {
        self.height as usize * self.width as usize
    }

    pub const fn packet_len(&self) -> usize {
        PACKET_HEADER_LEN + self.pixels()
    }
}

/// The five bytes at the start of an image packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: u8,
    pub geometry: ImageGeometry,
}

impl PacketHeader {
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_LEN] {
        let [h_hi, h_lo] = self.geometry.height.to_be_bytes();
        let [w_hi, w_lo] = self.geometry.width.to_be_bytes();
        [self.command, h_hi, h_lo, w_hi, w_lo]
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header: &[u8; PACKET_HEADER_LEN] = bytes.get(..PACKET_HEADER_LEN)?.try_into().ok()?;
        Some(PacketHeader {
            command: header[0],
            geometry: ImageGeometry::new(
                u16::from_be_bytes([header[1], header[2]]),
                u16::from_be_bytes([header[3], header[4]]),
            ),
        })
    }
}

/// Build `command | height | width | pixels` for one channel plane.
pub fn make_image_packet(command: u8, buffer: &[u8], geometry: ImageGeometry) -> Result<Vec<u8>> {
    if buffer.len() != geometry.pixels() {
        return Err(BridgeError::InvalidBufferSize {
            expected: geometry.pixels(),
            actual: buffer.len(),
        });
    }

    let mut packet = Vec::with_capacity(geometry.packet_len());
    packet.extend_from_slice(&PacketHeader { command, geometry }.to_bytes());
    packet.extend_from_slice(buffer);
    Ok(packet)
}
