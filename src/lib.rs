//! PDI bridge - drives an FPGA gesture accelerator over bit-banged SPI.
//!
//! This library provides the SPI transport built on four memory-mapped
//! register bits, the command/packet framing, and the PDI handshake that
//! uploads an RGB frame and reads back the classification and hand features.
//!
//! A bus must only be driven by one transfer at a time; every type here
//! takes `&mut self` for bus access and none of them lock.

pub mod command;
pub mod config;
pub mod error;
pub mod image;
#[cfg(test)]
pub(crate) mod mock;
pub mod observer;
pub mod pdi;
pub mod registers;
pub mod sched;
pub mod spi;
pub mod timing;
pub mod transfer;

// Re-export main types for convenience
pub use command::{
    make_command, make_image_packet, Channel, Command, ImageGeometry, Operation, ReturnFlag,
};
pub use error::{BridgeError, Result};
pub use pdi::{FeatureResults, Gesture, PdiMachine, PdiState, PollPolicy};
pub use registers::{MmioRegisters, RegisterBank};
pub use spi::{BitBangSpi, ByteTransport};
pub use timing::HalfPeriod;
pub use transfer::{ChannelTransfer, TransferOptions, TransferReport};
