//! Bit-banged SPI master, mode 0, MSB first.
//!
//! There is no error path here: the slave never acknowledges individual
//! bits, so a clock that is too fast for it yields wrong bytes, not errors.
//! Protocol-level checks in [`crate::pdi`] are the only way such corruption
//! shows up.

use log::{debug, trace};

use crate::registers::RegisterBank;
use crate::timing::HalfPeriod;

/// Byte-level link used by the framer and the PDI state machine.
pub trait ByteTransport {
    fn send_byte(&mut self, byte: u8);
    fn receive_byte(&mut self) -> u8;

    fn send_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.send_byte(byte);
        }
    }
}

/// SPI master driving a [`RegisterBank`] directly.
///
/// The bus is exclusively owned for the lifetime of this value; two masters
/// on the same registers would interleave clock edges.
pub struct BitBangSpi<R: RegisterBank> {
    regs: R,
    half_period: HalfPeriod,
}

impl<R: RegisterBank> BitBangSpi<R> {
    pub fn new(regs: R, half_period: HalfPeriod) -> Self {
        let mut spi = BitBangSpi { regs, half_period };
        spi.idle();
        debug!("Bit-bang SPI ready, half period {:?}", half_period);
        spi
    }

    /// Slave deselected, clock and data-out low.
    pub fn idle(&mut self) {
        self.regs.set_data_out(false);
        self.regs.set_clock(false);
        self.regs.set_select(true);
    }

    /// Toggle every output once so the wiring can be checked on a scope.
    pub fn bringup(&mut self) {
        debug!("Running SPI bring-up pulse");
        self.regs.set_clock(true);
        self.regs.set_data_out(true);
        self.regs.set_clock(false);
        self.regs.set_data_out(false);
        self.regs.set_select(false);
        self.regs.set_select(true);
    }

    pub fn half_period(&self) -> HalfPeriod {
        self.half_period
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn into_inner(self) -> R {
        self.regs
    }
}

impl<R: RegisterBank> ByteTransport for BitBangSpi<R> {
    fn send_byte(&mut self, byte: u8) {
        self.regs.set_select(false);
        for i in (0..8).rev() {
            self.regs.set_clock(false);
            self.half_period.wait();

            self.regs.set_data_out((byte >> i) & 0x1 != 0);
            self.regs.set_clock(true);
            self.half_period.wait();
        }
        self.idle();
        trace!("tx 0x{:02x}", byte);
    }

    fn receive_byte(&mut self) -> u8 {
        let mut byte = 0u8;

        self.regs.set_select(false);
        for i in (0..8).rev() {
            self.regs.set_clock(false);
            self.half_period.wait();

            self.regs.set_clock(true);
            let bit = self.regs.data_in() as u8;
            self.half_period.wait();

            byte |= bit << i;
        }
        self.idle();
        trace!("rx 0x{:02x}", byte);
        byte
    }
}
