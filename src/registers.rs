//! Access to the four single-bit SPI registers exposed by the FPGA.
//!
//! The bit-banged transport drives three lines and samples one. Address
//! resolution is left to the caller; [`MmioRegisters`] maps what it is told.

use log::{debug, info};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr;

use crate::config::BusConfig;
use crate::error::{BridgeError, Result};

/// Single-bit register operations needed to bit-bang SPI.
///
/// Levels are raw: `set_select(false)` drives slave-select low, which
/// selects the slave.
pub trait RegisterBank {
    fn set_clock(&mut self, high: bool);
    fn set_select(&mut self, high: bool);
    fn set_data_out(&mut self, high: bool);
    fn data_in(&self) -> bool;
}

/// Registers reached through a `/dev/mem` mapping of the HPS-to-FPGA
/// bridge. Each register is a 32-bit word whose bit 0 is the line level.
pub struct MmioRegisters {
    base: *mut u8,
    len: usize,
    clock: usize,
    select: usize,
    data_out: usize,
    data_in: usize,
}

// SAFETY: the mapping is owned exclusively by this value and only touched
// through `&mut self` (writes) or `&self` (reads of the input register).
unsafe impl Send for MmioRegisters {}

impl MmioRegisters {
    /// Map the bridge window described by `config`. Needs root.
    pub fn open(config: &BusConfig) -> Result<Self> {
        let unavailable = |reason: String| BridgeError::BusUnavailable {
            path: config.device.clone(),
            reason,
        };

        for (name, offset) in [
            ("clock", config.clock),
            ("select", config.select),
            ("data_out", config.data_out),
            ("data_in", config.data_in),
        ] {
            if offset % 4 != 0 || offset.checked_add(4).map_or(true, |end| end > config.span) {
                return Err(unavailable(format!(
                    "{} offset 0x{:x} is unaligned or outside span 0x{:x}",
                    name, offset, config.span
                )));
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&config.device)
            .map_err(|e| unavailable(format!("open failed: {}", e)))?;

        debug!(
            "Mapping 0x{:x} bytes at physical 0x{:x}",
            config.span, config.base_address
        );

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                config.span,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                config.base_address as libc::off_t,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(unavailable(format!(
                "mmap failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        info!("Register bus mapped from {}", config.device);

        Ok(MmioRegisters {
            base: base as *mut u8,
            len: config.span,
            clock: config.clock,
            select: config.select,
            data_out: config.data_out,
            data_in: config.data_in,
        })
    }

    #[inline(always)]
    fn write(&mut self, offset: usize, high: bool) {
        // SAFETY: offsets were checked against the mapped length in `open`.
        unsafe { ptr::write_volatile(self.base.add(offset) as *mut u32, high as u32) }
    }

    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: as in `write`.
        unsafe { ptr::read_volatile(self.base.add(offset) as *const u32) }
    }
}

impl RegisterBank for MmioRegisters {
    fn set_clock(&mut self, high: bool) {
        self.write(self.clock, high)
    }

    fn set_select(&mut self, high: bool) {
        self.write(self.select, high)
    }

    fn set_data_out(&mut self, high: bool) {
        self.write(self.data_out, high)
    }

    fn data_in(&self) -> bool {
        self.read(self.data_in) & 0x1 != 0
    }
}

impl Drop for MmioRegisters {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}
