//! Half-period delay strategies for the bit-banged clock.
//!
//! `Spin` is the deployment discipline: it never yields, so with real-time
//! priority the clock stays regular, but it also means a preempted thread
//! stretches a bit without the slave noticing. With one iteration per half
//! period the HPS lightweight bridge runs the link at roughly 1-4 MHz; the
//! register writes themselves dominate. `Sleep` tolerates preemption but its
//! granularity is the kernel timer slack, so it is only useful for bring-up
//! at very low rates.

use std::thread;
use std::time::Duration;

/// How long to hold each clock phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfPeriod {
    /// Busy-wait for this many loop iterations.
    Spin(u32),
    /// Ask the OS to sleep.
    Sleep(Duration),
    /// No delay at all. For loopback tests and mocks.
    None,
}

impl HalfPeriod {
    #[inline(always)]
    pub fn wait(&self) {
        match *self {
            HalfPeriod::Spin(iterations) => {
                for _ in 0..iterations {
                    std::hint::spin_loop();
                }
            }
            HalfPeriod::Sleep(duration) => thread::sleep(duration),
            HalfPeriod::None => {}
        }
    }

    /// Rough SCK frequency for log output. Spin delays have no fixed
    /// wall-clock length, so they report `None`.
    pub fn approx_frequency_hz(&self) -> Option<u64> {
        match *self {
            HalfPeriod::Sleep(duration) if !duration.is_zero() => {
                Some(500_000_000 / duration.as_nanos().max(1) as u64)
            }
            _ => None,
        }
    }
}

impl Default for HalfPeriod {
    fn default() -> Self {
        HalfPeriod::Spin(1)
    }
}
