use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::command::{Channel, ImageGeometry};
use crate::pdi::{PollPolicy, DEFAULT_MAX_POLLS};
use crate::timing::HalfPeriod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub image: ImageConfig,
    pub bus: BusConfig,
    pub timing: TimingConfig,
    pub polling: PollingConfig,
    pub scheduling: SchedulingConfig,
    pub channels: Vec<Channel>,
    pub debug: DebugConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub height: u16,
    pub width: u16,
    pub source: ImageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Deterministic noise, for link bring-up without a camera.
    Synthetic { seed: u32 },
    /// Raw file holding the R, G and B planes back to back.
    Planar { path: String },
}

/// Where the four SPI registers live. The offsets are relative to
/// `base_address` and come from the FPGA design, not from this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub device: String,
    pub base_address: u64,
    pub span: usize,
    pub clock: usize,
    pub select: usize,
    pub data_out: usize,
    pub data_in: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimingConfig {
    Spin { iterations: u32 },
    Sleep { half_period_ns: u64 },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Receive attempts allowed per poll loop.
    pub max_polls: u64,
    /// Poll until the accelerator answers, ignoring `max_polls`.
    pub unbounded: bool,
    /// Extra attempts at the PDI phase after a poll timeout.
    pub exec_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub realtime_priority: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Pulse every line once before the first transfer.
    pub bringup: bool,
    /// Channels read back from the accelerator after PDI completes.
    pub readback_channels: Vec<Channel>,
    /// Log every byte moved over the link at trace level.
    pub log_bytes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub continuous: bool,
    pub interval_ms: u64,
}

impl Config {
    pub fn geometry(&self) -> ImageGeometry {
        ImageGeometry::new(self.image.height, self.image.width)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        if self.polling.unbounded {
            PollPolicy::unbounded()
        } else {
            PollPolicy::bounded(self.polling.max_polls)
        }
    }

    /// Reject settings that would produce a malformed transfer.
    pub fn validate(&self) -> Result<(), String> {
        if self.image.height == 0 || self.image.width == 0 {
            return Err(format!(
                "image dimensions must be non-zero, got {}x{}",
                self.image.height, self.image.width
            ));
        }
        if self.channels.is_empty() {
            return Err("at least one channel must be configured".to_string());
        }
        if self.channels.contains(&Channel::Default) {
            return Err("channel list may only name r, g and b".to_string());
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if self.channels[..i].contains(channel) {
                return Err(format!("channel {:?} listed more than once", channel));
            }
        }
        if !self.polling.unbounded && self.polling.max_polls == 0 {
            return Err("polling.max_polls must be at least 1".to_string());
        }
        if self.debug.readback_channels.contains(&Channel::Default) {
            return Err("readback channels may only name r, g and b".to_string());
        }
        let offsets = [self.bus.clock, self.bus.select, self.bus.data_out, self.bus.data_in];
        if let Some(bad) = offsets
            .iter()
            .find(|o| o.checked_add(4).map_or(true, |end| end > self.bus.span))
        {
            return Err(format!(
                "register offset 0x{:x} lies outside the mapped span 0x{:x}",
                bad, self.bus.span
            ));
        }
        Ok(())
    }
}

impl From<TimingConfig> for HalfPeriod {
    fn from(timing: TimingConfig) -> Self {
        match timing {
            TimingConfig::Spin { iterations } => HalfPeriod::Spin(iterations),
            TimingConfig::Sleep { half_period_ns } => {
                HalfPeriod::Sleep(Duration::from_nanos(half_period_ns))
            }
            TimingConfig::None => HalfPeriod::None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: ImageConfig::default(),
            bus: BusConfig::default(),
            timing: TimingConfig::Spin { iterations: 1 },
            polling: PollingConfig::default(),
            scheduling: SchedulingConfig {
                realtime_priority: true,
            },
            channels: vec![Channel::R, Channel::G, Channel::B],
            debug: DebugConfig::default(),
            run: RunConfig {
                continuous: false,
                interval_ms: 1000,
            },
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            height: 240,
            width: 320,
            source: ImageSource::Synthetic { seed: 0x3285_4232 },
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        // 64 MiB window over the peripheral region; the lightweight
        // HPS-to-FPGA bridge starts 0x0320_0000 into it.
        Self {
            device: "/dev/mem".to_string(),
            base_address: 0xFC00_0000,
            span: 0x0400_0000,
            clock: 0x0320_0000,
            select: 0x0320_0010,
            data_out: 0x0320_0020,
            data_in: 0x0320_0030,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig::Spin { iterations: 1 }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_polls: DEFAULT_MAX_POLLS,
            unbounded: false,
            exec_retries: 2,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            realtime_priority: true,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Config::default().run
    }
}
