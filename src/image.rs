use log::debug;
use std::fs;
use std::path::Path;

use crate::command::{Channel, ImageGeometry};
use crate::error::{BridgeError, Result};

/// Three 8-bit colour planes of equal size, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    geometry: ImageGeometry,
    red: Vec<u8>,
    green: Vec<u8>,
    blue: Vec<u8>,
}

impl RgbImage {
    pub fn from_planes(
        geometry: ImageGeometry,
        red: Vec<u8>,
        green: Vec<u8>,
        blue: Vec<u8>,
    ) -> Result<Self> {
        for plane in [&red, &green, &blue] {
            if plane.len() != geometry.pixels() {
                return Err(BridgeError::InvalidBufferSize {
                    expected: geometry.pixels(),
                    actual: plane.len(),
                });
            }
        }
        Ok(RgbImage {
            geometry,
            red,
            green,
            blue,
        })
    }

    pub fn filled(geometry: ImageGeometry, value: u8) -> Self {
        let plane = vec![value; geometry.pixels()];
        RgbImage {
            geometry,
            red: plane.clone(),
            green: plane.clone(),
            blue: plane,
        }
    }

    /// Deterministic xorshift noise. Useful to exercise the link when no
    /// camera frame is at hand.
    pub fn synthetic(geometry: ImageGeometry, seed: u32) -> Self {
        let mut state = if seed == 0 { 0x9E37_79B9 } else { seed };
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        };

        let n = geometry.pixels();
        let red = (0..n).map(|_| next()).collect();
        let green = (0..n).map(|_| next()).collect();
        let blue = (0..n).map(|_| next()).collect();
        RgbImage {
            geometry,
            red,
            green,
            blue,
        }
    }

    /// Load a raw file holding the R, G and B planes back to back.
    pub fn from_planar_file(path: impl AsRef<Path>, geometry: ImageGeometry) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        let n = geometry.pixels();
        if data.len() != 3 * n {
            return Err(BridgeError::InvalidBufferSize {
                expected: 3 * n,
                actual: data.len(),
            });
        }
        debug!("Loaded {} bytes from {}", data.len(), path.as_ref().display());

        Self::from_planes(
            geometry,
            data[..n].to_vec(),
            data[n..2 * n].to_vec(),
            data[2 * n..].to_vec(),
        )
    }

    pub fn geometry(&self) -> ImageGeometry {
        self.geometry
    }

    /// The plane sent under `channel`. The default channel aliases red.
    pub fn plane(&self, channel: Channel) -> &[u8] {
        match channel {
            Channel::Default | Channel::R => &self.red,
            Channel::G => &self.green,
            Channel::B => &self.blue,
        }
    }
}
