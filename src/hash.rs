//! Spatial hash keys (Morton / Z-order codes) for leaf bound centers.
//!
//! A center is normalized against the bound of all centers, quantized to a fixed number of
//! bits per axis and the bits of the axes are interleaved, x in the highest position of every
//! bit group. Leaves that are close in space end up with numerically close keys, which is what
//! the radix sort and the tree construction rely on.

use crate::bounds::BoundingBox;
use serde::{Deserialize, Serialize};

/// Bit depth and axis count of the spatial hash.
///
/// Higher resolutions separate more leaves but need more radix sort digit passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    /// 8 bits per axis over x, y and z, 24 bit keys.
    XYZ8,
    /// 10 bits per axis over x, y and z, 30 bit keys.
    #[default]
    XYZ10,
    /// 16 bits per axis over x and y, 32 bit keys.
    XY16,
}

impl HashMode {
    pub fn axes(self) -> usize {
        match self {
            HashMode::XYZ8 | HashMode::XYZ10 => 3,
            HashMode::XY16 => 2,
        }
    }

    pub fn bits_per_axis(self) -> u32 {
        match self {
            HashMode::XYZ8 => 8,
            HashMode::XYZ10 => 10,
            HashMode::XY16 => 16,
        }
    }

    /// Number of significant bits in a key.
    pub fn key_bits(self) -> u32 {
        self.bits_per_axis() * self.axes() as u32
    }

    /// Interleaves already quantized cell coordinates into a key.
    pub fn encode(self, cell: [u32; 3]) -> u32 {
        let mask = (1u32 << self.bits_per_axis()) - 1;
        match self {
            HashMode::XYZ8 | HashMode::XYZ10 => {
                (spread_3(cell[0] & mask) << 2) | (spread_3(cell[1] & mask) << 1) | spread_3(cell[2] & mask)
            }
            HashMode::XY16 => (spread_2(cell[0] & mask) << 1) | spread_2(cell[1] & mask),
        }
    }
}

/// Hash function fitted to one set of leaves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialHash {
    mode: HashMode,
    origin: [f32; 3],
    scale: [f32; 3],
}

impl SpatialHash {
    /// Fits the hash to the bound of all leaf centers.
    pub fn new(mode: HashMode, centers: &BoundingBox<3>) -> Self {
        let levels = (1u32 << mode.bits_per_axis()) as f32;
        let mut origin = [0.0; 3];
        let mut scale = [0.0; 3];
        for i in 0..mode.axes() {
            let extent = centers.max[i] - centers.min[i];
            origin[i] = centers.min[i];
            // Flat axes collapse to cell zero.
            if extent > 0.0 && extent.is_finite() {
                scale[i] = levels / extent;
            }
        }
        Self { mode, origin, scale }
    }

    pub fn mode(&self) -> HashMode {
        self.mode
    }

    pub fn key(&self, center: &[f32; 3]) -> u32 {
        let limit = (1u32 << self.mode.bits_per_axis()) - 1;
        let mut cell = [0u32; 3];
        for i in 0..self.mode.axes() {
            // Float to int casts saturate, NaN maps to zero.
            cell[i] = (((center[i] - self.origin[i]) * self.scale[i]) as u32).min(limit);
        }
        self.mode.encode(cell)
    }
}

/// Takes the first three coordinates of a point, padding with zeros.
pub fn project<const D: usize>(point: &[f32; D]) -> [f32; 3] {
    let mut out = [0.0; 3];
    for i in 0..D.min(3) {
        out[i] = point[i];
    }
    out
}

/// Spreads the low 10 bits of `v` so that two zero bits follow each of them.
fn spread_3(v: u32) -> u32 {
    let mut v = v & 0x3FF;
    v = v.wrapping_mul(0x0001_0001) & 0xFF00_00FF;
    v = v.wrapping_mul(0x0000_0101) & 0x0F00_F00F;
    v = v.wrapping_mul(0x0000_0011) & 0xC30C_30C3;
    v = v.wrapping_mul(0x0000_0005) & 0x4924_9249;
    v
}

/// Spreads the low 16 bits of `v` so that a zero bit follows each of them.
fn spread_2(v: u32) -> u32 {
    let mut v = v & 0xFFFF;
    v = (v | (v << 8)) & 0x00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333;
    v = (v | (v << 1)) & 0x5555_5555;
    v
}
