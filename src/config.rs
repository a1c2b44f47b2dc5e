use crate::device::DeviceFeatures;
use crate::error::{Error, Result};
use crate::hash::HashMode;
use crate::radix_sort::SortMode;
use crate::spatial_tree::TreeMode;
use serde::{Deserialize, Serialize};

/// Sizes and modes of a prefix scan, radix sort and tree builder stack.
///
/// Every field has a default, so a configuration file only lists what it changes:
///
/// ```
/// let config: spatree::SpatialConfig = serde_json::from_str(r#"{ "max_elements": 4096 }"#).unwrap();
/// assert_eq!(config.group_size, 128);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Largest number of leaves (or sort pairs) per dispatch.
    pub max_elements: usize,
    /// Threads per group, a power of two.
    pub group_size: u32,
    pub hash_mode: HashMode,
    /// Key bits the radix sort orders by.
    pub key_bits: u32,
    pub sort_mode: SortMode,
    pub tree_mode: TreeMode,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            max_elements: 1 << 16,
            group_size: 128,
            hash_mode: HashMode::default(),
            key_bits: 32,
            sort_mode: SortMode::default(),
            tree_mode: TreeMode::default(),
        }
    }
}

impl SpatialConfig {
    /// Checks the configuration on its own and against the limits of a device.
    pub fn validate(&self, features: &DeviceFeatures) -> Result<()> {
        if !features.compute_shader {
            return Err(Error::Unsupported);
        }
        if self.group_size < 2 || !self.group_size.is_power_of_two() || self.group_size > features.max_group_size {
            return Err(Error::GroupSize {
                size: self.group_size,
                limit: features.max_group_size,
            });
        }
        if self.max_elements == 0 {
            return Err(Error::Config("max_elements must be positive".into()));
        }
        if self.key_bits == 0 || self.key_bits > u32::BITS {
            return Err(Error::Config(format!("key_bits must be in 1..=32, got {}", self.key_bits)));
        }
        if self.hash_mode.key_bits() > self.key_bits {
            return Err(Error::Config(format!(
                "{:?} keys need {} bits, only {} are sorted",
                self.hash_mode,
                self.hash_mode.key_bits(),
                self.key_bits
            )));
        }
        if self.tree_mode == TreeMode::Multiple && self.sort_mode != SortMode::Multiple {
            return Err(Error::Config("tree_mode multiple needs sort_mode multiple".into()));
        }
        Ok(())
    }
}
