//! Parallel prefix sums over 32-bit counts.
//!
//! # Algorithm
//!
//! The scan is the usual two level scheme, applied recursively:
//! 1. Every group scans its block of `group_size` values in place and stores the block sum.
//! 2. The block sums are scanned by the same procedure one level up.
//! 3. The scanned block sums are added back to every element of their block.
//!
//! The recursion ends at the first level that fits into a single block; that block's sum is
//! the grand total, which is written to a one word buffer readable with [`PrefixScan::total`].
//! Arithmetic wraps on overflow like the 32-bit integer units of a GPU do.

use crate::device::{Buffer, Compute, Device, Pass, group_count};
use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether element `i` of the output includes input `i`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// `out[i] = in[0] + ... + in[i - 1]`
    #[default]
    Exclusive,
    /// `out[i] = in[0] + ... + in[i]`
    Inclusive,
}

/// Prefix scan building block with scratch buffers sized for `max_elements` values.
#[derive(Debug)]
pub struct PrefixScan {
    group_size: u32,
    max_elements: usize,
    /// Block sums, one buffer per level of the recursion.
    levels: Vec<Buffer>,
    total: Buffer,
}

impl PrefixScan {
    /// Allocates the block sum buffers for scans of up to `max_elements` values.
    pub fn create(device: &Device, max_elements: usize, group_size: u32) -> Result<Self> {
        check_group_size(device, group_size)?;

        let mut levels = Vec::new();
        let mut size = max_elements.max(1);
        loop {
            let blocks = size.div_ceil(group_size as usize);
            levels.push(device.create_buffer(blocks)?);
            if blocks <= 1 {
                break;
            }
            size = blocks;
        }
        let total = device.create_buffer(1)?;

        tracing::debug!(max_elements, group_size, levels = levels.len(), "created prefix scan");
        Ok(Self {
            group_size,
            max_elements,
            levels,
            total,
        })
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Exclusive scan of `count` words at `offset` of `buffer`, in place.
    pub fn dispatch(&self, compute: &mut Compute<'_>, buffer: &Buffer, offset: usize, count: usize) -> Result<()> {
        self.dispatch_mode(compute, ScanMode::Exclusive, buffer, offset, count)
    }

    /// Scan of `count` words at `offset` of `buffer` in place, in the requested mode.
    pub fn dispatch_mode(
        &self,
        compute: &mut Compute<'_>,
        mode: ScanMode,
        buffer: &Buffer,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        if count > self.max_elements {
            tracing::warn!(count, max_elements = self.max_elements, "prefix scan over capacity");
            return Err(Error::Capacity {
                count,
                capacity: self.max_elements,
            });
        }
        buffer.range(offset, count)?;

        if count == 0 {
            compute.dispatch(Pass::new("scan_total", 1).write(&self.total), |_| self.total.write()[0] = 0)?;
            compute.barrier(&self.total);
            return Ok(());
        }
        self.scan_level(compute, 0, mode, buffer, offset, count)
    }

    /// Reads the grand total of the last scan back to the host.
    pub fn total(&self, device: &Device) -> Result<u32> {
        Ok(device.read_buffer(&self.total, 0, 1)?[0])
    }

    /// The one word buffer holding the grand total of the last scan.
    pub fn total_buffer(&self) -> &Buffer {
        &self.total
    }

    fn scan_level(
        &self,
        compute: &mut Compute<'_>,
        level: usize,
        mode: ScanMode,
        data: &Buffer,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        let group_size = self.group_size as usize;
        let sums = &self.levels[level];
        let blocks = group_count(count, self.group_size);

        compute.dispatch(Pass::new("scan_blocks", blocks).read(data).write(data).write(sums), |groups| {
            let mut words = data.write();
            let mut block_sums = sums.write();
            let start = groups.start as usize * group_size;
            let end = (groups.end as usize * group_size).min(count);
            words[offset + start..offset + end]
                .par_chunks_mut(group_size)
                .zip(block_sums[groups.start as usize..groups.end as usize].par_iter_mut())
                .for_each(|(block, sum)| *sum = scan_block(block, mode));
        })?;
        compute.barrier(data);
        compute.barrier(sums);

        if blocks > 1 {
            self.scan_level(compute, level + 1, ScanMode::Exclusive, sums, 0, blocks as usize)?;

            compute.dispatch(Pass::new("scan_add", blocks).read(sums).write(data), |groups| {
                let mut words = data.write();
                let block_sums = sums.read();
                let start = groups.start as usize * group_size;
                let end = (groups.end as usize * group_size).min(count);
                words[offset + start..offset + end]
                    .par_chunks_mut(group_size)
                    .zip(block_sums[groups.start as usize..groups.end as usize].par_iter())
                    .for_each(|(block, &base)| {
                        for value in block {
                            *value = value.wrapping_add(base);
                        }
                    });
            })?;
            compute.barrier(data);
        } else {
            compute.dispatch(Pass::new("scan_total", 1).read(sums).write(&self.total), |_| {
                self.total.write()[0] = sums.read()[0];
            })?;
            compute.barrier(&self.total);
        }
        Ok(())
    }
}

/// Scans one block in place and returns its sum.
fn scan_block(block: &mut [u32], mode: ScanMode) -> u32 {
    let mut sum = 0u32;
    for value in block.iter_mut() {
        let v = *value;
        *value = match mode {
            ScanMode::Exclusive => sum,
            ScanMode::Inclusive => sum.wrapping_add(v),
        };
        sum = sum.wrapping_add(v);
    }
    sum
}

/// Checks that the device runs compute kernels and `group_size` is usable on it.
///
/// A group of one thread never reduces a level of block sums, so groups start at two.
pub(crate) fn check_group_size(device: &Device, group_size: u32) -> Result<()> {
    let features = device.features();
    if !features.compute_shader {
        return Err(Error::Unsupported);
    }
    if group_size < 2 || !group_size.is_power_of_two() || group_size > features.max_group_size {
        return Err(Error::GroupSize {
            size: group_size,
            limit: features.max_group_size,
        });
    }
    Ok(())
}

/// Exclusive prefix sum (CPU reference).
pub fn exclusive_scan(input: &[u32]) -> Vec<u32> {
    let mut sum = 0u32;
    input
        .iter()
        .map(|&v| {
            let out = sum;
            sum = sum.wrapping_add(v);
            out
        })
        .collect()
}

/// Inclusive prefix sum (CPU reference).
pub fn inclusive_scan(input: &[u32]) -> Vec<u32> {
    let mut sum = 0u32;
    input
        .iter()
        .map(|&v| {
            sum = sum.wrapping_add(v);
            sum
        })
        .collect()
}
