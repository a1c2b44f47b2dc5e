//! Stable radix sort of (key, payload) word pairs in compute passes.
//!
//! # Algorithm
//!
//! Keys are processed least significant digit first, [`RADIX_BITS`] bits per digit pass. Each
//! pass runs three kernels:
//! 1. `radix_histogram`: every group counts the digits of its block of elements.
//! 2. the [`PrefixScan`] turns the digit-major histogram into global scatter offsets.
//! 3. `radix_scatter`: every group moves its elements, in order, to their scanned offsets.
//!
//! Because the histogram is laid out digit-major and block-minor and each group scatters its
//! elements in input order, equal keys keep their relative order and the sort is stable.
//!
//! Passes ping-pong between the caller's buffer and an internal scratch buffer; after an odd
//! number of passes a final `radix_copy` moves the result back.
//!
//! Segmented sorting places the histograms of all segments one after another, so a single
//! scan yields offsets for every segment at once.

use crate::device::{Buffer, Compute, Device, Pass, group_count};
use crate::error::{Error, Result};
use crate::prefix_scan::{PrefixScan, check_group_size};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bits consumed by one digit pass.
pub const RADIX_BITS: u32 = 4;
/// Number of distinct digit values.
pub const RADIX: usize = 1 << RADIX_BITS;

/// Whether a sorter handles one array or many independent segments per dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Single,
    /// Enables [`RadixSort::dispatch_segments`].
    Multiple,
}

/// Radix sorter with scratch buffers sized for `max_elements` pairs.
#[derive(Debug)]
pub struct RadixSort {
    mode: SortMode,
    group_size: u32,
    max_elements: usize,
    max_blocks: usize,
    key_bits: u32,
    prefix_scan: PrefixScan,
    /// Keys in `[0, max_elements)`, payloads in `[max_elements, 2 * max_elements)`.
    scratch: Buffer,
    histogram: Buffer,
}

#[derive(Clone, Copy, Debug)]
struct Segment {
    keys: usize,
    data: usize,
    size: usize,
    /// Position of the segment in the packed scratch layout.
    base: usize,
    first_block: usize,
    blocks: usize,
}

#[derive(Clone, Copy, Debug)]
struct Block {
    segment: usize,
    index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Caller,
    Scratch,
}

impl RadixSort {
    /// Allocates histogram, scratch and prefix scan buffers.
    ///
    /// `key_bits` is the number of low key bits a plain [`RadixSort::dispatch`] sorts by.
    /// In [`SortMode::Multiple`] every non-empty segment may end in a partially filled block,
    /// so the histogram has room for `max_elements` extra blocks.
    pub fn create(device: &Device, mode: SortMode, max_elements: usize, group_size: u32, key_bits: u32) -> Result<Self> {
        check_group_size(device, group_size)?;
        if key_bits == 0 || key_bits > u32::BITS {
            return Err(Error::Config(format!("key bits must be in 1..=32, got {key_bits}")));
        }

        let max_elements = max_elements.max(1);
        let blocks = max_elements.div_ceil(group_size as usize);
        let max_blocks = match mode {
            SortMode::Single => blocks,
            SortMode::Multiple => blocks.saturating_add(max_elements),
        };

        let prefix_scan = PrefixScan::create(device, RADIX.saturating_mul(max_blocks), group_size)?;
        let scratch = device.create_buffer(max_elements.saturating_mul(2))?;
        let histogram = device.create_buffer(RADIX.saturating_mul(max_blocks))?;

        tracing::debug!(?mode, max_elements, group_size, key_bits, max_blocks, "created radix sort");
        Ok(Self {
            mode,
            group_size,
            max_elements,
            max_blocks,
            key_bits,
            prefix_scan,
            scratch,
            histogram,
        })
    }

    pub fn mode(&self) -> SortMode {
        self.mode
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    pub fn prefix_scan(&self) -> &PrefixScan {
        &self.prefix_scan
    }

    /// Sorts `size` keys at `keys_offset` of `buffer` together with the payloads at `data_offset`.
    pub fn dispatch(
        &self,
        compute: &mut Compute<'_>,
        buffer: &Buffer,
        keys_offset: usize,
        data_offset: usize,
        size: usize,
    ) -> Result<()> {
        self.dispatch_bits(compute, buffer, keys_offset, data_offset, size, self.key_bits)
    }

    /// Like [`RadixSort::dispatch`] but only orders by the low `key_bits` bits.
    pub fn dispatch_bits(
        &self,
        compute: &mut Compute<'_>,
        buffer: &Buffer,
        keys_offset: usize,
        data_offset: usize,
        size: usize,
        key_bits: u32,
    ) -> Result<()> {
        self.sort(compute, buffer, &[keys_offset], &[data_offset], &[size], key_bits)
    }

    /// Sorts every segment `i` of `sizes[i]` keys at `keys_offsets[i]` with payloads at
    /// `data_offsets[i]` independently, in one set of passes.
    pub fn dispatch_segments(
        &self,
        compute: &mut Compute<'_>,
        buffer: &Buffer,
        keys_offsets: &[usize],
        data_offsets: &[usize],
        sizes: &[usize],
    ) -> Result<()> {
        self.dispatch_segments_bits(compute, buffer, keys_offsets, data_offsets, sizes, self.key_bits)
    }

    pub fn dispatch_segments_bits(
        &self,
        compute: &mut Compute<'_>,
        buffer: &Buffer,
        keys_offsets: &[usize],
        data_offsets: &[usize],
        sizes: &[usize],
        key_bits: u32,
    ) -> Result<()> {
        if self.mode == SortMode::Single {
            return Err(Error::Mode("single"));
        }
        self.sort(compute, buffer, keys_offsets, data_offsets, sizes, key_bits)
    }

    fn sort(
        &self,
        compute: &mut Compute<'_>,
        buffer: &Buffer,
        keys_offsets: &[usize],
        data_offsets: &[usize],
        sizes: &[usize],
        key_bits: u32,
    ) -> Result<()> {
        if keys_offsets.len() != sizes.len() || data_offsets.len() != sizes.len() {
            return Err(Error::Config("segment tables differ in length".into()));
        }
        let key_bits = key_bits.clamp(1, self.key_bits);

        let count = sizes.iter().fold(0usize, |sum, &size| sum.saturating_add(size));
        if count > self.max_elements {
            tracing::warn!(count, max_elements = self.max_elements, "radix sort over capacity");
            return Err(Error::Capacity {
                count,
                capacity: self.max_elements,
            });
        }

        let (segments, blocks) = self.plan(buffer, keys_offsets, data_offsets, sizes)?;
        // Only reachable when a segmented plan runs on a single mode histogram.
        if blocks.len() > self.max_blocks {
            tracing::warn!(blocks = blocks.len(), max_blocks = self.max_blocks, "radix sort segments need too many blocks");
            return Err(Error::Mode("single"));
        }
        if count == 0 {
            return Ok(());
        }

        let passes = key_bits.div_ceil(RADIX_BITS);
        for pass in 0..passes {
            let (src, dst) = if pass % 2 == 0 {
                (Side::Caller, Side::Scratch)
            } else {
                (Side::Scratch, Side::Caller)
            };
            self.digit_pass(compute, buffer, &segments, &blocks, pass * RADIX_BITS, src, dst)?;
        }

        if passes % 2 == 1 {
            let max = self.max_elements;
            compute.dispatch(Pass::new("radix_copy", 1).read(&self.scratch).write(buffer), |_| {
                let scratch = self.scratch.read();
                let mut words = buffer.write();
                for segment in &segments {
                    let (src_keys, src_data) = segment.offsets(Side::Scratch, max);
                    words[segment.keys..segment.keys + segment.size]
                        .copy_from_slice(&scratch[src_keys..src_keys + segment.size]);
                    words[segment.data..segment.data + segment.size]
                        .copy_from_slice(&scratch[src_data..src_data + segment.size]);
                }
            })?;
            compute.barrier(buffer);
        }
        Ok(())
    }

    /// Resolves the segment tables into scratch positions and a flat list of blocks.
    fn plan(
        &self,
        buffer: &Buffer,
        keys_offsets: &[usize],
        data_offsets: &[usize],
        sizes: &[usize],
    ) -> Result<(Vec<Segment>, Vec<Block>)> {
        let mut segments = Vec::with_capacity(sizes.len());
        let mut blocks = Vec::new();
        let mut base = 0;
        for (i, &size) in sizes.iter().enumerate() {
            buffer.range(keys_offsets[i], size)?;
            buffer.range(data_offsets[i], size)?;
            let count = group_count(size, self.group_size) as usize;
            segments.push(Segment {
                keys: keys_offsets[i],
                data: data_offsets[i],
                size,
                base,
                first_block: blocks.len(),
                blocks: count,
            });
            blocks.extend((0..count).map(|index| Block { segment: i, index }));
            base += size;
        }
        Ok((segments, blocks))
    }

    #[allow(clippy::too_many_arguments)]
    fn digit_pass(
        &self,
        compute: &mut Compute<'_>,
        buffer: &Buffer,
        segments: &[Segment],
        blocks: &[Block],
        shift: u32,
        src: Side,
        dst: Side,
    ) -> Result<()> {
        let group_size = self.group_size as usize;
        let max = self.max_elements;
        let src_buffer = if src == Side::Caller { buffer } else { &self.scratch };
        let dst_buffer = if dst == Side::Caller { buffer } else { &self.scratch };
        let groups = blocks.len() as u32;

        compute.dispatch(Pass::new("radix_histogram", groups).read(src_buffer).write(&self.histogram), |range| {
            let range = range.start as usize..range.end as usize;
            let words = src_buffer.read();
            let counts: Vec<[u32; RADIX]> = blocks[range.clone()]
                .par_iter()
                .map(|block| {
                    let segment = &segments[block.segment];
                    let (keys, _) = segment.offsets(src, max);
                    let (start, end) = block.span(segment, group_size);
                    let mut counts = [0u32; RADIX];
                    for &key in &words[keys + start..keys + end] {
                        counts[digit(key, shift)] += 1;
                    }
                    counts
                })
                .collect();

            let mut histogram = self.histogram.write();
            for (block, counts) in blocks[range].iter().zip(counts) {
                let segment = &segments[block.segment];
                for (d, &count) in counts.iter().enumerate() {
                    histogram[segment.histogram_slot(d, block.index)] = count;
                }
            }
        })?;
        compute.barrier(&self.histogram);

        self.prefix_scan
            .dispatch(compute, &self.histogram, 0, RADIX * blocks.len())?;

        compute.dispatch(
            Pass::new("radix_scatter", groups).read(src_buffer).read(&self.histogram).write(dst_buffer),
            |range| {
                let range = range.start as usize..range.end as usize;
                let words = src_buffer.read();
                let histogram = self.histogram.read();
                let moves: Vec<Vec<(usize, usize, u32, u32)>> = blocks[range]
                    .par_iter()
                    .map(|block| {
                        let segment = &segments[block.segment];
                        let (src_keys, src_data) = segment.offsets(src, max);
                        let (dst_keys, dst_data) = segment.offsets(dst, max);
                        let (start, end) = block.span(segment, group_size);

                        let mut next = [0usize; RADIX];
                        for (d, slot) in next.iter_mut().enumerate() {
                            *slot = histogram[segment.histogram_slot(d, block.index)] as usize - segment.base;
                        }
                        (start..end)
                            .map(|i| {
                                let key = words[src_keys + i];
                                let position = &mut next[digit(key, shift)];
                                let target = *position;
                                *position += 1;
                                (dst_keys + target, dst_data + target, key, words[src_data + i])
                            })
                            .collect()
                    })
                    .collect();

                let mut out = dst_buffer.write();
                for (key_index, data_index, key, value) in moves.into_iter().flatten() {
                    out[key_index] = key;
                    out[data_index] = value;
                }
            },
        )?;
        compute.barrier(dst_buffer);
        Ok(())
    }
}

impl Segment {
    fn offsets(&self, side: Side, max_elements: usize) -> (usize, usize) {
        match side {
            Side::Caller => (self.keys, self.data),
            Side::Scratch => (self.base, max_elements + self.base),
        }
    }

    fn histogram_slot(&self, digit: usize, block: usize) -> usize {
        RADIX * self.first_block + digit * self.blocks + block
    }
}

impl Block {
    fn span(&self, segment: &Segment, group_size: usize) -> (usize, usize) {
        let start = self.index * group_size;
        (start, (start + group_size).min(segment.size))
    }
}

#[inline]
fn digit(key: u32, shift: u32) -> usize {
    ((key >> shift) & (RADIX as u32 - 1)) as usize
}

/// Stable LSD radix sort of keys with payloads over the low `key_bits` bits (CPU reference).
pub fn sort_pairs(keys: &[u32], values: &[u32], key_bits: u32) -> (Vec<u32>, Vec<u32>) {
    let n = keys.len().min(values.len());
    let mut keys_a = keys[..n].to_vec();
    let mut values_a = values[..n].to_vec();
    let mut keys_b = vec![0u32; n];
    let mut values_b = vec![0u32; n];

    for pass in 0..key_bits.min(u32::BITS).div_ceil(RADIX_BITS) {
        let shift = pass * RADIX_BITS;

        let mut offsets = [0usize; RADIX];
        for &k in &keys_a {
            offsets[digit(k, shift)] += 1;
        }
        let mut sum = 0;
        for slot in offsets.iter_mut() {
            let count = *slot;
            *slot = sum;
            sum += count;
        }

        for i in 0..n {
            let slot = &mut offsets[digit(keys_a[i], shift)];
            keys_b[*slot] = keys_a[i];
            values_b[*slot] = values_a[i];
            *slot += 1;
        }

        std::mem::swap(&mut keys_a, &mut keys_b);
        std::mem::swap(&mut values_a, &mut values_b);
    }
    (keys_a, values_a)
}
