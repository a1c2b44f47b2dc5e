//! Host-memory compute device.
//!
//! The tree builder never talks to a graphics API directly. It allocates word-addressed
//! storage [`Buffer`]s from a [`Device`], records passes on a [`Compute`] command list and
//! separates dependent passes with barriers. This device executes every pass on the rayon
//! pool, so the whole pipeline runs (and is tested) without a GPU while keeping the same
//! pass structure, resource limits and failure modes.

mod compute;

pub use compute::{Compute, ComputeStats, Pass};

use crate::error::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Capabilities and limits of a compute device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceFeatures {
    /// Whether compute kernels can run at all.
    pub compute_shader: bool,
    /// Largest thread-group width a kernel may use.
    pub max_group_size: u32,
    /// Largest number of groups in a single launch, bigger dispatches are split.
    pub max_group_count: u32,
    /// Total bytes of buffer memory the device can hand out.
    pub memory_budget: usize,
}

impl Default for DeviceFeatures {
    fn default() -> Self {
        Self {
            compute_shader: true,
            max_group_size: 1024,
            max_group_count: 65535,
            memory_budget: 1 << 30,
        }
    }
}

/// A compute device owning a memory budget.
#[derive(Debug)]
pub struct Device {
    features: DeviceFeatures,
    allocated: Arc<AtomicUsize>,
    next_id: AtomicU64,
    lost: AtomicBool,
}

impl Default for Device {
    fn default() -> Self {
        Self::new(DeviceFeatures::default())
    }
}

impl Device {
    pub fn new(features: DeviceFeatures) -> Self {
        Self {
            features,
            allocated: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
            lost: AtomicBool::new(false),
        }
    }

    pub fn features(&self) -> &DeviceFeatures {
        &self.features
    }

    pub fn has_compute(&self) -> bool {
        self.features.compute_shader
    }

    /// Bytes currently held by live buffers.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Allocates a zero-filled buffer of `words` 32-bit words.
    pub fn create_buffer(&self, words: usize) -> Result<Buffer> {
        self.check()?;
        let budget = self.features.memory_budget;
        let Some(requested) = words.checked_mul(size_of::<u32>()) else {
            return Err(Error::Allocation {
                requested: usize::MAX,
                available: budget.saturating_sub(self.allocated()),
            });
        };
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(requested).filter(|&total| total <= budget)
            })
            .map_err(|used| Error::Allocation {
                requested,
                available: budget.saturating_sub(used),
            })?;

        Ok(Buffer {
            inner: Arc::new(BufferInner {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                len: words,
                words: RwLock::new(vec![0; words]),
                allocated: Arc::clone(&self.allocated),
            }),
        })
    }

    /// Allocates a buffer and uploads `data` into it.
    pub fn create_buffer_with(&self, data: &[u32]) -> Result<Buffer> {
        let buffer = self.create_buffer(data.len())?;
        buffer.write().copy_from_slice(data);
        Ok(buffer)
    }

    /// Uploads `data` into the buffer starting at word `offset`.
    pub fn write_buffer(&self, buffer: &Buffer, offset: usize, data: &[u32]) -> Result<()> {
        self.check()?;
        let range = buffer.range(offset, data.len())?;
        buffer.write()[range].copy_from_slice(data);
        Ok(())
    }

    /// Copies `len` words starting at `offset` back to the host.
    pub fn read_buffer(&self, buffer: &Buffer, offset: usize, len: usize) -> Result<Vec<u32>> {
        self.check()?;
        let range = buffer.range(offset, len)?;
        Ok(buffer.read()[range].to_vec())
    }

    pub fn clear_buffer(&self, buffer: &Buffer) -> Result<()> {
        self.check()?;
        buffer.write().fill(0);
        Ok(())
    }

    /// Starts a new compute command list.
    pub fn create_compute(&self) -> Compute<'_> {
        Compute::new(self)
    }

    /// Reports whether the device is still usable.
    pub fn check(&self) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(Error::DeviceLost);
        }
        Ok(())
    }

    /// Marks the device as lost, every following operation fails with [`Error::DeviceLost`].
    pub fn lose(&self) {
        tracing::warn!("device marked as lost");
        self.lost.store(true, Ordering::Release);
    }
}

/// Cloneable handle to a storage buffer of 32-bit words.
#[derive(Clone, Debug)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

#[derive(Debug)]
struct BufferInner {
    id: u64,
    len: usize,
    words: RwLock<Vec<u32>>,
    allocated: Arc<AtomicUsize>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.allocated.fetch_sub(self.len * size_of::<u32>(), Ordering::AcqRel);
    }
}

impl Buffer {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Size in words.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn bytes(&self) -> usize {
        self.inner.len * size_of::<u32>()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<u32>> {
        self.inner.words.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<u32>> {
        self.inner.words.write()
    }

    /// Validates `len` words at `offset` against the buffer size.
    pub(crate) fn range(&self, offset: usize, len: usize) -> Result<Range<usize>> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.inner.len {
            return Err(Error::OutOfBounds {
                offset,
                end,
                len: self.inner.len,
            });
        }
        Ok(offset..end)
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Buffer {}

/// Number of groups of `group_size` threads needed to cover `threads`.
pub fn group_count(threads: usize, group_size: u32) -> u32 {
    threads.div_ceil(group_size as usize) as u32
}
