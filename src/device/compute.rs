use super::{Buffer, Device};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::ops::Range;

/// Description of one compute pass: its label, group count and buffer bindings.
///
/// The bindings are what the command list uses to enforce ordering: a pass may not touch a
/// buffer that an earlier pass wrote until a barrier on that buffer was recorded.
#[derive(Debug)]
pub struct Pass<'a> {
    label: &'static str,
    groups: u32,
    reads: Vec<&'a Buffer>,
    writes: Vec<&'a Buffer>,
}

impl<'a> Pass<'a> {
    pub fn new(label: &'static str, groups: u32) -> Self {
        Self {
            label,
            groups,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn read(mut self, buffer: &'a Buffer) -> Self {
        self.reads.push(buffer);
        self
    }

    pub fn write(mut self, buffer: &'a Buffer) -> Self {
        self.writes.push(buffer);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn groups(&self) -> u32 {
        self.groups
    }
}

/// Counters collected while recording a command list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComputeStats {
    /// Logical passes dispatched.
    pub passes: u32,
    /// Hardware launches, larger than `passes` when dispatches were split.
    pub launches: u32,
    pub barriers: u32,
    pub copies: u32,
}

/// A compute command list.
///
/// Passes run in submission order as soon as they are dispatched; the command list only
/// tracks which buffers hold writes that no barrier has made visible yet.
#[derive(Debug)]
pub struct Compute<'d> {
    device: &'d Device,
    pending: HashSet<u64>,
    stats: ComputeStats,
}

impl<'d> Compute<'d> {
    pub(super) fn new(device: &'d Device) -> Self {
        Self {
            device,
            pending: HashSet::new(),
            stats: ComputeStats::default(),
        }
    }

    pub fn device(&self) -> &'d Device {
        self.device
    }

    pub fn stats(&self) -> ComputeStats {
        self.stats
    }

    /// Dispatches `pass`, calling `kernel` once per launch with the group range it covers.
    ///
    /// Passes with zero groups are accepted and do nothing.
    pub fn dispatch<F>(&mut self, pass: Pass<'_>, mut kernel: F) -> Result<()>
    where
        F: FnMut(Range<u32>),
    {
        self.check(&pass)?;
        if pass.groups == 0 {
            return Ok(());
        }

        let limit = self.device.features().max_group_count.max(1);
        let mut first = 0;
        while first < pass.groups {
            let last = pass.groups.min(first.saturating_add(limit));
            kernel(first..last);
            self.stats.launches += 1;
            first = last;
        }
        self.stats.passes += 1;
        tracing::trace!(pass = pass.label, groups = pass.groups, "dispatch");

        for buffer in &pass.writes {
            self.pending.insert(buffer.id());
        }
        Ok(())
    }

    /// Makes previous writes to `buffer` visible to following passes.
    pub fn barrier(&mut self, buffer: &Buffer) {
        self.pending.remove(&buffer.id());
        self.stats.barriers += 1;
        tracing::trace!(buffer = buffer.id(), "barrier");
    }

    /// Copies `len` words from `src[src_offset..]` to `dst[dst_offset..]`.
    pub fn copy_buffer(&mut self, dst: &Buffer, dst_offset: usize, src: &Buffer, src_offset: usize, len: usize) -> Result<()> {
        let pass = Pass::new("copy_buffer", 1).read(src).write(dst);
        self.check(&pass)?;
        let dst_range = dst.range(dst_offset, len)?;
        let src_range = src.range(src_offset, len)?;

        if dst == src {
            dst.write().copy_within(src_range, dst_offset);
        } else {
            let words = src.read();
            dst.write()[dst_range].copy_from_slice(&words[src_range]);
        }
        self.stats.copies += 1;
        self.pending.insert(dst.id());
        Ok(())
    }

    fn check(&self, pass: &Pass<'_>) -> Result<()> {
        if let Err(err) = self.device.check() {
            tracing::warn!(pass = pass.label, "dispatch on a lost device");
            return Err(err);
        }
        for buffer in pass.reads.iter().chain(&pass.writes) {
            if self.pending.contains(&buffer.id()) {
                return Err(Error::Hazard {
                    pass: pass.label,
                    buffer: buffer.id(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFeatures;

    #[test]
    fn test_missing_barrier_is_a_hazard() {
        let device = Device::default();
        let a = device.create_buffer(4).unwrap();
        let b = device.create_buffer(4).unwrap();
        let mut compute = device.create_compute();

        compute.dispatch(Pass::new("fill", 1).write(&a), |_| a.write().fill(3)).unwrap();
        let err = compute
            .dispatch(Pass::new("consume", 1).read(&a).write(&b), |_| {})
            .unwrap_err();
        assert_eq!(err, Error::Hazard { pass: "consume", buffer: a.id() });

        compute.barrier(&a);
        compute
            .dispatch(Pass::new("consume", 1).read(&a).write(&b), |_| {
                let src = a.read();
                b.write().copy_from_slice(&src);
            })
            .unwrap();
        compute.barrier(&b);
        assert_eq!(device.read_buffer(&b, 0, 4).unwrap(), vec![3; 4]);
        assert_eq!(compute.stats().passes, 2);
        assert_eq!(compute.stats().barriers, 2);
    }

    #[test]
    fn test_large_dispatch_is_split() {
        let device = Device::new(DeviceFeatures {
            max_group_count: 4,
            ..DeviceFeatures::default()
        });
        let a = device.create_buffer(1).unwrap();
        let mut compute = device.create_compute();
        let mut ranges = Vec::new();
        compute
            .dispatch(Pass::new("split", 10).write(&a), |groups| ranges.push(groups))
            .unwrap();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(compute.stats().launches, 3);
        assert_eq!(compute.stats().passes, 1);
    }

    #[test]
    fn test_copy_within_one_buffer() {
        let device = Device::default();
        let a = device.create_buffer_with(&[1, 2, 3, 0, 0, 0]).unwrap();
        let mut compute = device.create_compute();
        compute.copy_buffer(&a, 3, &a, 0, 3).unwrap();
        compute.barrier(&a);
        assert_eq!(device.read_buffer(&a, 0, 6).unwrap(), vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_dispatch_fails_on_lost_device() {
        let device = Device::default();
        let a = device.create_buffer(1).unwrap();
        let mut compute = device.create_compute();
        device.lose();
        assert_eq!(compute.dispatch(Pass::new("noop", 1).write(&a), |_| {}), Err(Error::DeviceLost));
    }
}
