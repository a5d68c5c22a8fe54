//! Wiring of the presenter onto the real peripheral and framebuffers

use color_eyre::Result;

use super::scheduler::{FrameSource, ScanoutTarget, SlotPool};
use crate::device::{Coordinate, HdmiDevice};
use crate::fb::{FbAllocator, FbHandle};
use crate::video::{FrameStep, VideoError, VideoSource};

/// The HDMI peripheral plus the physical addresses it may scan from
pub struct HdmiScreen<'a> {
    dev: &'a HdmiDevice,
    phys: [u64; 2],
}

impl<'a> HdmiScreen<'a> {
    pub fn new(dev: &'a HdmiDevice, slots: &[FbHandle; 2]) -> Self {
        Self {
            dev,
            phys: [slots[0].phys(), slots[1].phys()],
        }
    }
}

impl ScanoutTarget for HdmiScreen<'_> {
    fn coordinate(&self) -> Coordinate {
        self.dev.coordinate()
    }

    fn present(&mut self, slot: usize) {
        self.dev.set_framebuffer(self.phys[slot]);
    }

    fn start(&mut self) {
        self.dev.start();
    }
}

/// The two decode targets carved out of the u-dma-buf region
pub struct DoubleBuffer<'a> {
    alloc: &'a mut FbAllocator,
    slots: [FbHandle; 2],
}

impl<'a> DoubleBuffer<'a> {
    pub fn new(alloc: &'a mut FbAllocator, slots: [FbHandle; 2]) -> Self {
        Self { alloc, slots }
    }
}

impl SlotPool for DoubleBuffer<'_> {
    fn data_mut(&mut self, slot: usize) -> &mut [u8] {
        self.alloc.data_mut(&self.slots[slot])
    }

    fn flush(&mut self, slot: usize) -> Result<()> {
        self.alloc.flush(&self.slots[slot])
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self, dst: &mut [u8]) -> Result<FrameStep, VideoError> {
        VideoSource::next_frame(self, dst)
    }
}
