//! Framebuffer allocation out of a u-dma-buf region
//!
//! The peripheral DMAs straight from physical memory, so the framebuffers
//! must be contiguous and uncached from its point of view. The u-dma-buf
//! driver reserves such a region at boot and exposes it as a character
//! device plus a sysfs directory; two page-aligned slots are carved out of
//! it here, and cache cleans go through the driver's `sync_*` attributes.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info};

use crate::CONFIG;

/// Owner of the mapped u-dma-buf region; hands out the two scanout slots
pub struct FbAllocator {
    map: MmapMut,
    sysfs: PathBuf,
    phys_base: u64,
    slot_len: usize,
    frame_len: usize,
    next_slot: usize,
}

/// One hardware-visible framebuffer
#[derive(Debug, Clone, Copy)]
pub struct FbHandle {
    offset: usize,
    len: usize,
    phys: u64,
}

impl FbHandle {
    /// Physical address the peripheral scans from
    pub fn phys(&self) -> u64 {
        self.phys
    }
}

impl FbAllocator {
    /// Map the u-dma-buf region named in the configuration
    pub fn open() -> Result<Self> {
        let cfg = CONFIG.load();
        let name = &cfg.fb.udmabuf;
        let sysfs = PathBuf::from(format!("/sys/class/u-dma-buf/{name}"));

        let phys_base = parse_hex(&fs::read_to_string(sysfs.join("phys_addr"))?)?;
        let region: usize = fs::read_to_string(sysfs.join("size"))?
            .trim()
            .parse()
            .map_err(|e| eyre!("bad u-dma-buf size attribute: {e}"))?;

        let frame_len = cfg.video.frame_bytes();
        let page = page_size::get();
        let slot_len = (frame_len + page - 1) & !(page - 1);
        if region < 2 * slot_len {
            return Err(eyre!(
                "u-dma-buf region too small: {region} bytes, need {}",
                2 * slot_len
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/{name}"))?;
        let map = unsafe { MmapOptions::new().len(2 * slot_len).map_mut(&file)? };

        info!(
            "Framebuffer region: 2 x {frame_len} bytes at {:#x}",
            phys_base
        );
        Ok(Self {
            map,
            sysfs,
            phys_base,
            slot_len,
            frame_len,
            next_slot: 0,
        })
    }

    /// Hand out the next slot; the region holds exactly two
    pub fn allocate(&mut self) -> Result<FbHandle> {
        if self.next_slot >= 2 {
            return Err(eyre!("framebuffer region exhausted"));
        }
        let offset = self.next_slot * self.slot_len;
        let fb = FbHandle {
            offset,
            len: self.frame_len,
            phys: self.phys_base + offset as u64,
        };
        debug!("Allocated framebuffer {} at {:#x}", self.next_slot, fb.phys);
        self.next_slot += 1;
        Ok(fb)
    }

    pub fn allocate_pair(&mut self) -> Result<[FbHandle; 2]> {
        Ok([self.allocate()?, self.allocate()?])
    }

    /// The slot's writable pixel bytes, the decode target
    pub fn data_mut(&mut self, fb: &FbHandle) -> &mut [u8] {
        &mut self.map[fb.offset..fb.offset + fb.len]
    }

    /// Clean the slot's cache lines so the peripheral reads what was just
    /// decoded rather than stale DRAM. Required before the slot may be
    /// referenced by the device.
    pub fn flush(&self, fb: &FbHandle) -> Result<()> {
        fs::write(self.sysfs.join("sync_offset"), fb.offset.to_string())?;
        fs::write(self.sysfs.join("sync_size"), fb.len.to_string())?;
        // sync_direction 1 == DMA_TO_DEVICE
        fs::write(self.sysfs.join("sync_direction"), "1")?;
        fs::write(self.sysfs.join("sync_for_device"), "1")?;
        Ok(())
    }
}

fn parse_hex(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim().trim_start_matches("0x"), 16)
        .map_err(|e| eyre!("bad u-dma-buf phys_addr attribute: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sysfs_phys_addr() {
        assert_eq!(parse_hex("0x1f400000\n").unwrap(), 0x1f40_0000);
        assert_eq!(parse_hex("1f400000").unwrap(), 0x1f40_0000);
        assert!(parse_hex("not an address").is_err());
    }
}
