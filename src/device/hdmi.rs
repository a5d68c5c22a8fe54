//! Memory-mapped handle for the HDMI scanout peripheral
//!
//! The peripheral is a register block on the AXI bus, reached through
//! `/dev/mem` (hence the root requirement). It scans a framebuffer out of
//! physically contiguous memory and latches a newly written framebuffer
//! address at the next frame boundary, never mid-frame.

use std::fs::OpenOptions;
use std::hint;
use std::os::unix::fs::OpenOptionsExt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use color_eyre::{eyre::eyre, Result};
use memmap2::{MmapOptions, MmapRaw};
use tracing::info;

use super::coordinate::Coordinate;
use crate::CONFIG;

// Register offsets, in u32 words
const REG_CTRL: usize = 0;
const REG_STATUS: usize = 1;
const REG_FB_ADDR: usize = 2;
const REG_COORD: usize = 3;

const CTRL_ENABLE: u32 = 1 << 0;
const CTRL_ABORT: u32 = 1 << 1;
const STATUS_RUNNING: u32 = 1 << 0;

// Register base shared with the signal handler. That path is restricted
// to a pointer load plus volatile register writes, all async-signal-safe.
static SIGNAL_REGS: AtomicPtr<u32> = AtomicPtr::new(ptr::null_mut());

/// Open handle to the peripheral's register block
pub struct HdmiDevice {
    _map: MmapRaw,
    regs: *mut u32,
}

impl HdmiDevice {
    /// Map the register block out of `/dev/mem`
    pub fn open() -> Result<Self> {
        let base = CONFIG.load().device.reg_base;
        let page = page_size::get() as u64;
        let aligned = base & !(page - 1);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(|e| eyre!("cannot open /dev/mem: {e}"))?;
        let map = MmapOptions::new()
            .offset(aligned)
            .len(page as usize)
            .map_raw(&file)
            .map_err(|e| eyre!("cannot map registers at {base:#x}: {e}"))?;

        let regs = unsafe { map.as_mut_ptr().add((base - aligned) as usize) } as *mut u32;
        SIGNAL_REGS.store(regs, Ordering::Release);

        info!("Mapped HDMI peripheral registers at {:#x}", base);
        Ok(Self { _map: map, regs })
    }

    fn read(&self, reg: usize) -> u32 {
        unsafe { ptr::read_volatile(self.regs.add(reg)) }
    }

    fn write(&self, reg: usize, val: u32) {
        unsafe { ptr::write_volatile(self.regs.add(reg), val) }
    }

    /// Current scan position, coherent in a single bus read
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::from_raw(self.read(REG_COORD))
    }

    /// Hand the peripheral a new framebuffer address. Takes effect at the
    /// next frame boundary, not immediately.
    pub fn set_framebuffer(&self, phys: u64) {
        self.write(REG_FB_ADDR, phys as u32);
    }

    /// Begin scanout
    pub fn start(&self) {
        self.write(REG_CTRL, CTRL_ENABLE);
    }

    /// Graceful stop: the peripheral finishes its current frame. Returns
    /// once the running bit clears, within one refresh interval.
    pub fn stop(&self) {
        unsafe { stop_graceful(self.regs) }
    }

    /// Immediate stop, no wait for acknowledgment
    pub fn stop_now(&self) {
        unsafe { stop_immediate(self.regs) }
    }
}

impl Drop for HdmiDevice {
    fn drop(&mut self) {
        // Unhook the signal path before the mapping goes away
        SIGNAL_REGS.store(ptr::null_mut(), Ordering::Release);
    }
}

// Shared by the device handle and the signal path; must stay free of
// locks and allocation.
unsafe fn stop_graceful(regs: *mut u32) {
    ptr::write_volatile(regs.add(REG_CTRL), 0);
    while ptr::read_volatile(regs.add(REG_STATUS)) & STATUS_RUNNING != 0 {
        hint::spin_loop();
    }
}

unsafe fn stop_immediate(regs: *mut u32) {
    ptr::write_volatile(regs.add(REG_CTRL), CTRL_ABORT);
}

/// Stop the peripheral from signal context, waiting for it to finish its
/// current frame. No-op if the device was never opened.
pub(crate) fn signal_stop() {
    let regs = SIGNAL_REGS.load(Ordering::Acquire);
    if !regs.is_null() {
        unsafe { stop_graceful(regs) }
    }
}

/// Stop the peripheral from signal context without waiting
pub(crate) fn signal_stop_now() {
    let regs = SIGNAL_REGS.load(Ordering::Acquire);
    if !regs.is_null() {
        unsafe { stop_immediate(regs) }
    }
}
