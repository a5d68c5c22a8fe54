pub mod device;
pub mod fb;
pub mod present;
pub mod signals;
pub mod video;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub fb: FbConfig,
    pub video: VideoConfig,
}

/// Where the scanout peripheral sits on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Physical base address of the register block
    pub reg_base: u64,
}

/// Which u-dma-buf region backs the framebuffers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FbConfig {
    pub udmabuf: String,
}

/// Geometry and refresh of the fixed scanout mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                reg_base: 0x43c0_0000, // AXI GP0 window on the Zynq carrier
            },
            fb: FbConfig {
                udmabuf: "udmabuf0".into(),
            },
            video: VideoConfig {
                width: 640,
                height: 480,
                refresh_hz: 60,
            },
        }
    }
}

impl VideoConfig {
    /// Bytes in one planar YUV 4:2:0 frame
    pub fn frame_bytes(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        w * h + 2 * (w / 2) * (h / 2)
    }
}

/// Counters collected over one playback run
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybackStats {
    pub frames_presented: u64,
    pub deadline_misses: u64,
    pub decode_errors: u64,
}
