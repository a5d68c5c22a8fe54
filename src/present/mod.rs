pub mod hw;
pub mod scheduler;

pub use hw::{DoubleBuffer, HdmiScreen};
pub use scheduler::{FrameSource, Presenter, ScanoutTarget, SlotPool};
