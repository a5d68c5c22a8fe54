pub mod coordinate;
pub mod hdmi;

pub use coordinate::{fid_delta, Coordinate};
pub use hdmi::HdmiDevice;
