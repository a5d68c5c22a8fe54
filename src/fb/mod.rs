pub mod alloc;

pub use alloc::{FbAllocator, FbHandle};
