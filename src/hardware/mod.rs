//! Camera Hardware Layer
//!
//! Device-facing building blocks. `capabilities` defines the two interfaces a
//! camera driver provides; everything else is built on top of them.

pub mod capabilities;
pub mod file_access;
pub mod frame_stream;
pub mod lens;
pub mod mock;

pub use capabilities::{
    BufferHandle, BufferInfo, BufferQueue, BufferStatus, FeatureAccess, FeatureAccessExt,
    FeatureValue,
};
pub use file_access::{FileOpenMode, PollPolicy, RegisterFileChannel};
pub use frame_stream::{FrameBuffer, FrameStream};
pub use lens::{FocusCommand, LensFocus};
pub use mock::MockCamera;
