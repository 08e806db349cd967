//! Device Capabilities
//!
//! This module defines the two narrow interfaces the core consumes from the layers
//! below it. Devices implement only what they are:
//!
//! - [`FeatureAccess`]: the device-control layer. Named features (string, boolean,
//!   integer, float), command execution and raw register access.
//! - [`BufferQueue`]: the driver's frame buffer queues. Input queue (awaiting
//!   hardware fill) and output queue (filled, awaiting consumption).
//!
//! Feature lookup is capability-checked: instead of probing for a node at every
//! call site, callers go through [`FeatureAccessExt::feature`] and
//! [`FeatureAccessExt::set_feature`], which fail with
//! [`DaqError::FeatureNotFound`] when the device model lacks the node.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is synchronous (the core runs on the caller's thread)
//! - Is thread-safe (requires Send + Sync), with interior mutability in the device
//! - Uses [`DaqResult`] for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust
//! use vision_daq::hardware::capabilities::FeatureAccessExt;
//! use vision_daq::hardware::mock::MockCamera;
//!
//! # fn main() -> vision_daq::error::DaqResult<()> {
//! let camera = MockCamera::new(64, 48);
//! camera.set_feature("Gain", 2.5_f64)?;
//! let gain: f64 = camera.feature("Gain")?;
//! assert_eq!(gain, 2.5);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{DaqError, DaqResult};

/// Capability: Named Feature Access
///
/// The camera's control interface, addressed by GenICam-style feature names.
///
/// # Contract
/// - Getters and setters fail with `FeatureNotFound` when the node is absent
///   and with `ProtocolError` when the node has a different type
/// - `write_memory` writes straight to a physical address, bypassing any
///   feature cache the implementation keeps
/// - `read_register` fills `buf` with the register's current content
pub trait FeatureAccess: Send + Sync {
    /// Whether the device exposes a node with this name.
    fn has_feature(&self, name: &str) -> bool;

    /// Read a string (or enumeration) feature.
    fn string_value(&self, name: &str) -> DaqResult<String>;

    /// Write a string (or enumeration) feature.
    fn set_string_value(&self, name: &str, value: &str) -> DaqResult<()>;

    /// Read a boolean feature.
    fn boolean_value(&self, name: &str) -> DaqResult<bool>;

    /// Write a boolean feature.
    fn set_boolean_value(&self, name: &str, value: bool) -> DaqResult<()>;

    /// Read an integer feature.
    fn integer_value(&self, name: &str) -> DaqResult<i64>;

    /// Write an integer feature.
    fn set_integer_value(&self, name: &str, value: i64) -> DaqResult<()>;

    /// Read a floating point feature.
    fn float_value(&self, name: &str) -> DaqResult<f64>;

    /// Write a floating point feature.
    fn set_float_value(&self, name: &str, value: f64) -> DaqResult<()>;

    /// Execute a command feature.
    fn execute_command(&self, name: &str) -> DaqResult<()>;

    /// Length in bytes of a register node.
    fn register_length(&self, name: &str) -> DaqResult<u64>;

    /// Physical address of a register node.
    fn register_address(&self, name: &str) -> DaqResult<u64>;

    /// Write raw bytes at a physical device address.
    fn write_memory(&self, address: u64, data: &[u8]) -> DaqResult<()>;

    /// Write raw bytes through a register node.
    fn write_register(&self, name: &str, data: &[u8]) -> DaqResult<()>;

    /// Read a register node into `buf`.
    fn read_register(&self, name: &str, buf: &mut [u8]) -> DaqResult<()>;
}

/// A value type that can be read from and written to a named feature.
pub trait FeatureValue: Sized {
    /// Read the feature as this type.
    fn read_from<D: FeatureAccess + ?Sized>(device: &D, name: &str) -> DaqResult<Self>;

    /// Write this value to the feature.
    fn write_to<D: FeatureAccess + ?Sized>(self, device: &D, name: &str) -> DaqResult<()>;
}

impl FeatureValue for String {
    fn read_from<D: FeatureAccess + ?Sized>(device: &D, name: &str) -> DaqResult<Self> {
        device.string_value(name)
    }

    fn write_to<D: FeatureAccess + ?Sized>(self, device: &D, name: &str) -> DaqResult<()> {
        device.set_string_value(name, &self)
    }
}

impl FeatureValue for &str {
    fn read_from<D: FeatureAccess + ?Sized>(_device: &D, name: &str) -> DaqResult<Self> {
        Err(DaqError::ProtocolError(format!(
            "feature '{name}' cannot be read as a borrowed string"
        )))
    }

    fn write_to<D: FeatureAccess + ?Sized>(self, device: &D, name: &str) -> DaqResult<()> {
        device.set_string_value(name, self)
    }
}

impl FeatureValue for bool {
    fn read_from<D: FeatureAccess + ?Sized>(device: &D, name: &str) -> DaqResult<Self> {
        device.boolean_value(name)
    }

    fn write_to<D: FeatureAccess + ?Sized>(self, device: &D, name: &str) -> DaqResult<()> {
        device.set_boolean_value(name, self)
    }
}

impl FeatureValue for i64 {
    fn read_from<D: FeatureAccess + ?Sized>(device: &D, name: &str) -> DaqResult<Self> {
        device.integer_value(name)
    }

    fn write_to<D: FeatureAccess + ?Sized>(self, device: &D, name: &str) -> DaqResult<()> {
        device.set_integer_value(name, self)
    }
}

impl FeatureValue for f64 {
    fn read_from<D: FeatureAccess + ?Sized>(device: &D, name: &str) -> DaqResult<Self> {
        device.float_value(name)
    }

    fn write_to<D: FeatureAccess + ?Sized>(self, device: &D, name: &str) -> DaqResult<()> {
        device.set_float_value(name, self)
    }
}

/// Capability-checked, typed access on top of [`FeatureAccess`].
pub trait FeatureAccessExt: FeatureAccess {
    /// Fail with `FeatureNotFound` unless the device exposes `name`.
    fn require_feature(&self, name: &str) -> DaqResult<()> {
        if self.has_feature(name) {
            Ok(())
        } else {
            Err(DaqError::FeatureNotFound(name.to_string()))
        }
    }

    /// Read a feature as `T` after checking it exists.
    fn feature<T: FeatureValue>(&self, name: &str) -> DaqResult<T> {
        self.require_feature(name)?;
        T::read_from(self, name)
    }

    /// Write a feature after checking it exists.
    fn set_feature<T: FeatureValue>(&self, name: &str, value: T) -> DaqResult<()> {
        self.require_feature(name)?;
        value.write_to(self, name)
    }

    /// Execute a command after checking it exists.
    fn execute(&self, name: &str) -> DaqResult<()> {
        self.require_feature(name)?;
        self.execute_command(name)
    }
}

impl<D: FeatureAccess + ?Sized> FeatureAccessExt for D {}

/// Opaque driver handle of one frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(usize);

impl BufferHandle {
    /// Wrap a driver-assigned buffer index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Driver-assigned buffer index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fill status of a buffer popped from the output queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Transfer completed and the pixel data is valid.
    Success,
    /// Hardware reported a transfer fault.
    Fault,
}

impl fmt::Display for BufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferStatus::Success => write!(f, "success"),
            BufferStatus::Fault => write!(f, "fault"),
        }
    }
}

/// Content and geometry of a filled buffer.
#[derive(Debug, Clone)]
pub struct BufferInfo {
    /// Pixel bytes as filled by the hardware.
    pub data: Bytes,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Channels per pixel.
    pub channels: u32,
    /// Hardware frame counter at fill time.
    pub frame_id: u64,
}

/// Capability: Driver Buffer Queues
///
/// The driver-owned input/output queues frames circulate through.
///
/// # Contract
/// - `push_input` and `pop_output` are atomic with respect to the hardware fill
///   path; the caller adds no locking around them
/// - The output queue is FIFO with the oldest filled buffer at its head
/// - `pop_output` waits up to `timeout` for a buffer and returns `Ok(None)` if
///   none arrived
/// - A buffer is in exactly one of {input queue, output queue, caller} at a time
pub trait BufferQueue: Send + Sync {
    /// Allocate a buffer of `payload_size` bytes. The buffer is held by the caller
    /// until pushed into the input queue.
    fn allocate_buffer(&self, payload_size: usize) -> DaqResult<BufferHandle>;

    /// Free every buffer allocated on this queue.
    fn free_buffers(&self) -> DaqResult<()>;

    /// Hand a buffer to the hardware for filling.
    fn push_input(&self, handle: BufferHandle) -> DaqResult<()>;

    /// Take the head of the output queue, waiting up to `timeout`.
    fn pop_output(&self, timeout: Duration) -> DaqResult<Option<BufferHandle>>;

    /// Number of filled buffers waiting in the output queue.
    fn output_depth(&self) -> usize;

    /// Fill status of a buffer.
    fn buffer_status(&self, handle: BufferHandle) -> DaqResult<BufferStatus>;

    /// Pixel data and geometry of a filled buffer.
    fn buffer_info(&self, handle: BufferHandle) -> DaqResult<BufferInfo>;
}
