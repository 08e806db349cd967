//! # Vision DAQ Core Library
//!
//! Machine-vision camera access built around two logical channels: a continuous
//! frame stream served from a recycled hardware buffer pool, and a low-bandwidth
//! serial tunnel, carried over the camera's register-mapped file access
//! features, that drives a motorized focus lens.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (defaults, TOML file, `VISIONDAQ_`
//!   environment variables) via `figment`. See `config::Settings`.
//! - **`error`**: The `DaqError` enum used by every layer.
//! - **`hardware`**: Device-facing building blocks.
//!   - `capabilities`: the `FeatureAccess` and `BufferQueue` interfaces a camera
//!     driver provides
//!   - `file_access`: `RegisterFileChannel`, open/write/read/close over a
//!     register-mapped file
//!   - `lens`: the 7-byte focus command codec and the `LensFocus` actuator
//!   - `frame_stream`: the buffer loan/recycle protocol with oldest, newest and
//!     next-new borrow policies
//!   - `mock`: a simulated camera implementing both interfaces
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`session`**: `CameraSession`, the owned facade an application holds.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod session;

pub use config::Settings;
pub use error::{DaqError, DaqResult};
pub use session::{AcquisitionMode, CameraSession, PixelFormat};
