//! Camera session
//!
//! [`CameraSession`] is the single owned handle an application holds for one
//! connected camera. It composes the frame stream and the focus lens actuator,
//! forwards simple property writes to the device, and tears everything down in
//! a fixed order on [`CameraSession::close`] or drop:
//!
//! 1. stop acquisition
//! 2. close the lens serial file
//! 3. free the frame pool (flagging frames still on loan)
//!
//! Failures in any step do not stop the later ones; they are collected into
//! [`DaqError::ShutdownFailed`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vision_daq::config::Settings;
//! use vision_daq::hardware::capabilities::BufferStatus;
//! use vision_daq::hardware::mock::MockCamera;
//! use vision_daq::session::{CameraSession, PixelFormat};
//!
//! # fn main() -> vision_daq::error::DaqResult<()> {
//! let camera = Arc::new(MockCamera::new(640, 480));
//! let mut session = CameraSession::open(camera.clone(), &Settings::default())?;
//!
//! session.set_pixel_format(PixelFormat::Mono12)?;
//! session.set_lens_focus(42.0)?;
//! session.start_acquisition()?;
//!
//! camera.deliver_frame(BufferStatus::Success);
//! let frame = session.borrow_newest()?;
//! assert_eq!(frame.len(), 640 * 480 * 2);
//! session.release_frame(frame)?;
//!
//! session.close()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::{CameraSettings, Settings};
use crate::error::{DaqError, DaqResult};
use crate::hardware::capabilities::{BufferQueue, FeatureAccess, FeatureAccessExt};
use crate::hardware::file_access::RegisterFileChannel;
use crate::hardware::frame_stream::{FrameBuffer, FrameStream};
use crate::hardware::lens::{FocusCommand, LensFocus};

/// Monochrome pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8 bits per pixel
    Mono8,
    /// 10 bits per pixel
    Mono10,
    /// 12 bits per pixel
    Mono12,
    /// 14 bits per pixel
    Mono14,
    /// 16 bits per pixel
    Mono16,
}

impl PixelFormat {
    /// GenICam `PixelFormat` entry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono10 => "Mono10",
            PixelFormat::Mono12 => "Mono12",
            PixelFormat::Mono14 => "Mono14",
            PixelFormat::Mono16 => "Mono16",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mono8" => Ok(PixelFormat::Mono8),
            "mono10" => Ok(PixelFormat::Mono10),
            "mono12" => Ok(PixelFormat::Mono12),
            "mono14" => Ok(PixelFormat::Mono14),
            "mono16" => Ok(PixelFormat::Mono16),
            _ => Err(DaqError::UnsupportedValue {
                kind: "pixel format",
                value: s.to_string(),
            }),
        }
    }
}

/// Acquisition modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Free-running
    Continuous,
    /// One frame per start
    SingleFrame,
    /// A fixed number of frames per start
    MultiFrame,
}

impl AcquisitionMode {
    /// GenICam `AcquisitionMode` entry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionMode::Continuous => "Continuous",
            AcquisitionMode::SingleFrame => "SingleFrame",
            AcquisitionMode::MultiFrame => "MultiFrame",
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionMode {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continuous" => Ok(AcquisitionMode::Continuous),
            "singleframe" | "single_frame" => Ok(AcquisitionMode::SingleFrame),
            "multiframe" | "multi_frame" => Ok(AcquisitionMode::MultiFrame),
            _ => Err(DaqError::UnsupportedValue {
                kind: "acquisition mode",
                value: s.to_string(),
            }),
        }
    }
}

/// One open camera: frame stream, focus lens and property access.
pub struct CameraSession {
    device: Arc<dyn FeatureAccess>,
    stream: FrameStream,
    lens: LensFocus,
    buffer_count: usize,
    acquiring: bool,
    closed: bool,
}

impl CameraSession {
    /// Open a session on a connected camera and apply the configured camera
    /// properties.
    pub fn open<D>(camera: Arc<D>, settings: &Settings) -> DaqResult<Self>
    where
        D: FeatureAccess + BufferQueue + 'static,
    {
        settings.validate()?;

        let device: Arc<dyn FeatureAccess> = camera.clone();
        let queue: Arc<dyn BufferQueue> = camera;

        let channel = RegisterFileChannel::new(device.clone(), settings.poll_policy());
        let session = Self {
            stream: FrameStream::new(queue, settings.stream.frame_timeout),
            lens: LensFocus::new(channel, settings.lens.serial_selector.clone()),
            device,
            buffer_count: settings.stream.buffer_count,
            acquiring: false,
            closed: false,
        };

        session.apply_camera_settings(&settings.camera)?;
        info!(buffer_count = session.buffer_count, "Camera session open");
        Ok(session)
    }

    fn apply_camera_settings(&self, camera: &CameraSettings) -> DaqResult<()> {
        if let Some(format) = &camera.pixel_format {
            self.set_pixel_format(format.parse()?)?;
        }
        if let Some(mode) = &camera.acquisition_mode {
            self.set_acquisition_mode(mode.parse()?)?;
        }
        if let Some(binning) = camera.binning {
            self.set_binning(binning)?;
        }
        if let Some(gain) = camera.gain {
            self.set_gain(gain)?;
        }
        if let Some(auto) = camera.auto_exposure {
            self.set_auto_exposure(auto)?;
        }
        if let Some(exposure) = camera.exposure_time_us {
            self.set_exposure_time(exposure)?;
        }
        if let Some(rate) = camera.frame_rate {
            self.set_frame_rate(rate)?;
        }
        Ok(())
    }

    /// Device feature interface, for properties this type does not wrap.
    #[must_use]
    pub fn device(&self) -> &dyn FeatureAccess {
        self.device.as_ref()
    }

    /// Whether acquisition is running.
    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    /// Whether [`CameraSession::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> DaqResult<()> {
        if self.closed {
            return Err(DaqError::InvalidState("camera session is closed".into()));
        }
        Ok(())
    }

    /// Frames currently on loan.
    #[must_use]
    pub fn outstanding_loans(&self) -> usize {
        self.stream.outstanding_loans()
    }

    // --- properties ----------------------------------------------------------

    /// Set the pixel format.
    pub fn set_pixel_format(&self, format: PixelFormat) -> DaqResult<()> {
        self.ensure_open()?;
        debug!(%format, "Setting pixel format");
        self.device.set_feature("PixelFormat", format.as_str())
    }

    /// Set the acquisition mode.
    pub fn set_acquisition_mode(&self, mode: AcquisitionMode) -> DaqResult<()> {
        self.ensure_open()?;
        debug!(%mode, "Setting acquisition mode");
        self.device.set_feature("AcquisitionMode", mode.as_str())
    }

    /// Set horizontal and vertical binning.
    pub fn set_binning(&self, factor: i64) -> DaqResult<()> {
        self.ensure_open()?;
        if factor < 1 {
            return Err(DaqError::UnsupportedValue {
                kind: "binning factor",
                value: factor.to_string(),
            });
        }
        debug!(factor, "Setting binning");
        self.device.set_feature("BinningHorizontal", factor)?;
        self.device.set_feature("BinningVertical", factor)
    }

    /// Set analog gain.
    pub fn set_gain(&self, gain: f64) -> DaqResult<()> {
        self.ensure_open()?;
        debug!(gain, "Setting gain");
        self.device.set_feature("Gain", gain)
    }

    /// Switch continuous auto exposure on or off.
    pub fn set_auto_exposure(&self, enable: bool) -> DaqResult<()> {
        self.ensure_open()?;
        let mode = if enable { "Continuous" } else { "Off" };
        debug!(mode, "Setting auto exposure");
        self.device.set_feature("ExposureAuto", mode)
    }

    /// Set exposure time in microseconds.
    pub fn set_exposure_time(&self, exposure_us: f64) -> DaqResult<()> {
        self.ensure_open()?;
        debug!(exposure_us, "Setting exposure time");
        self.device.set_feature("ExposureTime", exposure_us)
    }

    /// Set acquisition frame rate in Hz.
    pub fn set_frame_rate(&self, rate_hz: f64) -> DaqResult<()> {
        self.ensure_open()?;
        debug!(rate_hz, "Setting frame rate");
        self.device.set_feature("AcquisitionFrameRate", rate_hz)
    }

    // --- lens ----------------------------------------------------------------

    /// Switch the lens supply on or off.
    ///
    /// Uses the `V3_3Enable` node where the camera has one, otherwise drives
    /// Line2 from UserOutput1.
    pub fn enable_lens_power(&self, enable: bool) -> DaqResult<()> {
        self.ensure_open()?;
        if self.device.has_feature("V3_3Enable") {
            debug!(enable, "Switching lens power through V3_3Enable");
            return self.device.set_feature("V3_3Enable", enable);
        }

        debug!(enable, "Switching lens power through Line2");
        self.device.set_feature("LineSelector", "Line2")?;
        self.device.set_feature("LineMode", "Output")?;
        self.device.set_feature("LineSource", "UserOutput1")?;
        self.device.set_feature("UserOutputValue", enable)
    }

    /// Send a focus setpoint to the lens. See [`FocusCommand::encode`] for clamping.
    pub fn set_lens_focus(&mut self, voltage: f64) -> DaqResult<FocusCommand> {
        self.ensure_open()?;
        self.lens.set_focus(voltage)
    }

    // --- acquisition ---------------------------------------------------------

    /// Allocate and queue the frame pool, then start the camera.
    #[instrument(skip(self), fields(buffer_count = self.buffer_count))]
    pub fn start_acquisition(&mut self) -> DaqResult<()> {
        self.ensure_open()?;
        if self.acquiring {
            return Err(DaqError::InvalidState("acquisition already running".into()));
        }
        if self.stream.outstanding_loans() > 0 {
            return Err(DaqError::OutstandingLoans(self.stream.outstanding_loans()));
        }
        // Pool from a previous run.
        self.stream.teardown()?;

        let payload = self.device.feature::<i64>("PayloadSize")?;
        let payload = usize::try_from(payload)
            .map_err(|_| DaqError::ProtocolError(format!("invalid PayloadSize {payload}")))?;

        self.stream.start(self.buffer_count, payload)?;
        if let Err(e) = self.device.execute("AcquisitionStart") {
            if let Err(teardown) = self.stream.teardown() {
                warn!(error = %teardown, "Failed to free frame pool after start failure");
            }
            return Err(e);
        }

        self.acquiring = true;
        info!(payload, "Acquisition started");
        Ok(())
    }

    /// Stop the camera. Frames on loan stay valid until released.
    pub fn stop_acquisition(&mut self) -> DaqResult<()> {
        if !self.acquiring {
            return Ok(());
        }
        // `acquiring` stays set until the camera acknowledges the stop.
        self.device.execute("AcquisitionStop")?;
        self.acquiring = false;
        self.stream.stop();
        info!("Acquisition stopped");
        Ok(())
    }

    /// See [`FrameStream::borrow_oldest`].
    pub fn borrow_oldest(&mut self) -> DaqResult<FrameBuffer> {
        self.ensure_open()?;
        self.stream.borrow_oldest()
    }

    /// See [`FrameStream::borrow_newest`].
    pub fn borrow_newest(&mut self) -> DaqResult<FrameBuffer> {
        self.ensure_open()?;
        self.stream.borrow_newest()
    }

    /// See [`FrameStream::borrow_next_new`].
    pub fn borrow_next_new(&mut self) -> DaqResult<FrameBuffer> {
        self.ensure_open()?;
        self.stream.borrow_next_new()
    }

    /// See [`FrameStream::release_frame`].
    pub fn release_frame(&mut self, frame: FrameBuffer) -> DaqResult<()> {
        self.stream.release_frame(frame)
    }

    // --- teardown ------------------------------------------------------------

    /// Stop acquisition, close the lens channel and free the frame pool.
    ///
    /// Every step runs even if an earlier one fails. After the first call the
    /// session refuses further work; calling `close` again retries whatever did
    /// not complete and is a no-op once everything has.
    pub fn close(&mut self) -> DaqResult<()> {
        let first = !self.closed;
        self.closed = true;

        let mut errors = Vec::new();
        if let Err(e) = self.stop_acquisition() {
            errors.push(e);
        }
        if let Err(e) = self.lens.close() {
            errors.push(e);
        }
        if let Err(e) = self.stream.teardown() {
            errors.push(e);
        }

        if errors.is_empty() {
            if first {
                info!("Camera session closed");
            }
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "Camera session did not shut down cleanly");
        }
    }
}
