//! Register-mapped file access channel.
//!
//! GenICam devices expose small "virtual files" through a handful of control
//! features: a file selector, an open mode, an operation selector with an execute
//! command, a status/result pair, and a fixed-capacity byte register
//! (`FileAccessBuffer`) that carries the payload. Cameras with a serial port use
//! the same mechanism to tunnel bytes onto their serial line (`SerialPort0`).
//!
//! [`RegisterFileChannel`] turns that register dance into an ordinary
//! open/write/read/close channel:
//!
//! ```text
//! Closed --open--> Open --(write | read)*--> Open --close--> Closed
//! ```
//!
//! Every operation is executed and then polled until the device status leaves
//! `Busy`. The poll is bounded by a [`PollPolicy`]; exceeding it yields
//! [`DaqError::OperationTimeout`], which is distinct from a terminal `Failure`
//! status ([`DaqError::OperationFailed`]).
//!
//! Payloads larger than the register are rejected with
//! [`DaqError::CapacityExceeded`] before anything touches the device. There is
//! no chunking.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vision_daq::hardware::file_access::{FileOpenMode, PollPolicy, RegisterFileChannel};
//! use vision_daq::hardware::mock::MockCamera;
//!
//! # fn main() -> vision_daq::error::DaqResult<()> {
//! let camera = Arc::new(MockCamera::new(64, 48));
//! let mut channel = RegisterFileChannel::new(camera, PollPolicy::default());
//!
//! channel.open("UserFile1", FileOpenMode::Write)?;
//! let accepted = channel.write(b"hello how are you")?;
//! assert_eq!(accepted, 17);
//! channel.close()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{DaqError, DaqResult};
use crate::hardware::capabilities::{FeatureAccess, FeatureAccessExt};

/// Feature names of the GenICam file access control category.
pub mod features {
    /// Selects the file the next operation applies to.
    pub const FILE_SELECTOR: &str = "FileSelector";
    /// Access mode used by the Open operation.
    pub const FILE_OPEN_MODE: &str = "FileOpenMode";
    /// Selects the operation run by `FileOperationExecute`.
    pub const FILE_OPERATION_SELECTOR: &str = "FileOperationSelector";
    /// Runs the selected operation.
    pub const FILE_OPERATION_EXECUTE: &str = "FileOperationExecute";
    /// Status of the last operation.
    pub const FILE_OPERATION_STATUS: &str = "FileOperationStatus";
    /// Byte count produced by the last read/write.
    pub const FILE_OPERATION_RESULT: &str = "FileOperationResult";
    /// Byte offset into the file for the next read/write.
    pub const FILE_ACCESS_OFFSET: &str = "FileAccessOffset";
    /// Byte count for the next read/write.
    pub const FILE_ACCESS_LENGTH: &str = "FileAccessLength";
    /// Payload register.
    pub const FILE_ACCESS_BUFFER: &str = "FileAccessBuffer";
}

use features::*;

/// Access mode of an opened file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpenMode {
    /// Open for reading.
    Read,
    /// Open for writing.
    Write,
}

impl FileOpenMode {
    /// Device string for this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FileOpenMode::Read => "Read",
            FileOpenMode::Write => "Write",
        }
    }
}

impl fmt::Display for FileOpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations selectable through `FileOperationSelector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    /// Open the selected file.
    Open,
    /// Close the open file.
    Close,
    /// Read from the open file into the buffer register.
    Read,
    /// Write the buffer register into the open file.
    Write,
    /// Delete the selected file.
    Delete,
}

impl FileOperation {
    /// Device string for this operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperation::Open => "Open",
            FileOperation::Close => "Close",
            FileOperation::Read => "Read",
            FileOperation::Write => "Write",
            FileOperation::Delete => "Delete",
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the most recent file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperationStatus {
    /// No operation issued yet on this channel.
    Idle,
    /// The device is still processing.
    Busy,
    /// The operation completed.
    Success,
    /// The operation failed, or the device reported an unknown status.
    Failure,
}

impl FileOperationStatus {
    /// Parse a device status string. Anything other than "Busy" or "Success"
    /// counts as failure.
    #[must_use]
    pub fn from_device(raw: &str) -> Self {
        match raw {
            "Busy" => FileOperationStatus::Busy,
            "Success" => FileOperationStatus::Success,
            _ => FileOperationStatus::Failure,
        }
    }
}

/// Bounds of the status poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between two status reads.
    pub interval: Duration,
    /// Give up once this much time has passed with the status still `Busy`.
    pub max_wait: Duration,
}

impl PollPolicy {
    /// Create a poll policy.
    #[must_use]
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
struct OpenFile {
    selector: String,
    mode: FileOpenMode,
    capacity: usize,
}

/// Byte channel over a register-mapped device file.
///
/// The channel owns no device state besides what it tracks locally: which file
/// is open, in which mode, the register capacity queried at open time, and the
/// status of the last operation. Dropping an open channel closes it on a
/// best-effort basis.
///
/// An Open (or Close) that times out may still complete on the device. The
/// file is then remembered as possibly open: the next `open`, `delete` or
/// `close` waits for the device and issues a Close first.
pub struct RegisterFileChannel {
    device: Arc<dyn FeatureAccess>,
    poll: PollPolicy,
    open_file: Option<OpenFile>,
    unconfirmed: Option<String>,
    last_status: FileOperationStatus,
    last_operation: Option<FileOperation>,
}

impl RegisterFileChannel {
    /// Create a closed channel on `device`.
    pub fn new(device: Arc<dyn FeatureAccess>, poll: PollPolicy) -> Self {
        Self {
            device,
            poll,
            open_file: None,
            unconfirmed: None,
            last_status: FileOperationStatus::Idle,
            last_operation: None,
        }
    }

    /// Whether a file is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open_file.is_some()
    }

    /// Selector of a file the device may still hold open after an
    /// operation that did not complete in time.
    #[must_use]
    pub fn unconfirmed_file(&self) -> Option<&str> {
        self.unconfirmed.as_deref()
    }

    /// Selector of the open file.
    #[must_use]
    pub fn selector(&self) -> Option<&str> {
        self.open_file.as_ref().map(|f| f.selector.as_str())
    }

    /// Mode of the open file.
    #[must_use]
    pub fn mode(&self) -> Option<FileOpenMode> {
        self.open_file.as_ref().map(|f| f.mode)
    }

    /// Register capacity in bytes, known once a file is open.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.open_file.as_ref().map(|f| f.capacity)
    }

    /// Status of the last operation issued through this channel.
    #[must_use]
    pub fn last_status(&self) -> FileOperationStatus {
        self.last_status
    }

    /// Poll bounds in use.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Select `selector`, set its open mode and open it.
    ///
    /// # Errors
    /// - `InvalidState` if a file is already open on this channel
    /// - `ProtocolError` if the device has no `FileAccessBuffer` register
    /// - `OperationTimeout` / `OperationFailed` from the status poll
    pub fn open(&mut self, selector: &str, mode: FileOpenMode) -> DaqResult<()> {
        if let Some(open) = &self.open_file {
            return Err(DaqError::InvalidState(format!(
                "file '{}' is already open on this channel",
                open.selector
            )));
        }
        if !self.device.has_feature(FILE_ACCESS_BUFFER) {
            return Err(DaqError::ProtocolError(format!(
                "register node {FILE_ACCESS_BUFFER} not found"
            )));
        }

        self.settle_unconfirmed()?;
        self.ensure_not_busy()?;

        debug!(selector, mode = %mode, "Opening register file");
        self.device.set_feature(FILE_SELECTOR, selector)?;
        self.device.set_feature(FILE_OPEN_MODE, mode.as_str())?;
        if let Err(e) = self.run(FileOperation::Open) {
            // A reported failure means the device did not open the file.
            if !matches!(e, DaqError::OperationFailed { .. }) {
                self.unconfirmed = Some(selector.to_string());
            }
            return Err(e);
        }

        let capacity = match self.register_capacity() {
            Ok(capacity) => capacity,
            Err(e) => {
                self.unconfirmed = Some(selector.to_string());
                return Err(e);
            }
        };
        debug!(selector, capacity, "Register file open");

        self.open_file = Some(OpenFile {
            selector: selector.to_string(),
            mode,
            capacity,
        });
        Ok(())
    }

    /// Write `data` to the open file.
    ///
    /// Returns the byte count the device reports as accepted. This is the
    /// authoritative figure; compare it against `data.len()` to detect a
    /// partial write.
    ///
    /// # Errors
    /// - `InvalidState` if no file is open, or it was opened for reading
    /// - `CapacityExceeded` if `data` does not fit the register (nothing is
    ///   written to the device in that case)
    /// - `OperationTimeout` / `OperationFailed` from the status poll
    pub fn write(&mut self, data: &[u8]) -> DaqResult<usize> {
        let capacity = self.require_open(FileOpenMode::Write)?;
        if data.len() > capacity {
            return Err(DaqError::CapacityExceeded {
                requested: data.len(),
                capacity,
            });
        }
        self.ensure_not_busy()?;

        trace!(len = data.len(), "Writing register file");
        self.device.set_feature(FILE_ACCESS_OFFSET, 0_i64)?;
        self.device
            .set_feature(FILE_ACCESS_LENGTH, byte_count(data.len())?)?;
        // Some cameras require the operation to be selected before the buffer is filled.
        self.device
            .set_feature(FILE_OPERATION_SELECTOR, FileOperation::Write.as_str())?;
        self.store_payload(data)?;
        self.device.execute(FILE_OPERATION_EXECUTE)?;
        self.wait_for_completion(FileOperation::Write)?;

        let accepted = usize::try_from(self.operation_result()?).map_err(|_| {
            DaqError::ProtocolError("negative byte count reported for write".into())
        })?;
        if accepted != data.len() {
            warn!(
                requested = data.len(),
                accepted, "Partial write to register file"
            );
        }
        Ok(accepted)
    }

    /// Read up to `max_len` bytes from the open file.
    ///
    /// The requested length is clamped to the register capacity. A device result
    /// of zero or less means "no data" and yields an empty vector.
    ///
    /// # Errors
    /// - `InvalidState` if no file is open, or it was opened for writing
    /// - `OperationTimeout` / `OperationFailed` from the status poll
    pub fn read(&mut self, max_len: usize) -> DaqResult<Vec<u8>> {
        let capacity = self.require_open(FileOpenMode::Read)?;
        let requested = max_len.min(capacity);
        if requested == 0 {
            return Ok(Vec::new());
        }
        self.ensure_not_busy()?;

        trace!(requested, "Reading register file");
        self.device.set_feature(FILE_ACCESS_OFFSET, 0_i64)?;
        self.device
            .set_feature(FILE_ACCESS_LENGTH, byte_count(requested)?)?;
        self.run(FileOperation::Read)?;

        let result = self.operation_result()?;
        if result <= 0 {
            debug!(result, "Register file read returned no data");
            return Ok(Vec::new());
        }

        // The register node only reads back whole.
        let mut register = vec![0u8; capacity];
        self.device.read_register(FILE_ACCESS_BUFFER, &mut register)?;

        let available = usize::try_from(result).unwrap_or(usize::MAX);
        register.truncate(available.min(requested));
        Ok(register)
    }

    /// Close the open file.
    ///
    /// Closing a closed channel is a no-op. The channel is considered closed
    /// afterwards even if the device reports an error, so cleanup after a failed
    /// read or write always goes through.
    ///
    /// A file left possibly open by a timed-out operation is closed as well.
    /// If the device is still busy the error is returned and the file stays
    /// remembered, so a later `close` retries.
    pub fn close(&mut self) -> DaqResult<()> {
        let selector = match (self.open_file.take(), self.unconfirmed.take()) {
            (Some(open), _) => open.selector,
            (None, Some(selector)) => selector,
            (None, None) => {
                trace!("Register file channel already closed");
                return Ok(());
            }
        };

        if let Err(e) = self.ensure_not_busy() {
            warn!(%selector, error = %e, "Device busy, register file close deferred");
            self.unconfirmed = Some(selector);
            return Err(e);
        }

        debug!(%selector, "Closing register file");
        let result = self
            .device
            .set_feature(FILE_SELECTOR, selector.as_str())
            .and_then(|()| self.run(FileOperation::Close));
        match result {
            Err(e) if !matches!(e, DaqError::OperationFailed { .. }) => {
                self.unconfirmed = Some(selector);
                Err(e)
            }
            other => other,
        }
    }

    /// Delete the file named `selector`. The channel must be closed.
    pub fn delete(&mut self, selector: &str) -> DaqResult<()> {
        if let Some(open) = &self.open_file {
            return Err(DaqError::InvalidState(format!(
                "cannot delete '{selector}' while '{}' is open",
                open.selector
            )));
        }

        self.settle_unconfirmed()?;
        self.ensure_not_busy()?;

        debug!(selector, "Deleting register file");
        self.device.set_feature(FILE_SELECTOR, selector)?;
        self.run(FileOperation::Delete)
    }

    fn require_open(&self, mode: FileOpenMode) -> DaqResult<usize> {
        match &self.open_file {
            None => Err(DaqError::InvalidState(
                "register file channel is closed".into(),
            )),
            Some(open) if open.mode != mode => Err(DaqError::InvalidState(format!(
                "file '{}' is open for {}, not {}",
                open.selector, open.mode, mode
            ))),
            Some(open) => Ok(open.capacity),
        }
    }

    fn run(&mut self, operation: FileOperation) -> DaqResult<()> {
        self.device
            .set_feature(FILE_OPERATION_SELECTOR, operation.as_str())?;
        self.device.execute(FILE_OPERATION_EXECUTE)?;
        self.wait_for_completion(operation)
    }

    fn store_payload(&self, data: &[u8]) -> DaqResult<()> {
        match self.device.register_address(FILE_ACCESS_BUFFER) {
            Ok(address) => {
                trace!(address = format_args!("{address:#X}"), "Direct register write");
                self.device.write_memory(address, data)
            }
            Err(e) => {
                warn!(error = %e, "Register address unavailable, writing through node");
                self.device.write_register(FILE_ACCESS_BUFFER, data)
            }
        }
    }

    fn register_capacity(&self) -> DaqResult<usize> {
        usize::try_from(self.device.register_length(FILE_ACCESS_BUFFER)?)
            .map_err(|_| DaqError::ProtocolError("register length overflows usize".into()))
    }

    /// Close a file an earlier timed-out operation may have left open.
    ///
    /// A `Failure` from that Close only means the file was never opened.
    fn settle_unconfirmed(&mut self) -> DaqResult<()> {
        let Some(selector) = self.unconfirmed.clone() else {
            return Ok(());
        };
        debug!(%selector, "Closing file left open by an unfinished operation");
        match self.close() {
            Ok(()) => Ok(()),
            Err(DaqError::OperationFailed { status, .. }) => {
                debug!(%selector, %status, "No file was left open");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn operation_result(&self) -> DaqResult<i64> {
        self.device.feature::<i64>(FILE_OPERATION_RESULT)
    }

    /// An earlier poll gave up while the device was still busy; let it finish
    /// before issuing anything new.
    fn ensure_not_busy(&mut self) -> DaqResult<()> {
        if self.last_status != FileOperationStatus::Busy {
            return Ok(());
        }
        let pending = self.last_operation.unwrap_or(FileOperation::Write);
        match self.wait_for_completion(pending) {
            Ok(()) => Ok(()),
            Err(DaqError::OperationFailed { operation, status }) => {
                warn!(%operation, %status, "Stale file operation finished unsuccessfully");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn wait_for_completion(&mut self, operation: FileOperation) -> DaqResult<()> {
        self.last_operation = Some(operation);
        let started = Instant::now();
        let mut polls = 0_u32;

        loop {
            let raw = self.device.feature::<String>(FILE_OPERATION_STATUS)?;
            polls += 1;
            let status = FileOperationStatus::from_device(&raw);
            self.last_status = status;

            match status {
                FileOperationStatus::Busy => {
                    let waited = started.elapsed();
                    if waited >= self.poll.max_wait {
                        warn!(%operation, polls, ?waited, "File operation still busy, giving up");
                        return Err(DaqError::OperationTimeout {
                            operation: operation.to_string(),
                            waited,
                        });
                    }
                    thread::sleep(self.poll.interval);
                }
                FileOperationStatus::Success => {
                    trace!(%operation, polls, "File operation succeeded");
                    return Ok(());
                }
                FileOperationStatus::Failure | FileOperationStatus::Idle => {
                    warn!(%operation, status = %raw, "File operation failed");
                    return Err(DaqError::OperationFailed {
                        operation: operation.to_string(),
                        status: raw,
                    });
                }
            }
        }
    }
}

impl Drop for RegisterFileChannel {
    fn drop(&mut self) {
        if self.open_file.is_some() || self.unconfirmed.is_some() {
            if let Err(e) = self.close() {
                warn!(error = %e, "Error closing register file on drop");
            }
        }
    }
}

fn byte_count(len: usize) -> DaqResult<i64> {
    i64::try_from(len).map_err(|_| DaqError::CapacityExceeded {
        requested: len,
        capacity: i64::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCamera;

    fn fast_poll() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), Duration::from_millis(50))
    }

    fn channel_on(camera: &Arc<MockCamera>) -> RegisterFileChannel {
        RegisterFileChannel::new(camera.clone(), fast_poll())
    }

    #[test]
    fn write_then_read_back() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);

        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        assert_eq!(channel.write(b"hello how are you").unwrap(), 17);
        channel.close().unwrap();

        channel.open("UserFile1", FileOpenMode::Read).unwrap();
        let data = channel.read(17).unwrap();
        channel.close().unwrap();

        assert_eq!(data, b"hello how are you");
    }

    #[test]
    fn read_is_capped_by_caller_length() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.put_file("UserFile1", b"0123456789");
        let mut channel = channel_on(&camera);

        channel.open("UserFile1", FileOpenMode::Read).unwrap();
        assert_eq!(channel.read(4).unwrap(), b"0123");
    }

    #[test]
    fn oversize_write_touches_nothing() {
        let camera = Arc::new(MockCamera::new(16, 16).with_file_capacity(8));
        let mut channel = channel_on(&camera);
        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        let commands_before = camera.executed_commands().len();

        let err = channel.write(&[0xAA; 9]).unwrap_err();

        assert!(matches!(
            err,
            DaqError::CapacityExceeded {
                requested: 9,
                capacity: 8
            }
        ));
        assert_eq!(camera.memory_writes(), 0);
        assert_eq!(camera.executed_commands().len(), commands_before);
        assert!(channel.is_open());
    }

    #[test]
    fn io_on_closed_channel_fails_fast() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);

        assert!(matches!(
            channel.write(b"x"),
            Err(DaqError::InvalidState(_))
        ));
        assert!(matches!(channel.read(1), Err(DaqError::InvalidState(_))));
        assert!(camera.executed_commands().is_empty());
    }

    #[test]
    fn mode_mismatch_is_rejected() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);
        channel.open("UserFile1", FileOpenMode::Read).unwrap();
        assert!(matches!(
            channel.write(b"x"),
            Err(DaqError::InvalidState(_))
        ));
    }

    #[test]
    fn double_open_is_rejected() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);
        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        assert!(matches!(
            channel.open("UserFile2", FileOpenMode::Write),
            Err(DaqError::InvalidState(_))
        ));
        assert_eq!(channel.selector(), Some("UserFile1"));
    }

    #[test]
    fn stuck_busy_times_out() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.set_stuck_busy(true);
        let mut channel = channel_on(&camera);

        let started = Instant::now();
        let err = channel.open("UserFile1", FileOpenMode::Write).unwrap_err();

        assert!(matches!(err, DaqError::OperationTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(channel.last_status(), FileOperationStatus::Busy);
        assert!(!channel.is_open());
    }

    #[test]
    fn failure_status_is_not_a_timeout() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.fail_next_operation();
        let mut channel = channel_on(&camera);

        let err = channel.open("UserFile1", FileOpenMode::Write).unwrap_err();
        match err {
            DaqError::OperationFailed { operation, status } => {
                assert_eq!(operation, "Open");
                assert_eq!(status, "Failure");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_status_counts_as_failure() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.force_status(Some("Overheated"));
        let mut channel = channel_on(&camera);

        let err = channel.open("UserFile1", FileOpenMode::Write).unwrap_err();
        assert!(matches!(err, DaqError::OperationFailed { ref status, .. } if status == "Overheated"));
        assert_eq!(channel.last_status(), FileOperationStatus::Failure);
    }

    #[test]
    fn busy_polls_then_success() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.set_busy_polls(3);
        let mut channel = channel_on(&camera);

        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        assert_eq!(channel.last_status(), FileOperationStatus::Success);
    }

    #[test]
    fn close_is_idempotent_and_survives_failed_write() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);
        channel.open("UserFile1", FileOpenMode::Write).unwrap();

        camera.fail_next_operation();
        assert!(channel.write(b"abc").is_err());

        channel.close().unwrap();
        assert!(!channel.is_open());
        channel.close().unwrap();
        assert!(!camera.has_open_file());
    }

    #[test]
    fn empty_file_reads_as_no_data() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);
        channel.open("UserFile2", FileOpenMode::Read).unwrap();
        assert!(channel.read(16).unwrap().is_empty());
    }

    #[test]
    fn short_write_reports_accepted_count() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.set_write_limit(Some(3));
        let mut channel = channel_on(&camera);
        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        assert_eq!(channel.write(b"abcdef").unwrap(), 3);
    }

    #[test]
    fn falls_back_to_node_write_without_address() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.set_register_address_available(false);
        let mut channel = channel_on(&camera);

        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        assert_eq!(channel.write(b"abc").unwrap(), 3);
        channel.close().unwrap();

        assert_eq!(camera.memory_writes(), 0);
        assert_eq!(camera.file_contents("UserFile1").unwrap(), b"abc");
    }

    #[test]
    fn delete_requires_closed_channel() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.put_file("UserFile1", b"stale");
        let mut channel = channel_on(&camera);

        channel.open("UserFile2", FileOpenMode::Write).unwrap();
        assert!(matches!(
            channel.delete("UserFile1"),
            Err(DaqError::InvalidState(_))
        ));
        channel.close().unwrap();

        channel.delete("UserFile1").unwrap();
        assert!(camera.file_contents("UserFile1").is_none());
    }

    #[test]
    fn missing_buffer_register_is_protocol_error() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.remove_feature(FILE_ACCESS_BUFFER);
        let mut channel = channel_on(&camera);
        assert!(matches!(
            channel.open("UserFile1", FileOpenMode::Write),
            Err(DaqError::ProtocolError(_))
        ));
    }

    #[test]
    fn timed_out_open_is_closed_on_close() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);

        camera.set_stuck_busy(true);
        let err = channel.open("UserFile1", FileOpenMode::Write).unwrap_err();
        assert!(matches!(err, DaqError::OperationTimeout { ref operation, .. } if operation == "Open"));
        assert!(!channel.is_open());
        assert_eq!(channel.unconfirmed_file(), Some("UserFile1"));
        assert!(camera.has_open_file());

        camera.set_stuck_busy(false);
        channel.close().unwrap();
        assert!(!camera.has_open_file());
        assert_eq!(channel.unconfirmed_file(), None);

        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        assert_eq!(channel.write(b"abc").unwrap(), 3);
    }

    #[test]
    fn timed_out_open_is_settled_by_next_open() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);

        camera.set_stuck_busy(true);
        assert!(channel.open("UserFile1", FileOpenMode::Write).is_err());
        camera.set_stuck_busy(false);

        channel.open("UserFile1", FileOpenMode::Write).unwrap();
        assert!(channel.is_open());
        assert_eq!(channel.unconfirmed_file(), None);
    }

    #[test]
    fn failed_open_is_not_remembered() {
        let camera = Arc::new(MockCamera::new(16, 16));
        camera.fail_next_operation();
        let mut channel = channel_on(&camera);

        assert!(channel.open("UserFile1", FileOpenMode::Write).is_err());
        assert_eq!(channel.unconfirmed_file(), None);
        let commands_before = camera.executed_commands().len();
        channel.close().unwrap();
        assert_eq!(camera.executed_commands().len(), commands_before);
    }

    #[test]
    fn close_waits_while_device_busy() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let mut channel = channel_on(&camera);
        channel.open("UserFile1", FileOpenMode::Write).unwrap();

        camera.set_stuck_busy(true);
        assert!(matches!(
            channel.write(b"abc"),
            Err(DaqError::OperationTimeout { .. })
        ));
        let commands_before = camera.executed_commands().len();

        // Still busy: nothing new is issued and the close is retried later.
        assert!(matches!(
            channel.close(),
            Err(DaqError::OperationTimeout { .. })
        ));
        assert_eq!(camera.executed_commands().len(), commands_before);
        assert!(!channel.is_open());
        assert!(camera.has_open_file());

        camera.set_stuck_busy(false);
        channel.close().unwrap();
        assert!(!camera.has_open_file());
    }

    #[test]
    fn drop_closes_open_file() {
        let camera = Arc::new(MockCamera::new(16, 16));
        {
            let mut channel = channel_on(&camera);
            channel.open("UserFile1", FileOpenMode::Write).unwrap();
            assert!(camera.has_open_file());
        }
        assert!(!camera.has_open_file());
    }
}
