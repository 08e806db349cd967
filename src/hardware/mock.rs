//! Mock Hardware Implementations
//!
//! Provides a simulated camera for testing without physical hardware.
//!
//! [`MockCamera`] implements both device-facing interfaces:
//!
//! - [`FeatureAccess`]: a typed feature map with the usual acquisition and
//!   analog-control nodes, lens power and line routing nodes, and the complete
//!   file-access category backed by a state machine. User files (`UserFile*`)
//!   are stored in memory; files named `SerialPort*` capture every write as one
//!   serial packet.
//! - [`BufferQueue`]: driver input/output queues. Test code plays the role of
//!   the hardware by calling [`MockCamera::deliver_frame`].
//!
//! Failure injection covers the cases real cameras produce: operations that stay
//! `Busy` for a few polls or forever, terminal `Failure`, garbage status strings,
//! short writes, a missing register address, and a pulled cable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{DaqError, DaqResult};
use crate::hardware::capabilities::{
    BufferHandle, BufferInfo, BufferQueue, BufferStatus, FeatureAccess,
};
use crate::hardware::file_access::features::*;

/// Physical address the mock reports for `FileAccessBuffer`.
pub const FILE_BUFFER_ADDRESS: u64 = 0x0002_0000;

/// Default `FileAccessBuffer` size in bytes.
pub const DEFAULT_FILE_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Command,
    Register,
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::Str(_) => "string",
            Node::Bool(_) => "boolean",
            Node::Int(_) => "integer",
            Node::Float(_) => "float",
            Node::Command => "command",
            Node::Register => "register",
        }
    }
}

fn type_mismatch(name: &str, node: &Node, wanted: &str) -> DaqError {
    DaqError::ProtocolError(format!(
        "feature '{name}' is a {} node, not {wanted}",
        node.kind()
    ))
}

struct FeatureState {
    nodes: HashMap<String, Node>,
    register: Vec<u8>,
    register_address_available: bool,
    memory_writes: usize,
    files: HashMap<String, Vec<u8>>,
    serial_log: HashMap<String, Vec<Vec<u8>>>,
    open_file: Option<(String, String)>,
    terminal_status: &'static str,
    pending_busy: u32,
    busy_polls: u32,
    stuck_busy: bool,
    fail_next: bool,
    forced_status: Option<String>,
    write_limit: Option<usize>,
    executed: Vec<String>,
}

impl FeatureState {
    fn new(width: u32, height: u32, capacity: usize) -> Self {
        let mut nodes = HashMap::new();
        let mut add = |name: &str, node: Node| {
            nodes.insert(name.to_string(), node);
        };

        add("Width", Node::Int(i64::from(width)));
        add("Height", Node::Int(i64::from(height)));
        add("PayloadSize", Node::Int(0));
        add("PixelFormat", Node::Str("Mono8".into()));
        add("AcquisitionMode", Node::Str("Continuous".into()));
        add("AcquisitionFrameRate", Node::Float(30.0));
        add("AcquisitionStart", Node::Command);
        add("AcquisitionStop", Node::Command);
        add("BinningHorizontal", Node::Int(1));
        add("BinningVertical", Node::Int(1));
        add("Gain", Node::Float(0.0));
        add("ExposureAuto", Node::Str("Off".into()));
        add("ExposureTime", Node::Float(10_000.0));

        add("V3_3Enable", Node::Bool(false));
        add("LineSelector", Node::Str("Line0".into()));
        add("LineMode", Node::Str("Input".into()));
        add("LineSource", Node::Str("Off".into()));
        add("UserOutputValue", Node::Bool(false));

        add(FILE_SELECTOR, Node::Str("UserFile1".into()));
        add(FILE_OPEN_MODE, Node::Str("Read".into()));
        add(FILE_OPERATION_SELECTOR, Node::Str("Open".into()));
        add(FILE_OPERATION_EXECUTE, Node::Command);
        add(FILE_OPERATION_STATUS, Node::Str("Success".into()));
        add(FILE_OPERATION_RESULT, Node::Int(0));
        add(FILE_ACCESS_OFFSET, Node::Int(0));
        add(FILE_ACCESS_LENGTH, Node::Int(0));
        add(FILE_ACCESS_BUFFER, Node::Register);

        Self {
            nodes,
            register: vec![0; capacity],
            register_address_available: true,
            memory_writes: 0,
            files: HashMap::new(),
            serial_log: HashMap::new(),
            open_file: None,
            terminal_status: "Success",
            pending_busy: 0,
            busy_polls: 0,
            stuck_busy: false,
            fail_next: false,
            forced_status: None,
            write_limit: None,
            executed: Vec::new(),
        }
    }

    fn node(&self, name: &str) -> DaqResult<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| DaqError::FeatureNotFound(name.to_string()))
    }

    fn node_mut(&mut self, name: &str) -> DaqResult<&mut Node> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| DaqError::FeatureNotFound(name.to_string()))
    }

    fn string(&self, name: &str) -> DaqResult<String> {
        match self.node(name)? {
            Node::Str(s) => Ok(s.clone()),
            other => Err(type_mismatch(name, other, "string")),
        }
    }

    fn integer(&self, name: &str) -> DaqResult<i64> {
        match self.node(name)? {
            Node::Int(v) => Ok(*v),
            other => Err(type_mismatch(name, other, "integer")),
        }
    }

    fn register_node(&self, name: &str) -> DaqResult<()> {
        match self.node(name)? {
            Node::Register => Ok(()),
            other => Err(type_mismatch(name, other, "register")),
        }
    }

    fn payload_size(&self) -> DaqResult<i64> {
        let bytes_per_pixel = if self.string("PixelFormat")? == "Mono8" { 1 } else { 2 };
        Ok(self.integer("Width")? * self.integer("Height")? * bytes_per_pixel)
    }

    fn next_status(&mut self) -> String {
        if let Some(forced) = &self.forced_status {
            return forced.clone();
        }
        if self.stuck_busy {
            return "Busy".into();
        }
        if self.pending_busy > 0 {
            self.pending_busy -= 1;
            return "Busy".into();
        }
        self.terminal_status.into()
    }

    fn run_file_operation(&mut self) {
        self.pending_busy = self.busy_polls;
        let outcome = if self.fail_next {
            self.fail_next = false;
            Err(DaqError::OperationFailed {
                operation: "injected".into(),
                status: "Failure".into(),
            })
        } else {
            self.file_operation()
        };

        let result = match outcome {
            Ok(result) => {
                self.terminal_status = "Success";
                result
            }
            Err(e) => {
                debug!(error = %e, "Mock file operation failed");
                self.terminal_status = "Failure";
                0
            }
        };
        self.nodes
            .insert(FILE_OPERATION_RESULT.to_string(), Node::Int(result));
    }

    fn file_operation(&mut self) -> DaqResult<i64> {
        let operation = self.string(FILE_OPERATION_SELECTOR)?;
        let selector = self.string(FILE_SELECTOR)?;
        trace!(%operation, %selector, "Mock file operation");

        match operation.as_str() {
            "Open" => {
                if self.open_file.is_some() {
                    return Err(DaqError::InvalidState("a file is already open".into()));
                }
                let mode = self.string(FILE_OPEN_MODE)?;
                self.open_file = Some((selector, mode));
                Ok(0)
            }
            "Close" => {
                self.open_file = None;
                Ok(0)
            }
            "Write" => {
                let file = self.require_open("Write")?;
                let (offset, length) = self.access_window()?;
                let limit = self.write_limit.unwrap_or(length);
                let accepted = length.min(limit).min(self.register.len());
                let bytes = self.register[..accepted].to_vec();

                if file.starts_with("SerialPort") {
                    self.serial_log.entry(file).or_default().push(bytes);
                } else {
                    let content = self.files.entry(file).or_default();
                    content.resize(offset, 0);
                    content.extend_from_slice(&bytes);
                }
                Ok(accepted as i64)
            }
            "Read" => {
                let file = self.require_open("Read")?;
                let (offset, length) = self.access_window()?;
                let content = self.files.get(&file).cloned().unwrap_or_default();
                let available = content.len().saturating_sub(offset);
                let n = length.min(available).min(self.register.len());
                if n > 0 {
                    self.register[..n].copy_from_slice(&content[offset..offset + n]);
                }
                Ok(n as i64)
            }
            "Delete" => {
                self.files.remove(&selector);
                Ok(0)
            }
            other => Err(DaqError::ProtocolError(format!(
                "unknown file operation '{other}'"
            ))),
        }
    }

    fn require_open(&self, mode: &str) -> DaqResult<String> {
        match &self.open_file {
            Some((file, open_mode)) if open_mode == mode => Ok(file.clone()),
            Some((file, open_mode)) => Err(DaqError::InvalidState(format!(
                "'{file}' is open for {open_mode}"
            ))),
            None => Err(DaqError::InvalidState("no file open".into())),
        }
    }

    fn access_window(&self) -> DaqResult<(usize, usize)> {
        let offset = usize::try_from(self.integer(FILE_ACCESS_OFFSET)?)
            .map_err(|_| DaqError::ProtocolError("negative file offset".into()))?;
        let length = usize::try_from(self.integer(FILE_ACCESS_LENGTH)?)
            .map_err(|_| DaqError::ProtocolError("negative file length".into()))?;
        Ok((offset, length))
    }
}

#[derive(Debug)]
struct Slot {
    size: usize,
    data: Bytes,
    status: BufferStatus,
    frame_id: u64,
    width: u32,
    height: u32,
}

#[derive(Default)]
struct QueueState {
    slots: Vec<Slot>,
    input: VecDeque<BufferHandle>,
    output: VecDeque<BufferHandle>,
    acquiring: bool,
    next_frame_id: u64,
    dropped: u64,
    fail_next_info: bool,
    fail_next_free: bool,
}

impl QueueState {
    fn slot(&self, handle: BufferHandle) -> DaqResult<&Slot> {
        self.slots
            .get(handle.index())
            .ok_or_else(|| DaqError::ProtocolError(format!("unknown buffer {handle}")))
    }
}

/// Simulated GenICam camera with driver buffer queues.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use vision_daq::hardware::capabilities::{BufferStatus, FeatureAccessExt};
/// use vision_daq::hardware::frame_stream::FrameStream;
/// use vision_daq::hardware::mock::MockCamera;
///
/// # fn main() -> vision_daq::error::DaqResult<()> {
/// let camera = Arc::new(MockCamera::new(64, 48));
/// let mut stream = FrameStream::new(camera.clone(), Duration::from_millis(100));
/// stream.start(4, 64 * 48)?;
/// camera.execute("AcquisitionStart")?;
///
/// camera.deliver_frame(BufferStatus::Success);
/// let frame = stream.borrow_oldest()?;
/// assert_eq!(frame.width, 64);
/// stream.release_frame(frame)?;
/// # Ok(())
/// # }
/// ```
pub struct MockCamera {
    features: Mutex<FeatureState>,
    queues: Mutex<QueueState>,
    frame_ready: Condvar,
    connected: AtomicBool,
}

impl MockCamera {
    /// Create a mock camera with the given sensor size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            features: Mutex::new(FeatureState::new(width, height, DEFAULT_FILE_CAPACITY)),
            queues: Mutex::new(QueueState {
                next_frame_id: 1,
                ..QueueState::default()
            }),
            frame_ready: Condvar::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Use a `FileAccessBuffer` of `capacity` bytes.
    #[must_use]
    pub fn with_file_capacity(self, capacity: usize) -> Self {
        self.features.lock().register = vec![0; capacity];
        self
    }

    fn check_connected(&self) -> DaqResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DaqError::DeviceUnavailable("mock camera disconnected".into()))
        }
    }

    // --- failure injection -------------------------------------------------

    /// Simulate a pulled cable: every subsequent call fails with `DeviceUnavailable`.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.frame_ready.notify_all();
    }

    /// Undo [`MockCamera::disconnect`].
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Report `Busy` for `polls` status reads after every file operation.
    pub fn set_busy_polls(&self, polls: u32) {
        self.features.lock().busy_polls = polls;
    }

    /// Report `Busy` forever.
    pub fn set_stuck_busy(&self, stuck: bool) {
        self.features.lock().stuck_busy = stuck;
    }

    /// Make the next file operation end in `Failure`.
    pub fn fail_next_operation(&self) {
        self.features.lock().fail_next = true;
    }

    /// Report a fixed status string regardless of outcome.
    pub fn force_status(&self, status: Option<&str>) {
        self.features.lock().forced_status = status.map(str::to_string);
    }

    /// Make the next buffer metadata read fail, as a driver losing track of a
    /// buffer between dequeue and inspection.
    pub fn fail_next_buffer_info(&self) {
        self.queues.lock().fail_next_info = true;
    }

    /// Make the next pool release fail.
    pub fn fail_next_free(&self) {
        self.queues.lock().fail_next_free = true;
    }

    /// Accept at most `limit` bytes per write.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.features.lock().write_limit = limit;
    }

    /// Whether `FileAccessBuffer` reports a physical address.
    pub fn set_register_address_available(&self, available: bool) {
        self.features.lock().register_address_available = available;
    }

    /// Drop a node, as on a camera model that lacks it.
    pub fn remove_feature(&self, name: &str) {
        self.features.lock().nodes.remove(name);
    }

    // --- inspection --------------------------------------------------------

    /// Store a user file.
    pub fn put_file(&self, selector: &str, content: &[u8]) {
        self.features
            .lock()
            .files
            .insert(selector.to_string(), content.to_vec());
    }

    /// Content of a user file.
    #[must_use]
    pub fn file_contents(&self, selector: &str) -> Option<Vec<u8>> {
        self.features.lock().files.get(selector).cloned()
    }

    /// Packets written to a serial port file, oldest first.
    #[must_use]
    pub fn serial_packets(&self, selector: &str) -> Vec<Vec<u8>> {
        self.features
            .lock()
            .serial_log
            .get(selector)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the device side has a file open.
    #[must_use]
    pub fn has_open_file(&self) -> bool {
        self.features.lock().open_file.is_some()
    }

    /// Number of direct memory writes to the buffer register.
    #[must_use]
    pub fn memory_writes(&self) -> usize {
        self.features.lock().memory_writes
    }

    /// Every command executed so far, in order.
    #[must_use]
    pub fn executed_commands(&self) -> Vec<String> {
        self.features.lock().executed.clone()
    }

    /// Buffers waiting in the input queue.
    #[must_use]
    pub fn input_depth(&self) -> usize {
        self.queues.lock().input.len()
    }

    /// Buffers currently allocated.
    #[must_use]
    pub fn allocated_buffers(&self) -> usize {
        self.queues.lock().slots.len()
    }

    /// Frames lost because the input queue was empty.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.queues.lock().dropped
    }

    /// Whether `AcquisitionStart` is in effect.
    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.queues.lock().acquiring
    }

    // --- hardware side -----------------------------------------------------

    /// Fill the head of the input queue and move it to the output queue.
    ///
    /// Returns the frame id, or `None` if acquisition is not running or the input
    /// queue was empty (counted as a dropped frame).
    pub fn deliver_frame(&self, status: BufferStatus) -> Option<u64> {
        let (width, height) = {
            let features = self.features.lock();
            let dim = |name: &str| {
                features
                    .integer(name)
                    .ok()
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(0)
            };
            (dim("Width"), dim("Height"))
        };

        let mut queues = self.queues.lock();
        if !queues.acquiring {
            return None;
        }
        let Some(handle) = queues.input.pop_front() else {
            queues.dropped += 1;
            debug!(dropped = queues.dropped, "Mock frame dropped, input queue empty");
            return None;
        };

        let frame_id = queues.next_frame_id;
        queues.next_frame_id += 1;
        let slot = &mut queues.slots[handle.index()];
        slot.data = Bytes::from(vec![frame_id.to_le_bytes()[0]; slot.size]);
        slot.status = status;
        slot.frame_id = frame_id;
        slot.width = width;
        slot.height = height;
        queues.output.push_back(handle);
        drop(queues);

        self.frame_ready.notify_all();
        trace!(%handle, frame_id, %status, "Mock frame delivered");
        Some(frame_id)
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl FeatureAccess for MockCamera {
    fn has_feature(&self, name: &str) -> bool {
        self.features.lock().nodes.contains_key(name)
    }

    fn string_value(&self, name: &str) -> DaqResult<String> {
        self.check_connected()?;
        let mut features = self.features.lock();
        if name == FILE_OPERATION_STATUS {
            features.node(name)?;
            return Ok(features.next_status());
        }
        features.string(name)
    }

    fn set_string_value(&self, name: &str, value: &str) -> DaqResult<()> {
        self.check_connected()?;
        match self.features.lock().node_mut(name)? {
            Node::Str(s) => {
                *s = value.to_string();
                Ok(())
            }
            other => Err(type_mismatch(name, other, "string")),
        }
    }

    fn boolean_value(&self, name: &str) -> DaqResult<bool> {
        self.check_connected()?;
        match self.features.lock().node(name)? {
            Node::Bool(v) => Ok(*v),
            other => Err(type_mismatch(name, other, "boolean")),
        }
    }

    fn set_boolean_value(&self, name: &str, value: bool) -> DaqResult<()> {
        self.check_connected()?;
        match self.features.lock().node_mut(name)? {
            Node::Bool(v) => {
                *v = value;
                Ok(())
            }
            other => Err(type_mismatch(name, other, "boolean")),
        }
    }

    fn integer_value(&self, name: &str) -> DaqResult<i64> {
        self.check_connected()?;
        let features = self.features.lock();
        if name == "PayloadSize" {
            features.node(name)?;
            return features.payload_size();
        }
        features.integer(name)
    }

    fn set_integer_value(&self, name: &str, value: i64) -> DaqResult<()> {
        self.check_connected()?;
        if name == "PayloadSize" {
            return Err(DaqError::ProtocolError("PayloadSize is read-only".into()));
        }
        match self.features.lock().node_mut(name)? {
            Node::Int(v) => {
                *v = value;
                Ok(())
            }
            other => Err(type_mismatch(name, other, "integer")),
        }
    }

    fn float_value(&self, name: &str) -> DaqResult<f64> {
        self.check_connected()?;
        match self.features.lock().node(name)? {
            Node::Float(v) => Ok(*v),
            other => Err(type_mismatch(name, other, "float")),
        }
    }

    fn set_float_value(&self, name: &str, value: f64) -> DaqResult<()> {
        self.check_connected()?;
        match self.features.lock().node_mut(name)? {
            Node::Float(v) => {
                *v = value;
                Ok(())
            }
            other => Err(type_mismatch(name, other, "float")),
        }
    }

    fn execute_command(&self, name: &str) -> DaqResult<()> {
        self.check_connected()?;
        {
            let mut features = self.features.lock();
            match features.node(name)? {
                Node::Command => {}
                other => return Err(type_mismatch(name, other, "command")),
            }
            features.executed.push(name.to_string());
            if name == FILE_OPERATION_EXECUTE {
                features.run_file_operation();
            }
        }

        match name {
            "AcquisitionStart" => {
                self.queues.lock().acquiring = true;
                debug!("Mock acquisition started");
            }
            "AcquisitionStop" => {
                self.queues.lock().acquiring = false;
                debug!("Mock acquisition stopped");
            }
            _ => {}
        }
        Ok(())
    }

    fn register_length(&self, name: &str) -> DaqResult<u64> {
        self.check_connected()?;
        let features = self.features.lock();
        features.register_node(name)?;
        Ok(features.register.len() as u64)
    }

    fn register_address(&self, name: &str) -> DaqResult<u64> {
        self.check_connected()?;
        let features = self.features.lock();
        features.register_node(name)?;
        if features.register_address_available {
            Ok(FILE_BUFFER_ADDRESS)
        } else {
            Err(DaqError::ProtocolError(format!(
                "register '{name}' has no physical address"
            )))
        }
    }

    fn write_memory(&self, address: u64, data: &[u8]) -> DaqResult<()> {
        self.check_connected()?;
        let mut features = self.features.lock();
        let capacity = features.register.len() as u64;
        let offset = address
            .checked_sub(FILE_BUFFER_ADDRESS)
            .filter(|offset| offset + data.len() as u64 <= capacity)
            .ok_or_else(|| {
                DaqError::ProtocolError(format!(
                    "write of {} bytes at {address:#X} is outside the buffer register",
                    data.len()
                ))
            })? as usize;

        features.register[offset..offset + data.len()].copy_from_slice(data);
        features.memory_writes += 1;
        Ok(())
    }

    fn write_register(&self, name: &str, data: &[u8]) -> DaqResult<()> {
        self.check_connected()?;
        let mut features = self.features.lock();
        features.register_node(name)?;
        if data.len() > features.register.len() {
            return Err(DaqError::CapacityExceeded {
                requested: data.len(),
                capacity: features.register.len(),
            });
        }
        features.register[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_register(&self, name: &str, buf: &mut [u8]) -> DaqResult<()> {
        self.check_connected()?;
        let features = self.features.lock();
        features.register_node(name)?;
        let n = buf.len().min(features.register.len());
        buf[..n].copy_from_slice(&features.register[..n]);
        Ok(())
    }
}

impl BufferQueue for MockCamera {
    fn allocate_buffer(&self, payload_size: usize) -> DaqResult<BufferHandle> {
        self.check_connected()?;
        let mut queues = self.queues.lock();
        let handle = BufferHandle::new(queues.slots.len());
        queues.slots.push(Slot {
            size: payload_size,
            data: Bytes::new(),
            status: BufferStatus::Success,
            frame_id: 0,
            width: 0,
            height: 0,
        });
        Ok(handle)
    }

    fn free_buffers(&self) -> DaqResult<()> {
        let mut queues = self.queues.lock();
        if std::mem::take(&mut queues.fail_next_free) {
            return Err(DaqError::OperationFailed {
                operation: "free buffers".into(),
                status: "Failure".into(),
            });
        }
        queues.input.clear();
        queues.output.clear();
        queues.slots.clear();
        Ok(())
    }

    fn push_input(&self, handle: BufferHandle) -> DaqResult<()> {
        self.check_connected()?;
        let mut queues = self.queues.lock();
        queues.slot(handle)?;
        if queues.input.contains(&handle) || queues.output.contains(&handle) {
            return Err(DaqError::InvalidState(format!(
                "buffer {handle} is already queued"
            )));
        }
        queues.input.push_back(handle);
        Ok(())
    }

    fn pop_output(&self, timeout: Duration) -> DaqResult<Option<BufferHandle>> {
        self.check_connected()?;
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        while queues.output.is_empty() {
            if self.frame_ready.wait_until(&mut queues, deadline).timed_out() {
                break;
            }
            self.check_connected()?;
        }
        Ok(queues.output.pop_front())
    }

    fn output_depth(&self) -> usize {
        self.queues.lock().output.len()
    }

    fn buffer_status(&self, handle: BufferHandle) -> DaqResult<BufferStatus> {
        self.check_connected()?;
        Ok(self.queues.lock().slot(handle)?.status)
    }

    fn buffer_info(&self, handle: BufferHandle) -> DaqResult<BufferInfo> {
        self.check_connected()?;
        let mut queues = self.queues.lock();
        if std::mem::take(&mut queues.fail_next_info) {
            return Err(DaqError::ProtocolError(format!(
                "no metadata for buffer {handle}"
            )));
        }
        let slot = queues.slot(handle)?;
        Ok(BufferInfo {
            data: slot.data.clone(),
            width: slot.width,
            height: slot.height,
            channels: 1,
            frame_id: slot.frame_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::FeatureAccessExt;

    #[test]
    fn payload_follows_pixel_format() {
        let camera = MockCamera::new(10, 4);
        assert_eq!(camera.feature::<i64>("PayloadSize").unwrap(), 40);
        camera.set_feature("PixelFormat", "Mono12").unwrap();
        assert_eq!(camera.feature::<i64>("PayloadSize").unwrap(), 80);
    }

    #[test]
    fn filler_byte_is_low_byte_of_frame_id() {
        let camera = MockCamera::new(2, 2);
        let handle = camera.allocate_buffer(4).unwrap();
        camera.execute("AcquisitionStart").unwrap();

        for expected in 1..=300_u64 {
            camera.push_input(handle).unwrap();
            assert_eq!(camera.deliver_frame(BufferStatus::Success), Some(expected));
            assert_eq!(camera.pop_output(Duration::ZERO).unwrap(), Some(handle));
        }
        let info = camera.buffer_info(handle).unwrap();
        assert_eq!(info.frame_id, 300);
        assert_eq!(&info.data[..], &[44; 4]);
    }

    #[test]
    fn frames_only_flow_while_acquiring() {
        let camera = MockCamera::new(4, 4);
        let handle = camera.allocate_buffer(16).unwrap();
        camera.push_input(handle).unwrap();

        assert_eq!(camera.deliver_frame(BufferStatus::Success), None);
        camera.execute("AcquisitionStart").unwrap();
        assert_eq!(camera.deliver_frame(BufferStatus::Success), Some(1));
        assert_eq!(camera.deliver_frame(BufferStatus::Success), None);
        assert_eq!(camera.dropped_frames(), 1);

        let popped = camera.pop_output(Duration::ZERO).unwrap();
        assert_eq!(popped, Some(handle));
        assert_eq!(camera.buffer_info(handle).unwrap().data.len(), 16);
    }

    #[test]
    fn push_rejects_queued_buffer() {
        let camera = MockCamera::new(4, 4);
        let handle = camera.allocate_buffer(16).unwrap();
        camera.push_input(handle).unwrap();
        assert!(camera.push_input(handle).is_err());
    }

    #[test]
    fn disconnect_fails_everything() {
        let camera = MockCamera::new(4, 4);
        camera.disconnect();
        assert!(matches!(
            camera.feature::<f64>("Gain"),
            Err(DaqError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            camera.pop_output(Duration::ZERO),
            Err(DaqError::DeviceUnavailable(_))
        ));
        camera.reconnect();
        assert!(camera.feature::<f64>("Gain").is_ok());
    }

    #[test]
    fn serial_writes_are_captured() {
        let camera = MockCamera::new(4, 4);
        camera.set_feature(FILE_SELECTOR, "SerialPort0").unwrap();
        camera.set_feature(FILE_OPEN_MODE, "Write").unwrap();
        camera.set_feature(FILE_OPERATION_SELECTOR, "Open").unwrap();
        camera.execute(FILE_OPERATION_EXECUTE).unwrap();

        camera.write_register(FILE_ACCESS_BUFFER, &[1, 2, 3]).unwrap();
        camera.set_feature(FILE_ACCESS_LENGTH, 3_i64).unwrap();
        camera.set_feature(FILE_OPERATION_SELECTOR, "Write").unwrap();
        camera.execute(FILE_OPERATION_EXECUTE).unwrap();

        assert_eq!(camera.feature::<String>(FILE_OPERATION_STATUS).unwrap(), "Success");
        assert_eq!(camera.feature::<i64>(FILE_OPERATION_RESULT).unwrap(), 3);
        assert_eq!(camera.serial_packets("SerialPort0"), vec![vec![1, 2, 3]]);
    }
}
