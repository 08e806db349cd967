//! Frame buffer loan/recycle protocol.
//!
//! A fixed pool of driver buffers circulates between two driver-owned queues and
//! the application:
//!
//! ```text
//!            push_input                 hardware fill
//!  caller ─────────────▶ input queue ─────────────────▶ output queue
//!    ▲                                                      │
//!    └──────────────── borrow_* (pop_output) ◀──────────────┘
//! ```
//!
//! Every buffer is in exactly one of {input, output, on loan}. The pool is
//! allocated once in [`FrameStream::start`] and freed only in
//! [`FrameStream::teardown`].
//!
//! A buffer the driver refuses to take back (device gone, say) is parked and
//! pushed again on the next borrow or release, so the pool never shrinks.
//!
//! # Borrow policies
//!
//! | Policy | Output queue handling | Returns |
//! |---|---|---|
//! | [`borrow_oldest`](FrameStream::borrow_oldest) | pop head, nothing discarded | longest-waiting frame |
//! | [`borrow_newest`](FrameStream::borrow_newest) | recycle all but the last entry | most recently filled frame |
//! | [`borrow_next_new`](FrameStream::borrow_next_new) | recycle everything, then wait | first frame filled after the call |
//!
//! Every borrow on an empty output queue waits for the next delivery, bounded by
//! the configured frame timeout.
//!
//! A buffer whose fill status is a fault is handed straight back to the input
//! queue and the borrow fails with [`DaqError::BufferFault`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::error::{DaqError, DaqResult};
use crate::hardware::capabilities::{BufferHandle, BufferQueue, BufferStatus};

/// A filled frame on loan to the application.
///
/// Must be handed back through [`FrameStream::release_frame`] exactly once.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Driver handle of the underlying buffer.
    pub handle: BufferHandle,
    /// Pixel data.
    pub data: Bytes,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Channels per pixel.
    pub channels: u32,
    /// Hardware frame counter.
    pub frame_id: u64,
}

impl FrameBuffer {
    /// Size of the pixel data in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no pixel data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Borrow/release front end over a driver's buffer queues.
pub struct FrameStream {
    queue: Arc<dyn BufferQueue>,
    frame_timeout: Duration,
    pool: Vec<BufferHandle>,
    on_loan: HashSet<BufferHandle>,
    parked: Vec<BufferHandle>,
    streaming: bool,
}

impl FrameStream {
    /// Create a stream with no pool allocated.
    ///
    /// `frame_timeout` bounds every wait for a filled buffer.
    pub fn new(queue: Arc<dyn BufferQueue>, frame_timeout: Duration) -> Self {
        Self {
            queue,
            frame_timeout,
            pool: Vec::new(),
            on_loan: HashSet::new(),
            parked: Vec::new(),
            streaming: false,
        }
    }

    /// Allocate `buffer_count` buffers of `payload_size` bytes and queue all of
    /// them for filling.
    ///
    /// Call before arming hardware acquisition so the first frames have somewhere
    /// to land.
    pub fn start(&mut self, buffer_count: usize, payload_size: usize) -> DaqResult<()> {
        if !self.pool.is_empty() {
            return Err(DaqError::InvalidState(
                "frame pool already allocated".into(),
            ));
        }
        if buffer_count == 0 {
            return Err(DaqError::Configuration(
                "buffer count must be at least 1".into(),
            ));
        }

        for _ in 0..buffer_count {
            match self.queue.allocate_buffer(payload_size) {
                Ok(handle) => self.pool.push(handle),
                Err(e) => {
                    self.release_pool();
                    return Err(e);
                }
            }
        }
        for handle in &self.pool {
            self.queue.push_input(*handle)?;
        }

        self.streaming = true;
        info!(buffer_count, payload_size, "Frame pool queued");
        Ok(())
    }

    /// Mark the stream stopped. Frames on loan stay valid until released, and
    /// frames already in the output queue can still be borrowed.
    pub fn stop(&mut self) {
        if self.streaming {
            debug!(on_loan = self.on_loan.len(), "Frame stream stopped");
        }
        self.streaming = false;
    }

    /// Whether the stream is between `start` and `stop`.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of buffers in the pool.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Number of frames currently on loan.
    #[must_use]
    pub fn outstanding_loans(&self) -> usize {
        self.on_loan.len()
    }

    /// Number of buffers waiting to be handed back to the driver.
    #[must_use]
    pub fn parked_buffers(&self) -> usize {
        self.parked.len()
    }

    /// Bound on every frame wait.
    #[must_use]
    pub fn frame_timeout(&self) -> Duration {
        self.frame_timeout
    }

    /// Borrow the longest-waiting filled frame.
    pub fn borrow_oldest(&mut self) -> DaqResult<FrameBuffer> {
        self.require_pool()?;
        self.unpark();
        let handle = self.wait_for_buffer()?;
        self.lend(handle)
    }

    /// Borrow the most recently filled frame, recycling every older one.
    pub fn borrow_newest(&mut self) -> DaqResult<FrameBuffer> {
        self.require_pool()?;
        self.unpark();
        let depth = self.queue.output_depth();
        let recycled = self.recycle_output(depth.saturating_sub(1))?;
        if recycled > 0 {
            trace!(recycled, "Recycled older frames");
        }
        let handle = self.wait_for_buffer()?;
        self.lend(handle)
    }

    /// Discard everything already filled and wait for a frame captured after this
    /// call began.
    pub fn borrow_next_new(&mut self) -> DaqResult<FrameBuffer> {
        self.require_pool()?;
        self.unpark();
        let depth = self.queue.output_depth();
        let recycled = self.recycle_output(depth)?;
        if recycled > 0 {
            trace!(recycled, "Discarded stale frames");
        }
        let handle = self.wait_for_buffer()?;
        self.lend(handle)
    }

    /// Hand a borrowed frame back for refilling.
    ///
    /// # Errors
    /// `LoanViolation` if the frame is not on loan (already released, or never
    /// borrowed from this stream). If the driver rejects the buffer the frame
    /// stays on loan and the release can be retried.
    pub fn release_frame(&mut self, frame: FrameBuffer) -> DaqResult<()> {
        if !self.on_loan.contains(&frame.handle) {
            return Err(DaqError::LoanViolation(frame.handle));
        }
        self.unpark();
        self.queue.push_input(frame.handle)?;
        self.on_loan.remove(&frame.handle);
        trace!(handle = %frame.handle, frame_id = frame.frame_id, "Frame released");
        Ok(())
    }

    /// Free the pool.
    ///
    /// The pool is freed either way. Frames still on loan keep their pixel data
    /// but can no longer be released; their number is reported as
    /// `OutstandingLoans`.
    pub fn teardown(&mut self) -> DaqResult<()> {
        self.streaming = false;
        if self.pool.is_empty() {
            return Ok(());
        }

        let outstanding = self.on_loan.len();
        self.on_loan.clear();
        self.parked.clear();
        let freed = self.queue.free_buffers();
        self.pool.clear();
        if let Err(e) = &freed {
            warn!(error = %e, "Driver failed to free frame pool");
        }

        if outstanding > 0 {
            warn!(outstanding, "Frame pool torn down with frames on loan");
            return Err(DaqError::OutstandingLoans(outstanding));
        }
        freed?;
        debug!("Frame pool freed");
        Ok(())
    }

    fn require_pool(&self) -> DaqResult<()> {
        if self.pool.is_empty() {
            return Err(DaqError::InvalidState("acquisition not started".into()));
        }
        Ok(())
    }

    /// Move up to `count` buffers from the output queue back to input.
    fn recycle_output(&mut self, count: usize) -> DaqResult<usize> {
        let mut recycled = 0;
        for _ in 0..count {
            match self.queue.pop_output(Duration::ZERO)? {
                Some(handle) => {
                    self.requeue(handle)?;
                    recycled += 1;
                }
                None => break,
            }
        }
        Ok(recycled)
    }

    fn wait_for_buffer(&self) -> DaqResult<BufferHandle> {
        self.queue
            .pop_output(self.frame_timeout)?
            .ok_or_else(|| DaqError::OperationTimeout {
                operation: "frame wait".into(),
                waited: self.frame_timeout,
            })
    }

    fn lend(&mut self, handle: BufferHandle) -> DaqResult<FrameBuffer> {
        let status = match self.queue.buffer_status(handle) {
            Ok(status) => status,
            Err(e) => return Err(self.abandon(handle, e)),
        };
        if status != BufferStatus::Success {
            warn!(%handle, %status, "Faulted buffer returned to input queue");
            self.requeue(handle)?;
            return Err(DaqError::BufferFault { handle, status });
        }

        let info = match self.queue.buffer_info(handle) {
            Ok(info) => info,
            Err(e) => return Err(self.abandon(handle, e)),
        };
        self.on_loan.insert(handle);
        trace!(%handle, frame_id = info.frame_id, "Frame on loan");
        Ok(FrameBuffer {
            handle,
            data: info.data,
            width: info.width,
            height: info.height,
            channels: info.channels,
            frame_id: info.frame_id,
        })
    }

    /// Hand `handle` back to the input queue, parking it if the driver refuses.
    fn requeue(&mut self, handle: BufferHandle) -> DaqResult<()> {
        self.queue.push_input(handle).map_err(|e| {
            self.parked.push(handle);
            e
        })
    }

    /// A dequeued buffer could not be lent out; give it back and pass `error` on.
    fn abandon(&mut self, handle: BufferHandle, error: DaqError) -> DaqError {
        warn!(%handle, error = %error, "Could not inspect dequeued buffer");
        if let Err(e) = self.requeue(handle) {
            debug!(%handle, error = %e, "Dequeued buffer parked");
        }
        error
    }

    fn unpark(&mut self) {
        while let Some(handle) = self.parked.pop() {
            if let Err(e) = self.queue.push_input(handle) {
                debug!(%handle, error = %e, "Parked buffer still refused");
                self.parked.push(handle);
                return;
            }
            debug!(%handle, "Parked buffer requeued");
        }
    }

    fn release_pool(&mut self) {
        if let Err(e) = self.queue.free_buffers() {
            warn!(error = %e, "Failed to free partially allocated frame pool");
        }
        self.pool.clear();
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "Error tearing down frame stream on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tracing_test::traced_test;

    use crate::hardware::capabilities::FeatureAccessExt;
    use crate::hardware::mock::MockCamera;

    fn started(camera: &Arc<MockCamera>, buffers: usize) -> FrameStream {
        let mut stream = FrameStream::new(camera.clone(), Duration::from_millis(200));
        stream.start(buffers, 64).unwrap();
        camera.execute("AcquisitionStart").unwrap();
        stream
    }

    fn deliver(camera: &MockCamera, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| camera.deliver_frame(BufferStatus::Success).unwrap())
            .collect()
    }

    #[test]
    fn start_queues_whole_pool() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let stream = started(&camera, 4);
        assert_eq!(stream.pool_size(), 4);
        assert_eq!(camera.input_depth(), 4);
        assert_eq!(camera.output_depth(), 0);
        assert!(stream.is_streaming());
    }

    #[test]
    fn borrow_oldest_takes_head_without_discarding() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 5);
        let ids = deliver(&camera, 3);

        let frame = stream.borrow_oldest().unwrap();

        assert_eq!(frame.frame_id, ids[0]);
        assert_eq!(camera.output_depth(), 2);
        assert_eq!(camera.input_depth(), 2);
        stream.release_frame(frame).unwrap();
    }

    #[test]
    fn borrow_newest_recycles_older_frames() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 5);
        let ids = deliver(&camera, 3);

        let frame = stream.borrow_newest().unwrap();

        assert_eq!(frame.frame_id, ids[2]);
        assert_eq!(camera.output_depth(), 0);
        assert_eq!(camera.input_depth(), 4);
        stream.release_frame(frame).unwrap();
    }

    #[test]
    fn borrow_next_new_skips_stale_frames() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 6);
        let stale = deliver(&camera, 4);

        let producer = {
            let camera = camera.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                camera.deliver_frame(BufferStatus::Success)
            })
        };

        let frame = stream.borrow_next_new().unwrap();
        let fresh = producer.join().unwrap().unwrap();

        assert_eq!(frame.frame_id, fresh);
        assert!(stale.iter().all(|id| *id < frame.frame_id));
        stream.release_frame(frame).unwrap();
    }

    #[test]
    fn empty_queue_times_out() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 2);
        let err = stream.borrow_oldest().unwrap_err();
        assert!(matches!(err, DaqError::OperationTimeout { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    #[traced_test]
    fn faulted_buffer_goes_back_to_input() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 3);
        camera.deliver_frame(BufferStatus::Fault).unwrap();

        let err = stream.borrow_oldest().unwrap_err();

        assert!(matches!(err, DaqError::BufferFault { status: BufferStatus::Fault, .. }));
        assert_eq!(camera.input_depth(), 3);
        assert_eq!(stream.outstanding_loans(), 0);
        assert!(logs_contain("Faulted buffer returned to input queue"));
    }

    #[test]
    fn release_can_be_retried_after_device_loss() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 3);
        deliver(&camera, 1);
        let frame = stream.borrow_oldest().unwrap();

        camera.disconnect();
        let err = stream.release_frame(frame.clone()).unwrap_err();
        assert!(matches!(err, DaqError::DeviceUnavailable(_)));
        assert_eq!(stream.outstanding_loans(), 1);

        camera.reconnect();
        stream.release_frame(frame.clone()).unwrap();
        assert_eq!(
            camera.input_depth() + camera.output_depth() + stream.outstanding_loans(),
            stream.pool_size()
        );
        assert!(matches!(
            stream.release_frame(frame),
            Err(DaqError::LoanViolation(_))
        ));
    }

    #[test]
    #[traced_test]
    fn free_failure_with_loans_is_logged() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 2);
        deliver(&camera, 1);
        let _frame = stream.borrow_oldest().unwrap();

        camera.fail_next_free();
        assert!(matches!(
            stream.teardown(),
            Err(DaqError::OutstandingLoans(1))
        ));
        assert_eq!(stream.pool_size(), 0);
        assert!(logs_contain("Driver failed to free frame pool"));
    }

    #[test]
    fn uninspectable_buffer_stays_in_pool() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 3);
        deliver(&camera, 1);

        camera.fail_next_buffer_info();
        assert!(matches!(
            stream.borrow_oldest(),
            Err(DaqError::ProtocolError(_))
        ));

        assert_eq!(stream.outstanding_loans(), 0);
        assert_eq!(stream.parked_buffers(), 0);
        assert_eq!(camera.input_depth(), 3);
    }

    #[test]
    fn two_loans_at_once() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 4);
        deliver(&camera, 2);

        let a = stream.borrow_oldest().unwrap();
        let b = stream.borrow_oldest().unwrap();
        assert_ne!(a.handle, b.handle);
        assert_eq!(a.len(), 64);
        assert_eq!(stream.outstanding_loans(), 2);

        stream.release_frame(b).unwrap();
        stream.release_frame(a).unwrap();
        assert_eq!(camera.input_depth(), 4);
    }

    #[test]
    fn double_release_is_rejected() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 2);
        deliver(&camera, 1);

        let frame = stream.borrow_oldest().unwrap();
        let copy = frame.clone();
        stream.release_frame(frame).unwrap();

        let err = stream.release_frame(copy).unwrap_err();
        assert!(matches!(err, DaqError::LoanViolation(_)));
        assert_eq!(camera.input_depth(), 2);
    }

    #[test]
    fn borrow_before_start_is_invalid() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = FrameStream::new(camera, Duration::from_millis(10));
        assert!(matches!(
            stream.borrow_newest(),
            Err(DaqError::InvalidState(_))
        ));
    }

    #[test]
    fn teardown_flags_outstanding_loans() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 3);
        deliver(&camera, 2);
        let _a = stream.borrow_oldest().unwrap();
        let _b = stream.borrow_oldest().unwrap();

        let err = stream.teardown().unwrap_err();

        assert!(matches!(err, DaqError::OutstandingLoans(2)));
        assert_eq!(stream.pool_size(), 0);
        assert_eq!(camera.allocated_buffers(), 0);
    }

    #[test]
    fn clean_teardown() {
        let camera = Arc::new(MockCamera::new(8, 8));
        let mut stream = started(&camera, 3);
        deliver(&camera, 1);
        let frame = stream.borrow_newest().unwrap();
        stream.release_frame(frame).unwrap();

        stream.teardown().unwrap();
        assert_eq!(camera.allocated_buffers(), 0);
        stream.teardown().unwrap();
    }
}
