//! Integration tests for the register-mapped file channel
//!
//! Round trips at and around the register capacity, and the status poll
//! behavior under a slow or stuck device.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vision_daq::error::DaqError;
use vision_daq::hardware::file_access::{
    FileOpenMode, FileOperationStatus, PollPolicy, RegisterFileChannel,
};
use vision_daq::hardware::mock::MockCamera;

const CAPACITY: usize = 32;

fn camera() -> Arc<MockCamera> {
    Arc::new(MockCamera::new(8, 8).with_file_capacity(CAPACITY))
}

fn channel(camera: &Arc<MockCamera>, max_wait: Duration) -> RegisterFileChannel {
    RegisterFileChannel::new(camera.clone(), PollPolicy::new(Duration::from_millis(1), max_wait))
}

fn write_file(channel: &mut RegisterFileChannel, data: &[u8]) -> usize {
    channel.open("UserFile1", FileOpenMode::Write).unwrap();
    let written = channel.write(data).unwrap();
    channel.close().unwrap();
    written
}

fn read_file(channel: &mut RegisterFileChannel, max_len: usize) -> Vec<u8> {
    channel.open("UserFile1", FileOpenMode::Read).unwrap();
    let data = channel.read(max_len).unwrap();
    channel.close().unwrap();
    data
}

#[test]
fn test_round_trip_up_to_capacity() {
    let camera = camera();
    let mut channel = channel(&camera, Duration::from_millis(100));

    for len in [1, 7, CAPACITY - 1, CAPACITY] {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
        assert_eq!(write_file(&mut channel, &data), len);
        assert_eq!(read_file(&mut channel, len), data, "length {len}");
    }
}

#[test]
fn test_one_byte_over_capacity_is_rejected() {
    let camera = camera();
    let mut channel = channel(&camera, Duration::from_millis(100));
    write_file(&mut channel, b"previous");
    let writes_before = camera.memory_writes();

    channel.open("UserFile1", FileOpenMode::Write).unwrap();
    let err = channel.write(&[0u8; CAPACITY + 1]).unwrap_err();
    channel.close().unwrap();

    assert!(matches!(
        err,
        DaqError::CapacityExceeded {
            requested,
            capacity: CAPACITY,
        } if requested == CAPACITY + 1
    ));
    assert_eq!(camera.memory_writes(), writes_before);
    assert_eq!(camera.file_contents("UserFile1").unwrap(), b"previous");
}

#[test]
fn test_read_longer_than_capacity_is_clamped() {
    let camera = camera();
    camera.put_file("UserFile1", &[0x5A; CAPACITY * 2]);
    let mut channel = channel(&camera, Duration::from_millis(100));

    let data = read_file(&mut channel, CAPACITY * 4);
    assert_eq!(data, vec![0x5A; CAPACITY]);
    assert_eq!(channel.capacity(), None);
}

#[test]
fn test_slow_device_completes_within_bound() {
    let camera = camera();
    camera.set_busy_polls(5);
    let mut channel = channel(&camera, Duration::from_millis(500));

    assert_eq!(write_file(&mut channel, b"slow but steady"), 15);
    assert_eq!(read_file(&mut channel, 64), b"slow but steady");
}

#[test]
fn test_stuck_busy_times_out_failure_does_not() {
    let camera = camera();
    let max_wait = Duration::from_millis(40);
    let mut channel = channel(&camera, max_wait);
    channel.open("UserFile1", FileOpenMode::Write).unwrap();

    camera.set_stuck_busy(true);
    let started = Instant::now();
    let timeout = channel.write(b"abc").unwrap_err();
    assert!(matches!(timeout, DaqError::OperationTimeout { ref operation, .. } if operation == "Write"));
    assert!(started.elapsed() >= max_wait);
    assert_eq!(channel.last_status(), FileOperationStatus::Busy);

    // The next write first waits out the stale operation, then runs and fails.
    camera.set_stuck_busy(false);
    camera.fail_next_operation();
    let started = Instant::now();
    let failure = channel.write(b"abc").unwrap_err();
    assert!(matches!(failure, DaqError::OperationFailed { ref status, .. } if status == "Failure"));
    assert!(started.elapsed() < max_wait);

    channel.close().unwrap();
}

#[test]
fn test_stalled_open_does_not_lock_out_the_file() {
    let camera = camera();
    let mut channel = channel(&camera, Duration::from_millis(40));

    camera.set_stuck_busy(true);
    assert!(matches!(
        channel.open("UserFile1", FileOpenMode::Write),
        Err(DaqError::OperationTimeout { .. })
    ));
    camera.set_stuck_busy(false);

    channel.close().unwrap();
    assert!(!camera.has_open_file());
    assert_eq!(write_file(&mut channel, b"after stall"), 11);
    assert_eq!(read_file(&mut channel, 64), b"after stall");
}

#[test]
fn test_channel_is_reusable_after_close() {
    let camera = camera();
    let mut channel = channel(&camera, Duration::from_millis(100));

    write_file(&mut channel, b"one");
    write_file(&mut channel, b"two");
    channel.delete("UserFile1").unwrap();

    assert!(camera.file_contents("UserFile1").is_none());
    assert!(!channel.is_open());
}
