use crate::device::{Direction, PixelFormat};
use crate::error::CodecError;
use crate::format::{CodecEntry, CodecKind, FormatTable};
use crate::loopback::LoopbackDevice;
use crate::pool::MAX_POOL_BUFFERS;
use crate::session::{CompletedBuffer, LifecycleState, Session, SessionConfig};

fn open_h264() -> Session {
    let session = Session::new(FormatTable::default());
    session
        .open(CodecKind::H264, Box::new(LoopbackDevice::new()))
        .unwrap();
    session
}

fn running_session(input: u32, output: u32) -> Session {
    let session = open_h264();
    session
        .configure(SessionConfig::new(1920, 1080).with_buffers(input, output))
        .unwrap();
    session.start().unwrap();
    session
}

#[test]
fn open_rejects_codec_missing_from_table() {
    let table = FormatTable::new(
        4096,
        2160,
        vec![CodecEntry {
            kind: CodecKind::H264,
            stream_format: PixelFormat::H264,
        }],
    );
    let session = Session::new(table);
    let err = session
        .open(CodecKind::Vp9, Box::new(LoopbackDevice::new()))
        .unwrap_err();
    assert_eq!(err, CodecError::UnsupportedCodec(CodecKind::Vp9));
    assert_eq!(session.state(), LifecycleState::Closed);
}

#[test]
fn open_rejects_device_without_m2m_capability() {
    let session = Session::new(FormatTable::default());
    let err = session
        .open(CodecKind::H264, Box::new(LoopbackDevice::new().without_m2m()))
        .unwrap_err();
    assert!(matches!(err, CodecError::Device { .. }));
    assert_eq!(session.state(), LifecycleState::Closed);
}

#[test]
fn open_twice_fails_already_open() {
    let session = open_h264();
    let err = session
        .open(CodecKind::H265, Box::new(LoopbackDevice::new()))
        .unwrap_err();
    assert_eq!(err, CodecError::AlreadyOpen);
    assert_eq!(session.codec(), Some(CodecKind::H264));
}

#[test]
fn configure_requires_open() {
    let session = Session::new(FormatTable::default());
    assert_eq!(
        session.configure(SessionConfig::new(1280, 720)).unwrap_err(),
        CodecError::NotOpen
    );
    assert_eq!(session.state(), LifecycleState::Closed);
}

#[test]
fn configure_rejects_oversize_geometry() {
    let session = open_h264();
    let err = session
        .configure(SessionConfig::new(9000, 9000))
        .unwrap_err();
    assert_eq!(
        err,
        CodecError::InvalidGeometry {
            width: 9000,
            height: 9000
        }
    );
    assert_eq!(session.state(), LifecycleState::Open);
    assert!(session.active_config().is_none());
}

#[test]
fn configure_rejects_buffer_count_outside_hard_maximum() {
    let session = open_h264();
    let err = session
        .configure(SessionConfig::new(1280, 720).with_buffers(MAX_POOL_BUFFERS + 1, 4))
        .unwrap_err();
    assert!(matches!(
        err,
        CodecError::AllocationFailed {
            direction: Direction::Input,
            ..
        }
    ));
    assert_eq!(session.state(), LifecycleState::Open);
}

#[test]
fn configure_twice_fails_and_keeps_first_config() {
    let session = open_h264();
    session.configure(SessionConfig::new(1920, 1080)).unwrap();
    let first = session.active_config().unwrap();
    let err = session
        .configure(SessionConfig::new(1280, 720))
        .unwrap_err();
    assert_eq!(err, CodecError::AlreadyConfigured);
    assert_eq!(session.active_config().unwrap(), first);
    assert_eq!(session.state(), LifecycleState::Configured);
}

#[test]
fn configure_rolls_back_input_pool_when_output_allocation_fails() {
    let session = Session::new(FormatTable::default());
    session
        .open(
            CodecKind::H264,
            Box::new(LoopbackDevice::new().fail_request_buffers(Direction::Output)),
        )
        .unwrap();
    let err = session.configure(SessionConfig::new(1920, 1080)).unwrap_err();
    assert!(matches!(
        err,
        CodecError::AllocationFailed {
            direction: Direction::Output,
            ..
        }
    ));
    assert_eq!(session.state(), LifecycleState::Open);
    assert_eq!(session.pool_capacity(Direction::Input), 0);
    assert_eq!(session.pool_capacity(Direction::Output), 0);
    assert!(session.active_config().is_none());
}

#[test]
fn start_requires_configured() {
    let session = open_h264();
    assert_eq!(session.start().unwrap_err(), CodecError::NotConfigured);
    assert_eq!(session.state(), LifecycleState::Open);
}

#[test]
fn start_is_idempotent_while_running() {
    let session = running_session(4, 4);
    session.start().unwrap();
    assert_eq!(session.state(), LifecycleState::Running);
}

#[test]
fn stop_is_idempotent_outside_running() {
    let session = open_h264();
    session.stop();
    assert_eq!(session.state(), LifecycleState::Open);
    let session = running_session(4, 4);
    session.stop();
    session.stop();
    assert_eq!(session.state(), LifecycleState::Configured);
}

#[test]
fn submit_requires_running() {
    let session = open_h264();
    session.configure(SessionConfig::new(1280, 720)).unwrap();
    assert_eq!(
        session.submit(Direction::Input, 0).unwrap_err(),
        CodecError::NotRunning
    );
    assert_eq!(
        session.retrieve(Direction::Output).unwrap_err(),
        CodecError::NotRunning
    );
}

#[test]
fn double_submit_of_one_slot_fails_invalid_slot() {
    let session = running_session(4, 4);
    session.submit(Direction::Input, 0).unwrap();
    let err = session.submit(Direction::Input, 0).unwrap_err();
    assert_eq!(
        err,
        CodecError::InvalidSlot {
            direction: Direction::Input,
            index: 0
        }
    );
    // After retrieving the completed slot the same index is usable again.
    let done = session.retrieve(Direction::Input).unwrap().unwrap();
    assert_eq!(done.index, 0);
    session.submit(Direction::Input, 0).unwrap();
}

#[test]
fn submit_out_of_range_slot_fails_invalid_slot() {
    let session = running_session(4, 4);
    let err = session.submit(Direction::Output, 4).unwrap_err();
    assert_eq!(
        err,
        CodecError::InvalidSlot {
            direction: Direction::Output,
            index: 4
        }
    );
}

#[test]
fn retrieve_on_idle_direction_returns_none_without_mutating() {
    let session = running_session(4, 4);
    assert_eq!(session.retrieve(Direction::Output).unwrap(), None);
    assert_eq!(session.retrieve(Direction::Output).unwrap(), None);
    // Pool state is untouched: every slot can still be submitted.
    for index in 0..4 {
        session.submit(Direction::Output, index).unwrap();
    }
}

#[test]
fn round_trip_returns_every_buffer_exactly_once() {
    let session = running_session(4, 4);
    for index in 0..4 {
        session.submit(Direction::Output, index).unwrap();
        session.submit(Direction::Input, index).unwrap();
    }
    for direction in [Direction::Input, Direction::Output] {
        let mut seen: Vec<u32> = Vec::new();
        while let Some(done) = session.retrieve(direction).unwrap() {
            assert_eq!(done.direction, direction);
            assert!(!seen.contains(&done.index), "slot {} duplicated", done.index);
            seen.push(done.index);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}

#[test]
fn output_timestamps_are_monotonic() {
    let session = running_session(4, 4);
    for index in 0..4 {
        session.submit(Direction::Output, index).unwrap();
        session.submit(Direction::Input, index).unwrap();
    }
    let mut completed: Vec<CompletedBuffer> = Vec::new();
    while let Some(done) = session.retrieve(Direction::Output).unwrap() {
        completed.push(done);
    }
    assert_eq!(completed.len(), 4);
    for pair in completed.windows(2) {
        assert!(pair[0].timestamp_ns < pair[1].timestamp_ns);
    }
}

#[test]
fn fatal_device_error_surfaces_on_submit() {
    let session = Session::new(FormatTable::default());
    session
        .open(CodecKind::H264, Box::new(LoopbackDevice::new().fail_queue()))
        .unwrap();
    session.configure(SessionConfig::new(1280, 720)).unwrap();
    session.start().unwrap();
    let err = session.submit(Direction::Input, 0).unwrap_err();
    assert!(matches!(err, CodecError::Device { .. }));
    // The rejected slot stays with the client.
    let err = session.submit(Direction::Input, 0).unwrap_err();
    assert!(matches!(err, CodecError::Device { .. }));
}

#[test]
fn fatal_device_error_surfaces_on_retrieve() {
    let session = Session::new(FormatTable::default());
    session
        .open(
            CodecKind::H264,
            Box::new(LoopbackDevice::new().fail_dequeue(Direction::Output)),
        )
        .unwrap();
    session.configure(SessionConfig::new(1280, 720)).unwrap();
    session.start().unwrap();
    session.submit(Direction::Output, 0).unwrap();
    session.submit(Direction::Input, 0).unwrap();
    let err = session.retrieve(Direction::Output).unwrap_err();
    assert!(matches!(err, CodecError::Device { .. }));
    // The slot is not handed back on failure, and the other direction still
    // drains normally.
    let err = session.submit(Direction::Output, 0).unwrap_err();
    assert!(matches!(
        err,
        CodecError::InvalidSlot {
            direction: Direction::Output,
            index: 0
        }
    ));
    assert!(session.retrieve(Direction::Input).unwrap().is_some());
}

#[test]
fn stop_returns_device_owned_slots_to_client() {
    let session = running_session(4, 4);
    session.submit(Direction::Input, 0).unwrap();
    session.submit(Direction::Input, 1).unwrap();
    session.stop();
    assert_eq!(session.state(), LifecycleState::Configured);
    session.start().unwrap();
    // Stream-off aborted the queued work, so the slots are submittable again.
    session.submit(Direction::Input, 0).unwrap();
    session.submit(Direction::Input, 1).unwrap();
}

#[test]
fn lifecycle_scenario_h264_1080p() {
    let session = open_h264();
    session.configure(SessionConfig::new(1920, 1080)).unwrap();
    let active = session.active_config().unwrap();
    assert_eq!(active.format.input_format, PixelFormat::Nv12);
    assert_eq!(active.format.output_format, PixelFormat::H264);
    session.start().unwrap();
    assert_eq!(session.state(), LifecycleState::Running);

    session.submit(Direction::Input, 0).unwrap();
    assert_eq!(session.retrieve(Direction::Output).unwrap(), None);

    session.stop();
    assert_eq!(session.state(), LifecycleState::Configured);
    session.close();
    assert_eq!(session.state(), LifecycleState::Closed);
    assert_eq!(session.pool_capacity(Direction::Input), 0);
    assert_eq!(session.pool_capacity(Direction::Output), 0);
    assert!(session.active_config().is_none());
    assert!(session.codec().is_none());
}

#[test]
fn close_is_safe_from_any_state() {
    let session = Session::new(FormatTable::default());
    session.close();
    assert_eq!(session.state(), LifecycleState::Closed);

    let session = open_h264();
    session.close();
    assert_eq!(session.state(), LifecycleState::Closed);

    let session = running_session(2, 2);
    session.submit(Direction::Input, 0).unwrap();
    session.close();
    assert_eq!(session.state(), LifecycleState::Closed);
    // A closed session can be reopened with a new device handle.
    session
        .open(CodecKind::Vp8, Box::new(LoopbackDevice::new()))
        .unwrap();
    assert_eq!(session.state(), LifecycleState::Open);
}

#[test]
fn concurrent_submit_and_retrieve_are_serialized() {
    use std::sync::Arc;

    let session = Arc::new(running_session(8, 8));
    for index in 0..8 {
        session.submit(Direction::Output, index).unwrap();
    }
    let submitter = {
        let session = Arc::clone(&session);
        std::thread::spawn(move || {
            for index in 0..8 {
                session.submit(Direction::Input, index).unwrap();
            }
        })
    };
    let mut seen = 0;
    while seen < 8 {
        if session.retrieve(Direction::Output).unwrap().is_some() {
            seen += 1;
        }
    }
    submitter.join().unwrap();
    // All eight inputs were consumed and handed back exactly once.
    let mut inputs = 0;
    while session.retrieve(Direction::Input).unwrap().is_some() {
        inputs += 1;
    }
    assert_eq!(inputs, 8);
}
