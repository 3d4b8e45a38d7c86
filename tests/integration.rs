//! Integration tests for biosig-ble host-testable logic.
//!
//! Drives the public API end to end: timestamps feed frames, frames go
//! through the delivery link, and the bytes on the "air" decode back.

use std::cell::Cell;

use biosig_ble::acquisition::{decode_accel_frames, send_accel_batch};
use biosig_ble::config::{EVENT_QUEUE_DEPTH, EXG_FORMAT, FRAME_FORMAT, SINGLE_STREAM_FORMAT};
use biosig_ble::frame::{DeviceType, Modality, MultiDeviceFrame, SingleStreamHeader, Slot};
use biosig_ble::{
    ConnHandle, DeliveryError, FrameEncoder, MonotonicClock, NotificationLink, NotifyTransport,
    SampleBatch, ScaleFactor, TickCounter, TransmitOutcome, TransportEvent,
};
use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

struct Counter(Cell<u32>);

impl TickCounter for Counter {
    const BIT_WIDTH: u32 = 24;

    fn read_raw(&self) -> u32 {
        self.0.get()
    }
}

/// Records every payload it accepts; refuses anything above `limit`.
#[derive(Default)]
struct Air {
    frames: Vec<Vec<u8>>,
    limit: Option<usize>,
}

impl NotifyTransport for Air {
    fn notify(&mut self, _conn: ConnHandle, payload: &[u8]) -> TransmitOutcome {
        if self.limit.is_some_and(|limit| payload.len() > limit) {
            return TransmitOutcome::TooLarge;
        }
        self.frames.push(payload.to_vec());
        TransmitOutcome::Accepted(payload.len())
    }

    async fn idle(&mut self) {}
}

type Events = Channel<NoopRawMutex, TransportEvent, EVENT_QUEUE_DEPTH>;

#[test]
fn accel_batch_goes_out_timestamped() {
    let clock = MonotonicClock::new(Counter(Cell::new(0x00_1000)), ScaleFactor::from_prescaler(0).unwrap());
    clock.on_tick_event();
    clock.on_overflow_event();
    let timestamp = clock.read();
    assert_eq!(timestamp, ((1u64 << 24) + 0x1000) * 30_517);

    // two FIFO frames: (1, 2, 3) and (-1, -2, -3)
    let raw = [1, 0, 2, 0, 3, 0, 0xFF, 0xFF, 0xFE, 0xFF, 0xFD, 0xFF];
    let mut samples = [0i16; 6];
    let count = decode_accel_frames(&raw, &mut samples);

    let events = Events::new();
    let mut link = NotificationLink::new(
        events.receiver(),
        Air::default(),
        FrameEncoder::new(FRAME_FORMAT).unwrap(),
    );
    events.try_send(TransportEvent::Connected(ConnHandle(0))).unwrap();
    events.try_send(TransportEvent::MtuChanged(247)).unwrap();

    let delivery = block_on(link.send_frame(&SampleBatch::new(Some(timestamp), &samples[..count]))).unwrap();
    assert_eq!(delivery.bytes, 33 + 12);

    let frame = MultiDeviceFrame::decode(&link.transport().frames[0]).unwrap();
    assert_eq!(frame.header.device_type, DeviceType::Accel);
    assert_eq!(frame.header.sample_period_ns, 10_000_000);
    assert_eq!(
        frame.header.slots[0],
        Slot {
            timestamp_ns: timestamp,
            count: 6
        }
    );
    assert!(frame.samples().eq([1, 2, 3, -1, -2, -3]));
}

#[test]
fn single_stream_sequence_survives_disconnect() {
    let events = Events::new();
    let encoder = FrameEncoder::new(SINGLE_STREAM_FORMAT).unwrap();
    let mut link = NotificationLink::new(events.receiver(), Air::default(), encoder);
    let samples = [0i16; 64];
    let batch = SampleBatch::new(None, &samples);

    link.on_transport_event(TransportEvent::Connected(ConnHandle(1)));
    link.on_transport_event(TransportEvent::MtuChanged(247));
    block_on(link.send_frame(&batch)).unwrap();
    block_on(link.send_frame(&batch)).unwrap();

    link.on_transport_event(TransportEvent::Disconnected);
    assert_eq!(block_on(link.send_frame(&batch)), Err(DeliveryError::NotConnected));

    link.on_transport_event(TransportEvent::Connected(ConnHandle(2)));
    link.on_transport_event(TransportEvent::MtuChanged(185));
    block_on(link.send_frame(&batch)).unwrap();

    let sequences: Vec<u32> = link
        .transport()
        .frames
        .iter()
        .map(|f| SingleStreamHeader::decode(f).unwrap().sequence)
        .collect();
    assert_eq!(sequences, [1, 2, 3]);
    assert!(link.transport().frames.iter().all(|f| f.len() == 136));

    let stats = link.stats();
    assert_eq!((stats.sent, stats.dropped), (3, 1));
}

#[test]
fn capacity_tracks_negotiated_mtu() {
    let events = Events::new();
    let mut link = NotificationLink::new(
        events.receiver(),
        Air::default(),
        FrameEncoder::new(FRAME_FORMAT).unwrap(),
    );
    link.on_transport_event(TransportEvent::Connected(ConnHandle(1)));

    for (mtu, samples) in [(23u16, 0usize), (65, 14), (185, 74), (247, 105)] {
        link.on_transport_event(TransportEvent::MtuChanged(mtu));
        assert_eq!(link.sample_capacity(), samples, "mtu {mtu}");
    }
}

#[test]
fn initial_value_is_a_valid_frame() {
    let encoder = FrameEncoder::new(EXG_FORMAT).unwrap();
    let mut buf = [0u8; 244];
    let len = encoder.initial_value(&mut buf).unwrap();
    let frame = MultiDeviceFrame::decode(&buf[..len]).unwrap();
    assert_eq!(frame.header.device_type, DeviceType::Eeg);
    assert_eq!(frame.header.sample_period_ns, 7_812_500);
    assert_eq!(frame.len(), 96);

    let encoder = FrameEncoder::new(SINGLE_STREAM_FORMAT).unwrap();
    let len = encoder.initial_value(&mut buf).unwrap();
    let header = SingleStreamHeader::decode(&buf[..len]).unwrap();
    assert_eq!(header.format.modality, Modality::ExG);
    assert_eq!(header.channels.channels, 2);
    assert_eq!(usize::from(header.payload_len), len);
}

#[test]
fn accel_batches_split_to_fit_a_smaller_central() {
    let events = Events::new();
    let air = Air {
        limit: Some(182),
        ..Air::default()
    };
    let mut link = NotificationLink::new(events.receiver(), air, FrameEncoder::new(FRAME_FORMAT).unwrap());
    link.on_transport_event(TransportEvent::Connected(ConnHandle(4)));
    // the stack only promises an MTU of at most 247
    link.on_transport_event(TransportEvent::MtuCeiling(247));

    let period = 10_000_000;
    let mut received = Vec::new();
    for batch in 0..6i16 {
        let samples: Vec<i16> = (0..96).map(|i| batch * 100 + i).collect();
        let timestamp = 1_000_000_000 * (batch as u64 + 1);
        let before = link.transport().frames.len();
        block_on(send_accel_batch(&mut link, timestamp, &samples, period));

        let mut expected_stamp = timestamp;
        for frame in &link.transport().frames[before..] {
            let frame = MultiDeviceFrame::decode(frame).unwrap();
            assert_eq!(frame.len() % 3, 0);
            assert_eq!(frame.header.slots[0].timestamp_ns, expected_stamp);
            expected_stamp += (frame.len() / 3) as u64 * u64::from(period);
            received.extend(frame.samples());
        }
    }

    // nothing lost, nothing over the negotiated size
    let sent: Vec<i16> = (0..6i16).flat_map(|b| (0..96).map(move |i| b * 100 + i)).collect();
    assert_eq!(received, sent);
    assert!(link.transport().frames.iter().all(|f| f.len() <= 182));
    assert!(link.max_payload() <= 182);
    assert!(link.sample_capacity() >= 72);
    // one refused frame while the limit settled, re-sent in smaller pieces
    assert_eq!(link.stats().dropped, 1);
}
