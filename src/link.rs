//! Notification delivery path.
//!
//! [`NotificationLink`] turns a [`SampleBatch`] into one GATT notification:
//! it encodes the batch, checks it against the link's current payload
//! limit and hands it to a [`NotifyTransport`]. Link state (connection,
//! MTU, pending transmit) changes only through [`TransportEvent`]s, which
//! the BLE side posts into a channel and the link drains before each send.
//!
//! When the transport reports its buffers full, the link waits for a
//! `TransmitComplete` (bounded by [`BUSY_WAIT_MAX_IDLE_CYCLES`]) and retries
//! the identical payload exactly once. Transports that cannot report
//! completions re-poll `notify` once per idle cycle instead, within the
//! same budget.
//!
//! The payload limit follows the ATT MTU. When only an upper bound is
//! known ([`TransportEvent::MtuCeiling`]), the limit is found by bisection:
//! every payload the stack accepts raises the lower bound, every size
//! rejection lowers the upper one.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;

use crate::config::{BUSY_WAIT_MAX_IDLE_CYCLES, EVENT_QUEUE_DEPTH, STATS_LOG_EVERY_FRAMES};
use crate::error::DeliveryError;
use crate::frame::{max_payload_for_mtu, FrameEncoder, SampleBatch, ATT_DEFAULT_MTU, MAX_PAYLOAD_CAPACITY};

/// Payload every BLE link can carry.
const DEFAULT_PAYLOAD: usize = max_payload_for_mtu(ATT_DEFAULT_MTU);

/// Connection handle assigned by the BLE stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// Link state changes reported by the BLE stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportEvent {
    /// A central connected. The payload limit resets to the default MTU.
    Connected(ConnHandle),
    /// The connection is gone.
    Disconnected,
    /// A queued notification left the controller; buffers are free again.
    TransmitComplete,
    /// ATT MTU negotiated to this value.
    MtuChanged(u16),
    /// The ATT MTU is at most this value; the exact one is not reported.
    MtuCeiling(u16),
}

/// Result of a single notify attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitOutcome {
    /// Queued; carries the number of bytes the stack accepted.
    Accepted(usize),
    /// No transmit buffer available right now.
    Busy,
    /// The payload exceeds what the stack allows on this connection.
    TooLarge,
    /// The stack no longer has the connection.
    NotConnected,
    /// Any other stack error code.
    Failed(u32),
}

/// Lower half of the link: the BLE stack's notify primitive.
#[allow(async_fn_in_trait)]
pub trait NotifyTransport {
    /// `false` if this transport never posts `TransmitComplete`; a busy
    /// send then re-polls `notify` after every idle cycle.
    const SIGNALS_TX_COMPLETE: bool = true;

    /// Queue `payload` as a notification on `conn`. Must not block.
    fn notify(&mut self, conn: ConnHandle, payload: &[u8]) -> TransmitOutcome;

    /// Park until the stack may have made progress (typically one
    /// connection interval). Events produced meanwhile go to the channel.
    async fn idle(&mut self);
}

/// Successful delivery report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Delivery {
    /// Notification payload size in bytes.
    pub bytes: usize,
    /// `true` if the first attempt hit a busy stack and was re-sent.
    pub retried: bool,
}

/// Running delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    pub sent: u32,
    pub dropped: u32,
    pub retries: u32,
}

/// Frame encoder plus delivery state for one peripheral link.
pub struct NotificationLink<'a, M: RawMutex, T: NotifyTransport> {
    events: Receiver<'a, M, TransportEvent, EVENT_QUEUE_DEPTH>,
    transport: T,
    encoder: FrameEncoder,
    conn: Option<ConnHandle>,
    /// Payload limit implied by the last MTU event.
    mtu_payload: usize,
    /// Largest payload known to go through.
    confirmed: usize,
    /// Smallest payload known not to; always above `confirmed`.
    rejected: Option<usize>,
    tx_waiting: bool,
    stats: LinkStats,
    buf: [u8; MAX_PAYLOAD_CAPACITY],
}

impl<'a, M: RawMutex, T: NotifyTransport> NotificationLink<'a, M, T> {
    pub fn new(
        events: Receiver<'a, M, TransportEvent, EVENT_QUEUE_DEPTH>,
        transport: T,
        encoder: FrameEncoder,
    ) -> Self {
        Self {
            events,
            transport,
            encoder,
            conn: None,
            mtu_payload: DEFAULT_PAYLOAD,
            confirmed: DEFAULT_PAYLOAD,
            rejected: None,
            tx_waiting: false,
            stats: LinkStats::default(),
            buf: [0; MAX_PAYLOAD_CAPACITY],
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Largest notification payload on the current link.
    pub fn max_payload(&self) -> usize {
        match self.rejected {
            Some(rejected) => self.confirmed + (rejected - self.confirmed) / 2,
            None => self.mtu_payload,
        }
    }

    /// Samples one frame may carry on the current link.
    pub fn sample_capacity(&self) -> usize {
        self.encoder.sample_capacity(self.max_payload())
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn reset_payload_limit(&mut self, mtu_payload: usize, bisect: bool) {
        self.mtu_payload = mtu_payload.min(MAX_PAYLOAD_CAPACITY);
        self.confirmed = DEFAULT_PAYLOAD.min(self.mtu_payload);
        self.rejected = bisect.then_some(self.mtu_payload + 1);
    }

    /// Apply one link event.
    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(handle) => {
                info!("link: connected, handle {}", handle.0);
                self.conn = Some(handle);
                self.reset_payload_limit(DEFAULT_PAYLOAD, false);
                self.tx_waiting = false;
            }
            TransportEvent::Disconnected => {
                info!("link: disconnected");
                self.conn = None;
                self.tx_waiting = false;
            }
            TransportEvent::TransmitComplete => {
                self.tx_waiting = false;
            }
            TransportEvent::MtuChanged(att_mtu) => {
                self.reset_payload_limit(max_payload_for_mtu(att_mtu), false);
                info!("link: ATT MTU {} -> max payload {}", att_mtu, self.max_payload());
            }
            TransportEvent::MtuCeiling(att_mtu) => {
                self.reset_payload_limit(max_payload_for_mtu(att_mtu), true);
                info!("link: ATT MTU <= {}, searching from {}", att_mtu, self.max_payload());
            }
        }
    }

    /// Apply every event queued so far without waiting.
    pub fn service_events(&mut self) {
        while let Ok(event) = self.events.try_receive() {
            self.on_transport_event(event);
        }
    }

    /// Wait for the next link event and apply it. Lets an otherwise idle
    /// owner keep the event queue drained between frames.
    pub async fn next_event(&mut self) {
        let event = self.events.receive().await;
        self.on_transport_event(event);
    }

    /// Encode `batch` and send it as one notification.
    ///
    /// Oversized frames are rejected before encoding, so a single-stream
    /// sequence number is only consumed by frames that reach the stack.
    pub async fn send_frame(&mut self, batch: &SampleBatch<'_>) -> Result<Delivery, DeliveryError> {
        let result = self.try_send(batch).await;
        match result {
            Ok(delivery) => {
                self.stats.sent = self.stats.sent.wrapping_add(1);
                if self.stats.sent % STATS_LOG_EVERY_FRAMES == 0 {
                    info!(
                        "link: {} sent, {} dropped, {} retries",
                        self.stats.sent,
                        self.stats.dropped,
                        self.stats.retries
                    );
                }
                trace!("link: frame {} bytes, retried {}", delivery.bytes, delivery.retried);
            }
            Err(e) => {
                self.stats.dropped = self.stats.dropped.wrapping_add(1);
                debug!("link: frame dropped: {}", e);
            }
        }
        result
    }

    async fn try_send(&mut self, batch: &SampleBatch<'_>) -> Result<Delivery, DeliveryError> {
        self.service_events();
        let conn = self.conn.ok_or(DeliveryError::NotConnected)?;

        let len = self.encoder.encoded_len(batch);
        let max = self.max_payload();
        if len > max {
            return Err(DeliveryError::PayloadTooLarge { len, max });
        }
        let len = self.encoder.encode(batch, &mut self.buf)?;

        match self.transport.notify(conn, &self.buf[..len]) {
            TransmitOutcome::Busy => {}
            outcome => return self.accept(outcome, len, false),
        }

        warn!("link: stack busy");
        if !T::SIGNALS_TX_COMPLETE {
            return self.poll_until_queued(conn, len).await;
        }

        self.tx_waiting = true;
        self.wait_transmit_complete(conn).await?;

        self.stats.retries = self.stats.retries.wrapping_add(1);
        let outcome = self.transport.notify(conn, &self.buf[..len]);
        self.accept(outcome, len, true)
    }

    fn accept(&mut self, outcome: TransmitOutcome, len: usize, retried: bool) -> Result<Delivery, DeliveryError> {
        match outcome {
            TransmitOutcome::Accepted(written) if written == len => {
                self.confirmed = self.confirmed.max(len);
                Ok(Delivery { bytes: len, retried })
            }
            TransmitOutcome::Accepted(written) => Err(DeliveryError::TruncatedWrite {
                requested: len as u16,
                accepted: written.min(u16::MAX as usize) as u16,
            }),
            TransmitOutcome::Busy => Err(DeliveryError::Busy),
            TransmitOutcome::TooLarge => {
                if self.confirmed >= len {
                    self.confirmed = DEFAULT_PAYLOAD.min(len - 1);
                }
                self.rejected = Some(self.rejected.map_or(len, |r| r.min(len)));
                let max = self.max_payload();
                warn!("link: stack refused {} bytes, limit now {}", len, max);
                Err(DeliveryError::PayloadTooLarge { len, max })
            }
            TransmitOutcome::NotConnected => {
                self.conn = None;
                self.tx_waiting = false;
                Err(DeliveryError::NotConnected)
            }
            TransmitOutcome::Failed(code) => Err(DeliveryError::Transport(code)),
        }
    }

    /// Wait for `TransmitComplete` on `conn`, giving up after a bounded
    /// number of idle cycles or if the connection goes away.
    async fn wait_transmit_complete(&mut self, conn: ConnHandle) -> Result<(), DeliveryError> {
        for _ in 0..BUSY_WAIT_MAX_IDLE_CYCLES {
            self.service_events();
            if self.conn != Some(conn) {
                return Err(DeliveryError::NotConnected);
            }
            if !self.tx_waiting {
                return Ok(());
            }
            self.transport.idle().await;
        }

        self.service_events();
        if self.conn != Some(conn) {
            return Err(DeliveryError::NotConnected);
        }
        if !self.tx_waiting {
            return Ok(());
        }
        warn!("link: no transmit complete after {} idle cycles", BUSY_WAIT_MAX_IDLE_CYCLES);
        self.tx_waiting = false;
        Err(DeliveryError::Busy)
    }

    /// Re-offer the encoded frame once per idle cycle until the stack
    /// takes it, the connection goes away or the budget runs out.
    async fn poll_until_queued(&mut self, conn: ConnHandle, len: usize) -> Result<Delivery, DeliveryError> {
        for _ in 0..BUSY_WAIT_MAX_IDLE_CYCLES {
            self.transport.idle().await;
            self.service_events();
            if self.conn != Some(conn) {
                return Err(DeliveryError::NotConnected);
            }
            self.stats.retries = self.stats.retries.wrapping_add(1);
            match self.transport.notify(conn, &self.buf[..len]) {
                TransmitOutcome::Busy => {}
                outcome => return self.accept(outcome, len, true),
            }
        }
        warn!("link: stack still busy after {} idle cycles", BUSY_WAIT_MAX_IDLE_CYCLES);
        Err(DeliveryError::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DeviceType, FrameFormat, Modality, MultiDeviceFrame, SingleStreamHeader};
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::channel::{Channel, Sender};
    use std::collections::VecDeque;

    type Events = Channel<NoopRawMutex, TransportEvent, EVENT_QUEUE_DEPTH>;

    /// Scripted stack: refuses payloads above `limit`, otherwise pops one
    /// outcome per notify (default: accept all) and posts one queued event
    /// per idle cycle.
    struct MockTransport<'a> {
        outcomes: VecDeque<TransmitOutcome>,
        on_idle: VecDeque<TransportEvent>,
        limit: Option<usize>,
        events: Sender<'a, NoopRawMutex, TransportEvent, EVENT_QUEUE_DEPTH>,
        sent: Vec<Vec<u8>>,
        idles: usize,
    }

    impl<'a> MockTransport<'a> {
        fn new(events: &'a Events) -> Self {
            Self {
                outcomes: VecDeque::new(),
                on_idle: VecDeque::new(),
                limit: None,
                events: events.sender(),
                sent: Vec::new(),
                idles: 0,
            }
        }
    }

    impl NotifyTransport for MockTransport<'_> {
        fn notify(&mut self, _conn: ConnHandle, payload: &[u8]) -> TransmitOutcome {
            self.sent.push(payload.to_vec());
            if self.limit.is_some_and(|limit| payload.len() > limit) {
                return TransmitOutcome::TooLarge;
            }
            self.outcomes
                .pop_front()
                .unwrap_or(TransmitOutcome::Accepted(payload.len()))
        }

        async fn idle(&mut self) {
            self.idles += 1;
            if let Some(event) = self.on_idle.pop_front() {
                self.events.try_send(event).unwrap();
            }
        }
    }

    /// Same stack without completion events.
    struct PollingTransport<'a>(MockTransport<'a>);

    impl NotifyTransport for PollingTransport<'_> {
        const SIGNALS_TX_COMPLETE: bool = false;

        fn notify(&mut self, conn: ConnHandle, payload: &[u8]) -> TransmitOutcome {
            self.0.notify(conn, payload)
        }

        async fn idle(&mut self) {
            self.0.idle().await
        }
    }

    fn multi_device() -> FrameEncoder {
        FrameEncoder::new(FrameFormat::MultiDevice {
            device_type: DeviceType::Eeg,
            sample_period_ns: 7_812_500,
        })
        .unwrap()
    }

    fn single_stream() -> FrameEncoder {
        FrameEncoder::new(FrameFormat::SingleStream {
            frames: 4,
            channels: 2,
            bytes_per_channel: 2,
            modality: Modality::ExG,
        })
        .unwrap()
    }

    fn connected<'a, T: NotifyTransport>(
        events: &'a Events,
        transport: T,
        encoder: FrameEncoder,
    ) -> NotificationLink<'a, NoopRawMutex, T> {
        let mut link = NotificationLink::new(events.receiver(), transport, encoder);
        link.on_transport_event(TransportEvent::Connected(ConnHandle(1)));
        link.on_transport_event(TransportEvent::MtuChanged(247));
        link
    }

    #[test]
    fn not_connected_never_reaches_stack() {
        let events = Events::new();
        let mut link = NotificationLink::new(events.receiver(), MockTransport::new(&events), multi_device());
        let samples = [1i16; 4];

        let result = block_on(link.send_frame(&SampleBatch::new(Some(0), &samples)));
        assert_eq!(result, Err(DeliveryError::NotConnected));
        assert!(link.transport().sent.is_empty());
        assert_eq!(link.stats().dropped, 1);
    }

    #[test]
    fn connect_via_channel_then_send() {
        let events = Events::new();
        let mut link = NotificationLink::new(events.receiver(), MockTransport::new(&events), multi_device());
        events.try_send(TransportEvent::Connected(ConnHandle(7))).unwrap();
        events.try_send(TransportEvent::MtuChanged(247)).unwrap();

        let samples = [1i16, 2, 3];
        let delivery = block_on(link.send_frame(&SampleBatch::new(Some(99), &samples))).unwrap();
        assert_eq!(
            delivery,
            Delivery {
                bytes: 39,
                retried: false
            }
        );
        assert!(link.is_connected());

        let sent = &link.transport().sent[0];
        let frame = MultiDeviceFrame::decode(sent).unwrap();
        assert_eq!(frame.header.slots[0].timestamp_ns, 99);
        assert_eq!(link.stats().sent, 1);
    }

    #[test]
    fn default_mtu_limits_payload() {
        let events = Events::new();
        let mut link = NotificationLink::new(events.receiver(), MockTransport::new(&events), multi_device());
        link.on_transport_event(TransportEvent::Connected(ConnHandle(1)));
        assert_eq!(link.max_payload(), 20);
        assert_eq!(link.sample_capacity(), 0);

        let samples = [0i16; 2];
        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::PayloadTooLarge { len: 37, max: 20 }));
        assert!(link.transport().sent.is_empty());
    }

    #[test]
    fn mtu_change_raises_limit() {
        let events = Events::new();
        let link = connected(&events, MockTransport::new(&events), multi_device());
        assert_eq!(link.max_payload(), 244);
        assert_eq!(link.sample_capacity(), 105);
    }

    #[test]
    fn mtu_beyond_buffer_is_clamped() {
        let events = Events::new();
        let mut link = connected(&events, MockTransport::new(&events), multi_device());
        link.on_transport_event(TransportEvent::MtuChanged(512));
        assert_eq!(link.max_payload(), MAX_PAYLOAD_CAPACITY);
    }

    #[test]
    fn oversized_frame_keeps_sequence() {
        let events = Events::new();
        let mut link = NotificationLink::new(events.receiver(), MockTransport::new(&events), single_stream());
        link.on_transport_event(TransportEvent::Connected(ConnHandle(1)));
        let samples = [0i16; 8];

        // 8 + 16 bytes does not fit a 20 byte payload
        assert_eq!(
            block_on(link.send_frame(&SampleBatch::new(None, &samples))),
            Err(DeliveryError::PayloadTooLarge { len: 24, max: 20 })
        );

        link.on_transport_event(TransportEvent::MtuChanged(247));
        block_on(link.send_frame(&SampleBatch::new(None, &samples))).unwrap();
        let header = SingleStreamHeader::decode(&link.transport().sent[0]).unwrap();
        assert_eq!(header.sequence, 1);
    }

    #[test]
    fn busy_then_complete_retries_same_payload() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.push_back(TransmitOutcome::Busy);
        transport.on_idle.push_back(TransportEvent::TransmitComplete);
        let mut link = connected(&events, transport, single_stream());
        let samples = [5i16; 8];

        let delivery = block_on(link.send_frame(&SampleBatch::new(None, &samples))).unwrap();
        assert_eq!(
            delivery,
            Delivery {
                bytes: 24,
                retried: true
            }
        );

        let sent = &link.transport().sent;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        // the retry carries the same sequence number
        assert_eq!(SingleStreamHeader::decode(&sent[1]).unwrap().sequence, 1);
        assert_eq!(link.stats().retries, 1);
        assert_eq!(link.stats().sent, 1);
    }

    #[test]
    fn second_busy_is_reported() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.extend([TransmitOutcome::Busy, TransmitOutcome::Busy]);
        transport.on_idle.push_back(TransportEvent::TransmitComplete);
        let mut link = connected(&events, transport, multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::Busy));
        assert_eq!(link.transport().sent.len(), 2);
    }

    #[test]
    fn busy_wait_is_bounded() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.push_back(TransmitOutcome::Busy);
        let mut link = connected(&events, transport, multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::Busy));
        assert_eq!(link.transport().idles, BUSY_WAIT_MAX_IDLE_CYCLES as usize);
        assert_eq!(link.transport().sent.len(), 1);

        // the stale wait does not leak into the next frame
        let delivery = block_on(link.send_frame(&SampleBatch::new(None, &samples))).unwrap();
        assert!(!delivery.retried);
    }

    #[test]
    fn disconnect_while_waiting() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.push_back(TransmitOutcome::Busy);
        transport.on_idle.push_back(TransportEvent::Disconnected);
        let mut link = connected(&events, transport, multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::NotConnected));
        assert!(!link.is_connected());
        assert_eq!(link.transport().sent.len(), 1);
    }

    #[test]
    fn truncated_write_is_an_error() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.push_back(TransmitOutcome::Accepted(20));
        let mut link = connected(&events, transport, multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(
            result,
            Err(DeliveryError::TruncatedWrite {
                requested: 53,
                accepted: 20
            })
        );
    }

    #[test]
    fn stack_reported_disconnect_clears_link() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.push_back(TransmitOutcome::NotConnected);
        let mut link = connected(&events, transport, multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::NotConnected));
        assert!(!link.is_connected());
    }

    #[test]
    fn stack_error_code_is_passed_through() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.push_back(TransmitOutcome::Failed(0x3001));
        let mut link = connected(&events, transport, multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::Transport(0x3001)));
        assert_eq!(link.stats().dropped, 1);
    }

    #[test]
    fn reconnect_resets_mtu() {
        let events = Events::new();
        let mut link = connected(&events, MockTransport::new(&events), multi_device());
        link.on_transport_event(TransportEvent::Disconnected);
        link.on_transport_event(TransportEvent::Connected(ConnHandle(2)));
        assert_eq!(link.max_payload(), 20);
    }

    /// Send full-capacity frames `rounds` times; returns how many the
    /// stack refused for size.
    fn fill_frames<T: NotifyTransport>(link: &mut NotificationLink<'_, NoopRawMutex, T>, rounds: usize) -> usize {
        let samples = [0i16; 105];
        let mut refused = 0;
        for _ in 0..rounds {
            let batch = SampleBatch::new(None, &samples[..link.sample_capacity()]);
            match block_on(link.send_frame(&batch)) {
                Ok(_) => {}
                Err(DeliveryError::PayloadTooLarge { .. }) => refused += 1,
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
        refused
    }

    #[test]
    fn stack_size_limit_below_posted_mtu() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        // central negotiated 185
        transport.limit = Some(182);
        let mut link = connected(&events, transport, multi_device());
        assert_eq!(link.max_payload(), 244);

        let samples = [0i16; 96];
        let result = block_on(link.send_frame(&SampleBatch::new(Some(1), &samples)));
        assert_eq!(result, Err(DeliveryError::PayloadTooLarge { len: 225, max: 122 }));
        assert_eq!(link.sample_capacity(), 44);
        assert!(link.is_connected());

        // bisection settles on the largest frame the stack takes
        assert_eq!(fill_frames(&mut link, 12), 3);
        assert_eq!(link.sample_capacity(), 74);
        assert!(link.max_payload() <= 182);
        assert_eq!(fill_frames(&mut link, 4), 0);
    }

    #[test]
    fn ceiling_search_climbs_without_losses() {
        let events = Events::new();
        let mut link = NotificationLink::new(events.receiver(), MockTransport::new(&events), multi_device());
        link.on_transport_event(TransportEvent::Connected(ConnHandle(1)));
        link.on_transport_event(TransportEvent::MtuCeiling(247));
        assert_eq!(link.max_payload(), 132);

        assert_eq!(fill_frames(&mut link, 10), 0);
        assert_eq!(link.sample_capacity(), 105);
        assert_eq!(link.stats().dropped, 0);
    }

    #[test]
    fn exact_mtu_ends_the_search() {
        let events = Events::new();
        let mut link = NotificationLink::new(events.receiver(), MockTransport::new(&events), multi_device());
        link.on_transport_event(TransportEvent::Connected(ConnHandle(1)));
        link.on_transport_event(TransportEvent::MtuCeiling(247));
        link.on_transport_event(TransportEvent::MtuChanged(185));
        assert_eq!(link.max_payload(), 182);
    }

    #[test]
    fn polling_transport_reoffers_each_idle_cycle() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.extend([TransmitOutcome::Busy, TransmitOutcome::Busy]);
        let mut link = connected(&events, PollingTransport(transport), single_stream());
        let samples = [3i16; 8];

        let delivery = block_on(link.send_frame(&SampleBatch::new(None, &samples))).unwrap();
        assert!(delivery.retried);
        let stack = &link.transport().0;
        assert_eq!(stack.idles, 2);
        assert_eq!(stack.sent.len(), 3);
        assert!(stack.sent.iter().all(|f| *f == stack.sent[0]));
        assert_eq!(link.stats().retries, 2);
    }

    #[test]
    fn polling_transport_gives_up_after_budget() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport
            .outcomes
            .extend(std::iter::repeat(TransmitOutcome::Busy).take(BUSY_WAIT_MAX_IDLE_CYCLES as usize + 1));
        let mut link = connected(&events, PollingTransport(transport), multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::Busy));
        assert_eq!(link.transport().0.idles, BUSY_WAIT_MAX_IDLE_CYCLES as usize);
        assert_eq!(link.transport().0.sent.len(), BUSY_WAIT_MAX_IDLE_CYCLES as usize + 1);
    }

    #[test]
    fn polling_transport_sees_disconnect() {
        let events = Events::new();
        let mut transport = MockTransport::new(&events);
        transport.outcomes.push_back(TransmitOutcome::Busy);
        transport.on_idle.push_back(TransportEvent::Disconnected);
        let mut link = connected(&events, PollingTransport(transport), multi_device());
        let samples = [0i16; 10];

        let result = block_on(link.send_frame(&SampleBatch::new(None, &samples)));
        assert_eq!(result, Err(DeliveryError::NotConnected));
        assert_eq!(link.transport().0.sent.len(), 1);
    }

    #[test]
    fn connect_waits_for_room_in_full_queue() {
        let events = Events::new();
        let mut link = NotificationLink::new(events.receiver(), MockTransport::new(&events), multi_device());
        for _ in 0..EVENT_QUEUE_DEPTH {
            events.try_send(TransportEvent::TransmitComplete).unwrap();
        }
        assert!(events.try_send(TransportEvent::Connected(ConnHandle(3))).is_err());

        let sender = events.sender();
        block_on(join(sender.send(TransportEvent::Connected(ConnHandle(3))), async {
            for _ in 0..=EVENT_QUEUE_DEPTH {
                link.next_event().await;
            }
        }));

        assert!(link.is_connected());
        assert!(events.is_empty());
    }
}
