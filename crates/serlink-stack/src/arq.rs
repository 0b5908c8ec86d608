//! Stop-and-wait ARQ with an alternating sequence bit.
//!
//! Every frame carries a two byte header:
//!
//! ```text
//! ┌──────┬─────┬──────────────────┐
//! │ type │ seq │ payload (DATA)   │
//! │ 0/1  │ 0/1 │                  │
//! └──────┴─────┴──────────────────┘
//! ```
//!
//! The sender keeps one DATA frame in flight and retransmits it, byte for
//! byte, whenever the acknowledgement timer expires. The receiver delivers
//! each sequence number once and acknowledges every DATA frame it sees,
//! repeats included.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serlink_transport::{Poller, TimerHandle, Token};
use tracing::{debug, error, trace, warn};

use crate::layer::{Context, Layer};

/// Header type byte of a DATA frame.
pub const TYPE_DATA: u8 = 0;

/// Header type byte of an ACK frame.
pub const TYPE_ACK: u8 = 1;

/// Size of the ARQ header in bytes.
pub const HEADER_LEN: usize = 2;

/// Default time to wait for an acknowledgement before retransmitting.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// The alternating sequence bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Seq(bool);

impl Seq {
    pub const ZERO: Seq = Seq(false);
    pub const ONE: Seq = Seq(true);

    /// The other sequence number.
    #[must_use]
    pub fn flip(self) -> Seq {
        Seq(!self.0)
    }

    pub fn from_u8(value: u8) -> Option<Seq> {
        match value {
            0 => Some(Seq::ZERO),
            1 => Some(Seq::ONE),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        u8::from(self.0)
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArqError {
    #[error("frame of {0} bytes is shorter than the header")]
    Truncated(usize),

    #[error("unknown frame type {0}")]
    UnknownType(u8),

    #[error("invalid sequence number {0}")]
    InvalidSequence(u8),
}

/// A decoded ARQ frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArqFrame {
    Data { seq: Seq, payload: Bytes },
    Ack { seq: Seq },
}

impl ArqFrame {
    pub fn decode(raw: &Bytes) -> Result<Self, ArqError> {
        if raw.len() < HEADER_LEN {
            return Err(ArqError::Truncated(raw.len()));
        }
        let seq = Seq::from_u8(raw[1]).ok_or(ArqError::InvalidSequence(raw[1]))?;
        match raw[0] {
            TYPE_DATA => Ok(ArqFrame::Data {
                seq,
                payload: raw.slice(HEADER_LEN..),
            }),
            // Anything after an ACK header is ignored.
            TYPE_ACK => Ok(ArqFrame::Ack { seq }),
            other => Err(ArqError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            ArqFrame::Data { seq, payload } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
                buf.put_u8(TYPE_DATA);
                buf.put_u8(seq.as_u8());
                buf.put_slice(payload);
                buf.freeze()
            }
            ArqFrame::Ack { seq } => Bytes::copy_from_slice(&[TYPE_ACK, seq.as_u8()]),
        }
    }

    pub fn seq(&self) -> Seq {
        match self {
            ArqFrame::Data { seq, .. } | ArqFrame::Ack { seq } => *seq,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArqConfig {
    /// How long to wait for an acknowledgement before resending.
    pub ack_timeout: Duration,
    /// Give up on a payload after this many retransmissions. `None` retries
    /// forever.
    pub max_retransmissions: Option<u32>,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retransmissions: None,
        }
    }
}

/// Sender side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Nothing in flight.
    Idle,
    /// One DATA frame in flight, timer armed.
    WaitAck,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArqStats {
    /// First transmissions of DATA frames.
    pub data_sent: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    /// DATA frames received again after they were delivered.
    pub duplicates: u64,
    pub delivered: u64,
    /// Payloads given up on after too many retransmissions.
    pub abandoned: u64,
}

pub struct ArqLayer {
    config: ArqConfig,
    timer: Option<TimerHandle>,
    sender: SenderState,
    send_seq: Seq,
    expected_seq: Seq,
    queue: VecDeque<Bytes>,
    /// Encoded DATA frame for the head of the queue while in flight.
    in_flight: Option<Bytes>,
    retries: u32,
    stats: ArqStats,
}

impl Default for ArqLayer {
    fn default() -> Self {
        Self::new(ArqConfig::default())
    }
}

impl ArqLayer {
    pub fn new(config: ArqConfig) -> Self {
        Self {
            config,
            timer: None,
            sender: SenderState::Idle,
            send_seq: Seq::ZERO,
            expected_seq: Seq::ZERO,
            queue: VecDeque::new(),
            in_flight: None,
            retries: 0,
            stats: ArqStats::default(),
        }
    }

    pub fn sender_state(&self) -> SenderState {
        self.sender
    }

    /// Sequence number of the frame in flight, or of the next one sent.
    pub fn send_seq(&self) -> Seq {
        self.send_seq
    }

    /// Sequence number the receiver will deliver next.
    pub fn expected_seq(&self) -> Seq {
        self.expected_seq
    }

    /// Payloads not yet acknowledged, the one in flight included.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> ArqStats {
        self.stats
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    fn arm(&self, poller: &mut Poller) {
        if let Some(timer) = self.timer {
            timer.arm(poller);
        }
    }

    fn disarm(&self, poller: &mut Poller) {
        if let Some(timer) = self.timer {
            timer.disarm(poller);
        }
    }

    /// Put the head of the queue on the wire, or go idle if there is none.
    fn transmit_head(&mut self, cx: &mut Context<'_>) {
        let Some(head) = self.queue.front() else {
            self.sender = SenderState::Idle;
            self.in_flight = None;
            self.disarm(cx.poller());
            return;
        };

        let frame = ArqFrame::Data {
            seq: self.send_seq,
            payload: head.clone(),
        }
        .encode();
        debug!(seq = %self.send_seq, len = head.len(), "sending data");
        self.in_flight = Some(frame.clone());
        self.retries = 0;
        self.sender = SenderState::WaitAck;
        self.stats.data_sent += 1;
        cx.pass_down(frame);
        self.arm(cx.poller());
    }

    fn send_ack(&mut self, seq: Seq, cx: &mut Context<'_>) {
        trace!(%seq, "sending ack");
        self.stats.acks_sent += 1;
        cx.pass_down(ArqFrame::Ack { seq }.encode());
    }

    fn on_ack(&mut self, seq: Seq, cx: &mut Context<'_>) {
        if self.sender != SenderState::WaitAck {
            debug!(%seq, "ack while idle, ignored");
            return;
        }
        if seq != self.send_seq {
            debug!(%seq, expected = %self.send_seq, "stale ack, ignored");
            return;
        }

        debug!(%seq, "ack received");
        self.queue.pop_front();
        self.send_seq = self.send_seq.flip();
        self.in_flight = None;
        self.disarm(cx.poller());
        self.transmit_head(cx);
    }

    fn on_data(&mut self, seq: Seq, payload: Bytes, cx: &mut Context<'_>) {
        if seq == self.expected_seq {
            debug!(%seq, len = payload.len(), "data accepted");
            self.stats.delivered += 1;
            cx.pass_up(payload);
            self.send_ack(seq, cx);
            self.expected_seq = self.expected_seq.flip();
        } else {
            // Our ACK for it was lost; acknowledge again, deliver nothing.
            debug!(%seq, expected = %self.expected_seq, "duplicate data, re-acknowledged");
            self.stats.duplicates += 1;
            self.send_ack(seq, cx);
        }
    }
}

impl Layer for ArqLayer {
    fn name(&self) -> &'static str {
        "arq"
    }

    fn attach(&mut self, poller: &mut Poller) -> Option<Token> {
        let token = poller.register(None, Some(self.config.ack_timeout));
        self.timer = Some(TimerHandle::new(token));
        Some(token)
    }

    fn send_downward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        self.queue.push_back(data);
        match self.sender {
            SenderState::Idle => self.transmit_head(cx),
            SenderState::WaitAck => trace!(queued = self.queue.len(), "queued behind frame in flight"),
        }
    }

    fn deliver_upward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        match ArqFrame::decode(&data) {
            Ok(ArqFrame::Ack { seq }) => self.on_ack(seq, cx),
            Ok(ArqFrame::Data { seq, payload }) => self.on_data(seq, payload, cx),
            Err(err) => warn!(error = %err, len = data.len(), "undecodable frame dropped"),
        }
    }

    fn on_timeout(&mut self, cx: &mut Context<'_>) {
        if self.sender != SenderState::WaitAck {
            trace!("ack timer fired while idle");
            return;
        }
        let Some(frame) = self.in_flight.clone() else {
            return;
        };

        if self
            .config
            .max_retransmissions
            .is_some_and(|max| self.retries >= max)
        {
            error!(
                seq = %self.send_seq,
                retries = self.retries,
                "no acknowledgement, payload abandoned"
            );
            self.stats.abandoned += 1;
            self.queue.pop_front();
            self.in_flight = None;
            self.transmit_head(cx);
            return;
        }

        self.retries += 1;
        self.stats.retransmissions += 1;
        debug!(seq = %self.send_seq, attempt = self.retries, "ack timeout, retransmitting");
        cx.pass_down(frame);
        self.arm(cx.poller());
    }
}

impl std::fmt::Debug for ArqLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArqLayer")
            .field("sender", &self.sender)
            .field("send_seq", &self.send_seq)
            .field("expected_seq", &self.expected_seq)
            .field("queued", &self.queue.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::layer::{Direction, Transfer};

    struct Harness {
        layer: ArqLayer,
        poller: Poller,
        token: Token,
    }

    impl Harness {
        fn new(config: ArqConfig) -> Self {
            let mut layer = ArqLayer::new(config);
            let mut poller = Poller::new();
            let token = layer.attach(&mut poller).unwrap();
            Self {
                layer,
                poller,
                token,
            }
        }

        fn send(&mut self, payload: &'static [u8]) -> Vec<Transfer> {
            let mut cx = Context::new(&mut self.poller);
            self.layer.send_downward(Bytes::from_static(payload), &mut cx);
            cx.into_transfers()
        }

        fn receive(&mut self, frame: ArqFrame) -> Vec<Transfer> {
            self.receive_raw(frame.encode())
        }

        fn receive_raw(&mut self, raw: Bytes) -> Vec<Transfer> {
            let mut cx = Context::new(&mut self.poller);
            self.layer.deliver_upward(raw, &mut cx);
            cx.into_transfers()
        }

        fn timeout(&mut self) -> Vec<Transfer> {
            let mut cx = Context::new(&mut self.poller);
            self.layer.on_timeout(&mut cx);
            cx.into_transfers()
        }

        fn armed(&self) -> bool {
            self.poller.is_armed(self.token)
        }
    }

    fn down(frame: ArqFrame) -> Transfer {
        Transfer {
            direction: Direction::Down,
            data: frame.encode(),
        }
    }

    fn up(payload: &'static [u8]) -> Transfer {
        Transfer {
            direction: Direction::Up,
            data: Bytes::from_static(payload),
        }
    }

    fn data(seq: Seq, payload: &'static [u8]) -> ArqFrame {
        ArqFrame::Data {
            seq,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn seq_alternates() {
        assert_eq!(Seq::ZERO.flip(), Seq::ONE);
        assert_eq!(Seq::ONE.flip(), Seq::ZERO);
        assert_eq!(Seq::from_u8(1), Some(Seq::ONE));
        assert_eq!(Seq::from_u8(2), None);
    }

    #[test]
    fn header_layout() {
        assert_eq!(data(Seq::ONE, b"hi").encode().as_ref(), &[0, 1, b'h', b'i']);
        assert_eq!(ArqFrame::Ack { seq: Seq::ZERO }.encode().as_ref(), &[1, 0]);
    }

    #[test]
    fn decode_rejects_bad_frames() {
        assert_eq!(
            ArqFrame::decode(&Bytes::from_static(&[0])),
            Err(ArqError::Truncated(1))
        );
        assert_eq!(
            ArqFrame::decode(&Bytes::from_static(&[7, 0])),
            Err(ArqError::UnknownType(7))
        );
        assert_eq!(
            ArqFrame::decode(&Bytes::from_static(&[0, 2, b'x'])),
            Err(ArqError::InvalidSequence(2))
        );
        assert_eq!(
            ArqFrame::decode(&Bytes::from_static(&[0, 1])),
            Ok(data(Seq::ONE, b""))
        );
    }

    #[test]
    fn send_while_idle_transmits_and_arms() {
        let mut h = Harness::new(ArqConfig::default());
        assert_eq!(h.send(b"p1"), vec![down(data(Seq::ZERO, b"p1"))]);
        assert_eq!(h.layer.sender_state(), SenderState::WaitAck);
        assert!(h.armed());
    }

    #[test]
    fn send_while_waiting_only_queues() {
        let mut h = Harness::new(ArqConfig::default());
        h.send(b"p1");
        assert!(h.send(b"p2").is_empty());
        assert_eq!(h.layer.queued(), 2);
    }

    #[test]
    fn matching_ack_sends_next_head() {
        let mut h = Harness::new(ArqConfig::default());
        h.send(b"p1");
        h.send(b"p2");

        let out = h.receive(ArqFrame::Ack { seq: Seq::ZERO });
        assert_eq!(out, vec![down(data(Seq::ONE, b"p2"))]);
        assert_eq!(h.layer.sender_state(), SenderState::WaitAck);
        assert_eq!(h.layer.send_seq(), Seq::ONE);
        assert!(h.armed());

        assert!(h.receive(ArqFrame::Ack { seq: Seq::ONE }).is_empty());
        assert_eq!(h.layer.sender_state(), SenderState::Idle);
        assert_eq!(h.layer.send_seq(), Seq::ZERO);
        assert_eq!(h.layer.queued(), 0);
        assert!(!h.armed());
    }

    #[test]
    fn stale_or_idle_acks_are_ignored() {
        let mut h = Harness::new(ArqConfig::default());
        assert!(h.receive(ArqFrame::Ack { seq: Seq::ZERO }).is_empty());
        assert_eq!(h.layer.sender_state(), SenderState::Idle);

        h.send(b"p1");
        assert!(h.receive(ArqFrame::Ack { seq: Seq::ONE }).is_empty());
        assert_eq!(h.layer.sender_state(), SenderState::WaitAck);
        assert_eq!(h.layer.queued(), 1);
        assert!(h.armed());
    }

    #[test]
    fn timeout_retransmits_identical_bytes() {
        let mut h = Harness::new(ArqConfig::default());
        h.send(b"p1");
        h.receive(ArqFrame::Ack { seq: Seq::ZERO });
        let first = h.send(b"p2");
        assert_eq!(first, vec![down(data(Seq::ONE, b"p2"))]);

        for _ in 0..3 {
            // The poller disarms before calling back.
            h.poller.disarm_timeout(h.token).unwrap();
            assert_eq!(h.timeout(), first);
            assert!(h.armed());
        }
        assert_eq!(h.layer.stats().retransmissions, 3);
        assert_eq!(h.layer.stats().data_sent, 2);
    }

    #[test]
    fn timeout_while_idle_does_nothing() {
        let mut h = Harness::new(ArqConfig::default());
        assert!(h.timeout().is_empty());
        assert!(!h.armed());
    }

    #[test]
    fn expected_data_is_delivered_and_acknowledged() {
        let mut h = Harness::new(ArqConfig::default());
        let out = h.receive(data(Seq::ZERO, b"hello"));
        assert_eq!(
            out,
            vec![up(b"hello"), down(ArqFrame::Ack { seq: Seq::ZERO })]
        );
        assert_eq!(h.layer.expected_seq(), Seq::ONE);
    }

    #[test]
    fn duplicate_data_is_acknowledged_not_delivered() {
        let mut h = Harness::new(ArqConfig::default());
        h.receive(data(Seq::ZERO, b"x"));
        let out = h.receive(data(Seq::ZERO, b"x"));
        assert_eq!(out, vec![down(ArqFrame::Ack { seq: Seq::ZERO })]);
        assert_eq!(h.layer.expected_seq(), Seq::ONE);

        let stats = h.layer.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.acks_sent, 2);
    }

    #[test]
    fn receiver_is_independent_of_sender() {
        let mut h = Harness::new(ArqConfig::default());
        h.send(b"out");
        let out = h.receive(data(Seq::ZERO, b"in"));
        assert_eq!(out, vec![up(b"in"), down(ArqFrame::Ack { seq: Seq::ZERO })]);
        assert_eq!(h.layer.sender_state(), SenderState::WaitAck);
        assert_eq!(h.layer.send_seq(), Seq::ZERO);
    }

    #[test]
    fn undecodable_frames_are_dropped() {
        let mut h = Harness::new(ArqConfig::default());
        assert!(h.receive_raw(Bytes::from_static(&[9, 0, 1])).is_empty());
        assert!(h.receive_raw(Bytes::from_static(&[0])).is_empty());
        assert_eq!(h.layer.expected_seq(), Seq::ZERO);
    }

    #[test]
    fn bounded_retries_abandon_head_and_move_on() {
        let mut h = Harness::new(ArqConfig {
            max_retransmissions: Some(2),
            ..ArqConfig::default()
        });
        h.send(b"lost");
        h.send(b"next");

        assert_eq!(h.timeout(), vec![down(data(Seq::ZERO, b"lost"))]);
        assert_eq!(h.timeout(), vec![down(data(Seq::ZERO, b"lost"))]);
        // Third expiry: give up, keep the sequence number, send the next one.
        assert_eq!(h.timeout(), vec![down(data(Seq::ZERO, b"next"))]);
        assert_eq!(h.layer.stats().abandoned, 1);
        assert_eq!(h.layer.queued(), 1);
        assert_eq!(h.layer.send_seq(), Seq::ZERO);
    }

    #[test]
    fn abandoning_last_payload_goes_idle() {
        let mut h = Harness::new(ArqConfig {
            max_retransmissions: Some(0),
            ..ArqConfig::default()
        });
        h.send(b"lost");
        assert!(h.timeout().is_empty());
        assert_eq!(h.layer.sender_state(), SenderState::Idle);
        assert!(!h.armed());
    }

    #[test]
    fn timer_runs_on_ack_timeout() {
        let mut h = Harness::new(ArqConfig {
            ack_timeout: Duration::from_millis(30),
            ..ArqConfig::default()
        });
        let before = Instant::now();
        h.send(b"p");
        let after = Instant::now();
        let deadline = h.poller.deadline(h.token).unwrap();
        assert!(deadline >= before + Duration::from_millis(30));
        assert!(deadline <= after + Duration::from_millis(30));
    }
}
