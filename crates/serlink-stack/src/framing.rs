//! Framing layer: the bottom of a stack, talking to the byte stream.

use bytes::Bytes;
use serlink_frame::{FrameConfig, FrameReader, FsmState, OutboundBuffer, TimerAction};
use serlink_transport::{ByteStream, Poller, TimerHandle, Token};
use tracing::{debug, error, warn};

use crate::layer::{Context, Layer};

/// Wire bytes the layer holds for a stalled stream before it starts
/// dropping new frames.
pub const OUTBOUND_LIMIT: usize = 64 * 1024;

/// Delimits and byte-stuffs outgoing payloads, and reassembles incoming
/// ones with a frame timer guarding partial frames.
///
/// Writes never block: whatever the stream does not take at once stays
/// queued and goes out from the writable callback.
pub struct FramingLayer<S> {
    reader: FrameReader<S>,
    config: FrameConfig,
    outbound: OutboundBuffer,
    token: Option<Token>,
    timer: Option<TimerHandle>,
    closed: bool,
}

impl<S: ByteStream> FramingLayer<S> {
    pub fn new(stream: S) -> Self {
        Self::with_config(stream, FrameConfig::default())
    }

    pub fn with_config(stream: S, config: FrameConfig) -> Self {
        Self {
            reader: FrameReader::with_config(stream, &config),
            config,
            outbound: OutboundBuffer::new(),
            token: None,
            timer: None,
            closed: false,
        }
    }

    pub fn stream(&self) -> &S {
        self.reader.get_ref()
    }

    pub fn stream_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }

    pub fn fsm_state(&self) -> FsmState {
        self.reader.fsm().state()
    }

    /// The stream reported end of file.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wire bytes queued but not yet taken by the stream.
    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    /// Push queued bytes at the stream and keep write interest in step with
    /// what is left.
    fn flush_outbound(&mut self, poller: &mut Poller) {
        let drained = match self.outbound.flush_to(self.reader.get_mut()) {
            Ok(drained) => drained,
            Err(err) => {
                error!(
                    error = %err,
                    dropped = self.outbound.len(),
                    "write failed, queued frames dropped"
                );
                self.outbound.clear();
                true
            }
        };
        if !drained {
            debug!(pending = self.outbound.len(), "stream full, waiting to write");
        }
        if let Some(token) = self.token {
            if let Err(err) = poller.set_write_interest(token, !drained) {
                warn!(error = %err, "could not update write interest");
            }
        }
    }

    fn apply(&self, action: TimerAction, poller: &mut Poller) {
        let Some(timer) = self.timer else {
            return;
        };
        match action {
            TimerAction::Keep => {}
            TimerAction::Arm => timer.arm(poller),
            TimerAction::Disarm => timer.disarm(poller),
        }
    }
}

impl<S: ByteStream> Layer for FramingLayer<S> {
    fn name(&self) -> &'static str {
        "framing"
    }

    fn attach(&mut self, poller: &mut Poller) -> Option<Token> {
        let fd = self.reader.get_ref().poll_fd();
        let token = poller.register(fd, Some(self.config.frame_timeout));
        self.token = Some(token);
        self.timer = Some(TimerHandle::new(token));
        Some(token)
    }

    fn send_downward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        if self.outbound.len() >= OUTBOUND_LIMIT {
            warn!(
                len = data.len(),
                pending = self.outbound.len(),
                "outbound queue full, frame dropped"
            );
            return;
        }
        let wire = self.outbound.push_frame(&data);
        debug!(len = data.len(), wire, "frame queued");
        self.flush_outbound(cx.poller());
    }

    fn on_writable(&mut self, cx: &mut Context<'_>) {
        self.flush_outbound(cx.poller());
    }

    fn deliver_upward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        cx.pass_up(data);
    }

    fn on_readable(&mut self, cx: &mut Context<'_>) {
        let outcome = match self.reader.read_available() {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "read failed, no longer watching stream");
                self.stop_watching(cx.poller());
                return;
            }
        };

        if outcome.closed {
            warn!("stream closed by peer");
            self.closed = true;
            self.stop_watching(cx.poller());
            return;
        }

        if let Some(action) = outcome.timer {
            self.apply(action, cx.poller());
        }
        for frame in outcome.frames {
            cx.pass_up(frame);
        }
    }

    fn on_timeout(&mut self, cx: &mut Context<'_>) {
        let action = self.reader.timeout();
        self.apply(action, cx.poller());
    }

    // Nothing more will ever arrive.
    fn is_finished(&self) -> bool {
        self.closed
    }
}

impl<S> FramingLayer<S> {
    fn stop_watching(&self, poller: &mut Poller) {
        if let Some(token) = self.token {
            if let Err(err) = poller.disable(token) {
                warn!(error = %err, "could not disable stream interest");
            }
        }
    }
}
