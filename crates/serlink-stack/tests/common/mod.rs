#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serlink_frame::{append_fcs, destuff, encode_frame, verify_fcs};
use serlink_stack::{ArqConfig, ArqFrame, Context, Layer, Stack, StackBuilder, StackConfig};
use serlink_transport::{ByteStream, Poller};

pub const ACK_TIMEOUT: Duration = Duration::from_millis(50);

/// What happens to the next write on a wire end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    /// XOR `mask` into the byte at `index`.
    Corrupt { index: usize, mask: u8 },
}

#[derive(Debug, Default)]
pub struct WireControl {
    /// Fates for upcoming writes; writes past the plan are delivered.
    pub plan: VecDeque<Fate>,
    /// Drop every write.
    pub blackhole: bool,
    /// Every write made on this end, as written.
    pub log: Vec<Vec<u8>>,
}

type Queue = Rc<RefCell<VecDeque<u8>>>;

/// One end of an in-memory null-modem cable. Nothing to poll; tests drive
/// the reading side by hand.
pub struct MemoryWire {
    inbound: Queue,
    outbound: Queue,
    control: Rc<RefCell<WireControl>>,
}

impl MemoryWire {
    pub fn pair() -> (MemoryWire, MemoryWire) {
        let a_to_b = Queue::default();
        let b_to_a = Queue::default();
        let a = MemoryWire {
            inbound: b_to_a.clone(),
            outbound: a_to_b.clone(),
            control: Rc::default(),
        };
        let b = MemoryWire {
            inbound: a_to_b,
            outbound: b_to_a,
            control: Rc::default(),
        };
        (a, b)
    }
}

impl Read for MemoryWire {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut inbound = self.inbound.borrow_mut();
        if inbound.is_empty() {
            return Err(std::io::Error::from(ErrorKind::WouldBlock));
        }
        let n = buf.len().min(inbound.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryWire {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut control = self.control.borrow_mut();
        control.log.push(buf.to_vec());
        let fate = control.plan.pop_front().unwrap_or(Fate::Deliver);
        if control.blackhole {
            return Ok(buf.len());
        }
        match fate {
            Fate::Deliver => self.outbound.borrow_mut().extend(buf),
            Fate::Drop => {}
            Fate::Corrupt { index, mask } => {
                let mut bytes = buf.to_vec();
                bytes[index] ^= mask;
                self.outbound.borrow_mut().extend(bytes);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ByteStream for MemoryWire {
    fn poll_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Application end of a stack: records what is delivered.
struct AppSink {
    delivered: Rc<RefCell<Vec<Bytes>>>,
}

impl Layer for AppSink {
    fn name(&self) -> &'static str {
        "app"
    }

    fn send_downward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        cx.pass_down(data);
    }

    fn deliver_upward(&mut self, data: Bytes, _cx: &mut Context<'_>) {
        self.delivered.borrow_mut().push(data);
    }
}

pub struct Peer {
    pub stack: Stack,
    pub poller: Poller,
    pub delivered: Rc<RefCell<Vec<Bytes>>>,
    /// Controls writes made by this peer.
    pub wire: Rc<RefCell<WireControl>>,
    /// Bytes waiting for this peer to read.
    pub inbound: Queue,
}

/// Index of the framing layer under the app, ARQ and detection layers.
const FRAMING: usize = 3;

impl Peer {
    pub fn new(wire: MemoryWire) -> Self {
        let config = StackConfig {
            arq: ArqConfig {
                ack_timeout: ACK_TIMEOUT,
                ..ArqConfig::default()
            },
            ..StackConfig::default()
        };
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let control = wire.control.clone();
        let inbound = wire.inbound.clone();
        let mut poller = Poller::new();
        let stack = StackBuilder::new()
            .layer(AppSink {
                delivered: delivered.clone(),
            })
            .reliable(wire, &config)
            .build(&mut poller)
            .unwrap();
        Peer {
            stack,
            poller,
            delivered,
            wire: control,
            inbound,
        }
    }

    pub fn submit(&mut self, payload: &[u8]) {
        self.stack
            .submit(Bytes::copy_from_slice(payload), &mut self.poller);
    }

    /// Read whatever is waiting. Returns false if nothing was.
    pub fn read(&mut self) -> bool {
        if self.inbound.borrow().is_empty() {
            return false;
        }
        self.stack.drive_readable(FRAMING, &mut self.poller);
        true
    }

    /// Let every timer due within one ACK interval fire.
    pub fn expire_timers(&mut self) -> usize {
        let later = Instant::now() + ACK_TIMEOUT + Duration::from_millis(5);
        self.poller.dispatch_expired(later, &mut self.stack)
    }

    pub fn delivered(&self) -> Vec<Bytes> {
        self.delivered.borrow().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.wire.borrow().log.clone()
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.inbound.borrow_mut().extend(bytes);
    }
}

pub fn peers() -> (Peer, Peer) {
    let (a, b) = MemoryWire::pair();
    (Peer::new(a), Peer::new(b))
}

/// Move bytes until both directions are quiet.
pub fn pump(a: &mut Peer, b: &mut Peer) {
    for _ in 0..1000 {
        let moved_a = a.read();
        let moved_b = b.read();
        if !moved_a && !moved_b {
            return;
        }
    }
    panic!("link never went quiet");
}

/// The exact wire bytes the stack produces for an ARQ frame.
pub fn wire_bytes(frame: &ArqFrame) -> Vec<u8> {
    let mut protected = BytesMut::new();
    append_fcs(&frame.encode(), &mut protected);
    let mut wire = BytesMut::new();
    encode_frame(&protected, &mut wire);
    wire.to_vec()
}

/// Undo framing and error detection on one logged write.
pub fn decode_write(write: &[u8]) -> ArqFrame {
    let body = destuff(&write[1..write.len() - 1]).unwrap();
    let payload = verify_fcs(&body).unwrap();
    ArqFrame::decode(&payload).unwrap()
}
