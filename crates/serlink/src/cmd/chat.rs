use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serlink_stack::{ArqConfig, Context, Layer, StackBuilder, StackConfig};
use serlink_transport::{Poller, Token};
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, ChatArgs, TICK};
use crate::exit::{stack_error, CliResult, SUCCESS};
use crate::output::print_received;

const STDIN_CHUNK: usize = 8 * 1024;

pub fn run(args: ChatArgs) -> CliResult<i32> {
    let config = StackConfig {
        frame: args.frame.config()?,
        arq: ArqConfig {
            ack_timeout: parse_duration(&args.ack_timeout)?,
            max_retransmissions: args.max_retransmissions,
        },
    };
    let linger = parse_duration(&args.linger)?;
    let port = args.serial.open()?;
    info!(device = %args.serial.display(), baud = args.serial.baud, "chat session started");

    let mut poller = Poller::new();
    let mut stack = StackBuilder::new()
        .layer(Console::new(std::io::stdin(), linger))
        .reliable(port, &config)
        .build(&mut poller)
        .map_err(|err| stack_error("stack setup failed", err))?;

    let running = install_ctrlc_handler()?;
    stack
        .run(&mut poller, &running, TICK)
        .map_err(|err| stack_error("event loop failed", err))?;

    info!("chat session ended");
    Ok(SUCCESS)
}

/// Top of the chat stack: stdin lines go down, delivered payloads are
/// printed.
struct Console<R> {
    input: R,
    fd: RawFd,
    token: Option<Token>,
    line: Vec<u8>,
    linger: Duration,
    closed_at: Option<Instant>,
}

impl<R: Read + AsRawFd> Console<R> {
    fn new(input: R, linger: Duration) -> Self {
        let fd = input.as_raw_fd();
        Self {
            input,
            fd,
            token: None,
            line: Vec::new(),
            linger,
            closed_at: None,
        }
    }
}

impl<R: Read> Console<R> {
    /// Pass every complete line in the buffer down, newline stripped.
    fn flush_lines(&mut self, cx: &mut Context<'_>) {
        while let Some(end) = self.line.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.line.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            debug!(len = line.len(), "console line");
            cx.pass_down(Bytes::from(line));
        }
    }

    fn close(&mut self, cx: &mut Context<'_>) {
        if !self.line.is_empty() {
            let rest = std::mem::take(&mut self.line);
            cx.pass_down(Bytes::from(rest));
        }
        if let Some(token) = self.token {
            if let Err(err) = cx.poller().disable(token) {
                warn!(error = %err, "could not stop watching stdin");
            }
        }
        self.closed_at = Some(Instant::now());
    }
}

impl<R: Read> Layer for Console<R> {
    fn name(&self) -> &'static str {
        "console"
    }

    fn attach(&mut self, poller: &mut Poller) -> Option<Token> {
        let token = poller.register(Some(self.fd), None);
        self.token = Some(token);
        Some(token)
    }

    fn send_downward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        cx.pass_down(data);
    }

    fn deliver_upward(&mut self, data: Bytes, _cx: &mut Context<'_>) {
        print_received(&data);
    }

    fn on_readable(&mut self, cx: &mut Context<'_>) {
        let mut chunk = [0u8; STDIN_CHUNK];
        match self.input.read(&mut chunk) {
            Ok(0) => {
                info!("stdin closed");
                self.close(cx);
            }
            Ok(n) => {
                self.line.extend_from_slice(&chunk[..n]);
                self.flush_lines(cx);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(error = %err, "stdin read failed");
                self.close(cx);
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.closed_at
            .is_some_and(|closed| closed.elapsed() >= self.linger)
    }
}
