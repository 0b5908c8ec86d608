use bytes::Bytes;
use serlink_stack::{Context, Layer, StackBuilder};
use serlink_transport::Poller;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, ListenArgs, TICK};
use crate::exit::{stack_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let frame_config = args.frame.config()?;
    let port = args.serial.open()?;
    let device = args.serial.display();
    info!(device = %device, baud = args.serial.baud, "listening");

    let mut poller = Poller::new();
    let mut stack = StackBuilder::new()
        .layer(Printer::new(device, format, args.count))
        .checked(port, &frame_config)
        .build(&mut poller)
        .map_err(|err| stack_error("stack setup failed", err))?;

    let running = install_ctrlc_handler()?;
    stack
        .run(&mut poller, &running, TICK)
        .map_err(|err| stack_error("event loop failed", err))?;

    Ok(SUCCESS)
}

/// Prints verified frames; finishes after `limit` of them.
struct Printer {
    device: String,
    format: OutputFormat,
    limit: Option<usize>,
    printed: usize,
}

impl Printer {
    fn new(device: String, format: OutputFormat, limit: Option<usize>) -> Self {
        Self {
            device,
            format,
            limit,
            printed: 0,
        }
    }
}

impl Layer for Printer {
    fn name(&self) -> &'static str {
        "printer"
    }

    fn send_downward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        cx.pass_down(data);
    }

    fn deliver_upward(&mut self, data: Bytes, _cx: &mut Context<'_>) {
        if self.is_finished() {
            return;
        }
        self.printed = self.printed.saturating_add(1);
        print_frame(&data, &self.device, self.printed, self.format);
    }

    fn is_finished(&self) -> bool {
        self.limit.is_some_and(|limit| self.printed >= limit)
    }
}
