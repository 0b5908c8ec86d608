use std::fs;

use serlink_frame::FrameWriter;
use tracing::info;

use crate::cmd::SendArgs;
use crate::exit::{frame_error, io_error, transport_error, CliResult, SUCCESS};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let port = args.serial.open()?;
    // One frame and done: let the kernel wait for room in the output queue.
    port.stream()
        .set_nonblocking(false)
        .map_err(|err| transport_error("could not switch device to blocking", err))?;

    let mut writer = FrameWriter::new(port);
    let written = if args.no_checksum {
        writer.send(&payload)
    } else {
        writer.send_checked(&payload)
    }
    .map_err(|err| frame_error("send failed", err))?;

    info!(
        device = %args.serial.display(),
        payload = payload.len(),
        wire = written,
        "frame sent"
    );
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
