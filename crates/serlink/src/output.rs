use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    device: &'a str,
    sequence: usize,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

/// Print one verified payload received on `device`. `sequence` counts
/// frames from 1.
pub fn print_frame(payload: &[u8], device: &str, sequence: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                device,
                sequence,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "SIZE", "DEVICE", "PAYLOAD"])
                .add_row(vec![
                    sequence.to_string(),
                    payload.len().to_string(),
                    device.to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{} size={} device={} payload={}",
                sequence,
                payload.len(),
                device,
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(payload);
        }
    }
}

/// Chat-style rendering of a delivered payload.
pub fn print_received(payload: &[u8]) {
    println!("RX: {}", String::from_utf8_lossy(payload));
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
