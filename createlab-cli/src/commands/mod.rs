//! Command implementations.
//!
//! Each subcommand is implemented in its own module; output helpers shared
//! between them live here.

pub(crate) mod completions;
pub(crate) mod hid;
pub(crate) mod ports;
pub(crate) mod send;
pub(crate) mod watch;

use {
    anyhow::Result,
    createlab::{CommandQueue, CommandResponse, Transport},
    log::warn,
};

/// Bytes as space-separated upper-case hex.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print a command response and turn a failed one into an error.
///
/// Partial reply bytes are printed even when the read failed.
pub(crate) fn report_response(response: &CommandResponse, json: bool) -> Result<()> {
    let data = response.data().unwrap_or_default();

    if json {
        let value = serde_json::json!({
            "ok": response.is_success(),
            "write_ok": response.write_succeeded(),
            "read_ok": response.read_succeeded(),
            "data": format_hex(data),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !data.is_empty() {
        println!("{}", format_hex(data));
    }

    if response.is_success() {
        Ok(())
    } else if !response.write_succeeded() {
        anyhow::bail!("Device did not confirm the command")
    } else {
        anyhow::bail!("Incomplete reply ({} bytes received)", data.len())
    }
}

/// Shut a queue down, logging instead of failing.
pub(crate) fn close_queue<T: Transport>(queue: &CommandQueue<T>) {
    if let Err(e) = queue.shutdown() {
        warn!("Error closing {}: {e}", queue.name());
    }
}
