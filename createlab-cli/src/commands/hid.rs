//! USB HID commands: `list-hid` and `hid-send`.
//!
//! Both need the `hid` feature; without it they fail with a usage error.

use {
    crate::{Cli, HidSendArgs, config::Config},
    anyhow::Result,
};

#[cfg(feature = "hid")]
use {
    super::{close_queue, format_hex, report_response},
    anyhow::Context,
    console::style,
    createlab::{
        ClaimRegistry, HidCommandStrategy, HidDeviceSpec,
        connection::connect_hid,
        device::hid::list_hid_devices,
        hidapi::HidApi,
    },
    log::debug,
    std::time::Duration,
};

/// List HID devices.
#[cfg(feature = "hid")]
pub(crate) fn cmd_list_hid(json: bool) -> Result<()> {
    let api = HidApi::new().context("Failed to initialise the HID API")?;
    super::ports::print_descriptors(&list_hid_devices(&api), json, "HID devices")
}

/// Send one command to the first matching HID device.
#[cfg(feature = "hid")]
pub(crate) fn cmd_hid_send(cli: &Cli, config: &Config, args: &HidSendArgs) -> Result<()> {
    let api = HidApi::new().context("Failed to initialise the HID API")?;
    let spec = HidDeviceSpec::new(
        format!("HID {:04X}:{:04X}", args.vid, args.pid),
        args.vid,
        args.pid,
        args.input_len,
        args.output_len,
    );

    let registry = ClaimRegistry::new();
    let queue = connect_hid(&api, &spec, &registry, config.queue_settings())
        .with_context(|| format!("Failed to open {}", spec.name))?;

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {}",
            style("🔌").cyan(),
            spec.name,
            style(queue.name()).yellow()
        );
    }

    let read_timeout = Duration::from_millis(args.timeout_ms);
    debug!("Sending {} over HID", format_hex(&args.command.0));
    let strategy =
        HidCommandStrategy::new(args.command.0.clone(), args.response_size).with_read_timeout(read_timeout);
    let timeout = queue.settings().task_timeout.max(read_timeout * 2);
    let response = queue.execute_with_timeout(strategy, timeout);
    close_queue(&queue);

    report_response(&response?, args.json)
}

#[cfg(not(feature = "hid"))]
fn hid_unavailable() -> anyhow::Error {
    crate::CliError::Usage(
        "this build has no HID support; rebuild with `--features hid`".to_string(),
    )
    .into()
}

/// List HID devices.
#[cfg(not(feature = "hid"))]
pub(crate) fn cmd_list_hid(_json: bool) -> Result<()> {
    Err(hid_unavailable())
}

/// Send one command to the first matching HID device.
#[cfg(not(feature = "hid"))]
pub(crate) fn cmd_hid_send(_cli: &Cli, _config: &Config, _args: &HidSendArgs) -> Result<()> {
    Err(hid_unavailable())
}
