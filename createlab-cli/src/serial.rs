//! Interactive serial port selection.
//!
//! Ports are picked in this order:
//! - the port given on the command line or in the config
//! - the only known device (CREATE Lab or a recognised USB bridge)
//! - an interactive choice via dialoguer
//!
//! Non-interactive mode never prompts; ambiguity is a usage error.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    createlab::{DeviceDescriptor, detect_serial_ports},
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer all ports, not only recognised devices.
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port.
    pub port: DeviceDescriptor,
    /// Whether this port matched a known or configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("port selection cancelled".to_string()).into()
}

fn select_non_interactive_port(
    selection_ports: Vec<DeviceDescriptor>,
    config: &Config,
) -> Result<SelectedPort> {
    let mut ports = selection_ports.into_iter();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(SelectedPort {
            is_known: is_known_device(&port, config),
            port,
        }),
        (Some(_), Some(_)) => Err(usage_err(
            "multiple serial ports found; pass --port to choose one",
        )),
        (None, _) => Err(usage_err("no serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, config));
    }

    // If port in config, use it
    if let Some(port_name) = &config.serial.port {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, config));
    }

    let ports = detect_serial_ports();
    if ports.is_empty() {
        return Err(usage_err("no serial ports found"));
    }

    let known_ports: Vec<DeviceDescriptor> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();

    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports, config)
        },
        Ordering::Equal => {
            let selected = select_non_interactive_port(selection_ports, config)?;
            if selected.is_known {
                info!("Auto-selected port: {}", selected.port.summary());
                Ok(selected)
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(selected.port)
            }
        },
        Ordering::Less => Err(usage_err("no serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "port selection needs a terminal; pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err(&format!("prompt failed: {io_err}"))
            }
        },
    }
}

/// Find a port by name, falling back to a bare descriptor for ports the
/// OS does not enumerate (Bluetooth, pseudo terminals).
fn find_port_by_name(name: &str, config: &Config) -> SelectedPort {
    let ports = detect_serial_ports();

    let port = ports
        .iter()
        .find(|p| p.path() == name)
        .or_else(|| ports.iter().find(|p| p.path().eq_ignore_ascii_case(name)))
        .cloned()
        .unwrap_or_else(|| DeviceDescriptor::serial(name));

    SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    }
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &DeviceDescriptor, config: &Config) -> bool {
    if port.kind().is_known() {
        return true;
    }

    match (port.vendor_id(), port.product_id()) {
        (Some(vid), Some(pid)) => config
            .serial
            .usb_device
            .iter()
            .any(|d| d.matches(vid, pid)),
        _ => false,
    }
}

fn select_port_interactive(
    mut ports: Vec<DeviceDescriptor>,
    config: &Config,
) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Known devices first
    ports.sort_by_key(|p| !is_known_device(p, config));

    // Truncate labels so narrow terminals don't wrap.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| {
            let label = if is_known_device(port, config) {
                style(port.summary()).bold().to_string()
            } else {
                port.summary()
            };
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    let index = selection.ok_or_else(cancelled)?;
    let port = ports
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
    let is_known = is_known_device(&port, config);
    Ok(SelectedPort { port, is_known })
}

/// Confirm use of a single unrecognised port.
fn confirm_single_port(port: DeviceDescriptor) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port.summary()))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(cancelled())
    }
}

/// Ask user if they want to remember this port's USB ids.
pub fn ask_remember_port(port: &DeviceDescriptor, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vendor_id(), port.product_id()) else {
        return Ok(());
    };
    if config.serial.usb_device.iter().any(|d| d.matches(vid, pid)) {
        return Ok(());
    }
    if ensure_interactive_terminal().is_err() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {vid:04X}:{pid:04X} as a known device?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        console::{measure_text_width, truncate_str},
        createlab::DeviceKind,
    };

    fn cli_error(err: &anyhow::Error) -> &CliError {
        err.downcast_ref::<CliError>()
            .expect("expected CliError")
    }

    // ---- is_known_device ----

    #[test]
    fn test_is_known_device_builtin() {
        let port = DeviceDescriptor::usb_serial("/dev/ttyACM0", 0x2354, 0x1111);
        assert_eq!(port.kind(), DeviceKind::CreateLab);
        assert!(is_known_device(&port, &Config::default()));
    }

    #[test]
    fn test_is_known_device_bridge() {
        let port = DeviceDescriptor::usb_serial("/dev/ttyUSB0", 0x1A86, 0x7523);
        assert!(is_known_device(&port, &Config::default()));
    }

    #[test]
    fn test_is_known_device_unknown() {
        let port = DeviceDescriptor::usb_serial("/dev/ttyUSB0", 0x9999, 0x9999);
        assert!(!is_known_device(&port, &Config::default()));
    }

    #[test]
    fn test_is_known_device_from_config() {
        let port = DeviceDescriptor::usb_serial("/dev/ttyUSB0", 0xABCD, 0x1234);
        let mut config = Config::default();
        config.serial.usb_device.push(crate::config::UsbDevice {
            vid: 0xABCD,
            pid: 0x1234,
        });
        assert!(is_known_device(&port, &config));
    }

    #[test]
    fn test_is_known_device_no_vid_pid() {
        let port = DeviceDescriptor::serial("/dev/rfcomm0");
        assert!(!is_known_device(&port, &Config::default()));
    }

    // ---- explicit ports ----

    #[test]
    fn test_explicit_port_not_enumerated_is_used_as_is() {
        let options = SerialOptions {
            port: Some("/dev/does-not-exist-createlab".to_string()),
            ..Default::default()
        };
        let selected = select_serial_port(&options, &Config::default()).unwrap();
        assert_eq!(selected.port.path(), "/dev/does-not-exist-createlab");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_config_port_used_when_no_flag() {
        let mut config = Config::default();
        config.serial.port = Some("/dev/from-config".to_string());
        let selected = select_serial_port(&SerialOptions::default(), &config).unwrap();
        assert_eq!(selected.port.path(), "/dev/from-config");
    }

    // ---- non-interactive selection ----

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![
            DeviceDescriptor::serial("/dev/ttyUSB0"),
            DeviceDescriptor::serial("/dev/ttyUSB1"),
        ];
        let err = select_non_interactive_port(ports, &Config::default())
            .err()
            .expect("expected error");
        assert!(matches!(cli_error(&err), CliError::Usage(_)));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![], &Config::default())
            .err()
            .expect("expected error");
        assert!(matches!(cli_error(&err), CliError::Usage(_)));
    }

    #[test]
    fn test_select_non_interactive_single_port_returns_selected_port() {
        let ports = vec![DeviceDescriptor::usb_serial("/dev/ttyACM0", 0x2354, 0x0001)];
        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.path(), "/dev/ttyACM0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_truncated_label_fits_width() {
        let port = DeviceDescriptor::usb_serial("/dev/verylongttyusb0", 0x1A86, 0x7523)
            .with_name("Very Long Product Name That Would Wrap");
        let label = style(port.summary()).bold().to_string();
        let truncated = truncate_str(&label, 26, "\u{2026}").into_owned();
        assert!(measure_text_width(&truncated) <= 26);
    }
}
