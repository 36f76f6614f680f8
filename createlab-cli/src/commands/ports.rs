//! Device listing.

use {
    anyhow::Result,
    console::style,
    createlab::{DeviceDescriptor, TransportKind, detect_serial_ports},
    serde_json::{Value, json},
};

/// List serial ports.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    print_descriptors(&detect_serial_ports(), json, "serial ports")
}

/// Print devices as a JSON array on stdout, or one summary line each.
pub(crate) fn print_descriptors(devices: &[DeviceDescriptor], json: bool, what: &str) -> Result<()> {
    if json {
        let list: Vec<Value> = devices.iter().map(descriptor_json).collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if devices.is_empty() {
        eprintln!("{} No {what} found", style("⚠").yellow());
        return Ok(());
    }

    eprintln!("{} Found {} {what}:", style("ℹ").blue(), devices.len());
    for device in devices {
        let line = if device.kind().is_known() {
            style(device.summary()).bold().to_string()
        } else {
            device.summary()
        };
        println!("  {} {line}", style("•").dim());
    }
    Ok(())
}

fn descriptor_json(device: &DeviceDescriptor) -> Value {
    json!({
        "path": device.path(),
        "name": device.name(),
        "transport": match device.transport() {
            TransportKind::Serial => "serial",
            TransportKind::Hid => "hid",
        },
        "kind": device.kind().name(),
        "vid": device.vendor_id(),
        "pid": device.product_id(),
    })
}
