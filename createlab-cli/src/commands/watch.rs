//! `watch`: ping a serial device until it goes away or Ctrl-C is pressed.

use {
    super::{close_queue, send::echo_strategy},
    crate::{Cli, WatchArgs, config::Config, open_serial},
    anyhow::{Context, Result},
    console::style,
    createlab::{ConnectionState, DevicePinger, PingSettings},
    log::info,
    std::{
        sync::{Arc, mpsc},
        time::Duration,
    },
};

enum WatchEvent {
    Interrupted,
    Lost(String),
}

/// Watch the selected device.
pub(crate) fn cmd_watch(cli: &Cli, config: &mut Config, args: &WatchArgs) -> Result<()> {
    let io = config.io_settings();
    let queue = Arc::new(open_serial(cli, config, &args.handshake)?);

    let (tx, rx) = mpsc::channel();
    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(WatchEvent::Interrupted);
    })
    .context("Failed to install Ctrl-C handler")?;

    let ping = args.ping.0.clone();
    let response_size = args.response_size;
    let settings = PingSettings::default()
        .with_interval(Duration::from_millis(args.interval_ms))
        .with_failure_threshold(args.failures);

    let mut pinger = DevicePinger::start(
        Arc::clone(&queue),
        move || echo_strategy(ping.clone(), response_size, io),
        settings,
        move |state: &ConnectionState| {
            if let ConnectionState::Disconnected { reason } = state {
                let _ = tx.send(WatchEvent::Lost(reason.clone()));
            }
        },
    )?;

    if !cli.quiet {
        eprintln!(
            "{} Watching {} every {:?} (Ctrl-C to stop)",
            style("👀").cyan(),
            style(queue.name()).yellow(),
            settings.interval
        );
    }

    // The Ctrl-C handler keeps a sender alive, so this only returns on an event.
    let event = rx.recv().unwrap_or(WatchEvent::Interrupted);
    pinger.stop();
    close_queue(&queue);

    match event {
        WatchEvent::Interrupted => {
            info!("Stopped watching {}", queue.name());
            Ok(())
        },
        WatchEvent::Lost(reason) => {
            anyhow::bail!("Lost connection to {}: {reason}", queue.name())
        },
    }
}
