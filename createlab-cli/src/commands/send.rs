//! Serial commands: `send` and `handshake`.

use {
    super::{close_queue, format_hex, report_response},
    crate::{Cli, HandshakeArgs, LengthField, SendArgs, config::Config, open_serial},
    anyhow::Result,
    byteorder::{BigEndian, LittleEndian},
    console::style,
    createlab::{
        CommandStrategy, FixedReturnValueStrategy, IoSettings, NativeSerialPort,
        NoReturnValueStrategy, VariableLengthReturnValueStrategy,
    },
    log::debug,
};

/// Strategy over a native serial port.
pub(crate) type SerialStrategy = Box<dyn CommandStrategy<NativeSerialPort>>;

/// Echo-verified command with an optional fixed-size reply.
pub(crate) fn echo_strategy(command: Vec<u8>, response_size: usize, io: IoSettings) -> SerialStrategy {
    if response_size == 0 {
        Box::new(NoReturnValueStrategy::new(command).with_settings(io))
    } else {
        Box::new(FixedReturnValueStrategy::new(command, response_size).with_settings(io))
    }
}

/// Pick the strategy matching the reply shape in `args`.
fn build_strategy(args: &SendArgs, io: IoSettings) -> Result<SerialStrategy> {
    let command = args.command.0.clone();

    let (Some(header), Some(offset)) = (args.header_size, args.length_offset) else {
        return Ok(echo_strategy(command, args.response_size.unwrap_or(0), io));
    };

    let strategy = match args.length_field {
        LengthField::U8 => VariableLengthReturnValueStrategy::with_u8_length(command, header, offset)?,
        LengthField::U16Be => {
            VariableLengthReturnValueStrategy::with_u16_length::<BigEndian>(command, header, offset)?
        },
        LengthField::U16Le => {
            VariableLengthReturnValueStrategy::with_u16_length::<LittleEndian>(
                command, header, offset,
            )?
        },
    };
    Ok(Box::new(strategy.with_settings(io)))
}

/// Send one command and print the reply.
pub(crate) fn cmd_send(cli: &Cli, config: &mut Config, args: &SendArgs) -> Result<()> {
    let io = config.io_settings();
    let strategy = build_strategy(args, io)?;
    let queue = open_serial(cli, config, &args.handshake)?;

    debug!(
        "Sending {} with {}",
        format_hex(&args.command.0),
        strategy.label()
    );
    // Leave room for every echo retry plus header and body reads.
    let timeout = queue
        .settings()
        .task_timeout
        .max(io.worst_case_write() + io.read_timeout * 2);
    let response = queue.execute_with_timeout(strategy, timeout);
    close_queue(&queue);

    report_response(&response?, args.json)
}

/// Open the port, run the handshake and close again.
pub(crate) fn cmd_handshake(cli: &Cli, config: &mut Config, args: &HandshakeArgs) -> Result<()> {
    let queue = open_serial(cli, config, args)?;
    close_queue(&queue);

    if !cli.quiet {
        eprintln!("{} Handshake complete", style("✓").green());
    }
    Ok(())
}
