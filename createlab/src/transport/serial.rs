//! Native serial port adapter using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        transport::{DataBits, FlowControl, Parity, SerialConfig, SerialIo, StopBits, Transport},
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::io::{ErrorKind, Read, Write},
};

/// An open serial port exposed through [`SerialIo`].
pub struct NativeSerialPort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativeSerialPort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()?;

        debug!(
            "Opened serial port {} at {} baud",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            baud_rate: config.baud_rate,
        })
    }

    /// Current baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Discard anything sitting in the OS input and output buffers.
    pub fn clear_buffers(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            Error::Serial(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "Port is closed",
            ))
        })
    }
}

impl Transport for NativeSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the OS descriptor.
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.name);
        }
        Ok(())
    }
}

impl SerialIo for NativeSerialPort {
    fn read_one_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        match self.port_mut()?.read(&mut buf) {
            Ok(1) => {
                trace!("RX 0x{:02X}", buf[0]);
                Ok(buf[0])
            },
            Ok(_) => Err(Error::EndOfStream),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                Err(Error::Timeout("serial read: no data".into()))
            },
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(Error::EndOfStream),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn is_data_available(&mut self) -> Result<bool> {
        Ok(self.port_mut()?.bytes_to_read()? > 0)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("TX {} bytes: {bytes:02X?}", bytes.len());
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/createlab-does-not-exist", 57600);
        assert!(NativeSerialPort::open(&config).is_err());
    }

    #[test]
    fn test_flow_control_conversion() {
        assert_eq!(
            serialport::FlowControl::from(FlowControl::Hardware),
            serialport::FlowControl::Hardware
        );
        assert_eq!(
            serialport::Parity::from(Parity::Even),
            serialport::Parity::Even
        );
    }
}
