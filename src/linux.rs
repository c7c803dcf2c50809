use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, ErrorKind as SerialErrorKind, FlowControl, Parity,
    SerialDevice as _, SerialPortSettings as _, StopBits,
};

use crate::{Error, Options, Port, Uploader};

impl Port<IoErrorKind> for Serial {
    fn is_disconnect(err: &IoErrorKind) -> bool {
        matches!(
            err,
            IoErrorKind::BrokenPipe
                | IoErrorKind::UnexpectedEof
                | IoErrorKind::NotConnected
                | IoErrorKind::ConnectionAborted
                | IoErrorKind::ConnectionReset
        )
    }
}

fn open_error(port: &Path, e: SerialError) -> Error<IoErrorKind> {
    match e.kind() {
        SerialErrorKind::NoDevice | SerialErrorKind::InvalidInput => {
            Error::PortUnavailable(format!("{}: {}", port.display(), e))
        }
        SerialErrorKind::Io(kind) => Error::Serial(kind),
    }
}

impl Uploader<Serial, Delay, IoErrorKind> {
    /// Open a linux serial port and create an uploader for it
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, Error<IoErrorKind>> {
        let path = port.as_ref();

        // Open port
        let mut port = Serial::open(path).map_err(|e| open_error(path, e))?;

        // Apply settings, 8N1 without flow control
        let mut settings = port.0.read_settings().map_err(|e| open_error(path, e))?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings
            .set_baud_rate(BaudRate::from_speed(baud))
            .map_err(|e| open_error(path, e))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0
            .write_settings(&settings)
            .map_err(|e| open_error(path, e))?;

        // Reads return immediately, the uploader's delay does all the waiting
        port.0
            .set_timeout(Duration::from_millis(0))
            .map_err(|e| open_error(path, e))?;

        debug!("Opened {} at {} baud", path.display(), baud);

        Ok(Self::new(port, Delay {}, options))
    }
}
