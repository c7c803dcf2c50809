//! c3r3s Serial Bootloader Uploader.
//!
//! Sends a kernel image to a device running the c3r3s bootloader:
//! handshake, block transfer with cumulative acknowledgements,
//! then a CRC-32 check over the whole image.

use core::convert::TryFrom;

#[macro_use]
extern crate log;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod protocol;
use protocol::*;

pub mod transport;
pub use transport::{Link, Port};

/// Upload session state, advanced by each protocol step
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Init,
    AwaitReady,
    RequestBoot,
    AwaitListen,
    InitTransfer,
    Transfer { block: usize },
    Finalize,
    Complete,
    Failed,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError> {
    #[error("serial port error: {0:?}")]
    Serial(SerialError),
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),
    #[error("serial port closed")]
    Closed,
    #[error("serial port unavailable: {0}")]
    PortUnavailable(String),
    #[error("image unreadable: {0:?}")]
    ImageUnreadable(std::io::ErrorKind),
    #[error("image of {0} bytes does not fit the size field")]
    ImageTooLarge(usize),
    #[error("device went away while waiting for '{expected}'")]
    ProtocolMismatch { expected: &'static str },
    #[error("device received {received} bytes after block {block}, expected {expected}")]
    BlockAckMismatch {
        block: usize,
        expected: usize,
        received: i32,
    },
    #[error("device reported checksum mismatch")]
    ChecksumFailed,
    #[error("unexpected answer from device")]
    UnexpectedAnswer,
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout for each wait on the device (waits forever if unset)
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub timeout_ms: Option<u32>,

    /// Period to poll for device responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Pause after each block before reading the acknowledgement
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "25"))]
    pub block_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            poll_delay_ms: 1,
            block_delay_ms: 25,
        }
    }
}

/// Reported after every acknowledged block
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Progress {
    pub block: usize,
    pub blocks: usize,
    pub acknowledged: usize,
}

pub struct Uploader<P, D, E> {
    state: State,
    options: Options,
    link: Link<P, D, E>,
    acknowledged: usize,
}

impl<P, D, E> Uploader<P, D, E>
where
    P: Port<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new uploader, taking ownership of the port for the session
    pub fn new(port: P, delay: D, options: Options) -> Self {
        let link = Link::new(port, delay, &options);
        Self {
            state: State::Init,
            options,
            link,
            acknowledged: 0,
        }
    }

    /// Fetch the session state
    pub fn state(&self) -> State {
        self.state
    }

    /// Cumulative bytes acknowledged by the device
    pub fn acknowledged(&self) -> usize {
        self.acknowledged
    }

    /// Run a complete upload session.
    ///
    /// The port is released when this returns, whatever the outcome.
    pub fn upload<F>(mut self, image: &[u8], progress: F) -> Result<(), Error<E>>
    where
        F: FnMut(Progress),
    {
        self.handshake()?;
        self.transfer(image, progress)?;
        self.finalize(image)
    }

    /// Wait for the bootloader and request a new boot
    pub fn handshake(&mut self) -> Result<(), Error<E>> {
        let r = self.do_handshake();
        self.check(r)
    }

    /// Announce the image and send it block by block
    pub fn transfer<F>(&mut self, image: &[u8], progress: F) -> Result<(), Error<E>>
    where
        F: FnMut(Progress),
    {
        let r = self.do_transfer(image, progress);
        self.check(r)
    }

    /// Send the image checksum and await the verdict
    pub fn finalize(&mut self, image: &[u8]) -> Result<(), Error<E>> {
        let r = self.do_finalize(image);
        self.check(r)
    }

    /// Release the underlying port and delay
    pub fn release(self) -> (P, D) {
        self.link.release()
    }

    fn check<T>(&mut self, r: Result<T, Error<E>>) -> Result<T, Error<E>> {
        if let Err(e) = &r {
            error!("Upload failed in state {:?}: {}", self.state, e);
            self.state = State::Failed;
        }
        r
    }

    fn do_handshake(&mut self) -> Result<(), Error<E>> {
        debug!("Awaiting bootloader ready signal");
        self.state = State::AwaitReady;
        self.await_token(TOKEN_READY)?;

        debug!("Sending boot request");
        self.state = State::RequestBoot;
        self.link.write_ascii(TOKEN_BOOT)?;

        debug!("Awaiting bootloader listen acknowledgement");
        self.state = State::AwaitListen;
        self.await_token(TOKEN_LISTEN)?;

        self.state = State::InitTransfer;

        Ok(())
    }

    fn await_token(&mut self, token: &'static str) -> Result<(), Error<E>> {
        match self.link.wait_for_token(token) {
            Err(Error::Closed) => Err(Error::ProtocolMismatch { expected: token }),
            r => r,
        }
    }

    fn do_transfer<F>(&mut self, image: &[u8], mut progress: F) -> Result<(), Error<E>>
    where
        F: FnMut(Progress),
    {
        let size = i32::try_from(image.len()).map_err(|_| Error::ImageTooLarge(image.len()))?;
        let blocks = Blocks::new(image);
        let count = blocks.len();

        debug!(
            "Sending image: {} bytes in {} blocks of {} bytes to 0x{:x}",
            size,
            count,
            blocks.block_length(),
            LOAD_ADDRESS
        );

        self.state = State::InitTransfer;
        self.link.write_ascii(TOKEN_SEND)?;
        self.link.write_le32(LOAD_ADDRESS)?;
        self.link.write_le32(size)?;

        for block in blocks {
            self.state = State::Transfer { block: block.index };

            self.link.write_le32(block.length as i32)?;
            self.link.write_bytes(block.data)?;
            if block.padding() > 0 {
                self.link.write_zeros(block.padding())?;
            }

            self.link.delay_ms(self.options.block_delay_ms);

            // Devices count padded bytes, including for the final block
            let received = self.link.read_le32("block acknowledgement")?;
            let expected = block.expected_ack();
            if received < 0 || received as usize != expected {
                return Err(Error::BlockAckMismatch {
                    block: block.index,
                    expected,
                    received,
                });
            }

            trace!("Block {} acknowledged ({} bytes)", block.index, received);

            self.acknowledged = expected;
            progress(Progress {
                block: block.index,
                blocks: count,
                acknowledged: expected,
            });
        }

        Ok(())
    }

    fn do_finalize(&mut self, image: &[u8]) -> Result<(), Error<E>> {
        self.state = State::Finalize;

        let crc = checksum(image);
        debug!("Sending checksum 0x{:08x}", crc);
        self.link.write_le32(crc as i32)?;

        match self.link.read_token(&[TOKEN_GOOD, TOKEN_FAIL], "checksum answer") {
            Ok(TOKEN_GOOD) => {
                debug!("Checksum accepted");
                self.state = State::Complete;
                Ok(())
            }
            Ok(TOKEN_FAIL) => Err(Error::ChecksumFailed),
            Ok(_) | Err(Error::Closed) => Err(Error::UnexpectedAnswer),
            Err(e) => Err(e),
        }
    }
}
