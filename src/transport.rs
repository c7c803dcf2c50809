//! Byte stream primitives over an embedded-hal serial port

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::{Error, Options};

/// Serial port the uploader drives.
///
/// Implementations must also classify which errors mean the remote end went away,
/// so a closed stream can be reported separately from other I/O failures.
pub trait Port<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    fn is_disconnect(err: &E) -> bool;
}

/// Blocking protocol-level access to a port
pub struct Link<P, D, E> {
    port: P,
    delay: D,
    timeout_ms: Option<u32>,
    poll_delay_ms: u32,
    _err: PhantomData<E>,
}

impl<P, D, E> Link<P, D, E>
where
    P: Port<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a link, polling at least once per millisecond
    pub fn new(port: P, delay: D, options: &Options) -> Self {
        Self {
            port,
            delay,
            timeout_ms: options.timeout_ms,
            poll_delay_ms: core::cmp::max(options.poll_delay_ms, 1),
            _err: PhantomData,
        }
    }

    /// Write raw bytes and flush
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            nb::block!(self.port.write(*b))?;
        }
        nb::block!(self.port.flush())?;

        Ok(())
    }

    /// Write `count` zero bytes and flush
    pub fn write_zeros(&mut self, count: usize) -> Result<(), Error<E>> {
        for _ in 0..count {
            nb::block!(self.port.write(0))?;
        }
        nb::block!(self.port.flush())?;

        Ok(())
    }

    pub fn write_ascii(&mut self, text: &str) -> Result<(), Error<E>> {
        trace!("Sending '{}'", text);
        self.write_bytes(text.as_bytes())
    }

    /// Write a 32-bit little endian value
    pub fn write_le32(&mut self, value: i32) -> Result<(), Error<E>> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Read a 32-bit little endian value
    pub fn read_le32(&mut self, what: &'static str) -> Result<i32, Error<E>> {
        let mut buff = [0u8; 4];
        for b in buff.iter_mut() {
            *b = self.read_byte(what)?;
        }

        trace!("Received {:02x?} ({})", buff, what);

        Ok(i32::from_le_bytes(buff))
    }

    /// Block until `token` appears anywhere in the inbound stream
    pub fn wait_for_token(&mut self, token: &'static str) -> Result<(), Error<E>> {
        self.read_token(&[token], token).map(|_| ())
    }

    /// Block until any of `tokens` appears in the inbound stream, returning the match.
    ///
    /// Input is consumed up to and including the matching token.
    /// `what` names the awaited answer in timeout errors.
    pub fn read_token(
        &mut self,
        tokens: &[&'static str],
        what: &'static str,
    ) -> Result<&'static str, Error<E>> {
        let window_len = tokens.iter().map(|t| t.len()).max().unwrap_or(0);
        let mut window: Vec<u8> = Vec::with_capacity(window_len);

        loop {
            if let Some(t) = tokens
                .iter()
                .find(|t| !t.is_empty() && window.ends_with(t.as_bytes()))
            {
                debug!("Received token '{}'", t);
                return Ok(*t);
            }

            let b = self.read_byte(what)?;

            if window.len() == window_len {
                window.remove(0);
            }
            window.push(b);
        }
    }

    /// Fetch a single byte, polling until one is available or the timeout expires.
    ///
    /// Ports must return `WouldBlock` without waiting, all waiting happens in the delay.
    fn read_byte(&mut self, what: &'static str) -> Result<u8, Error<E>> {
        let mut waited: u32 = 0;

        loop {
            match self.port.read() {
                Ok(v) => return Ok(v),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) if P::is_disconnect(&e) => {
                    debug!("Port closed while waiting for {}", what);
                    return Err(Error::Closed);
                }
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }

            self.delay.delay_ms(self.poll_delay_ms);

            if let Some(timeout) = self.timeout_ms {
                waited = waited.saturating_add(self.poll_delay_ms);
                if waited > timeout {
                    error!("Timeout waiting for {}", what);
                    return Err(Error::Timeout(what));
                }
            }
        }
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Release the underlying port and delay
    pub fn release(self) -> (P, D) {
        (self.port, self.delay)
    }
}
