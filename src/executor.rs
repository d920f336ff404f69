//! Shared-line plumbing for a pump chain
//!
//! Harvard pumps are daisy chained off a single serial port; an address is
//! set on each pump and every command carries the address of the unit it is
//! for. The chain owns the port and does nothing else - it writes frames,
//! reads fixed-length replies under the per-read timeout, and leaves parsing
//! to the drivers.
//!
//! The protocol permits at most one outstanding command per line, so every
//! exchange borrows the chain mutably for its full request/response pair.
//! Overlapping commands to two units on one chain will not compile.

use std::time::Duration;
use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tokio::time;
use tokio_serial::{ ClearBuffer, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits };
use tracing::info;

use crate::{ status::Reply, PumpError };

/// Per-read timeout used unless the chain is built with another one
///
/// This is the only timeout concept the protocol has: there is no overall
/// operation deadline.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Chain<T>
{
    io_handle: Option<T>,
    read_timeout: Duration,
}

impl Chain<SerialStream>
{
    /// Open a pump chain on a physical serial port
    ///
    /// The Harvard line runs 9600 baud, eight data bits, two stop bits, no
    /// parity. Both buffers are flushed before first use; stale bytes from a
    /// previous session must not be misread as a response.
    pub fn open(port: &str) -> Result<Self, PumpError>
    {
        let stream = tokio_serial::new(port, 9600)
            .stop_bits(StopBits::Two)
            .parity(Parity::None)
            .open_native_async()?;
        stream.clear(ClearBuffer::All)?;
        info!(port = port, "chain created");

        Ok(Self::with(stream))
    }
}

impl <T> Chain<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    /// Wrap an already-open byte stream with the default read timeout
    pub fn with(io_handle: T) -> Self
    {
        Self::with_timeout(io_handle, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeout(io_handle: T, read_timeout: Duration) -> Self
    {
        Self {
            io_handle: Some(io_handle),
            read_timeout: read_timeout,
        }
    }

    pub fn is_open(&self) -> bool
    {
        self.io_handle.is_some()
    }

    /// Drop the transport
    ///
    /// Every exchange after this fails with a not-connected error. Used when
    /// a unit fails its identity check, so the caller is not left holding a
    /// line that answers for nobody.
    pub fn close(&mut self)
    {
        self.io_handle = None;
    }

    fn handle(&mut self) -> Result<&mut T, PumpError>
    {
        match self.io_handle.as_mut() {
            Some(io_handle) => Ok(io_handle),
            None => Err(PumpError::Io(std::io::Error::from(std::io::ErrorKind::NotConnected))),
        }
    }

    pub(crate) async fn transmit(&mut self, frame: &[u8]) -> Result<(), PumpError>
    {
        let io_handle = self.handle()?;
        io_handle.write_all(frame).await?;
        io_handle.flush().await?;

        Ok(())
    }

    /// Read up to `expected` bytes, each attempt bounded by the read timeout
    ///
    /// Returns whatever arrived once the timeout lapses or the stream ends.
    /// An empty reply is the caller's cue that the unit never answered; the
    /// drivers treat that as fatal to the operation in flight.
    pub(crate) async fn receive(&mut self, expected: usize) -> Result<Reply, PumpError>
    {
        let read_timeout = self.read_timeout;
        let io_handle = self.handle()?;
        let mut buf = vec![0u8; expected];
        let mut filled = 0;

        while filled < expected {
            match time::timeout(read_timeout, io_handle.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(bytes_read)) => filled += bytes_read,
                Ok(Err(err)) => return Err(PumpError::Io(err)),
                Err(_lapsed) => break,
            }
        }

        buf.truncate(filled);

        Ok(Reply::new(buf))
    }
}
