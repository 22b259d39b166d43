use std::io;
use std::time::Duration;

/// Byte-level access to the half-duplex servo line.
///
/// Implementations move raw bytes only; framing, checksums and timeout
/// policy live in [`ServoBus`](crate::ServoBus).
pub trait Transport {
    /// Discard stale bytes sitting in the receive buffer.
    fn clear(&mut self);

    /// Transmit the whole buffer.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read up to `len` bytes, waiting at most `timeout`. Returns whatever
    /// arrived in time, possibly nothing; running out of time is not an
    /// error at this level.
    fn read(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>>;
}
