use std::io;
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use crate::transport::Transport;

/// Poll interval handed to the serial driver; the bus-level deadline is
/// enforced in [`Transport::read`].
const POLL_TIMEOUT: Duration = Duration::from_millis(2);

/// [`Transport`] over a real serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open and configure a port, e.g. `/dev/ttyUSB0` or `COM6`.
    pub fn open(path: &str, baud: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud).timeout(POLL_TIMEOUT).open()?;
        log::debug!("opened {path} at {baud} baud");
        Ok(Self { port })
    }

    /// Wrap an already configured port.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.port.baud_rate().ok()
    }
}

impl Transport for SerialTransport {
    fn clear(&mut self) {
        let _ = self.port.clear(ClearBuffer::Input);
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        if len == 0 {
            return Ok(out);
        }

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            let want = (len - out.len()).min(buf.len());
            match self.port.read(&mut buf[..want]) {
                Ok(0) => {}
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    if out.len() >= len {
                        return Ok(out);
                    }
                }
                Err(err)
                    if err.kind() == io::ErrorKind::TimedOut
                        || err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Ok(out);
            }
        }
    }
}
