//! One request/response exchange at a time over a [`Transport`].

use std::time::{Duration, Instant};

use crate::error::{CommError, DecodeError, DeviceFlags};
use crate::packet::{self, Instruction, StatusPacket, BROADCAST_ID, STATUS_OVERHEAD};
use crate::transport::Transport;

pub const DEFAULT_BAUD: u32 = 1_000_000;
/// Fixed turnaround allowance on top of the byte-rate derived timeout.
const RESPONSE_LATENCY: Duration = Duration::from_millis(50);

/// Drives the packet protocol over a half-duplex serial line.
///
/// The bus supports exactly one outstanding exchange; starting another
/// while one is in flight fails fast with [`CommError::PortBusy`] rather
/// than interleaving bytes on the wire. Failed transactions are reported
/// as-is, never retried here.
pub struct ServoBus<T: Transport> {
    transport: T,
    baud: u32,
    in_flight: bool,
}

impl<T: Transport> ServoBus<T> {
    pub fn new(transport: T) -> Self {
        Self::with_baud(transport, DEFAULT_BAUD)
    }

    /// The baud rate only feeds the response timeout; configure the port
    /// itself at the transport.
    pub fn with_baud(transport: T, baud: u32) -> Self {
        Self {
            transport,
            baud: baud.max(1),
            in_flight: false,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Time to wait for `len` response bytes: transmission time for the
    /// packet plus a few byte periods of margin plus fixed latency.
    fn response_timeout(&self, len: usize) -> Duration {
        let byte_us = 10_000_000 / self.baud as u64;
        Duration::from_micros(byte_us * (len as u64 + 3)) + RESPONSE_LATENCY
    }

    /// Send one instruction packet and, for an addressed instruction that
    /// expects one, receive and validate the status packet.
    ///
    /// Broadcast instructions and `expects_response == false` return
    /// `Ok(None)` immediately; no servo ever answers a broadcast, so there
    /// is no receive phase at all.
    pub fn transact(
        &mut self,
        id: u8,
        instruction: &Instruction,
        expects_response: bool,
    ) -> Result<Option<StatusPacket>, CommError> {
        self.send(id, instruction)?;
        if id == BROADCAST_ID || !expects_response {
            return Ok(None);
        }

        let data_len = match instruction {
            Instruction::Read { length, .. } => *length as usize,
            _ => 0,
        };
        self.in_flight = true;
        let received = self.recv_status(data_len);
        self.in_flight = false;

        let status = received?;
        if status.id != id {
            return Err(CommError::IdMismatch {
                expected: id,
                received: status.id,
            });
        }
        Ok(Some(status))
    }

    pub fn ping(&mut self, id: u8) -> Result<StatusPacket, CommError> {
        self.exchange(id, &Instruction::Ping)
    }

    pub fn read(&mut self, id: u8, address: u8, length: u8) -> Result<(Vec<u8>, DeviceFlags), CommError> {
        let status = self.exchange(id, &Instruction::Read { address, length })?;
        if status.data.len() != length as usize {
            return Err(CommError::RxCorrupt(DecodeError::Truncated));
        }
        Ok((status.data, status.flags))
    }

    pub fn read_u8(&mut self, id: u8, address: u8) -> Result<(u8, DeviceFlags), CommError> {
        let (data, flags) = self.read(id, address, 1)?;
        Ok((data[0], flags))
    }

    pub fn read_u16(&mut self, id: u8, address: u8) -> Result<(u16, DeviceFlags), CommError> {
        let (data, flags) = self.read(id, address, 2)?;
        Ok((packet::make_word(data[0], data[1]), flags))
    }

    /// Fetches two consecutive 16-bit registers in one 4-byte read.
    pub fn read_u32(&mut self, id: u8, address: u8) -> Result<(u32, DeviceFlags), CommError> {
        let (data, flags) = self.read(id, address, 4)?;
        let lo = packet::make_word(data[0], data[1]);
        let hi = packet::make_word(data[2], data[3]);
        Ok((packet::make_dword(lo, hi), flags))
    }

    pub fn write(&mut self, id: u8, address: u8, data: &[u8]) -> Result<DeviceFlags, CommError> {
        let status = self.exchange(
            id,
            &Instruction::Write {
                address,
                data: data.to_vec(),
            },
        )?;
        Ok(status.flags)
    }

    /// Write without waiting for the status packet.
    pub fn write_only(&mut self, id: u8, address: u8, data: &[u8]) -> Result<(), CommError> {
        self.transact(
            id,
            &Instruction::Write {
                address,
                data: data.to_vec(),
            },
            false,
        )?;
        Ok(())
    }

    pub fn write_u8(&mut self, id: u8, address: u8, value: u8) -> Result<DeviceFlags, CommError> {
        self.write(id, address, &[value])
    }

    pub fn write_u16(&mut self, id: u8, address: u8, value: u16) -> Result<DeviceFlags, CommError> {
        self.write(id, address, &[packet::lo_byte(value), packet::hi_byte(value)])
    }

    /// First phase of a batched read: broadcast the target list. On success
    /// the bus stays busy until [`sync_read_finish`](Self::sync_read_finish);
    /// the addressed servos all prepare replies and the line belongs to
    /// them until every one has been collected.
    pub fn sync_read_send(&mut self, address: u8, length: u8, ids: &[u8]) -> Result<(), CommError> {
        self.send(
            BROADCAST_ID,
            &Instruction::SyncRead {
                address,
                length,
                ids: ids.to_vec(),
            },
        )?;
        self.in_flight = true;
        Ok(())
    }

    /// Collect the reply of the next target. Replies arrive in the order
    /// the ids were listed in the request.
    pub fn sync_read_recv(&mut self, id: u8, length: u8) -> Result<StatusPacket, CommError> {
        let status = self.recv_status(length as usize)?;
        if status.id != id {
            return Err(CommError::IdMismatch {
                expected: id,
                received: status.id,
            });
        }
        if status.data.len() != length as usize {
            return Err(CommError::RxCorrupt(DecodeError::Truncated));
        }
        Ok(status)
    }

    /// Release the bus after the last [`sync_read_recv`](Self::sync_read_recv).
    pub fn sync_read_finish(&mut self) {
        self.in_flight = false;
    }

    /// Single broadcast write to many servos; fire-and-forget, so only
    /// send-side failures are observable.
    pub fn sync_write(
        &mut self,
        address: u8,
        length: u8,
        writes: Vec<(u8, Vec<u8>)>,
    ) -> Result<(), CommError> {
        self.transact(
            BROADCAST_ID,
            &Instruction::SyncWrite {
                address,
                length,
                writes,
            },
            false,
        )?;
        Ok(())
    }

    fn exchange(&mut self, id: u8, instruction: &Instruction) -> Result<StatusPacket, CommError> {
        if id >= BROADCAST_ID {
            return Err(CommError::NotAddressable);
        }
        match self.transact(id, instruction, true)? {
            Some(status) => Ok(status),
            // Addressed exchanges always produce a packet on success.
            None => Err(CommError::RxTimeout),
        }
    }

    fn send(&mut self, id: u8, instruction: &Instruction) -> Result<(), CommError> {
        if self.in_flight {
            return Err(CommError::PortBusy);
        }
        let frame = packet::encode(id, instruction);
        self.transport.clear();
        if let Err(err) = self.transport.write(&frame) {
            log::warn!("tx failed for id {id}: {err}");
            return Err(CommError::TxFail);
        }
        log::trace!("tx id={id} frame={frame:02X?}");
        Ok(())
    }

    /// Accumulate one status packet of `data_len` payload bytes, trimming
    /// line noise ahead of the header so a partial frame can complete
    /// within the deadline.
    fn recv_status(&mut self, data_len: usize) -> Result<StatusPacket, CommError> {
        let want = STATUS_OVERHEAD + data_len;
        let timeout = self.response_timeout(want);
        let start = Instant::now();
        let mut buf: Vec<u8> = Vec::with_capacity(want);

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            let chunk = self
                .transport
                .read(want - buf.len(), remaining)
                .map_err(|err| {
                    log::warn!("rx failed: {err}");
                    CommError::RxTimeout
                })?;
            buf.extend_from_slice(&chunk);

            match packet::find_header(&buf) {
                Some(0) => {}
                Some(skip) => {
                    buf.drain(..skip);
                }
                None => {
                    // Nothing resembling a frame yet; keep at most a
                    // trailing 0xFF that may be half a header.
                    let keep = matches!(buf.last(), Some(&packet::HEADER_BYTE));
                    buf.clear();
                    if keep {
                        buf.push(packet::HEADER_BYTE);
                    }
                }
            }

            if buf.len() >= want {
                break;
            }
            if chunk.is_empty() || start.elapsed() >= timeout {
                break;
            }
        }

        if buf.is_empty() {
            return Err(CommError::RxTimeout);
        }
        log::trace!("rx frame={buf:02X?}");
        packet::decode_status(&buf).map_err(CommError::RxCorrupt)
    }
}
