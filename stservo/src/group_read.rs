//! Batched register read: one bus transaction, many servos.

use std::collections::HashMap;

use crate::bus::ServoBus;
use crate::error::{CommError, DeviceFlags, ServoError, SessionError};
use crate::packet::{self, BROADCAST_ID};
use crate::transport::Transport;

/// A transient batch of servos sharing one `(address, length)` read
/// window. Built up by the caller, committed with [`execute`], then
/// consumed and [`clear`]ed; the session has no identity across calls.
///
/// Not thread-safe; a session has a single writer by design.
///
/// [`execute`]: GroupSyncRead::execute
/// [`clear`]: GroupSyncRead::clear
#[derive(Debug, Default)]
pub struct GroupSyncRead {
    window: Option<(u8, u8)>,
    order: Vec<u8>,
    results: HashMap<u8, Result<(DeviceFlags, Vec<u8>), CommError>>,
    pending: bool,
}

impl GroupSyncRead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a servo. The first target establishes the session window;
    /// later targets must request the same one.
    pub fn add_target(&mut self, id: u8, address: u8, length: u8) -> Result<(), SessionError> {
        if self.pending {
            return Err(SessionError::Busy);
        }
        if id >= BROADCAST_ID {
            return Err(SessionError::InvalidId(id));
        }
        match self.window {
            None => self.window = Some((address, length)),
            Some((want_address, want_length)) => {
                if (address, length) != (want_address, want_length) {
                    return Err(SessionError::WindowMismatch {
                        address: want_address,
                        length: want_length,
                        requested_address: address,
                        requested_length: length,
                    });
                }
            }
        }
        if self.order.contains(&id) {
            return Err(SessionError::DuplicateId(id));
        }
        self.order.push(id);
        Ok(())
    }

    /// Targets in the order they were added, which is also the order their
    /// replies arrive on the half-duplex line.
    pub fn targets(&self) -> &[u8] {
        &self.order
    }

    /// One broadcast request, then one status packet per target, collected
    /// sequentially in insertion order. A corrupt or missing reply is
    /// recorded against its servo without aborting the rest.
    ///
    /// Returns `Ok` only if every target answered cleanly; otherwise the
    /// first failure, with every per-id outcome still queryable.
    pub fn execute<T: Transport>(&mut self, bus: &mut ServoBus<T>) -> Result<(), ServoError> {
        if self.pending {
            return Err(SessionError::Busy.into());
        }
        let Some((address, length)) = self.window else {
            return Err(SessionError::Empty.into());
        };
        if 2 + self.order.len() > packet::MAX_PARAMS {
            return Err(SessionError::TooLarge {
                targets: self.order.len(),
            }
            .into());
        }

        bus.sync_read_send(address, length, &self.order)?;

        let mut first_failure = None;
        for &id in &self.order {
            match bus.sync_read_recv(id, length) {
                Ok(status) => {
                    self.results.insert(id, Ok((status.flags, status.data)));
                }
                Err(err) => {
                    log::debug!("sync read: no usable reply from id {id}: {err}");
                    first_failure.get_or_insert(err);
                    self.results.insert(id, Err(err));
                }
            }
        }
        bus.sync_read_finish();
        self.pending = true;

        match first_failure {
            None => Ok(()),
            Some(err) => Err(err.into()),
        }
    }

    /// Whether a clean reply was captured for this servo.
    pub fn is_available(&self, id: u8) -> bool {
        matches!(self.results.get(&id), Some(Ok(_)))
    }

    /// The transport outcome recorded for this servo, if its reply failed.
    pub fn error(&self, id: u8) -> Option<CommError> {
        match self.results.get(&id) {
            Some(Err(err)) => Some(*err),
            _ => None,
        }
    }

    /// Device alarm bits from this servo's reply.
    pub fn flags(&self, id: u8) -> Option<DeviceFlags> {
        match self.results.get(&id) {
            Some(Ok((flags, _))) => Some(*flags),
            _ => None,
        }
    }

    /// Slice a field out of the captured window.
    pub fn get(&self, id: u8, offset: u8, length: u8) -> Result<&[u8], SessionError> {
        let Some((_, window)) = self.window else {
            return Err(SessionError::Empty);
        };
        if offset.checked_add(length).is_none() || offset + length > window {
            return Err(SessionError::OutOfRange {
                offset,
                length,
                window,
            });
        }
        match self.results.get(&id) {
            None if !self.order.contains(&id) => Err(SessionError::UnknownId(id)),
            None | Some(Err(_)) => Err(SessionError::NotAvailable(id)),
            Some(Ok((_, data))) => {
                let start = offset as usize;
                Ok(&data[start..start + length as usize])
            }
        }
    }

    pub fn get_u8(&self, id: u8, offset: u8) -> Result<u8, SessionError> {
        Ok(self.get(id, offset, 1)?[0])
    }

    pub fn get_u16(&self, id: u8, offset: u8) -> Result<u16, SessionError> {
        let data = self.get(id, offset, 2)?;
        Ok(packet::make_word(data[0], data[1]))
    }

    pub fn get_u32(&self, id: u8, offset: u8) -> Result<u32, SessionError> {
        let data = self.get(id, offset, 4)?;
        let lo = packet::make_word(data[0], data[1]);
        let hi = packet::make_word(data[2], data[3]);
        Ok(packet::make_dword(lo, hi))
    }

    /// Drop all targets and captured results. Required before reusing the
    /// session with a different target set.
    pub fn clear(&mut self) {
        self.window = None;
        self.order.clear();
        self.results.clear();
        self.pending = false;
    }
}
