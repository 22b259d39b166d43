//! Batched register write: one broadcast packet, many servos.

use std::collections::HashMap;

use crate::bus::ServoBus;
use crate::error::{ServoError, SessionError};
use crate::packet::{self, BROADCAST_ID};
use crate::transport::Transport;

/// A transient batch of per-servo payloads sharing one `(address, length)`
/// write window, committed to the bus in a single broadcast transaction.
///
/// Broadcasts are never answered, so [`execute`] only reflects send-side
/// transport failure. A servo silently ignoring the packet because its id
/// was mistyped is undetectable here; that is a property of the protocol,
/// not of this driver.
///
/// [`execute`]: GroupSyncWrite::execute
#[derive(Debug)]
pub struct GroupSyncWrite {
    address: u8,
    length: u8,
    order: Vec<u8>,
    entries: HashMap<u8, Vec<u8>>,
    sent: bool,
}

impl GroupSyncWrite {
    pub fn new(address: u8, length: u8) -> Self {
        Self {
            address,
            length,
            order: Vec::new(),
            entries: HashMap::new(),
            sent: false,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    /// Queue a payload for one servo. Rejected entries leave the session
    /// untouched; a payload must be exactly the session length.
    pub fn add_target(&mut self, id: u8, payload: &[u8]) -> Result<(), SessionError> {
        if self.sent {
            return Err(SessionError::Busy);
        }
        if id >= BROADCAST_ID {
            return Err(SessionError::InvalidId(id));
        }
        if payload.len() != self.length as usize {
            return Err(SessionError::LengthMismatch {
                expected: self.length,
                actual: payload.len(),
            });
        }
        if self.entries.contains_key(&id) {
            return Err(SessionError::DuplicateId(id));
        }
        self.entries.insert(id, payload.to_vec());
        self.order.push(id);
        Ok(())
    }

    pub fn targets(&self) -> &[u8] {
        &self.order
    }

    /// Transmit the batch as one broadcast packet, entries in insertion
    /// order. Whatever the outcome, the session must be [`clear`]ed before
    /// it can be loaded again, so a failed attempt can never leak stale
    /// entries into the next.
    ///
    /// [`clear`]: GroupSyncWrite::clear
    pub fn execute<T: Transport>(&mut self, bus: &mut ServoBus<T>) -> Result<(), ServoError> {
        if self.sent {
            return Err(SessionError::Busy.into());
        }
        if self.order.is_empty() {
            return Err(SessionError::Empty.into());
        }
        if 2 + self.order.len() * (1 + self.length as usize) > packet::MAX_PARAMS {
            return Err(SessionError::TooLarge {
                targets: self.order.len(),
            }
            .into());
        }

        let writes: Vec<(u8, Vec<u8>)> = self
            .order
            .iter()
            .map(|id| (*id, self.entries[id].clone()))
            .collect();

        self.sent = true;
        bus.sync_write(self.address, self.length, writes)?;
        Ok(())
    }

    /// Drop all entries and make the session loadable again.
    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
        self.sent = false;
    }
}
