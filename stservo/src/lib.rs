//! Driver for Feetech ST3215-class serial bus servos.
//!
//! The servos share a half-duplex serial line and are addressed by numeric
//! IDs. [`ServoBus`] frames instruction packets, validates status replies and
//! enforces the one-transaction-at-a-time rule of the bus. [`GroupSyncRead`]
//! and [`GroupSyncWrite`] batch many servos into a single bus transaction.
//! [`St3215`] layers the register map and unit conversions on top.

pub mod bus;
pub mod error;
pub mod group_read;
pub mod group_write;
pub mod packet;
pub mod registers;
pub mod serial;
pub mod servo;
pub mod sim;
pub mod transport;

#[cfg(test)]
mod tests;

pub use bus::ServoBus;
pub use error::{CommError, DecodeError, DeviceFlags, ServoError, SessionError};
pub use group_read::GroupSyncRead;
pub use group_write::GroupSyncWrite;
pub use packet::{Instruction, StatusPacket, BROADCAST_ID, MAX_ID};
pub use serial::SerialTransport;
pub use servo::{ServoState, St3215};
pub use transport::Transport;
