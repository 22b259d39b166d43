use std::fmt;

use thiserror::Error;

/// Why a received byte sequence failed to parse as a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet truncated")]
    Truncated,

    #[error("header mismatch")]
    HeaderMismatch,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("malformed parameter block")]
    Malformed,

    #[error("unsupported instruction 0x{0:02X}")]
    UnsupportedInstruction(u8),
}

/// Transport/protocol-level outcome of one bus transaction.
///
/// Orthogonal to [`DeviceFlags`]: a transaction can complete on the wire
/// while the servo reports an alarm in its status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommError {
    #[error("port is busy with another transaction")]
    PortBusy,

    #[error("failed to transmit instruction packet")]
    TxFail,

    #[error("no status packet before timeout")]
    RxTimeout,

    #[error("corrupt status packet: {0}")]
    RxCorrupt(#[source] DecodeError),

    #[error("status packet id mismatch: expected {expected}, received {received}")]
    IdMismatch { expected: u8, received: u8 },

    #[error("instruction cannot be addressed to the broadcast id")]
    NotAddressable,
}

/// Misuse of a [`GroupSyncRead`](crate::GroupSyncRead) or
/// [`GroupSyncWrite`](crate::GroupSyncWrite) session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("id {0} already queued in this session")]
    DuplicateId(u8),

    #[error("read window {requested_address}+{requested_length} differs from session window {address}+{length}")]
    WindowMismatch {
        address: u8,
        length: u8,
        requested_address: u8,
        requested_length: u8,
    },

    #[error("payload of {actual} bytes does not match session length {expected}")]
    LengthMismatch { expected: u8, actual: usize },

    #[error("session holds results; clear() before mutating")]
    Busy,

    #[error("field {offset}+{length} exceeds window length {window}")]
    OutOfRange { offset: u8, length: u8, window: u8 },

    #[error("id {0} is not part of this session")]
    UnknownId(u8),

    #[error("no data captured for id {0}")]
    NotAvailable(u8),

    #[error("session has no targets")]
    Empty,

    #[error("batch of {targets} targets exceeds the packet size limit")]
    TooLarge { targets: usize },

    #[error("id {0} is not an assignable servo id")]
    InvalidId(u8),
}

/// Umbrella error for the high-level client and batch sessions.
#[derive(Debug, Error)]
pub enum ServoError {
    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("servo {id} reported alarms: {flags}")]
    Device { id: u8, flags: DeviceFlags },

    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("id {0} is not an assignable servo id")]
    InvalidId(u8),
}

/// Device-reported alarm bits carried in every status packet.
///
/// A non-zero value does not invalidate the packet; it is data for the
/// caller to act on. The driver attaches no recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceFlags(u8);

impl DeviceFlags {
    pub const VOLTAGE: u8 = 0x01;
    pub const ANGLE_SENSOR: u8 = 0x02;
    pub const OVERHEAT: u8 = 0x04;
    pub const OVERCURRENT: u8 = 0x08;
    pub const OVERLOAD: u8 = 0x20;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// True when the servo reported no alarms.
    pub fn is_clear(self) -> bool {
        self.0 == 0
    }

    pub fn voltage(self) -> bool {
        self.0 & Self::VOLTAGE != 0
    }

    pub fn angle_sensor(self) -> bool {
        self.0 & Self::ANGLE_SENSOR != 0
    }

    pub fn overheat(self) -> bool {
        self.0 & Self::OVERHEAT != 0
    }

    pub fn overcurrent(self) -> bool {
        self.0 & Self::OVERCURRENT != 0
    }

    pub fn overload(self) -> bool {
        self.0 & Self::OVERLOAD != 0
    }
}

impl fmt::Display for DeviceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clear() {
            return write!(f, "none");
        }
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{name}")
        };
        if self.voltage() {
            put(f, "voltage")?;
        }
        if self.angle_sensor() {
            put(f, "angle-sensor")?;
        }
        if self.overheat() {
            put(f, "overheat")?;
        }
        if self.overcurrent() {
            put(f, "overcurrent")?;
        }
        if self.overload() {
            put(f, "overload")?;
        }
        let named = Self::VOLTAGE
            | Self::ANGLE_SENSOR
            | Self::OVERHEAT
            | Self::OVERCURRENT
            | Self::OVERLOAD;
        let rest = self.0 & !named;
        if rest != 0 {
            put(f, &format!("0x{rest:02X}"))?;
        }
        Ok(())
    }
}
