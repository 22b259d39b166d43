//! ST3215 register map (subset the driver needs).
//!
//! Multi-byte registers are little-endian; position, speed and load carry
//! their sign in bit 15 rather than two's complement.

pub const STS_MODEL_L: u8 = 3;
pub const STS_MODEL_H: u8 = 4;

// EPROM, writable only while unlocked.
pub const STS_ID: u8 = 5;
pub const STS_BAUD_RATE: u8 = 6;
pub const STS_MIN_ANGLE_LIMIT_L: u8 = 9;
pub const STS_MAX_ANGLE_LIMIT_L: u8 = 11;
pub const STS_MODE: u8 = 33;

// RAM.
pub const STS_TORQUE_ENABLE: u8 = 40;
pub const STS_ACC: u8 = 41;
pub const STS_GOAL_POSITION_L: u8 = 42;
pub const STS_GOAL_TIME_L: u8 = 44;
pub const STS_GOAL_SPEED_L: u8 = 46;
pub const STS_LOCK: u8 = 55;

pub const STS_PRESENT_POSITION_L: u8 = 56;
pub const STS_PRESENT_SPEED_L: u8 = 58;
pub const STS_PRESENT_LOAD_L: u8 = 60;
pub const STS_PRESENT_VOLTAGE: u8 = 62;
pub const STS_PRESENT_TEMPERATURE: u8 = 63;
pub const STS_MOVING: u8 = 66;
pub const STS_PRESENT_CURRENT_L: u8 = 69;

/// Values for [`STS_BAUD_RATE`].
pub const STS_BAUD_1M: u8 = 0;
pub const STS_BAUD_500K: u8 = 1;
pub const STS_BAUD_250K: u8 = 2;
pub const STS_BAUD_128K: u8 = 3;
pub const STS_BAUD_115200: u8 = 4;
pub const STS_BAUD_76800: u8 = 5;
pub const STS_BAUD_57600: u8 = 6;
pub const STS_BAUD_38400: u8 = 7;

/// Sign bit index of the 2-byte signed-magnitude registers.
pub const SIGN_BIT: u8 = 15;
