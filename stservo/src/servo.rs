//! High-level ST3215 client: register map plus unit conversions over the
//! raw bus.

use std::ops::RangeInclusive;

use crate::bus::ServoBus;
use crate::error::{DeviceFlags, ServoError};
use crate::group_read::GroupSyncRead;
use crate::group_write::GroupSyncWrite;
use crate::packet::{self, MAX_ID};
use crate::registers::*;
use crate::serial::SerialTransport;
use crate::transport::Transport;

/// Read window of [`St3215::sync_read_state`]: present position through
/// the moving flag.
const STATE_WINDOW: (u8, u8) = (STS_PRESENT_POSITION_L, 11);
/// Write window of position commands: acceleration through goal speed.
const COMMAND_WINDOW: (u8, u8) = (STS_ACC, 7);

/// Snapshot of one servo captured by a batched state read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoState {
    pub id: u8,
    /// Steps, 0..=4095 over a full turn; negative in multi-turn mode.
    pub position: i32,
    /// Steps per second, signed.
    pub speed: i32,
    /// Signed load estimate, per mille of stall torque.
    pub load: i32,
    pub voltage: f32,
    pub temperature: u8,
    pub moving: bool,
    pub flags: DeviceFlags,
}

/// Convenience client for a chain of ST3215 servos.
///
/// Value reads require a clean status packet *and* a clear device error
/// byte; an alarming servo surfaces as [`ServoError::Device`]. The raw
/// channels stay separate one layer down on [`ServoBus`].
pub struct St3215<T: Transport> {
    bus: ServoBus<T>,
}

impl St3215<SerialTransport> {
    /// Open a serial port and bind a client to it.
    pub fn open(path: &str, baud: u32) -> Result<Self, ServoError> {
        let transport = SerialTransport::open(path, baud)?;
        Ok(Self {
            bus: ServoBus::with_baud(transport, baud),
        })
    }
}

impl<T: Transport> St3215<T> {
    pub fn new(transport: T) -> Self {
        Self {
            bus: ServoBus::new(transport),
        }
    }

    pub fn bus_mut(&mut self) -> &mut ServoBus<T> {
        &mut self.bus
    }

    /// Ping one servo and fetch its model number. Alarm bits do not fail
    /// the ping; a servo in protection still answers.
    pub fn ping(&mut self, id: u8) -> Result<u16, ServoError> {
        let status = self.bus.ping(id)?;
        if !status.flags.is_clear() {
            log::warn!("servo {id} answered ping with alarms: {}", status.flags);
        }
        let (model, _) = self.bus.read_u16(id, STS_MODEL_L)?;
        Ok(model)
    }

    /// Discovery loop: ping every id in the range, return those that
    /// answered.
    pub fn scan(&mut self, ids: RangeInclusive<u8>) -> Vec<u8> {
        let mut found = Vec::new();
        for id in ids {
            if id > MAX_ID {
                break;
            }
            match self.bus.ping(id) {
                Ok(_) => found.push(id),
                Err(err) => log::debug!("scan: id {id}: {err}"),
            }
        }
        found
    }

    /// Supply voltage in volts (0.1 V per step).
    pub fn read_voltage(&mut self, id: u8) -> Result<f32, ServoError> {
        let (raw, flags) = self.bus.read_u8(id, STS_PRESENT_VOLTAGE)?;
        self.check_flags(id, flags)?;
        Ok(raw as f32 * 0.1)
    }

    /// Motor current in milliamps (6.5 mA per step).
    pub fn read_current(&mut self, id: u8) -> Result<f32, ServoError> {
        let (raw, flags) = self.bus.read_u8(id, STS_PRESENT_CURRENT_L)?;
        self.check_flags(id, flags)?;
        Ok(raw as f32 * 6.5)
    }

    /// Internal temperature in degrees Celsius.
    pub fn read_temperature(&mut self, id: u8) -> Result<u8, ServoError> {
        let (raw, flags) = self.bus.read_u8(id, STS_PRESENT_TEMPERATURE)?;
        self.check_flags(id, flags)?;
        Ok(raw)
    }

    pub fn read_acceleration(&mut self, id: u8) -> Result<u8, ServoError> {
        let (raw, flags) = self.bus.read_u8(id, STS_ACC)?;
        self.check_flags(id, flags)?;
        Ok(raw)
    }

    pub fn read_position(&mut self, id: u8) -> Result<i32, ServoError> {
        let (raw, flags) = self.bus.read_u16(id, STS_PRESENT_POSITION_L)?;
        self.check_flags(id, flags)?;
        Ok(packet::to_host(raw, SIGN_BIT))
    }

    pub fn read_speed(&mut self, id: u8) -> Result<i32, ServoError> {
        let (raw, flags) = self.bus.read_u16(id, STS_PRESENT_SPEED_L)?;
        self.check_flags(id, flags)?;
        Ok(packet::to_host(raw, SIGN_BIT))
    }

    /// Position and speed in one 4-byte read; the registers are adjacent,
    /// low word position, high word speed.
    pub fn read_position_speed(&mut self, id: u8) -> Result<(i32, i32), ServoError> {
        let (raw, flags) = self.bus.read_u32(id, STS_PRESENT_POSITION_L)?;
        self.check_flags(id, flags)?;
        let position = packet::to_host(packet::lo_word(raw), SIGN_BIT);
        let speed = packet::to_host(packet::hi_word(raw), SIGN_BIT);
        Ok((position, speed))
    }

    pub fn read_load(&mut self, id: u8) -> Result<i32, ServoError> {
        let (raw, flags) = self.bus.read_u16(id, STS_PRESENT_LOAD_L)?;
        self.check_flags(id, flags)?;
        Ok(packet::to_host(raw, SIGN_BIT))
    }

    pub fn read_moving(&mut self, id: u8) -> Result<bool, ServoError> {
        let (raw, flags) = self.bus.read_u8(id, STS_MOVING)?;
        self.check_flags(id, flags)?;
        Ok(raw != 0)
    }

    /// Command a move: acceleration, goal position and goal speed in one
    /// 7-byte write starting at [`STS_ACC`].
    pub fn write_position(
        &mut self,
        id: u8,
        position: u16,
        speed: u16,
        acc: u8,
    ) -> Result<(), ServoError> {
        let block = command_block(position, speed, acc);
        let flags = self.bus.write(id, COMMAND_WINDOW.0, &block)?;
        self.check_flags(id, flags)
    }

    pub fn set_torque(&mut self, id: u8, enabled: bool) -> Result<(), ServoError> {
        let flags = self.bus.write_u8(id, STS_TORQUE_ENABLE, enabled as u8)?;
        self.check_flags(id, flags)
    }

    /// Reassign a servo's id. The id register lives in EPROM; unlock
    /// first, lock after.
    pub fn set_id(&mut self, id: u8, new_id: u8) -> Result<(), ServoError> {
        if new_id > MAX_ID {
            return Err(ServoError::InvalidId(new_id));
        }
        let flags = self.bus.write_u8(id, STS_ID, new_id)?;
        self.check_flags(id, flags)
    }

    pub fn unlock_eprom(&mut self, id: u8) -> Result<(), ServoError> {
        let flags = self.bus.write_u8(id, STS_LOCK, 0)?;
        self.check_flags(id, flags)
    }

    pub fn lock_eprom(&mut self, id: u8) -> Result<(), ServoError> {
        let flags = self.bus.write_u8(id, STS_LOCK, 1)?;
        self.check_flags(id, flags)
    }

    /// Snapshot many servos in one bus transaction. Servos whose reply was
    /// lost or corrupt are skipped (and logged); drive [`GroupSyncRead`]
    /// directly when per-id failure detail matters.
    pub fn sync_read_state(&mut self, ids: &[u8]) -> Result<Vec<ServoState>, ServoError> {
        let (address, length) = STATE_WINDOW;
        let mut session = GroupSyncRead::new();
        for &id in ids {
            session.add_target(id, address, length)?;
        }
        if let Err(err) = session.execute(&mut self.bus) {
            log::warn!("sync read: {err}");
        }

        let mut states = Vec::with_capacity(ids.len());
        for &id in ids {
            if !session.is_available(id) {
                continue;
            }
            let position = session.get_u16(id, 0)?;
            let speed = session.get_u16(id, 2)?;
            let load = session.get_u16(id, 4)?;
            let voltage = session.get_u8(id, STS_PRESENT_VOLTAGE - address)?;
            let temperature = session.get_u8(id, STS_PRESENT_TEMPERATURE - address)?;
            let moving = session.get_u8(id, STS_MOVING - address)?;
            states.push(ServoState {
                id,
                position: packet::to_host(position, SIGN_BIT),
                speed: packet::to_host(speed, SIGN_BIT),
                load: packet::to_host(load, SIGN_BIT),
                voltage: voltage as f32 * 0.1,
                temperature,
                moving: moving != 0,
                flags: session.flags(id).unwrap_or_default(),
            });
        }
        Ok(states)
    }

    /// Command many servos in one broadcast transaction; all start moving
    /// together.
    pub fn sync_write_positions(
        &mut self,
        targets: &[(u8, u16, u16, u8)],
    ) -> Result<(), ServoError> {
        let (address, length) = COMMAND_WINDOW;
        let mut session = GroupSyncWrite::new(address, length);
        for &(id, position, speed, acc) in targets {
            session.add_target(id, &command_block(position, speed, acc))?;
        }
        session.execute(&mut self.bus)
    }

    fn check_flags(&self, id: u8, flags: DeviceFlags) -> Result<(), ServoError> {
        if flags.is_clear() {
            Ok(())
        } else {
            Err(ServoError::Device { id, flags })
        }
    }
}

/// `[acc, pos_lo, pos_hi, time_lo, time_hi, speed_lo, speed_hi]`; goal
/// time stays zero when driving by speed.
fn command_block(position: u16, speed: u16, acc: u8) -> [u8; 7] {
    [
        acc,
        packet::lo_byte(position),
        packet::hi_byte(position),
        0,
        0,
        packet::lo_byte(speed),
        packet::hi_byte(speed),
    ]
}
