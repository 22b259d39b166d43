//! In-process servo bus simulator.
//!
//! Each simulated servo is a bare register file behind the real wire
//! protocol, enough to exercise the codec, the transaction engine and the
//! group sessions without hardware. [`SimTransport`] plugs the simulator
//! into anything that takes a [`Transport`].

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use crate::error::DeviceFlags;
use crate::packet::{self, Instruction, BROADCAST_ID};
use crate::registers::*;
use crate::transport::Transport;

const REGISTER_COUNT: usize = 256;
/// Status-byte bit the simulator raises for an out-of-range register
/// access.
const SIM_ERROR_RANGE: u8 = 0x10;

#[derive(Debug, Clone)]
struct SimServo {
    registers: [u8; REGISTER_COUNT],
}

impl SimServo {
    fn new(id: u8) -> Self {
        let mut servo = Self {
            registers: [0u8; REGISTER_COUNT],
        };
        servo.registers[STS_MODEL_L as usize] = 0x09;
        servo.registers[STS_MODEL_H as usize] = 0x03;
        servo.registers[STS_ID as usize] = id;
        servo.registers[STS_BAUD_RATE as usize] = STS_BAUD_1M;
        servo.set_u16(STS_MIN_ANGLE_LIMIT_L, 0);
        servo.set_u16(STS_MAX_ANGLE_LIMIT_L, 4095);
        servo.registers[STS_PRESENT_VOLTAGE as usize] = 74;
        servo.registers[STS_PRESENT_TEMPERATURE as usize] = 30;
        servo
    }

    fn set_u16(&mut self, address: u8, value: u16) {
        self.registers[address as usize] = packet::lo_byte(value);
        self.registers[address as usize + 1] = packet::hi_byte(value);
    }

    fn read(&self, address: u8, length: u8) -> Option<Vec<u8>> {
        let start = address as usize;
        let end = start.checked_add(length as usize)?;
        if end > REGISTER_COUNT {
            return None;
        }
        Some(self.registers[start..end].to_vec())
    }

    fn write(&mut self, address: u8, data: &[u8]) -> bool {
        let start = address as usize;
        let Some(end) = start.checked_add(data.len()) else {
            return false;
        };
        if end > REGISTER_COUNT {
            return false;
        }
        self.registers[start..end].copy_from_slice(data);
        true
    }
}

/// A chain of register-file servos answering real protocol frames.
#[derive(Debug, Default)]
pub struct BusSim {
    servos: HashMap<u8, SimServo>,
}

impl BusSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_servo(&mut self, id: u8) {
        self.servos.entry(id).or_insert_with(|| SimServo::new(id));
    }

    pub fn remove_servo(&mut self, id: u8) -> bool {
        self.servos.remove(&id).is_some()
    }

    /// Poke registers directly, for test setup.
    pub fn set_registers(&mut self, id: u8, address: u8, data: &[u8]) -> bool {
        match self.servos.get_mut(&id) {
            Some(servo) => servo.write(address, data),
            None => false,
        }
    }

    /// Peek registers directly, for test assertions.
    pub fn registers(&self, id: u8, address: u8, length: u8) -> Option<Vec<u8>> {
        self.servos.get(&id)?.read(address, length)
    }

    /// Feed one instruction frame through the chain; the returned bytes
    /// are whatever would appear on the line in response (for a sync read,
    /// the concatenated per-servo status frames in request order).
    pub fn handle_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let (id, instruction) = match packet::decode_instruction(frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::debug!("sim: dropping frame: {err}");
                return None;
            }
        };

        match &instruction {
            Instruction::SyncRead { address, length, ids } => {
                if id != BROADCAST_ID {
                    return None;
                }
                let mut line = Vec::new();
                for id in ids {
                    if let Some(servo) = self.servos.get(id) {
                        line.extend_from_slice(&read_reply(*id, servo, *address, *length));
                    }
                }
                return if line.is_empty() { None } else { Some(line) };
            }
            Instruction::SyncWrite { address, length, writes } => {
                if id != BROADCAST_ID {
                    return None;
                }
                for (id, data) in writes {
                    if data.len() != *length as usize {
                        continue;
                    }
                    if let Some(servo) = self.servos.get_mut(id) {
                        servo.write(*address, data);
                    }
                }
                return None;
            }
            _ => {}
        }

        if id == BROADCAST_ID {
            // Addressed-style instructions still apply chain-wide on
            // broadcast, only the status replies are suppressed.
            for servo in self.servos.values_mut() {
                apply(servo, &instruction);
            }
            return None;
        }

        let servo = self.servos.get_mut(&id)?;
        Some(match &instruction {
            Instruction::Ping => packet::encode_status(id, DeviceFlags::default(), &[]),
            Instruction::Read { address, length } => read_reply(id, servo, *address, *length),
            Instruction::Write { address, data } => {
                let ok = servo.write(*address, data);
                let flags = if ok { 0 } else { SIM_ERROR_RANGE };
                packet::encode_status(id, DeviceFlags::from_bits(flags), &[])
            }
            Instruction::SyncRead { .. } | Instruction::SyncWrite { .. } => return None,
        })
    }
}

fn apply(servo: &mut SimServo, instruction: &Instruction) {
    if let Instruction::Write { address, data } = instruction {
        servo.write(*address, data);
    }
}

fn read_reply(id: u8, servo: &SimServo, address: u8, length: u8) -> Vec<u8> {
    match servo.read(address, length) {
        Some(data) => packet::encode_status(id, DeviceFlags::default(), &data),
        None => packet::encode_status(
            id,
            DeviceFlags::from_bits(SIM_ERROR_RANGE),
            &vec![0u8; length as usize],
        ),
    }
}

/// [`Transport`] backed by a [`BusSim`]. Responses to a written frame are
/// queued and served to subsequent reads, like loopback hardware with no
/// propagation delay.
#[derive(Debug, Default)]
pub struct SimTransport {
    sim: BusSim,
    rx: VecDeque<u8>,
    corrupt_at: Option<usize>,
    fail_next_write: bool,
}

impl SimTransport {
    pub fn new(sim: BusSim) -> Self {
        Self {
            sim,
            rx: VecDeque::new(),
            corrupt_at: None,
            fail_next_write: false,
        }
    }

    pub fn sim(&self) -> &BusSim {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut BusSim {
        &mut self.sim
    }

    /// Fault injection: flip one bit of the next queued response at the
    /// given byte offset.
    pub fn corrupt_reply_at(&mut self, offset: usize) {
        self.corrupt_at = Some(offset);
    }

    /// Fault injection: make the next write fail like a dead line.
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }
}

impl Transport for SimTransport {
    fn clear(&mut self) {
        self.rx.clear();
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated tx fault"));
        }
        if let Some(mut response) = self.sim.handle_frame(bytes) {
            if let Some(offset) = self.corrupt_at.take() {
                if let Some(byte) = response.get_mut(offset) {
                    *byte ^= 0x01;
                }
            }
            self.rx.extend(response);
        }
        Ok(())
    }

    fn read(&mut self, len: usize, _timeout: Duration) -> io::Result<Vec<u8>> {
        let take = len.min(self.rx.len());
        Ok(self.rx.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_registers() {
        let mut sim = BusSim::new();
        sim.add_servo(1);

        let write = packet::encode(
            1,
            &Instruction::Write {
                address: 0x10,
                data: vec![0x12, 0x34],
            },
        );
        let reply = sim.handle_frame(&write).expect("write reply");
        let status = packet::decode_status(&reply).expect("decode");
        assert!(status.flags.is_clear());

        let read = packet::encode(
            1,
            &Instruction::Read {
                address: 0x10,
                length: 2,
            },
        );
        let reply = sim.handle_frame(&read).expect("read reply");
        let status = packet::decode_status(&reply).expect("decode");
        assert_eq!(status.id, 1);
        assert_eq!(status.data, vec![0x12, 0x34]);
    }

    #[test]
    fn sync_read_concatenates_frames_in_request_order() {
        let mut sim = BusSim::new();
        sim.add_servo(1);
        sim.add_servo(2);
        sim.set_registers(1, 0x30, &[0xAA]);
        sim.set_registers(2, 0x30, &[0xBB]);

        let frame = packet::encode(
            BROADCAST_ID,
            &Instruction::SyncRead {
                address: 0x30,
                length: 1,
                ids: vec![2, 1],
            },
        );
        let line = sim.handle_frame(&frame).expect("replies");

        let first = packet::decode_status(&line).expect("first");
        assert_eq!((first.id, first.data[0]), (2, 0xBB));
        let second = packet::decode_status(&line[7..]).expect("second");
        assert_eq!((second.id, second.data[0]), (1, 0xAA));
    }

    #[test]
    fn out_of_range_read_sets_error_bit() {
        let mut sim = BusSim::new();
        sim.add_servo(1);

        let frame = packet::encode(
            1,
            &Instruction::Read {
                address: 0xFE,
                length: 4,
            },
        );
        let reply = sim.handle_frame(&frame).expect("reply");
        let status = packet::decode_status(&reply).expect("decode");
        assert_eq!(status.flags.bits(), SIM_ERROR_RANGE);
    }
}
