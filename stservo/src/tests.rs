use std::io;
use std::time::Duration;

use crate::bus::ServoBus;
use crate::error::{CommError, DecodeError, ServoError, SessionError};
use crate::group_read::GroupSyncRead;
use crate::group_write::GroupSyncWrite;
use crate::packet::{self, Instruction, BROADCAST_ID};
use crate::registers::*;
use crate::servo::St3215;
use crate::sim::{BusSim, SimTransport};
use crate::transport::Transport;

/// Counts wire traffic and never produces a reply.
#[derive(Default)]
struct DeadTransport {
    writes: usize,
    reads: usize,
}

impl Transport for DeadTransport {
    fn clear(&mut self) {}

    fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
        self.writes += 1;
        Ok(())
    }

    fn read(&mut self, _len: usize, _timeout: Duration) -> io::Result<Vec<u8>> {
        self.reads += 1;
        Ok(Vec::new())
    }
}

/// Serves one canned reply, then goes quiet.
struct ScriptedTransport {
    reply: Option<Vec<u8>>,
}

impl Transport for ScriptedTransport {
    fn clear(&mut self) {}

    fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, _len: usize, _timeout: Duration) -> io::Result<Vec<u8>> {
        Ok(self.reply.take().unwrap_or_default())
    }
}

fn sim_bus(ids: &[u8]) -> ServoBus<SimTransport> {
    let mut sim = BusSim::new();
    for &id in ids {
        sim.add_servo(id);
    }
    ServoBus::new(SimTransport::new(sim))
}

#[test]
fn write_read_roundtrip() {
    let mut bus = sim_bus(&[1]);

    let flags = bus.write(1, 0x10, &[0x12, 0x34]).expect("write");
    assert!(flags.is_clear());

    let (data, flags) = bus.read(1, 0x10, 2).expect("read");
    assert!(flags.is_clear());
    assert_eq!(data, vec![0x12, 0x34]);
}

#[test]
fn device_flags_ride_along_with_success() {
    let mut bus = sim_bus(&[1]);

    // Out-of-range write: the transaction itself completes, the servo
    // reports the fault in its status byte.
    let flags = bus.write(1, 0xF8, &[0u8; 16]).expect("transaction");
    assert!(!flags.is_clear());
}

#[test]
fn ping_reports_model_number() {
    let mut servo = St3215::new(SimTransport::new({
        let mut sim = BusSim::new();
        sim.add_servo(7);
        sim
    }));

    assert_eq!(servo.ping(7).expect("ping"), 777);
}

#[test]
fn ping_times_out_on_silent_line() {
    let mut bus = ServoBus::new(DeadTransport::default());
    assert_eq!(bus.ping(1), Err(CommError::RxTimeout));
}

#[test]
fn reply_from_wrong_id_is_rejected() {
    let reply = packet::encode_status(2, Default::default(), &[]);
    let mut bus = ServoBus::new(ScriptedTransport { reply: Some(reply) });

    assert_eq!(
        bus.ping(1),
        Err(CommError::IdMismatch {
            expected: 1,
            received: 2
        })
    );
}

#[test]
fn tx_fault_surfaces_as_tx_fail() {
    let mut bus = sim_bus(&[1]);
    bus.transport_mut().fail_next_write();
    assert_eq!(bus.ping(1), Err(CommError::TxFail));
}

#[test]
fn broadcast_never_touches_the_receive_path() {
    let mut bus = ServoBus::new(DeadTransport::default());

    let result = bus.transact(
        BROADCAST_ID,
        &Instruction::SyncWrite {
            address: STS_ACC,
            length: 1,
            writes: vec![(1, vec![0x05])],
        },
        false,
    );

    assert!(matches!(result, Ok(None)));
    let transport = bus.into_transport();
    assert_eq!(transport.writes, 1);
    assert_eq!(transport.reads, 0);
}

#[test]
fn second_transaction_fails_fast_while_one_is_in_flight() {
    let mut bus = ServoBus::new(DeadTransport::default());

    bus.sync_read_send(STS_PRESENT_POSITION_L, 2, &[1, 2]).expect("send");
    assert_eq!(bus.read(1, 0x10, 1).map(|_| ()), Err(CommError::PortBusy));
    assert_eq!(bus.ping(2).map(|_| ()), Err(CommError::PortBusy));

    bus.sync_read_finish();
    // Released: the next call reaches the wire again (and times out here).
    assert_eq!(bus.ping(2).map(|_| ()), Err(CommError::RxTimeout));

    let transport = bus.into_transport();
    // The two busy rejections never wrote anything.
    assert_eq!(transport.writes, 2);
}

#[test]
fn group_read_collects_every_target() {
    let mut bus = sim_bus(&[1, 2]);
    bus.transport_mut()
        .sim_mut()
        .set_registers(1, STS_PRESENT_POSITION_L, &[0x10, 0x20]);
    bus.transport_mut()
        .sim_mut()
        .set_registers(2, STS_PRESENT_POSITION_L, &[0x30, 0x40]);

    let mut group = GroupSyncRead::new();
    group.add_target(1, STS_PRESENT_POSITION_L, 2).expect("add 1");
    group.add_target(2, STS_PRESENT_POSITION_L, 2).expect("add 2");

    group.execute(&mut bus).expect("execute");

    assert!(group.is_available(1));
    assert!(group.is_available(2));
    assert_eq!(group.get_u16(1, 0).expect("get 1"), 0x2010);
    assert_eq!(group.get_u16(2, 0).expect("get 2"), 0x4030);
}

#[test]
fn group_read_isolates_a_corrupt_reply() {
    let mut bus = sim_bus(&[1, 2, 3]);

    let mut group = GroupSyncRead::new();
    for id in [1, 2, 3] {
        group.add_target(id, STS_PRESENT_POSITION_L, 2).expect("add");
    }

    // Status frames are 8 bytes here; flip a data byte inside the second
    // target's frame.
    bus.transport_mut().corrupt_reply_at(8 + 5);
    let err = group.execute(&mut bus).expect_err("aggregate failure");
    assert!(matches!(
        err,
        ServoError::Comm(CommError::RxCorrupt(DecodeError::ChecksumMismatch))
    ));

    assert!(group.is_available(1));
    assert!(!group.is_available(2));
    assert!(group.is_available(3));
    assert_eq!(
        group.error(2),
        Some(CommError::RxCorrupt(DecodeError::ChecksumMismatch))
    );
    assert_eq!(group.error(1), None);
}

#[test]
fn group_read_records_a_missing_servo() {
    // Target 2 does not exist on the chain, so its frame never appears and
    // the later reads slip out of step; each target still gets an outcome.
    let mut bus = sim_bus(&[1, 3]);

    let mut group = GroupSyncRead::new();
    for id in [1, 2, 3] {
        group.add_target(id, STS_PRESENT_POSITION_L, 2).expect("add");
    }

    group.execute(&mut bus).expect_err("aggregate failure");
    assert!(group.is_available(1));
    assert!(!group.is_available(2));
    assert!(group.error(2).is_some());
    assert!(group.error(3).is_some());
}

#[test]
fn group_read_rejects_duplicates_and_window_changes() {
    let mut group = GroupSyncRead::new();
    group.add_target(1, STS_PRESENT_POSITION_L, 4).expect("add");

    assert_eq!(
        group.add_target(1, STS_PRESENT_POSITION_L, 4),
        Err(SessionError::DuplicateId(1))
    );
    assert!(matches!(
        group.add_target(2, STS_PRESENT_POSITION_L, 2),
        Err(SessionError::WindowMismatch { .. })
    ));
    assert_eq!(
        group.add_target(BROADCAST_ID, STS_PRESENT_POSITION_L, 4),
        Err(SessionError::InvalidId(BROADCAST_ID))
    );

    // Rejections left the target list alone.
    assert_eq!(group.targets(), &[1]);
}

#[test]
fn group_read_is_busy_until_cleared() {
    let mut bus = sim_bus(&[1]);

    let mut group = GroupSyncRead::new();
    group.add_target(1, STS_PRESENT_POSITION_L, 2).expect("add");
    group.execute(&mut bus).expect("execute");

    assert_eq!(
        group.add_target(2, STS_PRESENT_POSITION_L, 2),
        Err(SessionError::Busy)
    );
    assert!(matches!(
        group.execute(&mut bus),
        Err(ServoError::Session(SessionError::Busy))
    ));

    group.clear();
    assert!(!group.is_available(1));
    group.add_target(2, STS_PRESENT_POSITION_L, 2).expect("reusable");
}

#[test]
fn group_read_bounds_field_access() {
    let mut bus = sim_bus(&[1]);

    let mut group = GroupSyncRead::new();
    group.add_target(1, STS_PRESENT_POSITION_L, 4).expect("add");
    group.execute(&mut bus).expect("execute");

    assert!(group.get(1, 0, 4).is_ok());
    assert!(matches!(
        group.get(1, 3, 2),
        Err(SessionError::OutOfRange { .. })
    ));
    assert_eq!(group.get(9, 0, 1), Err(SessionError::UnknownId(9)));
}

#[test]
fn empty_group_read_does_not_transact() {
    let mut bus = ServoBus::new(DeadTransport::default());
    let mut group = GroupSyncRead::new();

    assert!(matches!(
        group.execute(&mut bus),
        Err(ServoError::Session(SessionError::Empty))
    ));
    assert_eq!(bus.into_transport().writes, 0);
}

#[test]
fn group_write_updates_every_servo_in_one_packet() {
    let mut bus = sim_bus(&[1, 2]);

    let mut group = GroupSyncWrite::new(0x40, 2);
    group.add_target(1, &[0x55, 0x66]).expect("add 1");
    group.add_target(2, &[0x77, 0x88]).expect("add 2");
    group.execute(&mut bus).expect("execute");

    let sim = bus.transport_mut().sim();
    assert_eq!(sim.registers(1, 0x40, 2), Some(vec![0x55, 0x66]));
    assert_eq!(sim.registers(2, 0x40, 2), Some(vec![0x77, 0x88]));
}

#[test]
fn group_write_rejects_bad_payloads_without_mutating() {
    let mut group = GroupSyncWrite::new(STS_ACC, 7);

    assert_eq!(
        group.add_target(1, &[0x01, 0x02]),
        Err(SessionError::LengthMismatch {
            expected: 7,
            actual: 2
        })
    );
    assert!(group.targets().is_empty());

    group.add_target(1, &[0u8; 7]).expect("valid payload");
    assert_eq!(
        group.add_target(1, &[0u8; 7]),
        Err(SessionError::DuplicateId(1))
    );
    assert_eq!(group.targets(), &[1]);
}

#[test]
fn group_write_requires_clear_even_after_failure() {
    let mut bus = sim_bus(&[1]);

    let mut group = GroupSyncWrite::new(0x40, 1);
    group.add_target(1, &[0xAA]).expect("add");

    bus.transport_mut().fail_next_write();
    let err = group.execute(&mut bus).expect_err("tx fault");
    assert!(matches!(err, ServoError::Comm(CommError::TxFail)));

    // Stale entries from the failed attempt cannot leak into a new batch.
    assert_eq!(group.add_target(2, &[0xBB]), Err(SessionError::Busy));
    group.clear();
    assert!(group.targets().is_empty());
    group.add_target(2, &[0xBB]).expect("reusable");
}

#[test]
fn position_command_lands_in_the_command_block() {
    let mut servo = St3215::new(SimTransport::new({
        let mut sim = BusSim::new();
        sim.add_servo(1);
        sim
    }));

    servo.write_position(1, 0x1234, 0x5678, 0x01).expect("move");

    let sim = servo.bus_mut().transport_mut().sim();
    assert_eq!(
        sim.registers(1, STS_ACC, 7),
        Some(vec![0x01, 0x34, 0x12, 0x00, 0x00, 0x78, 0x56])
    );
}

#[test]
fn signed_registers_convert_through_the_stack() {
    let mut servo = St3215::new(SimTransport::new({
        let mut sim = BusSim::new();
        sim.add_servo(1);
        sim.set_registers(1, STS_PRESENT_POSITION_L, &[0x05, 0x00, 0x05, 0x80]);
        sim
    }));

    assert_eq!(servo.read_position(1).expect("position"), 5);
    assert_eq!(servo.read_speed(1).expect("speed"), -5);
    assert_eq!(servo.read_position_speed(1).expect("both"), (5, -5));
}

#[test]
fn state_snapshot_reads_the_whole_chain_at_once() {
    let mut servo = St3215::new(SimTransport::new({
        let mut sim = BusSim::new();
        sim.add_servo(1);
        sim.add_servo(2);
        sim.set_registers(1, STS_PRESENT_POSITION_L, &[0xE8, 0x03]);
        sim.set_registers(1, STS_MOVING, &[1]);
        sim.set_registers(2, STS_PRESENT_SPEED_L, &[0x64, 0x80]);
        sim
    }));

    let states = servo.sync_read_state(&[1, 2]).expect("snapshot");
    assert_eq!(states.len(), 2);

    assert_eq!(states[0].id, 1);
    assert_eq!(states[0].position, 1000);
    assert!(states[0].moving);
    assert!((states[0].voltage - 7.4).abs() < 1e-3);
    assert_eq!(states[0].temperature, 30);

    assert_eq!(states[1].id, 2);
    assert_eq!(states[1].speed, -100);
    assert!(!states[1].moving);
}

#[test]
fn sync_position_commands_reach_every_servo() {
    let mut servo = St3215::new(SimTransport::new({
        let mut sim = BusSim::new();
        sim.add_servo(1);
        sim.add_servo(2);
        sim
    }));

    servo
        .sync_write_positions(&[(1, 4090, 3400, 50), (2, 0, 3400, 50)])
        .expect("sync write");

    let sim = servo.bus_mut().transport_mut().sim();
    assert_eq!(
        sim.registers(1, STS_GOAL_POSITION_L, 2),
        Some(vec![packet::lo_byte(4090), packet::hi_byte(4090)])
    );
    assert_eq!(sim.registers(2, STS_GOAL_POSITION_L, 2), Some(vec![0, 0]));
    assert_eq!(sim.registers(2, STS_ACC, 1), Some(vec![50]));
}

#[test]
fn scan_finds_only_responding_ids() {
    let mut servo = St3215::new(SimTransport::new({
        let mut sim = BusSim::new();
        sim.add_servo(1);
        sim.add_servo(3);
        sim
    }));

    assert_eq!(servo.scan(0..=5), vec![1, 3]);
}

#[test]
fn eprom_lock_cycle_and_id_change() {
    let mut servo = St3215::new(SimTransport::new({
        let mut sim = BusSim::new();
        sim.add_servo(1);
        sim
    }));

    servo.unlock_eprom(1).expect("unlock");
    servo.set_id(1, 3).expect("set id");
    assert!(matches!(
        servo.set_id(1, BROADCAST_ID),
        Err(ServoError::InvalidId(BROADCAST_ID))
    ));

    let sim = servo.bus_mut().transport_mut().sim();
    assert_eq!(sim.registers(1, STS_ID, 1), Some(vec![3]));
    assert_eq!(sim.registers(1, STS_LOCK, 1), Some(vec![0]));
}
