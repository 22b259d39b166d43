use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use serialport::SerialPortType;
use stservo::{ServoError, St3215};

#[derive(Debug, Parser)]
#[command(name = "stservoctl", about = "ST3215 servo bus client")]
struct Args {
    #[arg(
        long,
        value_name = "PORT",
        help = "Serial port path (e.g. COM6 or /dev/ttyUSB0). If omitted, auto-selects a detected port."
    )]
    port: Option<String>,

    #[arg(long, default_value_t = 1_000_000)]
    baud: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ping a range of ids and list the servos that answered.
    Scan {
        #[arg(long, default_value_t = 0)]
        start: u8,

        #[arg(long, default_value_t = 20)]
        end: u8,
    },

    /// Read position, speed, load and health of one servo.
    Read {
        #[arg(long)]
        id: u8,
    },

    /// Send a position command, then read back the current state.
    Move {
        #[arg(long)]
        id: u8,

        #[arg(long, value_name = "0..4095")]
        position: u16,

        #[arg(long, default_value_t = 2400)]
        speed: u16,

        #[arg(long, default_value_t = 50)]
        acc: u8,
    },

    /// Snapshot several servos in one bus transaction.
    State {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<u8>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .without_timestamps()
        .init()?;

    let args = Args::parse();
    let port = match args.port.or_else(detect_port) {
        Some(port) => port,
        None => {
            log::error!("no serial port found; pass one with --port");
            std::process::exit(1);
        }
    };

    log::info!("using {} at {} baud", port, args.baud);
    let mut servo = St3215::open(&port, args.baud)?;

    match args.command {
        Command::Scan { start, end } => scan(&mut servo, start, end),
        Command::Read { id } => read(&mut servo, id)?,
        Command::Move {
            id,
            position,
            speed,
            acc,
        } => move_to(&mut servo, id, position, speed, acc)?,
        Command::State { ids } => state(&mut servo, &ids)?,
    }

    Ok(())
}

/// Prefer a USB adapter, fall back to whatever enumerates first.
fn detect_port() -> Option<String> {
    let ports = serialport::available_ports().ok()?;
    ports
        .iter()
        .find(|info| matches!(info.port_type, SerialPortType::UsbPort(_)))
        .or_else(|| ports.first())
        .map(|info| info.port_name.clone())
}

fn scan<T: stservo::Transport>(servo: &mut St3215<T>, start: u8, end: u8) {
    let found = servo.scan(start..=end);
    if found.is_empty() {
        println!("no servos responded in ids {start}..={end}");
        return;
    }
    for id in found {
        match servo.ping(id) {
            Ok(model) => println!("id {id:3}  model {model}"),
            Err(err) => println!("id {id:3}  second ping failed: {err}"),
        }
    }
}

fn read<T: stservo::Transport>(servo: &mut St3215<T>, id: u8) -> Result<(), ServoError> {
    let (position, speed) = servo.read_position_speed(id)?;
    println!("position    {position}");
    println!("speed       {speed}");
    println!("load        {}", servo.read_load(id)?);
    println!("voltage     {:.1} V", servo.read_voltage(id)?);
    println!("current     {:.1} mA", servo.read_current(id)?);
    println!("temperature {} C", servo.read_temperature(id)?);
    println!("moving      {}", servo.read_moving(id)?);
    Ok(())
}

fn move_to<T: stservo::Transport>(
    servo: &mut St3215<T>,
    id: u8,
    position: u16,
    speed: u16,
    acc: u8,
) -> Result<(), ServoError> {
    servo.write_position(id, position, speed, acc)?;
    log::info!("commanded id {id} to {position}");

    thread::sleep(Duration::from_millis(200));
    let (now, speed_now) = servo.read_position_speed(id)?;
    println!("position {now}  speed {speed_now}");
    Ok(())
}

fn state<T: stservo::Transport>(servo: &mut St3215<T>, ids: &[u8]) -> Result<(), ServoError> {
    let states = servo.sync_read_state(ids)?;
    if states.is_empty() {
        println!("no servo answered");
        return Ok(());
    }

    println!("  id  position   speed    load   volt  temp  moving  alarms");
    for s in &states {
        println!(
            "{:4}  {:8}  {:6}  {:6}  {:5.1}  {:4}  {:6}  {}",
            s.id, s.position, s.speed, s.load, s.voltage, s.temperature, s.moving, s.flags
        );
    }
    Ok(())
}
