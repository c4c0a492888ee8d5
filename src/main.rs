use clap::{Parser, ValueEnum};
use dht20_node::app::Event;
use dht20_node::bridge::parse_period;
use std::error::Error;
use std::io::{self, Read};
use std::panic::{self, PanicHookInfo};
use std::time::Duration;
use tokio::sync::mpsc;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// How often the dispatcher polls the sampling cadence.
const POLL_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Device role to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Sample and broadcast (layout A record)
    Node,
    /// Node duties plus passive relay of peer sightings (layout B record)
    Gateway,
    /// Desktop serial-to-HTTP bridge
    Bridge,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Node => write!(f, "node"),
            Role::Gateway => write!(f, "gateway"),
            Role::Bridge => write!(f, "bridge"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Device role.
    #[arg(long, value_enum, default_value_t = Role::Node)]
    role: Role,

    /// Identifier carried in the manufacturer block.
    #[arg(long, default_value_t = 1)]
    peer_id: u32,

    /// Local name carried in the name block (truncated to the layout maximum).
    #[arg(long, default_value = "DHT20_BLE")]
    name: String,

    /// Peer id the gateway relays; repeatable. Defaults to peers 2 and 3.
    #[arg(long = "relay-peer", value_name = "ID")]
    relay_peers: Vec<u8>,

    /// I2C adapter number of the sensor bus (/dev/i2c-<n>).
    #[arg(long, default_value_t = 1)]
    i2c_adapter: u32,

    /// HCI device number of the radio.
    #[arg(long, default_value_t = 0)]
    hci_dev: u16,

    /// Initial advertising interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    adv_interval: u32,

    /// Serial port the bridge reads (node roles read commands from stdin).
    #[arg(long, default_value = "/dev/ttyACM0")]
    port: String,

    /// Baud rate of the bridge serial port.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Upload endpoint of the bridge role.
    #[arg(
        long,
        default_value = "https://sensor-dht20-default-rtdb.firebaseio.com/sensor_data.json"
    )]
    url: String,

    /// Minimum interval between uploads (bare number = milliseconds).
    #[arg(long, value_parser = parse_period, default_value = "1000")]
    period: Duration,

    /// Verbose output, print sensor failures and mode changes
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Forward dispatcher ticks at the poll interval.
fn spawn_ticker(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POLL_TICK_INTERVAL);
        loop {
            interval.tick().await;
            if tx.send(Event::Tick).await.is_err() {
                break;
            }
        }
    });
}

/// SIGUSR1 stands in for the hardware mode button on a desktop host.
fn spawn_button(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())
        else {
            return;
        };
        while signal.recv().await.is_some() {
            if tx.send(Event::ButtonEdge).await.is_err() {
                break;
            }
        }
    });
}

/// Feed stdin bytes into the event channel as serial configuration input.
fn spawn_stdin_reader(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 64];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if tx.blocking_send(Event::SerialByte(byte)).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });
}

#[cfg(all(feature = "i2c", feature = "hci"))]
async fn run_node(options: Options) -> Result<(), Box<dyn Error>> {
    use dht20_node::app::{EVENT_CHANNEL_BUFFER_SIZE, NodeConfig};
    use dht20_node::hw::{hci, i2c};
    use dht20_node::{Dht20, LAYOUT_A, LAYOUT_B};

    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
    spawn_ticker(tx.clone());
    spawn_button(tx.clone());
    spawn_stdin_reader(tx.clone());

    if options.role == Role::Gateway {
        hci::start_listener(options.hci_dev, tx.clone()).await?;
    }
    drop(tx);

    let bus = i2c::LinuxI2cBus::open(options.i2c_adapter)?;
    let mut radio = hci::HciRadio::open(options.hci_dev)?;
    radio.start_advertising(options.adv_interval)?;

    let config = NodeConfig {
        peer_id: options.peer_id,
        name: options.name.clone(),
        layout: match options.role {
            Role::Gateway => LAYOUT_B,
            _ => LAYOUT_A,
        },
        relay_peers: (options.role == Role::Gateway).then(|| {
            if options.relay_peers.is_empty() {
                vec![2, 3]
            } else {
                options.relay_peers.clone()
            }
        }),
        verbose: options.verbose,
    };

    dht20_node::app::run(
        config,
        Dht20::new(bus),
        &mut radio,
        &mut rx,
        &mut io::stdout(),
        &mut io::stderr(),
    )
    .await?;
    Ok(())
}

#[cfg(not(all(feature = "i2c", feature = "hci")))]
async fn run_node(_options: Options) -> Result<(), Box<dyn Error>> {
    Err("node roles require the 'i2c' and 'hci' features".into())
}

#[cfg(feature = "serial")]
async fn run_bridge(options: Options) -> Result<(), Box<dyn Error>> {
    use dht20_node::app::EVENT_CHANNEL_BUFFER_SIZE;
    use dht20_node::bridge::{HttpUploader, RateLimiter};
    use dht20_node::hw::serial;

    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
    serial::spawn_line_reader(&options.port, options.baud, tx)?;

    let uploader = HttpUploader::new(options.url.clone());
    let mut limiter = RateLimiter::new(options.period);

    dht20_node::bridge::run_bridge(
        &mut rx,
        &uploader,
        &mut limiter,
        &mut io::stdout(),
        &mut io::stderr(),
    )
    .await?;
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn run_bridge(_options: Options) -> Result<(), Box<dyn Error>> {
    Err("the bridge role requires the 'serial' feature".into())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    let result = match options.role {
        Role::Bridge => run_bridge(options).await,
        _ => run_node(options).await,
    };

    match result {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
