//! switch-slowpath: CPU slow path of a switch agent.
//!
//! - `decode` prints the header chain of one hex-encoded frame
//! - `run` builds the switch from a JSON config, replays trapped frames
//!   from a file and prints the counters; with `--serve` it keeps router
//!   advertisements and neighbor aging running until SIGINT/SIGTERM

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switch_slowpath::Switch;
use switch_slowpath::config::AgentConfig;
use switch_slowpath::dhcp::{DhcpV4Packet, DhcpV6Packet};
use switch_slowpath::handlers::is_dhcpv4;
use switch_slowpath::handlers::dhcpv6::is_for_relay;
use switch_slowpath::hw::{PacketIo, TxPacket};
use switch_slowpath::packet::{
    Cursor, EthHdr, EtherType, IcmpHdr, IpProtocol, Ipv4Hdr, Ipv6Hdr, TcpHdr, UdpHdr, WireHeader,
};
use switch_slowpath::state::{PortId, VlanId};

/// Switch CPU slow path
#[derive(Parser, Debug)]
#[command(name = "switch-slowpath", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the parsed headers of a hex-encoded Ethernet frame
    Decode {
        /// Frame bytes as hex; whitespace and ':' separators are ignored
        hex: String,
    },
    /// Run the slow path against a config
    Run {
        /// JSON agent config
        #[arg(long)]
        config: PathBuf,

        /// JSON array of trapped frames to replay: [{"port": 1, "vlan": 5, "data": "<hex>"}]
        #[arg(long)]
        frames: Option<PathBuf>,

        /// Keep running until SIGINT/SIGTERM after the replay
        #[arg(long)]
        serve: bool,
    },
}

#[derive(Debug, Deserialize)]
struct TrappedFrame {
    port: PortId,
    #[serde(default)]
    vlan: Option<VlanId>,
    data: String,
}

/// Without hardware, transmitted frames are only logged.
struct LoggingIo;

impl PacketIo for LoggingIo {
    fn send_switched(&self, pkt: TxPacket) {
        info!(len = pkt.len(), frame = %to_hex(pkt.buf()), "transmit switched");
    }

    fn send_out_of_port(&self, pkt: TxPacket, port: PortId) {
        info!(port = %port, len = pkt.len(), frame = %to_hex(pkt.buf()), "transmit out of port");
    }

    fn send_to_host(&self, frame: &[u8], port: PortId, vlan: Option<VlanId>) {
        info!(port = %port, ?vlan, len = frame.len(), "deliver to host");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switch_slowpath=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Decode { hex } => decode(&hex),
        Command::Run {
            config,
            frames,
            serve,
        } => run(config, frames, serve),
    }
}

fn decode(hex: &str) -> Result<()> {
    let data = parse_hex(hex)?;
    let mut cursor = Cursor::new(&data);
    let eth = EthHdr::parse(&mut cursor).context("ethernet header")?;
    println!("{eth:?}");

    match eth.ethertype {
        EtherType::IPV4 => {
            let ip = Ipv4Hdr::parse(&mut cursor).context("ipv4 header")?;
            println!("{ip:?}");
            decode_l4(ip.protocol, &mut cursor, false)?;
        }
        EtherType::IPV6 => {
            let ip = Ipv6Hdr::parse(&mut cursor).context("ipv6 header")?;
            println!("{ip:?}");
            decode_l4(ip.next_header, &mut cursor, true)?;
        }
        other => println!("payload: {} bytes of ethertype {other:?}", cursor.remaining()),
    }
    Ok(())
}

fn decode_l4(proto: IpProtocol, cursor: &mut Cursor<'_>, v6: bool) -> Result<()> {
    match proto {
        IpProtocol::UDP => {
            let udp = UdpHdr::parse(cursor).context("udp header")?;
            println!("{udp:?}");
            if !v6 && is_dhcpv4(&udp) {
                let msg = DhcpV4Packet::parse(cursor).context("dhcpv4 message")?;
                println!("{msg:?}");
            } else if v6 && (is_for_relay(udp.dst_port) || is_for_relay(udp.src_port)) {
                let msg = DhcpV6Packet::parse(cursor).context("dhcpv6 message")?;
                println!("{msg:?}");
            }
        }
        IpProtocol::TCP => {
            let tcp = TcpHdr::parse(cursor).context("tcp header")?;
            println!("{tcp:?}");
        }
        IpProtocol::ICMP | IpProtocol::ICMPV6 => {
            let icmp = IcmpHdr::parse(cursor).context("icmp header")?;
            println!("{icmp:?} body: {}", to_hex(cursor.rest()));
        }
        other => println!("payload: {} bytes of protocol {other:?}", cursor.remaining()),
    }
    Ok(())
}

fn run(config: PathBuf, frames: Option<PathBuf>, serve: bool) -> Result<()> {
    let config = AgentConfig::load(&config)
        .with_context(|| format!("loading {}", config.display()))?;
    let state = config.build().context("validating config")?;
    let mut switch = Switch::start(state, config.neighbor, Arc::new(LoggingIo))
        .context("starting slow path")?;

    if let Some(path) = frames {
        let json = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let frames: Vec<TrappedFrame> = serde_json::from_str(&json).context("parsing frames")?;
        info!(count = frames.len(), "replaying trapped frames");
        for (i, frame) in frames.iter().enumerate() {
            let data = parse_hex(&frame.data).with_context(|| format!("frame {i}"))?;
            if let Err(e) = switch.handle_inbound_frame(&data, frame.port, frame.vlan) {
                debug!(frame = i, error = %e, "frame not handled");
            }
        }
        switch.wait_for_state_updates();
    }

    if serve {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(wait_for_signal())?;
    }

    switch.shutdown();
    println!("{}", serde_json::to_string_pretty(&switch.stats().snapshot())?);
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    info!("serving, press Ctrl+C to stop");
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    Ok(())
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            u8::from_str_radix(pair, 16).with_context(|| format!("invalid hex byte {pair:?}"))
        })
        .collect()
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
