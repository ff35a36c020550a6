use bobby_bit::coordinator::{Coordinator, CoordinatorConfig};
use bobby_bit::metainfo::Metainfo;
use bobby_bit::storage::FileSink;
use clap::Parser;
use std::time::Duration;

/// Leeches a single torrent to disk and exits once every piece verifies.
#[derive(Parser, Debug)]
struct Cli {
    /// path to the *.torrent file
    #[arg(short, long)]
    file: String,

    /// path where the downloaded data is written
    #[arg(short, long)]
    out: String,

    /// port reported to trackers
    #[arg(long, default_value_t = 6881)]
    port: u16,

    /// maximum simultaneously open peer connections
    #[arg(long, default_value_t = 5)]
    max_concurrent_peers: usize,

    /// stop accumulating tracker peers past this count
    #[arg(long, default_value_t = 50)]
    max_accumulated_peers: usize,

    /// requested block length in bytes
    #[arg(long, default_value_t = 1 << 14)]
    block_length: u32,

    /// seconds a reserved block may sit unfulfilled before it's freed again
    #[arg(long, default_value_t = 5)]
    block_timeout_secs: u64,

    /// milliseconds a peer must wait between requests
    #[arg(long, default_value_t = 200)]
    request_cooldown_millis: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let bytes = std::fs::read(&cli.file)?;
    let metainfo = Metainfo::from_bytes(&bytes)?;
    log::info!(
        "loaded '{}': {} pieces, {} bytes total",
        metainfo.name(),
        metainfo.num_pieces(),
        metainfo.total_length()
    );

    let sink = FileSink::create(&cli.out, metainfo.piece_length())?;
    let config = CoordinatorConfig {
        port: cli.port,
        max_concurrent_peers: cli.max_concurrent_peers,
        max_accumulated_peers: cli.max_accumulated_peers,
        connect_timeout: Duration::from_secs(2),
        poll_timeout: Duration::from_secs(1),
        block_length: cli.block_length,
        block_timeout: Duration::from_secs(cli.block_timeout_secs),
        request_cooldown: Duration::from_millis(cli.request_cooldown_millis),
    };

    let mut coordinator = Coordinator::new(metainfo, config, sink)?;
    coordinator.run()?;
    log::info!("download complete");
    Ok(())
}
