use clap::Parser;
use crossbeam_channel::bounded;
use kdbzph_mock_engine::{Engine, NetworkThread};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock_engine", about = "Scripted websocket query engine for local testing")]
struct Args {
    #[arg(long, env = "KDBZPH_MOCK_ADDR", default_value = "127.0.0.1:0")]
    addr: String,

    /// Write the bound address here once listening.
    #[arg(long)]
    addr_file: Option<PathBuf>,

    #[arg(long)]
    run_for_ms: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let run_for = args.run_for_ms.map(Duration::from_millis);

    let (in_tx, in_rx) = bounded(kdbzph_mock_engine::INBOUND_CAP);
    let (out_tx, out_rx) = bounded(kdbzph_mock_engine::OUTBOUND_CAP);

    let net = match NetworkThread::spawn_with_addr(&args.addr, in_tx, out_rx) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.addr_file {
        if let Err(e) = fs::write(path, net.listen_addr().to_string()) {
            tracing::warn!(error = %e, path = %path.display(), "failed to write addr file");
        }
    }

    println!("mock_engine listening on ws://{}", net.listen_addr());

    let mut engine = Engine::new(in_rx, out_tx);
    let start = Instant::now();
    loop {
        engine.tick();
        thread::sleep(kdbzph_mock_engine::TICK_INTERVAL);
        if let Some(max) = run_for {
            if start.elapsed() >= max {
                break;
            }
        }
    }

    tracing::info!(served = engine.served(), "mock engine stopping");
    net.shutdown();
}
