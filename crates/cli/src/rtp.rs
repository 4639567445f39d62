use clap::Parser;
use splitcast::{FileCatalog, PoolConfig, RtpServer};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "splitcast-rtp",
    about = "RTP data-plane worker pool (pairs with splitcast-rtsp)"
)]
struct Args {
    /// Command listening port
    #[arg(default_value_t = 2001, value_parser = port_in_range)]
    port: u16,

    /// Directory the media catalog serves from
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

fn port_in_range(value: &str) -> Result<u16, String> {
    let port: u16 = value.parse().map_err(|_| "not a port number".to_string())?;
    if port > 1024 && port < 60000 {
        Ok(port)
    } else {
        Err("port must be in (1024, 60000)".to_string())
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = PoolConfig {
        bind_addr: format!("0.0.0.0:{}", args.port),
        ..PoolConfig::default()
    };
    let mut server = RtpServer::new(config, Arc::new(FileCatalog::new(args.root)));

    if let Err(e) = server.start() {
        eprintln!("Failed to start pool: {}", e);
        std::process::exit(1);
    }

    println!("RTP pool on port {} — press Enter to stop", args.port);
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    server.stop();
}
