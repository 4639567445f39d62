use clap::Parser;
use splitcast::{RtspServer, ServerConfig};
use std::io;

#[derive(Parser)]
#[command(
    name = "splitcast-rtsp",
    about = "RTSP control-plane server (pairs with splitcast-rtp)"
)]
struct Args {
    /// RTSP listening port
    #[arg(default_value_t = 2000, value_parser = port_in_range)]
    port: u16,

    /// Command port of the splitcast-rtp data plane
    #[arg(default_value_t = 2001, value_parser = port_in_range)]
    rtp_port: u16,
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
    if args.port == args.rtp_port {
        eprintln!("RTSP and RTP ports must be different");
        std::process::exit(1);
    }

    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", args.port),
        data_plane_port: args.rtp_port,
        ..ServerConfig::default()
    };
    let mut server = RtspServer::new(config);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    println!(
        "RTSP server on port {} (data plane on {}) — press Enter to stop",
        args.port, args.rtp_port
    );
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    server.stop();
}
