//! MJPEG proxy
//!
//! Pulls a remote MJPEG stream and re-broadcasts it to any number of local
//! viewers. Frames are forwarded without re-encoding; the source is opened
//! once no matter how many viewers attach.
//!
//! Run with: cargo run --example proxy SOURCE_URL [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example proxy http://camera.local/mjpeg
//!   cargo run --example proxy http://localhost:8080/mjpeg 127.0.0.1:9000
//!
//! Pass `--decode` to decode every frame and log its dimensions.

use std::net::SocketAddr;
use std::time::Duration;

use mjpeg_rs::decoder::jpeg;
use mjpeg_rs::{Decoder, MjpegServer, MjpegStream, ServerConfig};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Forward frames from one connection to the source
async fn forward(url: &str, stream: &MjpegStream, decode: bool) -> mjpeg_rs::Result<()> {
    let mut decoder = Decoder::from_url(url).await?;
    tracing::info!(url = url, boundary = decoder.boundary(), "Source connected");

    loop {
        let frame = decoder.next_frame().await?;

        if decode {
            match jpeg::probe(&frame) {
                Ok(info) => tracing::trace!(width = info.width, height = info.height, "Frame"),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable frame");
                    continue;
                }
            }
        }

        stream.update(frame)?;
    }
}

/// Keep the source connected until the broadcaster is closed
async fn relay(url: String, stream: MjpegStream, decode: bool) {
    while !stream.is_closed() {
        match forward(&url, &stream, decode).await {
            Ok(()) => {}
            Err(mjpeg_rs::Error::StreamClosed) => break,
            Err(e) if e.is_end_of_stream() => tracing::info!("Source ended"),
            Err(e) => tracing::warn!(error = %e, "Source failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn print_usage() {
    eprintln!("Usage: proxy SOURCE_URL [BIND_ADDR] [--decode]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  SOURCE_URL   MJPEG stream to relay");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
    eprintln!("  --decode     Validate every frame before forwarding");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let decode = args.iter().any(|a| a == "--decode");
    let positional: Vec<&String> = args.iter().skip(1).filter(|a| !a.starts_with("--")).collect();

    let Some(url) = positional.first().map(|s| s.to_string()) else {
        print_usage();
        std::process::exit(1);
    };

    let bind_addr: SocketAddr = match positional.get(1) {
        Some(addr) => addr.replace("localhost", "127.0.0.1").parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], 8080)),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=debug".parse()?)
                .add_directive("proxy=debug".parse()?),
        )
        .init();

    let server = MjpegServer::new(ServerConfig::with_addr(bind_addr));
    let relay = tokio::spawn(relay(url.clone(), server.stream().clone(), decode));

    println!("Relaying {} on http://{}/mjpeg", url, bind_addr);

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    relay.abort();
    if let Err(e) = result {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
