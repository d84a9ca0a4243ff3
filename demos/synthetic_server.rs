//! Synthetic MJPEG server
//!
//! Generates a moving test pattern, encodes it as JPEG and serves it over
//! HTTP.
//!
//! Run with: cargo run --example synthetic_server [BIND_ADDR] [FPS]
//!
//! Examples:
//!   cargo run --example synthetic_server                    # binds to 0.0.0.0:8080, 15 fps
//!   cargo run --example synthetic_server localhost          # binds to 127.0.0.1:8080
//!   cargo run --example synthetic_server 127.0.0.1:9000 30  # binds to 127.0.0.1:9000, 30 fps
//!
//! ## Watching
//!
//! Browser:  http://localhost:8080/
//! ffplay:   ffplay -f mjpeg http://localhost:8080/mjpeg
//! Snapshot: curl -o frame.jpg http://localhost:8080/jpeg

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use mjpeg_rs::{MjpegServer, MjpegStream, ServerConfig};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const QUALITY: u8 = 80;

/// Render frame `n` of the test pattern
fn render(n: u64) -> Result<Bytes, image::ImageError> {
    let bar = (n * 4 % WIDTH as u64) as u32;
    let img = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if x.abs_diff(bar) < 8 {
            Rgb([255, 255, 255])
        } else {
            Rgb([(x * 255 / WIDTH) as u8, (y * 255 / HEIGHT) as u8, (n % 256) as u8])
        }
    });

    let mut out = Vec::with_capacity(16 * 1024);
    JpegEncoder::new_with_quality(&mut out, QUALITY).encode_image(&img)?;
    Ok(Bytes::from(out))
}

/// Publish frames until the broadcaster is closed
async fn produce(stream: MjpegStream, fps: u32) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps.max(1));
    let mut n = 0u64;

    loop {
        ticker.tick().await;
        n += 1;

        // Nobody watching and a snapshot is cached: skip the encode
        if stream.watcher_count() == 0 && stream.latest().is_some() {
            continue;
        }

        let frame = match render(n) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode frame");
                continue;
            }
        };

        if stream.update(frame).is_err() {
            break;
        }

        if n % (fps as u64 * 10).max(1) == 0 {
            let stats = stream.stats();
            tracing::debug!(
                watchers = stats.watchers,
                published = stats.frames_published,
                dropped = stats.frames_dropped,
                "Producer progress"
            );
        }
    }
}

/// Parse a bind address
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8080
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "127.0.0.1" -> 127.0.0.1:8080
/// - "0.0.0.0:9000" -> 0.0.0.0:9000
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8080;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: synthetic_server [BIND_ADDR] [FPS]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
    eprintln!("  FPS          Frames per second (default: 15)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => SocketAddr::from(([0, 0, 0, 0], 8080)),
    };

    let fps = match args.get(2).map(|s| s.parse::<u32>()) {
        Some(Ok(fps)) if fps > 0 => fps,
        Some(_) => {
            eprintln!("Error: FPS must be a positive integer");
            std::process::exit(1);
        }
        None => 15,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=debug".parse()?)
                .add_directive("synthetic_server=debug".parse()?),
        )
        .init();

    let server = MjpegServer::new(ServerConfig::with_addr(bind_addr));
    let producer = tokio::spawn(produce(server.stream().clone(), fps));

    println!("Serving a {}x{} test pattern at {} fps", WIDTH, HEIGHT, fps);
    println!("Browser:  http://{}/", bind_addr);
    println!("Stream:   http://{}/mjpeg", bind_addr);
    println!("Snapshot: http://{}/jpeg", bind_addr);
    println!();

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    producer.await?;
    if let Err(e) = result {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
