//! Songclash server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with a self-signed certificate (development)
//! songclash-server --bind 0.0.0.0:4433
//!
//! # Start with a TLS certificate (production)
//! songclash-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//!
//! # Custom playlist, one "Title|preview-url" per line
//! songclash-server --playlist songs.txt
//! ```

use clap::Parser;
use songclash_proto::Track;
use songclash_server::{
    Server, ServerConfig, ServerRuntimeConfig,
    collab::{GuestDirectory, NullScoreSink, PlaylistSource},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Songclash room coordinator server
#[derive(Parser, Debug)]
#[command(name = "songclash-server")]
#[command(about = "Real-time song-quiz room coordinator")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Playlist file, one "Title|preview-url" per line
    #[arg(long)]
    playlist: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("songclash server starting");
    tracing::info!("binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided - using a self-signed certificate");
    }

    let tracks = match &args.playlist {
        Some(path) => PlaylistSource::new(load_playlist(path)?),
        None => {
            tracing::warn!("no playlist provided - using the built-in demo playlist");
            PlaylistSource::demo()
        },
    };

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        driver: ServerConfig { max_connections: args.max_connections, ..Default::default() },
    };

    let server = Server::bind(config, GuestDirectory::new(), tracks, NullScoreSink)?;

    tracing::info!("server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}

/// Parse a playlist file: one `Title|preview-url` per line, `#` comments.
fn load_playlist(path: &str) -> Result<Vec<Track>, std::io::Error> {
    let contents = std::fs::read_to_string(path)?;

    let tracks = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('|') {
            Some((title, url)) => Track {
                title: title.trim().to_string(),
                preview_url: Some(url.trim().to_string()),
            },
            None => Track { title: line.to_string(), preview_url: None },
        })
        .collect();

    Ok(tracks)
}
