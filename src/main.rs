//! bitpull - main entry point
//!
//! Parse the torrent descriptor, run the download core against its
//! tracker and swarm, and write the assembled content to disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bitpull::{
    CliArgs, DownloadConfig, DownloadStats, Downloader, MemorySink, Metainfo, PieceSink,
    ProgressDisplay, TorrentParser,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("bitpull starting");

    let meta = Arc::new(
        TorrentParser::parse_file(&args.torrent_file).context("failed to load torrent file")?,
    );
    if !args.is_quiet() {
        display_torrent_info(&meta, &args);
    }

    let sink = Arc::new(MemorySink::new());
    let downloader = Downloader::new(
        Arc::clone(&meta),
        DownloadConfig {
            port: args.port,
            max_peers: args.max_peers,
        },
        Arc::clone(&sink) as Arc<dyn PieceSink>,
    )?;

    // Ctrl-C cancels the whole download tree
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; shutting down");
                token.cancel();
            }
        }
    });

    let progress = tokio::spawn(progress_loop(
        Arc::clone(&downloader),
        ProgressDisplay::new(args.is_quiet()),
    ));

    let result = Arc::clone(&downloader).run(token.clone()).await;

    match result {
        Ok(()) => {
            let _ = progress.await;
            write_output(&meta, &sink, &args.output_dir).await?;
            Ok(())
        }
        Err(e) => {
            progress.abort();
            // best effort: tell the tracker we are going away
            if token.is_cancelled() {
                let _ = downloader.tracker().stopped().await;
            }
            ProgressDisplay::new(args.is_quiet()).print_error(&e.to_string())?;
            Err(e)
        }
    }
}

/// Initialize logging from the verbosity flags
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

fn display_torrent_info(meta: &Metainfo, args: &CliArgs) {
    println!("Torrent:");
    println!("  Name: {}", meta.name);
    println!(
        "  Size: {} ({} pieces of {})",
        DownloadStats::format_bytes(meta.total_size),
        meta.piece_count(),
        DownloadStats::format_bytes(meta.piece_length),
    );
    println!("  Tracker: {}", meta.announce);
    println!("  Info hash: {}", meta.info_hash_hex());
    println!("  Output: {}", args.output_dir.display());
    println!();
}

/// Redraw the status line until every piece has verified
async fn progress_loop(downloader: Arc<Downloader>, mut display: ProgressDisplay) {
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snapshot = downloader.snapshot();
        let stats = DownloadStats {
            downloaded: snapshot.downloaded_bytes,
            total: snapshot.total_bytes,
            pieces_complete: snapshot.pieces_complete,
            pieces_total: snapshot.pieces_total,
            peers: snapshot.connected_peers,
        };
        let _ = display.update(&stats);
        if snapshot.pieces_complete == snapshot.pieces_total {
            let _ = display.print_complete(&stats);
            return;
        }
    }
}

/// Lay the delivered pieces out into the torrent's files under
/// `output_dir`. Multi-file torrents nest under the torrent name.
async fn write_output(meta: &Metainfo, sink: &MemorySink, output_dir: &Path) -> anyhow::Result<()> {
    let pieces = sink.take_pieces();
    let mut content: Vec<u8> = Vec::with_capacity(meta.total_size as usize);
    for payload in pieces.values() {
        content.extend_from_slice(payload);
    }
    anyhow::ensure!(
        content.len() as u64 == meta.total_size,
        "assembled {} bytes, torrent declares {}",
        content.len(),
        meta.total_size
    );

    let nested = meta.files.len() > 1;
    let mut offset = 0usize;
    for file in &meta.files {
        let mut path = output_dir.to_path_buf();
        if nested {
            path.push(&meta.name);
        }
        for component in &file.path {
            path.push(component);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let end = offset + file.length as usize;
        tokio::fs::write(&path, &content[offset..end])
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), bytes = file.length, "wrote file");
        offset = end;
    }
    Ok(())
}
