//! framesync-demo: the whole multi-frame handshake in one process.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ SimulatedHost        -- PortProvider on the host window
//!  └─ SimulatedGuest × N   -- each discovers the sidebar through the host
//!  └─ FrameSyncService     -- discovers the host, accepts forwarded guest ports
//!       └─ scripted exchange:
//!            all guests reported their document
//!              → loadAnnotations to every guest, openSidebar to the host
//!            first guest unloads
//!              → GuestDisconnected, exit
//! ```
//!
//! Set `RUST_LOG=debug` (or `trace`) to watch every request, offer and call.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framesync_core::FrameWindow;
use framesync_sidebar::application::frame_sync::{FrameSyncEvent, FrameSyncService};
use framesync_sidebar::application::guest_registry::DocumentInfo;
use framesync_sidebar::domain::events::{GuestToSidebar, HostToSidebar, SidebarToHost};
use framesync_sidebar::infrastructure::simulated_frames::{SimulatedGuest, SimulatedHost};
use framesync_sidebar::infrastructure::storage::config::load_or_default;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "framesync-demo", about = "Simulated host, guests and sidebar exchanging calls")]
struct Args {
    /// Path to a TOML config file.  Defaults to the platform config directory.
    #[arg(long, env = "FRAMESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Number of guest frames to simulate.
    #[arg(long, default_value_t = 2)]
    guests: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref());

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();

    info!(guests = args.guests, "framesync demo starting");

    let host_window = FrameWindow::new("host");
    let sidebar_window = FrameWindow::new("sidebar");

    // Guests may start before the host or the sidebar; discovery retries until answered.
    let mut guests = Vec::with_capacity(args.guests);
    for n in 0..args.guests {
        let document = DocumentInfo {
            uri: format!("https://example.com/doc-{n}"),
            frame_identifier: (n > 0).then(|| format!("frame-{n}")),
            persistent: n == 0,
        };
        let (guest, _calls) = SimulatedGuest::start(host_window.clone(), format!("guest-{n}"), document);
        guests.push(guest);
    }

    // The sidebar must be listening before the host starts forwarding guest ports.
    let (mut sync, mut events) =
        FrameSyncService::new(config, sidebar_window.clone(), host_window.clone());
    let (mut host, _host_calls) = SimulatedHost::start(host_window, sidebar_window);
    host.call_sidebar(HostToSidebar::SidebarOpened, vec![]);

    sync.connect().await.context("connecting to the host frame")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut reported = HashSet::new();
    let mut done = args.guests == 0;
    while !done {
        let more = tokio::select! {
            more = sync.process_next() => more,
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
        };
        if !more {
            break;
        }

        while let Ok(event) = events.try_recv() {
            match event {
                FrameSyncEvent::GuestCall {
                    source_id,
                    method: GuestToSidebar::DocumentInfoChanged,
                    ..
                } => {
                    reported.insert(source_id);
                    if reported.len() == args.guests {
                        info!("every guest reported its document");
                        sync.load_annotations(&sample_annotations());
                        sync.call_host(SidebarToHost::OpenSidebar, vec![]);
                        if !guests.is_empty() {
                            let first = guests.remove(0);
                            info!(source_id = first.source_id(), "unloading first guest");
                            first.unload().await;
                        }
                    }
                }
                FrameSyncEvent::GuestDisconnected {
                    source_id,
                    retained,
                } => {
                    info!(%source_id, retained, "scripted exchange complete");
                    done = true;
                }
                other => info!(event = ?other, "frame sync event"),
            }
        }
    }

    for guest in guests {
        guest.unload().await;
    }
    sync.destroy();
    host.shutdown();
    if !done {
        warn!("demo stopped before the scripted exchange completed");
    }
    info!("framesync demo stopped");
    Ok(())
}

fn sample_annotations() -> Vec<serde_json::Value> {
    vec![
        json!({
            "$tag": "t1",
            "id": "a1",
            "text": "only the sidebar sees this",
            "uri": "https://example.com/doc-0",
            "target": [{"selector": [{"type": "TextQuoteSelector", "exact": "example"}]}],
        }),
        json!({
            "$tag": "t2",
            "id": "a2",
            "text": "page note",
            "uri": "https://example.com/doc-1",
            "target": [],
        }),
    ]
}
