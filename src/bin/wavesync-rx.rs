/*
 *  Copyright (C) 2026 The WaveSync Authors
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Receiver binary: listens for datagrams on a single channel, demuxes
//! them, and drives the playback scheduler against a real (or null)
//! audio sink. Orchestration mirrors `wavesync-tx`'s `Toplevel` shape.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::IntoDiagnostic;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wavesync::clock::SystemClock;
use wavesync::config::{Args, Mode, Settings};
use wavesync::player::ChunkPlayer;
use wavesync::queue::chunk_queue;
use wavesync::receiver::Receiver;
use wavesync::sink::open_configured_sink;
use wavesync::socket::create_rx_socket;
use wavesync::stats::{Stats, run_reporter};

/// Depth of the hand-off queue between the demux task and the playback
/// thread; generous enough to absorb a stall without the receiver
/// blocking on a full queue under normal conditions.
const QUEUE_DEPTH: usize = 600;

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let args = Args::parse();
    let settings = Settings::try_from(args).into_diagnostic()?;
    init_logging(settings.debug);

    if settings.mode != Mode::Receive {
        return Err(miette::miette!("wavesync-rx requires --rx"));
    }

    let channel = *settings
        .channels
        .first()
        .expect("Settings validation guarantees exactly one --channel on --rx");

    info!(
        host = %gethostname::gethostname().to_string_lossy(),
        %channel,
        "starting wavesync receiver"
    );

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("rx", move |s| run(s, settings, channel)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(1))
    .await
    .into_diagnostic()?;

    Ok(())
}

async fn run(
    subsys: SubsystemHandle,
    settings: Settings,
    channel: std::net::SocketAddr,
) -> Result<(), std::convert::Infallible> {
    let stats = Stats::default();
    let socket = match create_rx_socket(channel, settings.bind).and_then(|socket| {
        socket.set_nonblocking(true)?;
        Ok(tokio::net::UdpSocket::from_std(socket)?)
    }) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!("failed to open receive socket: {e}");
            subsys.request_shutdown();
            return Ok(());
        }
    };

    let (producer, consumer) = chunk_queue(QUEUE_DEPTH);
    let receiver = Receiver::new(SystemClock, socket, producer, stats.clone());

    let reporter_stats = stats.clone();
    subsys.start(SubsystemBuilder::new("rx-stats", move |s| async move {
        run_reporter(s, reporter_stats, Duration::from_secs(1)).await;
        Ok::<(), std::convert::Infallible>(())
    }));

    let stop = Arc::new(AtomicBool::new(false));
    let sink = open_configured_sink(settings.device_index, settings.buffer_size_frames as usize);
    let tolerance_ms = settings.tolerance_ms;
    let player_stop = stop.clone();
    subsys.start(SubsystemBuilder::new("rx-player", move |s| async move {
        let mut player = ChunkPlayer::new(SystemClock, sink, consumer, stats, tolerance_ms, player_stop.clone());
        let player_task = tokio::task::spawn_blocking(move || {
            wavesync::utils::set_realtime_priority();
            player.run();
        });
        tokio::select! {
            _ = s.on_shutdown_requested() => player_stop.store(true, Ordering::Relaxed),
            _ = player_task => {}
        }
        Ok::<(), std::convert::Infallible>(())
    }));

    if let Err(e) = receiver.run(subsys).await {
        tracing::error!("receiver demux task exited: {e}");
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
}
