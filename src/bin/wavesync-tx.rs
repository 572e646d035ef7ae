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

//! Transmitter binary: reads PCM from a UNIX-domain socket, stamps and
//! sends it, and optionally plays it back locally via `--local-play`.
//! Orchestration is a `Toplevel` subsystem tree that catches signals
//! and drives a graceful shutdown, with the realtime pacing loop
//! pushed onto its own blocking thread.

use std::os::unix::net::UnixStream;
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
use wavesync::error::WaveSyncResult;
use wavesync::packetizer::Packetizer;
use wavesync::player::ChunkPlayer;
use wavesync::queue::{QueueEntry, chunk_queue};
use wavesync::sample_reader::SampleReader;
use wavesync::sink::open_configured_sink;
use wavesync::socket::{TxSocketOpts, create_tx_socket};
use wavesync::stats::{Stats, run_reporter};

/// Soft backpressure limit for the local-play hand-off queue.
const QUEUE_DEPTH: usize = 600;

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let args = Args::parse();
    let settings = Settings::try_from(args).into_diagnostic()?;
    init_logging(settings.debug);

    if settings.mode != Mode::Transmit {
        return Err(miette::miette!("wavesync-tx requires --tx <unix-socket>"));
    }

    info!(
        host = %gethostname::gethostname().to_string_lossy(),
        channels = ?settings.channels,
        "starting wavesync transmitter"
    );

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("tx", move |s| run(s, settings)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(1))
    .await
    .into_diagnostic()?;

    Ok(())
}

async fn run(subsys: SubsystemHandle, settings: Settings) -> WaveSyncResult<()> {
    let stats = Stats::default();

    let source_path = settings
        .tx_source
        .clone()
        .expect("Mode::Transmit guarantees tx_source is set");
    let mut source = UnixStream::connect(&source_path)?;

    let mut reader = SampleReader::new(SystemClock, settings.audio);

    let tx_opts = TxSocketOpts {
        multicast_ttl: settings.ttl,
        multicast_loop: settings.multicast_loop,
        broadcast: settings.broadcast,
        mtu_discover: true,
    };
    let primary = *settings
        .channels
        .first()
        .expect("clap default guarantees at least one --channel");
    let socket = create_tx_socket(settings.bind, 0, primary, &tx_opts)?;

    let stop = Arc::new(AtomicBool::new(false));

    let (local_queue, player_join) = if settings.local_play {
        let (producer, consumer) = chunk_queue(QUEUE_DEPTH);
        producer.push_blocking(QueueEntry::Config(settings.audio));
        let sink = open_configured_sink(settings.device_index, settings.buffer_size_frames as usize);
        let player_stop = stop.clone();
        let player_stats = stats.clone();
        let tolerance_ms = settings.tolerance_ms;
        let handle = tokio::task::spawn_blocking(move || {
            wavesync::utils::set_realtime_priority();
            let mut player = ChunkPlayer::new(SystemClock, sink, consumer, player_stats, tolerance_ms, player_stop);
            player.run();
        });
        (Some(producer), Some(handle))
    } else {
        (None, None)
    };

    let mut packetizer = Packetizer::new(
        SystemClock,
        socket,
        settings.channels.clone(),
        settings.compress_level,
        local_queue,
        stats.clone(),
        stop.clone(),
    );

    let latency_s = settings.audio.latency_secs();
    let reporter_stats = stats.clone();
    subsys.start(SubsystemBuilder::new("tx-stats", move |s| async move {
        run_reporter(s, reporter_stats, Duration::from_secs(1)).await;
        Ok::<(), std::convert::Infallible>(())
    }));

    let reader_handle = tokio::task::spawn_blocking(move || {
        wavesync::utils::set_realtime_priority();
        packetizer.run(&mut reader, &mut source, latency_s)
    });

    let pacing_result = tokio::select! {
        _ = subsys.on_shutdown_requested() => {
            stop.store(true, Ordering::Relaxed);
            Ok(())
        }
        joined = reader_handle => {
            stop.store(true, Ordering::Relaxed);
            joined.expect("packetizer thread panicked")
        }
    };

    if let Some(handle) = player_join {
        let _ = handle.await;
    }

    pacing_result
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
}
