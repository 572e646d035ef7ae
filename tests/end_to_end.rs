//! Scenarios that exercise more than one module wired together over a real
//! socket, rather than a single module driven in-process. The per-module
//! `#[cfg(test)]` suites already cover TimeMark edge behavior, MTU back-off,
//! small-drop no-ops and the latency cap in isolation; what's missing there
//! is the full transmit -> wire -> receive -> playback pipeline, and the
//! wire-level framing of loss/reconfiguration (as opposed to calling the
//! receiver's handlers directly in-process).

use std::io::Cursor;
use std::net::UdpSocket as StdUdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use wavesync::audio::{AudioConfig, SampleBits};
use wavesync::clock::{FakeClock, SystemClock};
use wavesync::config::{Args, Settings};
use wavesync::packetizer::Packetizer;
use wavesync::player::ChunkPlayer;
use wavesync::queue::{QueueEntry, chunk_queue};
use wavesync::receiver::Receiver;
use wavesync::sample_reader::SampleReader;
use wavesync::sink::TestSink;
use wavesync::stats::Stats;
use wavesync::timemark::encode as timemark_encode;
use wavesync::wire::{Header, StatusPacket, build_audio_datagram, build_status_datagram};

fn cfg() -> AudioConfig {
    AudioConfig::new(44_100, SampleBits::Bits16, 2, 1000, 0, 16).unwrap()
}

/// Runs a receiver inside a `Toplevel` the same shape the binaries use,
/// polling `stop` to trigger the shutdown request since there's no signal
/// to catch in a test process.
fn spawn_receiver_toplevel(
    receiver: Receiver<impl wavesync::clock::WallClock>,
    stop: Arc<AtomicBool>,
) -> Toplevel {
    Toplevel::new(move |s: SubsystemHandle| async move {
        s.start(SubsystemBuilder::new("rx", move |s| receiver.run(s)));
        while !stop.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        s.request_shutdown();
    })
}

/// Round trip: a packetizer paces chunks of a repeating PCM pattern over a
/// real loopback UDP socket, a receiver demuxes them off the wire, and the
/// playback scheduler plays them against a test sink. After a few real
/// seconds, both sides have made visible progress and nothing was dropped.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_trip_plays_chunks_with_no_drops() {
    let tx_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    let rx_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rx_addr = rx_socket.local_addr().unwrap();

    let (producer, consumer) = chunk_queue(600);
    let rx_stats = Stats::default();
    let receiver = Receiver::new(SystemClock, rx_socket, producer, rx_stats.clone());

    let player_stop = Arc::new(AtomicBool::new(false));
    let mut player = ChunkPlayer::new(
        SystemClock,
        TestSink::new(8192),
        consumer,
        rx_stats.clone(),
        15,
        player_stop.clone(),
    );
    let player_handle = tokio::task::spawn_blocking(move || player.run());

    let tx_stop = Arc::new(AtomicBool::new(false));
    let tx_stats = Stats::default();
    let mut reader = SampleReader::new(SystemClock, cfg());
    let mut packetizer = Packetizer::new(
        SystemClock,
        tx_socket,
        vec![rx_addr],
        None,
        None,
        tx_stats,
        tx_stop.clone(),
    );
    // far more than one run window will consume; the packetizer's own
    // pacing against wall time, not the source length, bounds the test.
    let pattern: Vec<u8> = std::iter::repeat([0x01u8, 0x02, 0x11, 0x12])
        .take(50_000)
        .flatten()
        .collect();
    let mut source = Cursor::new(pattern);
    let latency_s = cfg().latency_secs();
    let packetizer_handle =
        tokio::task::spawn_blocking(move || packetizer.run(&mut reader, &mut source, latency_s));

    let receiver_stop = Arc::new(AtomicBool::new(false));
    let toplevel = spawn_receiver_toplevel(receiver, receiver_stop.clone());

    tokio::time::sleep(Duration::from_millis(3200)).await;

    tx_stop.store(true, Ordering::Relaxed);
    player_stop.store(true, Ordering::Relaxed);
    receiver_stop.store(true, Ordering::Relaxed);

    let _ = packetizer_handle.await.unwrap();
    let _ = player_handle.await;
    toplevel
        .handle_shutdown_requests(Duration::from_secs(2))
        .await
        .unwrap();

    let snapshot = rx_stats.snapshot();
    assert!(
        snapshot.chunks_played >= 50,
        "expected at least 50 chunks played, got {}",
        snapshot.chunks_played
    );
    assert_eq!(snapshot.chunks_dropped, 0);
}

/// A status datagram announcing a different `AudioConfig`, decoded off a
/// real socket, produces one `Config` entry per change.
#[tokio::test]
async fn status_datagram_over_the_wire_reconfigures_receiver_queue() {
    let rx_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rx_addr = rx_socket.local_addr().unwrap();
    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let (producer, mut consumer) = chunk_queue(16);
    let receiver = Receiver::new(FakeClock::at(1000.0), rx_socket, producer, Stats::default());

    let stop = Arc::new(AtomicBool::new(false));
    let toplevel = spawn_receiver_toplevel(receiver, stop.clone());

    let first = StatusPacket::from_config(&cfg(), 1000.0, 1);
    sender
        .send_to(&build_status_datagram(&first), rx_addr)
        .await
        .unwrap();
    let entry = tokio::time::timeout(Duration::from_secs(1), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(entry, QueueEntry::Config(c) if c == cfg()));

    let reconfigured = AudioConfig::new(48_000, SampleBits::Bits16, 2, 1000, 0, 16).unwrap();
    let second = StatusPacket::from_config(&reconfigured, 1000.1, 2);
    sender
        .send_to(&build_status_datagram(&second), rx_addr)
        .await
        .unwrap();
    let entry = tokio::time::timeout(Duration::from_secs(1), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(entry, QueueEntry::Config(c) if c == reconfigured));

    stop.store(true, Ordering::Relaxed);
    toplevel
        .handle_shutdown_requests(Duration::from_secs(2))
        .await
        .unwrap();
}

/// A gap in the sender's chunk-number sequence, observed purely over the
/// wire, yields a `Drops(n)` entry without the receiver task dying.
#[tokio::test]
async fn loss_over_the_wire_yields_drops_entry() {
    let rx_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rx_addr = rx_socket.local_addr().unwrap();
    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let (producer, mut consumer) = chunk_queue(200);
    let receiver = Receiver::new(FakeClock::at(1000.0), rx_socket, producer, Stats::default());

    let stop = Arc::new(AtomicBool::new(false));
    let toplevel = spawn_receiver_toplevel(receiver, stop.clone());

    let first = StatusPacket::from_config(&cfg(), 1000.0, 2000);
    sender
        .send_to(&build_status_datagram(&first), rx_addr)
        .await
        .unwrap();
    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(1), consumer.next())
            .await
            .unwrap(),
        Some(QueueEntry::Config(_))
    ));

    for _ in 0..150 {
        let (_, mark) = timemark_encode(1000.0, 0.5);
        sender
            .send_to(
                &build_audio_datagram(Header::RawAudio, mark, &[0u8; 16]),
                rx_addr,
            )
            .await
            .unwrap();
    }
    for _ in 0..150 {
        let entry = tokio::time::timeout(Duration::from_secs(1), consumer.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(entry, QueueEntry::Audio { .. }));
    }

    let second = StatusPacket::from_config(&cfg(), 1001.0, 2000 + 200);
    sender
        .send_to(&build_status_datagram(&second), rx_addr)
        .await
        .unwrap();
    let entry = tokio::time::timeout(Duration::from_secs(1), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(entry, QueueEntry::Drops(n) if n == 50));

    stop.store(true, Ordering::Relaxed);
    toplevel
        .handle_shutdown_requests(Duration::from_secs(2))
        .await
        .unwrap();
}

fn base_rx_args() -> Args {
    Args {
        tx: None,
        rx: true,
        local_play: false,
        channels: vec!["224.0.0.57:45300".to_string()],
        bind: "0.0.0.0".parse().unwrap(),
        latency: 1000,
        tolerance: 15,
        payload_size: 1472,
        ttl: 2,
        compress: None,
        no_loop: false,
        broadcast: false,
        rate: 44_100,
        bits24: false,
        channels_count: 2,
        sink_latency: 0,
        buffer_size: 8192,
        device_index: 0,
        debug: false,
    }
}

/// The CLI's validated `Settings` enforce the same latency cap as
/// `AudioConfig` itself, all the way from `--latency`.
#[test]
fn cli_latency_boundary_matches_the_audio_config_cap() {
    let mut args = base_rx_args();
    args.latency = 30_000;
    assert!(Settings::try_from(args).is_err());

    let mut args = base_rx_args();
    args.latency = 29_000;
    assert!(Settings::try_from(args).is_err());

    let mut args = base_rx_args();
    args.latency = 28_999;
    assert!(Settings::try_from(args).is_ok());
}
