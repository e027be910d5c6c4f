//! Sender and receiver talking over loopback with in-memory audio

mod common;

use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use audio_trx::archive::WavArchive;
use audio_trx::config::SessionConfig;
use audio_trx::lifecycle::CancelToken;
use audio_trx::receiver::{AudioReceiver, ReceiveSummary, ReceiverHandle, ReceiverState};
use audio_trx::sender::AudioSender;

use common::*;

fn start_receiver(
    config: SessionConfig,
    playback: Playback,
    archive: Option<WavArchive>,
) -> (ReceiverHandle, thread::JoinHandle<audio_trx::Result<ReceiveSummary>>) {
    let mut receiver = AudioReceiver::new(config, playback, CancelToken::new());
    if let Some(archive) = archive {
        receiver = receiver.with_archive(archive);
    }
    let handle = receiver.handle();
    let join = thread::spawn(move || receiver.run());
    wait_for("receiver to listen", || handle.local_addr().is_some());
    (handle, join)
}

fn sender_config(receiver: &ReceiverHandle, base: &SessionConfig, chunks: u64) -> SessionConfig {
    let addr = receiver.local_addr().unwrap();
    SessionConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        duration: Some(duration_for_chunks(chunks, base.rate, base.chunk_size)),
        ..base.clone()
    }
}

#[test]
fn test_hundred_chunks_arrive_intact() {
    let config = loopback_config(44100, 1, 1024);
    let playback = Playback::default();
    let (handle, join) = start_receiver(config.clone(), playback.clone(), None);

    let tx_config = sender_config(&handle, &config, 100);
    assert_eq!(tx_config.chunk_limit(), Some(100));

    let mut sender = AudioSender::new(tx_config, RampOpener { base: 0 }, CancelToken::new());
    let sent = sender.run().unwrap();
    assert_eq!(sent.chunks_sent, 100);
    assert_eq!(sent.bytes_sent, 100 * 2048);
    assert!(!sent.cancelled);

    wait_for("connection to finish", || playback.stopped() == 1);
    handle.cancel();
    let received = join.join().unwrap().unwrap();

    assert_eq!(received.connections, 1);
    assert_eq!(received.chunks_received, 100);
    assert_eq!(received.bytes_received, 100 * 2048);

    let chunks = playback.chunks.lock().clone();
    assert_eq!(chunks.len(), 100);
    for (n, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.len(), 2048);
        assert_eq!(*chunk, ramp_chunk(config.layout(), 0, n as i16), "chunk {}", n);
    }
}

#[test]
fn test_senders_are_served_one_at_a_time() {
    let config = loopback_config(8000, 2, 64);
    let playback = Playback::default();
    let (handle, join) = start_receiver(config.clone(), playback.clone(), None);

    let senders: Vec<_> = [0i16, 1000]
        .into_iter()
        .map(|base| {
            let tx_config = sender_config(&handle, &config, 20);
            thread::spawn(move || {
                AudioSender::new(tx_config, RampOpener { base }, CancelToken::new()).run()
            })
        })
        .collect();
    for sender in senders {
        assert_eq!(sender.join().unwrap().unwrap().chunks_sent, 20);
    }

    wait_for("both connections to finish", || playback.stopped() == 2);
    handle.cancel();
    let received = join.join().unwrap().unwrap();

    assert_eq!(received.connections, 2);
    assert_eq!(*playback.max_active.lock(), 1);

    // Each connection's chunks are contiguous and in order
    let chunks = playback.chunks.lock().clone();
    assert_eq!(chunks.len(), 40);
    let first_base = if chunks[0] == ramp_chunk(config.layout(), 0, 0) { 0 } else { 1000 };
    let second_base = 1000 - first_base;
    for n in 0..20 {
        assert_eq!(chunks[n], ramp_chunk(config.layout(), first_base, n as i16));
        assert_eq!(chunks[20 + n], ramp_chunk(config.layout(), second_base, n as i16));
    }
}

#[test]
fn test_accept_timeouts_keep_listening() {
    let mut config = loopback_config(44100, 1, 1024);
    config.socket_timeout = Duration::from_secs(1);
    let playback = Playback::default();
    let (handle, join) = start_receiver(config, playback.clone(), None);

    thread::sleep(Duration::from_millis(2500));
    assert_eq!(handle.state(), ReceiverState::Listening);

    // Still accepting after several idle timeouts
    let mut client = TcpStream::connect(handle.local_addr().unwrap()).unwrap();
    client.write_all(&[0u8; 2048]).unwrap();
    drop(client);
    wait_for("connection to finish", || playback.stopped() == 1);

    handle.cancel();
    let received = join.join().unwrap().unwrap();
    assert_eq!(received.connections, 1);
    assert_eq!(received.chunks_received, 1);
    assert_eq!(handle.state(), ReceiverState::ShuttingDown);
}

#[test]
fn test_cancel_while_serving() {
    let mut config = loopback_config(44100, 1, 1024);
    config.socket_timeout = Duration::from_millis(100);
    let playback = Playback::default();
    let (handle, join) = start_receiver(config, playback.clone(), None);

    // Connected but silent peer
    let mut client = TcpStream::connect(handle.local_addr().unwrap()).unwrap();
    client.write_all(&[1u8; 100]).unwrap();
    wait_for("receiver to serve", || {
        matches!(handle.state(), ReceiverState::Serving(_))
    });

    let cancelled_at = Instant::now();
    handle.cancel();
    let received = join.join().unwrap().unwrap();
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));

    assert_eq!(received.connections, 1);
    assert_eq!(playback.opened(), 1);
    assert_eq!(playback.stopped(), 1);
    assert!(playback.chunks.lock().is_empty());
}

#[test]
fn test_received_audio_is_archived() {
    let config = loopback_config(16000, 2, 32);
    let path = std::env::temp_dir().join(format!("trx-relay-{}.wav", std::process::id()));
    let archive = WavArchive::create(&path, config.rate, config.channels).unwrap();

    let playback = Playback::default();
    let (handle, join) = start_receiver(config.clone(), playback.clone(), Some(archive));

    let tx_config = sender_config(&handle, &config, 5);
    let sent = AudioSender::new(tx_config, RampOpener { base: 7 }, CancelToken::new())
        .run()
        .unwrap();
    assert_eq!(sent.chunks_sent, 5);

    wait_for("connection to finish", || playback.stopped() == 1);
    handle.cancel();
    join.join().unwrap().unwrap();

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    let expected: Vec<i16> = (0..5)
        .flat_map(|n| {
            let bytes = ramp_chunk(config.layout(), 7, n);
            audio_trx::chunk::decode_samples(&bytes)
        })
        .collect();
    assert_eq!(samples, expected);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_archive_survives_partial_frame_tail() {
    // 4 stereo frames per chunk = 16 bytes
    let config = loopback_config(8000, 2, 4);
    let path = std::env::temp_dir().join(format!("trx-relay-tail-{}.wav", std::process::id()));
    let archive = WavArchive::create(&path, config.rate, config.channels).unwrap();

    let playback = Playback::default();
    let (handle, join) = start_receiver(config.clone(), playback.clone(), Some(archive));
    let addr = handle.local_addr().unwrap();

    // Sender cut off one and a half frames into its second chunk
    let first: Vec<i16> = (1..=11).collect();
    let mut client = TcpStream::connect(addr).unwrap();
    client
        .write_all(audio_trx::chunk::AudioChunk::from_samples(&first).as_bytes())
        .unwrap();
    drop(client);
    wait_for("first connection to finish", || playback.stopped() == 1);

    let second: Vec<i16> = (20..28).collect();
    let mut client = TcpStream::connect(addr).unwrap();
    client
        .write_all(audio_trx::chunk::AudioChunk::from_samples(&second).as_bytes())
        .unwrap();
    drop(client);
    wait_for("second connection to finish", || playback.stopped() == 2);

    handle.cancel();
    let received = join.join().unwrap().unwrap();
    assert_eq!(received.connections, 2);
    assert_eq!(received.bytes_received, 22 + 16);

    // Playback still gets the whole tail
    assert_eq!(playback.chunks.lock()[1].len(), 6);

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    let expected: Vec<i16> = (1..=10).chain(20..28).collect();
    assert_eq!(samples, expected);

    let _ = std::fs::remove_file(&path);
}
