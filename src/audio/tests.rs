use super::codec::{decode_pcm16, encode_pcm16, sample_to_pcm16};
use super::dispatch::{append_downmixed_samples, BlockDispatcher};
use super::playback::COMPLETION_GRACE_SECS;
use super::{
    decode_transport, encode_transport, resample, AudioChunk, DecodeError, OutputSink,
    PlaybackBuffer, PlaybackClock, PlaybackError, PlaybackScheduler, RECEIVE_RATE, SEND_RATE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(0.0),
        })
    }

    fn set(&self, value: f64) {
        *self.now.lock().unwrap() = value;
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
struct RecordingSink {
    played: Arc<Mutex<Vec<PlaybackBuffer>>>,
    clears: Arc<AtomicUsize>,
    fail_ids: Vec<u64>,
}

impl OutputSink for RecordingSink {
    fn play(&mut self, buffer: PlaybackBuffer) -> Result<(), PlaybackError> {
        if self.fail_ids.contains(&buffer.id) {
            return Err(PlaybackError::Device("simulated failure".to_string()));
        }
        self.played.lock().unwrap().push(buffer);
        Ok(())
    }

    fn clear(&mut self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

fn chunk(len: usize, value: f32) -> AudioChunk {
    AudioChunk::new(vec![value; len], RECEIVE_RATE)
}

fn scheduler_with(sink: RecordingSink) -> (PlaybackScheduler, Arc<ManualClock>) {
    let clock = ManualClock::new();
    (PlaybackScheduler::new(Box::new(sink), clock.clone()), clock)
}

fn ramp(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 / len as f32) * 2.0 - 1.0)
        .collect()
}

#[test]
fn resample_is_identity_when_rates_match() {
    let input = ramp(100);
    assert_eq!(resample(&input, SEND_RATE, SEND_RATE), input);
}

#[test]
fn resample_length_follows_rate_ratio() {
    for &(len, from, to) in &[
        (4096usize, 48_000u32, 16_000u32),
        (4096, 44_100, 16_000),
        (1000, 24_000, 48_000),
        (1023, 22_050, 16_000),
    ] {
        let out = resample(&ramp(len), from, to);
        let expected = len as f64 * f64::from(to) / f64::from(from);
        assert!(
            (out.len() as f64 - expected).abs() <= 1.0,
            "{len}@{from}->{to}: got {}",
            out.len()
        );
        assert_eq!(out.len(), expected.floor() as usize);
    }
}

#[test]
fn resample_output_stays_within_input_range() {
    let input: Vec<f32> = (0..997).map(|i| ((i as f32) * 0.37).sin() * 0.8).collect();
    let (min, max) = input
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    for &(from, to) in &[(44_100u32, 16_000u32), (16_000, 24_000), (24_000, 48_000)] {
        for sample in resample(&input, from, to) {
            assert!(sample >= min && sample <= max, "{sample} outside [{min}, {max}]");
        }
    }
}

#[test]
fn resample_interpolates_between_neighbours() {
    let out = resample(&[0.0, 1.0], 16_000, 32_000);
    assert_eq!(out.len(), 4);
    assert_eq!(out[0], 0.0);
    assert!((out[1] - 0.5).abs() < 1e-6);
    assert_eq!(out[2], 1.0);
    assert_eq!(out[3], 1.0);
}

#[test]
fn resample_empty_input_is_empty() {
    assert!(resample(&[], 48_000, 16_000).is_empty());
}

#[test]
fn codec_round_trip_error_is_within_one_step() {
    let step = 1.0 / 32_768.0;
    let samples: Vec<f32> = (-1000..=1000).map(|i| i as f32 / 1000.0).collect();
    let decoded = decode_transport(&encode_transport(&samples)).unwrap();
    assert_eq!(decoded.len(), samples.len());
    for (orig, back) in samples.iter().zip(&decoded) {
        let err = (orig - back).abs();
        let bound = if *orig <= 0.5 { step } else { 1.5 * step };
        assert!(err <= bound + f32::EPSILON, "{orig} -> {back} (err {err})");
    }
}

#[test]
fn codec_clamps_out_of_range_samples() {
    assert_eq!(sample_to_pcm16(1.5), i16::MAX);
    assert_eq!(sample_to_pcm16(-3.0), i16::MIN);
    assert_eq!(sample_to_pcm16(f32::NAN), 0);
}

#[test]
fn codec_writes_little_endian_pcm16() {
    assert_eq!(encode_pcm16(&[-1.0, 1.0]), vec![0x00, 0x80, 0xff, 0x7f]);
    assert_eq!(decode_pcm16(&[0x00, 0x80]).unwrap(), vec![-1.0]);
}

#[test]
fn decode_rejects_odd_byte_count() {
    assert!(matches!(
        decode_pcm16(&[1, 2, 3]),
        Err(DecodeError::OddLength(3))
    ));
    // "AQID" is base64 for three bytes.
    assert!(matches!(
        decode_transport("AQID"),
        Err(DecodeError::OddLength(3))
    ));
}

#[test]
fn decode_rejects_malformed_base64() {
    assert!(matches!(
        decode_transport("not base64!!"),
        Err(DecodeError::Base64(_))
    ));
}

#[test]
fn downmixes_multi_channel_audio() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[1.0f32, 3.0, -1.0, 1.0, 0.5], 2, |s| s);
    assert_eq!(buf, vec![2.0, 0.0, 0.5]);
}

#[test]
fn preserves_single_channel_audio() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[0.1f32, 0.2], 1, |s| s);
    assert_eq!(buf, vec![0.1, 0.2]);
}

#[test]
fn block_dispatcher_cuts_fixed_blocks_at_device_rate() {
    let (tx, mut rx) = mpsc::channel(4);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = BlockDispatcher::new(3, 48_000, tx, dropped.clone());

    dispatcher.push(&[1.0f32, 2.0], 1, |s| s);
    assert!(rx.try_recv().is_err());

    dispatcher.push(&[3.0f32, 4.0, 5.0, 6.0, 7.0], 1, |s| s);
    let first = rx.try_recv().unwrap();
    assert_eq!(first.samples(), &[1.0, 2.0, 3.0]);
    assert_eq!(first.sample_rate(), 48_000);
    assert_eq!(rx.try_recv().unwrap().samples(), &[4.0, 5.0, 6.0]);
    assert!(rx.try_recv().is_err());
    assert_eq!(dropped.load(Ordering::Relaxed), 0);
}

#[test]
fn block_dispatcher_counts_drops_when_queue_is_full() {
    let (tx, mut rx) = mpsc::channel(1);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = BlockDispatcher::new(2, 16_000, tx, dropped.clone());

    dispatcher.push(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], 1, |s| s);

    assert_eq!(rx.try_recv().unwrap().samples(), &[1.0, 2.0]);
    assert_eq!(dropped.load(Ordering::Relaxed), 2);
}

#[test]
fn block_dispatcher_stops_after_receiver_closes() {
    let (tx, rx) = mpsc::channel(1);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = BlockDispatcher::new(1, 16_000, tx, dropped.clone());
    drop(rx);
    dispatcher.push(&[1.0f32, 2.0, 3.0], 1, |s| s);
    assert_eq!(dropped.load(Ordering::Relaxed), 0);
}

#[test]
fn audio_chunk_duration_and_rate_conversion() {
    let chunk = chunk(2400, 0.1);
    assert!((chunk.duration_secs() - 0.1).abs() < 1e-12);
    let converted = chunk.to_rate(48_000);
    assert_eq!(converted.sample_rate(), 48_000);
    assert_eq!(converted.len(), 4800);
    assert_eq!(chunk.to_rate(RECEIVE_RATE), chunk);
}

#[test]
fn scheduler_plays_chunks_back_to_back_without_overlap() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let (mut scheduler, clock) = scheduler_with(sink);
    clock.set(1.0);

    for len in [2400, 4800, 1200] {
        scheduler.enqueue(chunk(len, 0.2));
    }
    // Only the head is in flight.
    assert_eq!(played.lock().unwrap().len(), 1);
    assert_eq!(scheduler.queued_len(), 2);

    for id in 0..3 {
        assert!(scheduler.on_complete(id));
    }

    let played = played.lock().unwrap();
    assert_eq!(played.len(), 3);
    assert_eq!(played[0].start_time, 1.0);
    for pair in played.windows(2) {
        assert!(pair[1].start_time >= pair[0].end_time() - 1e-12);
        assert!((pair[1].start_time - pair[0].end_time()).abs() < 1e-12);
    }
    assert_eq!(scheduler.played(), 3);
    assert!(!scheduler.is_playing());
}

#[test]
fn scheduler_starts_at_clock_when_cursor_is_behind() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let (mut scheduler, clock) = scheduler_with(sink);

    scheduler.enqueue(chunk(2400, 0.0));
    clock.set(5.0);
    scheduler.on_complete(0);
    scheduler.enqueue(chunk(2400, 0.0));

    let played = played.lock().unwrap();
    assert_eq!(played[1].start_time, 5.0);
}

#[test]
fn scheduler_preserves_arrival_order_without_drops() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let (mut scheduler, _clock) = scheduler_with(sink);

    for i in 0..5 {
        scheduler.enqueue(chunk(100 + i, i as f32 / 10.0));
    }
    for id in 0..5 {
        scheduler.on_complete(id);
    }

    let played = played.lock().unwrap();
    let lengths: Vec<usize> = played.iter().map(|b| b.chunk.len()).collect();
    assert_eq!(lengths, vec![100, 101, 102, 103, 104]);
    let ids: Vec<u64> = played.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[test]
fn scheduler_advances_past_failing_chunk() {
    let sink = RecordingSink {
        fail_ids: vec![1],
        ..RecordingSink::default()
    };
    let played = sink.played.clone();
    let (mut scheduler, _clock) = scheduler_with(sink);

    scheduler.enqueue(chunk(2400, 0.1));
    scheduler.enqueue(chunk(2400, 0.2));
    scheduler.enqueue(chunk(2400, 0.3));
    scheduler.on_complete(0);

    let played = played.lock().unwrap();
    let ids: Vec<u64> = played.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 2]);
    // The failed chunk does not reserve time on the timeline.
    assert!((played[1].start_time - played[0].end_time()).abs() < 1e-12);
    assert_eq!(scheduler.errors(), 1);
}

#[test]
fn scheduler_ignores_stale_completion_after_clear() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let clears = sink.clears.clone();
    let (mut scheduler, clock) = scheduler_with(sink);
    clock.set(2.0);

    scheduler.enqueue(chunk(24_000, 0.1));
    scheduler.enqueue(chunk(24_000, 0.1));
    scheduler.clear();
    assert_eq!(clears.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.queued_len(), 0);
    assert!(!scheduler.is_playing());

    assert!(!scheduler.on_complete(0));
    scheduler.enqueue(chunk(2400, 0.1));
    let played = played.lock().unwrap();
    assert_eq!(played.len(), 2);
    assert_eq!(played[1].id, 1);
    assert_eq!(played[1].start_time, 2.0);
}

#[test]
fn scheduler_writes_off_buffer_the_device_never_finishes() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let (mut scheduler, clock) = scheduler_with(sink);

    // 0.1 s each; the sink accepts them but never reports completion.
    scheduler.enqueue(chunk(2400, 0.1));
    scheduler.enqueue(chunk(2400, 0.2));
    assert_eq!(scheduler.queued_len(), 1);

    clock.set(0.1 + COMPLETION_GRACE_SECS - 0.01);
    assert!(!scheduler.expire_overdue());
    assert_eq!(played.lock().unwrap().len(), 1);

    let late = 0.1 + COMPLETION_GRACE_SECS + 0.01;
    clock.set(late);
    assert!(scheduler.expire_overdue());
    assert_eq!(scheduler.errors(), 1);
    assert_eq!(scheduler.queued_len(), 0);
    {
        let played = played.lock().unwrap();
        assert_eq!(played.len(), 2);
        assert_eq!(played[1].id, 1);
        assert_eq!(played[1].start_time, late);
    }

    // A completion for the written-off buffer is stale.
    assert!(!scheduler.on_complete(0));
    assert!(scheduler.on_complete(1));
    assert_eq!(scheduler.played(), 1);
}

#[test]
fn scheduler_enqueue_recovers_from_stalled_output() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let (mut scheduler, clock) = scheduler_with(sink);

    scheduler.enqueue(chunk(2400, 0.1));
    clock.set(10.0);
    scheduler.enqueue(chunk(2400, 0.2));

    let ids: Vec<u64> = played.lock().unwrap().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(scheduler.errors(), 1);
}

#[test]
fn scheduler_advances_when_output_stream_fails() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let (mut scheduler, _clock) = scheduler_with(sink);

    scheduler.enqueue(chunk(2400, 0.1));
    scheduler.enqueue(chunk(2400, 0.2));
    scheduler.enqueue(chunk(2400, 0.3));

    scheduler.on_device_error("device unplugged");

    let ids: Vec<u64> = played.lock().unwrap().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(scheduler.errors(), 1);
    assert_eq!(scheduler.queued_len(), 1);
    assert!(!scheduler.on_complete(0));
}
