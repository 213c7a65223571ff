/// Integration tests for the tone detector
///
/// Tests end-to-end detection with synthetic audio, from samples (or a WAV
/// file) through to the notifier.
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use ringr::config::parse_config;
use ringr::replay::WavSource;
use ringr::{
    AlertState, AudioSource, DetectorConfig, NotificationDispatcher, Notifier, NotifierConfig,
    NotifierError, PipelineStats, ToneDetector,
};
use std::f64::consts::PI;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SAMPLE_RATE: u32 = 44100;

/// 50 ms at 44.1 kHz
const BLOCK_SIZE: usize = 2205;

/// Centre of bin 12 of the 510-point transform, the bin 1 kHz maps to
const TONE_FREQUENCY: f64 = 12.0 * 44100.0 / 510.0;

fn doorbell_config() -> DetectorConfig {
    DetectorConfig {
        acceptance_ratio: 95.0,
        gain: 4.0,
        cooldown_secs: 10.0,
        ..DetectorConfig::new(65.0, 1.5, 1000.0)
    }
}

/// Generate synthetic audio tone
fn generate_tone(frequency: f64, num_samples: usize, amplitude: f64) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            (amplitude * (2.0 * PI * frequency * t).sin()) as f32
        })
        .collect()
}

/// Notifier recording every state it is given
#[derive(Clone, Default)]
struct RecordingNotifier {
    states: Arc<Mutex<Vec<bool>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, state: bool) -> Result<(), NotifierError> {
        self.states.lock().unwrap().push(state);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}

fn write_wav(path: &Path, samples: &[f32]) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_doorbell_detection_and_cooldown() {
    let mut detector =
        ToneDetector::new(&doorbell_config(), SAMPLE_RATE, Arc::new(PipelineStats::default()))
            .unwrap();
    assert_eq!(detector.params().block_size, BLOCK_SIZE);

    let origin = Instant::now();
    let block_period = Duration::from_millis(50);
    let tone = generate_tone(TONE_FREQUENCY, BLOCK_SIZE, 0.5);
    let quiet = generate_tone(TONE_FREQUENCY, BLOCK_SIZE, 0.01);

    let mut emitted = Vec::new();
    for i in 0..260u32 {
        let block = if i < 30 { &tone } else { &quiet };
        let outcome = detector.process_block(block, origin + block_period * i).unwrap();
        for state in outcome.notifications().iter() {
            emitted.push((i, state));
        }
    }

    // Detected once the 1.5 s window fills, released 10 s later
    assert_eq!(emitted, vec![(29, true), (229, false)]);
    assert_eq!(detector.state(), AlertState::Quiet);
    assert_eq!(detector.stats().blocks_processed, 260);
}

#[test]
fn test_short_ring_not_detected() {
    let mut detector =
        ToneDetector::new(&doorbell_config(), SAMPLE_RATE, Arc::new(PipelineStats::default()))
            .unwrap();

    let origin = Instant::now();
    let block_period = Duration::from_millis(50);
    let tone = generate_tone(TONE_FREQUENCY, BLOCK_SIZE, 0.5);
    let quiet = generate_tone(TONE_FREQUENCY, BLOCK_SIZE, 0.01);

    // 1 s of tone is shorter than the 1.5 s peak duration
    for i in 0..100u32 {
        let block = if (20..40).contains(&i) { &tone } else { &quiet };
        let outcome = detector.process_block(block, origin + block_period * i).unwrap();
        assert!(outcome.notifications().is_empty(), "block {}", i);
    }
    assert_eq!(detector.state(), AlertState::Quiet);
}

#[test]
fn test_other_frequency_not_detected() {
    let mut detector =
        ToneDetector::new(&doorbell_config(), SAMPLE_RATE, Arc::new(PipelineStats::default()))
            .unwrap();

    let origin = Instant::now();
    let other = generate_tone(3000.0, BLOCK_SIZE, 0.5);

    for i in 0..60u32 {
        let outcome = detector
            .process_block(&other, origin + Duration::from_millis(50) * i)
            .unwrap();
        assert!(outcome.notifications().is_empty());
    }
}

#[test]
fn test_silence_is_skipped() {
    let stats = Arc::new(PipelineStats::default());
    let mut detector = ToneDetector::new(&doorbell_config(), SAMPLE_RATE, Arc::clone(&stats)).unwrap();

    let silence = vec![0.0f32; BLOCK_SIZE];
    for _ in 0..40 {
        detector.process_block(&silence, Instant::now()).unwrap();
    }

    assert!(detector.window().is_empty());
    assert_eq!(stats.snapshot().blocks_skipped, 40);
    assert_eq!(stats.snapshot().blocks_processed, 0);
}

#[tokio::test]
async fn test_wav_replay_notifies_state_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doorbell.wav");

    // 2 s ring followed by 12 s of background
    let mut samples = generate_tone(TONE_FREQUENCY, 2 * SAMPLE_RATE as usize, 0.5);
    samples.extend(generate_tone(TONE_FREQUENCY, 12 * SAMPLE_RATE as usize, 0.01));
    write_wav(&path, &samples);

    let recorder = RecordingNotifier::default();
    let stats = Arc::new(PipelineStats::default());
    let (notify, worker) =
        NotificationDispatcher::spawn(Box::new(recorder.clone()), 16, Arc::clone(&stats));
    notify.send(false);

    let source = WavSource::open(&path).unwrap();
    let mut detector = ToneDetector::new(&doorbell_config(), source.sample_rate(), Arc::clone(&stats))
        .unwrap();
    let block_size = detector.params().block_size;

    let summary = tokio::task::spawn_blocking(move || {
        source.start(block_size, move |block, now| {
            if let Ok(outcome) = detector.process_block(block, now) {
                for state in outcome.notifications().iter() {
                    notify.send(state);
                }
            }
        })
    })
    .await
    .unwrap()
    .unwrap();

    worker.await.unwrap();

    assert_eq!(summary.blocks, 280);
    assert_eq!(summary.discarded_samples, 0);
    assert_eq!(*recorder.states.lock().unwrap(), vec![false, true, false]);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.notifications_sent, 3);
    assert_eq!(snapshot.notifications_dropped, 0);
}

#[test]
fn test_config_file_to_detector() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ringr.toml");
    std::fs::write(
        &path,
        r#"
        [detector]
        threshold = 65
        peak_duration = 1.5
        frequency = 1000
        acceptance_ratio = 95
        gain = 4
        cooldown = 10

        [notifier]
        type = "log"
        "#,
    )
    .unwrap();

    let env = |key: &str| (key == "RINGR_DETECTOR_BLOCK_DURATION").then(|| "100".to_string());
    let config = ringr::load_config(&path, env).unwrap();

    assert_eq!(config.notifier, NotifierConfig::Log);
    assert_eq!(config.detector.block_duration_ms, 100);

    let detector =
        ToneDetector::new(&config.detector, SAMPLE_RATE, Arc::new(PipelineStats::default()))
            .unwrap();
    assert_eq!(detector.params().block_size, 4410);
    // 1.5 s of 100 ms blocks
    assert_eq!(detector.params().window_capacity, 15);
    assert_eq!(detector.params().transform_size, 510);
    assert_eq!(detector.params().bin_index, 12);
}

#[test]
fn test_missing_required_value() {
    let result = parse_config("[detector]\nthreshold = 65\n", |_| None);
    assert!(result.is_err());
}
