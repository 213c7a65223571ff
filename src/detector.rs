//! Tone detector main module
//!
//! Runs the per-block pipeline: target-bin magnitude, threshold match,
//! sliding peak window and alert state machine. Intended to be driven from
//! the audio callback thread, one block at a time and in arrival order.

use crate::config::DetectorConfig;
use crate::magnitude::MagnitudeExtractor;
use crate::params::DerivedParameters;
use crate::state::{AlertState, DetectionStateMachine, Notifications};
use crate::window::SlidingPeakWindow;
use cache_padded::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid detector configuration: {0}")]
    Configuration(String),

    #[error("Invalid block: expected {expected} samples, got {actual}")]
    InvalidBlock { expected: usize, actual: usize },
}

/// Result of feeding one block to the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockOutcome {
    /// Block carried no signal and was skipped without touching the window
    Silent,

    /// Block was analysed
    Analyzed {
        magnitude: f32,
        matched: bool,
        detected: bool,
        notifications: Notifications,
    },
}

impl BlockOutcome {
    /// Notifications to forward, in emission order
    pub fn notifications(&self) -> Notifications {
        match self {
            BlockOutcome::Silent => Notifications::default(),
            BlockOutcome::Analyzed { notifications, .. } => *notifications,
        }
    }
}

/// Pipeline counters shared between the audio thread and the supervisor
#[derive(Debug, Default)]
pub struct PipelineStats {
    blocks_processed: CachePadded<AtomicU64>,
    blocks_skipped: CachePadded<AtomicU64>,
    blocks_rejected: CachePadded<AtomicU64>,
    notifications_sent: CachePadded<AtomicU64>,
    notifications_dropped: CachePadded<AtomicU64>,
}

impl PipelineStats {
    pub fn record_processed(&self) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.blocks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            blocks_skipped: self.blocks_skipped.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub blocks_processed: u64,
    pub blocks_skipped: u64,
    pub blocks_rejected: u64,
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
}

/// Single-frequency tone detector
pub struct ToneDetector {
    params: DerivedParameters,
    threshold: f32,
    log_analysis: bool,
    extractor: MagnitudeExtractor,
    window: SlidingPeakWindow,
    machine: DetectionStateMachine,
    stats: Arc<PipelineStats>,
}

impl ToneDetector {
    /// Create a detector for a device running at `sample_rate`
    pub fn new(
        config: &DetectorConfig,
        sample_rate: u32,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, DetectorError> {
        let params = DerivedParameters::derive(config, sample_rate)?;

        let cooldown = Duration::try_from_secs_f64(config.cooldown_secs).map_err(|e| {
            DetectorError::Configuration(format!(
                "Invalid cooldown {}: {}",
                config.cooldown_secs, e
            ))
        })?;

        info!("Initializing tone detector");
        info!("Target frequency: {} Hz", config.frequency);
        info!("Threshold: {}", config.threshold_ratio());
        info!(
            "Acceptable matches: {} of {}",
            params.acceptable_matches, params.window_capacity
        );
        info!("Cooldown: {:?}", cooldown);

        Ok(Self {
            extractor: MagnitudeExtractor::new(
                params.transform_size,
                params.bin_index,
                config.gain as f32,
            ),
            window: SlidingPeakWindow::new(params.window_capacity),
            machine: DetectionStateMachine::new(cooldown),
            threshold: config.threshold_ratio(),
            log_analysis: config.log_analysis,
            params,
            stats,
        })
    }

    /// Process one block of mono samples observed at `now`.
    ///
    /// Blocks of the wrong length are rejected without touching any state.
    pub fn process_block(
        &mut self,
        block: &[f32],
        now: Instant,
    ) -> Result<BlockOutcome, DetectorError> {
        if block.len() != self.params.block_size {
            self.stats.record_rejected();
            return Err(DetectorError::InvalidBlock {
                expected: self.params.block_size,
                actual: block.len(),
            });
        }

        if block.iter().all(|&sample| sample == 0.0) {
            debug!("No input");
            self.stats.record_skipped();
            return Ok(BlockOutcome::Silent);
        }

        let magnitude = self.extractor.extract(block);
        let matched = magnitude > self.threshold;
        let detected = self.evaluate(matched, magnitude);
        let notifications = self.machine.step(detected, now);

        self.stats.record_processed();

        Ok(BlockOutcome::Analyzed {
            magnitude,
            matched,
            detected,
            notifications,
        })
    }

    /// Record a magnitude in the window and decide whether the tone is sustained
    pub fn process_value(&mut self, magnitude: f32) -> bool {
        self.evaluate(magnitude > self.threshold, magnitude)
    }

    fn evaluate(&mut self, matched: bool, magnitude: f32) -> bool {
        self.window.add(matched);

        if !self.window.is_full() {
            // Not enough blocks to take a decision yet
            return false;
        }

        let matches = self.window.match_count();
        if self.log_analysis {
            debug!(
                "Value {} - Threshold {} - num_matches {} - acceptable {}",
                magnitude, self.threshold, matches, self.params.acceptable_matches
            );
        }

        matches as f64 >= self.params.acceptable_matches
    }

    pub fn params(&self) -> &DerivedParameters {
        &self.params
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn window(&self) -> &SlidingPeakWindow {
        &self.window
    }

    pub fn state(&self) -> AlertState {
        self.machine.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            acceptance_ratio: 95.0,
            gain: 4.0,
            cooldown_secs: 10.0,
            ..DetectorConfig::new(65.0, 1.5, 1000.0)
        }
    }

    fn test_detector() -> ToneDetector {
        ToneDetector::new(&test_config(), 44100, Arc::new(PipelineStats::default())).unwrap()
    }

    /// Tone on bin 12 of the 510-point transform used at 44.1 kHz
    fn tone_block(amplitude: f64) -> Vec<f32> {
        let frequency = 12.0 * 44100.0 / 510.0;
        (0..2205)
            .map(|i| (amplitude * (2.0 * PI * frequency * i as f64 / 44100.0).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_detector_creation() {
        let detector = test_detector();

        assert_eq!(detector.params().block_size, 2205);
        assert_eq!(detector.threshold(), 0.65);
        assert_eq!(detector.window().capacity(), 30);
        assert_eq!(detector.state(), AlertState::Quiet);
        assert_eq!(detector.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_invalid_configuration() {
        let config = DetectorConfig {
            num_freq_bins: 1,
            ..test_config()
        };
        let result = ToneDetector::new(&config, 44100, Arc::new(PipelineStats::default()));
        assert!(matches!(result, Err(DetectorError::Configuration(_))));
    }

    #[test]
    fn test_huge_peak_duration_is_configuration_error() {
        let config = DetectorConfig {
            peak_duration: 1.0e15,
            ..test_config()
        };
        assert!(config.validate().is_ok());

        let result = ToneDetector::new(&config, 44100, Arc::new(PipelineStats::default()));
        assert!(matches!(result, Err(DetectorError::Configuration(_))));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut detector = test_detector();

        detector.process_value(0.64);
        detector.process_value(0.65);
        detector.process_value(0.66);

        let added: Vec<bool> = detector.window().iter().copied().collect();
        assert_eq!(added, vec![false, false, true]);
    }

    #[test]
    fn test_warm_up_never_detects() {
        let mut detector = test_detector();

        for _ in 0..29 {
            assert!(!detector.process_value(1.0));
        }
        assert_eq!(detector.window().match_count(), 29);

        // 30th block fills the window
        assert!(detector.process_value(1.0));
    }

    #[test]
    fn test_acceptance_ratio() {
        let mut detector = test_detector();

        // 28 matches out of 30 is under the 28.5 required
        let mut detected = true;
        for i in 0..30 {
            detected = detector.process_value(if i < 2 { 0.0 } else { 1.0 });
        }
        assert_eq!(detector.window().match_count(), 28);
        assert!(!detected);

        // Evicting the first miss brings the window to 29
        assert!(detector.process_value(1.0));
        assert_eq!(detector.window().match_count(), 29);
    }

    #[test]
    fn test_invalid_block_rejected() {
        let mut detector = test_detector();
        let result = detector.process_block(&[0.1; 100], Instant::now());

        assert!(matches!(
            result,
            Err(DetectorError::InvalidBlock { expected: 2205, actual: 100 })
        ));
        assert!(detector.window().is_empty());
        assert_eq!(detector.stats().blocks_rejected, 1);
    }

    #[test]
    fn test_silent_block_skipped() {
        let mut detector = test_detector();
        let outcome = detector.process_block(&[0.0; 2205], Instant::now()).unwrap();

        assert_eq!(outcome, BlockOutcome::Silent);
        assert!(outcome.notifications().is_empty());
        assert!(detector.window().is_empty());
        assert_eq!(detector.stats().blocks_skipped, 1);
    }

    #[test]
    fn test_sustained_tone_notifies_once() {
        let mut detector = test_detector();
        let loud = tone_block(0.5);
        let t0 = Instant::now();
        let mut emitted = Vec::new();

        for i in 0..60u32 {
            let now = t0 + Duration::from_millis(50) * i;
            let outcome = detector.process_block(&loud, now).unwrap();
            if let BlockOutcome::Analyzed { matched, .. } = outcome {
                assert!(matched);
            }
            emitted.extend(outcome.notifications().iter());
        }

        assert_eq!(emitted, vec![true]);
        assert_eq!(detector.state(), AlertState::Alerting);
        assert_eq!(detector.stats().blocks_processed, 60);
    }

    #[test]
    fn test_weak_tone_does_not_match() {
        let mut detector = test_detector();
        let outcome = detector.process_block(&tone_block(0.01), Instant::now()).unwrap();

        match outcome {
            BlockOutcome::Analyzed { magnitude, matched, detected, .. } => {
                assert!(magnitude < 0.65);
                assert!(!matched);
                assert!(!detected);
            }
            BlockOutcome::Silent => panic!("Expected analysed block"),
        }
    }
}
