//! Audio pacing
//!
//! Completed PCM batches from the engine are converted to `f32` and scheduled
//! back-to-back on the sink's clock, a fixed latency ahead of "now". If the
//! producer falls behind the clock (stall, pause, background tab) the backlog
//! is not queued: the start time is reset to `now + latency` and playback
//! continues with an audible gap.

use tracing::debug;

use crate::config::AudioConfig;

/// Half the range of an unsigned 8-bit sample
const SAMPLE_HALF_RANGE: f32 = 127.5;

/// A block of interleaved stereo samples scheduled at `start_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBatch {
    /// Interleaved left/right samples in `[-1, 1]`
    pub samples: Vec<f32>,
    /// Start time on the sink's clock, in seconds
    pub start_time: f64,
}

impl AudioBatch {
    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }
}

/// Real-time audio output with its own clock.
pub trait AudioSink {
    /// Current time of the audio clock in seconds
    fn now(&self) -> f64;

    /// Queue a batch for playback at `batch.start_time`
    fn schedule(&mut self, batch: AudioBatch);

    /// Stop the audio clock (pause)
    fn suspend(&mut self) {}

    /// Restart the audio clock
    fn resume(&mut self) {}
}

/// Convert unsigned 8-bit interleaved samples to `[-1, 1]`.
pub fn convert_samples(pcm: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(pcm.iter().map(|&s| s as f32 / SAMPLE_HALF_RANGE - 1.0));
}

/// Schedules engine audio batches against an [`AudioSink`].
pub struct AudioScheduler<A: AudioSink> {
    sink: A,
    sample_rate: u32,
    latency_sec: f64,
    /// Start time for the next batch; `None` until the first push after a reset
    start_time: Option<f64>,
    resets: u64,
    scheduled: u64,
}

impl<A: AudioSink> AudioScheduler<A> {
    pub fn new(sink: A, config: &AudioConfig) -> Self {
        Self {
            sink,
            sample_rate: config.sample_rate,
            latency_sec: config.latency_sec,
            start_time: None,
            resets: 0,
            scheduled: 0,
        }
    }

    /// Schedule one completed batch of unsigned 8-bit stereo samples.
    ///
    /// Returns the scheduled start time, or `None` if the batch was dropped
    /// because the start time had drifted behind the audio clock.
    pub fn push(&mut self, pcm: &[u8]) -> Option<f64> {
        let now = self.sink.now();
        let now_plus_latency = now + self.latency_sec;
        let start = *self.start_time.get_or_insert(now_plus_latency);

        if start >= now {
            let mut samples = Vec::with_capacity(pcm.len());
            convert_samples(pcm, &mut samples);
            let batch = AudioBatch {
                samples,
                start_time: start,
            };
            let batch_sec = batch.frames() as f64 / self.sample_rate as f64;
            self.sink.schedule(batch);
            self.start_time = Some(start + batch_sec);
            self.scheduled += 1;
            Some(start)
        } else {
            debug!("Resetting audio ({:.2} < {:.2})", start, now);
            self.start_time = Some(now_plus_latency);
            self.resets += 1;
            None
        }
    }

    /// Forget the established start time; the next push re-anchors to the clock
    pub fn reset(&mut self) {
        self.start_time = None;
    }

    pub fn suspend(&mut self) {
        self.sink.suspend();
    }

    pub fn resume(&mut self) {
        self.sink.resume();
    }

    /// Start time the next batch would get, if established
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    /// Number of drift resets so far
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Number of batches handed to the sink
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut A {
        &mut self.sink
    }
}

/// Audio sink with a manually advanced clock.
///
/// Used by headless runs and tests: the host advances the clock with wall
/// time, and the clock stops while suspended, like a real output device.
#[derive(Debug, Default)]
pub struct VirtualAudioSink {
    now: f64,
    suspended: bool,
    starts: Vec<f64>,
    frames: u64,
    peak: f32,
}

impl VirtualAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `dt` seconds unless suspended
    pub fn advance(&mut self, dt: f64) {
        if !self.suspended {
            self.now += dt.max(0.0);
        }
    }

    /// Set the clock directly
    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Start times of every scheduled batch, in order
    pub fn starts(&self) -> &[f64] {
        &self.starts
    }

    /// Total stereo frames scheduled
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Largest absolute sample value seen
    pub fn peak(&self) -> f32 {
        self.peak
    }
}

impl AudioSink for VirtualAudioSink {
    fn now(&self) -> f64 {
        self.now
    }

    fn schedule(&mut self, batch: AudioBatch) {
        self.frames += batch.frames() as u64;
        self.peak = batch
            .samples
            .iter()
            .fold(self.peak, |peak, s| peak.max(s.abs()));
        self.starts.push(batch.start_time);
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }

    fn resume(&mut self) {
        self.suspended = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AudioConfig {
        AudioConfig {
            sample_rate: 44_100,
            frames: 4096,
            latency_sec: 0.1,
        }
    }

    fn batch() -> Vec<u8> {
        vec![128u8; 4096 * 2]
    }

    #[test]
    fn convert_samples_maps_range() {
        let mut out = Vec::new();
        convert_samples(&[0, 255, 128], &mut out);
        assert!((out[0] + 1.0).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!(out[2].abs() < 0.01);
    }

    #[test]
    fn first_push_anchors_at_latency() {
        let mut sink = VirtualAudioSink::new();
        sink.set_now(2.0);
        let mut scheduler = AudioScheduler::new(sink, &config());
        assert_eq!(scheduler.push(&batch()), Some(2.1));
    }

    #[test]
    fn batches_are_gapless() {
        let mut scheduler = AudioScheduler::new(VirtualAudioSink::new(), &config());
        let batch_sec = 4096.0 / 44_100.0;
        let first = scheduler.push(&batch()).unwrap();
        scheduler.sink_mut().advance(0.05);
        let second = scheduler.push(&batch()).unwrap();
        scheduler.sink_mut().advance(0.05);
        let third = scheduler.push(&batch()).unwrap();
        assert!((second - first - batch_sec).abs() < 1e-9);
        assert!((third - second - batch_sec).abs() < 1e-9);
        assert_eq!(scheduler.sink().frames(), 3 * 4096);
    }

    #[test]
    fn stall_resets_instead_of_queuing_backlog() {
        let mut scheduler = AudioScheduler::new(VirtualAudioSink::new(), &config());
        scheduler.push(&batch()).unwrap();

        // Backgrounded for two seconds
        scheduler.sink_mut().advance(2.0);
        assert_eq!(scheduler.push(&batch()), None);
        assert_eq!(scheduler.resets(), 1);
        assert!((scheduler.start_time().unwrap() - 2.1).abs() < 1e-9);

        // Next batch lands at the new anchor
        let start = scheduler.push(&batch()).unwrap();
        assert!((start - 2.1).abs() < 1e-9);
        assert_eq!(scheduler.sink().starts().len(), 2);
        assert_eq!(scheduler.scheduled(), 2);
    }

    #[test]
    fn never_schedules_in_the_past() {
        let mut scheduler = AudioScheduler::new(VirtualAudioSink::new(), &config());
        let steps = [0.01, 0.2, 0.0, 0.5, 0.09, 1.3, 0.016, 0.016, 0.3];
        for dt in steps.iter().cycle().take(200) {
            scheduler.sink_mut().advance(*dt);
            let now = scheduler.sink().now();
            if let Some(start) = scheduler.push(&batch()) {
                assert!(start >= now);
            }
        }
    }

    #[test]
    fn reset_reanchors() {
        let mut scheduler = AudioScheduler::new(VirtualAudioSink::new(), &config());
        scheduler.push(&batch()).unwrap();
        scheduler.reset();
        assert!(scheduler.start_time().is_none());
        scheduler.sink_mut().set_now(5.0);
        assert_eq!(scheduler.push(&batch()), Some(5.1));
    }

    #[test]
    fn suspended_clock_does_not_advance() {
        let mut scheduler = AudioScheduler::new(VirtualAudioSink::new(), &config());
        scheduler.suspend();
        scheduler.sink_mut().advance(1.0);
        assert_eq!(scheduler.sink().now(), 0.0);
        scheduler.resume();
        scheduler.sink_mut().advance(1.0);
        assert_eq!(scheduler.sink().now(), 1.0);
    }
}
