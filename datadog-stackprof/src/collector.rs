// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle driver: owns the external sampler, feeds decoded events into the
//! recorder, and turns one drain into one profile.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

use crate::converter::StackSampleConverter;
use crate::decoder::{self, RawSampleResult};
use crate::event::SamplingMode;
use crate::pprof;
use crate::recorder::EventRecorder;

/// The external sampling profiler. It is a process-wide start/stop switch, so
/// all control must flow through a single [StackProfCollector].
pub trait Sampler {
    /// Capability check; callers must not [Sampler::start] when unsupported.
    fn is_supported(&self) -> bool;
    fn start(&mut self, mode: SamplingMode) -> anyhow::Result<()>;
    /// Idempotent; must be safe to call even if `start` never ran.
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    /// Takes the accumulated raw result, leaving the sampler empty.
    fn results(&mut self) -> RawSampleResult;
}

/// Serves at the same time as a collector (driving the sampler) and as a
/// recorder adapter (collecting its results into profiles).
///
/// `start`/`stop`/`flush` run on a control thread; the sampler's interrupts
/// fire elsewhere. They serialize on the internal sampler mutex, and the
/// recorder's buffer swap is atomic with respect to concurrent pushes.
pub struct StackProfCollector<S: Sampler> {
    sampler: Mutex<S>,
    recorder: EventRecorder,
    mode: SamplingMode,
    needs_flush: AtomicBool,
}

impl<S: Sampler> StackProfCollector<S> {
    /// `max_events` bounds the recorder buffer (0 means unbounded). The
    /// sampling mode is read from the environment once, here; it is immutable
    /// for the collector's lifetime.
    pub fn new(sampler: S, max_events: usize) -> Self {
        Self::with_mode(sampler, max_events, SamplingMode::from_env())
    }

    pub fn with_mode(sampler: S, max_events: usize, mode: SamplingMode) -> Self {
        Self {
            sampler: Mutex::new(sampler),
            recorder: EventRecorder::new(max_events),
            mode,
            needs_flush: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    pub fn is_supported(&self) -> bool {
        self.sampler.lock().is_supported()
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Begins sampling and marks the collector flushable.
    pub fn start(&self) -> anyhow::Result<()> {
        let mut sampler = self.sampler.lock();
        anyhow::ensure!(
            sampler.is_supported(),
            "sampler is not supported on this platform"
        );
        sampler.start(self.mode)?;
        debug!(mode = ?self.mode, "started sampling");
        self.needs_flush.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Halts sampling. Idempotent, and safe before any start.
    pub fn stop(&self) {
        self.sampler.lock().stop();
        debug!("stopped sampling");
    }

    /// True after construction and after every completed flush.
    pub fn is_empty(&self) -> bool {
        !self.needs_flush.load(Ordering::SeqCst) && self.recorder.is_empty()
    }

    /// Drains one cycle into a profile ready for serialization.
    ///
    /// If sampling is running the sampler is stopped, its raw result taken,
    /// and sampling restarted before decoding begins, so coverage resumes
    /// promptly; the brief stop-restart window is inherent. A decode failure
    /// is caught here and logged, and the cycle yields no profile rather than
    /// a partial one.
    pub fn flush(&self) -> Option<pprof::Profile> {
        if self.is_empty() {
            return None;
        }
        self.needs_flush.store(false, Ordering::SeqCst);

        let result = self.capture();

        let events = {
            let mut frame_cache = self.recorder.frame_cache();
            match decoder::decode(&result, self.mode, &mut frame_cache) {
                Ok(events) => events,
                Err(error) => {
                    error!(%error, "discarding flush: sampler result could not be decoded");
                    return None;
                }
            }
        };
        if !events.is_empty() {
            self.recorder.push(events);
        }

        let (events, generation) = self.recorder.flush();
        if events.is_empty() {
            return None;
        }

        // A fresh converter per cycle; reusing one would leak state across
        // profiles.
        let mut converter = StackSampleConverter::with_default_value_types();
        converter.add_events(&events);
        debug!(generation, statistics = %converter.debug_statistics(), "flushed profile");
        Some(converter.finish())
    }

    /// Stops a running sampler just long enough to take a consistent snapshot
    /// of its raw result, then restarts it.
    fn capture(&self) -> RawSampleResult {
        let mut sampler = self.sampler.lock();
        let was_running = sampler.is_running();
        if was_running {
            sampler.stop();
        }
        let result = sampler.results();
        if was_running {
            match sampler.start(self.mode) {
                Ok(()) => self.needs_flush.store(true, Ordering::SeqCst),
                Err(error) => error!(%error, "failed to restart sampling after flush"),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RawFrame;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeState {
        supported: bool,
        running: bool,
        starts: usize,
        stops: usize,
        results: VecDeque<RawSampleResult>,
    }

    #[derive(Clone)]
    struct FakeSampler {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeSampler {
        fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(FakeState {
                    supported: true,
                    ..Default::default()
                })),
            }
        }

        fn queue(&self, result: RawSampleResult) {
            self.state.lock().results.push_back(result);
        }
    }

    impl Sampler for FakeSampler {
        fn is_supported(&self) -> bool {
            self.state.lock().supported
        }

        fn start(&mut self, _mode: SamplingMode) -> anyhow::Result<()> {
            let mut state = self.state.lock();
            state.running = true;
            state.starts += 1;
            Ok(())
        }

        fn stop(&mut self) {
            let mut state = self.state.lock();
            state.running = false;
            state.stops += 1;
        }

        fn is_running(&self) -> bool {
            self.state.lock().running
        }

        fn results(&mut self) -> RawSampleResult {
            self.state.lock().results.pop_front().unwrap_or_default()
        }
    }

    fn one_sample_result() -> RawSampleResult {
        RawSampleResult {
            frames: HashMap::from([(
                1,
                RawFrame {
                    name: "main".to_owned(),
                    line: 3,
                    file: "main.rb".to_owned(),
                },
            )]),
            raw: vec![1, 1, 2],
            raw_timestamp_deltas: vec![100, 150],
        }
    }

    #[test]
    fn flush_without_activity_is_a_noop_twice() {
        let collector = StackProfCollector::with_mode(FakeSampler::new(), 0, SamplingMode::Wall);
        assert!(collector.is_empty());
        assert!(collector.flush().is_none());
        assert!(collector.flush().is_none());
        assert!(collector.is_empty());
    }

    #[test]
    fn start_on_unsupported_sampler_is_an_error() {
        let sampler = FakeSampler::new();
        sampler.state.lock().supported = false;

        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Wall);
        assert!(!collector.is_supported());
        assert!(collector.start().is_err());
        assert!(collector.is_empty());
    }

    #[test]
    fn stop_before_start_is_safe() {
        let sampler = FakeSampler::new();
        let handle = sampler.clone();
        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Wall);
        collector.stop();
        assert_eq!(handle.state.lock().stops, 1);
    }

    #[test]
    fn flush_produces_a_profile_and_restarts_sampling() {
        let sampler = FakeSampler::new();
        let handle = sampler.clone();
        sampler.queue(one_sample_result());

        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Wall);
        collector.start().unwrap();

        let profile = collector.flush().expect("flush to produce a profile");
        assert_eq!(profile.samples.len(), 1);
        assert_eq!(
            profile.samples[0].values,
            vec![pprof::NO_VALUE, 250_000] // (100 + 150) us as ns
        );

        let state = handle.state.lock();
        assert!(state.running, "sampling resumes after flush");
        assert_eq!(state.starts, 2);
        assert_eq!(state.stops, 1);
    }

    #[test]
    fn cpu_mode_fills_the_cpu_column() {
        let sampler = FakeSampler::new();
        sampler.queue(one_sample_result());

        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Cpu);
        collector.start().unwrap();

        let profile = collector.flush().unwrap();
        assert_eq!(profile.samples[0].values, vec![250_000, pprof::NO_VALUE]);
    }

    #[test]
    fn stopped_sampler_is_not_restarted_by_flush() {
        let sampler = FakeSampler::new();
        let handle = sampler.clone();
        sampler.queue(one_sample_result());

        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Wall);
        collector.start().unwrap();
        collector.stop();

        assert!(collector.flush().is_some());
        assert!(!handle.state.lock().running);
        assert!(collector.is_empty());
    }

    #[test]
    fn decode_failure_discards_the_cycle() {
        let sampler = FakeSampler::new();
        sampler.queue(RawSampleResult {
            frames: HashMap::new(),
            raw: vec![0, 3], // needs 3 deltas, none available
            raw_timestamp_deltas: vec![],
        });

        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Wall);
        collector.start().unwrap();
        assert!(collector.flush().is_none());
    }

    #[test]
    fn cycle_after_decode_failure_starts_clean() {
        let sampler = FakeSampler::new();
        sampler.queue(RawSampleResult {
            frames: HashMap::new(),
            raw: vec![0, 3],
            raw_timestamp_deltas: vec![],
        });
        sampler.queue(one_sample_result());

        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Wall);
        collector.start().unwrap();
        assert!(collector.flush().is_none());
        assert!(collector.flush().is_some());
    }

    #[test]
    fn sampler_with_no_data_flushes_nothing() {
        let sampler = FakeSampler::new();
        let collector = StackProfCollector::with_mode(sampler, 0, SamplingMode::Wall);
        collector.start().unwrap();
        // Dirty but the sampler accumulated no samples.
        assert!(collector.flush().is_none());
    }
}
