// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::collections::FxHashMap;
use crate::event::{StackEvent, StackFrame};

/// A memoizing key/value store. Each distinct key is computed exactly once;
/// later fetches return the cached value.
#[derive(Debug, Default)]
pub struct MemoCache<K, V> {
    entries: FxHashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> MemoCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Default::default(),
        }
    }

    pub fn fetch(&mut self, key: K, build: impl FnOnce() -> V) -> V {
        self.entries.entry(key).or_insert_with(build).clone()
    }

    /// Like [MemoCache::fetch], but the builder may fail; failures are not
    /// cached.
    pub fn try_fetch<E>(
        &mut self,
        key: K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.entries.get(&key) {
            return Ok(value.clone());
        }
        let value = build()?;
        self.entries.insert(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Default)]
struct Inner {
    buffer: VecDeque<StackEvent>,
    generation: u64,
    dropped_events: u64,
}

/// Accumulates decoded stack events between flush cycles.
///
/// The buffer is bounded (`max_size == 0` means unbounded); when full, the
/// oldest entries are evicted so `push` never fails due to capacity. The
/// buffer swap in [EventRecorder::flush] happens under the mutex, but the
/// lock is never held across the decode/aggregate pipeline, so producers
/// only ever block for the swap itself.
#[derive(Debug)]
pub struct EventRecorder {
    max_size: usize,
    inner: Mutex<Inner>,
    frame_cache: Mutex<MemoCache<u64, Arc<StackFrame>>>,
}

impl EventRecorder {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(Inner::default()),
            frame_cache: Mutex::new(MemoCache::new()),
        }
    }

    /// Appends events, evicting the oldest buffered entries when the buffer
    /// is bounded and full.
    pub fn push(&self, events: Vec<StackEvent>) {
        let mut inner = self.inner.lock();
        let mut dropped = 0u64;
        for event in events {
            if self.max_size != 0 && inner.buffer.len() >= self.max_size {
                inner.buffer.pop_front();
                dropped += 1;
            }
            inner.buffer.push_back(event);
        }
        if dropped > 0 {
            inner.dropped_events += dropped;
            let total = inner.dropped_events;
            drop(inner);
            warn!(dropped, total, "event buffer full, evicted oldest events");
        }
    }

    /// Swaps the buffer for an empty one and returns the drained events with
    /// the generation of the completed cycle. The per-cycle frame cache is
    /// cleared as well: only the configured capacity survives a flush.
    pub fn flush(&self) -> (Vec<StackEvent>, u64) {
        let (events, generation) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let buffer = std::mem::take(&mut inner.buffer);
            (Vec::from(buffer), inner.generation)
        };
        self.frame_cache.lock().clear();
        (events, generation)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().buffer.is_empty()
    }

    /// Count of events evicted over the recorder's lifetime.
    pub fn dropped_events(&self) -> u64 {
        self.inner.lock().dropped_events
    }

    /// The memoizing frame-id cache used by the decoder. Scoped to the
    /// current flush cycle.
    pub fn frame_cache(&self) -> MutexGuard<'_, MemoCache<u64, Arc<StackFrame>>> {
        self.frame_cache.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ThreadId;

    fn event(timestamp: i64) -> StackEvent {
        StackEvent {
            timestamp,
            frames: vec![],
            total_frame_count: 0,
            thread_id: ThreadId::Unsupported,
            trace_id: 0,
            span_id: 0,
            trace_resource: None,
            cpu_time_interval_ns: None,
            wall_time_interval_ns: None,
        }
    }

    #[test]
    fn flush_swaps_the_buffer() {
        let recorder = EventRecorder::new(0);
        assert!(recorder.is_empty());

        recorder.push(vec![event(1), event(2)]);
        assert!(!recorder.is_empty());

        let (events, generation) = recorder.flush();
        assert_eq!(events.len(), 2);
        assert_eq!(generation, 1);
        assert!(recorder.is_empty());

        let (events, generation) = recorder.flush();
        assert!(events.is_empty());
        assert_eq!(generation, 2);
    }

    #[test]
    fn bounded_buffer_evicts_oldest() {
        let recorder = EventRecorder::new(2);
        recorder.push(vec![event(1), event(2), event(3)]);
        assert_eq!(recorder.dropped_events(), 1);

        let (events, _) = recorder.flush();
        let timestamps: Vec<i64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![2, 3]);
    }

    #[test]
    fn unbounded_buffer_never_drops() {
        let recorder = EventRecorder::new(0);
        recorder.push((0..1000).map(event).collect());
        assert_eq!(recorder.dropped_events(), 0);
        assert_eq!(recorder.flush().0.len(), 1000);
    }

    #[test]
    fn memo_cache_computes_each_key_once() {
        let mut cache: MemoCache<u64, String> = MemoCache::new();
        let mut computed = 0;
        for _ in 0..3 {
            let value = cache.fetch(7, || {
                computed += 1;
                "seven".to_owned()
            });
            assert_eq!(value, "seven");
        }
        assert_eq!(computed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn flush_clears_the_frame_cache() {
        let recorder = EventRecorder::new(0);
        recorder.frame_cache().fetch(1, || {
            Arc::new(StackFrame {
                name: "main".to_owned(),
                line: 1,
                file: "main.rb".to_owned(),
            })
        });
        assert_eq!(recorder.frame_cache().len(), 1);

        recorder.flush();
        assert!(recorder.frame_cache().is_empty());
    }
}
