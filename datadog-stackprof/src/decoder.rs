// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decodes the packed raw result of the external sampler.
//!
//! The raw stream is a flat array walked in segments of the form
//! `[length, frame_id x length, count]`: `length` frame ids ordered
//! outermost to innermost, then `count`, the number of consecutive
//! microsecond deltas in the parallel timestamp array that together make up
//! the elapsed time of this one sample.

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::{SamplingMode, StackEvent, StackFrame, ThreadId, MAX_STACK_DEPTH};
use crate::recorder::MemoCache;

/// Frame metadata as reported by the sampler, keyed by raw frame id.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub name: String,
    pub line: u32,
    pub file: String,
}

/// The external sampler's raw result. A sampler that produced nothing
/// represents `raw`/`raw_timestamp_deltas` as empty vectors, not as an error.
#[derive(Clone, Debug, Default)]
pub struct RawSampleResult {
    pub frames: HashMap<u64, RawFrame>,
    pub raw: Vec<u64>,
    pub raw_timestamp_deltas: Vec<u64>,
}

/// All decode errors are fatal for the whole call: they indicate an
/// incompatible or corrupted sampler result, and a partial decode would
/// produce a profile with silently missing time.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated sample segment at offset {offset}")]
    TruncatedSegment { offset: usize },
    #[error("raw timestamps missing: segment needs {needed}, {available} available")]
    MissingTimestamps { needed: usize, available: usize },
    #[error("frame id {0:#x} not present in frame metadata")]
    UnknownFrame(u64),
}

/// Decodes `result` into ordered stack events, attributing each sample's
/// elapsed time to the cpu or wall column per `mode`. Frame ids resolve
/// through `frame_cache` so each distinct id is materialized once per flush
/// cycle.
pub fn decode(
    result: &RawSampleResult,
    mode: SamplingMode,
    frame_cache: &mut MemoCache<u64, Arc<StackFrame>>,
) -> Result<Vec<StackEvent>, DecodeError> {
    let raw = &result.raw;
    let deltas = &result.raw_timestamp_deltas;

    let mut events = Vec::new();
    let mut position = 0;
    let mut delta_position = 0;
    // Running sum of consumed deltas; doubles as a logical capture time.
    let mut clock_us: u64 = 0;

    while position < raw.len() {
        let length = raw[position] as usize;
        let count_position = position
            .checked_add(length)
            .and_then(|p| p.checked_add(1))
            .filter(|p| *p < raw.len())
            .ok_or(DecodeError::TruncatedSegment { offset: position })?;

        let count = raw[count_position] as usize;
        let available = deltas.len() - delta_position;
        if available < count {
            return Err(DecodeError::MissingTimestamps {
                needed: count,
                available,
            });
        }

        let elapsed_us: u64 = deltas[delta_position..delta_position + count].iter().sum();
        clock_us += elapsed_us;
        let elapsed_ns = (elapsed_us * 1000) as i64;

        // The raw stream is outermost first; events are innermost first.
        let frame_ids = &raw[position + 1..count_position];
        let mut frames = Vec::with_capacity(frame_ids.len().min(MAX_STACK_DEPTH));
        for &frame_id in frame_ids.iter().rev().take(MAX_STACK_DEPTH) {
            let frame = frame_cache.try_fetch(frame_id, || {
                let raw_frame = result
                    .frames
                    .get(&frame_id)
                    .ok_or(DecodeError::UnknownFrame(frame_id))?;
                Ok(Arc::new(StackFrame {
                    name: raw_frame.name.clone(),
                    line: raw_frame.line,
                    file: raw_frame.file.clone(),
                }))
            })?;
            frames.push(frame);
        }

        events.push(StackEvent {
            timestamp: clock_us as i64,
            frames,
            total_frame_count: frame_ids.len(),
            thread_id: ThreadId::Unsupported,
            trace_id: 0,
            span_id: 0,
            trace_resource: None,
            cpu_time_interval_ns: (mode == SamplingMode::Cpu).then_some(elapsed_ns),
            wall_time_interval_ns: (mode == SamplingMode::Wall).then_some(elapsed_ns),
        });

        position = count_position + 1;
        delta_position += count;
    }

    Ok(events)
}
