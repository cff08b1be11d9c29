// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use crate::config::parse_env;

/// Stacks deeper than this are truncated at decode time;
/// [StackEvent::total_frame_count] keeps the true depth.
pub const MAX_STACK_DEPTH: usize = 400;

/// Environment toggle selecting cpu sampling; wall is the default.
pub const CPU_MODE_ENV: &str = "DD_PROFILING_STACKPROF_CPU";

/// One resolved stack frame. Immutable once created; identical triples are
/// shared between events through `Arc` and intern to the same location entry
/// within a profile.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StackFrame {
    pub name: String,
    pub line: u32,
    pub file: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ThreadId {
    Id(u64),
    /// The source sampler cannot attribute samples to threads.
    Unsupported,
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadId::Id(id) => write!(f, "{id}"),
            ThreadId::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Selected once at collector construction; immutable thereafter. The decoded
/// sample time is attributed to exactly one of the cpu/wall columns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplingMode {
    Cpu,
    Wall,
}

impl SamplingMode {
    pub fn from_env() -> Self {
        if parse_env::bool(CPU_MODE_ENV).unwrap_or(false) {
            SamplingMode::Cpu
        } else {
            SamplingMode::Wall
        }
    }
}

/// One decoded observation of a call stack plus timing and trace-correlation
/// metadata. `None` durations mean "not measured", which is distinct from a
/// measured zero and must stay distinguishable all the way to serialization.
#[derive(Clone, Debug)]
pub struct StackEvent {
    /// Logical capture time. May be synthetic when the source sampler does
    /// not stamp samples.
    pub timestamp: i64,
    /// Innermost first, truncated to [MAX_STACK_DEPTH].
    pub frames: Vec<Arc<StackFrame>>,
    /// True depth before truncation.
    pub total_frame_count: usize,
    pub thread_id: ThreadId,
    /// 0 means no active trace.
    pub trace_id: u64,
    /// 0 means no active trace.
    pub span_id: u64,
    /// Operation name active at sample time, if any.
    pub trace_resource: Option<String>,
    pub cpu_time_interval_ns: Option<i64>,
    pub wall_time_interval_ns: Option<i64>,
}

impl StackEvent {
    pub fn has_active_trace(&self) -> bool {
        self.trace_id != 0 && self.span_id != 0
    }
}
