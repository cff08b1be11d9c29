// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Aggregates stack events into deduplicated sample groups.
//!
//! A converter is stateful per use: it owns the cycle's [Profile] and its
//! processed counters accumulate across [StackSampleConverter::add_events]
//! calls. Construct a fresh one per flush cycle; [StackSampleConverter::finish]
//! consumes it, so an instance cannot leak into the next cycle.

use std::hash::{Hash, Hasher};

use crate::collections::FxIndexMap;
use crate::event::StackEvent;
use crate::pprof;
use crate::profile::Profile;

pub const VALUE_TYPE_CPU: &str = "cpu-time";
pub const VALUE_TYPE_WALL: &str = "wall-time";
pub const VALUE_UNIT_NANOSECONDS: &str = "nanoseconds";

pub const LABEL_KEY_THREAD_ID: &str = "thread id";
pub const LABEL_KEY_TRACE_ID: &str = "trace id";
pub const LABEL_KEY_SPAN_ID: &str = "span id";
pub const LABEL_KEY_TRACE_ENDPOINT: &str = "trace endpoint";

/// One declared value type and the extraction function mapping an event to
/// its contribution. The fixed ordered list given at construction defines the
/// width and order of every sample's value vector.
#[derive(Copy, Clone)]
pub struct ValueTypeDef {
    pub r#type: &'static str,
    pub unit: &'static str,
    pub extract: fn(&StackEvent) -> Option<i64>,
}

/// The standard column set: cpu time and wall time, both in nanoseconds.
/// Both are always declared; only the active sampling mode's column ever
/// receives values, the other serializes as "no value".
pub fn sample_value_types() -> Vec<ValueTypeDef> {
    vec![
        ValueTypeDef {
            r#type: VALUE_TYPE_CPU,
            unit: VALUE_UNIT_NANOSECONDS,
            extract: |event| event.cpu_time_interval_ns,
        },
        ValueTypeDef {
            r#type: VALUE_TYPE_WALL,
            unit: VALUE_UNIT_NANOSECONDS,
            extract: |event| event.wall_time_interval_ns,
        },
    ]
}

/// All events sharing one grouping key, folded together.
pub struct EventGroup {
    representative: StackEvent,
    values: Vec<Option<i64>>,
}

impl EventGroup {
    /// The most recent event in timestamp order. Its thread and trace fields
    /// label the whole group; they are assumed stable across grouped
    /// duplicates.
    pub fn representative(&self) -> &StackEvent {
        &self.representative
    }

    /// Per-slot accumulated values. `None` means no event in the group
    /// carried that measurement.
    pub fn values(&self) -> &[Option<i64>] {
        &self.values
    }
}

/// The default grouping key: a structural hash of the frame sequence.
pub fn stack_signature(event: &StackEvent) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    event.frames.hash(&mut hasher);
    hasher.finish()
}

pub struct StackSampleConverter {
    value_types: Vec<ValueTypeDef>,
    profile: Profile,
    processed_unique_stacks: usize,
    processed_with_trace_ids: usize,
}

impl StackSampleConverter {
    pub fn new(value_types: Vec<ValueTypeDef>) -> Self {
        let declared: Vec<(&str, &str)> = value_types
            .iter()
            .map(|vt| (vt.r#type, vt.unit))
            .collect();
        Self {
            value_types,
            profile: Profile::new(&declared),
            processed_unique_stacks: 0,
            processed_with_trace_ids: 0,
        }
    }

    pub fn with_default_value_types() -> Self {
        Self::new(sample_value_types())
    }

    /// Partitions `events` by `key_fn`, preserving first-seen group order,
    /// folding each event's per-type contributions into its group as it goes.
    pub fn group_events<F>(&self, events: &[StackEvent], key_fn: F) -> FxIndexMap<u64, EventGroup>
    where
        F: Fn(&StackEvent) -> u64,
    {
        let mut groups: FxIndexMap<u64, EventGroup> = Default::default();
        for event in events {
            match groups.entry(key_fn(event)) {
                indexmap::map::Entry::Occupied(mut entry) => {
                    self.update_group(entry.get_mut(), event)
                }
                indexmap::map::Entry::Vacant(entry) => {
                    entry.insert(EventGroup {
                        representative: event.clone(),
                        values: self.build_event_values(event),
                    });
                }
            }
        }
        groups
    }

    /// One contribution per declared value type; absent measurements stay
    /// `None`, which is distinct from a measured zero.
    fn build_event_values(&self, event: &StackEvent) -> Vec<Option<i64>> {
        self.value_types
            .iter()
            .map(|vt| (vt.extract)(event))
            .collect()
    }

    fn update_group(&self, group: &mut EventGroup, event: &StackEvent) {
        for (slot, contribution) in group.values.iter_mut().zip(self.build_event_values(event)) {
            *slot = match (*slot, contribution) {
                (None, None) => None,
                (acc, value) => Some(acc.unwrap_or(0) + value.unwrap_or(0)),
            };
        }
        // Use the most recent event; its properties may have better data.
        // Strictly-greater keeps the first seen on timestamp ties.
        if event.timestamp > group.representative.timestamp {
            group.representative = event.clone();
        }
    }

    /// Groups `events` by stack signature and appends one assembled sample
    /// per group to the profile.
    pub fn add_events(&mut self, events: &[StackEvent]) {
        let groups = self.group_events(events, stack_signature);
        for (_key, group) in groups {
            self.processed_unique_stacks += 1;
            self.build_sample(&group);
        }
    }

    fn build_sample(&mut self, group: &EventGroup) {
        let event = group.representative();
        let location_ids = self
            .profile
            .add_locations(&event.frames, event.total_frame_count);
        let labels = self.build_sample_labels(event);

        self.profile.add_sample(pprof::Sample {
            location_ids: location_ids.iter().map(Into::into).collect(),
            values: group
                .values()
                .iter()
                .map(|value| value.unwrap_or(pprof::NO_VALUE))
                .collect(),
            labels,
        });
    }

    fn build_sample_labels(&mut self, event: &StackEvent) -> Vec<pprof::Label> {
        let thread_id = event.thread_id.to_string();
        let mut labels = vec![pprof::Label::str(
            self.profile.intern(LABEL_KEY_THREAD_ID).into(),
            self.profile.intern(&thread_id).into(),
        )];

        if event.has_active_trace() {
            self.processed_with_trace_ids += 1;

            let trace_id = event.trace_id.to_string();
            labels.push(pprof::Label::str(
                self.profile.intern(LABEL_KEY_TRACE_ID).into(),
                self.profile.intern(&trace_id).into(),
            ));

            let span_id = event.span_id.to_string();
            labels.push(pprof::Label::str(
                self.profile.intern(LABEL_KEY_SPAN_ID).into(),
                self.profile.intern(&span_id).into(),
            ));

            match &event.trace_resource {
                Some(resource) if !resource.is_empty() => {
                    labels.push(pprof::Label::str(
                        self.profile.intern(LABEL_KEY_TRACE_ENDPOINT).into(),
                        self.profile.intern(resource).into(),
                    ));
                }
                _ => {}
            }
        }

        labels
    }

    /// Human-readable counters for operator logs; not machine-parsed.
    pub fn debug_statistics(&self) -> String {
        format!(
            "unique stacks: {}, of which had active traces: {}",
            self.processed_unique_stacks, self.processed_with_trace_ids
        )
    }

    pub fn finish(self) -> pprof::Profile {
        self.profile.finish()
    }
}
