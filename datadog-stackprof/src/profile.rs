// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::SystemTime;

use crate::collections::{Dedup, FxIndexSet, LocationId, StringId};
use crate::event::StackFrame;
use crate::pprof;

#[derive(Eq, PartialEq, Hash)]
struct Location {
    name: StringId,
    line: u32,
    file: StringId,
}

/// Accumulates interned strings, interned locations, and assembled samples
/// for one profile.
///
/// A `Profile` is single-use: created fresh per flush cycle, populated, and
/// consumed by [Profile::finish]. Its tables are never persisted across
/// cycles, so every encoded profile is self-contained.
pub struct Profile {
    sample_types: Vec<pprof::ValueType>,
    strings: FxIndexSet<String>,
    locations: FxIndexSet<Location>,
    samples: Vec<pprof::Sample>,
    start_time: SystemTime,
}

impl Profile {
    /// Creates a profile declaring the given `(type, unit)` value types, in
    /// order. The empty string is interned at index 0 before anything else.
    pub fn new(value_types: &[(&str, &str)]) -> Self {
        let mut profile = Self {
            sample_types: Vec::with_capacity(value_types.len()),
            strings: Default::default(),
            locations: Default::default(),
            samples: vec![],
            start_time: SystemTime::now(),
        };

        profile.intern("");
        for (r#type, unit) in value_types {
            let value_type = pprof::ValueType {
                r#type: profile.intern(r#type).into(),
                unit: profile.intern(unit).into(),
            };
            profile.sample_types.push(value_type);
        }
        profile
    }

    /// Interns `str`, returning its index in the string table.
    pub fn intern(&mut self, str: &str) -> StringId {
        // strings are special because the empty string is actually allowed at
        // index 0; most other 0's are reserved and cannot exist
        match self.strings.get_index_of(str) {
            Some(offset) => StringId::from_offset(offset),
            None => StringId::from_offset(self.strings.dedup(str.to_owned())),
        }
    }

    /// Interns one location per frame, innermost first. Identical
    /// `(name, line, file)` triples resolve to the same id within this
    /// profile. When the stack was truncated at capture, a trailing marker
    /// location records how many outer frames were omitted.
    pub fn add_locations(
        &mut self,
        frames: &[Arc<StackFrame>],
        total_frame_count: usize,
    ) -> Vec<LocationId> {
        let omitted = total_frame_count.saturating_sub(frames.len());
        let mut location_ids = Vec::with_capacity(frames.len() + usize::from(omitted > 0));

        for frame in frames {
            let name = self.intern(&frame.name);
            let file = self.intern(&frame.file);
            let offset = self.locations.dedup(Location {
                name,
                line: frame.line,
                file,
            });
            location_ids.push(LocationId::from_offset(offset));
        }

        if omitted > 0 {
            let name = self.intern(&format!("{omitted} frames omitted"));
            let file = self.intern("");
            let offset = self.locations.dedup(Location {
                name,
                line: 0,
                file,
            });
            location_ids.push(LocationId::from_offset(offset));
        }

        location_ids
    }

    /// Appends an assembled sample. Order is preserved in the output.
    pub fn add_sample(&mut self, sample: pprof::Sample) {
        self.samples.push(sample);
    }

    pub fn sample_types(&self) -> &[pprof::ValueType] {
        &self.sample_types
    }

    /// Renders the serializable profile. Tables are emitted in insertion
    /// order, so indices assigned during population stay valid.
    pub fn finish(self) -> pprof::Profile {
        pprof::Profile {
            sample_types: self.sample_types,
            samples: self.samples,
            locations: self
                .locations
                .iter()
                .enumerate()
                .map(|(offset, location)| pprof::Location {
                    id: LocationId::from_offset(offset).into(),
                    function_index: location.name.into(),
                    line: location.line.into(),
                    file_index: location.file.into(),
                })
                .collect(),
            string_table: self.strings.into_iter().collect(),
            time_nanos: self
                .start_time
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_or(0, |duration| {
                    duration.as_nanos().min(i64::MAX as u128) as i64
                }),
            duration_nanos: self
                .start_time
                .elapsed()
                .map_or(0, |duration| duration.as_nanos().min(i64::MAX as u128) as i64),
        }
    }

    #[cfg(test)]
    fn interned_strings_count(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, line: u32, file: &str) -> Arc<StackFrame> {
        Arc::new(StackFrame {
            name: name.to_owned(),
            line,
            file: file.to_owned(),
        })
    }

    #[test]
    fn interning_deduplicates() {
        let mut profile = Profile::new(&[("wall-time", "nanoseconds")]);

        let expected = StringId::from_offset(profile.interned_strings_count());
        let id1 = profile.intern("a");
        let id2 = profile.intern("a");

        assert_eq!(id1, id2);
        assert_eq!(id1, expected);
    }

    #[test]
    fn empty_string_is_index_zero() {
        let mut profile = Profile::new(&[]);
        assert!(profile.intern("").is_zero());
    }

    #[test]
    fn identical_triples_share_a_location() {
        let mut profile = Profile::new(&[]);

        let first = profile.add_locations(&[frame("f", 1, "x.rb")], 1);
        let second = profile.add_locations(&[frame("f", 1, "x.rb")], 1);
        let third = profile.add_locations(&[frame("f", 2, "x.rb")], 1);

        assert_eq!(first, second);
        assert_ne!(first, third);
    }

    #[test]
    fn string_table_has_no_duplicates() {
        let mut profile = Profile::new(&[("cpu-time", "nanoseconds")]);
        profile.add_locations(&[frame("f", 1, "x.rb"), frame("g", 2, "x.rb")], 2);

        let rendered = profile.finish();
        let mut strings = rendered.string_table.clone();
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), rendered.string_table.len());
    }

    #[test]
    fn truncated_stacks_get_an_omitted_marker() {
        let mut profile = Profile::new(&[]);
        let ids = profile.add_locations(&[frame("f", 1, "x.rb")], 3);
        assert_eq!(ids.len(), 2);

        let rendered = profile.finish();
        assert!(rendered
            .string_table
            .iter()
            .any(|s| s == "2 frames omitted"));
    }

    #[test]
    fn finish_renders_locations_with_shifted_ids() {
        let mut profile = Profile::new(&[]);
        profile.add_locations(&[frame("f", 7, "x.rb")], 1);

        let rendered = profile.finish();
        assert_eq!(rendered.locations.len(), 1);
        let location = &rendered.locations[0];
        assert_eq!(location.id, 1);
        assert_eq!(location.line, 7);
        assert_eq!(
            rendered.string_table[location.function_index as usize],
            "f"
        );
        assert_eq!(rendered.string_table[location.file_index as usize], "x.rb");
    }
}
