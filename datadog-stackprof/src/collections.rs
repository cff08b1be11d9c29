// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::hash::{BuildHasherDefault, Hash};
use std::num::NonZeroU32;

pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
pub type FxIndexSet<K> = indexmap::IndexSet<K, BuildHasherDefault<rustc_hash::FxHasher>>;
pub type FxHashMap<K, V> = std::collections::HashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;

/// Index into a profile's string table. Unlike the other ids, zero is a real
/// entry: the empty string is interned at index 0.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn from_offset(offset: usize) -> Self {
        let small: u32 = offset.try_into().expect("StringId to fit into a u32");
        Self(small)
    }
}

impl From<StringId> for i64 {
    fn from(s: StringId) -> Self {
        s.0.into()
    }
}

impl From<&StringId> for i64 {
    fn from(s: &StringId) -> Self {
        s.0.into()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct LocationId(NonZeroU32);

impl LocationId {
    /// PProf reserves location 0, so ids are offset + 1. Both this and the
    /// serialization of the table apply the same shift.
    pub fn from_offset(offset: usize) -> Self {
        let small: u32 = offset.try_into().expect("LocationId to fit into a u32");
        let id = small.checked_add(1).expect("LocationId to fit into a u32");
        // Safety: the `checked_add(1).expect(...)` guards this from ever being zero.
        Self(unsafe { NonZeroU32::new_unchecked(id) })
    }
}

impl From<LocationId> for u64 {
    fn from(s: LocationId) -> Self {
        s.0.get().into()
    }
}

impl From<&LocationId> for u64 {
    fn from(s: &LocationId) -> Self {
        s.0.get().into()
    }
}

/// Deduplicate an item in an ordered set, returning the offset it lives at.
pub trait Dedup<T: Eq + Hash> {
    fn dedup(&mut self, item: T) -> usize;
}

impl<T: Eq + Hash> Dedup<T> for FxIndexSet<T> {
    fn dedup(&mut self, item: T) -> usize {
        let (offset, _) = self.insert_full(item);
        offset
    }
}
