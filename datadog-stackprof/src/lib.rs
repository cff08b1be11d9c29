// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Profile-encoding pipeline for stackprof-style sampling data.
//!
//! The sampler itself is an external collaborator reached through the
//! [`collector::Sampler`] trait; this crate decodes its packed raw results,
//! aggregates duplicate stacks, and assembles a pprof-style profile that an
//! external serializer can encode to wire bytes.

pub mod collections;
pub mod collector;
pub mod config;
pub mod converter;
pub mod decoder;
pub mod event;
pub mod pprof;
pub mod profile;
pub mod recorder;
