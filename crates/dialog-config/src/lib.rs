// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Config schema and layered YAML loader for `dialogd`.
mod loader;
mod schema;

pub use loader::load;
pub use schema::*;
