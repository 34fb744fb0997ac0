// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-process concurrency primitives shared by the rest of the dialog
//! orchestration kernel: strict FIFO key-exclusion and independent-buffering
//! broadcast fan-out.

mod event_channel;
mod fifo_mutex;

pub use event_channel::{Delivered, EventChannel, EventSubscriber};
pub use fifo_mutex::{FifoMutex, FifoMutexGuard};
