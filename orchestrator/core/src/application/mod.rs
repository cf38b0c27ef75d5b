// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_log;
pub mod store_factory;

pub use event_log::{EventLog, EventLogError, NoopPublisher};
pub use store_factory::create_event_store;
