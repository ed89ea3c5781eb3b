// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process supervisor backends.

pub mod local;
pub mod mock;
mod traits;

pub use local::LocalSupervisor;
pub use mock::MockSupervisor;
pub use traits::*;
