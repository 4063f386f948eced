// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

pub mod writer;

pub use writer::{WriteResult, write_plan};
