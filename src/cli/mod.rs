// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

pub mod args;
pub mod config;

pub use args::{Args, Command};
pub use config::Settings;
