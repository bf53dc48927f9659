// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Platform password application.
//!
//! Both implementations share one contract: set the account password, then
//! terminate every interactive session belonging to the account. Command
//! output is forwarded to the agent log channel; a non-zero exit is
//! reported but never aborts the rotation round.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{logout, set_password};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{logout, set_password};
