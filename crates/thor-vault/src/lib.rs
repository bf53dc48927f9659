// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Secret-store adapter.
//!
//! Speaks the backend's HTTP API directly: role logins (approle / aws /
//! azure), KV v1 and v2 reads and writes, response wrapping, orphan child
//! tokens, rotation rounds and the password search used by the admin
//! surface. Delegation tokens minted here are orphan, non-renewable and
//! live five minutes.

mod auth;
pub mod client;
pub mod error;
pub mod kv;
pub mod service;

pub use client::{TokenCreateRequest, VaultClient, MAX_TTL, TTL};
pub use error::{VaultError, VaultResult};
pub use kv::{SecretData, ROTATED_KEY};
pub use service::{DelegatedToken, SecretStore, VaultService};
