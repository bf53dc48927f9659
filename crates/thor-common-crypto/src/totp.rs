// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! TOTP issuance for the admin login surface.

use totp_rs::{Algorithm, Secret, TOTP};

use crate::{CryptoError, CryptoResult};

/// A freshly issued TOTP enrolment: the base32 secret to persist and the
/// otpauth URL to render as a QR code.
#[derive(Debug, Clone)]
pub struct TotpIssuance {
	pub secret: String,
	pub url: String,
}

fn issuer() -> String {
	hostname::get()
		.map(|h| h.to_string_lossy().into_owned())
		.unwrap_or_else(|_| "thor".to_string())
}

fn build(secret: Secret, account: &str) -> CryptoResult<TOTP> {
	TOTP::new(
		Algorithm::SHA1,
		6,
		1,
		30,
		secret
			.to_bytes()
			.map_err(|e| CryptoError::Totp(format!("{e:?}")))?,
		Some(issuer()),
		account.to_string(),
	)
	.map_err(|e| CryptoError::Totp(e.to_string()))
}

/// Issue a new TOTP secret for the admin account.
pub fn issue(account: &str) -> CryptoResult<TotpIssuance> {
	let secret = Secret::generate_secret();
	let encoded = secret.to_encoded().to_string();
	let totp = build(secret, account)?;
	Ok(TotpIssuance {
		secret: encoded,
		url: totp.get_url(),
	})
}

/// Check a submitted code against a previously issued base32 secret.
pub fn verify(code: &str, secret: &str, account: &str) -> CryptoResult<bool> {
	let totp = build(Secret::Encoded(secret.to_string()), account)?;
	totp.check_current(code)
		.map_err(|e| CryptoError::Totp(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn issue_produces_otpauth_url() {
		let issuance = issue("admin@example.com").unwrap();
		assert!(issuance.url.starts_with("otpauth://totp/"));
		assert!(!issuance.secret.is_empty());
	}

	#[test]
	fn current_code_verifies() {
		let issuance = issue("admin@example.com").unwrap();
		let totp = build(Secret::Encoded(issuance.secret.clone()), "admin@example.com").unwrap();
		let code = totp.generate_current().unwrap();
		assert!(verify(&code, &issuance.secret, "admin@example.com").unwrap());
	}

	#[test]
	fn wrong_code_fails() {
		let issuance = issue("admin@example.com").unwrap();
		let totp = build(Secret::Encoded(issuance.secret.clone()), "admin@example.com").unwrap();
		let code = totp.generate_current().unwrap();
		// Flip the first digit so the code cannot match any accepted window.
		let wrong: String = code
			.chars()
			.enumerate()
			.map(|(i, c)| {
				if i == 0 {
					char::from_digit((c.to_digit(10).unwrap() + 5) % 10, 10).unwrap()
				} else {
					c
				}
			})
			.collect();
		assert!(!verify(&wrong, &issuance.secret, "admin@example.com").unwrap());
	}
}
