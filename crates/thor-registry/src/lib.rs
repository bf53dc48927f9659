// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Persistent device registry backed by an embedded KV database.
//!
//! The coordinator keeps one `thor.db` file with a fixed set of tables plus
//! one table per namespace, created lazily at first registration:
//!
//! - `devices`: client IP → API key (empty value = admitted, unregistered)
//! - `certificates`: client IP → pinned registration PEM
//! - `failures` / `expiry`: client IP → monotone counters
//! - `shasum`: accepted binary digest → friendly name
//! - `ex-employees`: reserved for the admin search surface
//!
//! Every state transition is a single write transaction covering all related
//! tables, so the admission invariants hold across crashes. Reads run in
//! concurrent view transactions.

use redb::{Database, ReadableTable, TableDefinition, TableError};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const DEVICES: TableDefinition<&str, &str> = TableDefinition::new("devices");
const CERTIFICATES: TableDefinition<&str, &str> = TableDefinition::new("certificates");
const FAILURES: TableDefinition<&str, &str> = TableDefinition::new("failures");
const EXPIRY: TableDefinition<&str, &str> = TableDefinition::new("expiry");
const EX_EMPLOYEES: TableDefinition<&str, &str> = TableDefinition::new("ex-employees");
const SHASUM: TableDefinition<&str, &str> = TableDefinition::new("shasum");

/// Successful token fetches before a device must re-register.
pub const MAX_USES: u32 = 1;
/// Authentication failures before a device must re-register.
pub const MAX_AUTH_FAILURES: u32 = 1;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised by registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
	#[error("registry backend error: {0}")]
	Backend(String),

	#[error("no such device is known to the system: {0}")]
	DeviceUnknown(String),

	#[error("pinned certificate differs from the presented registration")]
	CertificateMismatch,
}

fn backend<E: std::fmt::Display>(e: E) -> RegistryError {
	RegistryError::Backend(e.to_string())
}

/// Outcome of a counter update on the token path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOutcome {
	/// Below the cap; the counter was recorded.
	Counted,
	/// Cap reached; the device record was deleted and the caller must tell
	/// the agent to re-register.
	Reregister,
}

/// The embedded device registry.
pub struct Registry {
	db: Database,
	max_uses: u32,
	max_auth_failures: u32,
}

impl Registry {
	/// Open (or create) the registry database and ensure the fixed tables
	/// exist.
	pub fn open(path: &Path) -> RegistryResult<Self> {
		let db = Database::create(path).map_err(backend)?;
		{
			let tx = db.begin_write().map_err(backend)?;
			tx.open_table(DEVICES).map_err(backend)?;
			tx.open_table(CERTIFICATES).map_err(backend)?;
			tx.open_table(FAILURES).map_err(backend)?;
			tx.open_table(EXPIRY).map_err(backend)?;
			tx.open_table(EX_EMPLOYEES).map_err(backend)?;
			tx.open_table(SHASUM).map_err(backend)?;
			tx.commit().map_err(backend)?;
		}
		Ok(Registry {
			db,
			max_uses: MAX_USES,
			max_auth_failures: MAX_AUTH_FAILURES,
		})
	}

	/// Open with explicit caps. Used by admin tooling and tests.
	pub fn open_with_limits(
		path: &Path,
		max_uses: u32,
		max_auth_failures: u32,
	) -> RegistryResult<Self> {
		let mut registry = Self::open(path)?;
		registry.max_uses = max_uses;
		registry.max_auth_failures = max_auth_failures;
		Ok(registry)
	}

	fn get(&self, table: TableDefinition<&str, &str>, key: &str) -> RegistryResult<Option<String>> {
		let tx = self.db.begin_read().map_err(backend)?;
		let t = tx.open_table(table).map_err(backend)?;
		Ok(t.get(key).map_err(backend)?.map(|v| v.value().to_string()))
	}

	/// Whether the devices table holds `ip` at all (admitted by an admin).
	pub fn device_known(&self, ip: &str) -> RegistryResult<bool> {
		Ok(self.get(DEVICES, ip)?.is_some())
	}

	/// The API key stored for `ip`, if any. An empty string means the device
	/// is admitted but not yet registered.
	pub fn device_api_key(&self, ip: &str) -> RegistryResult<Option<String>> {
		self.get(DEVICES, ip)
	}

	/// The pinned registration certificate for `ip`, if any.
	pub fn pinned_certificate(&self, ip: &str) -> RegistryResult<Option<String>> {
		self.get(CERTIFICATES, ip)
	}

	/// The friendly name registered for an accepted binary digest.
	pub fn shasum_name(&self, digest: &str) -> RegistryResult<Option<String>> {
		self.get(SHASUM, digest)
	}

	/// Record a successful registration in one transaction: store the API
	/// key, pin the certificate if absent, join the namespace, zero both
	/// counters.
	pub fn complete_registration(
		&self,
		ip: &str,
		api_key: &str,
		certificate: &str,
		namespace: &str,
	) -> RegistryResult<()> {
		let tx = self.db.begin_write().map_err(backend)?;
		{
			let mut devices = tx.open_table(DEVICES).map_err(backend)?;
			if devices.get(ip).map_err(backend)?.is_none() {
				return Err(RegistryError::DeviceUnknown(ip.to_string()));
			}
			devices.insert(ip, api_key).map_err(backend)?;

			let mut certificates = tx.open_table(CERTIFICATES).map_err(backend)?;
			let pinned = certificates
				.get(ip)
				.map_err(backend)?
				.map(|v| v.value().to_string());
			match pinned {
				Some(existing) if existing != certificate => {
					return Err(RegistryError::CertificateMismatch);
				}
				Some(_) => {}
				None => {
					certificates.insert(ip, certificate).map_err(backend)?;
				}
			}

			let members: TableDefinition<&str, &str> = TableDefinition::new(namespace);
			let mut members = tx.open_table(members).map_err(backend)?;
			members.insert(ip, "").map_err(backend)?;

			let mut failures = tx.open_table(FAILURES).map_err(backend)?;
			failures.remove(ip).map_err(backend)?;
			let mut expiry = tx.open_table(EXPIRY).map_err(backend)?;
			expiry.remove(ip).map_err(backend)?;
		}
		tx.commit().map_err(backend)?;
		debug!(ip, namespace, "registration recorded");
		Ok(())
	}

	/// Record a successful token issue. At `max_uses` the device record is
	/// deleted so the next contact forces re-registration.
	pub fn record_token_success(&self, ip: &str) -> RegistryResult<CounterOutcome> {
		self.bump(ip, EXPIRY, self.max_uses)
	}

	/// Record an authentication failure. At `max_auth_failures` the device
	/// record is deleted.
	pub fn record_auth_failure(&self, ip: &str) -> RegistryResult<CounterOutcome> {
		self.bump(ip, FAILURES, self.max_auth_failures)
	}

	fn bump(
		&self,
		ip: &str,
		table: TableDefinition<&str, &str>,
		max: u32,
	) -> RegistryResult<CounterOutcome> {
		let tx = self.db.begin_write().map_err(backend)?;
		let outcome;
		{
			let current: u32 = {
				let counters = tx.open_table(table).map_err(backend)?;
				let value = counters
					.get(ip)
					.map_err(backend)?
					.and_then(|v| v.value().parse().ok())
					.unwrap_or(0);
				value
			};
			let next = current + 1;

			if next >= max {
				// Cap reached: drop the whole device record in this
				// transaction. Both counter tables go with it.
				let mut devices = tx.open_table(DEVICES).map_err(backend)?;
				devices.remove(ip).map_err(backend)?;
				let mut certificates = tx.open_table(CERTIFICATES).map_err(backend)?;
				certificates.remove(ip).map_err(backend)?;
				let mut failures = tx.open_table(FAILURES).map_err(backend)?;
				failures.remove(ip).map_err(backend)?;
				let mut expiry = tx.open_table(EXPIRY).map_err(backend)?;
				expiry.remove(ip).map_err(backend)?;
				outcome = CounterOutcome::Reregister;
			} else {
				let mut counters = tx.open_table(table).map_err(backend)?;
				counters
					.insert(ip, next.to_string().as_str())
					.map_err(backend)?;
				outcome = CounterOutcome::Counted;
			}
		}
		tx.commit().map_err(backend)?;
		if outcome == CounterOutcome::Reregister {
			warn!(ip, "device record dropped, re-registration required");
		}
		Ok(outcome)
	}

	/// Admit a batch of device IPs with empty API keys.
	pub fn add_devices(&self, ips: &[String]) -> RegistryResult<()> {
		let tx = self.db.begin_write().map_err(backend)?;
		{
			let mut devices = tx.open_table(DEVICES).map_err(backend)?;
			for ip in ips {
				if devices.get(ip.as_str()).map_err(backend)?.is_none() {
					devices.insert(ip.as_str(), "").map_err(backend)?;
				}
			}
		}
		tx.commit().map_err(backend)?;
		Ok(())
	}

	/// Accept a batch of binary digests.
	pub fn add_shasums(&self, sums: &[(String, String)]) -> RegistryResult<()> {
		let tx = self.db.begin_write().map_err(backend)?;
		{
			let mut shasums = tx.open_table(SHASUM).map_err(backend)?;
			for (sha, name) in sums {
				shasums
					.insert(sha.as_str(), name.as_str())
					.map_err(backend)?;
			}
		}
		tx.commit().map_err(backend)?;
		Ok(())
	}

	/// Every device IP registered into `namespace`. An unknown namespace is
	/// an empty membership, not an error.
	pub fn namespace_members(&self, namespace: &str) -> RegistryResult<Vec<String>> {
		let tx = self.db.begin_read().map_err(backend)?;
		let def: TableDefinition<&str, &str> = TableDefinition::new(namespace);
		let table = match tx.open_table(def) {
			Ok(table) => table,
			Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
			Err(e) => return Err(backend(e)),
		};
		let mut members = Vec::new();
		for entry in table.iter().map_err(backend)? {
			let (key, _) = entry.map_err(backend)?;
			members.push(key.value().to_string());
		}
		Ok(members)
	}

	/// Explicit admin removal: drop the device record, its pinned
	/// certificate and both counters.
	pub fn remove_device(&self, ip: &str) -> RegistryResult<()> {
		let tx = self.db.begin_write().map_err(backend)?;
		{
			let mut devices = tx.open_table(DEVICES).map_err(backend)?;
			devices.remove(ip).map_err(backend)?;
			let mut certificates = tx.open_table(CERTIFICATES).map_err(backend)?;
			certificates.remove(ip).map_err(backend)?;
			let mut failures = tx.open_table(FAILURES).map_err(backend)?;
			failures.remove(ip).map_err(backend)?;
			let mut expiry = tx.open_table(EXPIRY).map_err(backend)?;
			expiry.remove(ip).map_err(backend)?;
		}
		tx.commit().map_err(backend)?;
		Ok(())
	}

	/// Current failure counter, for diagnostics and tests.
	pub fn failure_count(&self, ip: &str) -> RegistryResult<u32> {
		Ok(self
			.get(FAILURES, ip)?
			.and_then(|v| v.parse().ok())
			.unwrap_or(0))
	}

	/// Current token-use counter, for diagnostics and tests.
	pub fn use_count(&self, ip: &str) -> RegistryResult<u32> {
		Ok(self
			.get(EXPIRY, ip)?
			.and_then(|v| v.parse().ok())
			.unwrap_or(0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

	fn open(dir: &TempDir) -> Registry {
		Registry::open(&dir.path().join("thor.db")).unwrap()
	}

	fn registered(registry: &Registry) {
		registry.add_devices(&["10.0.0.7".to_string()]).unwrap();
		registry
			.complete_registration("10.0.0.7", "key-1", PEM, "ns")
			.unwrap();
	}

	#[test]
	fn registration_pins_certificate_and_joins_namespace() {
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		registered(&registry);

		assert_eq!(registry.device_api_key("10.0.0.7").unwrap().unwrap(), "key-1");
		assert_eq!(registry.pinned_certificate("10.0.0.7").unwrap().unwrap(), PEM);
		assert_eq!(registry.namespace_members("ns").unwrap(), vec!["10.0.0.7"]);
	}

	#[test]
	fn counters_are_zero_after_registration() {
		let dir = TempDir::new().unwrap();
		let registry =
			Registry::open_with_limits(&dir.path().join("thor.db"), 3, 3).unwrap();
		registry.add_devices(&["10.0.0.7".to_string()]).unwrap();
		assert_eq!(
			registry.record_auth_failure("10.0.0.7").unwrap(),
			CounterOutcome::Counted
		);
		assert_eq!(registry.failure_count("10.0.0.7").unwrap(), 1);

		registry
			.complete_registration("10.0.0.7", "key-1", PEM, "ns")
			.unwrap();
		assert_eq!(registry.failure_count("10.0.0.7").unwrap(), 0);
		assert_eq!(registry.use_count("10.0.0.7").unwrap(), 0);
	}

	#[test]
	fn unknown_device_cannot_register() {
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		let err = registry
			.complete_registration("10.0.0.9", "key", PEM, "ns")
			.unwrap_err();
		assert!(matches!(err, RegistryError::DeviceUnknown(_)));
	}

	#[test]
	fn certificate_is_immutable_until_removal() {
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		registered(&registry);

		let err = registry
			.complete_registration("10.0.0.7", "key-2", "different pem", "ns")
			.unwrap_err();
		assert!(matches!(err, RegistryError::CertificateMismatch));
		assert_eq!(registry.pinned_certificate("10.0.0.7").unwrap().unwrap(), PEM);

		registry.remove_device("10.0.0.7").unwrap();
		assert!(registry.pinned_certificate("10.0.0.7").unwrap().is_none());
	}

	#[test]
	fn reregistration_with_same_certificate_rotates_key() {
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		registered(&registry);

		registry
			.complete_registration("10.0.0.7", "key-2", PEM, "ns")
			.unwrap();
		assert_eq!(registry.device_api_key("10.0.0.7").unwrap().unwrap(), "key-2");
	}

	#[test]
	fn token_uses_hit_cap_and_drop_device() {
		let dir = TempDir::new().unwrap();
		let registry =
			Registry::open_with_limits(&dir.path().join("thor.db"), 2, 1).unwrap();
		registry.add_devices(&["10.0.0.7".to_string()]).unwrap();
		registry
			.complete_registration("10.0.0.7", "key-1", PEM, "ns")
			.unwrap();

		assert_eq!(
			registry.record_token_success("10.0.0.7").unwrap(),
			CounterOutcome::Counted
		);
		assert_eq!(registry.use_count("10.0.0.7").unwrap(), 1);

		assert_eq!(
			registry.record_token_success("10.0.0.7").unwrap(),
			CounterOutcome::Reregister
		);
		assert!(registry.device_api_key("10.0.0.7").unwrap().is_none());
	}

	#[test]
	fn auth_failure_at_default_cap_drops_device() {
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		registered(&registry);

		assert_eq!(
			registry.record_auth_failure("10.0.0.7").unwrap(),
			CounterOutcome::Reregister
		);
		assert!(registry.device_api_key("10.0.0.7").unwrap().is_none());
		assert!(registry.pinned_certificate("10.0.0.7").unwrap().is_none());
	}

	#[test]
	fn device_record_invariant_holds() {
		// devices[ip] non-empty iff certificates[ip] present and a
		// namespace holds ip.
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		registry.add_devices(&["10.0.0.7".to_string()]).unwrap();

		// Admitted but unregistered: empty key, no certificate.
		assert_eq!(registry.device_api_key("10.0.0.7").unwrap().unwrap(), "");
		assert!(registry.pinned_certificate("10.0.0.7").unwrap().is_none());
		assert!(registry.namespace_members("ns").unwrap().is_empty());

		registry
			.complete_registration("10.0.0.7", "key-1", PEM, "ns")
			.unwrap();
		assert!(!registry.device_api_key("10.0.0.7").unwrap().unwrap().is_empty());
		assert!(registry.pinned_certificate("10.0.0.7").unwrap().is_some());
		assert!(!registry.namespace_members("ns").unwrap().is_empty());
	}

	#[test]
	fn shasum_lookup() {
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		registry
			.add_shasums(&[("d1d1d1".to_string(), "agent".to_string())])
			.unwrap();
		assert_eq!(registry.shasum_name("d1d1d1").unwrap().unwrap(), "agent");
		assert!(registry.shasum_name("deadbeef").unwrap().is_none());
	}

	#[test]
	fn unknown_namespace_is_empty() {
		let dir = TempDir::new().unwrap();
		let registry = open(&dir);
		assert!(registry.namespace_members("nowhere").unwrap().is_empty());
	}
}
