// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Self-signed registration certificates.
//!
//! On first start the agent mints a 2048-bit RSA key and a certificate valid
//! for 180 days whose subject CN and DNS SAN are its detected external IPv4.
//! Both halves persist in the data directory and are reused on subsequent
//! starts; the certificate PEM doubles as the agent's registration identity.

use rcgen::{
	CertificateParams, DnType, ExtendedKeyUsagePurpose, Ia5String, KeyPair, KeyUsagePurpose,
	SanType,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::{CryptoError, CryptoResult};

/// File name of the persisted certificate.
pub const CERT_FILE: &str = "certificate.crt";
/// File name of the persisted private key.
pub const KEY_FILE: &str = "certificate.key";

const KEY_BITS: usize = 2048;
const VALIDITY_DAYS: i64 = 180;

/// A certificate and private key, both PEM-encoded.
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
	pub cert_pem: String,
	pub key_pem: String,
}

impl CertificateMaterial {
	/// Mint a new self-signed certificate for `host`.
	pub fn generate(host: &str) -> CryptoResult<Self> {
		let rsa_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS)?;
		let key_pem = rsa_key
			.to_pkcs8_pem(LineEnding::LF)
			.map_err(|e| CryptoError::Certificate(e.to_string()))?;
		let key_pair = KeyPair::from_pem(&key_pem)?;

		let mut params = CertificateParams::new(vec![host.to_string()])?;
		// The host is an IPv4 literal; the constructor would infer an IP
		// SAN for it, but registration pins a DNS SAN carrying the address.
		params.subject_alt_names = vec![SanType::DnsName(Ia5String::try_from(host.to_string())?)];
		params
			.distinguished_name
			.push(DnType::CommonName, host.to_string());
		params.not_before = time::OffsetDateTime::now_utc();
		params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(VALIDITY_DAYS);
		params.key_usages = vec![
			KeyUsagePurpose::DigitalSignature,
			KeyUsagePurpose::KeyEncipherment,
		];
		params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

		let cert = params.self_signed(&key_pair)?;
		Ok(CertificateMaterial {
			cert_pem: cert.pem(),
			key_pem: key_pair.serialize_pem(),
		})
	}

	/// Load a persisted certificate pair.
	pub async fn load(cert_path: &Path, key_path: &Path) -> CryptoResult<Self> {
		let cert_pem = fs::read_to_string(cert_path).await?;
		let key_pem = fs::read_to_string(key_path).await?;
		Ok(CertificateMaterial { cert_pem, key_pem })
	}

	/// Persist both halves to `dir`, the key with owner-only permissions.
	pub async fn save(&self, dir: &Path) -> CryptoResult<()> {
		fs::create_dir_all(dir).await?;
		fs::write(dir.join(CERT_FILE), &self.cert_pem).await?;

		let key_path = dir.join(KEY_FILE);
		#[cfg(unix)]
		{
			use tokio::fs::OpenOptions;
			use tokio::io::AsyncWriteExt;

			let mut file = OpenOptions::new()
				.write(true)
				.create(true)
				.truncate(true)
				.mode(0o600)
				.open(&key_path)
				.await?;
			file.write_all(self.key_pem.as_bytes()).await?;
		}
		#[cfg(not(unix))]
		{
			fs::write(&key_path, &self.key_pem).await?;
		}
		Ok(())
	}

	/// DER encoding of the leaf certificate, for transport-layer pinning.
	pub fn cert_der(&self) -> CryptoResult<Vec<u8>> {
		let mut reader = self.cert_pem.as_bytes();
		let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
			.collect::<Result<_, _>>()
			.map_err(|e| CryptoError::Certificate(e.to_string()))?;
		certs
			.into_iter()
			.next()
			.map(|der| der.as_ref().to_vec())
			.ok_or_else(|| CryptoError::Certificate("no certificate in PEM".to_string()))
	}

	/// The rcgen key pair, for handing the key to a DTLS endpoint.
	pub fn key_pair(&self) -> CryptoResult<KeyPair> {
		Ok(KeyPair::from_pem(&self.key_pem)?)
	}
}

/// DER-decode every certificate in a PEM bundle. Used to compare a pinned
/// registration PEM against a presented DTLS certificate.
pub fn pem_to_der(pem: &str) -> CryptoResult<Vec<Vec<u8>>> {
	let mut reader = pem.as_bytes();
	let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
		.collect::<Result<_, _>>()
		.map_err(|e| CryptoError::Certificate(e.to_string()))?;
	Ok(certs.into_iter().map(|der| der.as_ref().to_vec()).collect())
}

/// Paths of the persisted pair inside `dir`.
pub fn material_paths(dir: &Path) -> (PathBuf, PathBuf) {
	(dir.join(CERT_FILE), dir.join(KEY_FILE))
}

/// Load the persisted certificate pair from `dir`, minting and persisting a
/// fresh one when loading fails.
pub async fn load_or_create(dir: &Path, host: &str) -> CryptoResult<CertificateMaterial> {
	let (cert_path, key_path) = material_paths(dir);
	match CertificateMaterial::load(&cert_path, &key_path).await {
		Ok(material) => {
			debug!(path = %cert_path.display(), "loaded persisted certificate");
			Ok(material)
		}
		Err(_) => {
			info!(host, "minting new self-signed certificate");
			let material = CertificateMaterial::generate(host)?;
			material.save(dir).await?;
			Ok(material)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn generate_produces_parseable_pem() {
		let material = CertificateMaterial::generate("203.0.113.7").unwrap();
		assert!(material.cert_pem.contains("BEGIN CERTIFICATE"));
		assert!(material.key_pem.contains("PRIVATE KEY"));
		assert!(!material.cert_der().unwrap().is_empty());
	}

	#[tokio::test]
	async fn save_and_load_roundtrip() {
		let dir = TempDir::new().unwrap();
		let material = CertificateMaterial::generate("203.0.113.7").unwrap();
		material.save(dir.path()).await.unwrap();

		let (cert_path, key_path) = material_paths(dir.path());
		let loaded = CertificateMaterial::load(&cert_path, &key_path)
			.await
			.unwrap();
		assert_eq!(loaded.cert_pem, material.cert_pem);
		assert_eq!(loaded.key_pem, material.key_pem);
	}

	#[tokio::test]
	#[cfg(unix)]
	async fn key_file_is_owner_only() {
		use std::os::unix::fs::PermissionsExt;

		let dir = TempDir::new().unwrap();
		let material = CertificateMaterial::generate("203.0.113.7").unwrap();
		material.save(dir.path()).await.unwrap();

		let metadata = std::fs::metadata(dir.path().join(KEY_FILE)).unwrap();
		assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
	}

	#[tokio::test]
	async fn load_or_create_reuses_existing() {
		let dir = TempDir::new().unwrap();
		let first = load_or_create(dir.path(), "203.0.113.7").await.unwrap();
		let second = load_or_create(dir.path(), "203.0.113.7").await.unwrap();
		assert_eq!(first.cert_pem, second.cert_pem);
	}

	#[test]
	fn pem_to_der_matches_cert_der() {
		let material = CertificateMaterial::generate("203.0.113.7").unwrap();
		let ders = pem_to_der(&material.cert_pem).unwrap();
		assert_eq!(ders.len(), 1);
		assert_eq!(ders[0], material.cert_der().unwrap());
	}
}
