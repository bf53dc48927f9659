// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! External-address detection and coordinator resolution.

use std::net::{IpAddr, Ipv4Addr};
use tokio::net::lookup_host;
use tracing::debug;
use url::Url;

use crate::{AgentError, AgentResult};

/// The interface IPv4 the host routes external traffic through. No packet
/// is sent; connecting a UDP socket only selects a source address.
pub fn external_ipv4() -> AgentResult<Ipv4Addr> {
	let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
	socket.connect("198.51.100.1:443")?;
	match socket.local_addr()?.ip() {
		IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Ok(ip),
		_ => Err(AgentError::Io(std::io::Error::new(
			std::io::ErrorKind::AddrNotAvailable,
			"are you connected to the network?",
		))),
	}
}

/// Resolve every address of the coordinator named in `server_url`. These
/// are the only peers the control listener will accept.
pub async fn resolve_coordinator_ips(server_url: &str) -> AgentResult<Vec<IpAddr>> {
	let host = Url::parse(server_url)
		.ok()
		.and_then(|u| u.host_str().map(str::to_string))
		.unwrap_or_else(|| server_url.to_string());

	let mut addresses = Vec::new();
	for addr in lookup_host(format!("{host}:0")).await? {
		debug!(host, ip = %addr.ip(), "resolved coordinator address");
		if !addresses.contains(&addr.ip()) {
			addresses.push(addr.ip());
		}
	}
	Ok(addresses)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn resolves_literal_addresses() {
		let ips = resolve_coordinator_ips("https://127.0.0.1:8443")
			.await
			.unwrap();
		assert_eq!(ips, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
	}

	#[tokio::test]
	async fn resolves_bare_hosts() {
		let ips = resolve_coordinator_ips("localhost").await.unwrap();
		assert!(!ips.is_empty());
	}
}
