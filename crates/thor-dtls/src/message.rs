// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Control-channel wire grammar.
//!
//! Every payload is a single UTF-8 line. Two-token prefixes carry a value
//! (`key|<wrap>`, `tok|<wrap>`); the bare keywords are state nudges; any
//! other line is free-form and forwarded to the edge hook.

use std::fmt;

/// A parsed control-channel line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
	/// A rotation round is open; request a token.
	Wakeup,
	/// Drop the API key and register again.
	Reregister,
	/// No rotation pending; sleep.
	Standby,
	/// `key|<wrapping-token>`: the response-wrapped device API key.
	Key(String),
	/// `tok|<wrapping-token>`: the response-wrapped delegated token.
	Token(String),
	/// Anything else, forwarded unmodified.
	Other(String),
}

impl ControlMessage {
	/// Parse one trimmed line.
	pub fn parse(line: &str) -> Self {
		match line {
			"wakeup" => ControlMessage::Wakeup,
			"reregister" => ControlMessage::Reregister,
			"standby" => ControlMessage::Standby,
			_ => {
				if let Some(wrap) = line.strip_prefix("key|") {
					ControlMessage::Key(wrap.to_string())
				} else if let Some(wrap) = line.strip_prefix("tok|") {
					ControlMessage::Token(wrap.to_string())
				} else {
					ControlMessage::Other(line.to_string())
				}
			}
		}
	}
}

impl fmt::Display for ControlMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ControlMessage::Wakeup => write!(f, "wakeup"),
			ControlMessage::Reregister => write!(f, "reregister"),
			ControlMessage::Standby => write!(f, "standby"),
			ControlMessage::Key(wrap) => write!(f, "key|{wrap}"),
			ControlMessage::Token(wrap) => write!(f, "tok|{wrap}"),
			ControlMessage::Other(line) => write!(f, "{line}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keywords_parse() {
		assert_eq!(ControlMessage::parse("wakeup"), ControlMessage::Wakeup);
		assert_eq!(ControlMessage::parse("reregister"), ControlMessage::Reregister);
		assert_eq!(ControlMessage::parse("standby"), ControlMessage::Standby);
	}

	#[test]
	fn prefixed_payloads_parse() {
		assert_eq!(
			ControlMessage::parse("key|s.abc123"),
			ControlMessage::Key("s.abc123".to_string())
		);
		assert_eq!(
			ControlMessage::parse("tok|s.def456"),
			ControlMessage::Token("s.def456".to_string())
		);
		// An empty wrap is still the prefixed form.
		assert_eq!(ControlMessage::parse("key|"), ControlMessage::Key(String::new()));
	}

	#[test]
	fn free_form_lines_pass_through() {
		assert_eq!(
			ControlMessage::parse("hello agent"),
			ControlMessage::Other("hello agent".to_string())
		);
		assert_eq!(
			ControlMessage::parse("wakeup now"),
			ControlMessage::Other("wakeup now".to_string())
		);
	}

	#[test]
	fn display_roundtrip() {
		for line in ["wakeup", "reregister", "standby", "key|abc", "tok|def", "misc"] {
			assert_eq!(ControlMessage::parse(line).to_string(), line);
		}
	}
}
