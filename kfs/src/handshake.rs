//! Startup handshake between the gateway and a user file server.
//!
//! A freshly spawned `kfs-user` process announces its kernel-chosen
//! listen address by printing exactly one line to standard output after
//! a successful bind, before serving any request. The parent scans the
//! child's stdout for that line.

use once_cell::sync::Lazy;
use regex::Regex;

static LISTEN_LINE: Lazy<Regex> = Lazy::new(|| Regex::new("start listening on (.*)$").unwrap());

/// The line a child prints once its listener is bound.
pub fn announce(addr: &str) -> String {
    format!("start listening on {}", addr)
}

/// Extract the listen address from a line of child output, if the line
/// is the handshake.
pub fn parse(line: &str) -> Option<&str> {
    LISTEN_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|addr| !addr.is_empty())
}
