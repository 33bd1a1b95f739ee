//! Kerberos-authenticating HTTP gateway.
//!
//! The `kfs` binary terminates TLS, authenticates every request with
//! SPNEGO (falling back to HTTP Basic for password logins), stores the
//! delegated Kerberos ticket in a per-request credential cache and
//! proxies the request to a `kfs-user` child process running as the
//! authenticated POSIX user. The child only ever serves files below its
//! configured export roots.

pub mod auth;
pub mod backend;
pub mod cli;
pub mod config;
pub mod fileserver;
pub mod frontend;
pub mod handshake;
pub mod net;
pub mod util;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Initialize logging. Safe to call more than once.
///
/// Logs go to stderr: standard output belongs to the startup handshake
/// in the child process.
pub fn logger() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
}
