//! What's a project without a util module.

use rand::{distr::Alphanumeric, Rng};

/// Generate a random string of length n.
pub fn random_string(n: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

/// Turn a Go-style listen address into something `TcpListener::bind`
/// accepts: `:8080` means all interfaces, a trailing bare colon means a
/// kernel-chosen port.
pub fn normalize_listen(addr: &str) -> String {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };

    if addr.ends_with(':') {
        format!("{}0", addr)
    } else {
        addr
    }
}
