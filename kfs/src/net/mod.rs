//! Network plumbing shared by the gateway.

pub mod tls;
