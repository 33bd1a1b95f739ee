//! Server-side SPNEGO handler and password logins.

use std::path::Path;

use super::error::{Error, Result};
use super::{Delegated, Negotiation};

#[cfg(feature = "gssapi")]
use std::process::Stdio;
#[cfg(feature = "gssapi")]
use std::sync::Arc;
#[cfg(feature = "gssapi")]
use std::time::Duration;

#[cfg(feature = "gssapi")]
use libgssapi::{
    context::{SecurityContext, ServerCtx},
    credential::{Cred, CredUsage},
    name::Name,
    oid::{OidSet, GSS_MECH_KRB5, GSS_NT_KRB5_PRINCIPAL},
};
#[cfg(feature = "gssapi")]
use tokio::io::AsyncWriteExt;
#[cfg(feature = "gssapi")]
use tokio::time::timeout;
#[cfg(feature = "gssapi")]
use tracing::debug;

#[cfg(feature = "gssapi")]
use super::DefaultCcache;
#[cfg(feature = "gssapi")]
use crate::util::random_string;

/// Accepts SPNEGO tokens on behalf of the configured service principal.
#[cfg(feature = "gssapi")]
pub struct SpnegoServer {
    credential: Arc<Cred>,
}

/// Mock for builds without the `gssapi` feature.
#[cfg(not(feature = "gssapi"))]
pub struct SpnegoServer;

#[cfg(feature = "gssapi")]
impl SpnegoServer {
    /// Acquire the acceptor credential for `service_name` from the
    /// keytab. Called once at startup.
    pub fn new(keytab: &Path, service_name: &str) -> Result<Self> {
        if !keytab.exists() {
            return Err(Error::KeytabNotFound(keytab.to_path_buf()));
        }

        std::env::set_var("KRB5_KTNAME", keytab);

        let name = Name::new(service_name.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))
            .map_err(|e| Error::InvalidPrincipal(format!("{}: {}", service_name, e)))?;

        let mechs = krb5_mechs()?;

        let credential = Cred::acquire(Some(&name), None, CredUsage::Accept, Some(&mechs))
            .map_err(|e| {
                Error::CredentialAcquisitionFailed(format!(
                    "failed to acquire credentials for {}: {}",
                    service_name, e
                ))
            })?;

        Ok(Self {
            credential: Arc::new(credential),
        })
    }

    /// Run one SPNEGO round with a client token. Each HTTP request gets
    /// a fresh context: requests re-authenticate individually.
    pub fn accept(&self, token: &[u8]) -> Result<Negotiation> {
        let mut ctx = ServerCtx::new(Some(self.credential.as_ref().clone()));

        let response = match ctx.step(token) {
            Ok(Some(response)) => Some(response.to_vec()),
            Ok(None) => None,
            Err(e) => {
                return Err(Error::Context(format!("SPNEGO negotiation failed: {}", e)))
            }
        };

        if !ctx.is_complete() {
            return Ok(Negotiation::Continue {
                response: response.unwrap_or_default(),
            });
        }

        let principal = ctx
            .source_name()
            .map_err(|e| Error::Context(format!("no client principal: {}", e)))?
            .to_string();

        let delegated = match ctx.take_delegated_cred() {
            Some(cred) => Delegated::Spnego(cred),
            None => Delegated::None,
        };

        Ok(Negotiation::Complete {
            principal,
            response,
            delegated,
        })
    }

    /// Authenticate `principal` with a password by obtaining an initial
    /// forwardable ticket into a private cache, then acquiring the
    /// credential handle from it.
    pub async fn password_login(&self, principal: &str, password: &str) -> Result<Delegated> {
        let cache = format!("/tmp/krb5cc_kfs_{}", random_string(10));

        let mut command = tokio::process::Command::new("kinit");
        command
            .arg("-f")
            .arg(principal)
            .env("KRB5CCNAME", format!("FILE:{}", cache))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(password.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = timeout(Duration::from_secs(5), child.wait_with_output())
            .await
            .map_err(|_| Error::PasswordAuth(format!("{} (kinit timed out)", principal)))??;

        if !output.status.success() {
            debug!(
                "kinit for {}: {}",
                principal,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            let _ = std::fs::remove_file(&cache);
            return Err(Error::PasswordAuth(principal.to_string()));
        }

        let name = Name::new(principal.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))
            .map_err(|e| Error::InvalidPrincipal(format!("{}: {}", principal, e)))?;
        let mechs = krb5_mechs()?;

        // Acquire from the cache kinit just populated.
        let cred = {
            let _default = DefaultCcache::select(Path::new(&cache));

            Cred::acquire(Some(&name), None, CredUsage::Initiate, Some(&mechs)).map_err(|e| {
                Error::CredentialAcquisitionFailed(format!(
                    "failed to acquire from cache for {}: {}",
                    principal, e
                ))
            })?
        };

        Ok(Delegated::Cache {
            path: cache.into(),
            cred,
        })
    }
}

#[cfg(feature = "gssapi")]
fn krb5_mechs() -> Result<OidSet> {
    let mut mechs = OidSet::new()
        .map_err(|e| Error::Context(format!("failed to create OidSet: {}", e)))?;
    mechs
        .add(&GSS_MECH_KRB5)
        .map_err(|e| Error::Context(format!("failed to add mechanism: {}", e)))?;

    Ok(mechs)
}

#[cfg(not(feature = "gssapi"))]
impl SpnegoServer {
    pub fn new(_keytab: &Path, _service_name: &str) -> Result<Self> {
        Err(Error::Unsupported)
    }

    pub fn accept(&self, _token: &[u8]) -> Result<Negotiation> {
        Err(Error::Unsupported)
    }

    pub async fn password_login(&self, _principal: &str, _password: &str) -> Result<Delegated> {
        Err(Error::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_without_keytab() {
        // Fails without a real keytab, or when the feature is disabled.
        let result = SpnegoServer::new(
            Path::new("/nonexistent/krb5.keytab"),
            "HTTP/www.example.org@EXAMPLE.ORG",
        );
        assert!(result.is_err());
    }
}
