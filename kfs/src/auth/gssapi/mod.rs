//! GSSAPI/SPNEGO bindings for the gateway.
//!
//! The real implementation wraps `libgssapi` and is compiled behind the
//! `gssapi` feature; without it every entry point reports
//! [`Error::Unsupported`] so the crate builds and tests on machines
//! without MIT krb5.

pub mod env;
pub mod error;
pub mod server;

pub use env::DefaultCcache;
pub use error::{Error, Result};
pub use server::SpnegoServer;

use std::path::Path;
#[cfg(feature = "gssapi")]
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "gssapi")]
use libgssapi::credential::Cred;

/// Outcome of one SPNEGO `accept` round.
pub enum Negotiation {
    /// Context established; the client principal is authenticated. The
    /// response token, if any, goes back in `WWW-Authenticate`.
    Complete {
        principal: String,
        response: Option<Vec<u8>>,
        delegated: Delegated,
    },

    /// The mechanism wants another round trip.
    Continue { response: Vec<u8> },
}

/// A credential the client delegated to us, or proof of a password
/// login. Opaque to everything outside this module: it can report its
/// remaining lifetime and be written to a credential cache file, after
/// which the in-process handle is dropped.
pub enum Delegated {
    /// The client did not forward a ticket.
    None,

    /// Credential extracted from the SPNEGO context.
    #[cfg(feature = "gssapi")]
    Spnego(Cred),

    /// Initial ticket obtained by password login, already materialized
    /// in a private credential cache.
    #[cfg(feature = "gssapi")]
    Cache { path: PathBuf, cred: Cred },
}

#[cfg(feature = "gssapi")]
impl Delegated {
    /// Zero-valued handles mean "no delegation".
    pub fn is_none(&self) -> bool {
        matches!(self, Delegated::None)
    }

    /// Remaining lifetime of the delegated ticket.
    pub fn lifetime(&self) -> Result<Duration> {
        match self {
            Delegated::None => Err(Error::NoCredential),

            Delegated::Spnego(cred) | Delegated::Cache { cred, .. } => {
                let seconds = cred.lifetime()?;
                Ok(Duration::from_secs(seconds as u64))
            }
        }
    }

    /// Write the credential to a cache file at `path`.
    pub fn store(&self, path: &Path) -> Result<()> {
        match self {
            Delegated::None => Err(Error::NoCredential),

            Delegated::Spnego(cred) => store_into_ccache(cred, path),

            Delegated::Cache { path: cache, .. } => {
                std::fs::copy(cache, path)?;
                Ok(())
            }
        }
    }
}

#[cfg(not(feature = "gssapi"))]
impl Delegated {
    /// Zero-valued handles mean "no delegation".
    pub fn is_none(&self) -> bool {
        true
    }

    /// Remaining lifetime of the delegated ticket (mock).
    pub fn lifetime(&self) -> Result<Duration> {
        Err(Error::Unsupported)
    }

    /// Write the credential to a cache file at `path` (mock).
    pub fn store(&self, _path: &Path) -> Result<()> {
        Err(Error::Unsupported)
    }
}

impl Drop for Delegated {
    fn drop(&mut self) {
        #[cfg(feature = "gssapi")]
        if let Delegated::Cache { path, .. } = self {
            if let Err(err) = std::fs::remove_file(path.as_path()) {
                tracing::debug!("removing login cache {}: {}", path.display(), err);
            }
        }
    }
}

/// Store a GSSAPI credential into the cache file at `path`.
///
/// `libgssapi` does not wrap `gss_store_cred`, so this calls the raw
/// binding with the default cache selected as the target file for the
/// duration.
#[cfg(feature = "gssapi")]
fn store_into_ccache(cred: &Cred, path: &Path) -> Result<()> {
    use libgssapi_sys::{gss_cred_id_t, gss_cred_usage_t, gss_store_cred, OM_uint32};

    let _default = DefaultCcache::select(path);

    let raw: gss_cred_id_t = **cred;
    let mut minor: OM_uint32 = 0;

    let major = unsafe {
        gss_store_cred(
            &mut minor as *mut OM_uint32,
            raw,
            1 as gss_cred_usage_t, // GSS_C_INITIATE
            std::ptr::null_mut(),  // any mechanism
            1,                     // overwrite
            1,                     // make default in the cache
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };

    if major != 0 {
        return Err(Error::Store(format!(
            "gss_store_cred: major {} minor {}",
            major, minor
        )));
    }

    Ok(())
}
