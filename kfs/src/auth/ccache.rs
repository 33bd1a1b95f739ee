//! Per-request Kerberos credential cache files.
//!
//! A delegated credential is written to `/tmp/krb5cc_<uid>_<suffix>`,
//! owned by the target user with mode 0600. The suffix only has to make
//! collisions with a previous file negligible; the file's security
//! rests on its owner and mode.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use nix::unistd::{chown, Gid, Uid};

use super::error::Error;
use super::gssapi::Delegated;
use super::user::OsUser;
use crate::util::random_string;

/// Pick a fresh cache filename for `uid`.
pub fn ccache_path(uid: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/krb5cc_{}_{}", uid, random_string(10)))
}

/// Store `delegated` in a new cache file owned by `user`, mode 0600.
/// Returns the path; the caller (the supervisor entry, eventually) owns
/// the file from here on.
pub fn save(user: &OsUser, delegated: &Delegated) -> Result<PathBuf, Error> {
    let path = ccache_path(user.uid);

    delegated.store(&path)?;

    chown(
        path.as_path(),
        Some(Uid::from_raw(user.uid)),
        Some(Gid::from_raw(user.gid)),
    )
    .map_err(Error::Chown)?;

    std::fs::set_permissions(&path, Permissions::from_mode(0o600))?;

    Ok(path)
}
