//! Local account resolution.

use std::path::PathBuf;

use nix::errno::Errno;

/// A resolved OS user, owner of exactly one file server child.
#[derive(Debug, Clone)]
pub struct OsUser {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home_dir: PathBuf,
}

impl OsUser {
    /// Look `login` up in the local user database.
    pub fn lookup(login: &str) -> Result<Option<OsUser>, Errno> {
        Ok(nix::unistd::User::from_name(login)?.map(|user| OsUser {
            username: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home_dir: user.dir,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_root() {
        let root = OsUser::lookup("root").unwrap().unwrap();
        assert_eq!(root.uid, 0);
        assert_eq!(root.username, "root");
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(OsUser::lookup("no-such-user-kfs").unwrap().is_none());
    }
}
