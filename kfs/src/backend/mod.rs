//! Supervision of per-user file server children.

pub mod error;
pub mod server;

pub use error::Error;
pub use server::{chosen_lifetime, expand_route, UserServer};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::auth::OsUser;

/// Registry of live per-user file servers. Sole owner of child process
/// handles and of live credential cache files.
pub struct Supervisor {
    binary: PathBuf,
    max_lifetime: Duration,
    routes: BTreeMap<String, String>,
    servers: Mutex<HashMap<String, Arc<UserServer>>>,
}

impl Supervisor {
    pub fn new(
        binary: PathBuf,
        max_lifetime: Duration,
        routes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            binary,
            max_lifetime,
            routes,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure a live file server exists for `user` and hand it the
    /// new credential file. Returns the child's listen address.
    pub async fn ensure(
        &self,
        user: &OsUser,
        credentials: PathBuf,
        ticket_lifetime: Duration,
    ) -> Result<String, Error> {
        let server = {
            let mut servers = self.servers.lock();
            servers
                .entry(user.username.clone())
                .or_insert_with(|| {
                    Arc::new(UserServer::new(
                        user.clone(),
                        self.binary.clone(),
                        self.max_lifetime,
                        self.routes.clone(),
                    ))
                })
                .clone()
        };

        let _start = server.lock_start().await;

        if server.alive() {
            server.refresh(credentials, ticket_lifetime);
        } else {
            server.start(credentials, ticket_lifetime).await?;
        }

        Ok(server.listen())
    }

    /// Best-effort interrupt to every child. Idempotent.
    pub fn shutdown_all(&self) {
        let servers: Vec<_> = self.servers.lock().values().cloned().collect();

        for server in servers {
            server.shutdown();
        }
    }

    pub(crate) fn get(&self, username: &str) -> Option<Arc<UserServer>> {
        self.servers.lock().get(username).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;
    use tokio::time::sleep;

    fn fake_child(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-kfs-user");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn current_user() -> OsUser {
        OsUser {
            username: "itself".to_string(),
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
            home_dir: PathBuf::from("/tmp"),
        }
    }

    fn routes() -> BTreeMap<String, String> {
        let mut routes = BTreeMap::new();
        routes.insert("/".to_string(), "{{HOME}}".to_string());
        routes
    }

    fn credentials(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"ticket").unwrap();
        path
    }

    #[tokio::test]
    async fn test_start_refresh_and_shutdown() {
        crate::logger();
        let dir = tempdir().unwrap();
        let binary = fake_child(
            dir.path(),
            "echo \"start listening on 127.0.0.1:45678\"\nexec sleep 30",
        );

        let supervisor = Supervisor::new(binary, Duration::from_secs(1800), routes());
        let user = current_user();
        let hour = Duration::from_secs(3600);

        let first = credentials(dir.path(), "cc1");
        let listen = supervisor
            .ensure(&user, first.clone(), hour)
            .await
            .unwrap();
        assert_eq!(listen, "127.0.0.1:45678");

        let entry = supervisor.get(&user.username).unwrap();
        assert!(entry.alive());

        // Lifetime is clamped by max_lifetime.
        let remaining = entry.end_of_life() - tokio::time::Instant::now();
        assert!(remaining <= Duration::from_secs(1800));
        assert!(remaining > Duration::from_secs(1700));

        let first_eol = entry.end_of_life();

        // Second request: same child, fresh credentials, deadline moves
        // forward, old cache file is gone.
        let second = credentials(dir.path(), "cc2");
        let listen_again = supervisor
            .ensure(&user, second.clone(), hour)
            .await
            .unwrap();
        assert_eq!(listen_again, listen);
        assert!(entry.end_of_life() >= first_eol);
        assert!(!first.exists());
        assert!(second.exists());

        supervisor.shutdown_all();
        assert!(!entry.alive());
        assert!(!second.exists());

        // Idempotent.
        supervisor.shutdown_all();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        crate::logger();
        let dir = tempdir().unwrap();
        let binary = fake_child(dir.path(), "exec sleep 30");

        let supervisor = Supervisor::new(binary, Duration::ZERO, routes());
        let user = current_user();

        let cache = credentials(dir.path(), "cc");
        let result = supervisor
            .ensure(&user, cache.clone(), Duration::from_secs(3600))
            .await;

        assert!(matches!(result, Err(Error::StartTimeout)));

        let entry = supervisor.get(&user.username).unwrap();
        assert!(!entry.alive());
        assert!(!cache.exists());
    }

    #[tokio::test]
    async fn test_restart_after_exit() {
        crate::logger();
        let dir = tempdir().unwrap();
        // Child exits right after the handshake.
        let binary = fake_child(dir.path(), "echo \"start listening on 127.0.0.1:1\"");

        let supervisor = Supervisor::new(binary, Duration::ZERO, routes());
        let user = current_user();
        let hour = Duration::from_secs(3600);

        supervisor
            .ensure(&user, credentials(dir.path(), "cc1"), hour)
            .await
            .unwrap();

        let entry = supervisor.get(&user.username).unwrap();

        // Wait for the reaper to observe the exit.
        for _ in 0..50 {
            if !entry.alive() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(!entry.alive());

        // The next request restarts rather than refreshing a corpse.
        supervisor
            .ensure(&user, credentials(dir.path(), "cc2"), hour)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_of_life_fires() {
        crate::logger();
        let dir = tempdir().unwrap();
        let binary = fake_child(
            dir.path(),
            "echo \"start listening on 127.0.0.1:45678\"\nexec sleep 30",
        );

        let supervisor = Supervisor::new(binary, Duration::from_secs(1), routes());
        let user = current_user();

        let cache = credentials(dir.path(), "cc");
        supervisor
            .ensure(&user, cache.clone(), Duration::from_secs(3600))
            .await
            .unwrap();

        let entry = supervisor.get(&user.username).unwrap();
        assert!(entry.alive());

        sleep(Duration::from_millis(1500)).await;

        assert!(!entry.alive());
        assert!(!cache.exists());
    }
}
