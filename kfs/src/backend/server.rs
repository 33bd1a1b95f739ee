//! One per-user file server child: spawn, handshake, credential
//! refresh, lifetime watchdog and teardown.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{error, info, warn};

use super::error::Error;
use crate::auth::OsUser;
use crate::handshake;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(HOME|USER)\}\}").unwrap());

/// How long a freshly spawned child gets to print its handshake line.
const START_TIMEOUT: Duration = Duration::from_secs(1);

/// Substitute `{{HOME}}` and `{{USER}}` in an exported path.
pub fn expand_route(path: &str, user: &OsUser) -> String {
    PLACEHOLDER
        .replace_all(path, |caps: &regex::Captures| match &caps[1] {
            "HOME" => user.home_dir.display().to_string(),
            _ => user.username.clone(),
        })
        .into_owned()
}

/// Lifetime granted to a child: the delegated ticket's lifetime, capped
/// by `max` when `max` is non-zero.
pub fn chosen_lifetime(ticket: Duration, max: Duration) -> Duration {
    if !max.is_zero() && max < ticket {
        max
    } else {
        ticket
    }
}

struct State {
    /// `host:port` the child is bound to; empty until the handshake.
    listen: String,
    alive: bool,
    /// Current credential cache file. This entry owns it.
    credentials: Option<PathBuf>,
    /// Absolute deadline after which the child is shut down.
    eol: Instant,
    /// Bumped on every start so stale watchdogs can tell they lost.
    generation: u64,
    pid: Option<i32>,
}

/// A www user file server started with the rights of the user.
pub struct UserServer {
    user: OsUser,
    binary: PathBuf,
    max_lifetime: Duration,
    routes: BTreeMap<String, String>,
    state: Mutex<State>,
    /// Serializes start/refresh per user so concurrent requests cannot
    /// spawn two children; losers wait for the winner's handshake.
    start_lock: AsyncMutex<()>,
}

impl UserServer {
    pub fn new(
        user: OsUser,
        binary: PathBuf,
        max_lifetime: Duration,
        routes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            user,
            binary,
            max_lifetime,
            routes,
            state: Mutex::new(State {
                listen: String::new(),
                alive: false,
                credentials: None,
                eol: Instant::now(),
                generation: 0,
                pid: None,
            }),
            start_lock: AsyncMutex::new(()),
        }
    }

    pub(crate) async fn lock_start(&self) -> MutexGuard<'_, ()> {
        self.start_lock.lock().await
    }

    pub fn alive(&self) -> bool {
        self.state.lock().alive
    }

    pub fn listen(&self) -> String {
        self.state.lock().listen.clone()
    }

    pub(crate) fn end_of_life(&self) -> Instant {
        self.state.lock().eol
    }

    /// Record new credentials and push the end of life out. The
    /// previous credential file, if any, is unlinked once the new one
    /// is in place.
    pub fn refresh(&self, credentials: PathBuf, ticket_lifetime: Duration) {
        let lifetime = chosen_lifetime(ticket_lifetime, self.max_lifetime);

        let old = {
            let mut state = self.state.lock();
            state.eol = Instant::now() + lifetime;
            state.credentials.replace(credentials)
        };

        let eol = Local::now()
            + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::zero());
        info!(
            "[{}] set end of life of user file server to {}",
            self.user.username,
            eol.to_rfc3339()
        );

        if let Some(old) = old {
            self.remove_credential_file(&old);
        }
    }

    /// Spawn the child and wait for its handshake.
    pub async fn start(
        self: &Arc<Self>,
        credentials: PathBuf,
        ticket_lifetime: Duration,
    ) -> Result<(), Error> {
        self.refresh(credentials, ticket_lifetime);

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.listen.clear();
            state.generation
        };

        let watchdog = self.clone();
        tokio::spawn(async move { watchdog.run_watchdog(generation).await });

        let args: Vec<String> = self
            .routes
            .iter()
            .map(|(pattern, path)| format!("{}:{}", pattern, expand_route(path, &self.user)))
            .collect();

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        run_as(&mut command, &self.user);

        let mut child = command.spawn().map_err(Error::Start)?;

        let stdout = child.stdout.take().ok_or(Error::NoStdout)?;
        let stderr = child.stderr.take();

        self.state.lock().pid = child.id().map(|pid| pid as i32);

        // Child log lines come out on stderr; relay them with the
        // username prefixed.
        if let Some(stderr) = stderr {
            let username = self.user.username.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!("[{}] {}", username, line);
                }
            });
        }

        let (started_tx, started_rx) = oneshot::channel();

        // Reader and reaper. This task owns the child handle it was
        // spawned with: a restart replaces the registry entry's pid,
        // while this task still reaps the process it started. Waiting
        // on a late-read field would leak a zombie instead.
        let server = self.clone();
        tokio::spawn(async move {
            let mut started_tx = Some(started_tx);
            let mut lines = BufReader::new(stdout).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        info!("[{}] {}", server.user.username, line);

                        if let Some(addr) = handshake::parse(&line) {
                            {
                                let mut state = server.state.lock();
                                state.listen = addr.to_string();
                                state.alive = true;
                            }

                            if let Some(tx) = started_tx.take() {
                                let _ = tx.send(());
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!(
                            "[{}] reading user file server output: {}",
                            server.user.username, err
                        );
                        break;
                    }
                }
            }

            if let Err(err) = child.wait().await {
                error!(
                    "[{}] waiting for user process to complete: {}",
                    server.user.username, err
                );
            }

            server.state.lock().alive = false;
        });

        match timeout(START_TIMEOUT, started_rx).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                self.shutdown();
                Err(Error::StartTimeout)
            }
        }
    }

    /// Stop the child and remove its credentials. Safe to call when the
    /// child has already exited, and safe to call twice.
    pub fn shutdown(&self) {
        let (credentials, pid) = {
            let mut state = self.state.lock();
            state.alive = false;
            (state.credentials.take(), state.pid.take())
        };

        if let Some(path) = credentials {
            self.remove_credential_file(&path);
        }

        if let Some(pid) = pid {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGINT) {
                if err != nix::errno::Errno::ESRCH {
                    warn!(
                        "[{}] interrupting user file server: {}",
                        self.user.username, err
                    );
                }
            }
        }
    }

    async fn run_watchdog(self: Arc<Self>, generation: u64) {
        loop {
            let deadline = self.state.lock().eol;
            sleep_until(deadline).await;

            // A refresh may have pushed the deadline out while we
            // slept; a restart makes this watchdog obsolete entirely.
            let fire = {
                let state = self.state.lock();
                if state.generation != generation {
                    return;
                }
                state.eol <= Instant::now()
            };

            if fire {
                info!("[{}] end of life", self.user.username);
                self.shutdown();
                return;
            }
        }
    }

    fn remove_credential_file(&self, path: &Path) {
        if let Err(err) = std::fs::remove_file(path) {
            error!(
                "[{}] cannot remove {}: {}",
                self.user.username,
                path.display(),
                err
            );
        }
    }
}

/// Make the child run as `user`, keeping supplementary groups from the
/// user database. Skipped when we already are that user (development
/// and tests).
fn run_as(command: &mut Command, user: &OsUser) {
    if nix::unistd::geteuid().as_raw() == user.uid {
        return;
    }

    let uid = user.uid;
    let gid = user.gid;
    let username = CString::new(user.username.as_str()).unwrap_or_default();

    // SAFETY: setgid/initgroups/setuid are async-signal-safe and touch
    // no shared state. Group setup must happen before setuid drops the
    // privilege to do it.
    unsafe {
        command.pre_exec(move || {
            if nix::libc::setgid(gid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if nix::libc::initgroups(username.as_ptr(), gid as _) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if nix::libc::setuid(uid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> OsUser {
        OsUser {
            username: name.to_string(),
            uid: 1000,
            gid: 1000,
            home_dir: PathBuf::from(format!("/home/{}", name)),
        }
    }

    #[test]
    fn test_expand_route() {
        let alice = user("alice");

        assert_eq!(expand_route("{{HOME}}", &alice), "/home/alice");
        assert_eq!(
            expand_route("/scratch/{{USER}}/www", &alice),
            "/scratch/alice/www"
        );
        assert_eq!(
            expand_route("{{HOME}}/public_html/{{USER}}", &alice),
            "/home/alice/public_html/alice"
        );
        assert_eq!(expand_route("/srv/static", &alice), "/srv/static");
    }

    #[test]
    fn test_chosen_lifetime_clamps() {
        let hour = Duration::from_secs(3600);
        let half = Duration::from_secs(1800);

        assert_eq!(chosen_lifetime(hour, half), half);
        assert_eq!(chosen_lifetime(half, hour), half);
        assert_eq!(chosen_lifetime(hour, Duration::ZERO), hour);
    }

    #[test]
    fn test_shutdown_without_child_is_harmless() {
        let server = UserServer::new(
            user("bob"),
            PathBuf::from("/bin/false"),
            Duration::ZERO,
            BTreeMap::new(),
        );

        server.shutdown();
        server.shutdown();
        assert!(!server.alive());
    }
}
