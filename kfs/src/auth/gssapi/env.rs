//! Process-default credential cache selection.

use std::env;
use std::path::Path;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};

static CCACHE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Points `KRB5CCNAME` at one cache file while held, and restores the
/// prior selection on drop.
///
/// The MIT library resolves the default cache from the process
/// environment, so any operation targeting a specific cache file (a
/// kinit acquire, a credential store) holds this guard for its whole
/// duration; the global lock keeps two requests from clobbering each
/// other's selection.
pub struct DefaultCcache {
    _lock: MutexGuard<'static, ()>,
    previous: Option<String>,
}

impl DefaultCcache {
    /// Select `cache` as the process-default credential cache.
    pub fn select(cache: &Path) -> Self {
        let lock = CCACHE_LOCK.lock();
        let previous = env::var("KRB5CCNAME").ok();

        env::set_var("KRB5CCNAME", format!("FILE:{}", cache.display()));

        Self {
            _lock: lock,
            previous,
        }
    }
}

impl Drop for DefaultCcache {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => env::set_var("KRB5CCNAME", value),
            None => env::remove_var("KRB5CCNAME"),
        }
    }
}
