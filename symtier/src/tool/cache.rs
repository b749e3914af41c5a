//! Cache of live tool processes, keyed by `(image path, debuggee pid)`.
//!
//! The table lock covers only lookup, insertion, and eviction. Each entry
//! carries its own lock: one tool cannot serve interleaved queries over a
//! single pipe pair, so queries against the same target serialize on the
//! entry while queries against other targets run in parallel.

use crate::config::ToolSpec;
use crate::domain::{Pid, SpawnError};
use crate::tool::process::ToolProcess;
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

type Key = (PathBuf, Pid);

/// Shared handle to one cached tool process.
pub type CachedTool = Arc<Mutex<ToolProcess>>;

#[derive(Default)]
pub struct ProcessCache {
    table: Mutex<HashMap<Key, CachedTool>>,
}

impl ProcessCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the live entry for `(image, pid)`, spawning one on a miss.
    ///
    /// Spawning happens outside the table lock so a slow tool startup never
    /// stalls lookups for other targets. When two threads race to fill the
    /// same slot, the loser's process is shut down by its own `Drop` and
    /// the winner's entry is returned to both.
    ///
    /// # Errors
    ///
    /// Propagates the spawn failure on a miss that cannot be filled.
    pub fn get_or_spawn(
        &self,
        spec: &ToolSpec,
        image: &Path,
        pid: Pid,
    ) -> Result<CachedTool, SpawnError> {
        let key = (image.to_path_buf(), pid);
        if let Some(entry) = self.lock_table().get(&key) {
            return Ok(Arc::clone(entry));
        }

        let fresh = Arc::new(Mutex::new(ToolProcess::spawn(spec, image, pid)?));

        let mut table = self.lock_table();
        if let Some(existing) = table.get(&key) {
            debug!(
                "lost a spawn race for {}; discarding the duplicate tool",
                image.display()
            );
            return Ok(Arc::clone(existing));
        }
        table.insert(key, Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Remove a dead entry, unless the slot has already been refilled.
    ///
    /// Compared by identity so that evicting through a stale handle cannot
    /// tear down a replacement some other thread spawned in the meantime.
    pub fn evict(&self, image: &Path, pid: Pid, stale: &CachedTool) {
        let key = (image.to_path_buf(), pid);
        let mut table = self.lock_table();
        if table
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, stale))
        {
            table.remove(&key);
            info!(
                "evicted dead symbolizer tool for {} (debuggee {pid})",
                image.display()
            );
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_table().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_table().is_empty()
    }

    /// Tear down every cached process.
    ///
    /// Entries currently borrowed by an in-flight query are skipped here;
    /// their shutdown runs via `Drop` when the borrow ends. Nothing blocks
    /// on them.
    pub fn shutdown_all(&self) {
        let entries: Vec<CachedTool> = {
            let mut table = self.lock_table();
            table.drain().map(|(_, entry)| entry).collect()
        };

        for entry in entries {
            match entry.try_lock() {
                Ok(mut process) => process.shutdown(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().shutdown(),
                Err(TryLockError::WouldBlock) => {
                    debug!("symbolizer tool busy at shutdown; its Drop will finish the job");
                }
            }
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<Key, CachedTool>> {
        // A poisoned table only means some thread panicked mid-lookup;
        // symbolization keeps limping along regardless.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cat_spec() -> ToolSpec {
        let mut spec = ToolSpec::new("/bin/cat");
        spec.timeout = Duration::from_millis(200);
        spec
    }

    #[test]
    fn test_same_target_shares_one_entry() {
        let cache = ProcessCache::new();
        let spec = cat_spec();
        let a = cache
            .get_or_spawn(&spec, Path::new("/bin/ls"), Pid(1))
            .expect("spawn cat");
        let b = cache
            .get_or_spawn(&spec, Path::new("/bin/ls"), Pid(1))
            .expect("second lookup");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        cache.shutdown_all();
    }

    #[test]
    fn test_distinct_targets_get_distinct_entries() {
        let cache = ProcessCache::new();
        let spec = cat_spec();
        let a = cache
            .get_or_spawn(&spec, Path::new("/bin/ls"), Pid(1))
            .expect("spawn for pid 1");
        let b = cache
            .get_or_spawn(&spec, Path::new("/bin/ls"), Pid(2))
            .expect("spawn for pid 2");
        assert!(!Arc::ptr_eq(&a, &b));
        let pid_a = a.lock().unwrap().tool_pid();
        let pid_b = b.lock().unwrap().tool_pid();
        assert_ne!(pid_a, pid_b);
        assert_eq!(cache.len(), 2);
        cache.shutdown_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_removes_current_entry() {
        let cache = ProcessCache::new();
        let spec = cat_spec();
        let entry = cache
            .get_or_spawn(&spec, Path::new("/bin/ls"), Pid(7))
            .expect("spawn");
        cache.evict(Path::new("/bin/ls"), Pid(7), &entry);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_with_stale_handle_spares_replacement() {
        let cache = ProcessCache::new();
        let spec = cat_spec();
        let stale = cache
            .get_or_spawn(&spec, Path::new("/bin/ls"), Pid(7))
            .expect("first spawn");
        cache.evict(Path::new("/bin/ls"), Pid(7), &stale);

        let replacement = cache
            .get_or_spawn(&spec, Path::new("/bin/ls"), Pid(7))
            .expect("respawn");
        // A second eviction through the old handle must not touch the
        // freshly spawned replacement.
        cache.evict(Path::new("/bin/ls"), Pid(7), &stale);
        assert_eq!(cache.len(), 1);

        cache.evict(Path::new("/bin/ls"), Pid(7), &replacement);
        assert!(cache.is_empty());
    }
}
