//! Per-workspace working directory locks.
//!
//! A lock covers one (repo, pull number, workspace) triple for the lifetime
//! of the returned guard. Dropping the guard releases it, so a panicking
//! runner cannot leave a workspace locked.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Shared registry of held workspace locks. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct WorkingDirLocker {
    held: Arc<Mutex<HashSet<String>>>,
}

fn lock_key(repo_full_name: &str, pull_num: u64, workspace: &str) -> String {
    format!("{}/{}/{}", repo_full_name, pull_num, workspace)
}

impl WorkingDirLocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        // A poisoned set is still consistent: inserts and removes are atomic.
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire the lock for a workspace or fail immediately if another
    /// request already holds it.
    pub fn try_lock(
        &self,
        repo_full_name: &str,
        pull_num: u64,
        workspace: &str,
    ) -> Result<WorkingDirLock> {
        let key = lock_key(repo_full_name, pull_num, workspace);
        if !self.held().insert(key.clone()) {
            tracing::debug!(lock = %key, "workspace already locked");
            return Err(Error::workdir_locked(repo_full_name, pull_num, workspace));
        }

        tracing::debug!(lock = %key, "acquired workspace lock");
        Ok(WorkingDirLock {
            locker: self.clone(),
            key,
            released: false,
        })
    }

    pub fn is_locked(&self, repo_full_name: &str, pull_num: u64, workspace: &str) -> bool {
        self.held()
            .contains(&lock_key(repo_full_name, pull_num, workspace))
    }
}

/// Held workspace lock. Released on drop or by `release`.
#[derive(Debug)]
pub struct WorkingDirLock {
    locker: WorkingDirLocker,
    key: String,
    released: bool,
}

impl WorkingDirLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.locker.held().remove(&self.key);
        tracing::debug!(lock = %self.key, "released workspace lock");
    }
}

impl Drop for WorkingDirLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_workspace_fails() {
        let locker = WorkingDirLocker::new();
        let held = locker.try_lock("owner/repo", 1, "default").unwrap();
        assert_eq!(held.key(), "owner/repo/1/default");

        let err = locker.try_lock("owner/repo", 1, "default").unwrap_err();
        assert_eq!(err.code.as_str(), "workdir.locked");
        assert_eq!(err.retryable, Some(true));
    }

    #[test]
    fn different_workspaces_lock_independently() {
        let locker = WorkingDirLocker::new();
        let _a = locker.try_lock("owner/repo", 1, "default").unwrap();
        let _b = locker.try_lock("owner/repo", 1, "staging").unwrap();
        let _c = locker.try_lock("owner/repo", 2, "default").unwrap();
        assert!(locker.is_locked("owner/repo", 1, "staging"));
    }

    #[test]
    fn release_and_drop_free_the_workspace() {
        let locker = WorkingDirLocker::new();
        locker.try_lock("owner/repo", 1, "default").unwrap().release();
        assert!(!locker.is_locked("owner/repo", 1, "default"));

        {
            let _held = locker.try_lock("owner/repo", 1, "default").unwrap();
            assert!(locker.is_locked("owner/repo", 1, "default"));
        }
        assert!(!locker.is_locked("owner/repo", 1, "default"));
    }

    #[test]
    fn lock_is_released_when_holder_panics() {
        let locker = WorkingDirLocker::new();
        let clone = locker.clone();
        let joined = std::thread::spawn(move || {
            let _held = clone.try_lock("owner/repo", 7, "default").unwrap();
            panic!("runner blew up");
        })
        .join();
        assert!(joined.is_err());
        assert!(locker.try_lock("owner/repo", 7, "default").is_ok());
    }
}
