// =============================================================================
// Instance Lock Manager (C2) — token-scoped mutual exclusion across processes
// =============================================================================
//
// Some external APIs (chat long-poll, single-session trading terminals)
// return a conflict if two processes share credentials. A lock file under
// `locks/` replaces the resulting polling race with a cooperative owner
// election that survives process restart: acquire is a create-or-steal
// against a JSON record, serialized with an OS advisory lock via `fs2` so
// two processes racing on the same file never interleave their writes.
// =============================================================================

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    holder_id: String,
    acquired_at: String,
    heartbeat_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Acquired,
    BusyHolder { holder_id: String, acquired_at: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenewOutcome {
    Ok,
    Lost,
}

pub struct LockManager {
    dir: PathBuf,
    ttl: Duration,
    /// Locks this process currently holds, tracked so the heartbeat task
    /// knows what to renew without the caller threading resource keys
    /// through to it separately.
    held: Mutex<HashMap<String, String>>,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { dir: dir.into(), ttl, held: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn path_for(&self, resource_key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(resource_key.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.dir.join(format!("{digest}.lock"))
    }

    /// Attempt to claim `resource_key` for `holder_id`. Non-blocking: either
    /// returns immediately with the result of a stale-lock takeover or a
    /// busy report naming the current holder.
    pub fn acquire(&self, resource_key: &str, holder_id: &str) -> CoreResult<AcquireOutcome> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(resource_key);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::transient(format!("failed to lock lockfile: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        if !contents.trim().is_empty() {
            if let Ok(existing) = serde_json::from_str::<LockRecord>(&contents) {
                let stale = Self::is_stale(&existing, self.ttl);
                if !stale && existing.holder_id != holder_id {
                    let outcome = AcquireOutcome::BusyHolder {
                        holder_id: existing.holder_id.clone(),
                        acquired_at: existing.acquired_at.clone(),
                    };
                    FileExt::unlock(&file).ok();
                    return Ok(outcome);
                }
                if stale {
                    warn!(resource_key, prior_holder = %existing.holder_id, "reclaiming stale lock");
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        let record = LockRecord {
            holder_id: holder_id.to_string(),
            acquired_at: now.clone(),
            heartbeat_at: now,
        };
        Self::write_record(&mut file, &record)?;
        FileExt::unlock(&file).ok();

        self.held.lock().insert(resource_key.to_string(), holder_id.to_string());
        info!(resource_key, holder_id, "lock acquired");
        Ok(AcquireOutcome::Acquired)
    }

    /// Refresh the heartbeat for a held lock; fails if another holder has
    /// since taken the lock (e.g. after this holder's TTL already lapsed).
    pub fn renew(&self, resource_key: &str, holder_id: &str) -> CoreResult<RenewOutcome> {
        let path = self.path_for(resource_key);
        if !path.exists() {
            return Ok(RenewOutcome::Lost);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::transient(format!("failed to lock lockfile: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let existing: LockRecord = match serde_json::from_str(&contents) {
            Ok(r) => r,
            Err(_) => {
                FileExt::unlock(&file).ok();
                return Ok(RenewOutcome::Lost);
            }
        };

        if existing.holder_id != holder_id {
            FileExt::unlock(&file).ok();
            self.held.lock().remove(resource_key);
            return Ok(RenewOutcome::Lost);
        }

        let record = LockRecord {
            holder_id: holder_id.to_string(),
            acquired_at: existing.acquired_at,
            heartbeat_at: Utc::now().to_rfc3339(),
        };
        Self::write_record(&mut file, &record)?;
        FileExt::unlock(&file).ok();
        Ok(RenewOutcome::Ok)
    }

    /// Renew every lock this process believes it currently holds. Intended
    /// to be called periodically by a background heartbeat task at
    /// `ttl / 3`, so a lock never goes stale under steady operation.
    pub fn renew_all(&self) -> Vec<(String, RenewOutcome)> {
        let resources: Vec<(String, String)> =
            self.held.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut results = Vec::with_capacity(resources.len());
        for (resource_key, holder_id) in resources {
            match self.renew(&resource_key, &holder_id) {
                Ok(outcome) => {
                    if outcome == RenewOutcome::Lost {
                        self.held.lock().remove(&resource_key);
                    }
                    results.push((resource_key, outcome));
                }
                Err(e) => {
                    warn!(resource_key, holder_id, error = %e, "failed to renew held lock");
                }
            }
        }
        results
    }

    /// Release a held lock. Idempotent — releasing a lock you don't hold (or
    /// that doesn't exist) is a no-op.
    pub fn release(&self, resource_key: &str, holder_id: &str) -> CoreResult<()> {
        let path = self.path_for(resource_key);
        if !path.exists() {
            return Ok(());
        }
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::transient(format!("failed to lock lockfile: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        if let Ok(existing) = serde_json::from_str::<LockRecord>(&contents) {
            if existing.holder_id == holder_id {
                drop(file);
                std::fs::remove_file(&path)?;
                self.held.lock().remove(resource_key);
                info!(resource_key, holder_id, "lock released");
                return Ok(());
            }
        }
        FileExt::unlock(&file).ok();
        Ok(())
    }

    /// Remove any lock files whose heartbeat has expired. Intended to be
    /// called periodically by a background reaper task.
    pub fn reap_expired(&self) -> CoreResult<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut reaped = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let contents = std::fs::read_to_string(&path)?;
            if let Ok(record) = serde_json::from_str::<LockRecord>(&contents) {
                if Self::is_stale(&record, self.ttl) {
                    std::fs::remove_file(&path)?;
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }

    fn is_stale(record: &LockRecord, ttl: Duration) -> bool {
        let heartbeat = chrono::DateTime::parse_from_rfc3339(&record.heartbeat_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let age = Utc::now().signed_duration_since(heartbeat);
        age.to_std().unwrap_or(Duration::ZERO) > ttl
    }

    fn write_record(file: &mut File, record: &LockRecord) -> CoreResult<()> {
        let content = serde_json::to_string(record)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_then_reacquire_by_another_holder() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_secs(60));

        assert_eq!(mgr.acquire("telegram:abc", "p1").unwrap(), AcquireOutcome::Acquired);
        mgr.release("telegram:abc", "p1").unwrap();
        assert_eq!(mgr.acquire("telegram:abc", "p2").unwrap(), AcquireOutcome::Acquired);
    }

    #[test]
    fn second_holder_is_denied_while_lock_live() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_secs(60));

        mgr.acquire("telegram:abc", "p1").unwrap();
        let outcome = mgr.acquire("telegram:abc", "p2").unwrap();
        match outcome {
            AcquireOutcome::BusyHolder { holder_id, .. } => assert_eq!(holder_id, "p1"),
            _ => panic!("expected BusyHolder"),
        }
    }

    #[test]
    fn stale_lock_is_reclaimed_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_millis(10));

        mgr.acquire("telegram:abc", "p1").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let outcome = mgr.acquire("telegram:abc", "p2").unwrap();
        assert_eq!(outcome, AcquireOutcome::Acquired);
    }

    #[test]
    fn renew_by_non_holder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_secs(60));
        mgr.acquire("key", "p1").unwrap();
        assert_eq!(mgr.renew("key", "p2").unwrap(), RenewOutcome::Lost);
        assert_eq!(mgr.renew("key", "p1").unwrap(), RenewOutcome::Ok);
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_secs(60));
        mgr.release("never-held", "p1").unwrap();
        mgr.acquire("key", "p1").unwrap();
        mgr.release("key", "p1").unwrap();
        mgr.release("key", "p1").unwrap();
    }

    #[test]
    fn renew_all_refreshes_every_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_millis(50));
        mgr.acquire("a", "p1").unwrap();
        mgr.acquire("b", "p1").unwrap();

        std::thread::sleep(Duration::from_millis(30));
        let results = mgr.renew_all();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, outcome)| *outcome == RenewOutcome::Ok));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(mgr.reap_expired().unwrap(), 0, "renewed locks must not be stale yet");
    }

    #[test]
    fn renew_all_drops_locks_lost_to_another_holder() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_millis(10));
        mgr.acquire("stolen", "p1").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let thief = LockManager::new(dir.path(), Duration::from_millis(10));
        thief.acquire("stolen", "p2").unwrap();

        let results = mgr.renew_all();
        assert_eq!(results, vec![("stolen".to_string(), RenewOutcome::Lost)]);
        assert!(mgr.renew_all().is_empty(), "lost lock should no longer be tracked as held");
    }

    #[test]
    fn reap_expired_removes_only_stale_locks() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path(), Duration::from_millis(10));
        mgr.acquire("stale", "p1").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let fresh_mgr = LockManager::new(dir.path(), Duration::from_secs(60));
        fresh_mgr.acquire("fresh", "p2").unwrap();

        let reaped = mgr.reap_expired().unwrap();
        assert_eq!(reaped, 1);
    }
}
