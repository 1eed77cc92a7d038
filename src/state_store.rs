// =============================================================================
// State Store (C1) — atomic persistence for positions, audit log, params
// =============================================================================
//
// Positions are snapshotted as a single JSON document using the same
// tmp-write + fsync + rename discipline the runtime config uses. The audit
// log and learnings journal (see `learning_store.rs`) are append-only
// line-delimited JSON so a torn write only ever costs the last record, never
// the whole file.
// =============================================================================

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::trade_engine::{Position, TradeIntent};

/// One entry in the append-only audit journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Durable state for positions, an append-only audit trail, and key/value
/// tunable params, all rooted under one directory.
pub struct StateStore {
    root: PathBuf,
    positions: RwLock<HashMap<String, Position>>,
    pending_intents: RwLock<HashMap<String, TradeIntent>>,
    params: RwLock<HashMap<String, Value>>,
    audit_seq: AtomicU64,
    audit_file: Mutex<File>,
}

const POSITIONS_VERSION: u32 = 1;

impl StateStore {
    /// Open (creating if necessary) a state store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join("locks"))?;

        let positions = Self::load_positions(&root)?;
        let pending_intents = Self::load_pending_intents(&root)?;
        let params = Self::load_params(&root)?;

        let audit_path = root.join("audit.log");
        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)?;
        let audit_seq = Self::last_audit_seq(&audit_path)?;

        info!(
            root = %root.display(),
            positions = positions.len(),
            pending_intents = pending_intents.len(),
            params = params.len(),
            audit_seq,
            "state store opened"
        );

        Ok(Self {
            root,
            positions: RwLock::new(positions),
            pending_intents: RwLock::new(pending_intents),
            params: RwLock::new(params),
            audit_seq: AtomicU64::new(audit_seq),
            audit_file: Mutex::new(audit_file),
        })
    }

    fn positions_path(root: &Path) -> PathBuf {
        root.join(format!("positions.v{POSITIONS_VERSION}.json"))
    }

    fn positions_tmp_path(root: &Path) -> PathBuf {
        root.join("positions.tmp")
    }

    /// Load positions, preferring the live file over a leftover `.tmp`, but
    /// recovering from the `.tmp` if the live file is absent (crash right
    /// after write, before rename completed... on POSIX rename is atomic, so
    /// this guards against a crash between write and the prior run's rename).
    fn load_positions(root: &Path) -> CoreResult<HashMap<String, Position>> {
        let live = Self::positions_path(root);
        let tmp = Self::positions_tmp_path(root);

        let source = if live.exists() {
            if tmp.exists() {
                let _ = std::fs::remove_file(&tmp);
            }
            live
        } else if tmp.exists() {
            warn!(path = %tmp.display(), "recovering positions from leftover tmp file");
            tmp
        } else {
            return Ok(HashMap::new());
        };

        let content = std::fs::read_to_string(&source)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let positions: Vec<Position> = serde_json::from_str(&content).map_err(|e| {
            CoreError::persistence(format!("corrupt positions file {}: {e}", source.display()))
        })?;
        Ok(positions.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    fn pending_intents_path(root: &Path) -> PathBuf {
        root.join("pending_intents.json")
    }

    /// Pending intents left over from a prior run: recorded before external
    /// execution, so their presence on restart means the fill outcome for
    /// that intent is unknown and must be reconciled against the venue.
    fn load_pending_intents(root: &Path) -> CoreResult<HashMap<String, TradeIntent>> {
        let path = Self::pending_intents_path(root);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let intents: Vec<TradeIntent> = serde_json::from_str(&content).map_err(|e| {
            CoreError::persistence(format!("corrupt pending intents file {}: {e}", path.display()))
        })?;
        Ok(intents.into_iter().map(|i| (i.intent_id.clone(), i)).collect())
    }

    fn save_pending_intents(&self, intents: &HashMap<String, TradeIntent>) -> CoreResult<()> {
        let snapshot: Vec<&TradeIntent> = intents.values().collect();
        let content = serde_json::to_string_pretty(&snapshot)?;
        let path = Self::pending_intents_path(&self.root);
        let tmp = self.root.join("pending_intents.json.tmp");
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Record that external execution is about to be attempted for `intent`,
    /// before the venue call is made. Cleared by `remove_pending_intent`
    /// once the outcome (fill or failure) is known and persisted.
    pub fn put_pending_intent(&self, intent: TradeIntent) -> CoreResult<()> {
        let mut guard = self.pending_intents.write();
        guard.insert(intent.intent_id.clone(), intent);
        self.save_pending_intents(&guard)
    }

    pub fn remove_pending_intent(&self, intent_id: &str) -> CoreResult<()> {
        let mut guard = self.pending_intents.write();
        if guard.remove(intent_id).is_some() {
            self.save_pending_intents(&guard)?;
        }
        Ok(())
    }

    pub fn list_pending_intents(&self) -> Vec<TradeIntent> {
        self.pending_intents.read().values().cloned().collect()
    }

    fn load_params(root: &Path) -> CoreResult<HashMap<String, Value>> {
        let path = root.join("params.json");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn last_audit_seq(path: &Path) -> CoreResult<u64> {
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut last = 0u64;
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                // A truncated trailing record is tolerated, not fatal.
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => last = entry.seq,
                Err(_) => break,
            }
        }
        Ok(last)
    }

    // -------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------

    /// Atomically persist the full set of positions to disk.
    pub fn save_positions(&self, positions: &HashMap<String, Position>) -> CoreResult<()> {
        let snapshot: Vec<&Position> = positions.values().collect();
        let content = serde_json::to_string_pretty(&snapshot)?;

        let live = Self::positions_path(&self.root);
        let tmp = Self::positions_tmp_path(&self.root);

        std::fs::write(&tmp, &content)?;
        {
            let f = File::open(&tmp)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &live)?;
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    pub fn load_positions_into_memory(&self) -> HashMap<String, Position> {
        self.positions.read().clone()
    }

    pub fn upsert_position(&self, position: Position) -> CoreResult<()> {
        let mut guard = self.positions.write();
        guard.insert(position.id.clone(), position);
        self.save_positions(&guard)
    }

    pub fn get_position(&self, id: &str) -> Option<Position> {
        self.positions.read().get(id).cloned()
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn find_by_intent(&self, intent_id: &str) -> Option<Position> {
        self.positions
            .read()
            .values()
            .find(|p| p.intent_id == intent_id)
            .cloned()
    }

    // -------------------------------------------------------------------
    // Audit log
    // -------------------------------------------------------------------

    /// Append an audit entry; `seq` is assigned and returned. Flushed before
    /// returning so a crash immediately after never loses the record.
    pub fn append_audit(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        before: Option<Value>,
        after: Option<Value>,
        reason: Option<String>,
    ) -> CoreResult<u64> {
        let seq = self.audit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = AuditEntry {
            seq,
            timestamp: Utc::now().to_rfc3339(),
            actor: actor.into(),
            action: action.into(),
            before,
            after,
            reason,
        };
        let line = serde_json::to_string(&entry)?;

        let mut file = self.audit_file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(seq)
    }

    /// Read the most recent `limit` audit entries (or all, if `limit` is
    /// `None`). Tolerates an unreadable trailing partial record.
    pub fn read_audit(&self, limit: Option<usize>) -> CoreResult<Vec<AuditEntry>> {
        let path = self.root.join("audit.log");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(e) => entries.push(e),
                Err(_) => break,
            }
        }
        if let Some(limit) = limit {
            let start = entries.len().saturating_sub(limit);
            entries = entries.split_off(start);
        }
        Ok(entries)
    }

    // -------------------------------------------------------------------
    // Params
    // -------------------------------------------------------------------

    pub fn get_param(&self, key: &str) -> Option<Value> {
        self.params.read().get(key).cloned()
    }

    pub fn set_param(&self, key: impl Into<String>, value: Value) -> CoreResult<()> {
        let key = key.into();
        let before = self.get_param(&key);
        {
            let mut guard = self.params.write();
            guard.insert(key.clone(), value.clone());
            let content = serde_json::to_string_pretty(&*guard)?;
            let path = self.root.join("params.json");
            let tmp = self.root.join("params.json.tmp");
            std::fs::write(&tmp, &content)?;
            std::fs::rename(&tmp, &path)?;
        }
        self.append_audit(
            "state_store",
            "set_param",
            before,
            Some(value),
            Some(format!("key={key}")),
        )?;
        Ok(())
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade_engine::PositionStatus;

    fn sample_position(intent_id: &str) -> Position {
        Position {
            id: uuid::Uuid::new_v4().to_string(),
            intent_id: intent_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: "Long".to_string(),
            entry_price: 100.0,
            current_price: 100.0,
            peak_price: 100.0,
            quantity: 1.0,
            stop_loss_price: 85.0,
            take_profit_price: 200.0,
            status: PositionStatus::Open,
            opened_at: Utc::now().to_rfc3339(),
            closed_at: None,
            realized_pnl: None,
        }
    }

    #[test]
    fn save_then_load_roundtrips_positions() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let pos = sample_position("intent-1");
        store.upsert_position(pos.clone()).unwrap();

        let reopened = StateStore::open(dir.path()).unwrap();
        let loaded = reopened.get_position(&pos.id).unwrap();
        assert_eq!(loaded.intent_id, "intent-1");
        assert_eq!(loaded.symbol, "BTCUSDT");
    }

    #[test]
    fn corrupt_positions_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("positions.v1.json"), "{not valid json").unwrap();
        let result = StateStore::open(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn tmp_file_used_when_live_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        let pos = sample_position("intent-2");
        let content = serde_json::to_string(&vec![&pos]).unwrap();
        std::fs::write(dir.path().join("positions.tmp"), content).unwrap();

        let store = StateStore::open(dir.path()).unwrap();
        assert!(store.find_by_intent("intent-2").is_some());
    }

    #[test]
    fn audit_seq_is_monotone_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let s1 = store.append_audit("test", "a", None, None, None).unwrap();
        let s2 = store.append_audit("test", "b", None, None, None).unwrap();
        assert!(s2 > s1);
        drop(store);

        let reopened = StateStore::open(dir.path()).unwrap();
        let s3 = reopened.append_audit("test", "c", None, None, None).unwrap();
        assert!(s3 > s2);
    }

    #[test]
    fn set_param_appends_audit_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.set_param("max_positions", serde_json::json!(5)).unwrap();
        assert_eq!(store.get_param("max_positions"), Some(serde_json::json!(5)));

        let audit = store.read_audit(None).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "set_param");
    }

    #[test]
    fn pending_intent_persists_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let intent = TradeIntent {
            intent_id: "intent-9".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: "Long".to_string(),
            size: 1.0,
            entry_price: 100.0,
            initial_stop_price: 85.0,
            take_profit_price: 200.0,
        };
        store.put_pending_intent(intent.clone()).unwrap();

        let reopened = StateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list_pending_intents().len(), 1);

        reopened.remove_pending_intent("intent-9").unwrap();
        assert!(reopened.list_pending_intents().is_empty());
    }

    #[test]
    fn read_audit_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        for i in 0..5 {
            store.append_audit("t", format!("action-{i}"), None, None, None).unwrap();
        }
        let recent = store.read_audit(Some(2)).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].action, "action-4");
    }
}
