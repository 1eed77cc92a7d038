// =============================================================================
// Learning Store (C4) — durable, searchable repository of learned patterns
// =============================================================================
//
// Learnings are append-only: a journal file (`learnings.log`, line-delimited
// JSON) is the durable record, and an in-memory index is rebuilt from it at
// startup. Feedback ops (`mark_success`/`mark_failure`) append a fresh
// revision of the learning to the journal rather than rewriting history, and
// the index keeps only the latest revision per id.
// =============================================================================

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::CoreResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningType {
    SuccessPattern,
    FailurePattern,
    Optimization,
    ContextAdaptation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub component: String,
    pub learning_type: LearningType,
    pub content: String,
    pub context: Value,
    pub confidence: f64,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub use_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

pub struct LearningStore {
    path: PathBuf,
    index: RwLock<HashMap<String, Learning>>,
    file: Mutex<std::fs::File>,
    alpha: f64,
}

impl LearningStore {
    pub fn open(path: impl Into<PathBuf>, alpha: f64) -> CoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let index = Self::replay(&path)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(path = %path.display(), learnings = index.len(), "learning store opened");

        Ok(Self {
            path,
            index: RwLock::new(index),
            file: Mutex::new(file),
            alpha: alpha.clamp(0.5, 0.9),
        })
    }

    fn replay(path: &PathBuf) -> CoreResult<HashMap<String, Learning>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut index = HashMap::new();
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Learning>(&line) {
                Ok(learning) => {
                    index.insert(learning.id.clone(), learning);
                }
                Err(_) => break,
            }
        }
        Ok(index)
    }

    fn append(&self, learning: &Learning) -> CoreResult<()> {
        let line = serde_json::to_string(learning)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    pub fn add_learning(
        &self,
        component: impl Into<String>,
        learning_type: LearningType,
        content: impl Into<String>,
        context: Value,
        confidence: f64,
    ) -> CoreResult<String> {
        let learning = Learning {
            id: Uuid::new_v4().to_string(),
            component: component.into(),
            learning_type,
            content: content.into(),
            context,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now().to_rfc3339(),
            last_used_at: None,
            use_count: 0,
            success_count: 0,
            failure_count: 0,
        };
        self.append(&learning)?;
        let id = learning.id.clone();
        self.index.write().insert(id.clone(), learning);
        Ok(id)
    }

    /// Search learnings, ordered by descending confidence then recency.
    pub fn search(
        &self,
        query: Option<&str>,
        component: Option<&str>,
        learning_type: Option<&LearningType>,
        min_confidence: f64,
        limit: usize,
    ) -> Vec<Learning> {
        let index = self.index.read();
        let query_lower = query.map(|q| q.to_lowercase());

        let mut matches: Vec<Learning> = index
            .values()
            .filter(|l| l.confidence >= min_confidence)
            .filter(|l| component.map(|c| l.component == c).unwrap_or(true))
            .filter(|l| learning_type.map(|t| &l.learning_type == t).unwrap_or(true))
            .filter(|l| {
                query_lower
                    .as_ref()
                    .map(|q| {
                        l.content.to_lowercase().contains(q)
                            || l.context.to_string().to_lowercase().contains(q)
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        matches.truncate(limit);
        matches
    }

    fn apply_feedback(&self, id: &str, success: bool) -> CoreResult<()> {
        let updated = {
            let mut index = self.index.write();
            let learning = match index.get_mut(id) {
                Some(l) => l,
                None => return Ok(()),
            };
            if success {
                learning.success_count += 1;
            } else {
                learning.failure_count += 1;
            }
            learning.use_count += 1;
            learning.last_used_at = Some(Utc::now().to_rfc3339());

            let total = learning.success_count + learning.failure_count;
            let success_rate = if total > 0 {
                learning.success_count as f64 / total as f64
            } else {
                learning.confidence
            };
            learning.confidence =
                (self.alpha * learning.confidence + (1.0 - self.alpha) * success_rate).clamp(0.0, 1.0);

            learning.clone()
        };
        self.append(&updated)
    }

    pub fn mark_success(&self, id: &str) -> CoreResult<()> {
        self.apply_feedback(id, true)
    }

    pub fn mark_failure(&self, id: &str) -> CoreResult<()> {
        self.apply_feedback(id, false)
    }

    pub fn get(&self, id: &str) -> Option<Learning> {
        self.index.read().get(id).cloned()
    }

    pub fn stats(&self) -> LearningStoreStats {
        let index = self.index.read();
        let mut successful = 0u64;
        let mut failed = 0u64;
        for l in index.values() {
            successful += l.success_count;
            failed += l.failure_count;
        }
        LearningStoreStats {
            active_learnings: index.len(),
            successful_applications: successful,
            failed_applications: failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningStoreStats {
    pub active_learnings: usize,
    pub successful_applications: u64,
    pub failed_applications: u64,
}
