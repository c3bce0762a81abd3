//! Narrative continuity ledger.
//!
//! Tracks characters, plot threads, and per-chapter summaries across a book
//! run, and renders a bounded context block for drafting prompts. Persisted
//! as version-checked JSON; saves write a temporary file and rename it into
//! place so a crash never leaves a torn snapshot.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::artifact::ContinuityExtract;
use crate::error::LedgerError;

/// Current snapshot format version.
pub const LEDGER_VERSION: u32 = 1;

/// One character's continuity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Chapter round the character first appeared in.
    pub first_appearance: u32,
    pub status: String,
    #[serde(default)]
    pub development: Vec<DevelopmentEvent>,
}

/// A single development note for a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentEvent {
    pub round: u32,
    /// True when this event is the character's introduction.
    pub introduced: bool,
    pub note: String,
}

/// Status of a plot thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Resolved,
}

/// One plot thread's continuity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub name: String,
    pub introduced_round: u32,
    pub status: ThreadStatus,
    /// Round the thread last moved, whether advanced or resolved.
    pub last_advanced: u32,
}

/// One completed chapter round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub threads: Vec<String>,
    pub word_count: usize,
}

/// Everything the pipeline remembers between chapters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NarrativeLedger {
    #[serde(default)]
    pub characters: BTreeMap<String, CharacterRecord>,
    #[serde(default)]
    pub threads: Vec<ThreadRecord>,
    #[serde(default)]
    pub rounds: Vec<RoundRecord>,
}

/// The facts one chapter contributes, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundUpdate {
    pub round: u32,
    pub title: String,
    pub extract: ContinuityExtract,
    pub word_count: usize,
}

impl RoundUpdate {
    pub fn from_extract(
        round: u32,
        title: impl Into<String>,
        extract: ContinuityExtract,
        word_count: usize,
    ) -> Self {
        RoundUpdate {
            round,
            title: title.into(),
            extract,
            word_count,
        }
    }
}

impl NarrativeLedger {
    pub fn new() -> Self {
        NarrativeLedger::default()
    }

    /// Highest completed round, or 0 when the ledger is empty.
    pub fn last_round(&self) -> u32 {
        self.rounds.iter().map(|r| r.round).max().unwrap_or(0)
    }

    /// Fold one chapter's continuity facts into the ledger.
    pub fn apply_update(&mut self, update: RoundUpdate) {
        let extract = &update.extract;

        for name in &extract.characters_introduced {
            self.characters
                .entry(name.clone())
                .or_insert_with(|| CharacterRecord {
                    first_appearance: update.round,
                    status: "active".to_string(),
                    development: Vec::new(),
                })
                .development
                .push(DevelopmentEvent {
                    round: update.round,
                    introduced: true,
                    note: format!("introduced in chapter {}", update.round),
                });
        }
        for name in &extract.characters_developed {
            // Development of an unknown character implies an introduction
            // the extract missed.
            self.characters
                .entry(name.clone())
                .or_insert_with(|| CharacterRecord {
                    first_appearance: update.round,
                    status: "active".to_string(),
                    development: Vec::new(),
                })
                .development
                .push(DevelopmentEvent {
                    round: update.round,
                    introduced: false,
                    note: format!("developed in chapter {}", update.round),
                });
        }

        for name in &extract.new_plot_threads {
            if self.find_thread(name).is_none() {
                self.threads.push(ThreadRecord {
                    name: name.clone(),
                    introduced_round: update.round,
                    status: ThreadStatus::Active,
                    last_advanced: update.round,
                });
            }
        }
        for name in &extract.plot_threads_advanced {
            match self.find_thread_mut(name) {
                Some(thread) => thread.last_advanced = update.round,
                None => self.threads.push(ThreadRecord {
                    name: name.clone(),
                    introduced_round: update.round,
                    status: ThreadStatus::Active,
                    last_advanced: update.round,
                }),
            }
        }
        for name in &extract.threads_resolved {
            if let Some(thread) = self.find_thread_mut(name) {
                thread.status = ThreadStatus::Resolved;
                thread.last_advanced = update.round;
            }
        }

        let mut characters: Vec<String> = extract
            .characters_introduced
            .iter()
            .chain(&extract.characters_developed)
            .cloned()
            .collect();
        characters.dedup();
        let threads: Vec<String> = extract
            .new_plot_threads
            .iter()
            .chain(&extract.plot_threads_advanced)
            .chain(&extract.threads_resolved)
            .cloned()
            .collect();

        self.rounds.push(RoundRecord {
            round: update.round,
            title: update.title,
            summary: extract.summary.clone(),
            characters,
            threads,
            word_count: update.word_count,
        });
        self.rounds.sort_by_key(|r| r.round);
    }

    fn find_thread(&self, name: &str) -> Option<&ThreadRecord> {
        self.threads.iter().find(|t| t.name == name)
    }

    fn find_thread_mut(&mut self, name: &str) -> Option<&mut ThreadRecord> {
        self.threads.iter_mut().find(|t| t.name == name)
    }

    /// Render the story so far for the prompt drafting `target_round`.
    ///
    /// Only material strictly before `target_round` is included: the most
    /// recently seen characters (up to 5) with their status and last
    /// appearance, the most recently advanced open threads (up to 5) with
    /// the round each opened, and the last three chapter summaries. The
    /// result is truncated to at most `max_size` characters.
    pub fn get_contextual_summary(&self, target_round: u32, max_size: usize) -> String {
        let mut block = String::new();

        let mut characters: Vec<(&String, &CharacterRecord, u32)> = self
            .characters
            .iter()
            .filter_map(|(name, record)| {
                let last_seen = record
                    .development
                    .iter()
                    .filter(|e| e.round < target_round)
                    .map(|e| e.round)
                    .max()?;
                Some((name, record, last_seen))
            })
            .collect();
        characters.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));
        if !characters.is_empty() {
            block.push_str("Characters in play:\n");
            for (name, record, last_seen) in characters.iter().take(5) {
                block.push_str(&format!(
                    "- {name} ({}, last seen in chapter {last_seen})\n",
                    record.status
                ));
            }
        }

        let mut open: Vec<&ThreadRecord> = self
            .threads
            .iter()
            .filter(|t| t.status == ThreadStatus::Active && t.introduced_round < target_round)
            .collect();
        open.sort_by(|a, b| b.last_advanced.cmp(&a.last_advanced).then_with(|| a.name.cmp(&b.name)));
        if !open.is_empty() {
            block.push_str("Open plot threads:\n");
            for thread in open.iter().take(5) {
                block.push_str(&format!(
                    "- {} (opened in chapter {}, last advanced in chapter {})\n",
                    thread.name, thread.introduced_round, thread.last_advanced
                ));
            }
        }

        let recent: Vec<&RoundRecord> = self
            .rounds
            .iter()
            .filter(|r| r.round < target_round)
            .collect();
        if !recent.is_empty() {
            block.push_str("Recent chapters:\n");
            let skip = recent.len().saturating_sub(3);
            for round in &recent[skip..] {
                block.push_str(&format!(
                    "- Chapter {} ({}): {}\n",
                    round.round, round.title, round.summary
                ));
            }
        }

        if block.chars().count() > max_size {
            block.chars().take(max_size).collect()
        } else {
            block
        }
    }
}

// ============================================================
// Persistence
// ============================================================

/// On-disk snapshot wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub last_updated: String,
    pub ledger: NarrativeLedger,
}

/// Loads and saves ledger snapshots at a fixed path.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LedgerStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, or an empty ledger when none exists yet.
    pub async fn load(&self) -> Result<NarrativeLedger, LedgerError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(NarrativeLedger::new());
            }
            Err(e) => return Err(LedgerError::Io(e)),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != LEDGER_VERSION {
            return Err(LedgerError::VersionMismatch {
                expected: LEDGER_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot.ledger)
    }

    /// Save atomically: write a sibling temporary file, then rename it over
    /// the snapshot path.
    pub async fn save(&self, ledger: &NarrativeLedger) -> Result<(), LedgerError> {
        let snapshot = Snapshot {
            version: LEDGER_VERSION,
            last_updated: Utc::now().to_rfc3339(),
            ledger: ledger.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
