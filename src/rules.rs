use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// Commands seeded on first run; `delete_command` never removes them.
pub const RESERVED_COMMANDS: [&str; 2] = ["/add", "/error"];

/// One forwarding rule, keyed in the rule set by its normalized command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub source_chat_ids: BTreeSet<i64>,
    #[serde(default)]
    pub target_chat_id: Option<i64>,
    #[serde(default)]
    pub title: String,
}

impl Rule {
    /// A rule with no sources or no target is inert: it never matches.
    pub fn is_inert(&self) -> bool {
        self.source_chat_ids.is_empty() || self.target_chat_id.is_none()
    }
}

/// Full rule set, loaded wholesale per read and replaced wholesale per write.
pub type RuleSet = BTreeMap<String, Rule>;

/// Normalize a raw command: trim, lowercase, ensure the leading slash.
pub fn normalize_command(raw: &str) -> String {
    let command = raw.trim().to_lowercase();
    if command.starts_with('/') {
        command
    } else {
        format!("/{command}")
    }
}

fn default_rules() -> RuleSet {
    RESERVED_COMMANDS
        .iter()
        .map(|cmd| (cmd.to_string(), Rule::default()))
        .collect()
}

/// JSON-file backed rule store.
///
/// Readers always parse the last fully-renamed snapshot and never take the
/// lock; all mutations hold `write_lock` across their read-modify-write and
/// land via a temp-file write plus atomic rename.
pub struct RuleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Read the current rule set, initializing the file with the reserved
    /// inert commands on first run. A present-but-unparseable file is an
    /// error; the caller must not proceed with an ambiguous rule set.
    pub async fn load(&self) -> Result<RuleSet> {
        if let Some(rules) = self.read_snapshot().await? {
            return Ok(rules);
        }

        let _guard = self.write_lock.lock().await;
        // Re-check under the lock: another task may have initialized it.
        if let Some(rules) = self.read_snapshot().await? {
            return Ok(rules);
        }

        let rules = default_rules();
        self.persist(&rules).await?;
        info!("Initialized rule set at {}", self.path.display());
        Ok(rules)
    }

    /// Replace the persisted rule set wholesale.
    pub async fn save(&self, rules: &RuleSet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(rules).await
    }

    /// Create or wholesale-replace the rule for `raw_command`.
    pub async fn upsert_rule(
        &self,
        raw_command: &str,
        source_chat_ids: BTreeSet<i64>,
        target_chat_id: Option<i64>,
        title: &str,
    ) -> Result<()> {
        let command = normalize_command(raw_command);
        let _guard = self.write_lock.lock().await;
        let mut rules = self.read_snapshot().await?.unwrap_or_else(default_rules);
        rules.insert(
            command,
            Rule {
                source_chat_ids,
                target_chat_id,
                title: title.to_string(),
            },
        );
        self.persist(&rules).await
    }

    /// Insert a new inert rule unless the command already exists (idempotent:
    /// re-adding never resets an existing rule's fields).
    pub async fn add_command(&self, raw_command: &str) -> Result<()> {
        if raw_command.trim().is_empty() {
            return Ok(());
        }
        let command = normalize_command(raw_command);
        let _guard = self.write_lock.lock().await;
        let mut rules = self.read_snapshot().await?.unwrap_or_else(default_rules);
        if rules.contains_key(&command) {
            return Ok(());
        }
        rules.insert(command, Rule::default());
        self.persist(&rules).await
    }

    /// Remove a rule. Reserved commands and unknown commands are silent
    /// no-ops, never errors.
    pub async fn delete_command(&self, raw_command: &str) -> Result<()> {
        let command = normalize_command(raw_command);
        if RESERVED_COMMANDS.contains(&command.as_str()) {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut rules = self.read_snapshot().await?.unwrap_or_else(default_rules);
        if rules.remove(&command).is_none() {
            return Ok(());
        }
        self.persist(&rules).await
    }

    /// Parse the persisted file, or None if it does not exist yet.
    async fn read_snapshot(&self) -> Result<Option<RuleSet>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let rules = serde_json::from_str(&content).with_context(|| {
                    format!("Malformed rule file: {}", self.path.display())
                })?;
                Ok(Some(rules))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read rule file: {}", self.path.display())
            }),
        }
    }

    /// Write-temp-then-rename so a concurrent reader sees either the old or
    /// the new snapshot, never a partial write.
    async fn persist(&self, rules: &RuleSet) -> Result<()> {
        let json = serde_json::to_string_pretty(rules).context("Failed to serialize rule set")?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store_in(dir: &tempfile::TempDir) -> RuleStore {
        RuleStore::new(dir.path().join("rules.json"))
    }

    #[test]
    fn test_normalize_command() {
        assert_eq!(normalize_command("/Add"), "/add");
        assert_eq!(normalize_command("  ALERT "), "/alert");
        assert_eq!(normalize_command("/error"), "/error");
    }

    #[tokio::test]
    async fn test_first_load_seeds_reserved_commands() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let rules = store.load().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules["/add"].is_inert());
        assert!(rules["/error"].is_inert());

        // The default set is persisted, not just returned.
        assert!(dir.path().join("rules.json").exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(dir.path().join("rules.json"), "{not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("Malformed rule file"));
    }

    #[tokio::test]
    async fn test_upsert_normalizes_and_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store
            .upsert_rule("  ALERT ", BTreeSet::from([100, 100, 200]), Some(300), "Alerts")
            .await
            .unwrap();

        let rules = store.load().await.unwrap();
        let rule = &rules["/alert"];
        assert_eq!(rule.source_chat_ids, BTreeSet::from([100, 200]));
        assert_eq!(rule.target_chat_id, Some(300));
        assert_eq!(rule.title, "Alerts");

        store
            .upsert_rule("/alert", BTreeSet::from([7]), None, "")
            .await
            .unwrap();
        let rule = store.load().await.unwrap()["/alert"].clone();
        assert_eq!(rule.source_chat_ids, BTreeSet::from([7]));
        assert_eq!(rule.target_chat_id, None);
        assert_eq!(rule.title, "");
    }

    #[tokio::test]
    async fn test_save_replaces_the_set_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_command("/old").await.unwrap();

        let mut replacement = default_rules();
        replacement.insert(
            "/new".to_string(),
            Rule {
                source_chat_ids: BTreeSet::from([1]),
                target_chat_id: Some(2),
                title: "New".to_string(),
            },
        );
        store.save(&replacement).await.unwrap();

        let rules = store.load().await.unwrap();
        assert!(!rules.contains_key("/old"));
        assert_eq!(rules["/new"].target_chat_id, Some(2));
    }

    #[tokio::test]
    async fn test_add_command_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add_command("status").await.unwrap();
        store
            .upsert_rule("/status", BTreeSet::from([1]), Some(2), "Status")
            .await
            .unwrap();

        // Re-adding (with different casing) must not reset the fields.
        store.add_command("/STATUS").await.unwrap();

        let rules = store.load().await.unwrap();
        assert_eq!(rules["/status"].target_chat_id, Some(2));
        assert_eq!(rules.keys().filter(|k| k.contains("status")).count(), 1);
    }

    #[tokio::test]
    async fn test_delete_command_protects_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.load().await.unwrap();

        store.delete_command("/add").await.unwrap();
        store.delete_command("/error").await.unwrap();
        store.delete_command("/never-existed").await.unwrap();

        let rules = store.load().await.unwrap();
        assert!(rules.contains_key("/add"));
        assert!(rules.contains_key("/error"));
    }

    #[tokio::test]
    async fn test_delete_command_removes_ordinary_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add_command("/report").await.unwrap();
        store.delete_command("/report").await.unwrap();

        assert!(!store.load().await.unwrap().contains_key("/report"));
    }

    #[tokio::test]
    async fn test_concurrent_upserts_on_different_commands_keep_both() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .upsert_rule("/alpha", BTreeSet::from([1]), Some(10), "a")
                    .await
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .upsert_rule("/beta", BTreeSet::from([2]), Some(20), "b")
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let rules = store.load().await.unwrap();
        assert_eq!(rules["/alpha"].target_chat_id, Some(10));
        assert_eq!(rules["/beta"].target_chat_id, Some(20));
    }

    #[tokio::test]
    async fn test_concurrent_upserts_on_same_command_end_coherent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let mut handles = Vec::new();
        for i in 0..8i64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .upsert_rule("/same", BTreeSet::from([i]), Some(i * 10), &format!("t{i}"))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        // One winner, but its fields must all come from the same call.
        let rule = store.load().await.unwrap()["/same"].clone();
        let i = *rule.source_chat_ids.iter().next().unwrap();
        assert_eq!(rule.source_chat_ids, BTreeSet::from([i]));
        assert_eq!(rule.target_chat_id, Some(i * 10));
        assert_eq!(rule.title, format!("t{i}"));
    }
}
