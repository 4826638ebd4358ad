//! SQLite-backed strategy store.
//!
//! Modeled as a builder/handle split: [`StrategyStoreBuilder`] admits and
//! validates strategy documents against their JSON Schema, then [`build`]
//! consumes it and hands back an immutable [`StrategyStore`] the rest of the
//! engine holds as a read-only `Arc`. There is no mutation path once built —
//! the immutability is enforced by the type split, not by a runtime flag.

mod schema;

use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{Depth, GlobalSettings, Strategy, StrategyIndexEntry, TimeWindow};

pub use schema::{STRATEGY_INDEX_SCHEMA, STRATEGY_SCHEMA};

fn validate_against(document: &Value, schema_text: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_text)
        .map_err(|e| Error::Internal(format!("invalid embedded schema: {e}")))?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| Error::Internal(format!("invalid embedded schema: {e}")))?;
    let errors: Vec<String> = validator.iter_errors(document).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::invalid_strategy("", errors.join("; ")))
    }
}

/// Opens (or creates) the on-disk database and accepts strategy documents
/// before the immutable cache is built.
pub struct StrategyStoreBuilder {
    conn: Connection,
}

impl StrategyStoreBuilder {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(|e| Error::Store(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS strategies (
                slug TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                document TEXT NOT NULL,
                index_entry TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE strategies (
                slug TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                document TEXT NOT NULL,
                index_entry TEXT NOT NULL
            );
            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Validate a strategy document and its selection index entry, then
    /// upsert them (by slug) into the durable store.
    pub fn admit_strategy(&mut self, document: Value, index_entry: Value) -> Result<()> {
        validate_against(&document, STRATEGY_SCHEMA)?;
        validate_against(&index_entry, STRATEGY_INDEX_SCHEMA)?;

        let strategy: Strategy = serde_json::from_value(document.clone())
            .map_err(|e| Error::invalid_strategy("", e.to_string()))?;
        let index: StrategyIndexEntry = serde_json::from_value(index_entry.clone())
            .map_err(|e| Error::invalid_strategy(&strategy.meta.slug, e.to_string()))?;

        if index.slug != strategy.meta.slug {
            return Err(Error::invalid_strategy(
                &strategy.meta.slug,
                "index_entry.slug does not match meta.slug",
            ));
        }

        self.conn
            .execute(
                "INSERT INTO strategies (slug, version, document, index_entry) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(slug) DO UPDATE SET version = excluded.version, document = excluded.document, index_entry = excluded.index_entry",
                rusqlite::params![
                    strategy.meta.slug,
                    strategy.meta.version,
                    document.to_string(),
                    index_entry.to_string(),
                ],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    /// Admit the process-wide LLM/prompt defaults, validated for required stages.
    pub fn admit_global_settings(&mut self, settings: &GlobalSettings) -> Result<()> {
        settings.validate()?;
        let value = serde_json::to_string(settings)?;
        self.conn
            .execute(
                "INSERT INTO settings (key, value) VALUES ('global', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![value],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    /// Load every admitted row into memory and return the immutable handle.
    pub fn build(self) -> Result<StrategyStore> {
        let mut strategies = HashMap::new();
        let mut index = Vec::new();

        let mut stmt = self
            .conn
            .prepare("SELECT document, index_entry FROM strategies")
            .map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let document: String = row.get(0)?;
                let index_entry: String = row.get(1)?;
                Ok((document, index_entry))
            })
            .map_err(|e| Error::Store(e.to_string()))?;

        for row in rows {
            let (document, index_entry) = row.map_err(|e| Error::Store(e.to_string()))?;
            let strategy: Strategy = serde_json::from_str(&document)?;
            let entry: StrategyIndexEntry = serde_json::from_str(&index_entry)?;
            strategies.insert(strategy.meta.slug.clone(), strategy);
            index.push(entry);
        }

        let settings_row: Option<String> = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = 'global'", [], |row| row.get(0))
            .ok();
        let settings = match settings_row {
            Some(value) => serde_json::from_str(&value)?,
            None => GlobalSettings::default(),
        };

        Ok(StrategyStore {
            strategies,
            index,
            settings,
        })
    }
}

/// Read-only, process-wide strategy and settings cache. Holding this behind
/// an `Arc` (no interior mutability) is what makes the immutable-after-boot
/// discipline enforceable at compile time rather than by convention.
pub struct StrategyStore {
    strategies: HashMap<String, Strategy>,
    index: Vec<StrategyIndexEntry>,
    settings: GlobalSettings,
}

impl StrategyStore {
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn get_strategy(&self, slug: &str) -> Result<&Strategy> {
        self.strategies.get(slug).ok_or_else(|| {
            let mut available: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
            available.sort_unstable();
            Error::strategy_not_found(format!(
                "'{slug}' (available: {})",
                available.join(", ")
            ))
        })
    }

    pub fn strategy_index(&self) -> &[StrategyIndexEntry] {
        &self.index
    }

    /// Select the active strategy with the lowest `priority` value matching
    /// `category`/`time_window`/`depth` exactly; ties broken by lexicographic slug.
    pub fn select_strategy(
        &self,
        category: &str,
        time_window: TimeWindow,
        depth: Depth,
    ) -> Option<&StrategyIndexEntry> {
        self.index
            .iter()
            .filter(|e| e.active && e.category == category && e.time_window == time_window && e.depth == depth)
            .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.slug.cmp(&b.slug)))
    }

    pub fn global_settings(&self) -> &GlobalSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document(slug: &str, priority: i64) -> (Value, Value) {
        let document = json!({
            "meta": { "slug": slug, "version": 1, "category": "news", "time_window": "week", "depth": "brief" },
            "tool_chain": [{ "use": "sonar", "inputs": { "query": "{{topic}}" } }],
        });
        let index = json!({
            "slug": slug, "category": "news", "time_window": "week", "depth": "brief", "priority": priority,
        });
        (document, index)
    }

    #[test]
    fn admits_and_retrieves_strategy() {
        let mut builder = StrategyStoreBuilder::open_in_memory().unwrap();
        let (doc, idx) = sample_document("news-brief", 10);
        builder.admit_strategy(doc, idx).unwrap();
        let store = builder.build().unwrap();

        let strategy = store.get_strategy("news-brief").unwrap();
        assert_eq!(strategy.meta.slug, "news-brief");
        assert_eq!(strategy.tool_chain.len(), 1);
    }

    #[test]
    fn unknown_slug_lists_available() {
        let builder = StrategyStoreBuilder::open_in_memory().unwrap();
        let store = builder.build().unwrap();
        let err = store.get_strategy("missing").unwrap_err();
        assert!(matches!(err, Error::StrategyNotFound(_)));
    }

    #[test]
    fn select_strategy_picks_lowest_priority() {
        let mut builder = StrategyStoreBuilder::open_in_memory().unwrap();
        let (doc_a, idx_a) = sample_document("news-a", 50);
        let (doc_b, idx_b) = sample_document("news-b", 10);
        builder.admit_strategy(doc_a, idx_a).unwrap();
        builder.admit_strategy(doc_b, idx_b).unwrap();
        let store = builder.build().unwrap();

        let selected = store
            .select_strategy("news", TimeWindow::Week, Depth::Brief)
            .unwrap();
        assert_eq!(selected.slug, "news-b");
    }

    #[test]
    fn select_strategy_breaks_priority_ties_by_slug() {
        let mut builder = StrategyStoreBuilder::open_in_memory().unwrap();
        // Admitted in an order where insertion order would otherwise pick "news-z".
        let (doc_z, idx_z) = sample_document("news-z", 10);
        let (doc_a, idx_a) = sample_document("news-a", 10);
        builder.admit_strategy(doc_z, idx_z).unwrap();
        builder.admit_strategy(doc_a, idx_a).unwrap();
        let store = builder.build().unwrap();

        let selected = store
            .select_strategy("news", TimeWindow::Week, Depth::Brief)
            .unwrap();
        assert_eq!(selected.slug, "news-a");
    }

    #[test]
    fn rejects_document_missing_required_meta_fields() {
        let mut builder = StrategyStoreBuilder::open_in_memory().unwrap();
        let doc = json!({ "meta": { "slug": "bad" }, "tool_chain": [] });
        let idx = json!({ "slug": "bad", "category": "news", "time_window": "week", "depth": "brief" });
        let err = builder.admit_strategy(doc, idx).unwrap_err();
        assert!(matches!(err, Error::InvalidStrategy { .. }));
    }

    #[test]
    fn rejects_mismatched_slug_between_document_and_index() {
        let mut builder = StrategyStoreBuilder::open_in_memory().unwrap();
        let (doc, _) = sample_document("news-a", 10);
        let (_, idx) = sample_document("news-b", 10);
        let err = builder.admit_strategy(doc, idx).unwrap_err();
        assert!(matches!(err, Error::InvalidStrategy { .. }));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("strategies.db");

        {
            let mut builder = StrategyStoreBuilder::open(&db_path).unwrap();
            let (doc, idx) = sample_document("news-brief", 10);
            builder.admit_strategy(doc, idx).unwrap();
            builder.build().unwrap();
        }

        let reopened = StrategyStoreBuilder::open(&db_path).unwrap().build().unwrap();
        let strategy = reopened.get_strategy("news-brief").unwrap();
        pretty_assertions::assert_eq!(strategy.meta.slug, "news-brief");
    }
}
