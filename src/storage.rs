// SPDX-License-Identifier: MIT
//! SQLite persistence (WAL mode).
//!
//! Three durable stores share one database: the pattern registry, the
//! versioned threshold configs, and the append-only execution log (plus the
//! derived pattern-performance table, which is always recomputable from the
//! log). Pool or migration failure is a hard startup failure — the engine has
//! no degraded mode.
//!
//! Enum-ish columns (tier, outcome, severity) are stored as their string
//! forms; composite fields (matcher, weights, errors) as JSON text.

use crate::error::{EngineError, Result};
use crate::outcomes::{ExecutionRecord, PatternPerformance};
use crate::patterns::Pattern;
use crate::thresholds::{FactorWeights, ThresholdConfig};
use crate::tiers::Tier;
use chrono::NaiveDate;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PatternRow {
    pub id: String,
    pub name: String,
    /// JSON `SignatureMatcher`.
    pub matcher: String,
    pub category: String,
    pub severity: String,
    pub base_confidence: f64,
    /// JSON array of approach templates.
    pub suggested_approaches: String,
    pub enabled: bool,
    /// Insertion order; first-match-wins traversal follows this.
    pub position: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl PatternRow {
    pub fn into_pattern(self) -> Result<Pattern> {
        Ok(Pattern {
            id: self.id,
            name: self.name,
            matcher: serde_json::from_str(&self.matcher)?,
            category: self.category,
            severity: self
                .severity
                .parse()
                .map_err(|e: String| EngineError::Serialization(serde::de::Error::custom(e)))?,
            base_confidence: self.base_confidence,
            suggested_approaches: serde_json::from_str(&self.suggested_approaches)?,
            enabled: self.enabled,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ThresholdRow {
    pub version: i64,
    pub auto_execute_threshold: f64,
    pub assisted_mode_min: f64,
    pub report_only_max: f64,
    pub max_autonomous_per_day: i64,
    /// JSON `FactorWeights`.
    pub weights: String,
    pub updated_at: String,
}

impl ThresholdRow {
    pub fn into_config(self) -> Result<ThresholdConfig> {
        let weights: FactorWeights = serde_json::from_str(&self.weights)?;
        Ok(ThresholdConfig {
            version: self.version,
            auto_execute_threshold: self.auto_execute_threshold,
            assisted_mode_min: self.assisted_mode_min,
            report_only_max: self.report_only_max,
            max_autonomous_per_day: self.max_autonomous_per_day as u32,
            weights,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionRow {
    pub id: String,
    pub candidate_id: Option<String>,
    pub approach_id: Option<String>,
    pub pattern_id: Option<String>,
    pub tier: String,
    pub approved_by: Option<String>,
    pub dry_run: bool,
    pub snapshot_ref: Option<String>,
    pub confidence_at_execution: Option<f64>,
    pub started_at: String,
    pub completed_at: String,
    pub outcome: String,
    /// JSON array of error strings.
    pub errors: String,
    pub threshold_version: i64,
    pub corrects: Option<String>,
}

impl ExecutionRow {
    pub fn into_record(self) -> Result<ExecutionRecord> {
        Ok(ExecutionRecord {
            id: self.id,
            candidate_id: self.candidate_id,
            approach_id: self.approach_id,
            pattern_id: self.pattern_id,
            tier: self
                .tier
                .parse()
                .map_err(|e: String| EngineError::Serialization(serde::de::Error::custom(e)))?,
            approved_by: self.approved_by,
            dry_run: self.dry_run,
            snapshot_ref: self.snapshot_ref,
            confidence_at_execution: self.confidence_at_execution,
            started_at: self.started_at,
            completed_at: self.completed_at,
            outcome: self
                .outcome
                .parse()
                .map_err(|e: String| EngineError::Serialization(serde::de::Error::custom(e)))?,
            errors: serde_json::from_str(&self.errors)?,
            threshold_version: self.threshold_version,
            corrects: self.corrects,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PerformanceRow {
    pub pattern_id: String,
    pub usage_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub average_confidence: f64,
    pub last_updated: String,
}

impl From<PerformanceRow> for PatternPerformance {
    fn from(row: PerformanceRow) -> Self {
        Self {
            pattern_id: row.pattern_id,
            usage_count: row.usage_count as u64,
            success_count: row.success_count as u64,
            failure_count: row.failure_count as u64,
            average_confidence_at_execution: row.average_confidence,
            last_updated: row.last_updated,
        }
    }
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("opsgate.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        let stmts = [
            "CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                matcher TEXT NOT NULL,
                category TEXT NOT NULL,
                severity TEXT NOT NULL,
                base_confidence REAL NOT NULL,
                suggested_approaches TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS threshold_configs (
                version INTEGER PRIMARY KEY,
                auto_execute_threshold REAL NOT NULL,
                assisted_mode_min REAL NOT NULL,
                report_only_max REAL NOT NULL,
                max_autonomous_per_day INTEGER NOT NULL,
                weights TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS execution_records (
                id TEXT PRIMARY KEY,
                candidate_id TEXT,
                approach_id TEXT,
                pattern_id TEXT,
                tier TEXT NOT NULL,
                approved_by TEXT,
                dry_run INTEGER NOT NULL,
                snapshot_ref TEXT,
                confidence_at_execution REAL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                errors TEXT NOT NULL,
                threshold_version INTEGER NOT NULL,
                corrects TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_execution_pattern
                ON execution_records(pattern_id)",
            "CREATE INDEX IF NOT EXISTS idx_execution_corrects
                ON execution_records(corrects)",
            "CREATE TABLE IF NOT EXISTS pattern_performance (
                pattern_id TEXT PRIMARY KEY,
                usage_count INTEGER NOT NULL,
                success_count INTEGER NOT NULL,
                failure_count INTEGER NOT NULL,
                average_confidence REAL NOT NULL,
                last_updated TEXT NOT NULL
            )",
        ];
        for stmt in stmts {
            sqlx::query(stmt).execute(pool).await?;
        }
        Ok(())
    }

    // ─── Patterns ───────────────────────────────────────────────────────────

    pub async fn insert_pattern(&self, pattern: &Pattern, now: &str) -> Result<()> {
        let position: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM patterns")
            .fetch_one(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO patterns (id, name, matcher, category, severity, base_confidence,
                                   suggested_approaches, enabled, position, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&pattern.id)
        .bind(&pattern.name)
        .bind(serde_json::to_string(&pattern.matcher)?)
        .bind(&pattern.category)
        .bind(pattern.severity.as_str())
        .bind(pattern.base_confidence)
        .bind(serde_json::to_string(&pattern.suggested_approaches)?)
        .bind(pattern.enabled)
        .bind(position)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace metadata in place; `position` (and therefore match order) is kept.
    pub async fn update_pattern(&self, pattern: &Pattern, now: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE patterns SET name = ?, matcher = ?, category = ?, severity = ?,
                                 base_confidence = ?, suggested_approaches = ?, enabled = ?,
                                 updated_at = ?
             WHERE id = ?",
        )
        .bind(&pattern.name)
        .bind(serde_json::to_string(&pattern.matcher)?)
        .bind(&pattern.category)
        .bind(pattern.severity.as_str())
        .bind(pattern.base_confidence)
        .bind(serde_json::to_string(&pattern.suggested_approaches)?)
        .bind(pattern.enabled)
        .bind(now)
        .bind(&pattern.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_pattern_enabled(&self, id: &str, enabled: bool, now: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE patterns SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All patterns in insertion order.
    pub async fn list_patterns(&self) -> Result<Vec<PatternRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM patterns ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ─── Threshold configs ──────────────────────────────────────────────────

    pub async fn insert_threshold_config(&self, config: &ThresholdConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO threshold_configs (version, auto_execute_threshold, assisted_mode_min,
                                            report_only_max, max_autonomous_per_day, weights,
                                            updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(config.version)
        .bind(config.auto_execute_threshold)
        .bind(config.assisted_mode_min)
        .bind(config.report_only_max)
        .bind(config.max_autonomous_per_day as i64)
        .bind(serde_json::to_string(&config.weights)?)
        .bind(&config.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_threshold_config(&self) -> Result<Option<ThresholdRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM threshold_configs ORDER BY version DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_threshold_configs(&self) -> Result<Vec<ThresholdRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM threshold_configs ORDER BY version ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ─── Execution log ──────────────────────────────────────────────────────

    pub async fn insert_execution(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_records (id, candidate_id, approach_id, pattern_id, tier,
                                            approved_by, dry_run, snapshot_ref,
                                            confidence_at_execution, started_at, completed_at,
                                            outcome, errors, threshold_version, corrects)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.candidate_id)
        .bind(&record.approach_id)
        .bind(&record.pattern_id)
        .bind(record.tier.as_str())
        .bind(&record.approved_by)
        .bind(record.dry_run)
        .bind(&record.snapshot_ref)
        .bind(record.confidence_at_execution)
        .bind(&record.started_at)
        .bind(&record.completed_at)
        .bind(record.outcome.as_str())
        .bind(serde_json::to_string(&record.errors)?)
        .bind(record.threshold_version)
        .bind(&record.corrects)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM execution_records WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Full history for one pattern, oldest first (fold order).
    pub async fn list_executions_for_pattern(&self, pattern_id: &str) -> Result<Vec<ExecutionRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM execution_records WHERE pattern_id = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(pattern_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list_executions(&self) -> Result<Vec<ExecutionRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM execution_records ORDER BY started_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Committed autonomous executions started on `day` (UTC). Seeds the
    /// daily cap counter at startup.
    pub async fn count_autonomous_on(&self, day: NaiveDate) -> Result<u32> {
        let prefix = format!("{day}%");
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM execution_records
             WHERE tier = ? AND dry_run = 0 AND corrects IS NULL AND started_at LIKE ?",
        )
        .bind(Tier::Autonomous.as_str())
        .bind(prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    // ─── Pattern performance (derived) ──────────────────────────────────────

    pub async fn upsert_performance(&self, perf: &PatternPerformance) -> Result<()> {
        sqlx::query(
            "INSERT INTO pattern_performance (pattern_id, usage_count, success_count,
                                              failure_count, average_confidence, last_updated)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(pattern_id) DO UPDATE SET
                usage_count = excluded.usage_count,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                average_confidence = excluded.average_confidence,
                last_updated = excluded.last_updated",
        )
        .bind(&perf.pattern_id)
        .bind(perf.usage_count as i64)
        .bind(perf.success_count as i64)
        .bind(perf.failure_count as i64)
        .bind(perf.average_confidence_at_execution)
        .bind(&perf.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_performance(&self, pattern_id: &str) -> Result<Option<PerformanceRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM pattern_performance WHERE pattern_id = ?")
                .bind(pattern_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_performance(&self) -> Result<Vec<PerformanceRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM pattern_performance ORDER BY pattern_id ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }
}
