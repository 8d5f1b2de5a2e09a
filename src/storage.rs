//! SQLite storage for targets and their check history.
//!
//! A check and the baseline it establishes commit in one transaction, so a
//! crash between them can never leave a target whose stored baseline
//! disagrees with its recorded history.

use crate::types::{
    BaselineUpdate, CheckRecord, CheckReport, ContentBlock, NewTarget, RenderMode, Severity,
    Target, TargetId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use thiserror::Error;

/// Poll intervals below this are clamped up
pub const MIN_INTERVAL_MINUTES: u32 = 5;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("target {0} not found")]
    TargetNotFound(TargetId),
}

/// SQLite storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize pragmas and schema
    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            -- Watch targets with their current baseline
            CREATE TABLE IF NOT EXISTS targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                selectors TEXT NOT NULL DEFAULT '[]',
                render_mode TEXT NOT NULL DEFAULT 'static',
                interval_minutes INTEGER NOT NULL DEFAULT 60,
                is_active INTEGER NOT NULL DEFAULT 1,
                ignore_robots INTEGER NOT NULL DEFAULT 0,
                wait_selector TEXT,
                last_text TEXT NOT NULL DEFAULT '',
                last_text_hash TEXT,
                last_visual_hash INTEGER,
                last_blocks TEXT NOT NULL DEFAULT '[]',
                last_checked_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Append-only check history
            CREATE TABLE IF NOT EXISTS check_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id INTEGER NOT NULL REFERENCES targets(id),
                checked_at TEXT NOT NULL,
                status_code INTEGER NOT NULL DEFAULT 0,
                raw_text_len INTEGER NOT NULL DEFAULT 0,
                norm_text_len INTEGER NOT NULL DEFAULT 0,
                change_ratio REAL NOT NULL DEFAULT 0,
                changed_text INTEGER NOT NULL DEFAULT 0,
                changed_visual INTEGER NOT NULL DEFAULT 0,
                visual_distance INTEGER NOT NULL DEFAULT 0,
                diff_preview TEXT NOT NULL DEFAULT '',
                material_change INTEGER NOT NULL DEFAULT 0,
                severity TEXT NOT NULL DEFAULT 'none',
                summary TEXT NOT NULL DEFAULT '',
                changes_json TEXT NOT NULL DEFAULT '[]',
                note TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_check_results_target
                ON check_results(target_id, checked_at DESC);
            "#,
        )?;
        Ok(())
    }

    /// Insert a new target; intervals below the floor are clamped up
    pub fn insert_target(&self, new: &NewTarget) -> Result<Target, StorageError> {
        let interval = new.interval_minutes.max(MIN_INTERVAL_MINUTES);
        let selectors_json = serde_json::to_string(&new.selectors)?;
        let created_at = Utc::now();

        self.conn.execute(
            "INSERT INTO targets
                 (url, selectors, render_mode, interval_minutes, ignore_robots,
                  wait_selector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.url,
                selectors_json,
                new.render_mode.as_str(),
                interval,
                new.ignore_robots as i64,
                new.wait_selector,
                created_at.to_rfc3339(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get_target(id)?.ok_or(StorageError::TargetNotFound(id))
    }

    pub fn get_target(&self, id: TargetId) -> Result<Option<Target>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, selectors, render_mode, interval_minutes, is_active,
                    ignore_robots, wait_selector, last_text, last_text_hash,
                    last_visual_hash, last_blocks, last_checked_at, created_at
             FROM targets WHERE id = ?1",
        )?;

        let result = stmt.query_row(params![id], row_to_target);
        match result {
            Ok(target) => Ok(Some(target?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All targets, or only the active ones
    pub fn list_targets(&self, active_only: bool) -> Result<Vec<Target>, StorageError> {
        let sql = if active_only {
            "SELECT id, url, selectors, render_mode, interval_minutes, is_active,
                    ignore_robots, wait_selector, last_text, last_text_hash,
                    last_visual_hash, last_blocks, last_checked_at, created_at
             FROM targets WHERE is_active = 1 ORDER BY id"
        } else {
            "SELECT id, url, selectors, render_mode, interval_minutes, is_active,
                    ignore_robots, wait_selector, last_text, last_text_hash,
                    last_visual_hash, last_blocks, last_checked_at, created_at
             FROM targets ORDER BY id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_target)?;

        let mut targets = Vec::new();
        for row in rows {
            targets.push(row??);
        }
        Ok(targets)
    }

    pub fn set_active(&self, id: TargetId, active: bool) -> Result<(), StorageError> {
        let updated = self.conn.execute(
            "UPDATE targets SET is_active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        if updated == 0 {
            return Err(StorageError::TargetNotFound(id));
        }
        Ok(())
    }

    /// Delete a target and its check history
    pub fn delete_target(&mut self, id: TargetId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM check_results WHERE target_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        tx.commit()?;
        if deleted == 0 {
            return Err(StorageError::TargetNotFound(id));
        }
        Ok(())
    }

    /// Record one executed check and, for successful checks, install the new
    /// baseline in the same transaction.
    pub fn record_check(
        &mut self,
        target_id: TargetId,
        report: &CheckReport,
        baseline: Option<&BaselineUpdate>,
    ) -> Result<i64, StorageError> {
        let checked_at = baseline
            .map(|b| b.checked_at)
            .unwrap_or_else(Utc::now);

        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO check_results
                 (target_id, checked_at, status_code, raw_text_len, norm_text_len,
                  change_ratio, changed_text, changed_visual, visual_distance,
                  diff_preview, material_change, severity, summary, changes_json, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                target_id,
                checked_at.to_rfc3339(),
                report.status_code as i64,
                report.raw_text_len as i64,
                report.norm_text_len as i64,
                report.change_ratio,
                report.changed_text as i64,
                report.changed_visual as i64,
                report.visual_distance as i64,
                report.diff_preview,
                report.material_change as i64,
                report.severity.as_str(),
                report.summary,
                report.changes_json,
                report.note,
            ],
        )?;
        let check_id = tx.last_insert_rowid();

        if let Some(baseline) = baseline {
            let blocks_json = serde_json::to_string(&baseline.blocks)?;
            // u64 hash stored through an i64 bit-cast; read side reverses it
            let visual = baseline.visual_hash.map(|h| h as i64);
            let updated = tx.execute(
                "UPDATE targets
                 SET last_text = ?1,
                     last_text_hash = ?2,
                     last_visual_hash = COALESCE(?3, last_visual_hash),
                     last_blocks = ?4,
                     last_checked_at = ?5
                 WHERE id = ?6",
                params![
                    baseline.text,
                    baseline.text_hash,
                    visual,
                    blocks_json,
                    baseline.checked_at.to_rfc3339(),
                    target_id,
                ],
            )?;
            if updated == 0 {
                return Err(StorageError::TargetNotFound(target_id));
            }
        } else {
            tx.execute(
                "UPDATE targets SET last_checked_at = ?1 WHERE id = ?2",
                params![checked_at.to_rfc3339(), target_id],
            )?;
        }

        tx.commit()?;
        Ok(check_id)
    }

    /// Most recent checks for a target, newest first
    pub fn recent_results(
        &self,
        target_id: TargetId,
        limit: usize,
    ) -> Result<Vec<CheckRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, target_id, checked_at, status_code, raw_text_len, norm_text_len,
                    change_ratio, changed_text, changed_visual, visual_distance,
                    diff_preview, material_change, severity, summary, changes_json, note
             FROM check_results WHERE target_id = ?1
             ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![target_id, limit as i64], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Drop check results older than `days` and reclaim the space
    pub fn cleanup_old_results(&self, days: u32) -> Result<usize, StorageError> {
        // datetime() normalizes both sides; the RFC3339 'T' separator would
        // otherwise sort after SQLite's space-separated format
        let deleted = self.conn.execute(
            "DELETE FROM check_results
             WHERE datetime(checked_at) < datetime('now', ?1)",
            params![format!("-{} days", days)],
        )?;
        if deleted > 0 {
            self.conn.execute_batch("VACUUM;")?;
        }
        Ok(deleted)
    }
}

type TargetRow = Result<Target, StorageError>;

fn row_to_target(row: &Row) -> rusqlite::Result<TargetRow> {
    let selectors_json: String = row.get(2)?;
    let render_mode: String = row.get(3)?;
    let blocks_json: String = row.get(11)?;
    let last_checked_at: Option<String> = row.get(12)?;
    let created_at: String = row.get(13)?;
    let last_visual: Option<i64> = row.get(10)?;

    Ok(build_target(
        row.get(0)?,
        row.get(1)?,
        selectors_json,
        render_mode,
        row.get(4)?,
        row.get::<_, i64>(5)? != 0,
        row.get::<_, i64>(6)? != 0,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        last_visual,
        blocks_json,
        last_checked_at,
        created_at,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_target(
    id: TargetId,
    url: String,
    selectors_json: String,
    render_mode: String,
    interval_minutes: u32,
    is_active: bool,
    ignore_robots: bool,
    wait_selector: Option<String>,
    last_text: String,
    last_text_hash: Option<String>,
    last_visual: Option<i64>,
    blocks_json: String,
    last_checked_at: Option<String>,
    created_at: String,
) -> TargetRow {
    let selectors: Vec<String> = serde_json::from_str(&selectors_json)?;
    let last_blocks: Vec<ContentBlock> = serde_json::from_str(&blocks_json)?;
    Ok(Target {
        id,
        url,
        selectors,
        render_mode: RenderMode::parse(&render_mode),
        interval_minutes,
        is_active,
        ignore_robots,
        wait_selector,
        last_text,
        last_text_hash,
        last_visual_hash: last_visual.map(|v| v as u64),
        last_blocks,
        last_checked_at: last_checked_at.and_then(|s| parse_timestamp(&s)),
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
    })
}

type RecordRow = Result<CheckRecord, StorageError>;

fn row_to_record(row: &Row) -> rusqlite::Result<RecordRow> {
    let checked_at: String = row.get(2)?;
    let severity: String = row.get(12)?;
    Ok(Ok(CheckRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        checked_at: parse_timestamp(&checked_at).unwrap_or_else(Utc::now),
        report: CheckReport {
            status_code: row.get::<_, i64>(3)? as u16,
            raw_text_len: row.get::<_, i64>(4)? as usize,
            norm_text_len: row.get::<_, i64>(5)? as usize,
            change_ratio: row.get(6)?,
            changed_text: row.get::<_, i64>(7)? != 0,
            changed_visual: row.get::<_, i64>(8)? != 0,
            visual_distance: row.get::<_, i64>(9)? as u32,
            diff_preview: row.get(10)?,
            material_change: row.get::<_, i64>(11)? != 0,
            severity: Severity::parse(&severity),
            summary: row.get(13)?,
            changes_json: row.get(14)?,
            note: row.get(15)?,
        },
    }))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockKind;

    fn make_target(storage: &Storage) -> Target {
        storage
            .insert_target(&NewTarget {
                url: "https://example.com/pricing".to_string(),
                selectors: vec!["main .price".to_string()],
                render_mode: RenderMode::Static,
                interval_minutes: 30,
                ignore_robots: false,
                wait_selector: None,
            })
            .unwrap()
    }

    fn make_baseline(text: &str) -> BaselineUpdate {
        BaselineUpdate {
            text: text.to_string(),
            text_hash: crate::fingerprint::text_fingerprint(text),
            visual_hash: Some(0xDEAD_BEEF_DEAD_BEEF),
            blocks: vec![ContentBlock {
                kind: BlockKind::Paragraph,
                text: text.to_string(),
                path: "p:nth-of-type(1)".to_string(),
                weight: 4,
                hash: crate::fingerprint::text_fingerprint(text),
            }],
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_get_target() {
        let storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);

        let found = storage.get_target(target.id).unwrap().unwrap();
        assert_eq!(found.url, "https://example.com/pricing");
        assert_eq!(found.selectors, vec!["main .price".to_string()]);
        assert_eq!(found.interval_minutes, 30);
        assert!(found.is_active);
        assert!(found.last_text_hash.is_none());
    }

    #[test]
    fn test_interval_clamped_to_floor() {
        let storage = Storage::open_in_memory().unwrap();
        let target = storage
            .insert_target(&NewTarget {
                url: "https://example.com".to_string(),
                selectors: vec![],
                render_mode: RenderMode::Static,
                interval_minutes: 1,
                ignore_robots: false,
                wait_selector: None,
            })
            .unwrap();
        assert_eq!(target.interval_minutes, MIN_INTERVAL_MINUTES);
    }

    #[test]
    fn test_missing_target_is_none() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.get_target(999).unwrap().is_none());
    }

    #[test]
    fn test_set_active_and_list_filter() {
        let storage = Storage::open_in_memory().unwrap();
        let a = make_target(&storage);
        let _b = make_target(&storage);

        storage.set_active(a.id, false).unwrap();

        assert_eq!(storage.list_targets(false).unwrap().len(), 2);
        let active = storage.list_targets(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, a.id);
    }

    #[test]
    fn test_record_check_with_baseline_updates_target() {
        let mut storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);
        let baseline = make_baseline("hello baseline text");

        let report = CheckReport {
            status_code: 200,
            raw_text_len: 100,
            norm_text_len: 19,
            ..Default::default()
        };
        storage
            .record_check(target.id, &report, Some(&baseline))
            .unwrap();

        let after = storage.get_target(target.id).unwrap().unwrap();
        assert_eq!(after.last_text, "hello baseline text");
        assert_eq!(after.last_text_hash, Some(baseline.text_hash.clone()));
        assert_eq!(after.last_visual_hash, Some(0xDEAD_BEEF_DEAD_BEEF));
        assert_eq!(after.last_blocks.len(), 1);
        assert!(after.last_checked_at.is_some());

        let history = storage.recent_results(target.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].report.status_code, 200);
    }

    #[test]
    fn test_record_check_without_baseline_preserves_it() {
        let mut storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);
        storage
            .record_check(target.id, &CheckReport::default(), Some(&make_baseline("v1")))
            .unwrap();

        // failed check: note only, no baseline argument
        let report = CheckReport::with_note("fetch failed: HTTP status 503");
        storage.record_check(target.id, &report, None).unwrap();

        let after = storage.get_target(target.id).unwrap().unwrap();
        assert_eq!(after.last_text, "v1");

        let history = storage.recent_results(target.id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].report.note, "fetch failed: HTTP status 503");
    }

    #[test]
    fn test_missing_screenshot_keeps_visual_hash() {
        let mut storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);
        storage
            .record_check(target.id, &CheckReport::default(), Some(&make_baseline("v1")))
            .unwrap();

        let mut without_visual = make_baseline("v2");
        without_visual.visual_hash = None;
        storage
            .record_check(target.id, &CheckReport::default(), Some(&without_visual))
            .unwrap();

        let after = storage.get_target(target.id).unwrap().unwrap();
        assert_eq!(after.last_text, "v2");
        assert_eq!(after.last_visual_hash, Some(0xDEAD_BEEF_DEAD_BEEF));
    }

    #[test]
    fn test_visual_hash_survives_msb_roundtrip() {
        let mut storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);
        let mut baseline = make_baseline("v1");
        baseline.visual_hash = Some(u64::MAX);
        storage
            .record_check(target.id, &CheckReport::default(), Some(&baseline))
            .unwrap();

        let after = storage.get_target(target.id).unwrap().unwrap();
        assert_eq!(after.last_visual_hash, Some(u64::MAX));
    }

    #[test]
    fn test_delete_target_removes_history() {
        let mut storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);
        storage
            .record_check(target.id, &CheckReport::default(), Some(&make_baseline("v1")))
            .unwrap();

        storage.delete_target(target.id).unwrap();
        assert!(storage.get_target(target.id).unwrap().is_none());
        assert!(storage.recent_results(target.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_old_results() {
        let mut storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);
        storage
            .record_check(target.id, &CheckReport::default(), None)
            .unwrap();

        // backdate the row past the retention window
        storage
            .conn
            .execute(
                "UPDATE check_results SET checked_at = datetime('now', '-60 days')",
                [],
            )
            .unwrap();

        let deleted = storage.cleanup_old_results(30).unwrap();
        assert_eq!(deleted, 1);
        assert!(storage.recent_results(target.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_handles_rfc3339_timestamps_on_cutoff_day() {
        let mut storage = Storage::open_in_memory().unwrap();
        let target = make_target(&storage);
        storage
            .record_check(target.id, &CheckReport::default(), None)
            .unwrap();

        // backdate to just past the cutoff, in the stored RFC3339 format
        let old = (Utc::now() - chrono::Duration::days(30) - chrono::Duration::minutes(10))
            .to_rfc3339();
        storage
            .conn
            .execute("UPDATE check_results SET checked_at = ?1", params![old])
            .unwrap();

        let deleted = storage.cleanup_old_results(30).unwrap();
        assert_eq!(deleted, 1);
    }
}
