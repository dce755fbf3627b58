use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::types::{InspectionRecord, InspectionSummary};
use crate::inspection::{InspectionReport, Verdict};

/// SQLite store of past inspections. Records are written once and never
/// updated.
/// All operations are synchronous (rusqlite is blocking).
/// Callers in async contexts should use `tokio::task::spawn_blocking`.
pub struct InspectionHistory {
    conn: Connection,
}

impl InspectionHistory {
    /// Create or open the history database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create data dir: {}", e))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| format!("Failed to open history db: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS inspections (
                inspection_id TEXT PRIMARY KEY,
                sample_id TEXT NOT NULL,
                board_name TEXT NOT NULL,
                side TEXT NOT NULL,
                verdict TEXT NOT NULL,
                similarity_score REAL NOT NULL,
                created_at TEXT NOT NULL,
                report_json TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| format!("Failed to create table: {}", e))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_inspections_sample ON inspections(sample_id)",
            [],
        )
        .map_err(|e| format!("Failed to create sample index: {}", e))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_inspections_created ON inspections(created_at DESC)",
            [],
        )
        .map_err(|e| format!("Failed to create date index: {}", e))?;

        info!("Opened inspection history database at {:?}", db_path);
        Ok(Self { conn })
    }

    /// Store a finished report.
    pub fn record_inspection(&self, report: &InspectionReport) -> Result<(), String> {
        let report_json = serde_json::to_string(report)
            .map_err(|e| format!("Failed to serialize report: {}", e))?;

        self.conn
            .execute(
                "INSERT INTO inspections
                 (inspection_id, sample_id, board_name, side, verdict, similarity_score, created_at, report_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    report.inspection_id,
                    report.sample_id,
                    report.board_name,
                    report.side.as_str(),
                    report.verdict.as_str(),
                    report.similarity_score,
                    report.timestamp.to_rfc3339(),
                    report_json
                ],
            )
            .map_err(|e| format!("Failed to insert inspection: {}", e))?;

        info!(
            "Recorded inspection {} for sample {}",
            report.inspection_id, report.sample_id
        );
        Ok(())
    }

    /// Inspections newest first, optionally for one sample only.
    pub fn list_inspections(
        &self,
        sample_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InspectionSummary>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT inspection_id, sample_id, board_name, side, verdict, similarity_score, created_at
             FROM inspections
             WHERE ?1 IS NULL OR sample_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
            )
            .map_err(|e| format!("Failed to prepare query: {}", e))?;

        let rows = stmt
            .query_map(params![sample_id, limit as i64], summary_from_row)
            .map_err(|e| format!("Failed to query inspections: {}", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Failed to collect inspections: {}", e))
    }

    /// Full record for one inspection.
    pub fn get_inspection(&self, inspection_id: &str) -> Result<InspectionRecord, String> {
        let row = self
            .conn
            .query_row(
                "SELECT inspection_id, sample_id, board_name, side, verdict, similarity_score, created_at, report_json
             FROM inspections WHERE inspection_id = ?1",
                params![inspection_id],
                |row| Ok((summary_from_row(row)?, row.get::<_, String>(7)?)),
            )
            .optional()
            .map_err(|e| format!("Failed to query inspection: {}", e))?;

        let (summary, report_json) =
            row.ok_or_else(|| format!("Inspection not found: {}", inspection_id))?;
        let report = serde_json::from_str(&report_json)
            .map_err(|e| format!("Stored report for {} is corrupt: {}", inspection_id, e))?;
        Ok(InspectionRecord { summary, report })
    }
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InspectionSummary> {
    let verdict: String = row.get(4)?;
    let verdict = verdict.parse::<Verdict>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(InspectionSummary {
        inspection_id: row.get(0)?,
        sample_id: row.get(1)?,
        board_name: row.get(2)?,
        side: row.get(3)?,
        verdict,
        similarity_score: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspection::Severity;
    use crate::samples::BoardSide;
    use chrono::{Duration, Local};
    use tempfile::TempDir;

    fn create_test_store() -> (InspectionHistory, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = InspectionHistory::new(&dir.path().join("inspections.db")).unwrap();
        (store, dir)
    }

    fn report(id: &str, sample: &str, minutes_ago: i64, verdict: Verdict) -> InspectionReport {
        InspectionReport {
            inspection_id: id.to_string(),
            sample_id: sample.to_string(),
            board_name: "X1".to_string(),
            side: BoardSide::Front,
            timestamp: Local::now() - Duration::minutes(minutes_ago),
            candidate_path: None,
            alignment: None,
            alignment_error: None,
            similarity_score: 0.97,
            difference_percentage: 0.4,
            comparison_passed: true,
            total_regions: 0,
            regions: Vec::new(),
            defects: Vec::new(),
            severity: Severity::None,
            ai_analysis: None,
            ai_error: None,
            verdict,
            confidence: 0.97,
            recommendations: vec!["Board passes inspection - no defects detected".to_string()],
        }
    }

    #[test]
    fn test_record_and_get_inspection() {
        let (store, _dir) = create_test_store();
        let original = report("insp_1", "sample_a", 0, Verdict::Pass);
        store.record_inspection(&original).unwrap();

        let record = store.get_inspection("insp_1").unwrap();
        assert_eq!(record.summary.verdict, Verdict::Pass);
        assert_eq!(record.summary.side, "front");
        assert_eq!(record.report.inspection_id, original.inspection_id);
        assert_eq!(record.report.recommendations, original.recommendations);
        assert_eq!(record.report.timestamp, original.timestamp);
    }

    #[test]
    fn test_records_are_insert_only() {
        let (store, _dir) = create_test_store();
        let original = report("insp_1", "sample_a", 0, Verdict::Pass);
        store.record_inspection(&original).unwrap();

        let result = store.record_inspection(&report("insp_1", "sample_a", 0, Verdict::Fail));
        assert!(result.is_err());
        assert_eq!(store.get_inspection("insp_1").unwrap().summary.verdict, Verdict::Pass);
    }

    #[test]
    fn test_list_inspections_newest_first() {
        let (store, _dir) = create_test_store();
        store
            .record_inspection(&report("insp_old", "sample_a", 30, Verdict::Fail))
            .unwrap();
        store
            .record_inspection(&report("insp_new", "sample_a", 1, Verdict::Pass))
            .unwrap();
        store
            .record_inspection(&report("insp_other", "sample_b", 10, Verdict::Uncertain))
            .unwrap();

        let for_a: Vec<_> = store
            .list_inspections(Some("sample_a"), 50)
            .unwrap()
            .into_iter()
            .map(|s| s.inspection_id)
            .collect();
        assert_eq!(for_a, vec!["insp_new", "insp_old"]);

        let all = store.list_inspections(None, 50).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].inspection_id, "insp_other");

        assert_eq!(store.list_inspections(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_list_inspections_empty() {
        let (store, _dir) = create_test_store();
        assert!(store.list_inspections(Some("nothing"), 10).unwrap().is_empty());
    }

    #[test]
    fn test_get_inspection_not_found() {
        let (store, _dir) = create_test_store();
        let result = store.get_inspection("insp_missing");
        assert!(result.unwrap_err().contains("Inspection not found"));
    }
}
