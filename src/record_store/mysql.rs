//! MySQL-backed record store

use super::RecordStore;
use crate::camera_registry::Camera;
use crate::error::{Error, Result};
use crate::risk_engine::{CountData, CountSnapshot, MeanCountData, Report, RiskLabel, ViolatorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS cameras (
        camera_id VARCHAR(64) PRIMARY KEY,
        urn VARCHAR(255) NOT NULL,
        name VARCHAR(255) NOT NULL,
        address VARCHAR(512) NULL,
        login VARCHAR(255) NULL,
        password VARCHAR(255) NULL,
        focal_length DOUBLE NULL,
        shoulder_length DOUBLE NULL,
        threshold DOUBLE NULL,
        need_auth BOOLEAN NOT NULL DEFAULT FALSE,
        created_at DATETIME(3) NOT NULL,
        updated_at DATETIME(3) NOT NULL,
        UNIQUE KEY uq_cameras_urn (urn)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS violators (
        record_id VARCHAR(64) PRIMARY KEY,
        camera_id VARCHAR(64) NOT NULL,
        entity_id VARCHAR(64) NOT NULL,
        type VARCHAR(16) NOT NULL,
        score DOUBLE NOT NULL,
        contact JSON NOT NULL,
        created_at DATETIME(3) NOT NULL,
        KEY idx_violators_camera (camera_id, created_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        report_id VARCHAR(64) PRIMARY KEY,
        camera_id VARCHAR(64) NOT NULL,
        type VARCHAR(16) NOT NULL,
        entities JSON NOT NULL,
        violators JSON NOT NULL,
        violator_records JSON NOT NULL,
        mean_distance DOUBLE NULL,
        reported_at BIGINT NOT NULL,
        KEY idx_reports_camera (camera_id, reported_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS counts (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        camera_id VARCHAR(64) NOT NULL,
        name VARCHAR(255) NOT NULL,
        p2p TEXT NOT NULL,
        factors TEXT NOT NULL,
        score DOUBLE NOT NULL,
        label VARCHAR(16) NOT NULL,
        notif_message VARCHAR(512) NULL,
        created_at DATETIME(3) NOT NULL,
        KEY idx_counts_notif (notif_message(1), created_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mean_counts (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        camera_id VARCHAR(64) NOT NULL,
        name VARCHAR(255) NOT NULL,
        p2p TEXT NOT NULL,
        factors TEXT NOT NULL,
        score DOUBLE NOT NULL,
        label VARCHAR(16) NOT NULL,
        created_at DATETIME(3) NOT NULL
    )
    "#,
];

/// MySQL record store
pub struct MySqlRecordStore {
    pool: MySqlPool,
}

impl MySqlRecordStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create tables that do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        tracing::info!("Record store schema ready");
        Ok(())
    }

    async fn insert_count(
        &self,
        table: &str,
        count: &CountData,
        notif_message: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let p2p = serde_json::to_string(&count.p2p)?;
        let factors = serde_json::to_string(&count.factors)?;

        if table == "counts" {
            sqlx::query(
                r#"
                INSERT INTO counts
                    (camera_id, name, p2p, factors, score, label, notif_message, created_at)
                VALUES
                    (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&count.camera_id)
            .bind(&count.name)
            .bind(p2p)
            .bind(factors)
            .bind(count.score)
            .bind(count.label.as_str())
            .bind(notif_message)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO mean_counts
                    (camera_id, name, p2p, factors, score, label, created_at)
                VALUES
                    (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&count.camera_id)
            .bind(&count.name)
            .bind(p2p)
            .bind(factors)
            .bind(count.score)
            .bind(count.label.as_str())
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MySqlRecordStore {
    async fn load_cameras(&self) -> Result<Vec<Camera>> {
        let cameras = sqlx::query_as::<_, Camera>(
            r#"
            SELECT
                camera_id, urn, name, address, login, password,
                focal_length, shoulder_length, threshold, need_auth,
                created_at, updated_at
            FROM cameras
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(cameras)
    }

    async fn save_camera(&self, camera: &Camera) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cameras
                (camera_id, urn, name, address, login, password,
                 focal_length, shoulder_length, threshold, need_auth, created_at, updated_at)
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                name = VALUES(name),
                address = VALUES(address),
                login = VALUES(login),
                password = VALUES(password),
                focal_length = VALUES(focal_length),
                shoulder_length = VALUES(shoulder_length),
                threshold = VALUES(threshold),
                need_auth = VALUES(need_auth),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(&camera.camera_id)
        .bind(&camera.urn)
        .bind(&camera.name)
        .bind(&camera.address)
        .bind(&camera.login)
        .bind(&camera.password)
        .bind(camera.focal_length)
        .bind(camera.shoulder_length)
        .bind(camera.threshold)
        .bind(camera.need_auth)
        .bind(camera.created_at)
        .bind(camera.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn save_violator(&self, violator: &ViolatorRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO violators
                (record_id, camera_id, entity_id, type, score, contact, created_at)
            VALUES
                (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&violator.record_id)
        .bind(&violator.camera_id)
        .bind(&violator.entity_id)
        .bind(violator.violation.as_str())
        .bind(violator.score)
        .bind(serde_json::to_string(&violator.contact)?)
        .bind(violator.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn save_report(&self, report: &Report) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reports
                (report_id, camera_id, type, entities, violators, violator_records,
                 mean_distance, reported_at)
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.report_id)
        .bind(&report.camera_id)
        .bind(report.violation.as_str())
        .bind(serde_json::to_string(&report.entities)?)
        .bind(serde_json::to_string(&report.violators)?)
        .bind(serde_json::to_string(&report.violator_records)?)
        .bind(report.mean_distance)
        .bind(report.reported_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn save_count(&self, snapshot: &CountSnapshot) -> Result<()> {
        self.insert_count(
            "counts",
            &snapshot.count,
            snapshot.notif_message.as_deref(),
            snapshot.created_at,
        )
        .await
    }

    async fn save_mean(&self, mean: &MeanCountData) -> Result<()> {
        self.insert_count("mean_counts", mean, None, Utc::now()).await
    }

    async fn list_notifications(
        &self,
        camera_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CountSnapshot>> {
        let rows = match camera_id {
            Some(id) => {
                sqlx::query_as::<_, CountRow>(
                    r#"
                    SELECT camera_id, name, p2p, factors, score, label, notif_message, created_at
                    FROM counts
                    WHERE notif_message IS NOT NULL AND camera_id = ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, CountRow>(
                    r#"
                    SELECT camera_id, name, p2p, factors, score, label, notif_message, created_at
                    FROM counts
                    WHERE notif_message IS NOT NULL
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.into_iter().map(CountSnapshot::try_from).collect()
    }
}

/// counts row mapping
#[derive(sqlx::FromRow)]
struct CountRow {
    camera_id: String,
    name: String,
    p2p: String,
    factors: String,
    score: f64,
    label: String,
    notif_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CountRow> for CountSnapshot {
    type Error = Error;

    fn try_from(row: CountRow) -> Result<Self> {
        Ok(Self {
            count: CountData {
                camera_id: row.camera_id,
                name: row.name,
                p2p: serde_json::from_str(&row.p2p)?,
                factors: serde_json::from_str(&row.factors)?,
                score: row.score,
                label: RiskLabel::from(row.label.as_str()),
            },
            notif_message: row.notif_message,
            created_at: row.created_at,
        })
    }
}
