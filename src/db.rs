//! Durable event journal and accepted translations on PostgreSQL.
//!
//! The engine keeps its working state in memory; this module records what
//! happened so the rest of the platform can read it back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::ReviewEvent;
use crate::model::UnitKey;

/// Row of the `accepted_translations` table
#[derive(Debug, Clone)]
pub struct StoredTranslation {
    pub unit: UnitKey,
    pub text: String,
    pub author: String,
    pub via: String,
    pub accepted_at: DateTime<Utc>,
}

/// Row of the `review_events` table
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and create tables
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS review_events (
                id BIGSERIAL PRIMARY KEY,
                kind TEXT NOT NULL,
                project TEXT NOT NULL,
                component TEXT NOT NULL,
                language TEXT NOT NULL,
                string_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("Failed to create review_events table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accepted_translations (
                project TEXT NOT NULL,
                component TEXT NOT NULL,
                language TEXT NOT NULL,
                string_id TEXT NOT NULL,
                text TEXT NOT NULL,
                author TEXT NOT NULL,
                via TEXT NOT NULL,
                accepted_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (project, component, language, string_id)
            )",
        )
        .execute(&pool)
        .await
        .context("Failed to create accepted_translations table")?;

        info!("✓ Database ready");
        Ok(Self { pool })
    }

    /// Append an event to the journal, and keep `accepted_translations`
    /// current when the event changes a unit's translation.
    pub async fn record_event(&self, event: &ReviewEvent) -> Result<i64> {
        let payload = serde_json::to_string(event).context("Failed to serialize event")?;
        let unit = event.unit();

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let id: i64 = sqlx::query(
            "INSERT INTO review_events (kind, project, component, language, string_id, payload, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(event.kind())
        .bind(&unit.project)
        .bind(&unit.component)
        .bind(&unit.language)
        .bind(&unit.string_id)
        .bind(&payload)
        .bind(event.occurred_at())
        .fetch_one(&mut *tx)
        .await
        .context("Failed to record event")?
        .get(0);

        if let Some(translation) = accepted_translation(event) {
            sqlx::query(
                "INSERT INTO accepted_translations (project, component, language, string_id, text, author, via, accepted_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (project, component, language, string_id)
                 DO UPDATE SET text = EXCLUDED.text, author = EXCLUDED.author,
                               via = EXCLUDED.via, accepted_at = EXCLUDED.accepted_at",
            )
            .bind(&translation.unit.project)
            .bind(&translation.unit.component)
            .bind(&translation.unit.language)
            .bind(&translation.unit.string_id)
            .bind(&translation.text)
            .bind(&translation.author)
            .bind(&translation.via)
            .bind(translation.accepted_at)
            .execute(&mut *tx)
            .await
            .context("Failed to store accepted translation")?;
        }

        tx.commit().await.context("Failed to commit event")?;
        Ok(id)
    }

    /// Latest accepted translation of a unit
    pub async fn get_accepted_translation(&self, unit: &UnitKey) -> Result<Option<StoredTranslation>> {
        let row = sqlx::query(
            "SELECT text, author, via, accepted_at FROM accepted_translations
             WHERE project = $1 AND component = $2 AND language = $3 AND string_id = $4",
        )
        .bind(&unit.project)
        .bind(&unit.component)
        .bind(&unit.language)
        .bind(&unit.string_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load accepted translation")?;

        Ok(row.map(|row| StoredTranslation {
            unit: unit.clone(),
            text: row.get("text"),
            author: row.get("author"),
            via: row.get("via"),
            accepted_at: row.get("accepted_at"),
        }))
    }

    /// Most recent journal entries for a unit, newest first
    pub async fn recent_events(&self, unit: &UnitKey, limit: i64) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            "SELECT id, kind, payload, occurred_at FROM review_events
             WHERE project = $1 AND component = $2 AND language = $3 AND string_id = $4
             ORDER BY id DESC
             LIMIT $5",
        )
        .bind(&unit.project)
        .bind(&unit.component)
        .bind(&unit.language)
        .bind(&unit.string_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load events")?;

        Ok(rows
            .into_iter()
            .map(|row| StoredEvent {
                id: row.get("id"),
                kind: row.get("kind"),
                payload: row.get("payload"),
                occurred_at: row.get("occurred_at"),
            })
            .collect())
    }
}

/// The translation an event puts in place, if it puts one in place
fn accepted_translation(event: &ReviewEvent) -> Option<StoredTranslation> {
    match event {
        ReviewEvent::SuggestionAccepted {
            unit,
            author,
            text,
            via,
            at,
            ..
        } => Some(StoredTranslation {
            unit: unit.clone(),
            text: text.clone(),
            author: author.clone(),
            via: serde_json::to_value(via)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            accepted_at: *at,
        }),
        ReviewEvent::TranslationSaved {
            unit,
            author,
            text,
            at,
        } => Some(StoredTranslation {
            unit: unit.clone(),
            text: text.clone(),
            author: author.clone(),
            via: "direct_save".to_string(),
            accepted_at: *at,
        }),
        _ => None,
    }
}

/// Persist every broadcast event until the channel closes.
pub fn spawn_event_recorder(
    db: Database,
    mut events: broadcast::Receiver<ReviewEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = db.record_event(&event).await {
                        error!("Failed to journal {} event: {:#}", event.kind(), e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event journal fell behind, {} events not recorded", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event channel closed, journal stopping");
                    break;
                }
            }
        }
    })
}
