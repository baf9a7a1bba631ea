use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::job::{EvaluationUnit, Job, JobStatus, UnitStatus, UnitUpdate};
use crate::models::persona::{PersonaChanges, PersonaProfile};
use crate::store::{AnalysisStore, NewJob, PersonaDirectory};

// ────────────────────────────────────────────────────────────────────────────
// Rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: Uuid,
    file_name: String,
    document_text: String,
    persona_ids: Vec<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            file_name: row.file_name,
            document_text: row.document_text,
            persona_ids: row.persona_ids,
            status: row
                .status
                .parse::<JobStatus>()
                .with_context(|| format!("job {} has a corrupt status", row.id))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct UnitRow {
    job_id: Uuid,
    persona_id: String,
    status: String,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<UnitRow> for EvaluationUnit {
    type Error = anyhow::Error;

    fn try_from(row: UnitRow) -> Result<Self> {
        let status = row.status.parse::<UnitStatus>().with_context(|| {
            format!("unit ({}, {}) has a corrupt status", row.job_id, row.persona_id)
        })?;
        let result = row
            .result
            .map(serde_json::from_value)
            .transpose()
            .with_context(|| {
                format!("unit ({}, {}) has a corrupt result", row.job_id, row.persona_id)
            })?;
        Ok(EvaluationUnit {
            job_id: row.job_id,
            persona_id: row.persona_id,
            status,
            result,
            error: row.error,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct PersonaRow {
    id: String,
    name: String,
    role: String,
    profile: Value,
}

impl From<PersonaRow> for PersonaProfile {
    fn from(row: PersonaRow) -> Self {
        PersonaProfile {
            id: row.id,
            name: row.name,
            role: row.role,
            profile: row.profile,
        }
    }
}

const UNIT_COLUMNS: &str = "job_id, persona_id, status, result, error, created_at, completed_at";

// ────────────────────────────────────────────────────────────────────────────
// Jobs and units
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, file_name, document_text, persona_ids, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&job.file_name)
        .bind(&job.document_text)
        .bind(&job.persona_ids)
        .bind(JobStatus::Uploaded.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        // evaluation_units rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_units(&self, job_id: Uuid, persona_ids: &[String]) -> Result<Vec<EvaluationUnit>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM evaluation_units WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        let mut units = Vec::with_capacity(persona_ids.len());
        for (position, persona_id) in persona_ids.iter().enumerate() {
            let row = sqlx::query_as::<_, UnitRow>(&format!(
                r#"
                INSERT INTO evaluation_units (job_id, persona_id, position, status)
                VALUES ($1, $2, $3, $4)
                RETURNING {UNIT_COLUMNS}
                "#
            ))
            .bind(job_id)
            .bind(persona_id)
            .bind(position as i32)
            .bind(UnitStatus::Pending.as_str())
            .fetch_one(&mut *tx)
            .await?;
            units.push(EvaluationUnit::try_from(row)?);
        }

        tx.commit().await?;
        info!("Created {} evaluation units for job {job_id}", units.len());
        Ok(units)
    }

    async fn set_unit_status(&self, job_id: Uuid, persona_id: &str, update: UnitUpdate) -> Result<()> {
        let status = update.status();
        let (result, error) = match update {
            UnitUpdate::Running => (None, None),
            UnitUpdate::Completed(result) => (
                Some(serde_json::to_value(&result).context("Failed to serialize evaluation result")?),
                None,
            ),
            UnitUpdate::Failed(error) => (None, Some(error)),
        };

        let affected = sqlx::query(
            r#"
            UPDATE evaluation_units
            SET status = $3,
                result = $4,
                error = $5,
                completed_at = CASE WHEN $6 THEN now() ELSE NULL END
            WHERE job_id = $1 AND persona_id = $2
            "#,
        )
        .bind(job_id)
        .bind(persona_id)
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            bail!("Unit ({job_id}, {persona_id}) does not exist");
        }
        Ok(())
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        let affected = sqlx::query("UPDATE jobs SET status = $2, updated_at = now() WHERE id = $1")
            .bind(job_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(anyhow!("Job {job_id} does not exist"));
        }
        Ok(())
    }

    async fn get_unit(&self, job_id: Uuid, persona_id: &str) -> Result<Option<EvaluationUnit>> {
        sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM evaluation_units WHERE job_id = $1 AND persona_id = $2"
        ))
        .bind(job_id)
        .bind(persona_id)
        .fetch_optional(&self.pool)
        .await?
        .map(EvaluationUnit::try_from)
        .transpose()
    }

    async fn get_units_for_job(&self, job_id: Uuid) -> Result<Vec<EvaluationUnit>> {
        sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM evaluation_units WHERE job_id = $1 ORDER BY position"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(EvaluationUnit::try_from)
        .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Personas
// ────────────────────────────────────────────────────────────────────────────

/// Counts from a system persona reload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub loaded: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct PgPersonaDirectory {
    pool: PgPool,
}

impl PgPersonaDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts `personas` as system personas and deletes system personas not in the set.
    pub async fn sync_system_personas(&self, personas: &[PersonaProfile]) -> Result<SyncReport> {
        let mut tx = self.pool.begin().await?;

        for persona in personas {
            sqlx::query(
                r#"
                INSERT INTO personas (id, name, role, is_system, profile)
                VALUES ($1, $2, $3, TRUE, $4)
                ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    role = EXCLUDED.role,
                    profile = EXCLUDED.profile,
                    updated_at = now()
                "#,
            )
            .bind(&persona.id)
            .bind(&persona.name)
            .bind(&persona.role)
            .bind(&persona.profile)
            .execute(&mut *tx)
            .await?;
        }

        let loaded_ids: Vec<String> = personas.iter().map(|p| p.id.clone()).collect();
        let removed = sqlx::query("DELETE FROM personas WHERE is_system AND NOT (id = ANY($1))")
            .bind(&loaded_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(SyncReport {
            loaded: personas.len(),
            removed: removed as usize,
        })
    }
}

#[async_trait]
impl PersonaDirectory for PgPersonaDirectory {
    async fn resolve(&self, persona_id: &str) -> Result<Option<PersonaProfile>> {
        Ok(sqlx::query_as::<_, PersonaRow>(
            "SELECT id, name, role, profile FROM personas WHERE id = $1",
        )
        .bind(persona_id)
        .fetch_optional(&self.pool)
        .await?
        .map(PersonaProfile::from))
    }

    async fn list(&self) -> Result<Vec<PersonaProfile>> {
        Ok(sqlx::query_as::<_, PersonaRow>(
            "SELECT id, name, role, profile FROM personas ORDER BY is_system DESC, name",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PersonaProfile::from)
        .collect())
    }

    async fn create(&self, persona: PersonaProfile) -> Result<Option<PersonaProfile>> {
        let row = sqlx::query_as::<_, PersonaRow>(
            r#"
            INSERT INTO personas (id, name, role, is_system, profile)
            VALUES ($1, $2, $3, FALSE, $4)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, name, role, profile
            "#,
        )
        .bind(&persona.id)
        .bind(&persona.name)
        .bind(&persona.role)
        .bind(&persona.profile)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            info!("Created custom persona {}", persona.id);
        }
        Ok(row.map(PersonaProfile::from))
    }

    async fn update(&self, persona_id: &str, changes: PersonaChanges) -> Result<Option<PersonaProfile>> {
        Ok(sqlx::query_as::<_, PersonaRow>(
            r#"
            UPDATE personas
            SET name = COALESCE($2, name),
                role = COALESCE($3, role),
                profile = $4,
                updated_at = now()
            WHERE id = $1
            RETURNING id, name, role, profile
            "#,
        )
        .bind(persona_id)
        .bind(changes.name)
        .bind(changes.role)
        .bind(changes.profile)
        .fetch_optional(&self.pool)
        .await?
        .map(PersonaProfile::from))
    }

    async fn delete(&self, persona_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM personas WHERE id = $1")
            .bind(persona_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
