//! Agent Storage
//!
//! The tutoring agent keeps its own SQLite file, separate from the user
//! database: one JSON state row per session and the learner memories.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use grammar_tutor_core::{session_store::StateRepository, state::TutorState};
use sqlx::{Row, SqlitePool};

use crate::{db::connect_sqlite, models::UserMemory};

#[derive(Clone)]
pub struct AgentStore {
    pool: SqlitePool,
}

impl AgentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(connect_sqlite(url).await?))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations/agent").run(&self.pool).await?;
        Ok(())
    }

    pub async fn add_memories(&self, user_id: i64, memories: &[String]) -> Result<()> {
        if memories.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for memory in memories {
            sqlx::query("INSERT INTO agent_memories (user_id, memory, created_at) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(memory)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All memories stored for a user, oldest first.
    pub async fn list_memories(&self, user_id: i64) -> Result<Vec<UserMemory>> {
        let memories = sqlx::query_as::<_, UserMemory>(
            "SELECT id, memory, created_at FROM agent_memories WHERE user_id = ? ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(memories)
    }
}

#[async_trait]
impl StateRepository for AgentStore {
    async fn load_state(&self, session_id: &str) -> Result<Option<TutorState>> {
        let row = sqlx::query("SELECT state_json FROM agent_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let state_json: String = row.try_get("state_json")?;
                let state = serde_json::from_str(&state_json)
                    .with_context(|| format!("Corrupt state for session '{}'", session_id))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save_state(&self, session_id: &str, state: &TutorState) -> Result<()> {
        let state_json = serde_json::to_string(state)?;
        let user_id = state.profile.as_ref().map(|p| p.user_id);
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO agent_sessions (session_id, user_id, state_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (session_id) DO UPDATE SET
                user_id = excluded.user_id,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(state_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
