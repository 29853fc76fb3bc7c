use crate::traits::EventStore;
use aiops_common::{Error, Result};
use aiops_types::ClusterEvent;
use async_trait::async_trait;
use deadpool_postgres::Pool;

/// Durable event sink backed by Postgres. One row per normalized event.
pub struct PostgresEventStore {
    pool: Pool,
}

impl PostgresEventStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                resource_kind TEXT NOT NULL,
                resource_namespace TEXT NOT NULL,
                resource_name TEXT NOT NULL,
                message TEXT NOT NULL,
                labels JSONB NOT NULL,
                detected_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: &ClusterEvent) -> Result<()> {
        let conn = self.pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
        let labels = serde_json::to_value(&event.labels)?;
        let event_type_json = serde_json::to_string(&event.event_type)?;
        let event_type = event_type_json.trim_matches('"').to_string();
        let severity = event.severity.to_string();
        conn.execute(
            "INSERT INTO events (event_type, severity, resource_kind, resource_namespace, resource_name, message, labels, detected_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &event_type,
                &severity,
                &event.resource.kind,
                &event.resource.namespace,
                &event.resource.name,
                &event.message,
                &labels,
                &event.detected_at,
            ],
        )
        .await?;
        Ok(())
    }
}
