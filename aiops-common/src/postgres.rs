use crate::config::PostgresArgs;
use crate::error::{Error, Result};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

/// Builds a connection pool from `PostgresArgs`, the way the rest of this
/// codebase's `postgres.rs` helpers do it, minus TLS (the control plane talks
/// to a same-cluster Postgres over a trusted network).
pub fn create_pool(args: &PostgresArgs) -> Result<Pool> {
    let mut cfg = PgConfig::new();
    cfg.host = Some(args.postgres_host.clone());
    cfg.port = Some(args.postgres_port);
    cfg.user = Some(args.postgres_user.clone());
    cfg.password = Some(args.postgres_password.clone());
    cfg.dbname = Some(args.postgres_dbname.clone());
    cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|err| Error::Internal(format!("failed to build postgres pool: {err}")))
}
