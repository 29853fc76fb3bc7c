use clap::Args;

/// Watchloop scheduling and behaviour.
#[derive(Args, Debug, Clone)]
pub struct WatchloopArgs {
    #[arg(long, env = "WATCHLOOP_ENABLED", default_value_t = true)]
    pub watchloop_enabled: bool,

    #[arg(long, env = "WATCHLOOP_INTERVAL_SECONDS", default_value_t = 30)]
    pub watchloop_interval_seconds: u64,
}

/// Approval gating and auto-remediation behaviour.
#[derive(Args, Debug, Clone)]
pub struct ApprovalArgs {
    #[arg(long, env = "APPROVAL_TIMEOUT_SECONDS", default_value_t = 300)]
    pub approval_timeout_seconds: u64,

    #[arg(long, env = "AUTO_REMEDIATION_ENABLED", default_value_t = false)]
    pub auto_remediation_enabled: bool,

    #[arg(long, env = "AIOPS_NOTIFICATION_CHANNEL", default_value = "slack:ops-alerts")]
    pub aiops_notification_channel: String,
}

/// Alertmanager webhook verification.
#[derive(Args, Debug, Clone)]
pub struct AlertIngressArgs {
    #[arg(long, env = "ALERTMANAGER_WEBHOOK_SECRET")]
    pub alertmanager_webhook_secret: Option<String>,

    #[arg(long, env = "ALERTMANAGER_WEBHOOK_HEADER", default_value = "X-Hub-Signature-256")]
    pub alertmanager_webhook_header: String,

    #[arg(long, env = "ALERTMANAGER_TIMESTAMP_HEADER")]
    pub alertmanager_timestamp_header: Option<String>,
}

/// HTTP surface (webhook + healthz/readyz/metrics).
#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    #[arg(long, env = "HTTP_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub http_bind_addr: String,
}

/// Redis connection settings for the approval/KV store backend.
#[derive(Args, Debug, Clone)]
pub struct RedisArgs {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,
}

/// Postgres connection settings for the durable event store backend.
#[derive(Args, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "127.0.0.1")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_USER", default_value = "aiops")]
    pub postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "")]
    pub postgres_password: String,

    #[arg(long, env = "POSTGRES_DBNAME", default_value = "aiops")]
    pub postgres_dbname: String,
}

/// Top-level configuration, aggregated from the argument groups above.
#[derive(Args, Debug, Clone)]
pub struct Config {
    #[command(flatten)]
    pub watchloop: WatchloopArgs,

    #[command(flatten)]
    pub approval: ApprovalArgs,

    #[command(flatten)]
    pub ingress: AlertIngressArgs,

    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub redis: RedisArgs,

    #[command(flatten)]
    pub postgres: PostgresArgs,
}
