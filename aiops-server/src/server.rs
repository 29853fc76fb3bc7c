use aiops_common::config::Config;
use aiops_common::shutdown::shutdown_signal;
use aiops_core::stores::{PostgresEventStore, RedisKvStore};
use aiops_core::{ApprovalManager, ClusterApi, EventStore, Executor, KvStore, Notifier, PlaybookRegistry, RuleEngine, ToolInvoker, Watchloop};
use aiops_core::fakes::{FakeClusterApi, LoggingNotifier, ScriptedToolInvoker};
use aiops_ingress::health::Readiness;
use aiops_ingress::webhook::{IngressConfig, IngressState};
use aiops_types::ReplyTarget;
use metrics_exporter_prometheus::PrometheusBuilder;
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::Duration;

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&config.redis.redis_url).await?);

    let postgres_pool = aiops_common::postgres::create_pool(&config.postgres)?;
    let postgres_store = PostgresEventStore::new(postgres_pool);
    postgres_store.init_schema().await?;
    let event_store: Arc<dyn EventStore> = Arc::new(postgres_store);

    let cluster: Arc<dyn ClusterApi> = Arc::new(FakeClusterApi::new());
    let tool_invoker: Arc<dyn ToolInvoker> = Arc::new(ScriptedToolInvoker::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier);

    let approval_manager =
        Arc::new(ApprovalManager::new(kv.clone(), notifier.clone(), tool_invoker.clone(), config.approval.approval_timeout_seconds));
    let registry = Arc::new(PlaybookRegistry::with_defaults());
    let rule_engine = Arc::new(RuleEngine::with_defaults());
    let executor =
        Executor::new(registry.clone(), tool_invoker.clone(), approval_manager.clone(), notifier.clone(), config.approval.auto_remediation_enabled);

    let default_target = parse_channel(&config.approval.aiops_notification_channel);

    let readiness = Readiness::new();
    let watchloop_readiness = readiness.clone();

    let watchloop = if config.watchloop.watchloop_enabled {
        let rule_engine_for_callback = Arc::clone(&rule_engine);
        let executor_for_callback = Arc::clone(&executor);
        let event_store_for_callback = Arc::clone(&event_store);
        let target_for_callback = default_target.clone();

        let watchloop_readiness_for_tick = watchloop_readiness.clone();
        let watchloop = Watchloop::new(cluster, Duration::from_secs(config.watchloop.watchloop_interval_seconds), move |event| {
            let rule_engine = Arc::clone(&rule_engine_for_callback);
            let executor = Arc::clone(&executor_for_callback);
            let event_store = Arc::clone(&event_store_for_callback);
            let target = target_for_callback.clone();
            async move {
                if let Err(err) = event_store.append(&event).await {
                    tracing::error!(error = %err, "failed to persist watchloop event");
                }
                dispatch_to_rule_engine(&rule_engine, &executor, &event, target).await;
            }
        })
        .with_on_tick(move || {
            let readiness = watchloop_readiness_for_tick.clone();
            async move {
                readiness.mark_ready();
            }
        });
        watchloop.start().await;
        tracing::info!("watchloop started");
        Some(watchloop)
    } else {
        watchloop_readiness.mark_ready();
        None
    };

    let approval_manager_for_sweep = Arc::clone(&approval_manager);
    let sweep_cancel = tokio_util::sync::CancellationToken::new();
    let sweep_cancel_for_task = sweep_cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = sweep_cancel_for_task.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = approval_manager_for_sweep.expire_sweep().await {
                        tracing::warn!(error = %err, "approval expiry sweep failed");
                    }
                }
            }
        }
    });

    let ingress_state = IngressState {
        config: IngressConfig {
            webhook_secret: config.ingress.alertmanager_webhook_secret.clone(),
            webhook_header: config.ingress.alertmanager_webhook_header.clone(),
            timestamp_header: config.ingress.alertmanager_timestamp_header.clone(),
        },
        event_store: Arc::clone(&event_store),
        dispatch: {
            let rule_engine = Arc::clone(&rule_engine);
            let executor = Arc::clone(&executor);
            let target = default_target.clone();
            Arc::new(move |event| {
                let rule_engine = Arc::clone(&rule_engine);
                let executor = Arc::clone(&executor);
                let target = target.clone();
                tokio::spawn(async move {
                    dispatch_to_rule_engine(&rule_engine, &executor, &event, target).await;
                });
            })
        },
    };

    let router = aiops_ingress::server::build_router(ingress_state, readiness, metrics_handle);
    let addr: std::net::SocketAddr = config.http.http_bind_addr.parse()?;
    tracing::info!(%addr, "{}", "starting aiops control plane HTTP server".green());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    sweep_cancel.cancel();
    if let Some(watchloop) = watchloop {
        watchloop.stop().await;
    }
    tracing::info!("server stopped gracefully");
    Ok(())
}

async fn dispatch_to_rule_engine(
    rule_engine: &RuleEngine,
    executor: &Arc<Executor>,
    event: &aiops_types::ClusterEvent,
    target: ReplyTarget,
) {
    for (rule, playbook_id) in rule_engine.evaluate(event) {
        aiops_common::metrics::rule_matched(&rule.id, &playbook_id);
        let context = aiops_core::traits::context_from_event(event);
        let executor = Arc::clone(executor);
        let target = target.clone();
        tokio::spawn(async move {
            if let Err(err) = executor.execute(&playbook_id, context, target, "auto").await {
                tracing::error!(error = %err, playbook_id, "playbook execution failed to start");
            }
        });
    }
}

fn parse_channel(raw: &str) -> ReplyTarget {
    match raw.split_once(':') {
        Some((channel_type, channel_id)) => ReplyTarget::new(channel_type, channel_id),
        None => ReplyTarget::new("slack", raw),
    }
}
