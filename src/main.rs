use feedback_broker::kafka::{KafkaConsumer, KafkaProducer};
use feedback_broker::{BrokerConfig, BrokerConsumer, BrokerProducer};
use feedback_config::Settings;
use feedback_gateway::{router, AppState, Ed25519Verifier, HmacVerifier, SignatureVerifier};
use feedback_orchestrator::{Activities, Engine, JournalManager};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

/// Exit codes (§6): 0 normal shutdown, 1 fatal startup error, 2 configuration
/// invalid, 130 interrupted.
const EXIT_FATAL_STARTUP: u8 = 1;
const EXIT_CONFIG_INVALID: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::from(EXIT_FATAL_STARTUP);
        }
    };
    rt.block_on(run())
}

async fn run() -> ExitCode {
    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration invalid: {e}");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(settings.log_level.clone()))
        .init();

    match run_with_settings(settings).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            ExitCode::from(EXIT_FATAL_STARTUP)
        }
    }
}

async fn run_with_settings(settings: Settings) -> anyhow::Result<u8> {
    let broker_config = BrokerConfig {
        brokers: settings.broker.brokers.clone(),
        topic: settings.broker.feedback_topic.clone(),
        consumer_group: "iterateswarm-consumer".into(),
    };
    let producer: Arc<dyn BrokerProducer> = Arc::new(KafkaProducer::connect(&broker_config)?);
    let consumer = KafkaConsumer::connect(&broker_config)?;

    let activities = Arc::new(build_activities(&settings).await?);
    let journal = JournalManager::new(std::path::Path::new("./data/workflows"));
    let engine = Engine::new(journal, activities);

    let source_a_verifier: Arc<dyn SignatureVerifier> = match &settings.http.source_a_verifying_key {
        Some(key) => Arc::new(Ed25519Verifier::from_hex(key)?),
        None => {
            tracing::warn!("no source-a verifying key configured; that webhook route will reject everything");
            Arc::new(HmacVerifier::new(Vec::new()))
        }
    };
    let source_b_verifier: Arc<dyn SignatureVerifier> = Arc::new(HmacVerifier::new(
        settings
            .http
            .source_b_hmac_secret
            .clone()
            .unwrap_or_default()
            .into_bytes(),
    ));

    let app_state = AppState {
        broker: producer,
        engine: engine.clone(),
        source_a_verifier,
        source_b_verifier,
    };
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&settings.http.bind_address).await?;
    tracing::info!(address = %settings.http.bind_address, "gateway listening");

    let shutdown = Arc::new(Notify::new());

    let server_shutdown = shutdown.clone();
    let server_fut = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.notified().await });

    let work = async {
        tokio::try_join!(
            async { server_fut.await.map_err(anyhow::Error::from) },
            async {
                launch_loop(engine, consumer, shutdown.clone()).await;
                Ok::<(), anyhow::Error>(())
            }
        )
    };
    tokio::pin!(work);

    let first_signal = wait_for_shutdown_signal();
    tokio::pin!(first_signal);

    tokio::select! {
        result = &mut work => {
            result?;
            return Ok(0);
        }
        _ = &mut first_signal => {
            tracing::info!("shutdown signal received, draining in-flight requests");
            shutdown.notify_waiters();
        }
    }

    tokio::select! {
        result = &mut work => {
            result?;
            Ok(0)
        }
        _ = tokio::time::sleep(settings.http.shutdown_grace_period) => {
            tracing::warn!("shutdown grace period elapsed with work still draining");
            Ok(0)
        }
        _ = wait_for_shutdown_signal() => {
            tracing::warn!("second interrupt received during drain, forcing exit");
            Ok(EXIT_INTERRUPTED)
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// §4.6: the broker→workflow launcher. Commits the offset only after the
/// corresponding workflow `Start` has returned, so a crash between poll and
/// commit is recovered by redelivery rather than data loss.
async fn launch_loop(engine: Arc<Engine>, mut consumer: KafkaConsumer, shutdown: Arc<Notify>) {
    loop {
        let record = tokio::select! {
            result = consumer.poll() => match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(error = %e, "broker poll failed");
                    continue;
                }
            },
            _ = shutdown.notified() => {
                tracing::info!("launcher stopping: no longer accepting new broker records");
                return;
            }
        };

        match engine.start(record.event.clone()).await {
            Ok(workflow_id) => {
                tracing::info!(workflow_id, "workflow started from broker record");
                if let Err(e) = consumer.commit(&record).await {
                    tracing::error!(error = %e, "failed to commit broker offset");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start workflow from broker record; not committing");
            }
        }
    }
}

async fn build_activities(settings: &Settings) -> anyhow::Result<Activities> {
    use feedback_analyzer_client::AnalyzerClient;
    use feedback_chat_client::HttpChatClient;
    use feedback_errors::ActivityError;
    use feedback_tracker_client::HttpTrackerClient;

    let policy = feedback_activities::retry::RetryPolicy::default();

    let analyzer = AnalyzerClient::connect(&settings.analyzer.endpoint).await?;
    let analyze = feedback_activities::AnalyzeActivity::new(Box::new(analyzer), policy.clone());

    struct SoftSkipChat;
    #[async_trait::async_trait]
    impl feedback_chat_client::ChatClient for SoftSkipChat {
        async fn notify(
            &self,
            _input: feedback_chat_client::NotifyInput<'_>,
        ) -> Result<feedback_chat_client::NotifyOutcome, ActivityError> {
            Ok(feedback_chat_client::NotifyOutcome::SoftSkipped)
        }
        async fn acknowledge_interaction(&self, _: &str, _: &str) -> Result<(), ActivityError> {
            Ok(())
        }
    }

    struct SoftSkipTracker;
    #[async_trait::async_trait]
    impl feedback_tracker_client::TrackerClient for SoftSkipTracker {
        async fn publish(
            &self,
            _input: feedback_tracker_client::PublishInput<'_>,
        ) -> Result<feedback_tracker_client::PublishOutcome, ActivityError> {
            Ok(feedback_tracker_client::PublishOutcome::SoftSkipped)
        }
    }

    let notify = match &settings.credentials.chat_bot_credential {
        Some(credential) => feedback_activities::NotifyActivity::new(
            Arc::new(HttpChatClient::new(
                Some(credential.clone()),
                settings.credentials.chat_post_message_url.clone(),
                settings.credentials.chat_interaction_ack_url.clone(),
            )),
            policy.clone(),
        ),
        None => {
            tracing::warn!("no chat bot credential configured; notify will soft-skip");
            feedback_activities::NotifyActivity::new(Arc::new(SoftSkipChat), policy.clone())
        }
    };

    let publish = match (
        &settings.credentials.tracker_credential,
        &settings.credentials.tracker_target,
    ) {
        (Some(credential), Some(target)) => feedback_activities::PublishActivity::new(
            Arc::new(HttpTrackerClient::new(
                Some(credential.clone()),
                Some(target.clone()),
                settings.credentials.tracker_create_issue_url.clone(),
                settings.credentials.tracker_search_issues_url.clone(),
            )),
            policy,
        ),
        _ => {
            tracing::warn!("no tracker credential/target configured; publish will soft-skip");
            feedback_activities::PublishActivity::new(Arc::new(SoftSkipTracker), policy)
        }
    };

    Ok(Activities {
        analyze,
        notify,
        publish,
        approval_timeout: settings.orchestrator.approval_timeout,
        auto_approve_on_soft_skip: settings.credentials.auto_approve_on_soft_skip,
    })
}
