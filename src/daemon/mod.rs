use crate::channels::{run_mqtt_listener, CommandRouter, MqttActuatorSink};
use crate::config::Config;
use crate::engine::{SystemClock, TaskEngine};
use anyhow::{Context, Result};
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Config) -> Result<()> {
    let initial_backoff = config.daemon.initial_backoff_secs.max(1);
    let max_backoff = config.daemon.max_backoff_secs.max(initial_backoff);

    crate::health::mark_component_ok("daemon");

    let shutdown = CancellationToken::new();
    let sink = Arc::new(MqttActuatorSink::new());
    let engine = Arc::new(TaskEngine::from_config(
        &config.engine,
        &config.topics,
        sink.clone(),
        Arc::new(SystemClock),
    ));
    let router = Arc::new(CommandRouter::new(&config.topics));

    let mut handles: Vec<JoinHandle<()>> = vec![spawn_state_writer(
        state_file_path(&config),
        Duration::from_secs(config.daemon.state_flush_secs.max(1)),
        Arc::clone(&engine),
        shutdown.clone(),
    )];

    {
        let engine = Arc::clone(&engine);
        let token = shutdown.clone();
        handles.push(spawn_component_supervisor(
            "executor",
            initial_backoff,
            max_backoff,
            shutdown.clone(),
            move || {
                let engine = Arc::clone(&engine);
                let token = token.clone();
                async move {
                    engine.run(token).await;
                    Ok(())
                }
            },
        ));
    }

    {
        let mqtt_cfg = config.mqtt.clone();
        let engine = Arc::clone(&engine);
        let token = shutdown.clone();
        handles.push(spawn_component_supervisor(
            "mqtt",
            initial_backoff,
            max_backoff,
            shutdown.clone(),
            move || {
                let cfg = mqtt_cfg.clone();
                let router = Arc::clone(&router);
                let engine = Arc::clone(&engine);
                let sink = Arc::clone(&sink);
                let token = token.clone();
                async move { run_mqtt_listener(&cfg, router, engine, sink, token).await }
            },
        ));
    }

    println!("🤖 robot-taskd started");
    println!("   Broker:     {}", config.mqtt.broker_url);
    println!(
        "   Cooldown:   {}s, tick {}ms",
        config.engine.completion_cooldown_secs, config.engine.tick_interval_ms
    );
    println!("   Components: executor, mqtt, state writer");
    println!("   Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    crate::health::mark_component_error("daemon", "shutdown requested");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    let pending = engine.pending();
    if pending > 0 || engine.current_task().is_some() {
        tracing::warn!(pending, "Exiting with unfinished tasks");
    }
    Ok(())
}

pub fn state_file_path(config: &Config) -> PathBuf {
    config.state_file_path()
}

/// State file content: health registry plus engine snapshot.
pub fn state_json(engine: &TaskEngine) -> serde_json::Value {
    let mut json = crate::health::snapshot_json();
    if let Some(obj) = json.as_object_mut() {
        obj.insert(
            "written_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        obj.insert(
            "engine".into(),
            serde_json::to_value(engine.snapshot()).unwrap_or_default(),
        );
    }
    json
}

async fn write_state(path: &Path, engine: &TaskEngine) {
    let data = serde_json::to_vec_pretty(&state_json(engine)).unwrap_or_else(|_| b"{}".to_vec());
    if let Err(e) = tokio::fs::write(path, data).await {
        tracing::debug!("Failed to write state file {}: {e}", path.display());
    }
}

/// Read the state file a running daemon keeps up to date.
pub async fn read_state(path: &Path) -> Result<serde_json::Value> {
    let raw = tokio::fs::read(path).await.with_context(|| {
        format!(
            "No daemon state at {} (is robot-taskd running?)",
            path.display()
        )
    })?;
    serde_json::from_slice(&raw).context("Daemon state file is not valid JSON")
}

fn spawn_state_writer(
    path: PathBuf,
    every: Duration,
    engine: Arc<TaskEngine>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    write_state(&path, &engine).await;
                    return;
                }
                _ = interval.tick() => write_state(&path, &engine).await,
            }
        }
    })
}

fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    shutdown: CancellationToken,
    mut run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = initial_backoff_secs.max(1);
        let max_backoff = max_backoff_secs.max(backoff);

        loop {
            crate::health::mark_component_ok(name);
            let outcome = run_component().await;
            if shutdown.is_cancelled() {
                return;
            }
            match outcome {
                Ok(()) => {
                    crate::health::mark_component_error(name, "component exited unexpectedly");
                    tracing::warn!("Daemon component '{name}' exited unexpectedly");
                    // Clean exit: the component ran, so start backoff over
                    backoff = initial_backoff_secs.max(1);
                }
                Err(e) => {
                    crate::health::mark_component_error(name, format!("{e:#}"));
                    tracing::error!("Daemon component '{name}' failed: {e:#}");
                }
            }

            crate::health::bump_component_restart(name);
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            }
            // Double backoff AFTER sleeping so first error uses initial_backoff
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}
