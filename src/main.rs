use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use cem_watcher::config::WorkerConfig;
use cem_watcher::context::WorkerContext;
use cem_watcher::scripts::{HttpRegistry, RegistrySource, ScriptCache};
use cem_watcher::shutdown::install_shutdown_handler;
use cem_watcher::worker_loop::WorkerLoop;

/// Initialize tracing to stderr, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cem-watcher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("🔭 CEM Watcher v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Poll interval: {:?}", config.poll_interval);
    match &config.registry_url {
        Some(url) => eprintln!("   Registry: {url}"),
        None => eprintln!("   Registry: disabled"),
    }

    let ctx = Arc::new(
        WorkerContext::init(config)
            .await
            .context("Failed to initialize workspace")?,
    );
    eprintln!("   Root: {}\n", ctx.root().display());

    let source = ctx
        .config()
        .registry_url
        .clone()
        .map(|url| Box::new(HttpRegistry::new(url)) as Box<dyn RegistrySource>);
    let scripts = Arc::new(ScriptCache::new(&ctx, source));

    let shutdown = install_shutdown_handler();
    WorkerLoop::new(ctx, scripts).run(shutdown).await;

    Ok(())
}
