// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent-resident monitoring pipeline: wires a [`pulsewatch_engine::MetricRegistry`]
//! to the non-blocking HTTP/MCP/SSE server and runs until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default dashboard/registry/badges ACL
//! pulsewatch-agent --listen 0.0.0.0:19999
//!
//! # Load listener and worker settings from a file
//! pulsewatch-agent --config pulsewatch.toml
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulsewatch_engine::MetricRegistry;
use pulsewatch_web::config::{self, Args};
use pulsewatch_web::dispatch::Dispatcher;
use pulsewatch_web::server::{self, ServerConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let pipeline_config = match config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // Metric collection is driven by the embedding agent process; the
    // registry here is the shared store future `/api/*` handlers read from.
    let _registry = Arc::new(MetricRegistry::new(0));

    let listeners = pipeline_config.resolved_acls();
    let unix_listeners = pipeline_config.resolved_unix_acls();
    if listeners.is_empty() && unix_listeners.is_empty() {
        tracing::error!("no listeners configured; pass --listen host:port, --listen-unix path, or a --config file");
        std::process::exit(1);
    }

    let config_snapshot = render_config_snapshot(&pipeline_config);
    let dispatcher = Arc::new(Dispatcher::new(pipeline_config.web_root.clone(), config_snapshot));

    let server_config = ServerConfig {
        listeners,
        unix_listeners,
        worker_count: pipeline_config.workers,
        first_request_timeout: Duration::from_secs(pipeline_config.first_request_timeout_s),
        idle_timeout: Duration::from_secs(pipeline_config.idle_timeout_s),
        allow_from: pipeline_config.allow_from.clone(),
    };

    tracing::info!(
        workers = pipeline_config.workers,
        listeners = pipeline_config.listeners.len(),
        "pulsewatch-agent starting"
    );

    let handle = match server::spawn(server_config, dispatcher) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        interrupted_handler.store(true, Ordering::Release);
    }) {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    while !interrupted.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("shutting down");
    handle.stop();
}

fn render_config_snapshot(config: &config::PipelineConfig) -> String {
    toml::to_string_pretty(config).unwrap_or_else(|_| String::from("# config snapshot unavailable\n"))
}
