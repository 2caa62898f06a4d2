#![allow(dead_code)]
#[macro_use]
mod macros;

mod chat;
mod db_core;
mod error;
mod llm;
mod mail;
mod model;
mod rag;
mod rate_limiters;
mod routes;
mod server_config;
mod tasks;
mod workflow;

use std::{env, net::SocketAddr, time::Duration};

use axum::{extract::FromRef, http::StatusCode, response::IntoResponse, Router};
use chat::handlers::{spawn_dispatcher, ChatRuntime};
use futures::future::join_all;
use mimalloc::MiMalloc;
use rag::vector::VectorStoreClient;
use rate_limiters::RateLimiters;
use routes::AppRouter;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use server_config::cfg;
use teloxide::Bot;
use tokio::{signal, task::JoinHandle};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow::WorkflowEngine;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub http_client: HttpClient,
    pub conn: DatabaseConnection,
    pub rate_limiters: RateLimiters,
    pub bot: Bot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_env("RUST_LOG"))
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set in .env file");
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);
    let conn = Database::connect(db_options)
        .await
        .expect("Database connection failed");

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let bot = Bot::new(cfg.telegram.bot_token.clone());

    let state = ServerState {
        http_client,
        conn,
        rate_limiters: RateLimiters::from_config(),
        bot,
    };

    println!("{}", *cfg);

    // The vector store is best-effort at boot; retrieval degrades to
    // thread-only context while it is down
    match VectorStoreClient::new(state.http_client.clone()) {
        Ok(store) => {
            if let Err(e) = store.ensure_collection().await {
                tracing::warn!("Vector store not ready at startup: {e}");
            }
        }
        Err(e) => tracing::warn!("Vector store misconfigured: {e:?}"),
    }

    let engine = WorkflowEngine::new(state.clone());

    let chat_runtime = ChatRuntime::new(state.clone(), engine.clone());
    let dispatcher_handle = spawn_dispatcher(chat_runtime);

    let mut scheduler = JobScheduler::new()
        .await
        .expect("Failed to create scheduler");

    {
        // Mailbox polling + workflow dispatch on the configured interval
        let state_clone = state.clone();
        let engine_clone = engine.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(cfg.polling_interval_seconds),
                move |_uuid, _l| {
                    let state = state_clone.clone();
                    let engine = engine_clone.clone();
                    Box::pin(async move {
                        if let Err(e) = tasks::poll_and_dispatch(state, engine).await {
                            tracing::error!("Poll job failed: {:?}", e);
                        }
                    })
                },
            )?)
            .await?;

        // Pick up rows enqueued outside the poll tick (manual retry etc.)
        let state_clone = state.clone();
        let engine_clone = engine.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(30),
                move |_uuid, _l| {
                    let state = state_clone.clone();
                    let engine = engine_clone.clone();
                    Box::pin(async move {
                        if let Err(e) = tasks::dispatch_pending_workflows(state, engine).await {
                            tracing::error!("Dispatch job failed: {:?}", e);
                        }
                    })
                },
            )?)
            .await?;

        let state_clone = state.clone();
        let engine_clone = engine.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(300),
                move |_uuid, _l| {
                    let state = state_clone.clone();
                    let engine = engine_clone.clone();
                    Box::pin(async move {
                        if let Err(e) = tasks::requeue_stale_processing(state, engine).await {
                            tracing::error!("Stale requeue job failed: {:?}", e);
                        }
                    })
                },
            )?)
            .await?;

        {
            schedule_job!(
                scheduler,
                "indexing_supervisor",
                "0 * * * * *",
                tasks::indexing_supervisor,
                state
            );
        }
        {
            schedule_job!(
                scheduler,
                "manual_notification_replay",
                "30 */2 * * * *",
                tasks::replay_manual_notifications,
                state
            );
        }
        {
            schedule_job!(
                scheduler,
                "vector_retention_cleanup",
                "0 30 3 * * *",
                tasks::retention_cleanup,
                state
            );
        }
    }

    scheduler.shutdown_on_ctrl_c();
    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));

    match scheduler.start().await {
        Ok(_) => {
            tracing::info!("Scheduler started");
        }
        Err(e) => {
            tracing::error!("Failed to start scheduler: {:?}", e);
        }
    }

    let router = AppRouter::create(state.clone(), engine.clone());

    // Handle Ctrl+C
    let shutdown_handle = {
        tokio::spawn(async move {
            if env::var("NO_SHUTDOWN").unwrap_or("false".to_string()) == "true" {
                return;
            }
            signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
            tracing::info!("Received Ctrl+C, shutting down");
            std::process::exit(0);
        })
    };

    join_all(vec![run_server(router), dispatcher_handle, shutdown_handle]).await;

    Ok(())
}

fn run_server(router: Router) -> JoinHandle<()> {
    tokio::spawn(async {
        let port = env::var("PORT").unwrap_or("5006".to_string());
        tracing::info!("Mail assistant admin surface on http://0.0.0.0:{}", port);

        let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>().unwrap()));
        tracing::debug!("listening on {addr}");
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, router).await.unwrap();
    })
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
