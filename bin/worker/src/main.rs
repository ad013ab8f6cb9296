use std::sync::Arc;
use tidewater_scheduler::{Dispatcher, Scheduler, TriggerFunctionRegistry};
use tidewater_steps::{register_builtin_functions, register_builtin_steps};
use tidewater_worker::{
    config::WorkerConfig,
    db::{PgExecutionStore, PgTriggerStore, PgWorkflowStore},
    refresh::HttpRefresher,
    routes,
    slack::SlackClient,
};
use tidewater_workflow::{Engine, StepRegistry, TriggerStore};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = WorkerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let chat = Arc::new(SlackClient::new(config.chat.api_base.clone()));
    let mut steps = StepRegistry::new();
    register_builtin_steps(&mut steps, chat).expect("failed to register steps");
    let mut functions = TriggerFunctionRegistry::new();
    register_builtin_functions(&mut functions).expect("failed to register trigger functions");
    let functions = Arc::new(functions);

    let triggers = Arc::new(PgTriggerStore::new(db_pool.clone()));

    // Every stored trigger must name a registered function
    let stored = triggers
        .list_all()
        .await
        .expect("failed to load triggers");
    functions
        .verify(&stored)
        .expect("stored triggers name unregistered functions");
    tracing::info!(triggers = stored.len(), "Verified trigger functions");

    let engine = Engine::new(
        Arc::new(PgWorkflowStore::new(db_pool.clone())),
        Arc::new(PgExecutionStore::new(db_pool.clone())),
        triggers,
        steps,
        functions.clone(),
    )
    .with_refresher(Arc::new(
        HttpRefresher::new(config.refresh_url.clone()).expect("failed to build refresh client"),
    ));
    let dispatcher = Dispatcher::new(engine, functions);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = Scheduler::new(dispatcher.clone(), config.scheduler.tick_interval());
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let app = routes::router(dispatcher);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            let _ = shutdown_tx.send(());
        })
        .await
        .expect("server error");

    if let Err(e) = scheduler_task.await {
        tracing::warn!(error = %e, "Scheduler task ended abnormally");
    }
}
