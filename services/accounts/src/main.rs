use accounts::{
    MIGRATOR,
    config::ServiceConfig,
    credentials::SecureCredentialTools,
    notifier::TracingNotifier,
    routes::{AppState, create_router},
    service::RegistrationService,
    unit_of_work::PgUnitOfWorkFactory,
};
use anyhow::Result;
use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting accounts service");

    let service_config = ServiceConfig::load()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    run_migrations(&pool, &MIGRATOR).await?;

    let service = RegistrationService::new(
        PgUnitOfWorkFactory::new(pool.clone()),
        SecureCredentialTools::new(),
    )
    .with_salt_length(service_config.salt_length);

    let app_state = AppState::new(
        service,
        TracingNotifier::new(),
        &service_config.confirmation_base_url,
        Some(pool),
    );

    info!("Accounts service initialized successfully");

    // Start the web server
    let app = create_router(app_state);

    let address = service_config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("Accounts service listening on {}", address);

    axum::serve(listener, app).await?;

    Ok(())
}
