use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use toolforge_server::{admin, tools, usage, AppError, AppState, Settings};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

async fn health_check() -> actix_web::HttpResponse {
    toolforge_server::health_check().await
}

#[actix_web::main]
async fn main() -> toolforge_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    info!("Starting server at {}:{}", config.server.host, config.server.port);

    // Initialize application state
    let state = AppState::new(config.clone()).await?;

    sqlx::migrate!("./migrations")
        .run(state.db.pool())
        .await
        .map_err(|e| AppError::InternalError(format!("migration failed: {}", e)))?;
    info!("Database migrations applied");

    let state = web::Data::new(state);

    // Create and bind TCP listener
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;

    info!(
        "Tool endpoints ready at http://{}:{}/tools/{{tool_id}}",
        config.server.host, config.server.port
    );

    let workers = config.server.workers as usize;

    // Start HTTP server
    HttpServer::new(move || {
        let cors = if config.cors.enabled {
            let cors_config = Cors::default();

            let cors_config = if config.cors.allow_any_origin {
                cors_config
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .expose_any_header()
            } else {
                cors_config
                    .allowed_origin("http://localhost:8080")
                    .allowed_origin("http://127.0.0.1:8080")
                    .allowed_methods(vec!["GET", "POST", "PUT"])
                    .allowed_headers(vec![
                        "Authorization",
                        "Content-Type",
                        "X-Device-Fingerprint",
                    ])
                    .supports_credentials()
            };

            cors_config.max_age(config.cors.max_age as usize)
        } else {
            // CORS disabled - use most restrictive settings
            Cors::default()
        };

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .route("/usage/check", web::post().to(usage::handlers::check_usage))
            .route("/usage/record", web::post().to(usage::handlers::record_usage))
            .route("/tools/{tool_id}", web::post().to(tools::run_tool))
            .route("/admin/providers", web::get().to(admin::list_providers))
            .route(
                "/admin/providers/{provider_id}/models",
                web::get().to(admin::list_vendor_models),
            )
            .route("/admin/models", web::get().to(admin::list_models))
            .route("/admin/ai-config", web::get().to(admin::get_ai_config))
            .route("/admin/ai-config", web::put().to(admin::update_ai_config))
    })
    .listen(listener)?
    .workers(workers)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(())
}
