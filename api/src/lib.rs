pub mod email;
pub mod notifier;
pub mod pricing;
pub mod rating;
pub mod routes;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod telemetry;
pub mod time;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use actix_web::middleware::DefaultHeaders;
use actix_web::{App, HttpServer, web};
use secrecy::SecretBox;
use sqlx::PgPool;
use std::net::TcpListener;

use crate::time::TimeSource;

/// Build the server, but not await it.
///
/// Returns the port that the server has bound to by modifying the config.
pub async fn build(
    config: &mut Config,
    time_source: TimeSource,
) -> std::io::Result<Server> {
    let db_pool = PgPool::connect(&config.database_url).await.unwrap();
    build_with_pool(config, time_source, db_pool)
}

/// Build the server against an existing pool (used by the test harness,
/// which provisions an isolated database per test).
pub fn build_with_pool(
    config: &mut Config,
    time_source: TimeSource,
    db_pool: PgPool,
) -> std::io::Result<Server> {
    let db_pool = web::Data::new(db_pool);
    let time_source = web::Data::new(time_source);
    let allowed_origins = config.allowed_origins.clone();

    // OS assigns the port if binding to 0
    let listener = TcpListener::bind(format!("{}:{}", config.ip, config.port))?;
    config.port = listener.local_addr()?.port();
    let server = HttpServer::new(move || {
        // Configure CORS based on allowed origins
        let cors = if allowed_origins.contains(&"*".to_string()) {
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
        } else {
            let mut cors = Cors::default().allow_any_method().allow_any_header();
            for origin in &allowed_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .wrap(cors)
            // Booking responses are per-user and must never be cached.
            .wrap(
                DefaultHeaders::new()
                    .add((
                        CACHE_CONTROL,
                        "no-store, no-cache, must-revalidate, private",
                    ))
                    .add((PRAGMA, "no-cache"))
                    .add((EXPIRES, "0")),
            )
            .service(routes::api_services())
            .app_data(db_pool.clone())
            .app_data(time_source.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}

/// Configuration loaded from environment variables at startup.
pub struct Config {
    pub database_url: String,
    /// set to "0.0.0.0" for public access, "127.0.0.1" for local dev
    pub ip: String,
    /// set to 0 to get an os-assigned port
    pub port: u16,
    /// List of allowed CORS origins. Use "*" to allow any origin
    /// (development only)
    pub allowed_origins: Vec<String>,
    /// Email service API key (e.g., Resend API key)
    pub email_api_key: SecretBox<String>,
    /// From address for outgoing emails
    pub email_from_address: String,
    /// Server key for the push gateway
    pub fcm_server_key: SecretBox<String>,
}

impl Config {
    pub fn from_env() -> Self {
        use std::env::var;

        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Config {
            database_url: var("DATABASE_URL").unwrap(),
            ip: var("IP_ADDRESS").unwrap(),
            port: var("PORT").unwrap().parse().unwrap(),
            allowed_origins,
            email_api_key: SecretBox::new(Box::new(
                var("EMAIL_API_KEY").expect("EMAIL_API_KEY must be set"),
            )),
            email_from_address: var("EMAIL_FROM_ADDRESS")
                .expect("EMAIL_FROM_ADDRESS must be set"),
            fcm_server_key: SecretBox::new(Box::new(
                var("FCM_SERVER_KEY").expect("FCM_SERVER_KEY must be set"),
            )),
        }
    }
}
