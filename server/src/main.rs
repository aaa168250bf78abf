use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use courier_server::config::{generate_config_template, Config};
use courier_server::store::{self, SqliteStore};
use courier_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("courier_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Courier server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let sqlite = Arc::new(SqliteStore::new(db));

    // Seed configured rooms; existing rooms keep their membership
    for seed in config.rooms() {
        let seeder = sqlite.clone();
        let seed = seed.clone();
        let room = store::blocking(move || {
            let name = if seed.name.is_empty() { &seed.id } else { &seed.name };
            seeder.ensure_room(&seed.id, name, &seed.members)
        })
        .await?;
        tracing::info!(
            room_id = %room.id,
            members = room.members.len(),
            "Room ready"
        );
    }

    let delivery = config.delivery();
    tracing::info!(
        outbound_queue_capacity = delivery.outbound_queue_capacity,
        send_timeout_ms = delivery.send_timeout_ms,
        "Delivery configured"
    );

    let app_state = state::AppState::new(sqlite.clone(), sqlite, delivery);
    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
