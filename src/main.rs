use log::{error, info, warn};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use warp::Filter;

use pix_album::config::Config;
use pix_album::db_pool::{create_db_pool, vacuum_database, DbPool};
use pix_album::error_reporter::ErrorReporter;
use pix_album::handlers_album::build_album_routes;
use pix_album::handlers_collage::build_collage_routes;
use pix_album::handlers_health::build_health_routes;
use pix_album::handlers_photo::build_photo_routes;
use pix_album::handlers_share::build_share_routes;
use pix_album::handlers_template::build_template_routes;
use pix_album::handlers_user::build_user_routes;
use pix_album::media_store::{FsMediaStore, SharedStore};
use pix_album::warp_helpers::{cors, handle_rejection};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Arc::new(Config::from_env()?);
    let host: IpAddr = config.host.parse()?;
    let addr = SocketAddr::new(host, config.port);

    info!("Starting pix-album server on {}", addr);
    info!("Database: {}", config.db_path);
    info!("Media path: {}", config.media_path);
    info!(
        "Collages: {}px cells, {} output",
        config.collage.cell_size, config.collage.format
    );

    // Check if port is available BEFORE initializing services
    if !is_port_available(addr) {
        error!(
            "Port {} is already in use. Stop the other pix-album instance or set PIX_ALBUM_PORT.",
            config.port
        );
        return Err(format!("Port {} is already in use", config.port).into());
    }

    let (db_pool, store) = initialize_services(&config).await?;
    start_background_tasks(db_pool.clone());

    let reporter = ErrorReporter::new(db_pool.clone());

    let routes = build_health_routes(db_pool.clone())
        .or(build_user_routes(db_pool.clone()))
        .or(build_template_routes(db_pool.clone()))
        .or(build_album_routes(
            db_pool.clone(),
            store.clone(),
            config.clone(),
        ))
        .or(build_photo_routes(
            db_pool.clone(),
            store.clone(),
            config.clone(),
        ))
        .or(build_collage_routes(db_pool.clone(), store, config.clone()))
        .or(build_share_routes(db_pool))
        .with(cors())
        .with(warp::log("pix_album"))
        .recover(move |err| {
            let reporter = reporter.clone();
            async move { handle_rejection(err, reporter).await }
        });

    info!("Server started successfully, listening on http://{}", addr);

    tokio::select! {
        _ = warp::serve(routes).run(addr) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested, stopping server"),
    }

    Ok(())
}

fn is_port_available(addr: SocketAddr) -> bool {
    TcpListener::bind(addr).is_ok()
}

async fn initialize_services(
    config: &Config,
) -> Result<(DbPool, SharedStore), Box<dyn std::error::Error>> {
    let db_pool = create_db_pool(&config.db_path).await?;
    info!("Database initialized successfully");

    tokio::fs::create_dir_all(&config.media_path).await?;
    let store: SharedStore = Arc::new(FsMediaStore::new(&config.media_path));
    info!("Media store ready at {}", config.media_path);

    Ok((db_pool, store))
}

fn start_background_tasks(db_pool: DbPool) {
    info!("Running startup database maintenance...");
    tokio::spawn(async move {
        match vacuum_database(&db_pool).await {
            Ok(()) => info!("Database vacuum completed"),
            Err(e) => warn!("Database vacuum failed: {}", e),
        }
    });
}
