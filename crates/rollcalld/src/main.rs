use anyhow::{Context, Result};
use rollcall_core::session::AdminAuth;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        site_lat = config.site.lat,
        site_lng = config.site.lng,
        radius_m = config.site.radius_m,
        enforce_geofence = config.enforce_geofence,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("starting engine")?;

    if config.admin_password == config::Config::default().admin_password {
        tracing::warn!(
            "admin password is the built-in default; set ROLLCALL_ADMIN_PASSWORD"
        );
    }
    let admin = Arc::new(AdminAuth::new(
        config.admin_username.clone(),
        config.admin_password.clone(),
        config.session_ttl(),
    ));

    let service = dbus_interface::RollcallService::new(engine, admin);
    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    let bus = if config.system_bus {
        "system"
    } else {
        "session"
    };
    tracing::info!(bus, name = dbus_interface::BUS_NAME, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
