use rollcall_core::{GeoSite, ResolverPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `ROLLCALL_CONFIG`,
/// then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Reference site for the geofence check.
    pub site: GeoSite,
    /// Reject attendance outside the site radius (otherwise warn only).
    pub enforce_geofence: bool,
    /// Primary-regime match tolerance.
    pub tolerance: f32,
    pub admin_username: String,
    pub admin_password: String,
    /// Lifetime of an admin session token.
    pub session_ttl_secs: u64,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: rollcall_core::default_model_dir(),
            db_path: rollcall_core::default_data_dir().join("rollcall.db"),
            site: GeoSite::default(),
            enforce_geofence: false,
            tolerance: rollcall_core::matcher::PRIMARY_TOLERANCE,
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            session_ttl_secs: 8 * 60 * 60,
            system_bus: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate();
        Ok(config)
    }

    /// Reset out-of-range file values to their defaults.
    fn validate(&mut self) {
        if !valid_tolerance(self.tolerance) {
            tracing::warn!(
                tolerance = self.tolerance,
                "ignoring tolerance outside (0, 1); using default"
            );
            self.tolerance = Self::default().tolerance;
        }
    }

    /// Override fields from `ROLLCALL_*` variables resolved through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(lat) = lookup_parsed(&lookup, "ROLLCALL_SITE_LAT") {
            self.site.lat = lat;
        }
        if let Some(lng) = lookup_parsed(&lookup, "ROLLCALL_SITE_LNG") {
            self.site.lng = lng;
        }
        if let Some(radius) = lookup_parsed(&lookup, "ROLLCALL_SITE_RADIUS_M") {
            self.site.radius_m = radius;
        }
        if let Some(v) = lookup("ROLLCALL_ENFORCE_GEOFENCE") {
            self.enforce_geofence = flag(&v);
        }
        if let Some(tolerance) = lookup_parsed::<f32>(&lookup, "ROLLCALL_TOLERANCE") {
            if valid_tolerance(tolerance) {
                self.tolerance = tolerance;
            } else {
                tracing::warn!(tolerance, "ignoring ROLLCALL_TOLERANCE outside (0, 1)");
            }
        }
        if let Some(user) = lookup("ROLLCALL_ADMIN_USERNAME") {
            self.admin_username = user;
        }
        if let Some(password) = lookup("ROLLCALL_ADMIN_PASSWORD") {
            self.admin_password = password;
        }
        if let Some(ttl) = lookup_parsed(&lookup, "ROLLCALL_SESSION_TTL_SECS") {
            self.session_ttl_secs = ttl;
        }
        if let Some(v) = lookup("ROLLCALL_SYSTEM_BUS") {
            self.system_bus = flag(&v);
        }
    }

    pub fn policy(&self) -> ResolverPolicy {
        ResolverPolicy {
            site: self.site,
            enforce_geofence: self.enforce_geofence,
            tolerance: self.tolerance,
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs.min(i64::MAX as u64) as i64)
    }
}

fn lookup_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

/// A distance tolerance at or beyond either bound accepts everyone or no one.
fn valid_tolerance(tolerance: f32) -> bool {
    tolerance.is_finite() && tolerance > 0.0 && tolerance < 1.0
}

fn flag(raw: &str) -> bool {
    !matches!(raw.trim(), "" | "0" | "false" | "no" | "off")
}
