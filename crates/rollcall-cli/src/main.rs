use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::models::{self, FaceEncoder};
use rollcall_core::{match_embeddings, EmbeddingExtractor};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn register(
        &self,
        display_name: &str,
        email: &str,
        phone: &str,
        image_path: &str,
    ) -> zbus::Result<String>;
    fn mark_attendance(&self, image_path: &str, location: Vec<f64>) -> zbus::Result<String>;
    fn login(&self, image_path: &str) -> zbus::Result<String>;
    fn history(&self, token: &str, limit: u32) -> zbus::Result<String>;
    fn identity_history(&self, token: &str, identity_id: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
    fn admin_login(&self, username: &str, password: &str) -> zbus::Result<String>;
    fn admin_logout(&self, token: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person from a photo with exactly one face
    Register {
        /// Display name
        name: String,
        image: PathBuf,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Mark attendance for everyone recognised in a photo
    Mark {
        image: PathBuf,
        /// Capture location latitude
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Capture location longitude
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
    },
    /// Identify the person in a photo
    Login { image: PathBuf },
    /// Show recent attendance (admin)
    History {
        /// Admin session token from `admin-login`
        #[arg(long, env = "ROLLCALL_ADMIN_TOKEN")]
        token: String,
        /// Restrict to one identity
        #[arg(long)]
        identity: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Show daemon status
    Status,
    /// Open an admin session and print its token
    AdminLogin {
        username: String,
        #[arg(long, env = "ROLLCALL_ADMIN_PASSWORD")]
        password: String,
    },
    /// End an admin session
    AdminLogout {
        #[arg(long, env = "ROLLCALL_ADMIN_TOKEN")]
        token: String,
    },
    /// Compare two photos in-process, bypassing the daemon
    Compare {
        a: PathBuf,
        b: PathBuf,
        /// Directory containing the ONNX models
        #[arg(long)]
        model_dir: Option<PathBuf>,
        #[arg(long, default_value_t = rollcall_core::matcher::PRIMARY_TOLERANCE)]
        tolerance: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let system = cli.system;

    match cli.command {
        Commands::Register {
            name,
            image,
            email,
            phone,
        } => {
            let image = absolute(&image)?;
            let email = email.as_deref().unwrap_or("");
            let phone = phone.as_deref().unwrap_or("");
            let reply = connect(system)
                .await?
                .register(&name, email, phone, &image)
                .await?;
            print_json(&reply);
        }
        Commands::Mark { image, lat, lng } => {
            let image = absolute(&image)?;
            let location = match (lat, lng) {
                (Some(lat), Some(lng)) => vec![lat, lng],
                _ => Vec::new(),
            };
            let reply = connect(system)
                .await?
                .mark_attendance(&image, location)
                .await?;
            print_json(&reply);
        }
        Commands::Login { image } => {
            let image = absolute(&image)?;
            print_json(&connect(system).await?.login(&image).await?);
        }
        Commands::History {
            token,
            identity,
            limit,
        } => {
            let proxy = connect(system).await?;
            let reply = match identity {
                Some(id) => proxy.identity_history(&token, &id).await?,
                None => proxy.history(&token, limit).await?,
            };
            print_json(&reply);
        }
        Commands::Status => print_json(&connect(system).await?.status().await?),
        Commands::AdminLogin { username, password } => {
            let token = connect(system)
                .await?
                .admin_login(&username, &password)
                .await?;
            println!("{token}");
        }
        Commands::AdminLogout { token } => {
            connect(system).await?.admin_logout(&token).await?;
            println!("session closed");
        }
        Commands::Compare {
            a,
            b,
            model_dir,
            tolerance,
        } => {
            let model_dir = model_dir.unwrap_or_else(rollcall_core::default_model_dir);
            compare(&a, &b, &model_dir, tolerance)?;
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<AttendanceProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable; is it running?")
}

/// Extract both images and match their first faces.
fn compare(a: &Path, b: &Path, model_dir: &Path, tolerance: f32) -> Result<()> {
    tracing::debug!(
        a = %a.display(),
        b = %b.display(),
        model_dir = %model_dir.display(),
        "offline compare"
    );
    let (encoder, _) = models::load_models(model_dir);
    let encoder = encoder.map(|e| Box::new(e) as Box<dyn FaceEncoder>);
    let mut extractor = EmbeddingExtractor::new(encoder);

    let probe_a = extractor.extract(a);
    let probe_b = extractor.extract(b);
    let (Some(first_a), Some(first_b)) = (probe_a.first(), probe_b.first()) else {
        bail!(
            "no face found (a: {} faces, b: {} faces)",
            probe_a.len(),
            probe_b.len()
        );
    };

    let outcome = match_embeddings(first_a, first_b, tolerance);
    println!("regime:     {:?} / {:?}", first_a.kind(), first_b.kind());
    println!("faces:      {} / {}", probe_a.len(), probe_b.len());
    println!("distance:   {:.4}", outcome.distance);
    println!("confidence: {:.1}", outcome.confidence());
    let verdict = if outcome.is_match { "yes" } else { "no" };
    println!("match:      {verdict}");
    Ok(())
}

/// The daemon resolves paths in its own working directory.
fn absolute(path: &Path) -> Result<String> {
    let path = std::fs::canonicalize(path).with_context(|| format!("{}", path.display()))?;
    path.to_str()
        .map(str::to_string)
        .with_context(|| format!("non-UTF-8 path {}", path.display()))
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => {
            let pretty = serde_json::to_string_pretty(&value);
            println!("{}", pretty.unwrap_or_else(|_| raw.to_string()));
        }
        Err(_) => println!("{raw}"),
    }
}
