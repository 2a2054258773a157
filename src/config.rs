use crate::models::directory::DirectoryUploadMetadata;
use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose};
use chrono::NaiveDate;
use clap::Parser;
use rand::RngCore;
use std::{env, fmt, path::PathBuf};

const DEFAULT_REGION: &str = "nyc3";
const DEFAULT_PASSWORD: &str = "upload123";
const DEFAULT_PORT: u16 = 5000;
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Object storage connection settings, shared by the server and the CLI.
#[derive(Clone)]
pub struct StorageSettings {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub endpoint: String,
    pub bucket: String,
    pub use_acceleration: bool,
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("use_acceleration", &self.use_acceleration)
            .finish()
    }
}

impl StorageSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read `DO_SPACES_*` and `USE_ACCELERATION` through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("missing DigitalOcean Spaces setting {name}"))
        };

        let access_key = required("DO_SPACES_KEY")?;
        let secret_key = required("DO_SPACES_SECRET")?;
        let bucket = required("DO_SPACES_BUCKET")?;
        let region = lookup("DO_SPACES_REGION").unwrap_or_else(|| DEFAULT_REGION.into());
        let endpoint = lookup("DO_SPACES_ENDPOINT")
            .unwrap_or_else(|| format!("https://{region}.digitaloceanspaces.com"));
        let use_acceleration = lookup("USE_ACCELERATION")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        Ok(Self {
            access_key,
            secret_key,
            region,
            endpoint,
            bucket,
            use_acceleration,
        })
    }
}

/// `true`, `yes` and `1` (any case) are on; everything else is off.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1"
    )
}

/// Centralized server configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    /// Custom spool directory, if `UPLOAD_TEMP_DIR` names an existing one.
    pub temp_dir: Option<PathBuf>,
    pub password: String,
    pub session_secret: String,
    pub debug: bool,
    pub storage: StorageSettings,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("static_dir", &self.static_dir)
            .field("temp_dir", &self.temp_dir)
            .field("debug", &self.debug)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Password-gated upload relay to DigitalOcean Spaces")]
pub struct Args {
    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding index.html, style.css and app.js
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Verbose logging (also enabled by RELAY_ENV=development)
    #[arg(long)]
    pub debug: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let storage = StorageSettings::from_lookup(&lookup)?;

        // --- Environment fallback ---
        let env_port = match lookup("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing PORT value `{}`", value))?,
            None => DEFAULT_PORT,
        };
        let temp_dir = lookup("UPLOAD_TEMP_DIR")
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir());
        let password = lookup("APP_PASSWORD").unwrap_or_else(|| DEFAULT_PASSWORD.into());
        let session_secret = lookup("SECRET_KEY")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(random_secret);
        let env_debug = lookup("RELAY_ENV").is_some_and(|v| v == "development");

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            static_dir: args.static_dir.unwrap_or_else(|| PathBuf::from("static")),
            temp_dir,
            password,
            session_secret,
            debug: args.debug || env_debug,
            storage,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Where request bodies are spooled when they cannot be streamed.
    pub fn spool_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Flags of the `auto-upload` command.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Automatically upload directories to DigitalOcean Spaces")]
pub struct AutoUploadArgs {
    /// User name for metadata
    #[arg(long)]
    pub user: String,

    /// Camera name for metadata
    #[arg(long)]
    pub camera: String,

    /// Task name for metadata
    #[arg(long)]
    pub task: String,

    /// Date for metadata (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub date: Option<String>,

    /// Specific directories to upload (defaults to every directory next to the executable)
    #[arg(long, num_args = 0..)]
    pub dirs: Vec<String>,

    /// Directory the --dirs names are resolved against
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Log file written alongside standard output
    #[arg(long, default_value = "upload_log.txt")]
    pub log_file: PathBuf,
}

impl AutoUploadArgs {
    /// Validate the date and build the key metadata. `today` fills in a
    /// missing `--date`.
    pub fn metadata(&self, today: NaiveDate) -> Result<DirectoryUploadMetadata> {
        let date = match &self.date {
            Some(raw) => {
                if NaiveDate::parse_from_str(raw, DATE_FORMAT).is_err() {
                    bail!("Date must be in YYYY-MM-DD format");
                }
                raw.clone()
            }
            None => today.format(DATE_FORMAT).to_string(),
        };

        Ok(DirectoryUploadMetadata {
            user: self.user.clone(),
            camera: self.camera.clone(),
            task: self.task.clone(),
            date,
        })
    }

    /// The base directory: `--base-dir`, else the executable's directory.
    pub fn resolve_base_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.base_dir {
            return Ok(dir.clone());
        }
        let exe = env::current_exe().context("locating the executable")?;
        exe.parent()
            .map(PathBuf::from)
            .context("executable has no parent directory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const CREDS: [(&str, &str); 3] = [
        ("DO_SPACES_KEY", "key"),
        ("DO_SPACES_SECRET", "secret"),
        ("DO_SPACES_BUCKET", "media"),
    ];

    #[test]
    fn storage_defaults() {
        let settings = StorageSettings::from_lookup(lookup_from(&CREDS)).unwrap();
        assert_eq!(settings.region, "nyc3");
        assert_eq!(settings.endpoint, "https://nyc3.digitaloceanspaces.com");
        assert!(settings.use_acceleration);
    }

    #[test]
    fn endpoint_follows_region() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("DO_SPACES_REGION", "ams3"));
        pairs.push(("USE_ACCELERATION", "No"));
        let settings = StorageSettings::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(settings.endpoint, "https://ams3.digitaloceanspaces.com");
        assert!(!settings.use_acceleration);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = StorageSettings::from_lookup(lookup_from(&CREDS[..2])).unwrap_err();
        assert!(err.to_string().contains("DO_SPACES_BUCKET"));
    }

    #[test]
    fn flags() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("yes"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("on"));
    }

    #[test]
    fn server_config_merges_args_over_env() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("PORT", "8080"));
        pairs.push(("APP_PASSWORD", "hunter2"));
        pairs.push(("RELAY_ENV", "development"));
        let args = Args {
            port: Some(9000),
            ..Args::default()
        };

        let cfg = AppConfig::from_sources(args, lookup_from(&pairs)).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.password, "hunter2");
        assert!(cfg.debug);
        assert!(!cfg.session_secret.is_empty());
        assert_eq!(cfg.addr(), "0.0.0.0:9000");
    }

    #[test]
    fn bad_port_is_an_error() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("PORT", "http"));
        assert!(AppConfig::from_sources(Args::default(), lookup_from(&pairs)).is_err());
    }

    #[test]
    fn missing_temp_dir_falls_back_to_system() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("UPLOAD_TEMP_DIR", "/definitely/not/here"));
        let cfg = AppConfig::from_sources(Args::default(), lookup_from(&pairs)).unwrap();
        assert_eq!(cfg.temp_dir, None);
        assert_eq!(cfg.spool_dir(), env::temp_dir());
    }

    #[test]
    fn auto_upload_date_validation() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let mut args = AutoUploadArgs::parse_from([
            "auto-upload",
            "--user",
            "alice",
            "--camera",
            "cam1",
            "--task",
            "capture",
        ]);
        assert_eq!(args.metadata(today).unwrap().date, "2024-01-15");

        args.date = Some("2024-02-30".into());
        assert!(args.metadata(today).is_err());

        args.date = Some("15/01/2024".into());
        assert!(args.metadata(today).is_err());

        args.date = Some("2023-12-31".into());
        assert_eq!(args.metadata(today).unwrap().date, "2023-12-31");
    }

    #[test]
    fn dirs_accept_several_values() {
        let args = AutoUploadArgs::parse_from([
            "auto-upload",
            "--user",
            "u",
            "--camera",
            "c",
            "--task",
            "t",
            "--dirs",
            "a",
            "b",
        ]);
        assert_eq!(args.dirs, vec!["a", "b"]);
        assert_eq!(args.log_file, PathBuf::from("upload_log.txt"));
    }
}
