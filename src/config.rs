use crate::{auth::TokenValidation, services::file_service::DEFAULT_PRESIGN_CONCURRENCY};
use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use jsonwebtoken::Algorithm;
use std::{env, fmt, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "FILE_GATEWAY_";

/// Which `ObjectBackend` the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    S3,
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown backend `{}` (expected `s3` or `memory`)", other),
        }
    }
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// `endpoint/bucket/key` addressing, needed by MinIO.
    pub path_style: bool,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub enabled: bool,
    pub validation: TokenValidation,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub s3: S3Settings,
    /// Buckets created at startup when running on the memory backend.
    pub memory_buckets: Vec<String>,
    pub backend_timeout: Duration,
    pub max_upload_bytes: usize,
    pub presign_concurrency: usize,
    pub auth: AuthSettings,
}

/// Command-line configuration. Every flag overrides the matching
/// `FILE_GATEWAY_*` environment variable.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "HTTP gateway for files in an S3-compatible store")]
pub struct Args {
    /// Host to bind to (FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (FILE_GATEWAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// S3 endpoint URL (FILE_GATEWAY_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 region (FILE_GATEWAY_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Use path-style addressing (FILE_GATEWAY_S3_PATH_STYLE)
    #[arg(long)]
    pub s3_path_style: Option<bool>,

    /// Timeout for a single backend call in seconds (FILE_GATEWAY_BACKEND_TIMEOUT_SECS)
    #[arg(long)]
    pub backend_timeout_secs: Option<u64>,

    /// Largest accepted upload body in bytes (FILE_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Presign calls kept in flight per listing (FILE_GATEWAY_PRESIGN_CONCURRENCY)
    #[arg(long)]
    pub presign_concurrency: Option<usize>,

    /// Require bearer tokens on /api routes (FILE_GATEWAY_AUTH_ENABLED)
    #[arg(long)]
    pub auth_enabled: Option<bool>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables visible through `lookup` over defaults.
    ///
    /// Secrets (S3 keys, token signing key) are read from the environment only.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = EnvSource { lookup: &lookup };

        let s3 = S3Settings {
            endpoint: args
                .s3_endpoint
                .unwrap_or_else(|| env.string("S3_ENDPOINT", "http://127.0.0.1:9000")),
            region: args
                .s3_region
                .unwrap_or_else(|| env.string("S3_REGION", "us-east-1")),
            access_key: env.optional("S3_ACCESS_KEY"),
            secret_key: env.optional("S3_SECRET_KEY"),
            path_style: match args.s3_path_style {
                Some(value) => value,
                None => env.parse("S3_PATH_STYLE", true)?,
            },
        };

        let algorithm = env.parse("AUTH_ALGORITHM", Algorithm::RS256)?;
        let validation = TokenValidation {
            verify_signature: env.parse("AUTH_VERIFY_SIGNATURE", true)?,
            verify_expiry: env.parse("AUTH_VERIFY_EXPIRY", true)?,
            verify_audience: env.parse("AUTH_VERIFY_AUDIENCE", false)?,
            audiences: env.list("AUTH_AUDIENCES"),
            allowed_issuers: env.list("AUTH_ALLOWED_ISSUERS"),
            allowed_scopes: env.list("AUTH_ALLOWED_SCOPES"),
            scope_claim: env.string("AUTH_SCOPE_CLAIM", "scp"),
            algorithm,
            signing_key: env.optional("AUTH_SIGNING_KEY"),
            leeway_secs: env.parse("AUTH_LEEWAY_SECS", 60)?,
        };

        let cfg = Self {
            host: args.host.unwrap_or_else(|| env.string("HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => env.parse("PORT", 8080)?,
            },
            backend: match args.backend {
                Some(kind) => kind,
                None => env.parse("BACKEND", BackendKind::S3)?,
            },
            s3,
            memory_buckets: env.list("MEMORY_BUCKETS"),
            backend_timeout: Duration::from_secs(match args.backend_timeout_secs {
                Some(secs) => secs,
                None => env.parse("BACKEND_TIMEOUT_SECS", 30)?,
            }),
            max_upload_bytes: match args.max_upload_bytes {
                Some(bytes) => bytes,
                None => env.parse("MAX_UPLOAD_BYTES", 512 * 1024 * 1024)?,
            },
            presign_concurrency: match args.presign_concurrency {
                Some(width) => width,
                None => env.parse("PRESIGN_CONCURRENCY", DEFAULT_PRESIGN_CONCURRENCY)?,
            },
            auth: AuthSettings {
                enabled: match args.auth_enabled {
                    Some(enabled) => enabled,
                    None => env.parse("AUTH_ENABLED", true)?,
                },
                validation,
            },
        };

        if cfg.presign_concurrency == 0 {
            bail!("{}PRESIGN_CONCURRENCY must be at least 1", ENV_PREFIX);
        }
        if cfg.backend_timeout.is_zero() {
            bail!("{}BACKEND_TIMEOUT_SECS must be at least 1", ENV_PREFIX);
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Prefixed, typed view over an environment lookup.
struct EnvSource<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<'_, F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, name))
            .filter(|value| !value.trim().is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(name) {
            Some(value) => value.trim().parse::<T>().map_err(|err| {
                anyhow::anyhow!("{}", err)
                    .context(format!("parsing {}{} value `{}`", ENV_PREFIX, name, value))
            }),
            None => Ok(default),
        }
    }

    /// Comma-separated list; blank items are dropped.
    fn list(&self, name: &str) -> Vec<String> {
        self.optional(name)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_env_or_flags() {
        let cfg = AppConfig::resolve(Args::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.backend, BackendKind::S3);
        assert!(cfg.s3.path_style);
        assert_eq!(cfg.backend_timeout, Duration::from_secs(30));
        assert_eq!(cfg.presign_concurrency, DEFAULT_PRESIGN_CONCURRENCY);
        assert!(cfg.auth.enabled);
        assert!(cfg.auth.validation.verify_signature);
        assert!(!cfg.auth.validation.verify_audience);
        assert_eq!(cfg.auth.validation.scope_claim, "scp");
    }

    #[test]
    fn flags_override_environment() {
        let args = Args::parse_from(["file-gateway", "--port", "9100", "--backend", "memory"]);
        let cfg = AppConfig::resolve(
            args,
            lookup(&[("PORT", "7000"), ("BACKEND", "s3"), ("HOST", "127.0.0.1")]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9100");
        assert_eq!(cfg.backend, BackendKind::Memory);
    }

    #[test]
    fn auth_lists_are_split_on_commas() {
        let cfg = AppConfig::resolve(
            Args::default(),
            lookup(&[
                ("AUTH_ALLOWED_ISSUERS", "https://idp.example/a, https://idp.example/b,"),
                ("AUTH_ALLOWED_SCOPES", "files.read"),
                ("AUTH_ALGORITHM", "HS256"),
            ]),
        )
        .unwrap();
        let validation = cfg.auth.validation;
        assert_eq!(
            validation.allowed_issuers,
            vec!["https://idp.example/a", "https://idp.example/b"]
        );
        assert_eq!(validation.allowed_scopes, vec!["files.read"]);
        assert_eq!(validation.algorithm, Algorithm::HS256);
    }

    #[test]
    fn malformed_values_are_reported_with_the_variable_name() {
        let err = AppConfig::resolve(Args::default(), lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(format!("{:#}", err).contains("FILE_GATEWAY_PORT"));

        let err =
            AppConfig::resolve(Args::default(), lookup(&[("PRESIGN_CONCURRENCY", "0")])).unwrap_err();
        assert!(err.to_string().contains("PRESIGN_CONCURRENCY"));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let cfg = AppConfig::resolve(
            Args::default(),
            lookup(&[("S3_SECRET_KEY", "hunter2"), ("AUTH_SIGNING_KEY", "shh")]),
        )
        .unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("shh"));
    }
}
