//! Sandbox configuration with builder pattern.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SandboxError};
use crate::sandbox::language::Language;

/// Which isolation strategy serves jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// A fresh container per job.
    #[default]
    Ephemeral,
    /// One long-lived container shared by all jobs.
    WarmPool,
}

impl Strategy {
    /// The name used in `SANDBOX_STRATEGY`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Ephemeral => "ephemeral",
            Strategy::WarmPool => "warm-pool",
        }
    }
}

impl FromStr for Strategy {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ephemeral" => Ok(Strategy::Ephemeral),
            "warm-pool" | "warm_pool" => Ok(Strategy::WarmPool),
            other => Err(SandboxError::Config(format!("unknown strategy: {}", other))),
        }
    }
}

/// Configuration for the code sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum wall-clock time for a job, applied to every language.
    pub timeout: Duration,
    /// Isolation strategy.
    pub strategy: Strategy,
    /// Container runtime binary.
    pub runtime: String,
    /// Memory cap passed to the runtime (e.g. "128m").
    pub memory_limit: String,
    /// CPU share cap.
    pub cpus: f64,
    /// Maximum number of processes inside a container.
    pub pids_limit: u32,
    /// Maximum captured bytes per output stream.
    pub max_output_bytes: usize,
    /// Host directory holding per-job directories (warm pool only).
    pub job_root: PathBuf,
    /// Image for the shared warm-pool container.
    pub warm_image: String,
    /// Name of the shared warm-pool container.
    pub warm_instance_name: String,
    /// Pull missing images during initialization.
    pub pull_images: bool,
    /// Per-language image overrides.
    pub images: HashMap<Language, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            strategy: Strategy::Ephemeral,
            runtime: "docker".to_string(),
            memory_limit: "128m".to_string(),
            cpus: 0.5,
            pids_limit: 64,
            max_output_bytes: 64 * 1024, // 64KB
            job_root: std::env::temp_dir().join("code-sandbox-jobs"),
            warm_image: "code-sandbox-runtime:latest".to_string(),
            warm_instance_name: "code-sandbox-warm".to_string(),
            pull_images: false,
            images: HashMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Read configuration from `SANDBOX_*` environment variables.
    ///
    /// Unset variables keep their defaults. Read once at startup.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(v) = lookup("SANDBOX_TIMEOUT_MS") {
            builder = builder.timeout(Duration::from_millis(parse_number("SANDBOX_TIMEOUT_MS", &v)?));
        }
        if let Some(v) = lookup("SANDBOX_STRATEGY") {
            builder = builder.strategy(v.parse()?);
        }
        if let Some(v) = lookup("SANDBOX_RUNTIME") {
            builder = builder.runtime(v);
        }
        if let Some(v) = lookup("SANDBOX_MEMORY") {
            builder = builder.memory_limit(v);
        }
        if let Some(v) = lookup("SANDBOX_CPUS") {
            builder = builder.cpus(parse_number("SANDBOX_CPUS", &v)?);
        }
        if let Some(v) = lookup("SANDBOX_PIDS_LIMIT") {
            builder = builder.pids_limit(parse_number("SANDBOX_PIDS_LIMIT", &v)?);
        }
        if let Some(v) = lookup("SANDBOX_MAX_OUTPUT_BYTES") {
            builder = builder.max_output_bytes(parse_number("SANDBOX_MAX_OUTPUT_BYTES", &v)?);
        }
        if let Some(v) = lookup("SANDBOX_JOB_ROOT") {
            builder = builder.job_root(v);
        }
        if let Some(v) = lookup("SANDBOX_WARM_IMAGE") {
            builder = builder.warm_image(v);
        }
        if let Some(v) = lookup("SANDBOX_WARM_INSTANCE") {
            builder = builder.warm_instance_name(v);
        }
        if let Some(v) = lookup("SANDBOX_PULL_IMAGES") {
            builder = builder.pull_images(parse_flag("SANDBOX_PULL_IMAGES", &v)?);
        }
        for language in Language::ALL {
            let key = format!("SANDBOX_IMAGE_{}", language.id().to_uppercase());
            if let Some(image) = lookup(&key) {
                builder = builder.image(language, image);
            }
        }

        builder.try_build()
    }

    /// Check the configuration for values the backends cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(SandboxError::Config("timeout must be non-zero".to_string()));
        }
        if self.cpus.is_nan() || self.cpus <= 0.0 {
            return Err(SandboxError::Config("cpus must be positive".to_string()));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config("max_output_bytes must be non-zero".to_string()));
        }
        if self.runtime.trim().is_empty() {
            return Err(SandboxError::Config("runtime must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SandboxError::Config(format!("{} has invalid value: {}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(SandboxError::Config(format!("{} has invalid value: {}", key, value))),
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    timeout: Option<Duration>,
    strategy: Option<Strategy>,
    runtime: Option<String>,
    memory_limit: Option<String>,
    cpus: Option<f64>,
    pids_limit: Option<u32>,
    max_output_bytes: Option<usize>,
    job_root: Option<PathBuf>,
    warm_image: Option<String>,
    warm_instance_name: Option<String>,
    pull_images: Option<bool>,
    images: HashMap<Language, String>,
}

impl SandboxConfigBuilder {
    /// Set the per-job timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the isolation strategy.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set the container runtime binary (e.g. "docker", "podman").
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Set the container memory cap (e.g. "128m", "1g").
    pub fn memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = Some(limit.into());
        self
    }

    /// Set the container CPU cap.
    pub fn cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }

    /// Set the container process limit.
    pub fn pids_limit(mut self, limit: u32) -> Self {
        self.pids_limit = Some(limit);
        self
    }

    /// Set the per-stream output cap in bytes.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Set the host directory for per-job directories.
    pub fn job_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.job_root = Some(path.into());
        self
    }

    /// Set the warm-pool container image.
    pub fn warm_image(mut self, image: impl Into<String>) -> Self {
        self.warm_image = Some(image.into());
        self
    }

    /// Set the warm-pool container name.
    pub fn warm_instance_name(mut self, name: impl Into<String>) -> Self {
        self.warm_instance_name = Some(name.into());
        self
    }

    /// Pull missing images during initialization.
    pub fn pull_images(mut self, pull: bool) -> Self {
        self.pull_images = Some(pull);
        self
    }

    /// Override the image used for one language.
    pub fn image(mut self, language: Language, image: impl Into<String>) -> Self {
        self.images.insert(language, image.into());
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            timeout: self.timeout.unwrap_or(default.timeout),
            strategy: self.strategy.unwrap_or(default.strategy),
            runtime: self.runtime.unwrap_or(default.runtime),
            memory_limit: self.memory_limit.unwrap_or(default.memory_limit),
            cpus: self.cpus.unwrap_or(default.cpus),
            pids_limit: self.pids_limit.unwrap_or(default.pids_limit),
            max_output_bytes: self.max_output_bytes.unwrap_or(default.max_output_bytes),
            job_root: self.job_root.unwrap_or(default.job_root),
            warm_image: self.warm_image.unwrap_or(default.warm_image),
            warm_instance_name: self.warm_instance_name.unwrap_or(default.warm_instance_name),
            pull_images: self.pull_images.unwrap_or(default.pull_images),
            images: self.images,
        }
    }

    /// Build and validate the SandboxConfig.
    pub fn try_build(self) -> Result<SandboxConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.strategy, Strategy::Ephemeral);
        assert_eq!(config.memory_limit, "128m");
        assert_eq!(config.max_output_bytes, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(5))
            .strategy(Strategy::WarmPool)
            .memory_limit("256m")
            .cpus(1.0)
            .image(Language::Python, "python:3.12-slim")
            .build();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.strategy, Strategy::WarmPool);
        assert_eq!(config.memory_limit, "256m");
        assert_eq!(config.cpus, 1.0);
        assert_eq!(config.images.get(&Language::Python).unwrap(), "python:3.12-slim");
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("SANDBOX_TIMEOUT_MS", "2500"),
            ("SANDBOX_STRATEGY", "warm-pool"),
            ("SANDBOX_RUNTIME", "podman"),
            ("SANDBOX_IMAGE_JAVA", "eclipse-temurin:17"),
            ("SANDBOX_PULL_IMAGES", "true"),
        ]
        .into_iter()
        .collect();

        let config = SandboxConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.strategy, Strategy::WarmPool);
        assert_eq!(config.runtime, "podman");
        assert_eq!(config.images.get(&Language::Java).unwrap(), "eclipse-temurin:17");
        assert!(config.pull_images);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = SandboxConfig::from_lookup(|k| {
            (k == "SANDBOX_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));

        let err = SandboxConfig::from_lookup(|k| {
            (k == "SANDBOX_STRATEGY").then(|| "pooled".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn test_pull_images_flag() {
        let lookup = |value: &'static str| {
            move |k: &str| (k == "SANDBOX_PULL_IMAGES").then(|| value.to_string())
        };

        assert!(SandboxConfig::from_lookup(lookup("1")).unwrap().pull_images);
        assert!(SandboxConfig::from_lookup(lookup("Yes")).unwrap().pull_images);
        assert!(!SandboxConfig::from_lookup(lookup("false")).unwrap().pull_images);
        assert!(!SandboxConfig::from_lookup(lookup("0")).unwrap().pull_images);

        let err = SandboxConfig::from_lookup(lookup("treu")).unwrap_err();
        assert!(matches!(err, SandboxError::Config(ref msg) if msg.contains("SANDBOX_PULL_IMAGES")));
    }

    #[test]
    fn test_validate() {
        let config = SandboxConfig::builder().timeout(Duration::ZERO).build();
        assert!(config.validate().is_err());

        let config = SandboxConfig::builder().cpus(0.0).build();
        assert!(config.validate().is_err());
    }
}
