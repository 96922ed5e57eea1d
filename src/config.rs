//! Environment-variable configuration (§6 Configuration), read once at boot
//! via `std::env::var`, matching the teacher's enterprise config pattern —
//! no config crate, no file-based layering.

use crate::error::{CoreError, Result};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub hostname: String,
    pub port: u16,
    pub worker_mode: bool,
    pub worker_id: Option<String>,
    pub partitions: Vec<usize>,
    pub ollama_url: String,
    pub minio_endpoint: Option<String>,
    pub minio_port: Option<u16>,
    pub minio_use_ssl: bool,
    pub minio_access_key: Option<String>,
    pub minio_secret_key: Option<String>,
    pub redis_url: Option<String>,
    pub api_endpoint: Option<String>,
    pub partition_count: usize,
    pub replication_factor: usize,
    pub worker_count: usize,
}

impl Config {
    /// Loads and validates configuration from the process environment.
    /// Malformed numeric/list values are `Configuration` errors, never a
    /// silent fallback to the default.
    pub fn from_env() -> Result<Self> {
        let port = parse_env("PORT", 3000)?;
        let worker_mode = env_or("WORKER_MODE", "false") == "true";
        let minio_port = match env_opt("MINIO_PORT") {
            Some(v) => Some(v.parse::<u16>().map_err(|_| {
                CoreError::Configuration(format!("MINIO_PORT is not a valid port: {v}"))
            })?),
            None => None,
        };
        let partitions = match env_opt("PARTITIONS") {
            Some(v) => parse_partition_list(&v)?,
            None => Vec::new(),
        };

        Ok(Self {
            hostname: env_or("HOSTNAME", "0.0.0.0"),
            port,
            worker_mode,
            worker_id: env_opt("WORKER_ID"),
            partitions,
            ollama_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            minio_endpoint: env_opt("MINIO_ENDPOINT"),
            minio_port,
            minio_use_ssl: env_or("MINIO_USE_SSL", "false") == "true",
            minio_access_key: env_opt("MINIO_ACCESS_KEY"),
            minio_secret_key: env_opt("MINIO_SECRET_KEY"),
            redis_url: env_opt("REDIS_URL"),
            api_endpoint: env_opt("API_ENDPOINT"),
            partition_count: parse_env("PARTITION_COUNT", 8)?,
            replication_factor: parse_env("REPLICATION_FACTOR", 2)?,
            worker_count: parse_env("WORKER_COUNT", num_cpus::get())?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| CoreError::Configuration(format!("{key} is not a valid number: {v}"))),
        Err(_) => Ok(default),
    }
}

fn parse_partition_list(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| CoreError::Configuration(format!("invalid partition id: {s}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_list_parses_comma_separated_ids() {
        assert_eq!(parse_partition_list("0,1, 2").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn partition_list_rejects_non_numeric_entries() {
        assert!(parse_partition_list("0,x").is_err());
    }

    #[test]
    fn empty_partition_list_is_empty_vec() {
        assert_eq!(parse_partition_list("").unwrap(), Vec::<usize>::new());
    }
}
