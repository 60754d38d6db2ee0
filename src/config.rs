//! Node and job configuration.

use crate::error::{FabricError, FabricResult};
use crate::membership::service::HTTP_PORT_OFFSET;
use crate::storage::key::Key;

use clap::Parser;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "fabric-node", about = "Cluster fabric node")]
pub struct NodeConfig {
    /// Gossip (UDP) bind address.
    #[arg(long, env = "FABRIC_BIND")]
    pub bind: SocketAddr,

    /// HTTP bind address. Defaults to the gossip port + 1000.
    #[arg(long, env = "FABRIC_HTTP")]
    pub http: Option<SocketAddr>,

    /// Gossip address of an existing member; repeatable.
    #[arg(long = "seed", env = "FABRIC_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<SocketAddr>,

    /// Concurrent CPU-bound jobs. Defaults to the available parallelism.
    #[arg(long, env = "FABRIC_WORKERS")]
    pub workers: Option<usize>,

    #[arg(long, env = "FABRIC_RPC_TIMEOUT_MS", default_value_t = 500)]
    pub rpc_timeout_ms: u64,

    #[arg(long, env = "FABRIC_RPC_ATTEMPTS", default_value_t = 3)]
    pub rpc_attempts: usize,
}

impl NodeConfig {
    pub fn http_addr(&self) -> SocketAddr {
        self.http.unwrap_or_else(|| {
            SocketAddr::new(self.bind.ip(), self.bind.port().wrapping_add(HTTP_PORT_OFFSET))
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.workers == Some(0) {
            return Err(FabricError::InvalidConfig("workers must be positive".to_string()));
        }
        if self.rpc_attempts == 0 {
            return Err(FabricError::InvalidConfig("rpc attempts must be positive".to_string()));
        }
        if self.http_addr() == self.bind {
            return Err(FabricError::InvalidConfig(format!(
                "gossip and HTTP cannot share {}",
                self.bind
            )));
        }
        Ok(())
    }
}

/// Plain `key -> value` job configuration, handed to a map-reduce job through
/// `MapReduce::with_params`.
///
/// Getters fall back to the supplied default when the key is absent or does
/// not parse; `required` errors instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobParams {
    values: BTreeMap<String, String>,
}

impl JobParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `k=v,k=v`. Whitespace around keys and values is trimmed.
    pub fn parse(input: &str) -> FabricResult<Self> {
        let mut params = Self::new();
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(FabricError::InvalidConfig(format!("expected key=value, got {}", pair)));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(FabricError::InvalidConfig(format!("empty key in {}", pair)));
            }
            params.set(key, value.trim());
        }
        Ok(params)
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values.get(key).map(String::as_str).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.values.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => true,
            Some(v) if matches!(v.as_str(), "false" | "0" | "no") => false,
            _ => default,
        }
    }

    /// Value as a user key name.
    pub fn get_key(&self, key: &str) -> Option<Key> {
        self.values.get(key).map(|name| Key::make(name))
    }

    pub fn required(&self, key: &str) -> FabricResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| FabricError::InvalidConfig(format!("missing parameter {}", key)))
    }

    pub fn required_u64(&self, key: &str) -> FabricResult<u64> {
        let raw = self.required(key)?;
        raw.parse()
            .map_err(|_| FabricError::InvalidConfig(format!("{}={} is not an integer", key, raw)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
