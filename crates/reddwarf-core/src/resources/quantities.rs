use crate::{ReddwarfError, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CPU assumed for a container that requests none, when scoring
pub const DEFAULT_MILLI_CPU_REQUEST: i64 = 100;
/// Memory assumed for a container that requests none, when scoring
pub const DEFAULT_MEMORY_REQUEST: i64 = 200 * 1024 * 1024;

const BINARY_SUFFIXES: [(&str, i64); 6] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
];

const DECIMAL_SUFFIXES: [(&str, i64); 6] = [
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Resource quantities for nodes and pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
    /// Number of pods
    pub pods: i64,
}

impl ResourceQuantities {
    pub fn new(cpu_millicores: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
            pods: 0,
        }
    }

    /// Parse CPU string (e.g., "2", "1000m", "0.5")
    pub fn parse_cpu(s: &str) -> Result<i64> {
        let s = s.trim();
        if let Some(m) = s.strip_suffix('m') {
            // Millicores
            m.parse::<i64>()
                .map_err(|e| ReddwarfError::invalid_quantity(s, e.to_string()))
        } else if let Ok(cores) = s.parse::<f64>() {
            // Cores as float
            Ok((cores * 1000.0).round() as i64)
        } else {
            Err(ReddwarfError::invalid_quantity(s, "not a CPU quantity"))
        }
    }

    /// Parse memory string (e.g., "128Mi", "1Gi", "1G", "1024")
    pub fn parse_memory(s: &str) -> Result<i64> {
        let s = s.trim();
        let (number, multiplier) = BINARY_SUFFIXES
            .iter()
            .chain(DECIMAL_SUFFIXES.iter())
            .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
            .unwrap_or((s, 1));

        if let Ok(whole) = number.parse::<i64>() {
            return whole
                .checked_mul(multiplier)
                .ok_or_else(|| ReddwarfError::invalid_quantity(s, "value overflows"));
        }

        number
            .parse::<f64>()
            .map(|f| (f * multiplier as f64) as i64)
            .map_err(|e| ReddwarfError::invalid_quantity(s, e.to_string()))
    }

    /// Parse a plain count (e.g. the "pods" resource)
    pub fn parse_count(s: &str) -> Result<i64> {
        s.trim()
            .parse::<i64>()
            .map_err(|e| ReddwarfError::invalid_quantity(s, e.to_string()))
    }

    /// Get CPU, memory and pod count from a resource map (k8s-openapi format).
    ///
    /// Unparseable entries count as zero.
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let cpu_millicores = resources
            .get("cpu")
            .and_then(|q| Self::parse_cpu(&q.0).ok())
            .unwrap_or(0);

        let memory_bytes = resources
            .get("memory")
            .and_then(|q| Self::parse_memory(&q.0).ok())
            .unwrap_or(0);

        let pods = resources
            .get("pods")
            .and_then(|q| Self::parse_count(&q.0).ok())
            .unwrap_or(0);

        Self {
            cpu_millicores,
            memory_bytes,
            pods,
        }
    }

    /// True when no cpu or memory is requested
    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0 && self.memory_bytes == 0
    }

    pub fn add(&mut self, other: &ResourceQuantities) {
        self.cpu_millicores = self.cpu_millicores.saturating_add(other.cpu_millicores);
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
        self.pods = self.pods.saturating_add(other.pods);
    }

    pub fn sub(&mut self, other: &ResourceQuantities) {
        self.cpu_millicores = self.cpu_millicores.saturating_sub(other.cpu_millicores);
        self.memory_bytes = self.memory_bytes.saturating_sub(other.memory_bytes);
        self.pods = self.pods.saturating_sub(other.pods);
    }

    /// Raise each resource to at least the value in `other`
    pub fn set_max(&mut self, other: &ResourceQuantities) {
        self.cpu_millicores = self.cpu_millicores.max(other.cpu_millicores);
        self.memory_bytes = self.memory_bytes.max(other.memory_bytes);
        self.pods = self.pods.max(other.pods);
    }
}
