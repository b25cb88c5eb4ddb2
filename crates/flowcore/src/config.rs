use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Runtime settings shared by every node of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Environment applied beneath each node's own `env`.
    #[serde(alias = "environment")]
    pub env: HashMap<String, String>,

    /// Registry prefixes; the first one qualifies bare image names.
    #[serde(alias = "containerRegistries")]
    pub container_registries: Vec<String>,

    /// Program that launches containers.
    #[serde(alias = "containerRuntime")]
    pub container_runtime: String,

    /// Number of concurrent scheduler workers. Defaults to the node count.
    #[serde(alias = "maxConcurrency")]
    pub max_concurrency: Option<usize>,

    /// Number of worker processes backing `process` nodes.
    #[serde(alias = "processPoolSize")]
    pub process_pool_size: Option<usize>,

    /// Argv used to start a process-pool worker. Defaults to
    /// `<current executable> worker`.
    #[serde(alias = "workerCommand")]
    pub worker_command: Option<Vec<String>>,

    /// Initial contents of the run's global state.
    #[serde(alias = "sharedState")]
    pub shared_state: Map<String, Value>,

    /// Record an execution trace for each run.
    pub trace: bool,

    #[serde(alias = "eventBufferSize")]
    pub event_buffer_size: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            container_registries: Vec::new(),
            container_runtime: "docker".to_string(),
            max_concurrency: None,
            process_pool_size: None,
            worker_command: None,
            shared_state: Map::new(),
            trace: true,
            event_buffer_size: 1000,
        }
    }
}

impl GlobalConfig {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Qualify `image` with the first configured registry unless it already
    /// names a registry host.
    pub fn resolve_image(&self, image: &str) -> String {
        if is_fully_qualified(image) {
            return image.to_string();
        }
        match self.container_registries.first() {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), image),
            None => image.to_string(),
        }
    }

    /// `global.env` overlaid with `node_env`; the node wins on conflicts.
    pub fn merged_env(&self, node_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.env.clone();
        merged.extend(node_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub fn process_pool_size(&self) -> usize {
        self.process_pool_size
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}

fn is_fully_qualified(image: &str) -> bool {
    if image.contains("://") {
        return true;
    }
    match image.split_once('/') {
        Some((host, _)) => host.contains('.') || host.contains(':') || host == "localhost",
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_registry() -> GlobalConfig {
        GlobalConfig {
            container_registries: vec!["registry.example.com/team/".into()],
            ..GlobalConfig::default()
        }
    }

    #[test]
    fn bare_images_get_the_first_registry() {
        let config = with_registry();
        assert_eq!(config.resolve_image("worker:1.0"), "registry.example.com/team/worker:1.0");
        assert_eq!(config.resolve_image("library/alpine"), "registry.example.com/team/library/alpine");
    }

    #[test]
    fn qualified_images_are_untouched() {
        let config = with_registry();
        assert_eq!(config.resolve_image("ghcr.io/acme/tool"), "ghcr.io/acme/tool");
        assert_eq!(config.resolve_image("localhost:5000/tool"), "localhost:5000/tool");
        assert_eq!(config.resolve_image("localhost/tool"), "localhost/tool");
    }

    #[test]
    fn no_registry_means_no_prefix() {
        assert_eq!(GlobalConfig::default().resolve_image("alpine"), "alpine");
    }

    #[test]
    fn camel_case_aliases_are_accepted() {
        let config = GlobalConfig::from_json(json!({
            "maxConcurrency": 3,
            "processPoolSize": 2,
            "sharedState": {"seed": 1},
            "environment": {"A": "1"}
        }))
        .unwrap();
        assert_eq!(config.max_concurrency, Some(3));
        assert_eq!(config.process_pool_size(), 2);
        assert_eq!(config.shared_state.get("seed"), Some(&json!(1)));
        assert_eq!(config.env.get("A").map(String::as_str), Some("1"));
        assert!(config.trace);
        assert_eq!(config.container_runtime, "docker");
    }

    #[test]
    fn node_env_overrides_global_env() {
        let mut config = GlobalConfig::default();
        config.env.insert("A".into(), "global".into());
        config.env.insert("B".into(), "global".into());
        let node_env = HashMap::from([("A".to_string(), "node".to_string())]);
        let merged = config.merged_env(&node_env);
        assert_eq!(merged["A"], "node");
        assert_eq!(merged["B"], "global");
    }
}
