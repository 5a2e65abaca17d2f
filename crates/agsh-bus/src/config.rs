use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::BusResult;

/// GGS weights and thresholds (§4.5). Every field has the spec's literal
/// default and is overridable through the layered config below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GgsConfig {
    pub alpha: f64,
    pub beta: f64,
    pub lambda: f64,
    pub w1: f64,
    pub w2: f64,
    pub r_max: f64,
    pub t_budget_ms: f64,
    pub theta_abandon: f64,
    pub delta: f64,
    pub epsilon: f64,
    pub rho: f64,
    pub lambda_gc: f64,
}

impl Default for GgsConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.3,
            lambda: 0.4,
            w1: 0.6,
            w2: 0.4,
            r_max: 3.0,
            t_budget_ms: 300_000.0,
            theta_abandon: 0.8,
            delta: 0.3,
            epsilon: 0.1,
            rho: 0.5,
            lambda_gc: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    pub subscriber_capacity: usize,
    pub tap_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: crate::bus::DEFAULT_SUBSCRIBER_CAPACITY,
            tap_capacity: crate::bus::DEFAULT_TAP_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Tool-call budget per subtask (§4.3, "e.g. 10").
    pub max_iterations: u32,
    pub shell_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            shell_timeout_secs: 30,
            http_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Retry cap before a subtask is declared `failed` (§4.3, "e.g. 2").
    pub max_retries: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryRuntimeConfig {
    pub gc_interval_secs: u64,
}

impl Default for MemoryRuntimeConfig {
    fn default() -> Self {
        Self { gc_interval_secs: 600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub ggs: GgsConfig,
    pub bus: BusConfig,
    pub executor: ExecutorConfig,
    pub validator: ValidatorConfig,
    pub memory: MemoryRuntimeConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

/// Layered config: global file, project file, environment, CLI overrides,
/// deep-merged in that precedence order — mirrors the config layering used
/// elsewhere in this tree, generalized from JSON patches to a typed
/// `AppConfig` via a final `serde_json::from_value`.
#[derive(Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    global_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(project_path: impl AsRef<Path>) -> BusResult<Self> {
        let project_path = project_path.as_ref().to_path_buf();
        if let Some(parent) = project_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let global_path = resolve_global_config_path().await?;

        let global = read_json_file(&global_path).await;
        let project = read_json_file(&project_path).await;

        let layers = ConfigLayers {
            global,
            project,
            env: env_layer(),
            cli: empty_object(),
        };

        Ok(Self {
            project_path,
            global_path,
            layers: Arc::new(RwLock::new(layers)),
        })
    }

    pub async fn get(&self) -> AppConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    pub async fn apply_cli_overrides(&self, overrides: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.cli, &overrides);
    }

    pub async fn patch_project(&self, patch: Value) -> BusResult<()> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.project, &patch);
        }
        self.save_project().await
    }

    async fn save_project(&self) -> BusResult<()> {
        let snapshot = self.layers.read().await.project.clone();
        write_json_file(&self.project_path, &snapshot).await
    }

    #[allow(dead_code)]
    async fn save_global(&self) -> BusResult<()> {
        let snapshot = self.layers.read().await.global.clone();
        write_json_file(&self.global_path, &snapshot).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn write_json_file(path: &Path, value: &Value) -> BusResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).await?;
    Ok(())
}

async fn read_json_file(path: &Path) -> Value {
    if !path.exists() {
        return empty_object();
    }
    match fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| empty_object()),
        Err(_) => empty_object(),
    }
}

async fn resolve_global_config_path() -> BusResult<PathBuf> {
    if let Ok(path) = std::env::var("AGSH_GLOBAL_CONFIG") {
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("agsh").join("config.json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    Ok(PathBuf::from(".agsh/global_config.json"))
}

/// `AGSH_*` environment overrides, merged in beneath CLI but above the
/// persisted files.
fn env_layer() -> Value {
    let mut root = empty_object();
    if let Ok(api_key) = std::env::var("AGSH_PROVIDER_API_KEY") {
        deep_merge(&mut root, &json!({ "provider": { "api_key": api_key } }));
    }
    if let Ok(url) = std::env::var("AGSH_PROVIDER_URL") {
        deep_merge(&mut root, &json!({ "provider": { "url": url } }));
    }
    if let Ok(model) = std::env::var("AGSH_PROVIDER_MODEL") {
        deep_merge(&mut root, &json!({ "provider": { "default_model": model } }));
    }
    if let Ok(t_budget) = std::env::var("AGSH_GGS_T_BUDGET_MS") {
        if let Ok(v) = t_budget.parse::<f64>() {
            deep_merge(&mut root, &json!({ "ggs": { "t_budget_ms": v } }));
        }
    }
    root
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let ggs = GgsConfig::default();
        assert_eq!(ggs.alpha, 0.6);
        assert_eq!(ggs.beta, 0.3);
        assert_eq!(ggs.lambda, 0.4);
        assert_eq!(ggs.w1, 0.6);
        assert_eq!(ggs.w2, 0.4);
        assert_eq!(ggs.r_max, 3.0);
        assert_eq!(ggs.t_budget_ms, 300_000.0);
        assert_eq!(ggs.theta_abandon, 0.8);
        assert_eq!(ggs.delta, 0.3);
        assert_eq!(ggs.epsilon, 0.1);
        assert_eq!(ggs.rho, 0.5);
    }

    #[tokio::test]
    async fn cli_overrides_win_over_project_and_global() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(
            "AGSH_GLOBAL_CONFIG",
            dir.path().join("global.json").to_string_lossy().to_string(),
        );
        let store = ConfigStore::new(dir.path().join("project.json")).await.unwrap();
        store
            .patch_project(json!({ "ggs": { "delta": 0.1 } }))
            .await
            .unwrap();
        store
            .apply_cli_overrides(json!({ "ggs": { "delta": 0.9 } }))
            .await;
        let cfg = store.get().await;
        assert_eq!(cfg.ggs.delta, 0.9);
        std::env::remove_var("AGSH_GLOBAL_CONFIG");
    }
}
