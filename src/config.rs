use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::admission::AdmissionConfig;
use crate::backend::{CustomBackend, IntelligenceClass};
use crate::cascade::CascadePolicy;
use crate::catalog::{self, BackendKind, BuiltinBackend};
use crate::error::CascadeError;
use crate::knowledge::KnowledgeConfig;

/// Default location of the optional TOML overlay.
pub const DEFAULT_CONFIG_FILE: &str = "cascade.toml";

/// Per-intelligence-class defaults merged under a request's own options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct ExpertDefaults {
    pub temperature: Option<f64>,
    pub max_output_units: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub builtins: Vec<BuiltinBackend>,
    pub custom_backends: Vec<CustomBackend>,
    /// Designated primary backend (sticky retries apply to it).
    pub primary: String,
    /// Fixed cascade order. `None` derives it from the intelligence class.
    pub preference: Option<Vec<String>>,
    pub cascade: CascadePolicy,
    pub admission: AdmissionConfig,
    pub knowledge: KnowledgeConfig,
    pub expert: HashMap<IntelligenceClass, ExpertDefaults>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            builtins: Vec::new(),
            custom_backends: Vec::new(),
            primary: BackendKind::Gemini.id().to_string(),
            preference: None,
            cascade: CascadePolicy::default(),
            admission: AdmissionConfig::default(),
            knowledge: KnowledgeConfig::default(),
            expert: HashMap::new(),
        }
    }
}

impl Config {
    /// Credentials and overrides from the process environment only.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        for kind in BackendKind::ALL {
            let api_key = env::var(kind.env_var())
                .ok()
                .filter(|k| !k.trim().is_empty());
            if api_key.is_none() {
                tracing::warn!("{} not set, {} unavailable", kind.env_var(), kind.id());
            }
            config.builtins.push(BuiltinBackend {
                kind,
                api_key,
                model: None,
                base_url: None,
            });
        }

        if let Ok(primary) = env::var("CASCADE_PRIMARY")
            && !primary.trim().is_empty()
        {
            config.primary = primary.trim().to_string();
        }
        if let Ok(order) = env::var("CASCADE_PREFERENCE") {
            let ids: Vec<String> = order
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !ids.is_empty() {
                config.preference = Some(ids);
            }
        }
        if let Ok(dir) = env::var("CASCADE_CACHE_DIR") {
            config.knowledge.cache_dir = PathBuf::from(dir);
        }

        if !config
            .builtins
            .iter()
            .any(|b| b.api_key.is_some())
        {
            tracing::error!("no backend API keys configured, only local/custom backends can run");
        }

        config
    }

    /// Environment, overlaid with the TOML file named by `CASCADE_CONFIG`
    /// (or `./cascade.toml` when present), then validated.
    pub fn load() -> Result<Self, CascadeError> {
        let mut config = Self::from_env();
        let path = env::var("CASCADE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        if path.exists() {
            config.apply_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config file");
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<(), CascadeError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CascadeError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        self.apply_toml(&text)
    }

    pub fn apply_toml(&mut self, text: &str) -> Result<(), CascadeError> {
        let file: FileConfig = toml::from_str(text)
            .map_err(|e| CascadeError::Configuration(format!("invalid config file: {e}")))?;
        file.apply(self)
    }

    /// Reject configurations that cannot work, at load time rather than first use.
    pub fn validate(&self) -> Result<(), CascadeError> {
        let mut seen = std::collections::HashSet::new();
        for custom in &self.custom_backends {
            catalog::validate_custom(custom)?;
            if !seen.insert(custom.id.as_str()) {
                return Err(CascadeError::Configuration(format!(
                    "duplicate custom backend id '{}'",
                    custom.id
                )));
            }
        }
        if !catalog::is_resolvable(&self.primary, &self.custom_backends) {
            return Err(CascadeError::Configuration(format!(
                "primary backend '{}' is not a known backend",
                self.primary
            )));
        }
        if let Some(order) = &self.preference {
            if order.is_empty() {
                return Err(CascadeError::Configuration(
                    "preference list must not be empty".to_string(),
                ));
            }
            for id in order {
                if !catalog::is_resolvable(id, &self.custom_backends) {
                    return Err(CascadeError::Configuration(format!(
                        "preference names unknown backend '{id}'"
                    )));
                }
            }
        }
        if self.admission.max_concurrent == 0 {
            return Err(CascadeError::Configuration(
                "admission.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn builtin_mut(&mut self, kind: BackendKind) -> &mut BuiltinBackend {
        if let Some(pos) = self.builtins.iter().position(|b| b.kind == kind) {
            return &mut self.builtins[pos];
        }
        self.builtins.push(BuiltinBackend {
            kind,
            api_key: None,
            model: None,
            base_url: None,
        });
        let last = self.builtins.len() - 1;
        &mut self.builtins[last]
    }
}

// ---------------------------------------------------------------------------
// TOML file shape. Every field optional; present fields override defaults.
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    cascade: Option<FileCascade>,
    #[serde(default)]
    admission: Option<FileAdmission>,
    #[serde(default)]
    knowledge: Option<FileKnowledge>,
    #[serde(default)]
    models: HashMap<String, String>,
    #[serde(default)]
    base_urls: HashMap<String, String>,
    #[serde(default)]
    custom_backends: Vec<CustomBackend>,
    #[serde(default)]
    expert: HashMap<String, ExpertDefaults>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileCascade {
    primary: Option<String>,
    preference: Option<Vec<String>>,
    blackball_ms: Option<u64>,
    sticky_retries: Option<u32>,
    sticky_backoff_ms: Option<u64>,
    last_resort_backoff_ms: Option<u64>,
    max_retries: Option<u32>,
    last_max_retries: Option<u32>,
    transient_base_ms: Option<u64>,
    rescue_wait_ms: Option<u64>,
    prune_threshold_chars: Option<usize>,
    keep_recent_turns: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileAdmission {
    max_concurrent: Option<usize>,
    fast_base_gap_ms: Option<u64>,
    heavy_base_gap_ms: Option<u64>,
    throttled_gap_ms: Option<u64>,
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileKnowledge {
    cache_dir: Option<PathBuf>,
    ttl_secs: Option<u64>,
    max_entries: Option<usize>,
    budget_chars: Option<usize>,
    max_summary_words: Option<usize>,
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

impl FileConfig {
    fn apply(self, config: &mut Config) -> Result<(), CascadeError> {
        if let Some(c) = self.cascade {
            if let Some(v) = c.primary {
                config.primary = v;
            }
            if let Some(v) = c.preference {
                config.preference = Some(v);
            }
            let p = &mut config.cascade;
            if let Some(v) = c.blackball_ms {
                p.blackball_duration = ms(v);
            }
            if let Some(v) = c.sticky_retries {
                p.sticky_retries = v;
            }
            if let Some(v) = c.sticky_backoff_ms {
                p.sticky_backoff_step = ms(v);
            }
            if let Some(v) = c.last_resort_backoff_ms {
                p.last_resort_backoff_step = ms(v);
            }
            if let Some(v) = c.max_retries {
                p.max_retries = v;
            }
            if let Some(v) = c.last_max_retries {
                p.last_max_retries = v;
            }
            if let Some(v) = c.transient_base_ms {
                p.transient_base = ms(v);
            }
            if let Some(v) = c.rescue_wait_ms {
                p.rescue_wait = ms(v);
            }
            if let Some(v) = c.prune_threshold_chars {
                p.prune_threshold_chars = v;
            }
            if let Some(v) = c.keep_recent_turns {
                p.keep_recent_turns = v;
            }
        }

        if let Some(a) = self.admission {
            let cfg = &mut config.admission;
            if let Some(v) = a.max_concurrent {
                cfg.max_concurrent = v;
            }
            if let Some(v) = a.fast_base_gap_ms {
                cfg.fast_base_gap = ms(v);
            }
            if let Some(v) = a.heavy_base_gap_ms {
                cfg.heavy_base_gap = ms(v);
            }
            if let Some(v) = a.throttled_gap_ms {
                cfg.throttled_gap = ms(v);
            }
            if let Some(v) = a.cooldown_ms {
                cfg.cooldown = ms(v);
            }
        }

        if let Some(k) = self.knowledge {
            let cfg = &mut config.knowledge;
            if let Some(v) = k.cache_dir {
                cfg.cache_dir = v;
            }
            if let Some(v) = k.ttl_secs {
                cfg.ttl = Duration::from_secs(v);
            }
            if let Some(v) = k.max_entries {
                cfg.max_entries = v;
            }
            if let Some(v) = k.budget_chars {
                cfg.budget_chars = Some(v);
            }
            if let Some(v) = k.max_summary_words {
                cfg.max_summary_words = v;
            }
        }

        for (id, model) in self.models {
            let kind = BackendKind::from_id(&id).ok_or_else(|| {
                CascadeError::Configuration(format!("[models] names unknown backend '{id}'"))
            })?;
            config.builtin_mut(kind).model = Some(model);
        }
        for (id, url) in self.base_urls {
            let kind = BackendKind::from_id(&id).ok_or_else(|| {
                CascadeError::Configuration(format!("[base_urls] names unknown backend '{id}'"))
            })?;
            config.builtin_mut(kind).base_url = Some(url);
        }

        for custom in self.custom_backends {
            config.custom_backends.retain(|c| c.id != custom.id);
            config.custom_backends.push(custom);
        }

        for (class, defaults) in self.expert {
            let class = match class.as_str() {
                "fast" | "text" | "chat" => IntelligenceClass::Fast,
                "reasoning" | "logic" => IntelligenceClass::Reasoning,
                other => {
                    return Err(CascadeError::Configuration(format!(
                        "[expert] names unknown intelligence class '{other}'"
                    )));
                }
            };
            config.expert.insert(class, defaults);
        }

        Ok(())
    }
}
