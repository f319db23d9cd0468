//! Map-reduce digestion of large source sets into one bounded synthesis.
//!
//! Small inputs pass through verbatim. Larger ones are packed into batches
//! that fit the lead backend's budget, summarised concurrently (map), and the
//! summaries folded until they fit (reduce). Both the whole digest and each
//! batch summary are cached by content.

pub mod cache;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendCapabilities, GenerationOptions, GenerationRequest};
use crate::cascade::{CallContext, Orchestrator};
use crate::error::CascadeError;

use self::cache::{KnowledgeCache, content_hash, generate_key};

/// Smallest per-batch budget, sized for narrow-context backends.
pub const MIN_BUDGET_CHARS: usize = 16_000;
/// Largest per-batch budget.
pub const MAX_BUDGET_CHARS: usize = 100_000;

const BATCH_SEPARATOR: &str = "\n\n=== NEXT BATCH SUMMARY ===\n\n";
const MAP_TEMPERATURE: f64 = 0.3;
const SYNTHESIS_INTENT: &str = "The sources below are partial summaries of one larger body of \
material. Merge them into a single cohesive summary, keeping connections and overarching \
themes and dropping repetition.";
const ANALYST_SYSTEM: &str =
    "You are a meticulous research analyst. Report only what the sources support.";

#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeConfig {
    pub cache_dir: PathBuf,
    pub ttl: Duration,
    pub max_entries: usize,
    /// Fixed per-batch budget; `None` sizes it from the lead backend.
    pub budget_chars: Option<usize>,
    pub max_summary_words: usize,
    /// Payloads shorter than this are never cached.
    pub min_payload_chars: usize,
    /// Reduce passes before the synthesis is cut to fit.
    pub max_reduce_passes: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cascade-cache"),
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_entries: 100,
            budget_chars: None,
            max_summary_words: 1_500,
            min_payload_chars: 20,
            max_reduce_passes: 4,
        }
    }
}

/// One source document, or a summary standing in for a batch of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: String,
    pub name: String,
    pub content: String,
}

impl Material {
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    fn size(&self) -> usize {
        self.content.chars().count()
    }
}

/// `(stage, percentage)` progress for a running digest.
pub type DigestProgress = Arc<dyn Fn(&str, u8) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DigestOptions {
    pub topic: String,
    pub intent: String,
    pub progress: Option<DigestProgress>,
    pub call: CallContext,
}

impl DigestOptions {
    pub fn new(topic: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            intent: intent.into(),
            ..Default::default()
        }
    }

    fn report(&self, stage: &str, pct: u8) {
        if let Some(cb) = &self.progress {
            cb(stage, pct);
        }
    }
}

/// Per-batch budget for a backend: its context units taken as characters,
/// clamped to the supported range.
pub fn budget_for(caps: &BackendCapabilities) -> usize {
    (caps.max_context_units as usize).clamp(MIN_BUDGET_CHARS, MAX_BUDGET_CHARS)
}

/// Pack materials in order into batches of at most `budget` chars. A
/// material larger than `budget` is split into consecutive parts of exactly
/// `budget` chars (the last may be shorter), each alone in its batch.
pub fn create_batches(materials: &[Material], budget: usize) -> Vec<Vec<Material>> {
    let budget = budget.max(1);
    let mut batches: Vec<Vec<Material>> = Vec::new();
    let mut current: Vec<Material> = Vec::new();
    let mut current_size = 0;

    for material in materials {
        let size = material.size();
        if size > budget {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_size = 0;
            }
            tracing::info!(
                material = %material.name,
                chars = size,
                "hard-splitting oversize material"
            );
            let chars: Vec<char> = material.content.chars().collect();
            for (n, part) in chars.chunks(budget).enumerate() {
                batches.push(vec![Material {
                    id: format!("{}-part-{}", material.id, n + 1),
                    name: format!("{} (part {})", material.name, n + 1),
                    content: part.iter().collect(),
                }]);
            }
            continue;
        }

        if current_size + size > budget && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(material.clone());
        current_size += size;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn format_sources(materials: &[Material]) -> String {
    materials
        .iter()
        .map(|m| format!("--- SOURCE: {} ---\n{}", m.name, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub struct KnowledgeProcessor {
    orchestrator: Arc<Orchestrator>,
    cache: Arc<KnowledgeCache>,
    config: KnowledgeConfig,
}

impl KnowledgeProcessor {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        cache: Arc<KnowledgeCache>,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<KnowledgeCache> {
        &self.cache
    }

    /// The per-batch budget in effect for the next digest.
    pub fn budget(&self) -> usize {
        if let Some(fixed) = self.config.budget_chars {
            return fixed.max(1);
        }
        self.orchestrator
            .lead_capabilities(&GenerationRequest::default())
            .map(|caps| budget_for(&caps))
            .unwrap_or(MIN_BUDGET_CHARS)
    }

    /// Reduce `materials` to text that fits one generation request.
    pub async fn digest(
        &self,
        materials: &[Material],
        options: &DigestOptions,
    ) -> Result<String, CascadeError> {
        let hashes: Vec<String> = materials.iter().map(|m| content_hash(&m.content)).collect();
        let key = generate_key(&hashes, &options.topic);

        if let Some(hit) = self.cache.get(&key).await {
            tracing::info!(key = %key, "digest served from cache");
            options.report("loaded from cache", 100);
            return Ok(hit);
        }

        options.report("analysing sources", 10);
        let budget = self.budget();
        let total: usize = materials.iter().map(Material::size).sum();

        if total < budget {
            tracing::info!(chars = total, budget, "digest direct path");
            return Ok(format_sources(materials));
        }

        tracing::info!(chars = total, budget, "digest map-reduce path");
        let synthesis = self.map_reduce(materials, budget, options).await?;
        let result = format!(
            "[META: synthesized summary of {} source files]\n\n{synthesis}",
            materials.len()
        );
        self.cache.set(&key, &result).await;
        Ok(result)
    }

    async fn map_reduce(
        &self,
        materials: &[Material],
        budget: usize,
        options: &DigestOptions,
    ) -> Result<String, CascadeError> {
        let mut current: Vec<Material> = materials.to_vec();
        let mut intent = options.intent.clone();
        let mut pass = 0;

        loop {
            let batches = create_batches(&current, budget);
            tracing::info!(pass, batches = batches.len(), "map phase");
            if pass == 0 {
                options.report(&format!("preparing {} batches", batches.len()), 15);
            }

            let summaries = self.map_batches(&batches, pass, &intent, options).await?;

            options.report("merging knowledge", 75);
            let combined = summaries.join(BATCH_SEPARATOR);
            pass += 1;

            let size = combined.chars().count();
            if size <= budget {
                return Ok(combined);
            }
            if pass >= self.config.max_reduce_passes {
                tracing::warn!(
                    passes = pass,
                    chars = size,
                    budget,
                    "reduce did not converge, truncating synthesis"
                );
                return Ok(truncate_chars(&combined, budget));
            }

            tracing::info!(pass, chars = size, "reduce pass needed");
            options.report("refining knowledge", 80);
            current = summaries
                .into_iter()
                .enumerate()
                .map(|(i, s)| {
                    let id = format!("summary-{}", &content_hash(&s)[..12]);
                    Material::new(id, format!("Summary batch {}", i + 1), s)
                })
                .collect();
            intent = SYNTHESIS_INTENT.to_string();
        }
    }

    /// Summarise every batch concurrently. Admission still caps and spaces
    /// the calls; the first failure aborts the rest.
    async fn map_batches(
        &self,
        batches: &[Vec<Material>],
        pass: usize,
        intent: &str,
        options: &DigestOptions,
    ) -> Result<Vec<String>, CascadeError> {
        let total = batches.len().max(1);
        let done = AtomicUsize::new(0);
        let advance = || {
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            let pct = 10 + (n * 60 / total) as u8;
            (n, pct)
        };

        let jobs = batches.iter().enumerate().map(|(idx, batch)| {
            let advance = &advance;
            async move {
                let ids: Vec<&str> = batch.iter().map(|m| m.id.as_str()).collect();
                let chunk_key =
                    generate_key(&ids, &format!("{}-chunk-{pass}-{idx}", options.topic));

                if let Some(hit) = self.cache.get(&chunk_key).await {
                    let (n, pct) = advance();
                    options.report(&format!("batch {n}/{total} restored from cache"), pct);
                    return Ok::<String, CascadeError>(hit);
                }

                let prompt = self.map_prompt(batch, intent, &options.topic);
                let request = GenerationRequest::new(prompt, ANALYST_SYSTEM)
                    .with_options(GenerationOptions {
                        temperature: Some(MAP_TEMPERATURE),
                        ..Default::default()
                    });
                let result = self
                    .orchestrator
                    .generate_with(request, &options.call)
                    .await?;

                self.cache.set(&chunk_key, &result.content).await;
                let (n, pct) = advance();
                options.report(&format!("analysed batch {n}/{total}"), pct);
                Ok(result.content)
            }
        });

        try_join_all(jobs).await
    }

    fn map_prompt(&self, batch: &[Material], intent: &str, topic: &str) -> String {
        format!(
            "Analyse the following material for the topic \"{topic}\".\n\
             Goal: {intent}\n\n\
             Extract the crucial facts, definitions, core arguments and chronology. \
             Ignore irrelevant noise and write a clean, structured summary of at most \
             {words} words.\n\n\
             SOURCES:\n{sources}",
            words = self.config.max_summary_words,
            sources = format_sources(batch),
        )
    }
}
