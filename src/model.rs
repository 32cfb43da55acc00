//! Template model shared between the coordinator and the workers
//!
//! The coordinator owns the canonical [`TemplateModel`] and is the only code
//! that mutates it. Workers receive an immutable [`ModelSnapshot`] through an
//! `Arc`, build a private working set from it, and hand back a [`Delta`] when
//! their generation is stopped.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

pub const WILDCARD_TOKEN: &str = "<*>";

/// Stable identifier of a template.
///
/// Derived from the tokens a template was created from, so two workers that
/// discover the same pattern independently produce the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(u64);

impl TemplateId {
    pub fn for_tokens(tokens: &[String]) -> Self {
        Self(xxh3_64(tokens.join(" ").as_bytes()))
    }

    /// Alternate id for the rare case where a miner already holds a different
    /// cluster under [`TemplateId::for_tokens`].
    pub fn for_tokens_salted(tokens: &[String], salt: u64) -> Self {
        Self(xxh3_64_with_seed(tokens.join(" ").as_bytes(), salt))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for TemplateId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

impl Serialize for TemplateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TemplateId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A learned line pattern. Variable positions hold [`WILDCARD_TOKEN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub tokens: Vec<String>,
    pub count: u64,
}

impl Template {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            id: TemplateId::for_tokens(&tokens),
            tokens,
            count: 0,
        }
    }

    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }
}

/// Changes a worker accumulated relative to the snapshot it started from.
///
/// `count` on every template in a delta is the number of hits since the
/// snapshot, not an absolute count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub modified: Vec<Template>,
    pub new: Vec<Template>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.new.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modified.len() + self.new.len()
    }
}

/// Outcome of folding one delta into the canonical model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub combined: usize,
}

impl MergeSummary {
    pub fn absorb(&mut self, other: MergeSummary) {
        self.added += other.added;
        self.combined += other.combined;
    }
}

/// Token-wise generalisation: positions that disagree become wildcards.
///
/// Returns true when `existing` changed. Templates of different length are
/// never merged by a prefix-tree miner, so a length mismatch is left alone.
pub fn generalize(existing: &mut [String], incoming: &[String]) -> bool {
    if existing.len() != incoming.len() {
        return false;
    }

    let mut changed = false;
    for (slot, token) in existing.iter_mut().zip(incoming) {
        if slot != token && slot != WILDCARD_TOKEN {
            *slot = WILDCARD_TOKEN.to_string();
            changed = true;
        }
    }
    changed
}

/// The canonical, merged template set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateModel {
    templates: IndexMap<TemplateId, Template>,
}

impl TemplateModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates<I: IntoIterator<Item = Template>>(templates: I) -> Self {
        let mut model = Self::new();
        for template in templates {
            model.absorb(template);
        }
        model
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, id: &TemplateId) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn contains(&self, id: &TemplateId) -> bool {
        self.templates.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    /// Fold a worker delta into the model.
    ///
    /// New templates are inserted. A template whose id is already known (a
    /// modification, or the same discovery made by a sibling worker) is
    /// generalised token-wise and its hit count is added.
    pub fn merge(&mut self, delta: Delta) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for template in delta.new.into_iter().chain(delta.modified) {
            if self.absorb(template) {
                summary.added += 1;
            } else {
                summary.combined += 1;
            }
        }
        summary
    }

    fn absorb(&mut self, incoming: Template) -> bool {
        match self.templates.get_mut(&incoming.id) {
            Some(existing) => {
                generalize(&mut existing.tokens, &incoming.tokens);
                existing.count += incoming.count;
                false
            }
            None => {
                self.templates.insert(incoming.id, incoming);
                true
            }
        }
    }

    /// Templates ordered by hit count, most frequent first
    pub fn ranked(&self) -> Vec<&Template> {
        let mut templates: Vec<&Template> = self.templates.values().collect();
        templates.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.tokens.cmp(&b.tokens))
        });
        templates
    }

    pub fn snapshot(&self, generation: u64) -> Arc<ModelSnapshot> {
        Arc::new(ModelSnapshot {
            generation,
            model: self.clone(),
        })
    }
}

/// Read-only copy of the canonical model handed to one worker generation
#[derive(Debug)]
pub struct ModelSnapshot {
    generation: u64,
    model: TemplateModel,
}

impl ModelSnapshot {
    pub fn new(generation: u64, model: TemplateModel) -> Self {
        Self { generation, model }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn model(&self) -> &TemplateModel {
        &self.model
    }
}

pub fn format_templates_output(templates: &[&Template]) -> String {
    if templates.is_empty() {
        return "No templates found".to_string();
    }

    let mut output = String::new();
    output.push_str(&format!("templates ({} items):\n", templates.len()));

    for (idx, template) in templates.iter().enumerate() {
        output.push_str(&format!(
            "  #{:<3} {:<40} {}\n",
            idx + 1,
            template.text(),
            template.count
        ));
    }

    output.trim_end().to_string()
}
