//! Drain prefix-tree template miner
//!
//! Lines are grouped by token count, routed down a fixed-depth tree keyed on
//! their leading tokens, and matched against the clusters at the leaf by
//! token similarity. Tokens containing digits are routed through the
//! wildcard branch so that ids and counters do not fan the tree out.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Delta, ModelSnapshot, Template, TemplateId, TemplateModel, WILDCARD_TOKEN};
use crate::transform::{Record, RecordTransformer, TransformError, TransformerFactory};

#[derive(Debug, Clone, PartialEq)]
pub struct DrainConfig {
    pub depth: usize,
    pub max_children: usize,
    pub similarity: f64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            max_children: 100,
            similarity: 0.4,
        }
    }
}

impl DrainConfig {
    pub fn sanitized(&self) -> Self {
        let depth = self.depth.max(2);
        let max_children = self.max_children.max(1);
        let similarity = self.similarity.clamp(0.0, 1.0);
        Self {
            depth,
            max_children,
            similarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrainMatch {
    pub template_id: TemplateId,
    pub template: String,
    /// Line tokens at the template's wildcard positions
    pub params: Vec<String>,
    pub is_new: bool,
}

#[derive(Debug)]
struct Cluster {
    id: TemplateId,
    template_tokens: Vec<String>,
    count: u64,
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    cluster_ids: Vec<usize>,
}

#[derive(Debug)]
struct Baseline {
    tokens: Vec<String>,
    count: u64,
}

#[derive(Debug)]
pub struct Drain {
    config: DrainConfig,
    roots: HashMap<usize, Node>,
    clusters: Vec<Cluster>,
    index: HashMap<TemplateId, usize>,
    baseline: HashMap<TemplateId, Baseline>,
}

impl Drain {
    pub fn new(config: DrainConfig) -> Self {
        Self {
            config: config.sanitized(),
            roots: HashMap::new(),
            clusters: Vec::new(),
            index: HashMap::new(),
            baseline: HashMap::new(),
        }
    }

    /// Seed the tree with every template of `model`. Later deltas are
    /// computed against this starting point.
    pub fn from_model(config: DrainConfig, model: &TemplateModel) -> Self {
        let mut drain = Self::new(config);
        for template in model.iter() {
            drain.seed(template);
        }
        drain
    }

    fn seed(&mut self, template: &Template) {
        let tokens = &template.tokens;
        let depth = self.config.depth.min(tokens.len().max(1));
        let root = self.roots.entry(tokens.len()).or_default();
        let leaf = descend_to_leaf(root, tokens, depth, &self.config);

        let slot = self.clusters.len();
        self.clusters.push(Cluster {
            id: template.id,
            template_tokens: tokens.clone(),
            count: template.count,
        });
        self.index.insert(template.id, slot);
        leaf.cluster_ids.push(slot);
        self.baseline.insert(
            template.id,
            Baseline {
                tokens: tokens.clone(),
                count: template.count,
            },
        );
    }

    pub fn ingest(&mut self, text: &str) -> DrainMatch {
        let tokens: Vec<String> = text
            .split_whitespace()
            .map(|token| token.to_string())
            .collect();
        let depth = self.config.depth.min(tokens.len().max(1));

        let (slot, is_new) = match self.search(&tokens, depth) {
            Some(slot) => {
                update_template(&mut self.clusters[slot], &tokens);
                (slot, false)
            }
            None => {
                let root = self.roots.entry(tokens.len()).or_default();
                let leaf = descend_to_leaf(root, &tokens, depth, &self.config);
                let slot = create_cluster(&tokens, &mut self.clusters, &mut self.index);
                leaf.cluster_ids.push(slot);
                (slot, true)
            }
        };

        let cluster = &mut self.clusters[slot];
        cluster.count += 1;

        let params = cluster
            .template_tokens
            .iter()
            .zip(&tokens)
            .filter(|(templ, _)| templ.as_str() == WILDCARD_TOKEN)
            .map(|(_, token)| token.clone())
            .collect();

        DrainMatch {
            template_id: cluster.id,
            template: cluster.template_tokens.join(" "),
            params,
            is_new,
        }
    }

    /// Read-only lookup. Unknown tokens fall back to the wildcard branch.
    fn search(&self, tokens: &[String], depth: usize) -> Option<usize> {
        let mut node = self.roots.get(&tokens.len())?;
        for token in tokens.iter().take(depth.saturating_sub(1)) {
            let key = if is_variable_token(token) {
                WILDCARD_TOKEN
            } else {
                token.as_str()
            };
            let children = &node.children;
            node = children
                .get(key)
                .or_else(|| children.get(WILDCARD_TOKEN))?;
        }
        best_match(node, tokens, &self.clusters, &self.config)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Clusters that grew or generalised since seeding, plus new ones.
    /// Counts are increments over the seeded counts.
    pub fn delta(&self) -> Delta {
        let mut delta = Delta::default();
        for cluster in &self.clusters {
            match self.baseline.get(&cluster.id) {
                Some(base) => {
                    if cluster.count > base.count || cluster.template_tokens != base.tokens {
                        delta.modified.push(Template {
                            id: cluster.id,
                            tokens: cluster.template_tokens.clone(),
                            count: cluster.count.saturating_sub(base.count),
                        });
                    }
                }
                None => delta.new.push(Template {
                    id: cluster.id,
                    tokens: cluster.template_tokens.clone(),
                    count: cluster.count,
                }),
            }
        }
        delta
    }
}

fn descend_to_leaf<'a>(
    root: &'a mut Node,
    tokens: &[String],
    depth: usize,
    config: &DrainConfig,
) -> &'a mut Node {
    let mut node = root;
    for token in tokens.iter().take(depth.saturating_sub(1)) {
        let mut key = if is_variable_token(token) {
            WILDCARD_TOKEN
        } else {
            token.as_str()
        };

        if !node.children.contains_key(key)
            && node.children.len() >= config.max_children
            && key != WILDCARD_TOKEN
        {
            key = WILDCARD_TOKEN;
        }

        node = node.children.entry(key.to_string()).or_default();
    }

    node
}

fn best_match(
    leaf: &Node,
    tokens: &[String],
    clusters: &[Cluster],
    config: &DrainConfig,
) -> Option<usize> {
    let mut best_slot = None;
    let mut best_similarity = 0.0;
    let mut best_non_wildcards = 0usize;

    for &slot in &leaf.cluster_ids {
        let cluster = &clusters[slot];
        let (similarity, non_wildcards) = template_similarity(&cluster.template_tokens, tokens);
        if best_slot.is_none()
            || similarity > best_similarity
            || (similarity == best_similarity && non_wildcards > best_non_wildcards)
        {
            best_similarity = similarity;
            best_non_wildcards = non_wildcards;
            best_slot = Some(slot);
        }
    }

    best_slot.filter(|_| best_similarity >= config.similarity)
}

fn create_cluster(
    tokens: &[String],
    clusters: &mut Vec<Cluster>,
    index: &mut HashMap<TemplateId, usize>,
) -> usize {
    let mut id = TemplateId::for_tokens(tokens);
    let mut salt = 1u64;
    while index.contains_key(&id) {
        id = TemplateId::for_tokens_salted(tokens, salt);
        salt += 1;
    }

    clusters.push(Cluster {
        id,
        template_tokens: tokens.to_vec(),
        count: 0,
    });
    let slot = clusters.len() - 1;
    index.insert(id, slot);
    slot
}

fn update_template(cluster: &mut Cluster, tokens: &[String]) {
    for (existing, token) in cluster.template_tokens.iter_mut().zip(tokens) {
        if existing != token {
            *existing = WILDCARD_TOKEN.to_string();
        }
    }
}

fn is_variable_token(token: &str) -> bool {
    token.chars().any(|ch| ch.is_ascii_digit())
}

fn template_similarity(template: &[String], tokens: &[String]) -> (f64, usize) {
    let mut matches = 0usize;
    let mut non_wildcards = 0usize;

    for (templ, token) in template.iter().zip(tokens.iter()) {
        if templ == WILDCARD_TOKEN {
            continue;
        }
        non_wildcards += 1;
        if templ == token {
            matches += 1;
        }
    }

    let denom = template.len().max(1) as f64;
    (matches as f64 / denom, non_wildcards)
}

/// Worker-side transformer: one private miner seeded from a snapshot
pub struct DrainTransformer {
    drain: Drain,
}

impl DrainTransformer {
    pub fn new(config: DrainConfig, snapshot: &ModelSnapshot) -> Self {
        Self {
            drain: Drain::from_model(config, snapshot.model()),
        }
    }
}

impl RecordTransformer for DrainTransformer {
    fn apply(&mut self, message: &str) -> Result<Record, TransformError> {
        if message.trim().is_empty() {
            return Err(TransformError::EmptyMessage);
        }

        let matched = self.drain.ingest(message);
        let mut record = Record::new();
        record.insert(
            "template_id".to_string(),
            Value::String(matched.template_id.to_string()),
        );
        record.insert("template".to_string(), Value::String(matched.template));
        record.insert("params".to_string(), json!(matched.params));
        Ok(record)
    }

    fn delta(self) -> Delta {
        self.drain.delta()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DrainFactory {
    config: DrainConfig,
}

impl DrainFactory {
    pub fn new(config: DrainConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }
}

impl TransformerFactory for DrainFactory {
    type Transformer = DrainTransformer;

    fn create(&self, snapshot: Arc<ModelSnapshot>) -> DrainTransformer {
        DrainTransformer::new(self.config.clone(), &snapshot)
    }
}
