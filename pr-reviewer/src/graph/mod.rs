//! Dependency graph and batching for Stage 1.
//!
//! Builds an undirected weighted graph over changed files from one of three
//! sources, in preference order:
//! 1. pre-computed enrichment relationships carried on the request;
//! 2. the retrieval service's deterministic context (imports, extends,
//!    class/namespace membership);
//! 3. shared parent directory, as a last resort.
//!
//! Connected components are computed with union-find over file indices, and
//! components are packed into batches so related files are reviewed in the
//! same LLM call.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use contextor::DeterministicContext;
use tracing::{debug, info};

use crate::model::enrichment::{PrEnrichmentData, RelationshipType};
use crate::model::plan::{FileGroup, Priority, ReviewFile};

/// Edge weight per relationship kind. Unknown kinds weigh 0.5.
fn weight_for(kind: &str) -> f64 {
    match kind {
        "changed_file" => 1.0,
        "EXTENDS" | "IMPLEMENTS" | "definition" => 0.95,
        "IMPORTS" => 0.90,
        "CALLS" | "same_class" => 0.85,
        "same_namespace" => 0.75,
        "SAME_PACKAGE" => 0.60,
        _ => 0.5,
    }
}

fn relationship_kind(rel: RelationshipType) -> &'static str {
    match rel {
        RelationshipType::Imports => "IMPORTS",
        RelationshipType::Extends => "EXTENDS",
        RelationshipType::Implements => "IMPLEMENTS",
        RelationshipType::Calls => "CALLS",
        RelationshipType::SamePackage => "SAME_PACKAGE",
        RelationshipType::References => "REFERENCES",
    }
}

/// A file in the dependency graph.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub path: String,
    pub priority: Priority,
    pub related_files: BTreeSet<String>,
    pub imports_symbols: BTreeSet<String>,
    pub exports_symbols: BTreeSet<String>,
    /// Sum of incident edge strengths, clamped to 5.0.
    pub relationship_strength: f64,
}

impl FileNode {
    fn new(path: String, priority: Priority) -> Self {
        Self {
            path,
            priority,
            related_files: BTreeSet::new(),
            imports_symbols: BTreeSet::new(),
            exports_symbols: BTreeSet::new(),
            relationship_strength: 0.0,
        }
    }
}

/// An undirected relationship between two files.
#[derive(Debug, Clone)]
pub struct RelationshipEdge {
    pub source: String,
    pub target: String,
    pub kind: String,
    pub matched_on: String,
    pub strength: f64,
}

/// One entry of a Stage-1 batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub file: ReviewFile,
    pub priority: Priority,
    pub has_relationships: bool,
    pub relationship_strength: f64,
    /// Related peers placed earlier in the same batch.
    pub related_in_batch: Vec<String>,
}

/// The dependency graph over changed files.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, FileNode>,
    edges: Vec<RelationshipEdge>,
}

impl DependencyGraph {
    /// Build from pre-computed enrichment relationships.
    pub fn from_enrichment(file_groups: &[FileGroup], data: &PrEnrichmentData) -> Self {
        let mut graph = Self::with_nodes(file_groups);

        for rel in &data.relationships {
            let kind = relationship_kind(rel.relationship_type);
            graph.add_edge(
                &rel.source_file,
                &rel.target_file,
                kind,
                rel.matched_on.as_deref().unwrap_or(""),
            );
        }

        for meta in &data.file_metadata {
            if let Some(node) = graph.nodes.get_mut(&meta.path) {
                node.imports_symbols
                    .extend(meta.imports.iter().map(|s| last_symbol_segment(s)));
                node.exports_symbols.extend(meta.semantic_names.iter().cloned());
            }
        }

        graph.recompute_strengths();
        info!(
            files = graph.nodes.len(),
            relationships = graph.edges.len(),
            "dependency graph built from enrichment"
        );
        graph
    }

    /// Build from the retrieval service's deterministic context.
    pub fn from_deterministic(file_groups: &[FileGroup], ctx: &DeterministicContext) -> Self {
        let mut graph = Self::with_nodes(file_groups);

        // Per-file metadata from the changed-file chunks.
        for (file_path, chunks) in &ctx.changed_files {
            let norm = file_path.trim_start_matches('/').to_string();
            let Some(node) = graph.nodes.get_mut(&norm) else {
                continue;
            };
            for chunk in chunks {
                if let Some(name) = &chunk.metadata.primary_name {
                    node.exports_symbols.insert(name.clone());
                }
                node.exports_symbols
                    .extend(chunk.metadata.semantic_names.iter().cloned());
                node.imports_symbols
                    .extend(chunk.metadata.imports.iter().map(|s| last_symbol_segment(s)));
            }
        }

        // Files that define symbols referenced by other changed files.
        let mut definition_edges: Vec<(String, String, String)> = Vec::new();
        for (symbol, chunks) in &ctx.related_definitions {
            for chunk in chunks {
                let related = chunk.path().trim_start_matches('/').to_string();
                if !graph.nodes.contains_key(&related) {
                    continue;
                }
                for (path, node) in &graph.nodes {
                    if path == &related {
                        continue;
                    }
                    if node.imports_symbols.contains(symbol) || node.exports_symbols.contains(symbol)
                    {
                        definition_edges.push((path.clone(), related.clone(), symbol.clone()));
                    }
                }
            }
        }
        for (a, b, symbol) in definition_edges {
            graph.add_edge(&a, &b, "definition", &symbol);
        }

        // Class and namespace membership connect their member files pairwise.
        for (class_name, chunks) in &ctx.class_context {
            let members = member_paths(&graph, chunks);
            graph.connect_pairwise(&members, "same_class", class_name);
        }
        for (namespace, chunks) in &ctx.namespace_context {
            let members = member_paths(&graph, chunks);
            graph.connect_pairwise(&members, "same_namespace", namespace);
        }

        graph.recompute_strengths();
        info!(
            files = graph.nodes.len(),
            relationships = graph.edges.len(),
            "dependency graph built from deterministic context"
        );
        graph
    }

    /// Last resort: files sharing a parent directory are related.
    pub fn by_directory(file_groups: &[FileGroup]) -> Self {
        let mut graph = Self::with_nodes(file_groups);

        let mut dir_files: HashMap<String, Vec<String>> = HashMap::new();
        for path in graph.nodes.keys() {
            let dir = match path.rfind('/') {
                Some(idx) => path[..idx].to_string(),
                None => String::new(),
            };
            dir_files.entry(dir).or_default().push(path.clone());
        }

        for files in dir_files.values() {
            if files.len() < 2 {
                continue;
            }
            for a in files {
                for b in files {
                    if a != b {
                        graph.nodes.get_mut(a).unwrap().related_files.insert(b.clone());
                    }
                }
            }
        }

        debug!(files = graph.nodes.len(), "dependency graph built by directory");
        graph
    }

    fn with_nodes(file_groups: &[FileGroup]) -> Self {
        let mut nodes = BTreeMap::new();
        for group in file_groups {
            for f in &group.files {
                nodes
                    .entry(f.path.clone())
                    .or_insert_with(|| FileNode::new(f.path.clone(), group.priority));
            }
        }
        Self {
            nodes,
            edges: Vec::new(),
        }
    }

    /// Insert an undirected, deduplicated edge between known nodes.
    fn add_edge(&mut self, a: &str, b: &str, kind: &str, matched_on: &str) {
        if a == b || !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let duplicate = self
            .edges
            .iter()
            .any(|e| e.source == lo && e.target == hi && e.kind == kind);
        if !duplicate {
            self.edges.push(RelationshipEdge {
                source: lo.to_string(),
                target: hi.to_string(),
                kind: kind.to_string(),
                matched_on: matched_on.to_string(),
                strength: weight_for(kind),
            });
        }
        self.nodes.get_mut(a).unwrap().related_files.insert(b.to_string());
        self.nodes.get_mut(b).unwrap().related_files.insert(a.to_string());
    }

    fn connect_pairwise(&mut self, members: &[String], kind: &str, matched_on: &str) {
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                self.add_edge(&members[i], &members[j], kind, matched_on);
            }
        }
    }

    fn recompute_strengths(&mut self) {
        for node in self.nodes.values_mut() {
            node.relationship_strength = 0.0;
        }
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if let Some(node) = self.nodes.get_mut(endpoint) {
                    node.relationship_strength = (node.relationship_strength + edge.strength).min(5.0);
                }
            }
        }
    }

    /// Connected components via union-find over file indices.
    ///
    /// Avoids recursion on deep graphs; edges are undirected so reachability
    /// is well-defined.
    pub fn connected_components(&self) -> Vec<Vec<String>> {
        let paths: Vec<&String> = self.nodes.keys().collect();
        let index: HashMap<&str, usize> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| (p.as_str(), i))
            .collect();

        let mut uf = UnionFind::new(paths.len());
        for (path, node) in &self.nodes {
            let a = index[path.as_str()];
            for related in &node.related_files {
                if let Some(&b) = index.get(related.as_str()) {
                    uf.union(a, b);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (i, path) in paths.iter().enumerate() {
            components.entry(uf.find(i)).or_default().push((*path).clone());
        }
        components.into_values().collect()
    }

    /// Pack the graph into dependency-aware batches.
    ///
    /// Multi-file components are emitted first (largest, most urgent first),
    /// split at `max_batch_size` preserving internal order. Singleton files
    /// are bucketed by priority. A post-pass merges same-priority batches
    /// whose combined size stays within the cap.
    pub fn smart_batches(
        &self,
        file_groups: &[FileGroup],
        max_batch_size: usize,
        min_batch_size: usize,
    ) -> Vec<Vec<BatchItem>> {
        let mut file_info: HashMap<&str, (&ReviewFile, Priority)> = HashMap::new();
        for group in file_groups {
            for f in &group.files {
                file_info.entry(f.path.as_str()).or_insert((f, group.priority));
            }
        }

        let mut components = self.connected_components();
        components.sort_by_key(|comp| {
            let best_rank = comp
                .iter()
                .filter_map(|p| file_info.get(p.as_str()).map(|(_, prio)| prio.rank()))
                .min()
                .unwrap_or(Priority::Low.rank());
            (usize::MAX - comp.len(), best_rank)
        });

        let mut batches: Vec<Vec<BatchItem>> = Vec::new();
        let mut orphans: Vec<&str> = Vec::new();
        let mut processed: BTreeSet<&str> = BTreeSet::new();

        for component in &components {
            if component.len() < 2 {
                orphans.extend(component.iter().map(String::as_str));
                continue;
            }

            let mut ordered: Vec<&str> = component.iter().map(String::as_str).collect();
            ordered.sort_by(|a, b| {
                let sa = self.nodes.get(*a).map(|n| n.relationship_strength).unwrap_or(0.0);
                let sb = self.nodes.get(*b).map(|n| n.relationship_strength).unwrap_or(0.0);
                let pa = file_info.get(a).map(|(_, p)| p.rank()).unwrap_or(3);
                let pb = file_info.get(b).map(|(_, p)| p.rank()).unwrap_or(3);
                sb.partial_cmp(&sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(pa.cmp(&pb))
                    .then(a.cmp(b))
            });

            let mut current: Vec<BatchItem> = Vec::new();
            for path in ordered {
                let Some((file, priority)) = file_info.get(path) else {
                    continue;
                };
                let node = &self.nodes[path];
                let related_in_batch = current
                    .iter()
                    .filter(|item| node.related_files.contains(&item.file.path))
                    .map(|item| item.file.path.clone())
                    .collect();
                current.push(BatchItem {
                    file: (*file).clone(),
                    priority: *priority,
                    has_relationships: !node.related_files.is_empty(),
                    relationship_strength: node.relationship_strength,
                    related_in_batch,
                });
                processed.insert(path);

                if current.len() >= max_batch_size {
                    batches.push(std::mem::take(&mut current));
                }
            }
            if !current.is_empty() {
                batches.push(current);
            }
        }

        // Orphans: bucket by (priority, path) into fixed-size batches.
        let mut orphan_items: Vec<BatchItem> = orphans
            .iter()
            .filter(|p| !processed.contains(*p))
            .filter_map(|p| {
                file_info.get(*p).map(|(file, priority)| BatchItem {
                    file: (*file).clone(),
                    priority: *priority,
                    has_relationships: false,
                    relationship_strength: 0.0,
                    related_in_batch: Vec::new(),
                })
            })
            .collect();
        orphan_items.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.file.path.cmp(&b.file.path))
        });
        for chunk in orphan_items.chunks(max_batch_size) {
            batches.push(chunk.to_vec());
        }

        let batches = merge_small_batches(batches, min_batch_size, max_batch_size);

        info!(
            files = self.nodes.len(),
            batches = batches.len(),
            "smart batching complete"
        );
        batches
    }
}

/// Merge same-priority batches while the combined size stays within the cap.
///
/// `min_size` is a soft target; batches smaller than it simply become merge
/// candidates first.
fn merge_small_batches(
    batches: Vec<Vec<BatchItem>>,
    _min_size: usize,
    max_size: usize,
) -> Vec<Vec<BatchItem>> {
    if batches.is_empty() {
        return batches;
    }

    // Group by dominant priority, keeping first-seen order of priorities.
    let mut order: Vec<Priority> = Vec::new();
    let mut by_priority: HashMap<Priority, Vec<Vec<BatchItem>>> = HashMap::new();
    for batch in batches {
        if batch.is_empty() {
            continue;
        }
        let dominant = dominant_priority(&batch);
        if !order.contains(&dominant) {
            order.push(dominant);
        }
        by_priority.entry(dominant).or_default().push(batch);
    }

    let mut merged = Vec::new();
    for priority in order {
        let mut current: Vec<BatchItem> = Vec::new();
        for batch in by_priority.remove(&priority).unwrap_or_default() {
            if current.len() + batch.len() <= max_size {
                current.extend(batch);
            } else {
                if !current.is_empty() {
                    merged.push(std::mem::take(&mut current));
                }
                current = batch;
            }
        }
        if !current.is_empty() {
            merged.push(current);
        }
    }
    merged
}

fn dominant_priority(batch: &[BatchItem]) -> Priority {
    let mut counts: HashMap<Priority, usize> = HashMap::new();
    for item in batch {
        *counts.entry(item.priority).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(p, c)| (*c, usize::MAX - p.rank()))
        .map(|(p, _)| p)
        .unwrap_or(Priority::Medium)
}

fn member_paths(graph: &DependencyGraph, chunks: &[contextor::CodeChunk]) -> Vec<String> {
    let mut members: BTreeSet<String> = BTreeSet::new();
    for chunk in chunks {
        let path = chunk.path().trim_start_matches('/').to_string();
        if graph.nodes.contains_key(&path) {
            members.insert(path);
        }
    }
    members.into_iter().collect()
}

/// Trailing segment of an import string (`a.b.C;` -> `C`).
fn last_symbol_segment(import: &str) -> String {
    let cleaned = import.trim().trim_end_matches(';');
    cleaned
        .rsplit(['\\', '.', '/', ':'])
        .next()
        .unwrap_or(cleaned)
        .trim()
        .to_string()
}

/* -------------------------- union-find -------------------------- */

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::enrichment::FileRelationship;

    fn group(priority: Priority, paths: &[&str]) -> FileGroup {
        FileGroup {
            group_id: "g".into(),
            priority,
            rationale: String::new(),
            files: paths
                .iter()
                .map(|p| ReviewFile {
                    path: p.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn enrichment(pairs: &[(&str, &str, RelationshipType)]) -> PrEnrichmentData {
        PrEnrichmentData {
            relationships: pairs
                .iter()
                .map(|(a, b, t)| FileRelationship {
                    source_file: a.to_string(),
                    target_file: b.to_string(),
                    relationship_type: *t,
                    matched_on: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn related_files_land_in_one_batch() {
        let groups = vec![group(Priority::High, &["a.rs", "b.rs", "c.rs", "d.rs"])];
        let data = enrichment(&[
            ("a.rs", "b.rs", RelationshipType::Imports),
            ("b.rs", "c.rs", RelationshipType::Calls),
        ]);
        let graph = DependencyGraph::from_enrichment(&groups, &data);
        let batches = graph.smart_batches(&groups, 7, 3);

        let all: Vec<&str> = batches
            .iter()
            .flatten()
            .map(|i| i.file.path.as_str())
            .collect();
        assert_eq!(all.len(), 4);

        // The connected trio shares a batch.
        let batch_of = |p: &str| {
            batches
                .iter()
                .position(|b| b.iter().any(|i| i.file.path == p))
                .unwrap()
        };
        assert_eq!(batch_of("a.rs"), batch_of("b.rs"));
        assert_eq!(batch_of("b.rs"), batch_of("c.rs"));
    }

    #[test]
    fn every_file_in_exactly_one_batch() {
        let groups = vec![
            group(Priority::Critical, &["x.rs", "y.rs"]),
            group(Priority::Low, &["z.rs", "w.rs", "v.rs"]),
        ];
        let data = enrichment(&[("x.rs", "z.rs", RelationshipType::Extends)]);
        let graph = DependencyGraph::from_enrichment(&groups, &data);
        let batches = graph.smart_batches(&groups, 2, 1);

        let mut seen = BTreeSet::new();
        for batch in &batches {
            assert!(batch.len() <= 2);
            for item in batch {
                assert!(seen.insert(item.file.path.clone()), "duplicate file in batches");
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn oversized_component_splits_at_cap() {
        let paths: Vec<String> = (0..10).map(|i| format!("f{i}.rs")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let groups = vec![group(Priority::Medium, &refs)];
        let pairs: Vec<(&str, &str, RelationshipType)> = refs
            .windows(2)
            .map(|w| (w[0], w[1], RelationshipType::Imports))
            .collect();
        let data = enrichment(&pairs);
        let graph = DependencyGraph::from_enrichment(&groups, &data);
        let batches = graph.smart_batches(&groups, 7, 3);

        assert!(batches.iter().all(|b| b.len() <= 7));
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn directory_fallback_groups_siblings() {
        let groups = vec![group(
            Priority::Medium,
            &["src/a.rs", "src/b.rs", "docs/readme.md"],
        )];
        let graph = DependencyGraph::by_directory(&groups);
        let components = graph.connected_components();
        assert_eq!(components.len(), 2);
    }

    #[test]
    fn import_segment_extraction() {
        assert_eq!(last_symbol_segment("com.example.Foo;"), "Foo");
        assert_eq!(last_symbol_segment("crate::util::helper"), "helper");
        assert_eq!(last_symbol_segment("Plain"), "Plain");
    }
}
