//! Per-batch retrieval context: snippet extraction, the two-pronged fetch,
//! and staleness-aware formatting for the Stage-1 prompt.

use contextor::{CodeChunk, DeterministicQuery, PrContextQuery, RagContext};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::model::request::ReviewRequest;
use crate::review::gateway::ContextRetriever;

/// Maximum chunks rendered into one batch prompt.
const PROMPT_CHUNK_LIMIT: usize = 20;
/// Staleness score threshold for semantic chunks from modified files.
const STALE_THRESHOLD_SEMANTIC: f64 = 0.70;
/// Deterministic chunks carry a fixed 0.85 score, so their staleness bar is
/// higher.
const STALE_THRESHOLD_DETERMINISTIC: f64 = 0.90;
/// Fixed score assigned to merged deterministic chunks.
const DETERMINISTIC_SCORE: f64 = 0.85;
/// Chunks merged per related definition.
const CHUNKS_PER_DEFINITION: usize = 3;

/// Extract meaningful code snippets from diff text for semantic search.
///
/// Collects added lines that look like real code (longer than 10 chars, not
/// comments, not bare braces), groups runs of them into snippets of three
/// to five joined lines, and caps the result at ten snippets.
pub fn extract_diff_snippets(diff_content: &str) -> Vec<String> {
    let mut snippets = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in diff_content.lines() {
        let Some(added) = line.strip_prefix('+') else {
            continue;
        };
        if line.starts_with("+++") {
            continue;
        }
        let clean = added.trim();
        let trivial = clean.len() <= 10
            || clean.starts_with("//")
            || clean.starts_with('#')
            || clean.starts_with('*')
            || clean == "{"
            || clean == "}";
        if trivial {
            continue;
        }

        current.push(clean.to_string());
        if current.len() >= 3 {
            snippets.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        snippets.push(current.join(" "));
    }

    snippets.truncate(10);
    snippets
}

/// Fetch retrieval context for one batch, two-pronged:
/// 1. semantic query with the batch's paths, snippets, and PR metadata;
/// 2. deterministic lookup whose related definitions are merged in with a
///    fixed score and `deterministic` source tag.
///
/// In hybrid mode (PR files indexed), the semantic query carries the PR
/// number and the full changed-file list so fresh PR data wins. Failures in
/// either call are non-fatal.
pub async fn fetch_batch_context<R: ContextRetriever>(
    retriever: &R,
    request: &ReviewRequest,
    batch_file_paths: &[String],
    batch_diff_snippets: &[String],
    pr_indexed: bool,
    cfg: &OrchestratorConfig,
) -> Option<Vec<CodeChunk>> {
    if !retriever.is_enabled() {
        return None;
    }

    let rag_branch = request
        .target_branch_name
        .clone()
        .or_else(|| request.commit_hash.clone())
        .unwrap_or_else(|| "main".to_string());

    info!(
        files = batch_file_paths.len(),
        "fetching per-batch retrieval context"
    );

    let (pr_number, all_pr_files) = if pr_indexed {
        (request.pull_request_id, Some(request.changed_files.clone()))
    } else {
        (None, None)
    };

    let semantic_query = PrContextQuery {
        workspace: request.project_workspace.clone(),
        project: request.project_namespace.clone(),
        branch: rag_branch.clone(),
        changed_files: batch_file_paths.to_vec(),
        diff_snippets: batch_diff_snippets.to_vec(),
        pr_title: request.pr_title.clone(),
        pr_description: request.pr_description.clone(),
        top_k: cfg.rag_top_k,
        pr_number,
        all_pr_changed_files: all_pr_files,
    };

    let mut chunks: Vec<CodeChunk> = match retriever.pr_context(&semantic_query).await {
        Ok(Some(RagContext { relevant_code, .. })) => {
            info!(count = relevant_code.len(), "semantic retrieval returned chunks");
            relevant_code
        }
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "semantic retrieval failed, continuing without it");
            Vec::new()
        }
    };

    // Deterministic lookup is an optional enhancement.
    let det_query = DeterministicQuery {
        workspace: request.project_workspace.clone(),
        project: request.project_namespace.clone(),
        branches: vec![rag_branch, "main".to_string()],
        file_paths: batch_file_paths.to_vec(),
        limit_per_file: cfg.deterministic_limit_per_file,
    };
    match retriever.deterministic_context(&det_query).await {
        Ok(Some(det)) => {
            let mut added = 0usize;
            for (definition, def_chunks) in &det.related_definitions {
                for chunk in def_chunks.iter().take(CHUNKS_PER_DEFINITION) {
                    let mut merged = chunk.clone();
                    merged.score = DETERMINISTIC_SCORE;
                    merged.source = "deterministic".to_string();
                    chunks.push(merged);
                    added += 1;
                }
                debug!(definition, "merged deterministic definition context");
            }
            if added > 0 {
                info!(added, "deterministic retrieval added related definitions");
            }
        }
        Ok(None) => {}
        Err(e) => {
            debug!(error = %e, "deterministic retrieval skipped");
        }
    }

    if chunks.is_empty() { None } else { Some(chunks) }
}

/// Format retrieved chunks into a prompt section, dropping stale data.
///
/// Filters:
/// - chunks from files DELETED in this PR are always dropped;
/// - chunks from files MODIFIED in this PR are dropped below a staleness
///   threshold (0.70 semantic, 0.90 deterministic), except chunks tagged
///   `pr_indexed`, which come from the PR itself and are never stale.
pub fn format_rag_context(
    chunks: &[CodeChunk],
    pr_changed_files: &[String],
    deleted_files: &[String],
) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let changed_set = path_match_set(pr_changed_files);
    let deleted_set = path_match_set(deleted_files);

    let mut formatted = Vec::new();
    let mut skipped_stale = 0usize;
    let mut skipped_deleted = 0usize;

    for chunk in chunks {
        if formatted.len() >= PROMPT_CHUNK_LIMIT {
            break;
        }

        let path = chunk.path();
        if path.is_empty() && chunk.text.is_empty() {
            continue;
        }

        if matches_any(&deleted_set, path) {
            skipped_deleted += 1;
            continue;
        }

        let is_pr_indexed = chunk.source == "pr_indexed";
        if matches_any(&changed_set, path) && !is_pr_indexed {
            let threshold = if chunk.source == "deterministic" {
                STALE_THRESHOLD_DETERMINISTIC
            } else {
                STALE_THRESHOLD_SEMANTIC
            };
            if chunk.score < threshold {
                skipped_stale += 1;
                continue;
            }
        }

        if chunk.text.is_empty() {
            continue;
        }

        formatted.push(render_chunk(chunk, path));
    }

    if formatted.is_empty() {
        debug!(
            total = chunks.len(),
            skipped_stale, skipped_deleted, "no retrieval chunks survived filtering"
        );
        return String::new();
    }

    info!(
        included = formatted.len(),
        skipped_stale, skipped_deleted, "retrieval context formatted"
    );
    formatted.join("\n")
}

fn render_chunk(chunk: &CodeChunk, path: &str) -> String {
    let meta = &chunk.metadata;
    let mut meta_lines = vec![format!("File: {path}")];

    if let Some(ns) = meta.namespace.as_deref().or(meta.package.as_deref()) {
        meta_lines.push(format!("Namespace: {ns}"));
    }
    if let Some(name) = &meta.primary_name {
        meta_lines.push(format!("Definition: {name}"));
    } else if !meta.semantic_names.is_empty() {
        let names: Vec<&str> = meta.semantic_names.iter().take(5).map(String::as_str).collect();
        meta_lines.push(format!("Definitions: {}", names.join(", ")));
    }
    if !meta.extends.is_empty() {
        meta_lines.push(format!("Extends: {}", meta.extends.join(", ")));
    }
    if !meta.implements.is_empty() {
        meta_lines.push(format!("Implements: {}", meta.implements.join(", ")));
    }
    if !meta.imports.is_empty() {
        if meta.imports.len() <= 5 {
            meta_lines.push(format!("Imports: {}", meta.imports.join("; ")));
        } else {
            let head: Vec<&str> = meta.imports.iter().take(5).map(String::as_str).collect();
            meta_lines.push(format!(
                "Imports: {}... (+{} more)",
                head.join("; "),
                meta.imports.len() - 5
            ));
        }
    }
    if !meta.parent_context.is_empty() {
        meta_lines.push(format!("Parent: {}", meta.parent_context.join(".")));
    }
    if let Some(ct) = &meta.content_type {
        if ct != "code" {
            meta_lines.push(format!("Type: {ct}"));
        }
    }

    format!(
        "### Context from `{path}` (relevance: {:.2})\n{}\n```\n{}\n```\n",
        chunk.score,
        meta_lines.join("\n"),
        chunk.text
    )
}

/// Paths plus their basenames for suffix-tolerant matching.
fn path_match_set(paths: &[String]) -> Vec<String> {
    let mut set = Vec::with_capacity(paths.len() * 2);
    for p in paths {
        set.push(p.clone());
        if let Some(idx) = p.rfind('/') {
            set.push(p[idx + 1..].to_string());
        }
    }
    set
}

fn matches_any(set: &[String], path: &str) -> bool {
    if set.is_empty() || path.is_empty() {
        return false;
    }
    let basename = path.rsplit('/').next().unwrap_or(path);
    set.iter().any(|f| {
        f == path || f == basename || path.ends_with(f.as_str()) || f.ends_with(path)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextor::ChunkMetadata;

    fn chunk(path: &str, score: f64, source: &str) -> CodeChunk {
        CodeChunk {
            text: "fn sample() {}".to_string(),
            metadata: ChunkMetadata {
                path: path.to_string(),
                ..Default::default()
            },
            score,
            source: source.to_string(),
        }
    }

    #[test]
    fn snippets_skip_trivia_and_group_lines() {
        let diff = "+++ b/a.py\n+short\n+def compute_total(basket):\n+    total = sum(i.price for i in basket)\n+    return total * TAX_RATE\n+# comment line here\n+{\n";
        let snippets = extract_diff_snippets(diff);
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].contains("compute_total"));
        assert!(!snippets[0].contains("comment"));
    }

    #[test]
    fn snippet_cap_is_ten() {
        let mut diff = String::new();
        for i in 0..100 {
            diff.push_str(&format!("+let long_variable_{i} = compute({i});\n"));
        }
        assert_eq!(extract_diff_snippets(&diff).len(), 10);
    }

    #[test]
    fn deleted_file_chunks_are_dropped() {
        let chunks = vec![chunk("src/gone.py", 0.99, "")];
        let out = format_rag_context(&chunks, &[], &["src/gone.py".to_string()]);
        assert!(out.is_empty());
    }

    #[test]
    fn low_score_modified_chunks_are_dropped() {
        let chunks = vec![
            chunk("src/a.py", 0.5, ""),
            chunk("src/a.py", 0.9, ""),
        ];
        let out = format_rag_context(&chunks, &["src/a.py".to_string()], &[]);
        assert_eq!(out.matches("### Context from").count(), 1);
    }

    #[test]
    fn deterministic_chunks_use_higher_bar() {
        // 0.85 from a modified file: below the 0.90 deterministic bar.
        let chunks = vec![chunk("src/a.py", 0.85, "deterministic")];
        let out = format_rag_context(&chunks, &["src/a.py".to_string()], &[]);
        assert!(out.is_empty());
    }

    #[test]
    fn pr_indexed_chunks_are_never_stale() {
        let chunks = vec![chunk("src/a.py", 0.3, "pr_indexed")];
        let out = format_rag_context(&chunks, &["src/a.py".to_string()], &[]);
        assert!(out.contains("### Context from `src/a.py`"));
    }
}
