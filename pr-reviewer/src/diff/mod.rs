//! Unified-diff ingestion and filtering.
//!
//! Parses `diff --git` formatted text into per-file records and applies the
//! same limits as the upstream content filter:
//! - per-file diff above 25 KiB or 1,000 lines is replaced by a one-line
//!   placeholder and marked skipped;
//! - DELETED and BINARY files are always skipped;
//! - lockfiles/minified/generated paths are skipped by pattern;
//! - a whole-diff file-count and byte budget truncates the tail.
//!
//! The per-file diff text is preserved verbatim for everything included, so
//! concatenating included files reconstructs the input.

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

/// Default per-file diff size threshold (25 KiB, matching the collaborator's
/// large-content filter).
pub const DEFAULT_MAX_FILE_SIZE: usize = 25 * 1024;
/// Default cap on files in a processed diff.
pub const DEFAULT_MAX_FILES: usize = 100;
/// Default cap on total included diff bytes.
pub const DEFAULT_MAX_TOTAL_SIZE: usize = 500_000;
/// Default cap on lines in one file's diff.
pub const DEFAULT_MAX_LINES_PER_FILE: usize = 1_000;

lazy_static! {
    static ref DIFF_HEADER: Regex = Regex::new(r"^diff --git a/(.+) b/(.+)$").unwrap();
    static ref HUNK_HEADER: Regex = Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@").unwrap();
    static ref PLUS_FILE_HEADER: Regex = Regex::new(r"^\+\+\+ [ab]/(.+)$").unwrap();
    static ref SKIP_PATTERNS: Vec<Regex> = [
        r"package-lock\.json$",
        r"yarn\.lock$",
        r"pnpm-lock\.yaml$",
        r"Gemfile\.lock$",
        r"poetry\.lock$",
        r"Cargo\.lock$",
        r"composer\.lock$",
        r"\.min\.(js|css)$",
        r"\.bundle\.(js|css)$",
        r"\.map$",
        r"\.snap$",
        r"__snapshots__/",
        r"\.generated\.",
        r"(^|/)dist/",
        r"(^|/)build/",
        r"node_modules/",
        r"(^|/)vendor/",
        r"\.idea/",
        r"\.vscode/",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect();
    static ref HIGH_PRIORITY_PATTERNS: Vec<Regex> = [
        r"(^|/)src/",
        r"(^|/)app/",
        r"(^|/)lib/",
        r"(^|/)core/",
        r"(^|/)api/",
        r"(^|/)service/",
        r"(^|/)controller/",
        r"(^|/)handler/",
        r"(^|/)model/",
        r"\.py$",
        r"\.java$",
        r"\.kt$",
        r"\.ts$",
        r"\.tsx$",
        r"\.go$",
        r"\.rs$",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect();
    static ref LOW_PRIORITY_PATTERNS: Vec<Regex> = [
        r"(^|/)tests?/",
        r"(^|/)specs?/",
        r"\.test\.",
        r"\.spec\.",
        r"_test\.",
        r"\.md$",
        r"\.txt$",
        r"\.json$",
        r"\.ya?ml$",
        r"\.toml$",
        r"\.ini$",
        r"\.cfg$",
        r"\.conf$",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect();
}

/// Type of change in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Binary,
}

impl DiffChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Binary => "binary",
        }
    }
}

/// A single file in the diff.
#[derive(Debug, Clone)]
pub struct DiffFile {
    pub path: String,
    pub change_type: DiffChangeType,
    /// Old path for renamed files.
    pub old_path: Option<String>,
    pub additions: usize,
    pub deletions: usize,
    /// Per-file unified diff text (headers + hunks).
    pub content: String,
    /// Full file content, populated separately when available.
    pub full_content: Option<String>,
    pub is_binary: bool,
    pub is_skipped: bool,
    pub skip_reason: Option<String>,
}

impl DiffFile {
    pub fn total_changes(&self) -> usize {
        self.additions + self.deletions
    }

    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }
}

/// Result of processing a raw diff.
#[derive(Debug, Clone, Default)]
pub struct ProcessedDiff {
    pub files: Vec<DiffFile>,
    pub total_additions: usize,
    pub total_deletions: usize,
    pub total_files: usize,
    pub skipped_files: usize,
    pub truncated: bool,
    pub truncation_reason: Option<String>,
    pub original_size_bytes: usize,
    pub processed_size_bytes: usize,
}

impl ProcessedDiff {
    /// Files that were not skipped.
    pub fn included_files(&self) -> impl Iterator<Item = &DiffFile> {
        self.files.iter().filter(|f| !f.is_skipped)
    }

    /// Paths of files deleted in this diff.
    pub fn deleted_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.change_type == DiffChangeType::Deleted)
            .map(|f| f.path.clone())
            .collect()
    }

    /// Per-file diff text for a path, matching on exact path or suffix.
    pub fn file_diff(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path || f.path.ends_with(&format!("/{path}")))
            .map(|f| f.content.as_str())
    }

    /// Reconstruct the unified diff from included files.
    pub fn to_unified_diff(&self) -> String {
        let parts: Vec<&str> = self.included_files().map(|f| f.content.as_str()).collect();
        parts.join("\n")
    }
}

/// Diff processor applying parse + skip + priority + budget rules.
#[derive(Debug, Clone)]
pub struct DiffProcessor {
    pub max_file_size: usize,
    pub max_files: usize,
    pub max_total_size: usize,
    pub max_lines_per_file: usize,
}

impl Default for DiffProcessor {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_lines_per_file: DEFAULT_MAX_LINES_PER_FILE,
        }
    }
}

impl DiffProcessor {
    /// Process raw diff text and apply all filtering rules.
    pub fn process(&self, raw_diff: &str) -> ProcessedDiff {
        if raw_diff.is_empty() {
            return ProcessedDiff::default();
        }

        let original_size = raw_diff.len();
        let mut files = parse_diff(raw_diff);

        for f in files.iter_mut() {
            self.apply_skip_rules(f);
        }

        // Non-skipped first, then by path priority, then by change volume.
        files.sort_by(|a, b| {
            let ka = (a.is_skipped as u8, path_priority(&a.path), usize::MAX - a.total_changes());
            let kb = (b.is_skipped as u8, path_priority(&b.path), usize::MAX - b.total_changes());
            ka.cmp(&kb)
        });

        let (truncated, truncation_reason) = self.apply_limits(&mut files);

        let total_additions = files.iter().filter(|f| !f.is_skipped).map(|f| f.additions).sum();
        let total_deletions = files.iter().filter(|f| !f.is_skipped).map(|f| f.deletions).sum();
        let total_files = files.iter().filter(|f| !f.is_skipped).count();
        let skipped_files = files.len() - total_files;
        let processed_size = files
            .iter()
            .filter(|f| !f.is_skipped)
            .map(|f| f.size_bytes())
            .sum();

        debug!(
            total_files,
            skipped_files, truncated, "diff processed ({original_size} bytes)"
        );

        ProcessedDiff {
            files,
            total_additions,
            total_deletions,
            total_files,
            skipped_files,
            truncated,
            truncation_reason,
            original_size_bytes: original_size,
            processed_size_bytes: processed_size,
        }
    }

    fn apply_skip_rules(&self, file: &mut DiffFile) {
        if file.is_skipped {
            return;
        }
        let threshold_kb = self.max_file_size / 1024;

        if file.is_binary {
            file.is_skipped = true;
            file.skip_reason = Some("Binary file".to_string());
            return;
        }

        if file.change_type == DiffChangeType::Deleted {
            file.is_skipped = true;
            file.skip_reason = Some("Deleted file".to_string());
            return;
        }

        for pattern in SKIP_PATTERNS.iter() {
            if pattern.is_match(&file.path) {
                file.is_skipped = true;
                file.skip_reason = Some(format!("Matches skip pattern: {}", pattern.as_str()));
                return;
            }
        }

        if file.size_bytes() > self.max_file_size {
            file.skip_reason = Some(format!(
                "File too large: {} bytes > {}",
                file.size_bytes(),
                self.max_file_size
            ));
            file.content = filtered_placeholder(&file.path, threshold_kb, file.change_type);
            file.is_skipped = true;
            return;
        }

        let line_count = file.content.lines().count();
        if line_count > self.max_lines_per_file {
            file.skip_reason = Some(format!(
                "Too many lines: {} > {}",
                line_count, self.max_lines_per_file
            ));
            file.content = filtered_placeholder(&file.path, threshold_kb, file.change_type);
            file.is_skipped = true;
        }
    }

    fn apply_limits(&self, files: &mut [DiffFile]) -> (bool, Option<String>) {
        let mut truncated = false;
        let mut reason = None;
        let mut included = 0usize;
        let mut total_size = 0usize;

        for f in files.iter_mut() {
            if f.is_skipped {
                continue;
            }
            if included >= self.max_files {
                f.is_skipped = true;
                f.skip_reason = Some(format!("Exceeds max files limit: {}", self.max_files));
                truncated = true;
                reason = Some(format!(
                    "Diff truncated: exceeded {} files limit",
                    self.max_files
                ));
                continue;
            }
            if total_size + f.size_bytes() > self.max_total_size {
                f.is_skipped = true;
                f.skip_reason = Some(format!(
                    "Would exceed total size limit: {}",
                    self.max_total_size
                ));
                truncated = true;
                reason = Some(format!(
                    "Diff truncated: exceeded {} bytes total size",
                    self.max_total_size
                ));
                continue;
            }
            included += 1;
            total_size += f.size_bytes();
        }

        (truncated, reason)
    }
}

/// Parse raw unified diff text into per-file records.
///
/// Only `diff --git` headers delimit files; change type is read from the
/// extended header lines; `+`/`-` lines (minus file headers) feed the
/// addition/deletion counts.
pub fn parse_diff(raw_diff: &str) -> Vec<DiffFile> {
    let mut files: Vec<DiffFile> = Vec::new();
    let mut current: Option<DiffFile> = None;
    let mut buffer: Vec<&str> = Vec::new();

    let flush = |current: &mut Option<DiffFile>, buffer: &mut Vec<&str>, files: &mut Vec<DiffFile>| {
        if let Some(mut f) = current.take() {
            f.content = buffer.join("\n");
            files.push(f);
        }
        buffer.clear();
    };

    for line in raw_diff.lines() {
        if let Some(caps) = DIFF_HEADER.captures(line) {
            flush(&mut current, &mut buffer, &mut files);

            let old_path = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            let new_path = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
            current = Some(DiffFile {
                old_path: if old_path != new_path {
                    Some(old_path)
                } else {
                    None
                },
                path: new_path,
                change_type: DiffChangeType::Modified,
                additions: 0,
                deletions: 0,
                content: String::new(),
                full_content: None,
                is_binary: false,
                is_skipped: false,
                skip_reason: None,
            });
            buffer.push(line);
            continue;
        }

        if let Some(f) = current.as_mut() {
            buffer.push(line);

            if line.starts_with("new file mode") {
                f.change_type = DiffChangeType::Added;
            } else if line.starts_with("deleted file mode") {
                f.change_type = DiffChangeType::Deleted;
            } else if line.starts_with("rename from") {
                f.change_type = DiffChangeType::Renamed;
            } else if line.starts_with("Binary files") || line.starts_with("GIT binary patch") {
                f.change_type = DiffChangeType::Binary;
                f.is_binary = true;
            }

            if line.starts_with('+') && !line.starts_with("+++") {
                f.additions += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                f.deletions += 1;
            }
        }
    }
    flush(&mut current, &mut buffer, &mut files);

    files
}

/// Map `file -> new line number -> line text` extracted by walking hunks.
///
/// Used for post-hoc line-number correction: only lines present in the new
/// version of each file appear.
pub fn new_line_map(diff_text: &str) -> HashMap<String, BTreeMap<u32, String>> {
    let mut result: HashMap<String, BTreeMap<u32, String>> = HashMap::new();
    let mut current_file: Option<String> = None;
    let mut new_line: u32 = 0;

    for line in diff_text.lines() {
        if let Some(caps) = PLUS_FILE_HEADER.captures(line) {
            let path = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            result.entry(path.clone()).or_default();
            current_file = Some(path);
            new_line = 0;
            continue;
        }
        if let Some(caps) = HUNK_HEADER.captures(line) {
            new_line = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);
            continue;
        }

        let Some(file) = current_file.as_ref() else {
            continue;
        };
        if new_line == 0 {
            continue;
        }

        if let Some(rest) = line.strip_prefix('+') {
            if !line.starts_with("+++") {
                result.get_mut(file).unwrap().insert(new_line, rest.to_string());
                new_line += 1;
            }
        } else if line.starts_with('-') {
            // Removed line: the new-file counter stands still.
        } else if let Some(rest) = line.strip_prefix(' ') {
            result.get_mut(file).unwrap().insert(new_line, rest.to_string());
            new_line += 1;
        } else if line.is_empty() {
            result.get_mut(file).unwrap().insert(new_line, String::new());
            new_line += 1;
        }
    }

    result
}

/// Priority score for a path; lower sorts first.
fn path_priority(path: &str) -> usize {
    if HIGH_PRIORITY_PATTERNS.iter().any(|p| p.is_match(path)) {
        return 0;
    }
    if LOW_PRIORITY_PATTERNS.iter().any(|p| p.is_match(path)) {
        return 2;
    }
    1
}

/// One-line placeholder carried instead of an oversized file diff.
fn filtered_placeholder(path: &str, threshold_kb: usize, change_type: DiffChangeType) -> String {
    format!(
        "diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n[Review filter: file diff too large (>{threshold_kb}KB), omitted from analysis. File type: {}]\n",
        change_type.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_DIFF: &str = "diff --git a/src/foo.py b/src/foo.py\nnew file mode 100644\n--- /dev/null\n+++ b/src/foo.py\n@@ -0,0 +1,2 @@\n+def greet():\n+    return \"hi\"";

    #[test]
    fn parses_added_file() {
        let files = parse_diff(SIMPLE_DIFF);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/foo.py");
        assert_eq!(files[0].change_type, DiffChangeType::Added);
        assert_eq!(files[0].additions, 2);
        assert_eq!(files[0].deletions, 0);
    }

    #[test]
    fn deleted_and_binary_are_skipped() {
        let raw = "diff --git a/gone.py b/gone.py\ndeleted file mode 100644\n--- a/gone.py\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-x = 1\ndiff --git a/img.png b/img.png\nBinary files a/img.png and b/img.png differ";
        let processed = DiffProcessor::default().process(raw);
        assert_eq!(processed.files.len(), 2);
        assert!(processed.files.iter().all(|f| f.is_skipped));
        assert_eq!(processed.total_files, 0);
        assert_eq!(processed.deleted_paths(), vec!["gone.py".to_string()]);
    }

    #[test]
    fn oversized_file_gets_placeholder() {
        let mut raw = String::from("diff --git a/big.py b/big.py\n--- a/big.py\n+++ b/big.py\n@@ -1,1 +1,900 @@\n");
        // Keep line count under the 1,000-line cap so the byte cap triggers.
        for i in 0..900 {
            raw.push_str(&format!("+line_{i} = \"{}\"\n", "x".repeat(40)));
        }
        let processed = DiffProcessor::default().process(&raw);
        let f = &processed.files[0];
        assert!(f.is_skipped);
        assert!(f.skip_reason.as_deref().unwrap().contains("too large"));
        assert!(f.content.contains("omitted from analysis"));
    }

    #[test]
    fn lockfiles_are_skipped_by_pattern() {
        let raw = "diff --git a/Cargo.lock b/Cargo.lock\n--- a/Cargo.lock\n+++ b/Cargo.lock\n@@ -1,1 +1,1 @@\n-old\n+new";
        let processed = DiffProcessor::default().process(raw);
        assert!(processed.files[0].is_skipped);
    }

    #[test]
    fn round_trip_for_small_files() {
        let processed = DiffProcessor::default().process(SIMPLE_DIFF);
        assert_eq!(processed.to_unified_diff(), SIMPLE_DIFF);
    }

    #[test]
    fn line_map_tracks_new_numbers() {
        let raw = "--- a/a.py\n+++ b/a.py\n@@ -1,3 +1,4 @@\n context\n+added one\n context2\n+added two";
        let map = new_line_map(raw);
        let lines = map.get("a.py").unwrap();
        assert_eq!(lines.get(&1).map(String::as_str), Some("context"));
        assert_eq!(lines.get(&2).map(String::as_str), Some("added one"));
        assert_eq!(lines.get(&4).map(String::as_str), Some("added two"));
    }

    #[test]
    fn file_count_budget_truncates() {
        let mut raw = String::new();
        for i in 0..5 {
            raw.push_str(&format!(
                "diff --git a/f{i}.py b/f{i}.py\n--- a/f{i}.py\n+++ b/f{i}.py\n@@ -1,1 +1,1 @@\n-a\n+b\n"
            ));
        }
        let processor = DiffProcessor {
            max_files: 3,
            ..Default::default()
        };
        let processed = processor.process(&raw);
        assert!(processed.truncated);
        assert_eq!(processed.total_files, 3);
    }
}
