//! CLI output formatting for all pipeline commands.
//!
//! Output is **information-centric**: each module set is shown by name with
//! its option count, and written files are listed relative to the output
//! directory as secondary context.
//!
//! # Output Format
//!
//! ## Export
//!
//! ```text
//! Module sets
//! core (12 options, 3 hidden)
//!     Fragment: module-opts
//!
//! Wrote share/doc/manual/options/module-opts.json
//! ```
//!
//! ## Build
//!
//! ```text
//! Module sets
//! core (12 options, 3 hidden)
//!     Fragment: module-opts
//!
//! Fragments: 1 cached, 0 rendered (1 total)
//! Documents: 4 inputs, 37 targets
//!
//! HTML
//!     share/doc/manual/index.html
//!     share/doc/manual/options.html
//! Man pages
//!     share/man/man5/tool.conf.5
//!
//! Built 1 module set, 2 HTML pages, 1 man page
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::pipeline::{BuildSummary, CheckSummary, ExportSummary, FragmentSummary, SetSummary};
use std::path::{Path, PathBuf};

// ============================================================================
// Shared helpers
// ============================================================================

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{count} {}", if count == 1 { one } else { many })
}

/// Header plus one entry per module set.
fn set_lines(sets: &[SetSummary]) -> Vec<String> {
    let mut lines = vec!["Module sets".to_string()];
    if sets.is_empty() {
        lines.push("    (none configured)".to_string());
    }
    for set in sets {
        let mut header = format!("{} ({}", set.name, plural(set.options, "option", "options"));
        if set.dropped > 0 {
            header.push_str(&format!(", {} hidden", set.dropped));
        }
        header.push(')');
        lines.push(header);
        lines.push(format!("    Fragment: {}", set.fragment_id));
    }
    lines
}

/// `path` relative to `root` when it lies below it.
fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn file_lines(title: &str, files: &[PathBuf], root: &Path) -> Vec<String> {
    if files.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![title.to_string()];
    lines.extend(files.iter().map(|f| format!("    {}", display_path(f, root))));
    lines
}

// ============================================================================
// Export
// ============================================================================

pub fn format_export_output(summary: &ExportSummary, output: &Path) -> Vec<String> {
    let mut lines = set_lines(&summary.sets);
    lines.push(String::new());
    lines.extend(
        summary
            .json
            .iter()
            .map(|path| format!("Wrote {}", display_path(path, output))),
    );
    lines
}

pub fn print_export_output(summary: &ExportSummary, output: &Path) {
    for line in format_export_output(summary, output) {
        println!("{}", line);
    }
}

// ============================================================================
// Fragments
// ============================================================================

pub fn format_fragment_output(summary: &FragmentSummary, work_dir: &Path) -> Vec<String> {
    let mut lines = set_lines(&summary.sets);
    lines.push(String::new());
    lines.extend(file_lines("Fragments", &summary.fragments, work_dir));
    lines.push(format!("Cache: {}", summary.cache));
    lines
}

pub fn print_fragment_output(summary: &FragmentSummary, work_dir: &Path) {
    for line in format_fragment_output(summary, work_dir) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_output(summary: &CheckSummary) -> Vec<String> {
    let mut lines = set_lines(&summary.sets);
    lines.push(String::new());
    lines.push(format!(
        "Documents: {}, {}",
        plural(summary.inputs, "input", "inputs"),
        plural(summary.targets, "target", "targets")
    ));
    lines
}

pub fn print_check_output(summary: &CheckSummary) {
    for line in format_check_output(summary) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_output(summary: &BuildSummary, output: &Path) -> Vec<String> {
    let mut lines = set_lines(&summary.sets);
    lines.push(String::new());
    lines.push(format!("Fragments: {}", summary.cache));
    lines.push(format!(
        "Documents: {}, {}",
        plural(summary.inputs, "input", "inputs"),
        plural(summary.targets, "target", "targets")
    ));
    lines.push(String::new());

    lines.extend(file_lines("Options JSON", &summary.json, output));
    lines.extend(file_lines("HTML", &summary.html, output));
    lines.extend(file_lines("Man pages", &summary.man, output));

    let pages = summary
        .html
        .iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "html"))
        .count();
    lines.push(String::new());
    lines.push(format!(
        "Built {}, {}, {}",
        plural(summary.sets.len(), "module set", "module sets"),
        plural(pages, "HTML page", "HTML pages"),
        plural(summary.man.len(), "man page", "man pages")
    ));
    lines
}

pub fn print_build_output(summary: &BuildSummary, output: &Path) {
    for line in format_build_output(summary, output) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStats;
    use pretty_assertions::assert_eq;

    fn core_set() -> SetSummary {
        SetSummary {
            name: "core".to_string(),
            fragment_id: "module-opts".to_string(),
            options: 12,
            dropped: 3,
        }
    }

    // =========================================================================
    // Module sets
    // =========================================================================

    #[test]
    fn set_lines_show_counts() {
        assert_eq!(
            set_lines(&[core_set()]),
            vec!["Module sets", "core (12 options, 3 hidden)", "    Fragment: module-opts"]
        );
    }

    #[test]
    fn set_lines_omit_zero_hidden() {
        let set = SetSummary {
            options: 1,
            dropped: 0,
            ..core_set()
        };
        assert_eq!(set_lines(&[set])[1], "core (1 option)");
    }

    #[test]
    fn set_lines_without_sets() {
        assert_eq!(set_lines(&[]), vec!["Module sets", "    (none configured)"]);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    #[test]
    fn export_lists_relative_json_paths() {
        let summary = ExportSummary {
            sets: vec![core_set()],
            json: vec![PathBuf::from("/out/share/doc/manual/options/module-opts.json")],
        };
        let lines = format_export_output(&summary, Path::new("/out"));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Wrote share/doc/manual/options/module-opts.json")
        );
    }

    #[test]
    fn fragments_show_cache_stats() {
        let summary = FragmentSummary {
            sets: vec![core_set()],
            fragments: vec![PathBuf::from("/work/module-opts.xml")],
            cache: CacheStats { hits: 1, misses: 0 },
        };
        let lines = format_fragment_output(&summary, Path::new("/work"));
        assert!(lines.contains(&"    module-opts.xml".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("Cache: 1 cached, 0 rendered (1 total)"));
    }

    #[test]
    fn check_shows_document_counts() {
        let summary = CheckSummary {
            sets: vec![core_set()],
            inputs: 4,
            targets: 1,
        };
        let lines = format_check_output(&summary);
        assert_eq!(lines.last().map(String::as_str), Some("Documents: 4 inputs, 1 target"));
    }

    #[test]
    fn build_summary() {
        let out = Path::new("/out");
        let summary = BuildSummary {
            sets: vec![core_set()],
            cache: CacheStats { hits: 0, misses: 1 },
            inputs: 4,
            targets: 9,
            json: vec![out.join("share/doc/manual/options/module-opts.json")],
            html: vec![
                out.join("share/doc/manual/index.html"),
                out.join("share/doc/manual/options.html"),
                out.join("share/doc/manual/style.css"),
            ],
            man: vec![out.join("share/man/man5/tool.conf.5")],
        };
        let lines = format_build_output(&summary, out);
        assert!(lines.contains(&"Fragments: 1 rendered".to_string()));
        assert!(lines.contains(&"Documents: 4 inputs, 9 targets".to_string()));
        assert!(lines.contains(&"    share/man/man5/tool.conf.5".to_string()));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Built 1 module set, 2 HTML pages, 1 man page")
        );
    }
}
