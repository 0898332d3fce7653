use crate::error::Result;
use crate::fs_utils::{copy_file, ensure_dir, is_dotfile, read_file_contents, write_text};
use crate::ssi::{Expander, IncludeDirective};
use globset::GlobSet;
use log::info;
use serde::Serialize;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Source and target of a run. Both paths are expected to be absolute and normalized.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Directory tree to expand from
    pub source: PathBuf,
    /// Directory the mirrored tree is written into
    pub target: PathBuf,
    /// Entries to leave out, matched against paths relative to `source`
    pub exclude: Option<GlobSet>,
}

impl WalkOptions {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            exclude: None,
        }
    }

    /// Why `entry` is left out of the mirrored tree, if it is.
    fn skip_reason(&self, entry: &DirEntry) -> Option<&'static str> {
        let path = entry.path();

        if is_dotfile(path) {
            return Some("Ignoring dotfile");
        }

        if entry.file_type().is_dir()
            && self.target.starts_with(&self.source)
            && path.starts_with(&self.target)
        {
            return Some("Ignoring nested target dir");
        }

        if let Some(exclude) = &self.exclude
            && let Ok(relative) = path.strip_prefix(&self.source)
            && exclude.is_match(relative)
        {
            return Some("Excluding");
        }

        None
    }

    /// Entries of the source tree that are mirrored, parents before children,
    /// siblings sorted by name. Pruned entries are counted in `skipped`.
    fn entries<'a>(
        &'a self,
        skipped: &'a Cell<usize>,
    ) -> impl Iterator<Item = walkdir::Result<DirEntry>> + 'a {
        WalkDir::new(&self.source)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| match self.skip_reason(entry) {
                Some(reason) => {
                    info!("{reason} {}", self.display(entry.path()));
                    skipped.set(skipped.get() + 1);
                    false
                }
                None => true,
            })
    }

    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.source)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Counters for a completed run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub directories: usize,
    pub expanded: usize,
    pub copied: usize,
    pub skipped: usize,
}

/// Mirrors `options.source` into `options.target`.
///
/// Files with an includable extension are expanded with `expander` and written
/// as text; everything else is copied byte for byte. Each file is fully expanded
/// before its target is written, so a failed expansion leaves no target file behind.
///
/// # Errors
///
/// Stops at the first failure: traversal errors, expansion errors (missing
/// include, cycle, depth limit) and write errors are all fatal.
pub fn walk(options: &WalkOptions, expander: &Expander) -> Result<WalkStats> {
    ensure_dir(&options.target)?;

    let skipped = Cell::new(0);
    let mut stats = WalkStats::default();

    for entry in options.entries(&skipped) {
        let entry = entry?;
        let source_path = entry.path();
        // walkdir only yields paths below its root
        let Ok(relative) = source_path.strip_prefix(&options.source) else {
            continue;
        };
        let target_path = options.target.join(relative);

        info!("Processing {}", relative.display());

        if entry.file_type().is_dir() {
            ensure_dir(&target_path)?;
            stats.directories += 1;
        } else if expander.config().extensions.matches(source_path) {
            let expanded = expander.expand_file(source_path)?;
            write_text(&target_path, &expanded)?;
            stats.expanded += 1;
        } else {
            copy_file(source_path, &target_path)?;
            stats.copied += 1;
        }
    }

    stats.skipped = skipped.get();
    Ok(stats)
}

/// A directive found in a source file, with where it resolves to
#[derive(Debug, Clone, Serialize)]
pub struct DirectiveReport {
    /// File containing the directive, relative to the source directory
    pub file: PathBuf,
    #[serde(flatten)]
    pub directive: IncludeDirective,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PathBuf>,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lists every include directive in the includable files of the source tree,
/// without writing anything.
///
/// Only directives written in the source files themselves are reported, not
/// those reached through nested includes.
///
/// # Errors
///
/// Returns traversal errors and read errors for the source files.
pub fn scan(options: &WalkOptions, expander: &Expander) -> Result<Vec<DirectiveReport>> {
    let skipped = Cell::new(0);
    let mut reports = Vec::new();

    for entry in options.entries(&skipped) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() || !expander.config().extensions.matches(path) {
            continue;
        }

        let content = read_file_contents(path)?;
        let file = path.strip_prefix(&options.source).unwrap_or(path).to_path_buf();

        for directive in expander.find_directives(&content) {
            let report = match expander.resolve(&directive) {
                Ok(resolved) => DirectiveReport {
                    file: file.clone(),
                    exists: resolved.is_file(),
                    resolved: Some(resolved),
                    directive,
                    error: None,
                },
                Err(e) => DirectiveReport {
                    file: file.clone(),
                    exists: false,
                    resolved: None,
                    directive,
                    error: Some(e.to_string()),
                },
            };
            reports.push(report);
        }
    }

    Ok(reports)
}

/// Outcome of expanding a single file during a dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub file: PathBuf,
    pub error: Option<String>,
}

/// Expands every includable file in memory, writing nothing, and reports which
/// ones would fail. Unlike [`walk`], an expansion failure does not stop the check.
///
/// # Errors
///
/// Returns traversal errors only.
pub fn check(options: &WalkOptions, expander: &Expander) -> Result<Vec<CheckResult>> {
    let skipped = Cell::new(0);
    let mut results = Vec::new();

    for entry in options.entries(&skipped) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() || !expander.config().extensions.matches(path) {
            continue;
        }

        let file = path.strip_prefix(&options.source).unwrap_or(path).to_path_buf();
        let error = expander.expand_file(path).err().map(|e| e.to_string());
        results.push(CheckResult { file, error });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssi::ExpandConfig;
    use globset::{Glob, GlobSetBuilder};
    use std::fs;
    use tempfile::TempDir;

    struct TestEnv {
        _temp_dir: TempDir,
        source: PathBuf,
        target: PathBuf,
    }

    fn create_test_env() -> TestEnv {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        let target = temp_dir.path().join("out");
        fs::create_dir(&source).unwrap();
        TestEnv {
            _temp_dir: temp_dir,
            source,
            target,
        }
    }

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn expander_for(root: &Path) -> Expander {
        Expander::new(ExpandConfig::new(root)).unwrap()
    }

    #[test]
    fn test_walk_expands_and_copies() {
        let env = create_test_env();
        write(&env.source, "a.html", b"<h1><!--#include virtual=\"partial.html\"--></h1>");
        write(&env.source, "partial.html", b"X");
        write(&env.source, "notes.txt", b"plain <!--#include virtual=\"partial.html\"-->");

        let options = WalkOptions::new(&env.source, &env.target);
        let stats = walk(&options, &expander_for(&env.source)).unwrap();

        assert_eq!(fs::read_to_string(env.target.join("a.html")).unwrap(), "<h1>X</h1>");
        assert_eq!(fs::read_to_string(env.target.join("partial.html")).unwrap(), "X");
        assert_eq!(
            fs::read(env.target.join("notes.txt")).unwrap(),
            fs::read(env.source.join("notes.txt")).unwrap()
        );
        assert_eq!(stats.expanded, 2);
        assert_eq!(stats.copied, 1);
    }

    #[test]
    fn test_walk_copies_binary_verbatim() {
        let env = create_test_env();
        let bytes = [0u8, 159, 146, 150, 255, b'<', b'!', b'-', b'-', b'#'];
        write(&env.source, "img/logo.png", &bytes);

        let options = WalkOptions::new(&env.source, &env.target);
        walk(&options, &expander_for(&env.source)).unwrap();

        assert_eq!(fs::read(env.target.join("img/logo.png")).unwrap(), bytes);
    }

    #[test]
    fn test_walk_mirrors_nested_directories() {
        let env = create_test_env();
        write(&env.source, "blog/2024/post.shtml", b"<!--#include virtual=\"/inc/footer.html\"-->");
        write(&env.source, "inc/footer.html", b"FOOTER");
        fs::create_dir_all(env.source.join("empty/dir")).unwrap();

        let options = WalkOptions::new(&env.source, &env.target);
        let stats = walk(&options, &expander_for(&env.source)).unwrap();

        assert_eq!(
            fs::read_to_string(env.target.join("blog/2024/post.shtml")).unwrap(),
            "FOOTER"
        );
        assert!(env.target.join("empty/dir").is_dir());
        assert_eq!(stats.directories, 5);
    }

    #[test]
    fn test_walk_skips_dotfiles() {
        let env = create_test_env();
        write(&env.source, ".htaccess", b"deny");
        write(&env.source, ".git/config", b"[core]");
        write(&env.source, "sub/.hidden.html", b"hidden");
        write(&env.source, "sub/visible.html", b"visible");

        let options = WalkOptions::new(&env.source, &env.target);
        let stats = walk(&options, &expander_for(&env.source)).unwrap();

        assert!(!env.target.join(".htaccess").exists());
        assert!(!env.target.join(".git").exists());
        assert!(!env.target.join("sub/.hidden.html").exists());
        assert!(env.target.join("sub/visible.html").exists());
        assert_eq!(stats.skipped, 3);
    }

    #[test]
    fn test_walk_does_not_descend_into_nested_target() {
        let env = create_test_env();
        let target = env.source.join("dist");
        write(&env.source, "index.html", b"home");
        write(&env.source, "dist/stale.html", b"stale");
        write(&env.source, "distribution/kept.txt", b"kept");
        write(&env.source, "dist-old/old.html", b"old");

        let options = WalkOptions::new(&env.source, &target);
        walk(&options, &expander_for(&env.source)).unwrap();
        // A second run must not pick up its own output either
        walk(&options, &expander_for(&env.source)).unwrap();

        assert!(target.join("index.html").exists());
        assert!(!target.join("dist").exists());
        assert!(target.join("distribution/kept.txt").exists());
        // Only the target itself is pruned, not siblings sharing its name as a prefix
        assert!(target.join("dist-old/old.html").exists());
    }

    #[test]
    fn test_walk_missing_include_writes_nothing_for_that_file() {
        let env = create_test_env();
        write(&env.source, "broken.html", b"<!--#include virtual=\"missing.html\"-->");

        let options = WalkOptions::new(&env.source, &env.target);
        let result = walk(&options, &expander_for(&env.source));

        assert!(matches!(
            result,
            Err(crate::DessiError::IncludeNotFound { .. })
        ));
        assert!(!env.target.join("broken.html").exists());
    }

    #[test]
    fn test_walk_tolerates_non_utf8_content() {
        let env = create_test_env();
        write(&env.source, "page.html", b"caf\xe9 <!--#include virtual=\"p.html\"-->");
        write(&env.source, "p.html", b"<!--#include virtual=\"img.txt\"-->");
        write(&env.source, "img.txt", b"\xff\xfeab");

        let options = WalkOptions::new(&env.source, &env.target);
        let result = walk(&options, &expander_for(&env.source));

        assert!(result.is_ok());
        assert_eq!(
            fs::read_to_string(env.target.join("page.html")).unwrap(),
            "caf\u{fffd} \u{fffd}\u{fffd}ab"
        );
        // Non-includable files are still copied byte for byte
        assert_eq!(fs::read(env.target.join("img.txt")).unwrap(), b"\xff\xfeab");
    }

    #[test]
    fn test_walk_uses_separate_root() {
        let env = create_test_env();
        let root = env.source.parent().unwrap().join("shared");
        write(&root, "nav.html", b"NAV");
        write(&env.source, "page.html", b"<!--#include virtual=\"nav.html\"-->");

        let options = WalkOptions::new(&env.source, &env.target);
        walk(&options, &expander_for(&root)).unwrap();

        assert_eq!(fs::read_to_string(env.target.join("page.html")).unwrap(), "NAV");
    }

    #[test]
    fn test_walk_exclude_patterns() {
        let env = create_test_env();
        write(&env.source, "drafts/wip.html", b"wip");
        write(&env.source, "keep.html", b"keep");
        write(&env.source, "scratch.tmp", b"tmp");

        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new("drafts").unwrap());
        builder.add(Glob::new("*.tmp").unwrap());
        let mut options = WalkOptions::new(&env.source, &env.target);
        options.exclude = Some(builder.build().unwrap());

        walk(&options, &expander_for(&env.source)).unwrap();

        assert!(env.target.join("keep.html").exists());
        assert!(!env.target.join("drafts").exists());
        assert!(!env.target.join("scratch.tmp").exists());
    }

    #[test]
    fn test_scan_reports_directives() {
        let env = create_test_env();
        write(
            &env.source,
            "index.html",
            b"<!--#include virtual=\"here.html\"--><!--#include virtual=\"gone.html\"-->",
        );
        write(&env.source, "here.html", b"ok");
        write(&env.source, "readme.txt", b"<!--#include virtual=\"ignored.html\"-->");

        let options = WalkOptions::new(&env.source, &env.target);
        let reports = scan(&options, &expander_for(&env.source)).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].file, PathBuf::from("index.html"));
        assert_eq!(reports[0].directive.virtual_path, "here.html");
        assert!(reports[0].exists);
        assert_eq!(reports[1].directive.virtual_path, "gone.html");
        assert!(!reports[1].exists);
        assert!(!env.target.exists());

        let json = serde_json::to_value(&reports[0]).unwrap();
        assert_eq!(json["virtual_path"], "here.html");
        assert_eq!(json["exists"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_check_collects_failures_without_writing() {
        let env = create_test_env();
        write(&env.source, "good.html", b"<!--#include virtual=\"part.html\"-->");
        write(&env.source, "part.html", b"P");
        write(&env.source, "bad.html", b"<!--#include virtual=\"missing.html\"-->");

        let options = WalkOptions::new(&env.source, &env.target);
        let results = check(&options, &expander_for(&env.source)).unwrap();

        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].file, PathBuf::from("bad.html"));
        assert!(!env.target.exists());
    }
}
