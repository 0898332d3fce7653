use crate::error::{DessiError, Result};
use crate::fs_utils::{normalize_path, read_file_contents, resolve_virtual_path};
use log::{debug, trace};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Extensions expanded by default, without the leading dot
pub const DEFAULT_EXTENSIONS: [&str; 2] = ["html", "shtml"];

/// Default limit on nested include expansion
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// `<!--#include virtual="PATH"-->`, PATH restricted to `[A-Za-z0-9._/$-]`
const DIRECTIVE_PATTERN: &str = r#"<!--#include\s+virtual="([A-Za-z0-9._/$\-]+)"\s?-->"#;

/// File extensions whose contents are scanned for include directives.
///
/// Any other file is copied (or included) verbatim. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludableExtensions {
    extensions: BTreeSet<String>,
}

impl Default for IncludableExtensions {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

impl IncludableExtensions {
    /// Builds a set from extensions given with or without their leading dot.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_string())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    /// Returns a copy of this set with `extension` added.
    #[must_use]
    pub fn with_extension(mut self, extension: &str) -> Self {
        let ext = extension.trim_start_matches('.');
        if !ext.is_empty() {
            self.extensions.insert(ext.to_string());
        }
        self
    }

    /// Whether `path` carries one of the includable extensions.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(ext))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }
}

/// Configuration for include expansion
#[derive(Debug, Clone)]
pub struct ExpandConfig {
    /// Directory every virtual path resolves against, at any nesting depth
    pub root: PathBuf,
    /// Extensions whose included contents are expanded recursively
    pub extensions: IncludableExtensions,
    /// Maximum include nesting before giving up
    pub max_depth: usize,
    /// Reject include paths that resolve outside `root`
    pub confine_to_root: bool,
}

impl ExpandConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: IncludableExtensions::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            confine_to_root: false,
        }
    }
}

/// An include directive found in a piece of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludeDirective {
    /// The full directive text, from `<!--#` to `-->`
    pub full_match: String,
    /// The path inside `virtual="..."`
    pub virtual_path: String,
    /// Byte offset of the directive start
    pub start: usize,
    /// Byte offset just past the directive end
    pub end: usize,
}

/// One piece of scanned text: either literal text or a directive to replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Literal(&'a str),
    Include(IncludeDirective),
}

/// Expands include directives against a fixed root.
///
/// Holds the compiled directive pattern so it is built once per run.
#[derive(Debug, Clone)]
pub struct Expander {
    config: ExpandConfig,
    pattern: Regex,
}

impl Expander {
    /// Creates an expander for `config`.
    ///
    /// # Errors
    ///
    /// Returns `DessiError::Regex` if the directive pattern fails to compile.
    pub fn new(config: ExpandConfig) -> Result<Self> {
        Ok(Self {
            config,
            pattern: Regex::new(DIRECTIVE_PATTERN)?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ExpandConfig {
        &self.config
    }

    /// Splits `content` into literal text and include directives, in order.
    ///
    /// Anything that is not a well-formed `include virtual` directive, including
    /// other `<!--#...-->` commands, stays in the literal text.
    #[must_use]
    pub fn tokenize<'a>(&self, content: &'a str) -> Vec<Token<'a>> {
        let mut tokens = Vec::new();
        let mut cursor = 0;

        for capture in self.pattern.captures_iter(content) {
            if let Some(full_match) = capture.get(0)
                && let Some(path_match) = capture.get(1)
            {
                if full_match.start() > cursor {
                    tokens.push(Token::Literal(&content[cursor..full_match.start()]));
                }
                tokens.push(Token::Include(IncludeDirective {
                    full_match: full_match.as_str().to_string(),
                    virtual_path: path_match.as_str().to_string(),
                    start: full_match.start(),
                    end: full_match.end(),
                }));
                cursor = full_match.end();
            }
        }

        if cursor < content.len() {
            tokens.push(Token::Literal(&content[cursor..]));
        }

        tokens
    }

    /// Finds all include directives in `content`
    #[must_use]
    pub fn find_directives(&self, content: &str) -> Vec<IncludeDirective> {
        self.tokenize(content)
            .into_iter()
            .filter_map(|token| match token {
                Token::Include(directive) => Some(directive),
                Token::Literal(_) => None,
            })
            .collect()
    }

    /// Resolves the filesystem path a directive refers to.
    ///
    /// # Errors
    ///
    /// - `DessiError::PathTraversal` if confinement is on and the path leaves the root.
    pub fn resolve(&self, directive: &IncludeDirective) -> Result<PathBuf> {
        resolve_virtual_path(
            &directive.virtual_path,
            &self.config.root,
            self.config.confine_to_root,
        )
    }

    /// Replaces every include directive in `content` with the contents of the
    /// referenced file, expanding nested includes in includable files.
    ///
    /// # Errors
    ///
    /// - `DessiError::IncludeNotFound` if a referenced file is missing.
    /// - `DessiError::IncludeCycle` if an included file re-includes itself.
    /// - `DessiError::IncludeDepthExceeded` past the configured nesting limit.
    /// - `DessiError::Read` if a referenced file cannot be read. Invalid UTF-8 is
    ///   decoded lossily, not reported.
    pub fn expand(&self, content: &str) -> Result<String> {
        self.expand_nested(content, &mut Vec::new(), 0)
    }

    /// Reads `path` and expands it. The file counts as the first link of the
    /// include chain, so a page that includes itself is reported as a cycle.
    ///
    /// # Errors
    ///
    /// - `DessiError::FileNotFound` if `path` is not a readable file.
    /// - Any error from [`Expander::expand`].
    pub fn expand_file(&self, path: &Path) -> Result<String> {
        let content = read_file_contents(path)?;
        let mut chain = vec![normalize_path(path)];
        self.expand_nested(&content, &mut chain, 0)
    }

    fn expand_nested(&self, content: &str, chain: &mut Vec<PathBuf>, depth: usize) -> Result<String> {
        let mut output = String::with_capacity(content.len());

        for token in self.tokenize(content) {
            match token {
                Token::Literal(text) => output.push_str(text),
                Token::Include(directive) => {
                    output.push_str(&self.include(&directive, chain, depth)?);
                }
            }
        }

        Ok(output)
    }

    fn include(
        &self,
        directive: &IncludeDirective,
        chain: &mut Vec<PathBuf>,
        depth: usize,
    ) -> Result<String> {
        let path = self.resolve(directive)?;
        trace!("{} -> {}", directive.virtual_path, path.display());

        if !path.is_file() {
            return Err(DessiError::IncludeNotFound {
                virtual_path: directive.virtual_path.clone(),
                path,
            });
        }
        let contents = read_file_contents(&path)?;

        // Gated on the virtual path, so a .txt include is never re-scanned
        if !self
            .config
            .extensions
            .matches(Path::new(&directive.virtual_path))
        {
            return Ok(contents);
        }

        if chain.contains(&path) {
            let mut cycle = chain.clone();
            cycle.push(path);
            return Err(DessiError::IncludeCycle { chain: cycle });
        }
        if depth >= self.config.max_depth {
            return Err(DessiError::IncludeDepthExceeded {
                path,
                max_depth: self.config.max_depth,
            });
        }

        debug!("Following nested include {}", directive.virtual_path);
        chain.push(path);
        let expanded = self.expand_nested(&contents, chain, depth + 1);
        chain.pop();
        expanded
    }
}

/// Expands `content` against `root` with the default extensions and depth limit.
///
/// # Errors
///
/// Same as [`Expander::expand`].
pub fn expand(content: &str, root: &Path) -> Result<String> {
    Expander::new(ExpandConfig::new(root))?.expand(content)
}
