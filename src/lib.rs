//! # dessi
//!
//! Static expansion of server-side include directives. Copies a source directory
//! tree into a target directory, replacing every `<!--#include virtual="..."-->`
//! in `.html`/`.shtml` files with the contents of the referenced file.
//!
//! ## Features
//!
//! - Expands `<!--#include virtual="path"-->` directives ahead of time
//! - Nested includes in includable files are expanded recursively
//! - Every virtual path resolves against one fixed root directory
//! - Non-includable files are copied byte for byte
//! - Dotfiles and a target directory nested in the source are skipped
//! - Include cycles and runaway nesting are reported instead of overflowing the stack
//!
//! ## Usage
//!
//! ### As a Library
//!
//! ```no_run
//! use dessi::{ExpandConfig, Expander, WalkOptions, walk};
//!
//! let expander = Expander::new(ExpandConfig::new("/srv/site")).unwrap();
//! let html = expander.expand("<body><!--#include virtual=\"/inc/nav.html\"--></body>");
//!
//! let options = WalkOptions::new("/srv/site", "/srv/public");
//! match walk(&options, &expander) {
//!     Ok(stats) => println!("{} files expanded", stats.expanded),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```
//!
//! ### As a CLI Tool
//!
//! ```bash
//! # Expand ./site into ./public, resolving includes against ./site
//! dessi --source=site --target=public
//!
//! # Resolve includes against a different root
//! dessi --source=site/pages --target=public --root=site
//! ```

pub mod error;
pub mod fs_utils;
pub mod ssi;
pub mod walker;

// Re-export main types and functions for convenience
pub use error::{DessiError, Result};
pub use ssi::{
    DEFAULT_MAX_DEPTH, ExpandConfig, Expander, IncludableExtensions, IncludeDirective, Token,
    expand,
};
pub use walker::{CheckResult, DirectiveReport, WalkOptions, WalkStats, check, scan, walk};
