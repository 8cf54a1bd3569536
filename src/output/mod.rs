mod markdown;
mod simple;

pub use markdown::render_markdown;
pub use simple::render_simple;

use crate::compare::Comparison;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Output format for comparison results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Markdown with collapsible per-status tables
    #[default]
    Markdown,
    /// Three lines of counts
    Simple,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" | "table" => Ok(OutputFormat::Markdown),
            "simple" => Ok(OutputFormat::Simple),
            _ => Err(format!(
                "Unknown format: {}. Use 'markdown' or 'simple'",
                s
            )),
        }
    }
}

pub fn render_comparison(comparison: &Comparison<'_>, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Markdown => render_markdown(comparison),
        OutputFormat::Simple => Ok(render_simple(comparison)),
    }
}

/// Writes rendered output to `path`, or to stdout when no path is given.
pub fn emit(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => fs::write(path, content).map_err(|e| Error::io(path, e)),
        None => {
            print!("{}", content);
            Ok(())
        }
    }
}
