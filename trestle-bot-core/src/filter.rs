//! Include/skip decisions for named models in a workspace.

use glob::Pattern;
use tracing::warn;

/// Name of the placeholder file trestle keeps in empty model directories.
pub const KEEP_FILE: &str = ".keep";

/// Decides whether a model, by directory or file basename, is processed.
///
/// Patterns are compiled once. A pattern that fails to compile is matched
/// literally instead so an odd name never panics or silently widens a match.
#[derive(Debug, Clone)]
pub struct ModelFilter {
    skip: Vec<Matcher>,
    include: Vec<Matcher>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Pattern),
    Literal(String),
}

impl Matcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Glob(p) => p.matches(name),
            Matcher::Literal(l) => l == name,
        }
    }
}

impl ModelFilter {
    pub fn new<S: AsRef<str>>(skip_patterns: &[S], include_patterns: &[S]) -> Self {
        let mut skip: Vec<Matcher> = skip_patterns.iter().map(|p| compile(p.as_ref())).collect();
        skip.push(compile(KEEP_FILE));
        let include = include_patterns
            .iter()
            .map(|p| compile(p.as_ref()))
            .collect();
        Self { skip, include }
    }

    /// Filter that includes everything except the keep file.
    pub fn include_all() -> Self {
        Self::new::<&str>(&[], &["*"])
    }

    /// Skip wins over include. A name matching neither is skipped.
    pub fn is_skipped(&self, model_name: &str) -> bool {
        if self.skip.iter().any(|p| p.matches(model_name)) {
            return true;
        }
        !self.include.iter().any(|p| p.matches(model_name))
    }
}

fn compile(pattern: &str) -> Matcher {
    match Pattern::new(pattern) {
        Ok(p) => Matcher::Glob(p),
        Err(e) => {
            warn!(pattern, error = %e, "Invalid glob pattern, matching literally");
            Matcher::Literal(pattern.to_string())
        }
    }
}
