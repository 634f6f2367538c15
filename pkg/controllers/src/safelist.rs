use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

/// Why a permission entry's namespace patterns could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafelistError {
    #[error("namespacesAllowedRegex must not be empty")]
    EmptyAllowPattern,

    #[error("invalid namespace pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Compile `pattern` so that it only matches whole names.
///
/// The raw pattern is compiled first: a pattern such as `a)|(b` is rejected
/// there instead of escaping the anchoring group.
fn compile_anchored(pattern: &str) -> Result<Regex, SafelistError> {
    let invalid = |e: regex::Error| SafelistError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    };
    Regex::new(pattern).map_err(invalid)?;
    Regex::new(&format!("^(?:{})$", pattern)).map_err(invalid)
}

/// Keep names matched by `allowed`, then drop names matched by `denied`.
fn filter_names<S: AsRef<str>>(allowed: &Regex, denied: Option<&Regex>, names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| allowed.is_match(name))
        .filter(|name| !denied.is_some_and(|re| re.is_match(name)))
        .map(str::to_string)
        .collect()
}

/// Compute the namespaces one permission entry applies to.
///
/// A name is kept when it fully matches `allowed` and does not fully match
/// `denied`; denial wins. An empty `denied` pattern means "no deny list" and
/// denies nothing, although an empty regex would match every name. Input
/// order is preserved.
pub fn generate_safelist<S: AsRef<str>>(
    allowed: &str,
    denied: &str,
    namespaces: &[S],
) -> Result<Vec<String>, SafelistError> {
    if allowed.is_empty() {
        return Err(SafelistError::EmptyAllowPattern);
    }
    let allowed = compile_anchored(allowed)?;
    let denied = if denied.is_empty() {
        None
    } else {
        Some(compile_anchored(denied)?)
    };
    Ok(filter_names(&allowed, denied.as_ref(), namespaces))
}

/// Compiled namespace patterns keyed by their source text.
///
/// Entries are inserted once and never replaced, so clones of the cache can
/// be shared freely between controllers.
#[derive(Clone, Default)]
pub struct PatternCache {
    compiled: Arc<DashMap<String, Arc<Regex>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, SafelistError> {
        if let Some(re) = self.compiled.get(pattern) {
            return Ok(Arc::clone(re.value()));
        }
        let re = Arc::new(compile_anchored(pattern)?);
        let entry = self.compiled.entry(pattern.to_string()).or_insert(re);
        Ok(Arc::clone(entry.value()))
    }

    /// Same as [`generate_safelist`], reusing compiled patterns.
    pub fn safelist<S: AsRef<str>>(
        &self,
        allowed: &str,
        denied: &str,
        namespaces: &[S],
    ) -> Result<Vec<String>, SafelistError> {
        if allowed.is_empty() {
            return Err(SafelistError::EmptyAllowPattern);
        }
        let allowed = self.get_or_compile(allowed)?;
        let denied = if denied.is_empty() {
            None
        } else {
            Some(self.get_or_compile(denied)?)
        };
        Ok(filter_names(&allowed, denied.as_deref(), namespaces))
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
