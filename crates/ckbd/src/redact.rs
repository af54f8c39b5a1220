//! Field-level privacy filtering of outgoing rows.
//!
//! The redactor is pure: it rewrites the response copy after query filtering
//! has already run, so a privacy-stripped path never changes which rows a
//! filter matched. Applying it twice is the same as applying it once.

use crate::api::{ApiCallEdge, ApiFile, ApiRef, ApiSymbol};

#[derive(Clone, Debug)]
pub struct RedactOptions {
    pub expose_paths: bool,
    pub expose_docs: bool,
    pub expose_signatures: bool,
    pub path_prefix_strip: Option<String>,
}

impl Default for RedactOptions {
    fn default() -> Self {
        Self {
            expose_paths: true,
            expose_docs: true,
            expose_signatures: true,
            path_prefix_strip: None,
        }
    }
}

pub struct Redactor {
    options: RedactOptions,
}

impl Redactor {
    pub fn new(options: RedactOptions) -> Self {
        Self { options }
    }

    pub fn symbol(&self, symbol: &mut ApiSymbol) {
        self.apply_path(&mut symbol.file_path, &mut symbol.file_basename);
        if !self.options.expose_docs {
            symbol.documentation = None;
        }
        if !self.options.expose_signatures {
            symbol.signature = None;
        }
    }

    pub fn file(&self, file: &mut ApiFile) {
        self.apply_path(&mut file.path, &mut file.basename);
    }

    pub fn reference(&self, reference: &mut ApiRef) {
        self.apply_path(&mut reference.from_file, &mut reference.from_basename);
    }

    pub fn call_edge(&self, edge: &mut ApiCallEdge) {
        self.apply_path(&mut edge.caller_file, &mut edge.caller_basename);
    }

    /// Strip or clear one path field, filling the basename from the
    /// (possibly stripped) path. An already-cleared path is left alone so a
    /// second pass cannot lose the basename.
    fn apply_path(&self, path: &mut String, basename: &mut Option<String>) {
        if path.is_empty() {
            return;
        }
        let stripped = match &self.options.path_prefix_strip {
            Some(prefix) => strip_prefix(path, prefix),
            None => path.clone(),
        };
        *basename = stripped
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        *path = if self.options.expose_paths {
            stripped
        } else {
            String::new()
        };
    }
}

/// Strip `prefix` from the front of `path`, tolerating a configured prefix
/// with or without its trailing slash.
fn strip_prefix(path: &str, prefix: &str) -> String {
    let bare = prefix.trim_end_matches('/');
    if bare.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(bare) {
        Some(rest) if rest.is_empty() => path.to_string(),
        Some(rest) => match rest.strip_prefix('/') {
            Some(relative) => relative.to_string(),
            // "srcfoo.rs" merely shares a string prefix with "src".
            None => path.to_string(),
        },
        None => path.to_string(),
    }
}
