//! Source path extraction
//!
//! Decides whether a mapping's source expression is a field copy, and if so
//! which schema-relative paths it reads. `None` means "not a field copy"
//! (literal, variable, comment); `Some(vec![])` means a field copy whose
//! reference stripped down to nothing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::TranslationConfig;

static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$[A-Za-z_][A-Za-z0-9_]*\$$").expect("valid regex"));

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+\.?\d*$").expect("valid regex"));

static LOCAL_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-zA-Z0-9_]*;?$").expect("valid regex"));

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[$.#]").expect("valid regex"));

static TRAILING_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^()]+)\)\s*$").expect("valid regex"));

/// Reads source references out of mapping expressions
#[derive(Debug, Clone)]
pub struct SourcePathExtractor<'a> {
    config: &'a TranslationConfig,
    script_marker: Regex,
}

impl<'a> SourcePathExtractor<'a> {
    pub fn new(config: &'a TranslationConfig) -> Self {
        let script_marker = Regex::new(&format!(
            r"{}\$[^\s\);\+=]+",
            regex::escape(&config.script_root)
        ))
        .unwrap_or_else(|_| Regex::new(r"jbroot\$[^\s\);\+=]+").expect("valid regex"));
        Self {
            config,
            script_marker,
        }
    }

    fn is_navigation(&self, segment: &str) -> bool {
        let lower = segment.to_lowercase();
        self.config.navigation_prefixes.iter().any(|p| *p == lower)
    }

    fn is_collection_root(&self, segment: &str) -> bool {
        let lower = segment.to_lowercase();
        self.config.collection_roots.iter().any(|p| *p == lower)
    }

    /// Paths read by a plain (unscripted) source expression
    pub fn extract(&self, expression: &str) -> Option<Vec<String>> {
        let expr = expression.trim().trim_matches(['[', ']']).trim();
        if expr.is_empty() || VARIABLE.is_match(expr) {
            return None;
        }
        if expr.len() >= 2 && expr.starts_with('"') && expr.ends_with('"') {
            return None;
        }

        let last_line = expr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("//"))
            .last()
            .map(str::to_lowercase);
        if let Some(line) = last_line {
            if matches!(line.as_str(), "true" | "false" | "null")
                || NUMERIC.is_match(&line)
                || LOCAL_VARIABLE.is_match(&line)
            {
                return None;
            }
        }
        if expr.starts_with("//") {
            return None;
        }

        let reference = expr.split_whitespace().last()?;
        if VARIABLE.is_match(reference) {
            return None;
        }

        let segments: Vec<&str> = SEPARATORS
            .split(reference.trim_end_matches(['.', '$']))
            .filter(|s| !s.is_empty())
            .collect();

        let explicit_root = segments
            .first()
            .map_or(false, |s| s.eq_ignore_ascii_case("root"));
        let start = segments
            .iter()
            .position(|s| {
                !(self.is_navigation(s) || (explicit_root && self.is_collection_root(s)))
            })
            .unwrap_or(segments.len());
        let schema_segments = &segments[start..];

        if let [single] = schema_segments {
            if single.starts_with(|c: char| c.is_uppercase())
                && single.contains('_')
                && IDENTIFIER.is_match(single)
            {
                return None;
            }
        }

        let path = schema_segments
            .iter()
            .filter(|s| !s.chars().all(|c| c.is_ascii_digit()))
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        if path.is_empty() {
            Some(Vec::new())
        } else {
            Some(vec![path])
        }
    }

    /// Script-root references (`jbroot$jbresponse$a$b#.c`) inside a script,
    /// as `jbroot/...` paths in order of first appearance
    pub fn extract_script(&self, script: &str) -> Option<Vec<String>> {
        let mut paths: Vec<String> = Vec::new();
        let prefix = format!("{}$", self.config.script_root);

        for found in self.script_marker.find_iter(script) {
            let raw = found
                .as_str()
                .replacen(&prefix, "", 1)
                .replace(['$', '.'], "/")
                .replace("#/", "/")
                .replace('#', "/");
            let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();

            let mut kept: Vec<&str> = Vec::with_capacity(segments.len());
            for (i, segment) in segments.iter().enumerate() {
                let numeric = segment.chars().all(|c| c.is_ascii_digit());
                let structural = i > 0
                    && self
                        .config
                        .structural_index_parents
                        .iter()
                        .any(|p| p == segments[i - 1]);
                if !numeric || structural {
                    kept.push(*segment);
                }
            }
            if kept.is_empty() {
                continue;
            }

            let path = format!("{}/{}", self.config.script_root, kept.join("/"));
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            None
        } else {
            Some(paths)
        }
    }

    /// Paths read by a transform script: script-root references first,
    /// otherwise the field reference the script evaluates to
    pub fn extract_scripted(&self, script: &str) -> Option<Vec<String>> {
        self.extract_script(script)
            .or_else(|| {
                self.extract(script)?;
                self.extract(&field_reference(script))
            })
            .filter(|paths| !paths.is_empty())
    }
}

/// The field a script evaluates to.
///
/// `Log(x$); records$Contact.Id$` -> `records$Contact.Id$`,
/// `Lower(records$Contact.Email$)` -> `records$Contact.Email$`.
pub fn field_reference(script: &str) -> String {
    let expr = script.trim().trim_matches(['[', ']']);
    if expr.contains('(') && expr.contains(')') {
        if let Some(part) = expr
            .split(';')
            .map(str::trim)
            .rev()
            .find(|p| !p.is_empty() && !p.contains('('))
        {
            return format!("{}$", part.trim_end_matches(['.', '$']));
        }
        if let Some(argument) = TRAILING_CALL.captures(expr).and_then(|c| c.get(1)) {
            return format!("{}$", argument.as_str().trim().trim_end_matches(['.', '$']));
        }
    }
    if expr.is_empty() {
        String::new()
    } else {
        format!("{}$", expr.trim_end_matches(['.', '$']))
    }
}
