//! Path notation translation
//!
//! The archive writes paths in its native dialect: `[Contacts$Contact.FirstName$]`,
//! with `$` and `.` alternating as separators and brackets around the whole
//! expression. The runtime uses plain slash paths (`Contacts/Contact/FirstName`).
//!
//! Some externally-originated schemas are designed under one root name and
//! delivered at runtime under another (`Contacts` -> `records`). The
//! [`RootAliasTable`] holds those renames as data; a [`PathTranslator`]
//! applies them only when the unit's context says the schema is
//! externally-originated and its root carries no namespace.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::RootAlias;
use crate::model::SchemaRole;

static REPEATED_SLASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{3,}").expect("valid regex"));

/// Canonical -> runtime root renames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootAliasTable {
    aliases: Vec<RootAlias>,
}

impl RootAliasTable {
    pub fn new(aliases: Vec<RootAlias>) -> Self {
        Self { aliases }
    }

    pub fn runtime_for(&self, canonical: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|a| a.canonical == canonical)
            .map(|a| a.runtime.as_str())
    }

    pub fn canonical_for(&self, runtime: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|a| a.runtime == runtime)
            .map(|a| a.canonical.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Per-unit facts that decide whether aliasing applies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationContext {
    /// Declared source root (`{ns}name` when namespaced)
    pub source_root: Option<String>,
    pub target_root: Option<String>,
    /// The unit's source is known to be externally-originated
    pub alias_active: bool,
}

impl TranslationContext {
    fn root(&self, role: SchemaRole) -> Option<&str> {
        match role {
            SchemaRole::Source => self.source_root.as_deref(),
            SchemaRole::Target => self.target_root.as_deref(),
        }
    }
}

/// Converts between native and slash notation for one unit
#[derive(Debug, Clone)]
pub struct PathTranslator<'a> {
    aliases: &'a RootAliasTable,
    context: TranslationContext,
}

impl<'a> PathTranslator<'a> {
    pub fn new(aliases: &'a RootAliasTable, context: TranslationContext) -> Self {
        Self { aliases, context }
    }

    pub fn context(&self) -> &TranslationContext {
        &self.context
    }

    pub fn aliases(&self) -> &RootAliasTable {
        self.aliases
    }

    /// Whether root renames apply on `role`'s side.
    ///
    /// A namespaced declared root marks a fixed schema, never an aliased one.
    pub fn aliasing(&self, role: SchemaRole) -> bool {
        self.context.alias_active
            && !self.aliases.is_empty()
            && !self.context.root(role).map_or(false, |r| r.contains('}'))
    }

    /// `[Contacts$Contact.FirstName$]` -> `Contacts/Contact/FirstName`
    /// (or `records/Contact/FirstName` when aliasing applies)
    pub fn to_output_path(&self, native: &str, role: SchemaRole) -> String {
        let path = strip_brackets(native)
            .trim_end_matches(['.', '$'])
            .replace(['$', '.'], "/");
        let path = REPEATED_SLASHES.replace_all(&path, "//").into_owned();

        if !self.aliasing(role) {
            return path;
        }
        let (first, rest) = match path.split_once('/') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path.as_str(), None),
        };
        let aliased = self.aliases.runtime_for(first).map(|runtime| match rest {
            Some(rest) => format!("{}/{}", runtime, rest),
            None => runtime.to_string(),
        });
        aliased.unwrap_or(path)
    }

    /// Rename a canonical root at the head of a native expression
    /// (`Contacts$Contact.Id$` -> `records$Contact.Id$`)
    pub fn translate_native_root(&self, native: &str, role: SchemaRole) -> String {
        if !self.aliasing(role) {
            return native.to_string();
        }
        let Some(split) = native.find(['$', '.']) else {
            return native.to_string();
        };
        match self.aliases.runtime_for(&native[..split]) {
            Some(runtime) => format!("{}{}", runtime, &native[split..]),
            None => native.to_string(),
        }
    }
}

/// Slash path -> native notation.
///
/// The first segment ends in `$`, the second in `.`, the rest in `$`; a
/// repeating element below the root ends in `.` instead of its final `$`.
pub fn to_native_script(path: &str, is_loop: bool) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => return String::new(),
        [root] => return format!("{}$", root),
        _ => {}
    }

    let mut script = String::with_capacity(path.len() + segments.len());
    for (i, segment) in segments.iter().enumerate() {
        script.push_str(segment);
        script.push(if i == 1 { '.' } else { '$' });
    }
    if is_loop && script.ends_with('$') {
        script.pop();
        script.push('.');
    }
    script
}

/// `[expr]` -> `expr`
pub fn strip_brackets(native: &str) -> &str {
    native.trim().trim_matches(['[', ']']).trim()
}
