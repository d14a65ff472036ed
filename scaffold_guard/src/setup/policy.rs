use std::collections::BTreeSet;

use super::inspect::{COMPUTED_SPECIFIER, ImportRef};

pub const DEFAULT_INTERPRETER: &str = "node";
pub const DEFAULT_SCRIPT_NAME: &str = "_setup.mjs";

/// Runtime settings for the setup-script sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Program used to host scripts.
    pub interpreter: String,
    /// Extra arguments placed before the bootstrap harness path.
    pub interpreter_args: Vec<String>,
    /// Module specifiers a script may import. Empty means none.
    pub allowed_imports: Vec<String>,
    /// File name of the setup script inside a template.
    pub script_name: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            interpreter_args: Vec::new(),
            allowed_imports: Vec::new(),
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
        }
    }
}

/// Allow-list of importable modules.
///
/// A module is importable only if it is listed; anything the host runtime adds
/// later stays blocked. `node:` prefixes are ignored when matching, and a
/// computed specifier is never allowed.
#[derive(Debug, Clone, Default)]
pub struct ImportPolicy {
    allowed: BTreeSet<String>,
}

fn bare(specifier: &str) -> &str {
    specifier.strip_prefix("node:").unwrap_or(specifier)
}

impl ImportPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| bare(s.as_ref()).to_string())
                .collect(),
        }
    }

    pub fn allows(&self, specifier: &str) -> bool {
        specifier != COMPUTED_SPECIFIER && self.allowed.contains(bare(specifier))
    }

    /// First import the policy refuses, in source order.
    pub fn first_blocked<'a>(&self, imports: &'a [ImportRef]) -> Option<&'a ImportRef> {
        imports.iter().find(|import| !self.allows(&import.specifier))
    }
}
