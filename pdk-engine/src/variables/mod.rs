// Variable Resolver and Expander
// Layered name lookup with origin tracking, plus lexical `${VAR}` substitution

use std::collections::HashMap;

/// Where a variable's value came from. Later entries take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VariableSource {
    /// `WORKSPACE`, `JOB_NAME`, `STEP_NAME`, `RUNNER`
    Builtin,
    /// `.pdkrc` / `pdk.config.json`
    ConfigFile,
    /// Host process environment plus `PDK_VAR_*`
    Environment,
    /// `--var` overrides
    Cli,
    /// `variables:` in the pipeline definition
    Pipeline,
}

const SOURCES: [VariableSource; 5] = [
    VariableSource::Builtin,
    VariableSource::ConfigFile,
    VariableSource::Environment,
    VariableSource::Cli,
    VariableSource::Pipeline,
];

impl std::fmt::Display for VariableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VariableSource::Builtin => "builtin",
            VariableSource::ConfigFile => "config",
            VariableSource::Environment => "environment",
            VariableSource::Cli => "cli",
            VariableSource::Pipeline => "pipeline",
        };
        write!(f, "{}", name)
    }
}

/// Layered variable lookup. Each job holds its own clone so parallel jobs
/// never observe another job's built-in rebinding.
#[derive(Debug, Clone, Default)]
pub struct VariableResolver {
    layers: [HashMap<String, String>; 5],
}

impl VariableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn layer_index(source: VariableSource) -> usize {
        SOURCES.iter().position(|s| *s == source).expect("known source")
    }

    /// Record a variable in the given layer.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>, source: VariableSource) {
        self.layers[Self::layer_index(source)].insert(name.into(), value.into());
    }

    /// Bulk insert into one layer.
    pub fn set_all(&mut self, values: &HashMap<String, String>, source: VariableSource) {
        let layer = &mut self.layers[Self::layer_index(source)];
        for (k, v) in values {
            layer.insert(k.clone(), v.clone());
        }
    }

    /// Look up a variable, highest-precedence layer first.
    pub fn get(&self, name: &str) -> Option<&str> {
        for (index, layer) in self.layers.iter().enumerate().rev() {
            if let Some(value) = layer.get(name) {
                log::trace!("variable '{}' resolved from the {} layer", name, SOURCES[index]);
                return Some(value.as_str());
            }
        }
        None
    }

    /// The layer the winning value for `name` came from.
    pub fn origin(&self, name: &str) -> Option<VariableSource> {
        for (index, layer) in self.layers.iter().enumerate().rev() {
            if layer.contains_key(name) {
                return Some(SOURCES[index]);
            }
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Rebind the built-ins between steps.
    pub fn update_context(&mut self, job_name: &str, step_name: &str, runner: &str, workspace: &str) {
        self.set("JOB_NAME", job_name, VariableSource::Builtin);
        self.set("STEP_NAME", step_name, VariableSource::Builtin);
        self.set("RUNNER", runner, VariableSource::Builtin);
        self.set("WORKSPACE", workspace, VariableSource::Builtin);
    }

    /// Load the environment layer: the full host environment plus
    /// `PDK_VAR_*` entries with the prefix stripped.
    pub fn load_environment(&mut self) {
        let layer = &mut self.layers[Self::layer_index(VariableSource::Environment)];
        for (k, v) in std::env::vars() {
            if let Some(stripped) = k.strip_prefix("PDK_VAR_") {
                if !stripped.is_empty() {
                    layer.insert(stripped.to_string(), v);
                    continue;
                }
            }
            layer.insert(k, v);
        }
    }

    /// Independent snapshot for a concurrently executing job.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}

/// Expand `${NAME}` references in `input` against the resolver.
///
/// Undefined names expand to empty, `$$` is a literal `$`, and expansion is
/// not recursive: a value containing `${X}` is inserted verbatim.
pub fn expand(input: &str, resolver: &VariableResolver) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for nc in chars.by_ref() {
                    if nc == '}' {
                        closed = true;
                        break;
                    }
                    name.push(nc);
                }
                if closed {
                    if let Some(value) = resolver.get(&name) {
                        out.push_str(value);
                    }
                    // Undefined: expands to empty.
                } else {
                    // Unterminated reference stays literal.
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

/// Collect the `${NAME}` references in a string, honoring the `$$` escape.
pub fn references(input: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for nc in chars.by_ref() {
                    if nc == '}' {
                        closed = true;
                        break;
                    }
                    name.push(nc);
                }
                if closed && !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
            }
            _ => {}
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(entries: &[(&str, &str, VariableSource)]) -> VariableResolver {
        let mut resolver = VariableResolver::new();
        for (name, value, source) in entries {
            resolver.set(*name, *value, *source);
        }
        resolver
    }

    #[test]
    fn test_precedence_order() {
        let resolver = resolver_with(&[
            ("NAME", "builtin", VariableSource::Builtin),
            ("NAME", "config", VariableSource::ConfigFile),
            ("NAME", "env", VariableSource::Environment),
            ("NAME", "cli", VariableSource::Cli),
            ("NAME", "pipeline", VariableSource::Pipeline),
        ]);
        assert_eq!(resolver.get("NAME"), Some("pipeline"));
        assert_eq!(resolver.origin("NAME"), Some(VariableSource::Pipeline));
    }

    #[test]
    fn test_lower_layer_visible_when_not_shadowed() {
        let resolver = resolver_with(&[("WORKSPACE", "/work", VariableSource::Builtin)]);
        assert_eq!(resolver.get("WORKSPACE"), Some("/work"));
        assert_eq!(resolver.origin("WORKSPACE"), Some(VariableSource::Builtin));
        assert_eq!(resolver.get("MISSING"), None);
    }

    #[test]
    fn test_update_context_rebinds_builtins() {
        let mut resolver = VariableResolver::new();
        resolver.update_context("build", "compile", "ubuntu-latest", "/work");
        assert_eq!(resolver.get("JOB_NAME"), Some("build"));
        assert_eq!(resolver.get("STEP_NAME"), Some("compile"));

        resolver.update_context("build", "test", "ubuntu-latest", "/work");
        assert_eq!(resolver.get("STEP_NAME"), Some("test"));
    }

    #[test]
    fn test_expand_basic() {
        let resolver = resolver_with(&[("GREETING", "hello", VariableSource::Pipeline)]);
        assert_eq!(expand("say ${GREETING}!", &resolver), "say hello!");
    }

    #[test]
    fn test_expand_undefined_is_empty() {
        let resolver = VariableResolver::new();
        assert_eq!(expand("x${MISSING}y", &resolver), "xy");
    }

    #[test]
    fn test_expand_dollar_escape() {
        let resolver = resolver_with(&[("A", "1", VariableSource::Pipeline)]);
        assert_eq!(expand("$$ and $${A} and ${A}", &resolver), "$ and ${A} and 1");
    }

    #[test]
    fn test_expand_is_not_recursive() {
        let resolver = resolver_with(&[
            ("X", "${Y}", VariableSource::Pipeline),
            ("Y", "z", VariableSource::Pipeline),
        ]);
        assert_eq!(expand("${X}", &resolver), "${Y}");
    }

    #[test]
    fn test_expand_unterminated_stays_literal() {
        let resolver = VariableResolver::new();
        assert_eq!(expand("tail ${OPEN", &resolver), "tail ${OPEN");
        assert_eq!(expand("lone $", &resolver), "lone $");
        assert_eq!(expand("plain $VAR", &resolver), "plain $VAR");
    }

    #[test]
    fn test_references_collects_unique_names() {
        let refs = references("${A} ${B} ${A} $$ ${} $C");
        assert_eq!(refs, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut resolver = VariableResolver::new();
        resolver.set("K", "v1", VariableSource::Cli);
        let snapshot = resolver.snapshot();
        resolver.set("K", "v2", VariableSource::Cli);
        assert_eq!(snapshot.get("K"), Some("v1"));
        assert_eq!(resolver.get("K"), Some("v2"));
    }
}
