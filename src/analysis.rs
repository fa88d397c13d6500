//! WordPress-aware static scan of an aggregated plugin payload.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// `add_action` or `add_filter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// `add_action`
    Action,
    /// `add_filter`
    Filter,
}

/// A hook registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookUsage {
    /// Action or filter
    pub kind: HookKind,
    /// Hook name
    pub name: String,
}

/// Fields of the standard plugin header comment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHeader {
    /// `Plugin Name:`
    pub name: String,
    /// `Version:`
    pub version: Option<String>,
    /// `Description:`
    pub description: Option<String>,
    /// `Author:`
    pub author: Option<String>,
}

/// What the analyzer found in a payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub filename: String,
    pub files: Vec<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub namespaces: Vec<String>,
    pub hooks: Vec<HookUsage>,
    pub shortcodes: Vec<String>,
    pub rest_routes: Vec<String>,
    pub ajax_actions: Vec<String>,
    pub enqueued_assets: Vec<String>,
    pub options: Vec<String>,
    pub post_types: Vec<String>,
    pub plugin_header: Option<PluginHeader>,
    /// Short names of the WordPress features in use, for prompt building
    pub patterns: Vec<String>,
}

/// Analysis collaborator
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Scans `content` and reports what it contains
    async fn analyze(&self, content: &str, filename: &str) -> Result<AnalysisReport>;
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("static regex"));
    };
}

pattern!(FUNCTION, r"\bfunction\s+&?\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(");
pattern!(
    CLASS,
    r"(?m)^\s*(?:abstract\s+|final\s+)?(?:class|interface|trait)\s+([A-Za-z_][A-Za-z0-9_]*)"
);
pattern!(NAMESPACE, r"(?m)^\s*namespace\s+([A-Za-z_\\][A-Za-z0-9_\\]*)\s*[;{]");
pattern!(HOOK, r#"\badd_(action|filter)\s*\(\s*['"]([^'"]+)['"]"#);
pattern!(SHORTCODE, r#"\badd_shortcode\s*\(\s*['"]([^'"]+)['"]"#);
pattern!(
    REST_ROUTE,
    r#"\bregister_rest_route\s*\(\s*['"]([^'"]+)['"]\s*,\s*['"]([^'"]+)['"]"#
);
pattern!(AJAX, r#"\badd_action\s*\(\s*['"]wp_ajax_(?:nopriv_)?([^'"]+)['"]"#);
pattern!(
    ENQUEUE,
    r#"\bwp_(?:enqueue|register)_(?:script|style)\s*\(\s*['"]([^'"]+)['"]"#
);
pattern!(OPTION, r#"\b(?:get|update|add|delete)_option\s*\(\s*['"]([^'"]+)['"]"#);
pattern!(POST_TYPE, r#"\bregister_post_type\s*\(\s*['"]([^'"]+)['"]"#);
pattern!(FILE_MARKER, r"(?m)^// ===== File: (.+) =====$");
pattern!(HEADER_NAME, r"(?m)^[\s/*#@]*Plugin Name:\s*(.+?)\s*$");
pattern!(HEADER_VERSION, r"(?m)^[\s/*#@]*Version:\s*(.+?)\s*$");
pattern!(HEADER_DESCRIPTION, r"(?m)^[\s/*#@]*Description:\s*(.+?)\s*$");
pattern!(HEADER_AUTHOR, r"(?m)^[\s/*#@]*Author:\s*(.+?)\s*$");

/// Whether a PHP source carries the plugin header
pub fn has_plugin_header(content: &str) -> bool {
    HEADER_NAME.is_match(content)
}

/// Parses the plugin header comment, if present
pub fn parse_plugin_header(content: &str) -> Option<PluginHeader> {
    let first = |re: &Regex| re.captures(content).map(|c| c[1].to_string());
    Some(PluginHeader {
        name: first(&HEADER_NAME)?,
        version: first(&HEADER_VERSION),
        description: first(&HEADER_DESCRIPTION),
        author: first(&HEADER_AUTHOR),
    })
}

fn collect(re: &Regex, content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in re.captures_iter(content) {
        let value = caps[1].to_string();
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Regex based scan for WordPress plugin idioms
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    /// Creates the analyzer
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scan used by the trait implementation
    pub fn scan(&self, content: &str, filename: &str) -> AnalysisReport {
        let mut hooks: Vec<HookUsage> = Vec::new();
        for caps in HOOK.captures_iter(content) {
            let hook = HookUsage {
                kind: if &caps[1] == "action" {
                    HookKind::Action
                } else {
                    HookKind::Filter
                },
                name: caps[2].to_string(),
            };
            if !hooks.contains(&hook) {
                hooks.push(hook);
            }
        }

        let mut rest_routes: Vec<String> = Vec::new();
        for caps in REST_ROUTE.captures_iter(content) {
            let route = format!(
                "{}/{}",
                caps[1].trim_matches('/'),
                caps[2].trim_start_matches('/')
            );
            if !rest_routes.contains(&route) {
                rest_routes.push(route);
            }
        }

        let mut report = AnalysisReport {
            filename: filename.to_string(),
            files: collect(&FILE_MARKER, content),
            functions: collect(&FUNCTION, content),
            classes: collect(&CLASS, content),
            namespaces: collect(&NAMESPACE, content),
            hooks,
            shortcodes: collect(&SHORTCODE, content),
            rest_routes,
            ajax_actions: collect(&AJAX, content),
            enqueued_assets: collect(&ENQUEUE, content),
            options: collect(&OPTION, content),
            post_types: collect(&POST_TYPE, content),
            plugin_header: parse_plugin_header(content),
            patterns: Vec::new(),
        };
        report.patterns = summarize(&report);
        report
    }
}

fn summarize(report: &AnalysisReport) -> Vec<String> {
    [
        (!report.hooks.is_empty(), "hooks"),
        (!report.shortcodes.is_empty(), "shortcodes"),
        (!report.rest_routes.is_empty(), "rest_api"),
        (!report.ajax_actions.is_empty(), "ajax"),
        (!report.enqueued_assets.is_empty(), "assets"),
        (!report.options.is_empty(), "options_api"),
        (!report.post_types.is_empty(), "custom_post_types"),
        (!report.classes.is_empty(), "object_oriented"),
        (!report.namespaces.is_empty(), "namespaced"),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, name)| name.to_string())
    .collect()
}

#[async_trait]
impl AnalysisService for PatternAnalyzer {
    async fn analyze(&self, content: &str, filename: &str) -> Result<AnalysisReport> {
        Ok(self.scan(content, filename))
    }
}
