//! Flattening of GitHub's git tree listing into [`TreeEntry`] values.
//!
//! GitHub only lists directories it happens to return; after extension
//! filtering a file can easily end up without its parent. The build runs in
//! two passes: collect every path prefix, then merge explicit entries with
//! synthesized directories in a `BTreeMap` so output order is stable.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use super::types::{extension_of, name_from_path, ApiTreeItem, EntryType, TreeEntry};

/// Extension allow-list used when flattening a tree
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    allowed: HashSet<String>,
}

impl ExtensionFilter {
    /// Builds a filter from extensions with or without a leading dot
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    /// Whether a file path passes the filter
    pub fn accepts(&self, path: &str) -> bool {
        extension_of(path).map_or(false, |ext| self.allowed.contains(&ext))
    }
}

/// Converts raw tree items into a filtered, parent-complete listing sorted by path
pub(crate) fn build_tree(items: Vec<ApiTreeItem>, filter: &ExtensionFilter) -> Vec<TreeEntry> {
    let mut explicit: BTreeMap<String, TreeEntry> = BTreeMap::new();

    for item in items {
        let path = item.path.trim_matches('/').to_string();
        if path.is_empty() {
            continue;
        }
        let entry_type = match item.item_type.as_str() {
            "blob" => EntryType::File,
            "tree" => EntryType::Dir,
            other => {
                debug!("Skipping tree item {} of type {}", path, other);
                continue;
            }
        };
        if entry_type == EntryType::File && !filter.accepts(&path) {
            continue;
        }

        explicit.insert(
            path.clone(),
            TreeEntry {
                name: name_from_path(&path).to_string(),
                entry_type,
                sha: item.sha,
                size: if entry_type == EntryType::File {
                    item.size.unwrap_or(0)
                } else {
                    0
                },
                url: item.url.unwrap_or_default(),
                path,
            },
        );
    }

    // Pass one: every directory prefix implied by a kept file.
    let prefixes: BTreeSet<String> = explicit
        .values()
        .filter(|entry| entry.is_file())
        .flat_map(|entry| parent_prefixes(&entry.path))
        .collect();

    // Pass two: merge, explicit entries win.
    let mut merged = explicit;
    for prefix in prefixes {
        merged.entry(prefix.clone()).or_insert_with(|| TreeEntry {
            name: name_from_path(&prefix).to_string(),
            entry_type: EntryType::Dir,
            sha: String::new(),
            size: 0,
            url: String::new(),
            path: prefix,
        });
    }

    merged.into_values().collect()
}

fn parent_prefixes(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').collect();
    (1..segments.len())
        .map(|len| segments[..len].join("/"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(path: &str, kind: &str) -> ApiTreeItem {
        ApiTreeItem {
            path: path.to_string(),
            item_type: kind.to_string(),
            sha: format!("sha-{}", path),
            size: Some(10),
            url: Some(format!("https://api.github.com/blobs/{}", path)),
        }
    }

    fn php_js() -> ExtensionFilter {
        ExtensionFilter::new(["php", ".js", "json"])
    }

    #[test]
    fn test_synthesizes_missing_parents() {
        let tree = build_tree(
            vec![item("includes/admin/settings.php", "blob"), item("plugin.php", "blob")],
            &php_js(),
        );

        let paths: Vec<(&str, EntryType)> =
            tree.iter().map(|e| (e.path.as_str(), e.entry_type)).collect();
        assert_eq!(
            paths,
            vec![
                ("includes", EntryType::Dir),
                ("includes/admin", EntryType::Dir),
                ("includes/admin/settings.php", EntryType::File),
                ("plugin.php", EntryType::File),
            ]
        );
        assert_eq!(tree[1].name, "admin");
        assert!(tree[0].sha.is_empty());
    }

    #[test]
    fn test_explicit_directory_is_kept_once() {
        let tree = build_tree(
            vec![item("assets", "tree"), item("assets/app.js", "blob")],
            &php_js(),
        );
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].sha, "sha-assets");
    }

    #[test]
    fn test_filters_extensions_and_submodules() {
        let tree = build_tree(
            vec![
                item("logo.png", "blob"),
                item("vendor/lib", "commit"),
                item("composer.json", "blob"),
                item("Makefile", "blob"),
            ],
            &php_js(),
        );
        let paths: Vec<&str> = tree.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["composer.json"]);
    }

    #[test]
    fn test_every_entry_has_name() {
        let tree = build_tree(vec![item("a/b/c/d.php", "blob")], &php_js());
        assert_eq!(tree.len(), 4);
        assert!(tree.iter().all(|e| !e.path.is_empty() && !e.name.is_empty()));
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        assert!(php_js().accepts("Main.PHP"));
        assert!(!php_js().accepts("php"));
    }
}
