//! Thin wrapper over `serde_yaml::Value` that recovers best-effort source
//! locations for [`Errata`](crate::error::Errata) notes.
//!
//! `serde_yaml` 0.9's value tree carries no spans, so [`Node::mark`] falls
//! back to a raw-text search for the key under the map that produced this
//! node; when the same key appears more than once in the file, or not at
//! all, the mark degrades to `line: None` rather than reporting a wrong line.

use crate::error::SourceMark;
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// A YAML value paired with the file it came from, for mark recovery.
#[derive(Debug, Clone)]
pub struct Node<'a> {
    pub value: &'a Value,
    file: &'a Path,
    source: &'a str,
}

impl<'a> Node<'a> {
    pub fn root(value: &'a Value, file: &'a Path, source: &'a str) -> Self {
        Node { value, file, source }
    }

    pub fn get(&self, key: &str) -> Option<Node<'a>> {
        self.value
            .as_mapping()?
            .get(Value::String(key.to_string()))
            .map(|v| Node {
                value: v,
                file: self.file,
                source: self.source,
            })
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.value.as_str()
    }

    pub fn as_sequence(&self) -> impl Iterator<Item = Node<'a>> {
        self.value
            .as_sequence()
            .into_iter()
            .flatten()
            .map(move |v| Node {
                value: v,
                file: self.file,
                source: self.source,
            })
    }

    pub fn as_mapping_entries(&self) -> impl Iterator<Item = (&'a str, Node<'a>)> {
        self.value
            .as_mapping()
            .into_iter()
            .flatten()
            .filter_map(move |(k, v)| {
                k.as_str().map(|k| {
                    (
                        k,
                        Node {
                            value: v,
                            file: self.file,
                            source: self.source,
                        },
                    )
                })
            })
    }

    /// Best-effort source mark for `key`, found by a unique raw-text search.
    /// Returns `line: None` if `key` is ambiguous or not found verbatim.
    pub fn mark_for(&self, key: &str) -> SourceMark {
        mark_for_key(self.file, self.source, key)
    }

    pub fn mark(&self) -> SourceMark {
        SourceMark {
            file: self.file.to_path_buf(),
            line: None,
        }
    }
}

/// Search `source` for a line containing `"key":` or `key:` at the start of
/// a mapping entry (allowing leading whitespace/dash), and return its
/// 1-based line number if the match is unambiguous.
pub fn mark_for_key(file: &Path, source: &str, key: &str) -> SourceMark {
    let needle_plain = format!("{key}:");
    let needle_quoted = format!("\"{key}\":");
    let mut found: Option<usize> = None;
    let mut ambiguous = false;
    for (idx, line) in source.lines().enumerate() {
        let trimmed = line.trim_start_matches([' ', '-']);
        if trimmed.starts_with(&needle_plain) || trimmed.starts_with(&needle_quoted) {
            if found.is_some() {
                ambiguous = true;
                break;
            }
            found = Some(idx + 1);
        }
    }
    SourceMark {
        file: file.to_path_buf(),
        line: if ambiguous { None } else { found },
    }
}

pub fn parse(source: &str, file: impl Into<PathBuf>) -> Result<(Value, PathBuf), serde_yaml::Error> {
    let value: Value = serde_yaml::from_str(source)?;
    Ok((value, file.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_for_key_finds_unique_line() {
        let src = "a: 1\nb: 2\nc: 3\n";
        let mark = mark_for_key(Path::new("r.yaml"), src, "b");
        assert_eq!(mark.line, Some(2));
    }

    #[test]
    fn mark_for_key_degrades_on_duplicate() {
        let src = "list:\n  - a: 1\n  - a: 2\n";
        let mark = mark_for_key(Path::new("r.yaml"), src, "a");
        assert_eq!(mark.line, None);
    }

    #[test]
    fn node_navigates_nested_mapping() {
        let src = "outer:\n  inner: hello\n";
        let (value, _) = parse(src, "r.yaml").unwrap();
        let file = PathBuf::from("r.yaml");
        let root = Node::root(&value, &file, src);
        let inner = root.get("outer").and_then(|n| n.get("inner")).unwrap();
        assert_eq!(inner.as_str(), Some("hello"));
    }
}
