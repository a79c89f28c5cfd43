//! Structural diff between two version snapshots.
//! Objects are recursed key by key; arrays and scalars compare by value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Added { after: Value },
    Removed { before: Value },
    Changed { before: Value, after: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path from the snapshot root; `$` is the root itself.
    pub path: String,
    #[serde(flatten)]
    pub change: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDiff {
    pub from: Uuid,
    pub to: Uuid,
    pub changes: Vec<FieldChange>,
}

impl VersionDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Field-level changes turning `before` into `after`, sorted by path.
pub fn diff_snapshots(before: &Value, after: &Value) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    walk("", before, after, &mut changes);
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn walk(path: &str, before: &Value, after: &Value, out: &mut Vec<FieldChange>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, bv) in b {
                let child = join(path, key);
                match a.get(key) {
                    Some(av) => walk(&child, bv, av, out),
                    None => out.push(FieldChange {
                        path: child,
                        change: ChangeKind::Removed { before: bv.clone() },
                    }),
                }
            }
            for (key, av) in a {
                if !b.contains_key(key) {
                    out.push(FieldChange {
                        path: join(path, key),
                        change: ChangeKind::Added { after: av.clone() },
                    });
                }
            }
        }
        (b, a) if b != a => out.push(FieldChange {
            path: if path.is_empty() { "$".into() } else { path.to_string() },
            change: ChangeKind::Changed {
                before: b.clone(),
                after: a.clone(),
            },
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identical_snapshots_have_no_changes() {
        let v = json!({"limit": 1000, "terms": {"deductible": 500}});
        assert!(diff_snapshots(&v, &v).is_empty());
    }

    #[test]
    fn reports_added_removed_and_changed() {
        let before = json!({"name": "Auto", "limit": 1000, "legacy": true});
        let after = json!({"name": "Auto Plus", "limit": 1000, "states": ["TX"]});
        let changes = diff_snapshots(&before, &after);
        assert_eq!(changes.len(), 3);

        assert_eq!(changes[0].path, "legacy");
        assert!(matches!(changes[0].change, ChangeKind::Removed { .. }));
        assert_eq!(changes[1].path, "name");
        assert_eq!(
            changes[1].change,
            ChangeKind::Changed {
                before: json!("Auto"),
                after: json!("Auto Plus")
            }
        );
        assert_eq!(changes[2].path, "states");
        assert!(matches!(changes[2].change, ChangeKind::Added { .. }));
    }

    #[test]
    fn nested_objects_use_dotted_paths() {
        let before = json!({"terms": {"deductible": 500, "copay": 20}});
        let after = json!({"terms": {"deductible": 750, "copay": 20}});
        let changes = diff_snapshots(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "terms.deductible");
    }

    #[test]
    fn arrays_compare_whole() {
        let changes = diff_snapshots(&json!({"s": ["TX", "CA"]}), &json!({"s": ["CA", "TX"]}));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "s");
    }

    #[test]
    fn scalar_roots_use_dollar_path() {
        let changes = diff_snapshots(&json!(null), &json!({"a": 1}));
        assert_eq!(changes[0].path, "$");
    }

    #[test]
    fn serializes_kind_inline() {
        let change = FieldChange {
            path: "a".into(),
            change: ChangeKind::Added { after: json!(1) },
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json, json!({"path": "a", "kind": "added", "after": 1}));
    }
}
