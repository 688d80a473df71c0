//! ChangeDetector: compare two maps of named values.
//!
//! An empty value counts as absent. Output order is `old`'s key order,
//! followed by keys that exist only in `new`.

use std::collections::BTreeMap;

use crate::changes::{Change, ChangeKind};

/// Diff two secret maps.
///
/// ```
/// use std::collections::BTreeMap;
/// use ksync_core::diff;
///
/// let old = BTreeMap::from([("PORT".to_string(), "3000".to_string())]);
/// let new = BTreeMap::from([
///     ("PORT".to_string(), "4000".to_string()),
///     ("HOST".to_string(), "localhost".to_string()),
/// ]);
/// let changes = diff(&old, &new);
/// assert_eq!(changes.len(), 2);
/// assert_eq!(changes[0].name, "PORT");
/// assert_eq!(changes[1].name, "HOST");
/// ```
pub fn diff(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Vec<Change> {
    diff_by(ChangeKind::Secret, old, new, |v: &String| v.clone())
}

/// Diff two file maps. Content is compared byte for byte and rendered
/// lossily as text in the resulting changes.
pub fn diff_files(old: &BTreeMap<String, Vec<u8>>, new: &BTreeMap<String, Vec<u8>>) -> Vec<Change> {
    diff_by(ChangeKind::File, old, new, |v: &Vec<u8>| {
        String::from_utf8_lossy(v).into_owned()
    })
}

fn diff_by<V, F>(
    kind: ChangeKind,
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
    render: F,
) -> Vec<Change>
where
    V: AsRef<[u8]> + PartialEq,
    F: Fn(&V) -> String,
{
    let mut changes = Vec::new();

    for (name, old_value) in old {
        let old_value = present(Some(old_value));
        let new_value = present(new.get(name));
        match (old_value, new_value) {
            (None, None) => {}
            (Some(a), Some(b)) if a == b => {}
            (a, b) => changes.push(Change::new(
                kind,
                name.as_str(),
                a.map(&render).unwrap_or_default(),
                b.map(&render).unwrap_or_default(),
            )),
        }
    }

    for (name, new_value) in new {
        if old.contains_key(name) {
            continue;
        }
        if let Some(value) = present(Some(new_value)) {
            changes.push(Change::new(kind, name.as_str(), "", render(value)));
        }
    }

    changes
}

fn present<V: AsRef<[u8]>>(value: Option<&V>) -> Option<&V> {
    value.filter(|v| !v.as_ref().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn modified_and_added() {
        let old = map(&[("PORT", "3000")]);
        let new = map(&[("PORT", "4000"), ("HOST", "localhost")]);

        let changes = diff(&old, &new);

        assert_eq!(
            changes,
            vec![
                Change::new(ChangeKind::Secret, "PORT", "3000", "4000"),
                Change::new(ChangeKind::Secret, "HOST", "", "localhost"),
            ]
        );
    }

    #[test]
    fn removed() {
        let old = map(&[("A", "1"), ("B", "2")]);
        let new = map(&[("A", "1")]);

        assert_eq!(
            diff(&old, &new),
            vec![Change::new(ChangeKind::Secret, "B", "2", "")]
        );
    }

    #[test]
    fn empty_value_counts_as_absent() {
        let old = map(&[("A", ""), ("B", "2")]);
        let new = map(&[("A", "1"), ("B", "")]);

        assert_eq!(
            diff(&old, &new),
            vec![
                Change::new(ChangeKind::Secret, "A", "", "1"),
                Change::new(ChangeKind::Secret, "B", "2", ""),
            ]
        );
    }

    #[test]
    fn empty_on_both_sides_is_no_change() {
        let old = map(&[("A", "")]);
        let new = map(&[("B", "")]);
        assert!(diff(&old, &new).is_empty());
    }

    #[test]
    fn diff_with_itself_is_empty() {
        let x = map(&[("A", "1"), ("B", "2"), ("C", "")]);
        assert!(diff(&x, &x).is_empty());
        assert!(diff(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn old_keys_come_before_new_only_keys() {
        let old = map(&[("Z", "1")]);
        let new = map(&[("A", "1"), ("Z", "2")]);

        let names: Vec<_> = diff(&old, &new).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Z", "A"]);
    }

    #[test]
    fn files_compare_bytes() {
        let mut old = BTreeMap::new();
        old.insert("config.yml".to_string(), b"a: 1\n".to_vec());
        old.insert("same.txt".to_string(), b"same".to_vec());
        let mut new = old.clone();
        new.insert("config.yml".to_string(), b"a: 2\n".to_vec());

        let changes = diff_files(&old, &new);

        assert_eq!(
            changes,
            vec![Change::new(ChangeKind::File, "config.yml", "a: 1\n", "a: 2\n")]
        );
    }

    #[test]
    fn binary_files_render_lossily() {
        let old = BTreeMap::new();
        let mut new = BTreeMap::new();
        new.insert("key.bin".to_string(), vec![0xff, 0xfe, b'a']);

        let changes = diff_files(&old, &new);

        assert_eq!(changes.len(), 1);
        assert!(changes[0].to.ends_with('a'));
        assert_eq!(changes[0].kind, ChangeKind::File);
    }
}
