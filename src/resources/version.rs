//! Version ordering used to pick the "latest" binary or configuration.
//!
//! Versions are split on `.` and `-`. Segments that are both numeric compare
//! numerically, anything else compares lexicographically. When one version is
//! a prefix of the other, the shorter one is older.
//!
//! ```
//! use std::cmp::Ordering;
//! use yunovisor::version::compare;
//!
//! assert_eq!(compare("1.10", "1.9"), Ordering::Greater);
//! assert_eq!(compare("2.0-rc1", "2.0"), Ordering::Greater);
//! assert_eq!(compare("1.0", "1.0"), Ordering::Equal);
//! ```

use std::cmp::Ordering;

pub fn compare(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-']);
    let mut right = b.split(['.', '-']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Returns the greatest item by `version_of`; on ties the first found wins.
pub fn latest<'a, T, F>(items: &'a [T], version_of: F) -> Option<&'a T>
where
    F: Fn(&T) -> &str,
{
    let mut best: Option<&T> = None;
    for item in items {
        match best {
            Some(cur) if compare(version_of(item), version_of(cur)) != Ordering::Greater => {}
            _ => best = Some(item),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_segments_compare_numerically() {
        assert_eq!(compare("1.1", "1.0"), Ordering::Greater);
        assert_eq!(compare("1.9", "1.10"), Ordering::Less);
        assert_eq!(compare("10.0.0", "9.99.99"), Ordering::Greater);
    }

    #[test]
    fn dash_is_a_separator() {
        assert_eq!(compare("1.0-2", "1.0-10"), Ordering::Less);
        assert_eq!(compare("1-2", "1.2"), Ordering::Equal);
    }

    #[test]
    fn mixed_segments_fall_back_to_lexicographic() {
        assert_eq!(compare("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(compare("1.beta", "1.alpha"), Ordering::Greater);
    }

    #[test]
    fn latest_picks_greatest_and_keeps_first_on_tie() {
        let items = vec![("a", "1.0"), ("b", "1.1"), ("c", "1-1"), ("d", "0.9")];
        let best = latest(&items, |i| i.1).unwrap();
        assert_eq!(best.0, "b");
    }

    #[test]
    fn latest_of_empty_is_none() {
        let items: Vec<(&str, &str)> = Vec::new();
        assert!(latest(&items, |i| i.1).is_none());
    }
}
