//! Topic name and topic filter rules.

use crate::utils::MAX_FIELD_LEN;

/// A topic name is what a PUBLISH carries: non-empty, no wildcards, no NUL,
/// and short enough for its two-byte length prefix.
pub fn valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= MAX_FIELD_LEN && !topic.contains(['+', '#', '\0'])
}

/// A filter may use `+` for a whole level and `#` as the final level only.
pub fn valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > MAX_FIELD_LEN || filter.contains('\0') {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        other => !other.contains(['+', '#']),
    })
}

/// Whether `topic` is matched by `filter`.
///
/// Wildcards at the first level never match topics starting with `$`.
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
