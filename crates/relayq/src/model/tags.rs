/// How a set of query values is matched against `Job.tags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagQueryMode {
    /// `job.tags` equals the query set exactly (order-insensitive).
    Exact,
    /// `job.tags` is a superset of the query set.
    All,
    /// `job.tags` intersects the query set.
    Any,
    /// `job.tags` is disjoint from the query set.
    None,
}

/// Evaluate a tag query purely in memory — used by `MemoryBackend` and by
/// `relayq-postgres` as the oracle its SQL translation is tested against.
pub fn matches_tag_query(job_tags: &[String], query: &[String], mode: TagQueryMode) -> bool {
    use std::collections::HashSet;
    let job_set: HashSet<&str> = job_tags.iter().map(String::as_str).collect();
    let query_set: HashSet<&str> = query.iter().map(String::as_str).collect();

    match mode {
        TagQueryMode::Exact => job_set == query_set,
        TagQueryMode::All => query_set.is_subset(&job_set),
        TagQueryMode::Any => !job_set.is_disjoint(&query_set),
        TagQueryMode::None => job_set.is_disjoint(&query_set),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_requires_identical_sets() {
        assert!(matches_tag_query(&tags(&["a", "b"]), &tags(&["b", "a"]), TagQueryMode::Exact));
        assert!(!matches_tag_query(&tags(&["a", "b", "c"]), &tags(&["a", "b"]), TagQueryMode::Exact));
    }

    #[test]
    fn all_requires_superset() {
        assert!(matches_tag_query(&tags(&["a", "b", "c"]), &tags(&["a", "b"]), TagQueryMode::All));
        assert!(!matches_tag_query(&tags(&["a"]), &tags(&["a", "b"]), TagQueryMode::All));
    }

    #[test]
    fn any_requires_intersection() {
        assert!(matches_tag_query(&tags(&["a"]), &tags(&["a", "z"]), TagQueryMode::Any));
        assert!(!matches_tag_query(&tags(&["a"]), &tags(&["z"]), TagQueryMode::Any));
    }

    #[test]
    fn none_requires_disjoint() {
        assert!(matches_tag_query(&tags(&["a"]), &tags(&["z"]), TagQueryMode::None));
        assert!(!matches_tag_query(&tags(&["a"]), &tags(&["a", "z"]), TagQueryMode::None));
    }
}
