//! Closest-name suggestions for unresolved tool calls.

/// Suggestions returned for a miss.
pub const MAX_SUGGESTIONS: usize = 3;

/// Available names listed alongside the suggestions.
pub const SAMPLE_SIZE: usize = 8;

/// Rank `candidates` by closeness to `query`.
///
/// Prefix matches (either direction) come first, then substring matches, then
/// names within a small edit distance. Ties are broken by edit distance and
/// then alphabetically. Names that match none of the three are dropped.
pub fn rank_suggestions<'a, I>(query: &str, candidates: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let q = query.to_lowercase();
    let max_distance = (q.chars().count() / 3).max(2);

    let mut scored: Vec<(u8, usize, &str)> = candidates
        .into_iter()
        .filter_map(|name| {
            let n = name.to_lowercase();
            let distance = strsim::levenshtein(&q, &n);
            let tier = if n.starts_with(&q) || q.starts_with(&n) {
                0
            } else if n.contains(&q) || q.contains(&n) {
                1
            } else if distance <= max_distance {
                2
            } else {
                return None;
            };
            Some((tier, distance, name))
        })
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(b.2)));
    scored.dedup_by(|a, b| a.2 == b.2);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, _, name)| name.to_string())
        .collect()
}

/// A short alphabetical sample of available names.
pub fn sample_names<'a, I>(names: I, n: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut all: Vec<&str> = names.into_iter().collect();
    all.sort_unstable();
    all.dedup();
    all.into_iter().take(n).map(String::from).collect()
}
