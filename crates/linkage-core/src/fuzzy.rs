//! String distance metrics used by the fuzzy name predicates.
//!
//! Names in the source systems drift by one keystroke or one transliteration
//! far more often than they change wholesale, so the predicates combine a
//! capped Levenshtein distance with Jaro-Winkler similarity.

/// Winkler prefix boost applies only above this Jaro score.
const BOOST_THRESHOLD: f64 = 0.7;
/// Weight of each common prefix character.
const PREFIX_SCALE: f64 = 0.1;
/// Common prefix length considered by the Winkler boost.
const MAX_PREFIX: usize = 4;

/// Levenshtein distance with an early-exit cap.
///
/// Returns the true distance when it is within `max_dist`, otherwise
/// `max_dist + 1`.
///
/// Notes:
/// - Standard two-row dynamic programming with a row-min bound; the
///   predicates only ever ask for `max_dist = 1`, so the scan is cheap.
/// - Comparison is exact per `char`; callers normalize case if they want
///   case-insensitive behavior.
pub fn levenshtein_with_max(a: &str, b: &str, max_dist: usize) -> usize {
    if max_dist == 0 {
        return usize::from(a != b);
    }

    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();
    if n == 0 {
        return a.chars().count().min(max_dist + 1);
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, c) in a.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];

        for j in 1..=n {
            let cost = usize::from(c != b_chars[j - 1]);
            let deletion = prev[j] + 1;
            let insertion = curr[j - 1] + 1;
            let substitution = prev[j - 1] + cost;
            let d = deletion.min(insertion).min(substitution);
            curr[j] = d;
            row_min = row_min.min(d);
        }

        if row_min > max_dist {
            return max_dist + 1;
        }

        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n].min(max_dist + 1)
}

/// Jaro similarity in `[0, 1]`. Either string empty scores 0.
pub fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;

    for i in 0..a.len() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && a[i] == b[j] {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    // Transpositions: positional mismatches between the two matched
    // subsequences, counted in halves.
    let mut transpositions = 0usize;
    let mut k = 0usize;
    for i in 0..a.len() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[k] {
            k += 1;
        }
        if a[i] != b[k] {
            transpositions += 1;
        }
        k += 1;
    }

    let m = matches as f64;
    let t = transpositions as f64 / 2.0;
    (m / a.len() as f64 + m / b.len() as f64 + (m - t) / m) / 3.0
}

/// Jaro-Winkler similarity: Jaro with a boost for a shared prefix.
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let score = jaro(a, b);
    if score <= BOOST_THRESHOLD {
        return score;
    }
    let prefix = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .take(MAX_PREFIX)
        .count();
    score + prefix as f64 * PREFIX_SCALE * (1.0 - score)
}
