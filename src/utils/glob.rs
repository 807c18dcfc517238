//! Simple `*` wildcard matching used by ISM template index patterns.

/// Match `value` against a pattern where `*` matches any run of characters
/// (including none). No other character is special.
pub fn simple_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();

    let (mut pi, mut vi) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while vi < v.len() {
        if pi < p.len() && p[pi] != '*' && p[pi] == v[vi] {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            pi += 1;
            resume = vi;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            vi = resume;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Number of literal (non-wildcard) characters; higher means more specific
pub fn specificity(pattern: &str) -> usize {
    pattern.chars().filter(|c| *c != '*').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_match() {
        assert!(simple_match("log-*", "log-2024.01.01"));
        assert!(simple_match("*", "anything"));
        assert!(simple_match("*-hot", "metrics-hot"));
        assert!(simple_match("a*b*c", "axxbyyc"));
        assert!(simple_match("exact", "exact"));
        assert!(!simple_match("exact", "exactly"));
        assert!(!simple_match("log-*", "logs-1"));
        assert!(!simple_match("a*b", "acd"));
    }

    #[test]
    fn test_specificity_counts_literals() {
        assert_eq!(specificity("*"), 0);
        assert_eq!(specificity("log-*"), 4);
        assert_eq!(specificity("log-app-*"), 8);
    }
}
