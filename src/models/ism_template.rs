//! # ISM Templates
//!
//! Templates let a policy claim newly created indices by name pattern. The matching
//! rule is deterministic: highest priority wins, then the most specific matching
//! pattern, then the lexicographically smallest policy id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::index::IndexMetadata;
use crate::utils::glob;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsmTemplate {
    pub index_patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub last_updated_time: DateTime<Utc>,
}

impl IsmTemplate {
    /// Specificity of the best matching pattern, or `None` when nothing matches
    pub fn match_specificity(&self, index_name: &str) -> Option<usize> {
        self.index_patterns
            .iter()
            .filter(|pattern| glob::simple_match(pattern, index_name))
            .map(|pattern| glob::specificity(pattern))
            .max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate<'a> {
    priority: i32,
    specificity: usize,
    policy_id: &'a str,
}

impl Candidate<'_> {
    fn beats(&self, other: &Candidate<'_>) -> bool {
        match self.priority.cmp(&other.priority) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.specificity.cmp(&other.specificity) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => self.policy_id < other.policy_id,
            },
        }
    }
}

/// Finds the policy whose templates claim `index`.
///
/// Hidden indices never match, and a template only claims indices created after its
/// last update so that editing a template does not retroactively adopt old indices.
pub fn find_matching_policy(
    templates: &HashMap<String, Vec<IsmTemplate>>,
    index: &IndexMetadata,
) -> Option<String> {
    if templates.is_empty() || index.is_hidden() {
        return None;
    }

    let mut best: Option<Candidate<'_>> = None;
    for (policy_id, policy_templates) in templates {
        for template in policy_templates {
            if template.last_updated_time >= index.creation_date {
                continue;
            }
            let Some(specificity) = template.match_specificity(&index.name) else {
                continue;
            };
            let candidate = Candidate {
                priority: template.priority,
                specificity,
                policy_id,
            };
            if best.map_or(true, |current| candidate.beats(&current)) {
                best = Some(candidate);
            }
        }
    }

    best.map(|c| c.policy_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn template(patterns: &[&str], priority: i32) -> IsmTemplate {
        IsmTemplate {
            index_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            priority,
            last_updated_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn index(name: &str) -> IndexMetadata {
        IndexMetadata::new(name, format!("{name}-uuid"), Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_highest_priority_wins() {
        let templates = HashMap::from([
            ("low".to_string(), vec![template(&["log-*"], 1)]),
            ("high".to_string(), vec![template(&["log-*"], 10)]),
        ]);
        assert_eq!(find_matching_policy(&templates, &index("log-1")), Some("high".to_string()));
    }

    #[test]
    fn test_tie_broken_by_specificity_then_policy_id() {
        let templates = HashMap::from([
            ("generic".to_string(), vec![template(&["log-*"], 5)]),
            ("specific".to_string(), vec![template(&["log-app-*"], 5)]),
        ]);
        assert_eq!(
            find_matching_policy(&templates, &index("log-app-1")),
            Some("specific".to_string())
        );

        let templates = HashMap::from([
            ("b-policy".to_string(), vec![template(&["log-*"], 5)]),
            ("a-policy".to_string(), vec![template(&["log-*"], 5)]),
        ]);
        assert_eq!(
            find_matching_policy(&templates, &index("log-1")),
            Some("a-policy".to_string())
        );
    }

    #[test]
    fn test_hidden_and_old_indices_do_not_match() {
        let templates = HashMap::from([("p".to_string(), vec![template(&["*"], 0)])]);
        assert_eq!(find_matching_policy(&templates, &index(".system")), None);

        let mut old = index("log-1");
        old.creation_date = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(find_matching_policy(&templates, &old), None);
    }
}
