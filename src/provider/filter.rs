//! Include/exclude repository filter rules.
//!
//! A rule list of `[+-]owner[/repo]` (wildcards allowed via [`glob::Pattern`],
//! the same crate used elsewhere in this codebase for ref-glob matching) evaluated in
//! order. Owner-level and repo-level rules share prefix defaults: a `-X`
//! rule excludes both `X` and `X/*`. Lookups matching no `+` rule are
//! `NotFound`.

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sign {
    Include,
    Exclude,
}

struct Rule {
    sign: Sign,
    owner: glob::Pattern,
    repo: Option<glob::Pattern>,
}

pub struct FilterRules {
    rules: Vec<Rule>,
}

impl FilterRules {
    /// parses a comma or whitespace separated rule list, e.g. `+acme,-acme/secret`.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for token in spec.split([',', ' ', '\n']).map(str::trim).filter(|s| !s.is_empty()) {
            let (sign_char, rest) = token.split_at(1);
            let sign = match sign_char {
                "+" => Sign::Include,
                "-" => Sign::Exclude,
                _ => return Err(Error::InvalidRef(format!("filter rule {token:?} must start with + or -"))),
            };
            let (owner, repo) = match rest.split_once('/') {
                Some((o, r)) => (o, Some(r)),
                None => (rest, None),
            };
            let owner_pat = glob::Pattern::new(owner)
                .map_err(|e| Error::InvalidRef(format!("invalid filter owner pattern: {e}")))?;
            let repo_pat = repo
                .map(glob::Pattern::new)
                .transpose()
                .map_err(|e| Error::InvalidRef(format!("invalid filter repo pattern: {e}")))?;
            rules.push(Rule { sign, owner: owner_pat, repo: repo_pat });
        }
        Ok(Self { rules })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// evaluate whether `owner` may be listed at all (an owner stays alive
    /// for listing if any rule, include or exclude, names it or a repo
    /// under it: a `+X/R` rule implicitly keeps owner `X` alive.
    pub fn owner_visible(&self, owner: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        self.rules.iter().any(|r| r.owner.matches(owner))
    }

    /// evaluate the last matching rule for `owner/repo`; no match means
    /// `NotFound` once any rules are configured.
    pub fn allows(&self, owner: &str, repo: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        let mut verdict = false;
        for rule in &self.rules {
            if !rule.owner.matches(owner) {
                continue;
            }
            let repo_matches = match &rule.repo {
                Some(p) => p.matches(repo),
                None => true,
            };
            if repo_matches {
                verdict = rule.sign == Sign::Include;
            }
        }
        verdict
    }

    pub fn check(&self, owner: &str, repo: &str) -> Result<()> {
        if self.allows(owner, repo) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("{owner}/{repo} excluded by filter")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rules_allows_everything() {
        let f = FilterRules::empty();
        assert!(f.allows("acme", "widgets"));
    }

    #[test]
    fn exclude_rule_blocks_owner_and_children() {
        let f = FilterRules::parse("-acme").unwrap();
        assert!(!f.allows("acme", "widgets"));
        assert!(!f.allows("acme", "anything"));
    }

    #[test]
    fn specific_repo_exclude_does_not_block_siblings() {
        let f = FilterRules::parse("+acme,-acme/secret").unwrap();
        assert!(f.allows("acme", "widgets"));
        assert!(!f.allows("acme", "secret"));
    }

    #[test]
    fn unmatched_owner_is_excluded_once_rules_exist() {
        let f = FilterRules::parse("+acme").unwrap();
        assert!(!f.allows("other", "repo"));
    }

    #[test]
    fn wildcards_are_supported() {
        let f = FilterRules::parse("+acme/*").unwrap();
        assert!(f.allows("acme", "anything"));
    }

    #[test]
    fn later_rules_override_earlier_ones() {
        let f = FilterRules::parse("-acme,+acme/widgets").unwrap();
        assert!(f.allows("acme", "widgets"));
        assert!(!f.allows("acme", "other"));
    }
}
