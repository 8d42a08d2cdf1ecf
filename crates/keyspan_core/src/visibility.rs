//! Cell visibility labels.
//!
//! A label is a `|`-separated list of alternatives, each a `&`-joined list of
//! terms, e.g. `admin|ops&eu`. Parentheses are not supported. An empty label
//! is visible to everyone.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Set of authorization terms attached to a scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Authorizations {
    terms: BTreeSet<String>,
}

impl Authorizations {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(Into::into)
                .filter(|term: &String| !term.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }

    /// Evaluates `label` against these authorizations.
    ///
    /// Malformed labels are never visible.
    pub fn can_see(&self, label: &[u8]) -> bool {
        match parse_label(label) {
            Ok(alternatives) => {
                alternatives.is_empty()
                    || alternatives
                        .iter()
                        .any(|terms| terms.iter().all(|term| self.terms.contains(*term)))
            }
            Err(_) => false,
        }
    }
}

/// Checks that `label` is a well-formed visibility expression.
pub fn validate_label(label: &[u8]) -> Result<()> {
    parse_label(label).map(|_| ())
}

fn parse_label(label: &[u8]) -> Result<Vec<Vec<&str>>> {
    if label.is_empty() {
        return Ok(Vec::new());
    }
    let text = std::str::from_utf8(label)
        .map_err(|_| Error::InvalidVisibility(String::from_utf8_lossy(label).into_owned()))?;
    let mut alternatives = Vec::new();
    for alternative in text.split('|') {
        let mut terms = Vec::new();
        for term in alternative.split('&') {
            let term = term.trim();
            if term.is_empty() || term.contains(['(', ')']) {
                return Err(Error::InvalidVisibility(text.to_string()));
            }
            terms.push(term);
        }
        alternatives.push(terms);
    }
    Ok(alternatives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_label_is_public() {
        assert!(Authorizations::default().can_see(b""));
        assert!(Authorizations::new(["a"]).can_see(b""));
    }

    #[test]
    fn conjunction_requires_every_term() {
        let auths = Authorizations::new(["ops", "eu"]);
        assert!(auths.can_see(b"ops&eu"));
        assert!(!auths.can_see(b"ops&us"));
        assert!(!Authorizations::default().can_see(b"ops"));
    }

    #[test]
    fn alternatives_need_one_match() {
        let auths = Authorizations::new(["admin"]);
        assert!(auths.can_see(b"ops&eu|admin"));
        assert!(!auths.can_see(b"ops|eu"));
    }

    #[test]
    fn malformed_labels_are_hidden() {
        let auths = Authorizations::new(["a", "b"]);
        assert!(!auths.can_see(b"a&&b"));
        assert!(!auths.can_see(b"(a|b)"));
        assert!(validate_label(b"a|").is_err());
        assert!(validate_label(b"a & b").is_ok());
    }
}
