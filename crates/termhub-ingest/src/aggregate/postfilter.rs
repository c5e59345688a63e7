//! Named term filters applied to output rows

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Postfilter {
    /// Drop terms shorter than two characters
    ShortTerms,
    /// Drop terms without any alphabetic character
    NumericTerms,
}

impl Postfilter {
    pub const ALL: [Postfilter; 2] = [Postfilter::ShortTerms, Postfilter::NumericTerms];

    pub fn name(self) -> &'static str {
        match self {
            Postfilter::ShortTerms => "short_terms",
            Postfilter::NumericTerms => "numeric_terms",
        }
    }

    /// Whether `term` survives the filter
    pub fn keeps(self, term: &str) -> bool {
        match self {
            Postfilter::ShortTerms => term.chars().count() >= 2,
            Postfilter::NumericTerms => term.chars().any(char::is_alphabetic),
        }
    }
}

impl FromStr for Postfilter {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Postfilter::ALL
            .into_iter()
            .find(|f| f.name() == s.trim())
            .ok_or_else(|| IngestError::UnknownPostfilter(s.to_string()))
    }
}

impl fmt::Display for Postfilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_short_terms() {
        assert!(!Postfilter::ShortTerms.keeps("A"));
        assert!(!Postfilter::ShortTerms.keeps("β"));
        assert!(Postfilter::ShortTerms.keeps("p5"));
    }

    #[test]
    fn test_numeric_terms() {
        assert!(!Postfilter::NumericTerms.keeps("1,2-3"));
        assert!(Postfilter::NumericTerms.keeps("5-HT"));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("numeric_terms".parse::<Postfilter>().unwrap(), Postfilter::NumericTerms);
        assert!(matches!(
            "stopwords".parse::<Postfilter>(),
            Err(IngestError::UnknownPostfilter(_))
        ));
    }
}
