// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering test cases based on user-specified prefixes.
//!
//! The main structure in this module is [`TestFilter`], which is created by a
//! [`TestFilterBuilder`].

use crate::errors::TestFilterBuilderError;
use aho_corasick::{AhoCorasick, Anchored, Input, StartKind};
use std::fmt;

/// A builder for `TestFilter` instances.
#[derive(Clone, Debug, Default)]
pub struct TestFilterBuilder {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl TestFilterBuilder {
    /// Creates a new `TestFilterBuilder` from include and exclude prefixes.
    ///
    /// An empty include list matches every test case that isn't excluded.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Builds the filter.
    pub fn build(&self) -> Result<TestFilter, TestFilterBuilderError> {
        let include = if self.include.is_empty() {
            None
        } else {
            Some(prefix_matcher(&self.include)?)
        };
        let exclude = if self.exclude.is_empty() {
            None
        } else {
            Some(prefix_matcher(&self.exclude)?)
        };

        Ok(TestFilter { include, exclude })
    }
}

fn prefix_matcher(prefixes: &[String]) -> Result<Box<AhoCorasick>, TestFilterBuilderError> {
    // Anchored searches only match at the start of the haystack, which turns the automaton into
    // a prefix matcher.
    let matcher = AhoCorasick::builder()
        .start_kind(StartKind::Anchored)
        .build(prefixes)?;
    Ok(Box::new(matcher))
}

/// Filters test cases by name.
#[derive(Clone, Debug)]
pub struct TestFilter {
    include: Option<Box<AhoCorasick>>,
    exclude: Option<Box<AhoCorasick>>,
}

impl TestFilter {
    /// Returns a filter that matches every test case.
    pub fn all() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }

    /// Returns whether the named test case should run.
    ///
    /// Exclusion is checked first: a name that starts with any excluded prefix never runs, even
    /// if it also starts with an included prefix.
    pub fn filter_match(&self, name: &str) -> FilterMatch {
        if let Some(exclude) = &self.exclude {
            if is_prefix_match(exclude, name) {
                return FilterMatch::Mismatch {
                    reason: MismatchReason::Excluded,
                };
            }
        }

        if let Some(include) = &self.include {
            if !is_prefix_match(include, name) {
                return FilterMatch::Mismatch {
                    reason: MismatchReason::NotIncluded,
                };
            }
        }

        FilterMatch::Matches
    }
}

fn is_prefix_match(matcher: &AhoCorasick, name: &str) -> bool {
    matcher.is_match(Input::new(name).anchored(Anchored::Yes))
}

/// Whether a test case matched a [`TestFilter`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterMatch {
    /// The test case should run.
    Matches,

    /// The test case should not run.
    Mismatch {
        /// The reason the test case was filtered out.
        reason: MismatchReason,
    },
}

impl FilterMatch {
    /// Returns true if the test case should run.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matches)
    }
}

/// The reason a test case was filtered out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MismatchReason {
    /// The name starts with an excluded prefix.
    Excluded,

    /// Include prefixes were given, and the name starts with none of them.
    NotIncluded,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excluded => write!(f, "excluded"),
            Self::NotIncluded => write!(f, "not included"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{collection::vec, prelude::*};
    use test_case::test_case;
    use test_strategy::proptest;

    fn filter(include: &[&str], exclude: &[&str]) -> TestFilter {
        TestFilterBuilder::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
        .build()
        .unwrap()
    }

    #[test_case(&[], &[], "GAP/CONN/BV-01-C", FilterMatch::Matches ; "no filters")]
    #[test_case(&["GAP"], &[], "GAP/CONN/BV-01-C", FilterMatch::Matches ; "included")]
    #[test_case(
        &["GAP"], &[], "L2CAP/COS/CED/BV-01-C",
        FilterMatch::Mismatch { reason: MismatchReason::NotIncluded } ;
        "not included"
    )]
    #[test_case(
        &["A"], &["A/x"], "A/x/1",
        FilterMatch::Mismatch { reason: MismatchReason::Excluded } ;
        "exclude wins over include"
    )]
    #[test_case(&["A"], &["A/x"], "A/y/1", FilterMatch::Matches ; "sibling of excluded")]
    #[test_case(
        &[], &["GAP/CONN"], "GAP/CONN/BV-01-C",
        FilterMatch::Mismatch { reason: MismatchReason::Excluded } ;
        "exclude only"
    )]
    #[test_case(
        &["CONN"], &[], "GAP/CONN/BV-01-C",
        FilterMatch::Mismatch { reason: MismatchReason::NotIncluded } ;
        "substrings are not prefixes"
    )]
    fn prefix_filters(include: &[&str], exclude: &[&str], name: &str, expected: FilterMatch) {
        assert_eq!(filter(include, exclude).filter_match(name), expected);
    }

    #[proptest(cases = 64)]
    fn proptest_no_filters(#[strategy(vec(any::<String>(), 0..16))] names: Vec<String>) {
        let filter = TestFilter::all();
        for name in names {
            prop_assert!(filter.filter_match(&name).is_match());
        }
    }

    // Every name matches itself as an include prefix, and never runs once excluded.
    #[proptest(cases = 64)]
    fn proptest_self_prefix(#[strategy(vec(any::<String>(), 1..16))] names: Vec<String>) {
        let include = TestFilterBuilder::new(names.clone(), Vec::new())
            .build()
            .unwrap();
        let exclude = TestFilterBuilder::new(names.clone(), names.clone())
            .build()
            .unwrap();
        for name in names {
            prop_assert!(include.filter_match(&name).is_match());
            prop_assert_eq!(
                exclude.filter_match(&name),
                FilterMatch::Mismatch {
                    reason: MismatchReason::Excluded
                }
            );
        }
    }
}
