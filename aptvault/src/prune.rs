//! Retention rules.
//!
//! ## Rule Syntax
//!
//! A rule has the form `<pattern>_<versions>-<revisions>`, where
//! `<pattern>` is a regex matched against package names, `<versions>` is
//! how many older upstream versions to keep in addition to the newest one,
//! and `<revisions>` is how many older revisions of each upstream version
//! to keep. Either limit can be `*` to keep everything.
//!
//! Multiple rules are separated by commas. The first rule whose pattern
//! matches a package applies, and packages matching no rule are never
//! pruned:
//!
//! ```text
//! linux-.*_1-0,.*_*-2
//! ```

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{de, Deserialize};

use crate::error::{VaultError, VaultResult};
use crate::index::IndexEntry;

lazy_static! {
    static ref RULE_REGEX: Regex = Regex::new(r"^(.*)_(\d+|\*)-(\d+|\*)$").unwrap();
}

/// A retention rule.
#[derive(Debug, Clone)]
pub struct PruneRule {
    pattern: Regex,

    /// Older upstream versions to keep. `None` is unlimited.
    retain_versions: Option<u32>,

    /// Older revisions per upstream version to keep. `None` is unlimited.
    retain_revisions: Option<u32>,
}

/// An ordered list of retention rules.
#[derive(Debug, Clone, Default)]
pub struct PruneRuleSet {
    rules: Vec<PruneRule>,
}

/// A stateful pruning decision over entries in index order.
pub struct Pruner<'a> {
    rules: &'a PruneRuleSet,
    current: Option<PackageState<'a>>,
}

struct PackageState<'a> {
    name: String,
    architecture: String,
    epoch: u32,
    upstream: String,
    revision: String,
    version_count: u32,
    revision_count: u32,
    rule: Option<&'a PruneRule>,
}

impl PruneRule {
    /// Parses a single rule.
    pub fn parse(rule: &str) -> VaultResult<Self> {
        let invalid = |reason: String| VaultError::InvalidPruneRule {
            rule: rule.to_owned(),
            reason,
        };

        let captures = RULE_REGEX
            .captures(rule)
            .ok_or_else(|| invalid("Expected <pattern>_<versions>-<revisions>".to_string()))?;

        let pattern = Regex::new(&captures[1]).map_err(|e| invalid(e.to_string()))?;
        let limit = |s: &str| -> VaultResult<Option<u32>> {
            if s == "*" {
                Ok(None)
            } else {
                s.parse()
                    .map(Some)
                    .map_err(|_| invalid(format!("Limit {} is out of range", s)))
            }
        };

        Ok(Self {
            pattern,
            retain_versions: limit(&captures[2])?,
            retain_revisions: limit(&captures[3])?,
        })
    }

    /// Returns whether the rule applies to a package.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }
}

impl PruneRuleSet {
    /// Parses a comma-separated list of rules.
    ///
    /// An empty string yields an empty set which never prunes.
    pub fn parse(rules: &str) -> VaultResult<Self> {
        let rules = rules
            .split(',')
            .map(str::trim)
            .filter(|rule| !rule.is_empty())
            .map(PruneRule::parse)
            .collect::<VaultResult<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Returns the first rule matching a package.
    pub fn find(&self, name: &str) -> Option<&PruneRule> {
        self.rules.iter().find(|rule| rule.matches(name))
    }

    /// Creates a pruner for one pass over an index.
    pub fn pruner(&self) -> Pruner<'_> {
        Pruner {
            rules: self,
            current: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromStr for PruneRuleSet {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for PruneRuleSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;

        String::deserialize(deserializer)
            .and_then(|s| Self::parse(&s).map_err(|e| Error::custom(e.to_string())))
    }
}

impl<'a> Pruner<'a> {
    /// Decides whether an entry should be dropped.
    ///
    /// Entries must be presented in index order, newest first within each
    /// package. The first entry of each package is always kept, and an
    /// entry repeating the previous version exactly is never pruned.
    pub fn should_prune(&mut self, entry: &IndexEntry) -> bool {
        let item = &entry.source;
        let version = &item.version;

        let same_package = matches!(
            &self.current,
            Some(state) if state.name == item.name && state.architecture == item.architecture
        );

        if !same_package {
            self.current = Some(PackageState {
                name: item.name.clone(),
                architecture: item.architecture.clone(),
                epoch: version.epoch,
                upstream: version.upstream.clone(),
                revision: version.revision.clone(),
                version_count: 1,
                revision_count: 1,
                rule: self.rules.find(&item.name),
            });
            return false;
        }

        let state = match self.current.as_mut() {
            Some(state) => state,
            None => return false,
        };

        if version.upstream != state.upstream || version.epoch != state.epoch {
            state.version_count += 1;
            state.epoch = version.epoch;
            state.upstream = version.upstream.clone();
            state.revision = version.revision.clone();
            state.revision_count = 1;
        } else if version.revision != state.revision {
            state.revision_count += 1;
            state.revision = version.revision.clone();
        } else {
            return false;
        }

        let rule = match state.rule {
            Some(rule) => rule,
            None => return false,
        };

        let over = |limit: Option<u32>, count: u32| match limit {
            Some(limit) => u64::from(count) > u64::from(limit) + 1,
            None => false,
        };

        over(rule.retain_versions, state.version_count)
            || over(rule.retain_revisions, state.revision_count)
    }
}
