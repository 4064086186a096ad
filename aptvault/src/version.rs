//! Debian package versions.
//!
//! A version has the form `[epoch:]upstream[-revision]`. The epoch ends at
//! the first colon and the revision starts after the last hyphen, so both
//! `2.01-1-1` (upstream `2.01-1`) and `1:1:1.0` (upstream `1:1.0`) are
//! accepted.
//!
//! Versions are ordered the way dpkg orders them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// A parsed Debian version.
#[derive(Clone, Debug, Default)]
pub struct DebianVersion {
    /// The epoch.
    pub epoch: u32,

    /// The upstream version.
    pub upstream: String,

    /// The packaging revision. Empty if absent.
    pub revision: String,
}

impl DebianVersion {
    /// Parses a version string.
    pub fn parse(s: &str) -> VaultResult<Self> {
        let invalid = |reason| VaultError::InvalidVersion {
            version: s.to_owned(),
            reason,
        };

        let (epoch, rest) = match s.split_once(':') {
            Some((epoch, rest)) => {
                if epoch.is_empty() || !epoch.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid("Epoch is not a non-negative integer"));
                }
                let epoch = epoch
                    .parse::<u32>()
                    .map_err(|_| invalid("Epoch is out of range"))?;
                (epoch, rest)
            }
            None => (0, s),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, revision),
            None => (rest, ""),
        };

        if upstream.is_empty() {
            return Err(invalid("Upstream version is empty"));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_owned(),
            revision: revision.to_owned(),
        })
    }

    /// Compares two versions.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_component(&self.upstream, &other.upstream))
            .then_with(|| compare_component(&self.revision, &other.revision))
    }

    /// Returns whether both versions share epoch and upstream version.
    ///
    /// Unlike equality, this is a textual comparison.
    pub fn same_upstream(&self, other: &Self) -> bool {
        self.epoch == other.epoch && self.upstream == other.upstream
    }

    /// Returns whether both versions are textually identical.
    pub fn is_identical(&self, other: &Self) -> bool {
        self.same_upstream(other) && self.revision == other.revision
    }
}

/// Returns the sort weight of a non-digit character.
///
/// A `None` marks the end of a run.
fn char_order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(b'~') => -1,
        Some(c) => c as i32 + 256,
    }
}

fn compare_component(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    let is_digit = |s: &[u8], k: usize| s.get(k).map_or(false, |c| c.is_ascii_digit());

    while i < a.len() || j < b.len() {
        // Non-digit prefix
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = char_order(a.get(i).copied());
            let bc = char_order(b.get(j).copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }

        // Digit run, compared numerically
        let mut first_diff = Ordering::Equal;
        while is_digit(a, i) && is_digit(b, j) {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }

        if is_digit(a, i) {
            return Ordering::Greater;
        }
        if is_digit(b, j) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

impl PartialEq for DebianVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for DebianVersion {}

impl PartialOrd for DebianVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DebianVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for DebianVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }

        f.write_str(&self.upstream)?;

        if !self.revision.is_empty() {
            write!(f, "-{}", self.revision)?;
        }

        Ok(())
    }
}

impl FromStr for DebianVersion {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for DebianVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;

        String::deserialize(deserializer)
            .and_then(|s| Self::parse(&s).map_err(|e| Error::custom(e.to_string())))
    }
}

impl Serialize for DebianVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
