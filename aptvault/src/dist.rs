//! Distributions.
//!
//! ## Distribution Naming
//!
//! Distribution names are code names like `bookworm` or `stable-backports`.
//! They can be up to 64 characters long and can only consist of ASCII
//! alphanumeric characters (A-Za-z0-9), dashes ('-'), underscores ('_'),
//! dots ('.') and plus signs ('+'). They must start with an alphanumeric
//! character. In particular, a name never contains a slash, so it always
//! maps to exactly one directory under `dists/` and `pool/`.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{de, Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// The maximum allowable length of a distribution name.
pub const MAX_NAME_LENGTH: usize = 64;

lazy_static! {
    static ref DIST_NAME_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]{0,63}$").unwrap();
}

/// The name of a distribution.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct DistName(#[serde(deserialize_with = "DistName::deserialize")] String);

impl DistName {
    /// Creates a distribution name from a String.
    pub fn new(name: String) -> VaultResult<Self> {
        validate_dist_name(&name)?;
        Ok(Self(name))
    }

    /// Returns the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deserializes a potentially-invalid distribution name.
    fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer).and_then(|s| {
            validate_dist_name(&s).map_err(|e| Error::custom(e.to_string()))?;
            Ok(s)
        })
    }
}

impl FromStr for DistName {
    type Err = VaultError;

    fn from_str(name: &str) -> VaultResult<Self> {
        Self::new(name.to_owned())
    }
}

impl fmt::Display for DistName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DistName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_dist_name(name: &str) -> VaultResult<()> {
    if DIST_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(VaultError::InvalidDistName {
            name: name.to_owned(),
        })
    }
}
