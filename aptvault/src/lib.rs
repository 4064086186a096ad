//! The aptvault library.
//!
//! A Debian package archive on top of a content-addressed blob store.
//! Every state of a distribution is an immutable release linked to its
//! predecessor, so the complete history of an archive is kept until it
//! is explicitly trimmed.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod archive;
pub mod artifacts;
pub mod blob;
pub mod dist;
pub mod error;
pub mod gc;
pub mod index;
pub mod merge;
pub mod prune;
pub mod publish;
pub mod release;
#[cfg(target_family = "unix")]
pub mod testing;
pub mod trim;
pub mod util;
pub mod version;

pub use error::{VaultError, VaultResult};
