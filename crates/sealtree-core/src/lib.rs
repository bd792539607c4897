//! sealtree-core: shared config schema, error taxonomy and path mapping
//! for the sealtree encrypt-at-rest pipeline.

pub mod config;
pub mod error;
pub mod types;

pub use error::{SealError, SealResult};
pub use types::{
    is_safe_relative, mirror_path_for, relative_key, source_rel_for, Item, ENVELOPE_SUFFIX,
    TEMP_SUFFIX,
};
