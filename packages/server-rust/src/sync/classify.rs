//! Maps an import failure onto an [`EntityLoadError`].

use std::collections::VecDeque;

use entityvc_core::{EntityId, EntityLoadError};

use crate::traits::{CredentialsValidationError, MissingReferenceError};

/// Maximum number of cause links inspected, counted from the root cause.
pub const MAX_CAUSE_DEPTH: usize = 16;

/// Classify `error` raised while importing `source`.
///
/// Only the innermost [`MAX_CAUSE_DEPTH`] links are kept, and they are walked
/// innermost first, so the root cause decides when several links are
/// recognizable. Outer context on very long chains is ignored.
#[must_use]
pub fn classify(error: &anyhow::Error, source: Option<EntityId>) -> EntityLoadError {
    let mut causes = VecDeque::with_capacity(MAX_CAUSE_DEPTH);
    for cause in error.chain() {
        if causes.len() == MAX_CAUSE_DEPTH {
            causes.pop_front();
        }
        causes.push_back(cause);
    }
    for cause in causes.iter().rev() {
        if cause.downcast_ref::<CredentialsValidationError>().is_some() {
            if let Some(source) = source {
                return EntityLoadError::CredentialsInvalid { source };
            }
        }
        if let Some(missing) = cause.downcast_ref::<MissingReferenceError>() {
            if let Some(source) = source {
                return EntityLoadError::MissingReference {
                    source,
                    target: missing.missing,
                };
            }
        }
    }
    EntityLoadError::RuntimeError {
        source,
        message: error.to_string(),
    }
}
