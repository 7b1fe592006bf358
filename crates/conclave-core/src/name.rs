use crate::error::{ConclaveError, ConclaveResult};

/// Reject names that cannot be used as a single path component.
///
/// Session ids, agent ids and checkpoint names all end up as file or
/// directory names, so they share one rule: 1..=128 characters from
/// `[A-Za-z0-9._-]`, not starting with a dot.
pub fn validate_name(kind: &str, name: &str) -> ConclaveResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConclaveError::InvalidName(format!("invalid {kind} name: {name:?}")))
    }
}
