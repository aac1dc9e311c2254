use thiserror::Error;

/// Errors surfaced by the preprocessing, customization and query APIs.
///
/// An operation that returns an error leaves the object it was called on unchanged.
/// An unreachable target is not an error; it is reported as `None` / [`crate::INFINITY`].
#[derive(Debug, Error)]
pub enum Error {
    /// Size mismatches, node or arc ids out of range, orders that are not permutations.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Calls made in the wrong order, e.g. reading a query result before running it,
    /// or mixing objects built from different hierarchies.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Failures while reading or writing persisted hierarchies (and input files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn invalid_input(msg: impl Into<String>) -> Error {
    Error::InvalidInput(msg.into())
}

pub(crate) fn invalid_state(msg: impl Into<String>) -> Error {
    Error::InvalidState(msg.into())
}

/// Check that `tail` and `head` describe the same number of arcs and only mention nodes below `node_count`.
pub(crate) fn check_arcs(node_count: usize, tail: &[u32], head: &[u32]) -> Result<()> {
    if tail.len() != head.len() {
        return Err(invalid_input(format!(
            "tail and head differ in length ({} vs {})",
            tail.len(),
            head.len()
        )));
    }
    if let Some((arc, (&t, &h))) = tail
        .iter()
        .zip(head)
        .enumerate()
        .find(|&(_, (&t, &h))| t as usize >= node_count || h as usize >= node_count)
    {
        return Err(invalid_input(format!(
            "arc {arc} ({t} -> {h}) references a node outside 0..{node_count}"
        )));
    }
    Ok(())
}
