//! Per-operation log contexts.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of a generated log context.
pub const LOG_CONTEXT_LEN: usize = 10;

/// Returns a fresh random alphanumeric log context.
///
/// One is generated per top-level operation and sent in every request it
/// issues, so client and server logs can be correlated.
pub fn new_log_context() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LOG_CONTEXT_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape() {
        let lc = new_log_context();
        assert_eq!(lc.len(), LOG_CONTEXT_LEN);
        assert!(lc.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(lc, new_log_context());
    }
}
