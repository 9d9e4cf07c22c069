// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Constant-time token validation for the WS upgrade.
//!
//! Grounded on `coopmux::transport::auth`. The HTTP/auth surface proper
//! (token issuance, CORS, rate limiting) is out of scope (spec §1) — this
//! only guards the query-string token on `/ws/session` the way the teacher
//! guards `/ws/{session_id}`.

use crate::error::DispatchError;

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a token against the configured expectation. `None` expected
/// token disables auth entirely (standalone/dev mode).
pub fn validate_token(token: Option<&str>, expected: Option<&str>) -> Result<(), DispatchError> {
    let Some(expected) = expected else { return Ok(()) };
    match token {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => Err(DispatchError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_expected_token_always_passes() {
        assert!(validate_token(None, None).is_ok());
        assert!(validate_token(Some("anything"), None).is_ok());
    }

    #[test]
    fn mismatched_token_is_rejected() {
        assert_eq!(validate_token(Some("wrong"), Some("right")), Err(DispatchError::Unauthorized));
        assert_eq!(validate_token(None, Some("right")), Err(DispatchError::Unauthorized));
    }

    #[test]
    fn matching_token_passes() {
        assert!(validate_token(Some("right"), Some("right")).is_ok());
    }
}
