//! Per-user authentication configuration.

use serde::{Deserialize, Serialize};

/// Authentication method negotiated during startup, per spec §4.2/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Trust,
    Cleartext,
    Md5,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Trust
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_auth_is_trust() {
        assert_eq!(AuthMethod::default(), AuthMethod::Trust);
    }
}
