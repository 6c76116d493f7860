//! Connection target configuration.

use std::fmt;

/// Identifies one database target: which driver to use, where to connect,
/// and as whom.
///
/// A `ConnectSpec` is the identity of a pool: the registry keeps exactly one
/// pool per distinct spec, so the type is hashable and comparisons include
/// every field. `Debug` output redacts the password.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectSpec {
    /// Driver identity (e.g. `"postgres"`, `"oracle"`).
    pub driver: String,

    /// Connection target string understood by the driver.
    pub url: String,

    /// Login name.
    pub username: String,

    /// Login password.
    pub password: String,
}

impl ConnectSpec {
    /// Create a spec from its four parts.
    pub fn new(
        driver: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ConnectSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectSpec")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
