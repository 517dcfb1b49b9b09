use std::collections::HashMap;
use std::path::PathBuf;

/// Relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Redis connection string for the bus and the history log. When unset
    /// the relay runs with the in-process bus (single-node only).
    pub redis_url: Option<String>,
    /// Secret used to sign session tokens.
    pub session_secret: String,
    /// username → password pairs admitted at login.
    pub users: HashMap<String, String>,
    /// Number of history entries replayed on join.
    pub history_limit: usize,
    /// Directory of static assets for the channel pages. When unset the
    /// relay serves only the API and the gateway.
    pub public_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5002),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            session_secret: required_var("SESSION_SECRET"),
            users: parse_users(&required_var("RELAY_USERS")),
            history_limit: std::env::var("HISTORY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            public_dir: std::env::var("PUBLIC_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

/// Parse `user:password,user2:password2` into the login table.
fn parse_users(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (user, password) = pair.trim().split_once(':')?;
            if user.is_empty() {
                return None;
            }
            Some((user.to_string(), password.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_table() {
        let users = parse_users("alice:secret,bob:hunter2");
        assert_eq!(users.len(), 2);
        assert_eq!(users["alice"], "secret");
        assert_eq!(users["bob"], "hunter2");
    }

    #[test]
    fn skips_malformed_pairs() {
        let users = parse_users("alice:secret,broken,:nouser, bob:pw ");
        assert_eq!(users.len(), 2);
        assert!(users.contains_key("alice"));
        assert!(users.contains_key("bob"));
    }

    #[test]
    fn password_may_contain_colons() {
        let users = parse_users("alice:se:cr:et");
        assert_eq!(users["alice"], "se:cr:et");
    }
}
