/// Decides whether a bearer token belongs to a caller with the admin role.
pub trait AuthProvider: Send + Sync {
    fn is_admin(&self, token: &str) -> bool;
}

/// Token list straight from the config file. An empty list disables the
/// check entirely, which is only meant for local setups.
pub struct StaticTokenAuth {
    tokens: Vec<String>,
}

impl StaticTokenAuth {
    pub fn new(tokens: Vec<String>) -> Self {
        if tokens.is_empty() {
            warn!("no admin tokens configured, stream tests are open to everyone");
        }
        StaticTokenAuth { tokens }
    }
}

impl AuthProvider for StaticTokenAuth {
    fn is_admin(&self, token: &str) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        self.tokens.iter().any(|t| t == token)
    }
}
