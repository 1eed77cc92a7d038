// =============================================================================
// Secret Provider — opaque lookup for API keys, bot tokens, etc.
// =============================================================================
//
// Secret values are never logged and never stored in `RuntimeConfig`. The
// reference implementation resolves names against environment variables,
// mirroring the `AURORA_ADMIN_TOKEN` env-var pattern; a vault-backed
// implementation can be substituted behind the same trait.
// =============================================================================

use tracing::warn;

pub trait SecretProvider: Send + Sync {
    /// Resolve `name` to its secret value, or `None` if unset.
    fn get_secret(&self, name: &str) -> Option<String>;
}

pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn get_secret(&self, name: &str) -> Option<String> {
        match std::env::var(name) {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => {
                warn!(name, "secret env var is set but empty");
                None
            }
            Err(_) => None,
        }
    }
}
