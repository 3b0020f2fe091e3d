pub(crate) mod defer;
pub(crate) mod hex;
pub(crate) mod pending;

/// Read a usize override from the environment, falling back to `default`
/// when the variable is unset or unparsable.
pub(crate) fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
