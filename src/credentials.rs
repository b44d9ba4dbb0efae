//! Random credential generation for site databases and caches

use crate::site::Credentials;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Length of every generated secret.
///
/// Alphanumeric only: safe to pass through compose interpolation, container
/// environment variables and `.env` sourcing without escaping.
pub const CREDENTIAL_LEN: usize = 24;

/// Generate one secret from the operating system's CSPRNG.
pub fn generate() -> String {
    generate_with(&mut OsRng)
}

/// Generate one secret from an injected randomness source.
pub fn generate_with<R: Rng>(rng: &mut R) -> String {
    (0..CREDENTIAL_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// Generate the full credential set for a new site.
///
/// Each secret is drawn independently; credentials are never shared between
/// sites or reused across fields.
pub fn generate_set(cache_enabled: bool) -> Credentials {
    Credentials {
        db_password: generate(),
        db_root_password: generate(),
        cache_password: cache_enabled.then(generate),
    }
}
