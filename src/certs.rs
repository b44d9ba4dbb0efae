//! Self-signed certificate provisioning for site host-names
//!
//! Every site gets a key/certificate/bundle triple under the proxy's
//! `certs/` directory, named after the host-name so the proxy picks them
//! up without extra configuration. Provisioning the same host-name again
//! overwrites the previous material.

use crate::error::SiteError;
use chrono::{Datelike, Days, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::path::{Path, PathBuf};
use tracing::info;

/// Days the self-signed certificate stays valid
pub const VALIDITY_DAYS: u64 = 365;

/// Paths of one provisioned bundle
#[derive(Debug, Clone)]
pub struct CertificatePaths {
    pub key: PathBuf,
    pub cert: PathBuf,
    /// Certificate followed by key, for proxies that want a single file
    pub bundle: PathBuf,
}

/// Writes self-signed certificates into a managed directory.
pub struct CertProvisioner {
    certs_dir: PathBuf,
}

impl CertProvisioner {
    pub fn new(certs_dir: impl Into<PathBuf>) -> Self {
        Self {
            certs_dir: certs_dir.into(),
        }
    }

    /// Generate and persist a key/cert/bundle triple for `host`.
    ///
    /// The certificate carries SANs for the exact host-name and its
    /// wildcard, uses an ECDSA P-256 key, and is valid for
    /// [`VALIDITY_DAYS`] from today. Existing files are overwritten.
    pub fn provision(&self, host: &str) -> Result<CertificatePaths, SiteError> {
        let fail = |reason: String| SiteError::ProvisioningFailed {
            host: host.to_string(),
            reason,
        };

        let mut params =
            CertificateParams::new(vec![host.to_string(), format!("*.{}", host)])
                .map_err(|e| fail(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        let today = Utc::now().date_naive();
        let expiry = today
            .checked_add_days(Days::new(VALIDITY_DAYS))
            .ok_or_else(|| fail("validity window overflow".to_string()))?;
        params.not_before =
            rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
        params.not_after =
            rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);

        let key_pair = KeyPair::generate().map_err(|e| fail(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| fail(e.to_string()))?;

        let cert_pem = cert.pem();
        let key_pem = key_pair.serialize_pem();

        std::fs::create_dir_all(&self.certs_dir).map_err(|e| fail(e.to_string()))?;
        let paths = self.paths_for(host);
        std::fs::write(&paths.key, &key_pem).map_err(|e| fail(e.to_string()))?;
        std::fs::write(&paths.cert, &cert_pem).map_err(|e| fail(e.to_string()))?;
        std::fs::write(&paths.bundle, format!("{}{}", cert_pem, key_pem))
            .map_err(|e| fail(e.to_string()))?;

        info!(host, cert = %paths.cert.display(), "Provisioned self-signed certificate");
        Ok(paths)
    }

    /// Where the bundle for `host` lives, whether or not it exists yet
    pub fn paths_for(&self, host: &str) -> CertificatePaths {
        CertificatePaths {
            key: self.certs_dir.join(format!("{}.key", host)),
            cert: self.certs_dir.join(format!("{}.crt", host)),
            bundle: self.certs_dir.join(format!("{}.pem", host)),
        }
    }

    pub fn certs_dir(&self) -> &Path {
        &self.certs_dir
    }
}
