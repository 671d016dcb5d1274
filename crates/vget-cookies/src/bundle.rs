//! The encrypted cookie bundle document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypt::{fingerprint, EncryptionKey};
use crate::error::CookieResult;
use crate::jar;

/// One encrypted jar plus its content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieBlob {
    /// Base64 `nonce || ciphertext`
    pub blob: String,
    /// Hex SHA-256 of the plaintext jar
    pub fingerprint: String,
}

/// The `{active, backup}` bundle as stored in the object store.
///
/// Bundles are created by an external administrative flow; this crate only
/// reads them. The worker uses the active jar; the backup rotates in when
/// the active one keeps failing authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieBundle {
    pub active: CookieBlob,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<CookieBlob>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Domains the jars cover
    #[serde(default)]
    pub domains: Vec<String>,
}

impl CookieBundle {
    /// Encrypt plaintext jars into a bundle document.
    ///
    /// This is the provisioning-side primitive (and what tests use to seed
    /// a bundle); the serving path never writes bundles.
    pub fn seal(
        key: &EncryptionKey,
        active_jar: &str,
        backup_jar: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> CookieResult<Self> {
        let records = jar::parse_jar(active_jar, Utc::now())?;

        let active = CookieBlob {
            blob: key.seal(active_jar.as_bytes())?,
            fingerprint: fingerprint(active_jar.as_bytes()),
        };
        let backup = match backup_jar {
            Some(text) => {
                jar::parse_jar(text, Utc::now())?;
                Some(CookieBlob {
                    blob: key.seal(text.as_bytes())?,
                    fingerprint: fingerprint(text.as_bytes()),
                })
            }
            None => None,
        };

        Ok(Self {
            active,
            backup,
            issued_at: Utc::now(),
            expires_at,
            domains: jar::domains(&records),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn key() -> EncryptionKey {
        EncryptionKey::from_base64(&base64::engine::general_purpose::STANDARD.encode([3u8; 32]))
            .unwrap()
    }

    fn jar_text(name: &str) -> String {
        format!(".host.example\tTRUE\t/\tTRUE\t4102444800\t{}\tv\n", name)
    }

    #[test]
    fn seal_produces_distinct_fingerprints() {
        let k = key();
        let bundle = CookieBundle::seal(
            &k,
            &jar_text("primary"),
            Some(&jar_text("fallback")),
            Utc::now() + chrono::Duration::days(30),
        )
        .unwrap();

        let backup = bundle.backup.as_ref().unwrap();
        assert_ne!(bundle.active.fingerprint, backup.fingerprint);
        assert_eq!(bundle.domains, vec!["host.example".to_string()]);
    }

    #[test]
    fn sealed_blobs_decrypt_back() {
        let k = key();
        let text = jar_text("primary");
        let bundle = CookieBundle::seal(&k, &text, None, Utc::now()).unwrap();
        assert_eq!(k.open(&bundle.active.blob).unwrap(), text.as_bytes());
    }

    #[test]
    fn invalid_jar_is_rejected_at_seal() {
        let k = key();
        assert!(CookieBundle::seal(&k, "garbage", None, Utc::now()).is_err());
    }
}
