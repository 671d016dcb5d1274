//! The cookie store: bundle fetch, validation, materialization, rotation.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vget_storage::Storage;

use crate::bundle::CookieBundle;
use crate::crypt::EncryptionKey;
use crate::error::{CookieError, CookieResult};
use crate::jar;

/// Cookie store configuration.
#[derive(Debug, Clone)]
pub struct CookieConfig {
    /// Storage key of the bundle document
    pub bundle_key: String,
    /// Directory for materialized jar files
    pub scratch_dir: PathBuf,
    /// Lookup budget per minute per process
    pub lookups_per_minute: u32,
    /// On budget exhaustion: error immediately instead of waiting
    pub fail_fast: bool,
    /// Consecutive auth failures before the backup is promoted
    pub auth_failure_threshold: u32,
    /// Rolling window the failures must fall inside
    pub failure_window: Duration,
    /// How long a fetched bundle is served from cache
    pub refresh_interval: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            bundle_key: "cookies/bundle.json".to_string(),
            scratch_dir: std::env::temp_dir(),
            lookups_per_minute: 10,
            fail_fast: false,
            auth_failure_threshold: 3,
            failure_window: Duration::from_secs(600),
            refresh_interval: Duration::from_secs(300),
        }
    }
}

impl CookieConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bundle_key: std::env::var("CREDENTIAL_BUNDLE_KEY")
                .unwrap_or(defaults.bundle_key),
            scratch_dir: std::env::var("CREDENTIAL_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            lookups_per_minute: std::env::var("CREDENTIAL_LOOKUPS_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lookups_per_minute),
            fail_fast: std::env::var("CREDENTIAL_FAIL_FAST")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.fail_fast),
            auth_failure_threshold: std::env::var("CREDENTIAL_AUTH_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auth_failure_threshold),
            failure_window: defaults.failure_window,
            refresh_interval: Duration::from_secs(
                std::env::var("CREDENTIAL_REFRESH_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.refresh_interval.as_secs()),
            ),
        }
    }
}

/// Which jar currently serves as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveRole {
    Primary,
    Backup,
}

struct State {
    cached: Option<(CookieBundle, tokio::time::Instant)>,
    role: ActiveRole,
    /// Timestamps of recent auth failures against the active jar
    failures: Vec<DateTime<Utc>>,
}

/// Status of one jar in the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStatus {
    pub fingerprint: String,
}

/// Snapshot of the store for health/ops surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieStatus {
    pub active: BlobStatus,
    pub backup: Option<BlobStatus>,
    pub rotation_due_at: DateTime<Utc>,
    /// Whether the backup has been rotated in
    pub promoted: bool,
}

struct Materialized {
    path: PathBuf,
    fingerprint: String,
    expires_at: DateTime<Utc>,
}

impl Drop for Materialized {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to unlink cookie file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// A scoped capability to a decrypted cookie file.
///
/// Clones share the file; it is unlinked when the last clone drops.
#[derive(Clone)]
pub struct CookieHandle {
    inner: Arc<Materialized>,
}

impl CookieHandle {
    /// Path of the materialized jar, for the extractor's `--cookies` flag.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Fingerprint of the jar this handle materialized.
    pub fn fingerprint(&self) -> &str {
        &self.inner.fingerprint
    }

    /// Bundle expiry.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.inner.expires_at
    }
}

impl std::fmt::Debug for CookieHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieHandle")
            .field("fingerprint", &self.inner.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Fetches, caches, validates and materializes cookie bundles.
pub struct CookieStore {
    storage: Arc<dyn Storage>,
    key: EncryptionKey,
    config: CookieConfig,
    limiter: DefaultDirectRateLimiter,
    state: Mutex<State>,
}

impl CookieStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        key: EncryptionKey,
        config: CookieConfig,
    ) -> CookieResult<Self> {
        let per_minute = NonZeroU32::new(config.lookups_per_minute)
            .ok_or_else(|| CookieError::config_error("lookups_per_minute must be > 0"))?;
        Ok(Self {
            storage,
            key,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            config,
            state: Mutex::new(State {
                cached: None,
                role: ActiveRole::Primary,
                failures: Vec::new(),
            }),
        })
    }

    /// Materialize the active jar and return a handle owning its lifetime.
    ///
    /// The plaintext exists only in the returned file, which sits at a
    /// per-call randomized path with owner-only permissions and is unlinked
    /// when the last handle clone drops.
    pub async fn get_active(&self) -> CookieResult<CookieHandle> {
        self.acquire_budget().await?;

        let mut state = self.state.lock().await;
        let bundle = self.load_bundle(&mut state).await?;

        // Decrypt and validate the jar for the current role; a validation
        // failure on the primary rotates the backup in.
        let (text, fp) = match self.open_role(&bundle, state.role) {
            Ok(ok) => ok,
            Err(e) if state.role == ActiveRole::Primary && bundle.backup.is_some() => {
                warn!("active cookie jar invalid ({}), rotating backup in", e);
                state.role = ActiveRole::Backup;
                state.failures.clear();
                self.open_role(&bundle, ActiveRole::Backup)?
            }
            Err(e) => return Err(e),
        };

        let records = jar::parse_jar(&text, Utc::now())?;
        let filtered = jar::render_jar(&records);
        let path = self.write_scratch_file(&filtered).await?;

        debug!("materialized cookie jar {} ({})", path.display(), &fp[..12]);
        Ok(CookieHandle {
            inner: Arc::new(Materialized {
                path,
                fingerprint: fp,
                expires_at: bundle.expires_at,
            }),
        })
    }

    /// Record an auth failure for the given jar.
    ///
    /// Returns `true` when this report tipped the threshold and the backup
    /// was promoted, so the caller can retry within the same attempt.
    pub async fn mark_bad(&self, fingerprint: &str, reason: &str) -> CookieResult<bool> {
        let mut state = self.state.lock().await;
        let bundle = self.load_bundle(&mut state).await?;

        let active_fp = match state.role {
            ActiveRole::Primary => bundle.active.fingerprint.as_str(),
            ActiveRole::Backup => bundle
                .backup
                .as_ref()
                .ok_or(CookieError::NoBundle)?
                .fingerprint
                .as_str(),
        };
        if fingerprint != active_fp {
            debug!("ignoring failure report for non-active jar {}", fingerprint);
            return Ok(false);
        }

        let now = Utc::now();
        let window =
            chrono::Duration::from_std(self.config.failure_window).unwrap_or_default();
        state.failures.retain(|t| now - *t < window);
        state.failures.push(now);

        info!(
            "auth failure recorded for active jar ({}): {} in window, reason: {}",
            &fingerprint[..12.min(fingerprint.len())],
            state.failures.len(),
            reason
        );

        if state.failures.len() >= self.config.auth_failure_threshold as usize {
            if state.role == ActiveRole::Primary && bundle.backup.is_some() {
                warn!("auth failure threshold reached, promoting backup jar");
                state.role = ActiveRole::Backup;
                state.failures.clear();
                return Ok(true);
            }
            warn!("auth failure threshold reached with no backup left to promote");
        }

        Ok(false)
    }

    /// Current bundle status for health/ops surfaces.
    pub async fn status(&self) -> CookieResult<CookieStatus> {
        let mut state = self.state.lock().await;
        let bundle = self.load_bundle(&mut state).await?;

        let (active, backup) = match state.role {
            ActiveRole::Primary => (
                BlobStatus {
                    fingerprint: bundle.active.fingerprint.clone(),
                },
                bundle.backup.as_ref().map(|b| BlobStatus {
                    fingerprint: b.fingerprint.clone(),
                }),
            ),
            ActiveRole::Backup => (
                BlobStatus {
                    fingerprint: bundle
                        .backup
                        .as_ref()
                        .ok_or(CookieError::NoBundle)?
                        .fingerprint
                        .clone(),
                },
                None,
            ),
        };

        Ok(CookieStatus {
            active,
            backup,
            rotation_due_at: bundle.expires_at,
            promoted: state.role == ActiveRole::Backup,
        })
    }

    /// Whether a usable bundle is reachable right now.
    pub async fn probe(&self) -> bool {
        let mut state = self.state.lock().await;
        match self.load_bundle(&mut state).await {
            Ok(bundle) => self.open_role(&bundle, state.role).is_ok(),
            Err(_) => false,
        }
    }

    async fn acquire_budget(&self) -> CookieResult<()> {
        if self.config.fail_fast {
            self.limiter.check().map_err(|_| CookieError::RateLimited)?;
        } else {
            self.limiter.until_ready().await;
        }
        Ok(())
    }

    async fn load_bundle(&self, state: &mut State) -> CookieResult<CookieBundle> {
        if let Some((bundle, fetched_at)) = &state.cached {
            if fetched_at.elapsed() < self.config.refresh_interval {
                return Ok(bundle.clone());
            }
        }

        let raw = self
            .storage
            .get_bytes(&self.config.bundle_key)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    CookieError::NoBundle
                } else {
                    CookieError::Storage(e)
                }
            })?;
        let bundle: CookieBundle = serde_json::from_slice(&raw)?;

        state.cached = Some((bundle.clone(), tokio::time::Instant::now()));
        Ok(bundle)
    }

    fn open_role(
        &self,
        bundle: &CookieBundle,
        role: ActiveRole,
    ) -> CookieResult<(String, String)> {
        let blob = match role {
            ActiveRole::Primary => &bundle.active,
            ActiveRole::Backup => bundle.backup.as_ref().ok_or(CookieError::NoBundle)?,
        };

        let plaintext = self.key.open(&blob.blob)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| CookieError::invalid_bundle("jar is not UTF-8"))?;
        jar::parse_jar(&text, Utc::now())?;
        Ok((text, blob.fingerprint.clone()))
    }

    async fn write_scratch_file(&self, contents: &str) -> CookieResult<PathBuf> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;

        let name = format!("cookies-{:016x}.txt", rand::rng().random::<u64>());
        let path = self.config.scratch_dir.join(name);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use vget_storage::LocalStorage;

    const FUTURE: i64 = 4102444800;

    fn jar_text(name: &str) -> String {
        format!(".host.example\tTRUE\t/\tTRUE\t{}\t{}\tv\n", FUTURE, name)
    }

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_base64(&base64::engine::general_purpose::STANDARD.encode([5u8; 32]))
            .unwrap()
    }

    async fn store_with_bundle(
        active: &str,
        backup: Option<&str>,
        config: CookieConfig,
    ) -> (tempfile::TempDir, CookieStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(dir.path().join("store"), None).await.unwrap());

        let key = test_key();
        let bundle = CookieBundle::seal(
            &key,
            active,
            backup,
            Utc::now() + chrono::Duration::days(7),
        )
        .unwrap();
        storage
            .put_bytes(
                &config.bundle_key,
                serde_json::to_vec(&bundle).unwrap(),
                "application/json",
            )
            .await
            .unwrap();

        let config = CookieConfig {
            scratch_dir: dir.path().join("scratch"),
            ..config
        };
        let store = CookieStore::new(storage, key, config).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn handle_materializes_and_unlinks() {
        let (_dir, store) =
            store_with_bundle(&jar_text("primary"), None, CookieConfig::default()).await;

        let handle = store.get_active().await.unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("primary"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        drop(handle);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn clones_share_the_file_until_last_drop() {
        let (_dir, store) =
            store_with_bundle(&jar_text("primary"), None, CookieConfig::default()).await;

        let a = store.get_active().await.unwrap();
        let b = a.clone();
        let path = a.path().to_path_buf();

        drop(a);
        assert!(path.exists());
        drop(b);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn threshold_promotes_backup() {
        let config = CookieConfig {
            auth_failure_threshold: 3,
            ..Default::default()
        };
        let (_dir, store) =
            store_with_bundle(&jar_text("primary"), Some(&jar_text("fallback")), config).await;

        let handle = store.get_active().await.unwrap();
        let active_fp = handle.fingerprint().to_string();

        assert!(!store.mark_bad(&active_fp, "auth").await.unwrap());
        assert!(!store.mark_bad(&active_fp, "auth").await.unwrap());
        assert!(store.mark_bad(&active_fp, "auth").await.unwrap());

        let promoted = store.get_active().await.unwrap();
        assert_ne!(promoted.fingerprint(), active_fp);

        let status = store.status().await.unwrap();
        assert!(status.promoted);
        assert_eq!(status.active.fingerprint, promoted.fingerprint());
        assert!(status.backup.is_none());
    }

    #[tokio::test]
    async fn stale_fingerprint_reports_are_ignored() {
        let config = CookieConfig {
            auth_failure_threshold: 1,
            ..Default::default()
        };
        let (_dir, store) =
            store_with_bundle(&jar_text("primary"), Some(&jar_text("fallback")), config).await;

        assert!(!store.mark_bad("deadbeef", "auth").await.unwrap());
        let status = store.status().await.unwrap();
        assert!(!status.promoted);
    }

    #[tokio::test]
    async fn invalid_active_jar_rotates_backup_in() {
        // Active jar whose only record is already expired; backup is fresh.
        let expired = ".host.example\tTRUE\t/\tTRUE\t100\told\tgone\n";
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(dir.path().join("store"), None).await.unwrap());
        let key = test_key();

        // Seal cannot produce an invalid active jar, so assemble by hand.
        let bundle = CookieBundle {
            active: crate::bundle::CookieBlob {
                blob: key.seal(expired.as_bytes()).unwrap(),
                fingerprint: crate::crypt::fingerprint(expired.as_bytes()),
            },
            backup: Some(crate::bundle::CookieBlob {
                blob: key.seal(jar_text("fallback").as_bytes()).unwrap(),
                fingerprint: crate::crypt::fingerprint(jar_text("fallback").as_bytes()),
            }),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(7),
            domains: vec!["host.example".to_string()],
        };
        let config = CookieConfig {
            scratch_dir: dir.path().join("scratch"),
            ..Default::default()
        };
        storage
            .put_bytes(
                &config.bundle_key,
                serde_json::to_vec(&bundle).unwrap(),
                "application/json",
            )
            .await
            .unwrap();

        let store = CookieStore::new(storage, key, config).unwrap();
        let handle = store.get_active().await.unwrap();
        assert_eq!(
            handle.fingerprint(),
            crate::crypt::fingerprint(jar_text("fallback").as_bytes())
        );
    }

    #[tokio::test]
    async fn fail_fast_rate_limit() {
        let config = CookieConfig {
            lookups_per_minute: 1,
            fail_fast: true,
            ..Default::default()
        };
        let (_dir, store) = store_with_bundle(&jar_text("primary"), None, config).await;

        let _first = store.get_active().await.unwrap();
        assert!(matches!(
            store.get_active().await,
            Err(CookieError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn missing_bundle_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(dir.path(), None).await.unwrap());
        let store =
            CookieStore::new(storage, test_key(), CookieConfig::default()).unwrap();

        assert!(matches!(
            store.get_active().await,
            Err(CookieError::NoBundle)
        ));
        assert!(!store.probe().await);
    }
}
