use std::{
    path::Path,
    sync::{Arc, RwLock},
    time::Duration,
};

use expirecache::ExpiringCache;
use reqwest::{header, redirect, Certificate, Client, Response, StatusCode};

use crate::{
    auth::{self, AuthChallenge},
    Deadline, Metadata, RegistryFile, RegistryFsError, RegistryFsResult, DEFAULT_BLOB_SIZE_TTL,
    DEFAULT_TOKEN_TTL, DEFAULT_URL_INFO_TTL,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Supplies `(username, password)` for a blob URL.
///
/// Invoked from inside token-cache constructors, so the single-flight
/// property of the cache naturally rate-limits prompting.
pub type CredentialCallback = Arc<dyn Fn(&str) -> (String, String) + Send + Sync>;

/// The cached outcome of probing a blob URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedUrl {
    /// The registry redirects blob fetches, typically to a pre-signed
    /// object-store URL. Fetches go to `location` with no auth header.
    Redirect {
        /// The recorded redirect target.
        location: String,
    },

    /// The registry serves the blob itself from the original URL.
    Direct {
        /// The full `Authorization` header value, empty when none is needed.
        authorization: String,
    },
}

/// A read-only filesystem over an OCI / Docker Registry v2 blob store.
///
/// Owns the shared HTTP client, the three expiring caches (blob sizes,
/// bearer tokens by scope, resolved URLs by blob URL), the injected
/// credentials callback, and the optional accelerator prefix. A filesystem
/// must outlive every [`RegistryFile`] opened from it; the handles borrow it.
pub struct RegistryFileSystem {
    /// The HTTP client shared by every fetch. Redirects are classified by
    /// the resolver, never followed blindly.
    client: Client,

    /// Invoked on token-cache misses to obtain credentials.
    credentials: CredentialCallback,

    /// Default per-operation time budget; `None` is unbounded.
    timeout: Option<Duration>,

    /// Accelerator prefix prepended to effective fetch URLs; empty disables.
    accelerator: RwLock<String>,

    /// Discovered blob sizes by blob URL.
    blob_sizes: ExpiringCache<String, u64>,

    /// Bearer tokens by challenge scope.
    tokens: ExpiringCache<String, String>,

    /// Resolved fetch modes by blob URL.
    url_infos: ExpiringCache<String, ResolvedUrl>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryFileSystem {
    /// Creates a filesystem with no CA override and no timeout.
    pub fn new(credentials: CredentialCallback) -> RegistryFsResult<Self> {
        Self::with_options(credentials, None, None)
    }

    /// Creates a filesystem trusting an extra PEM CA bundle and bounding
    /// every operation by `timeout`.
    pub fn with_options(
        credentials: CredentialCallback,
        ca_file: Option<&Path>,
        timeout: Option<Duration>,
    ) -> RegistryFsResult<Self> {
        let mut builder = Client::builder().redirect(redirect::Policy::none());
        if let Some(ca_file) = ca_file {
            let pem = std::fs::read(ca_file)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            credentials,
            timeout,
            accelerator: RwLock::new(String::new()),
            blob_sizes: ExpiringCache::new(DEFAULT_BLOB_SIZE_TTL),
            tokens: ExpiringCache::new(DEFAULT_TOKEN_TTL),
            url_infos: ExpiringCache::new(DEFAULT_URL_INFO_TTL),
        })
    }

    /// Opens the blob at `url`, validating that it is reachable.
    ///
    /// Open flags from outer facades are ignored: the filesystem is
    /// read-only.
    pub async fn open(&self, url: &str) -> RegistryFsResult<RegistryFile<'_>> {
        let file = RegistryFile::new(url.to_string(), self, self.timeout);
        let size = file.size().await.map_err(|error| {
            tracing::warn!(%url, %error, "failed to open registry blob");
            error
        })?;

        // Seed the size cache so a later `metadata` call skips the probe.
        drop(
            self.blob_sizes
                .acquire(url.to_string(), || async { Some(size) })
                .await,
        );
        Ok(file)
    }

    /// Returns the metadata of the blob at `url`.
    ///
    /// The size is served from the blob-size cache; a miss sizes the blob
    /// with a probe read and stores the result.
    pub async fn metadata(&self, url: &str) -> RegistryFsResult<Metadata> {
        let mut stat_err = None;
        let size = self
            .blob_sizes
            .acquire(url.to_string(), || async {
                let file = RegistryFile::new(url.to_string(), self, self.timeout);
                match file.size().await {
                    Ok(size) => Some(size),
                    Err(error) => {
                        stat_err = Some(error);
                        None
                    }
                }
            })
            .await;

        match size {
            Some(size) => Ok(Metadata::regular_readonly(*size)),
            None => Err(stat_err.unwrap_or_else(|| RegistryFsError::NotFound(url.to_string()))),
        }
    }

    /// Checks whether a blob exists at `url`.
    pub async fn exists(&self, url: &str) -> RegistryFsResult<bool> {
        match self.metadata(url).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Routes subsequent fetches through the accelerator at `addr`.
    ///
    /// The effective fetch URL becomes `{addr}/{resolved_url}`; the
    /// accelerator parses the original URL back out of the path. An empty
    /// address disables acceleration.
    pub fn set_accelerate_address(&self, addr: &str) {
        *self.accelerator.write().unwrap() = addr.to_string();
    }

    /// Returns the configured accelerator address, empty when disabled.
    pub fn get_accelerate_address(&self) -> String {
        self.accelerator.read().unwrap().clone()
    }

    /// Executes one ranged `GET` of `count` bytes at `offset` against `url`.
    ///
    /// The resolved fetch mode is taken from the URL-info cache, resolving
    /// on a miss. Returns the streaming response on 200/206 and releases the
    /// cache entry; any other outcome invalidates it so the next attempt
    /// re-resolves from scratch.
    pub(crate) async fn get_data(
        &self,
        url: &str,
        offset: u64,
        count: u64,
        deadline: Deadline,
    ) -> RegistryFsResult<Response> {
        debug_assert!(count > 0);

        let mut resolve_err = None;
        let info = self
            .url_infos
            .acquire(url.to_string(), || async {
                match self.resolve_url(url, deadline).await {
                    Ok(info) => Some(info),
                    Err(error) => {
                        resolve_err = Some(error);
                        None
                    }
                }
            })
            .await;
        let Some(info) = info else {
            return Err(
                resolve_err.unwrap_or_else(|| RegistryFsError::NotFound(url.to_string()))
            );
        };

        let mut effective = match &*info {
            ResolvedUrl::Redirect { location } => location.clone(),
            ResolvedUrl::Direct { .. } => url.to_string(),
        };
        let accelerator = self.accelerator.read().unwrap().clone();
        if !accelerator.is_empty() {
            effective = format!("{accelerator}/{effective}");
            tracing::debug!(%effective, "routing fetch through accelerator");
        }

        let mut request = self.client.get(&effective).header(
            header::RANGE,
            format!("bytes={}-{}", offset, offset + count - 1),
        );
        if let ResolvedUrl::Direct { authorization } = &*info {
            if !authorization.is_empty() {
                request = request.header(header::AUTHORIZATION, authorization.clone());
            }
        }

        let response = match deadline.apply(request).send().await {
            Ok(response) => response,
            Err(error) => {
                info.invalidate();
                return Err(if error.is_timeout() {
                    RegistryFsError::Timeout(url.to_string())
                } else {
                    RegistryFsError::HttpTransport(error)
                });
            }
        };

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
            return Ok(response);
        }

        tracing::warn!(%url, status = status.as_u16(), "blob fetch answered unexpected status");
        info.invalidate();
        Err(RegistryFsError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }

    /// Probes `url` and classifies how fetches for it must be issued.
    async fn resolve_url(&self, url: &str, deadline: Deadline) -> RegistryFsResult<ResolvedUrl> {
        let challenge = self.probe_challenge(url, deadline).await?;

        // Tokens are shared by challenge scope; the cache runs at most one
        // credentials prompt and token request per scope at a time.
        let mut token = None;
        if let Some(challenge) = &challenge {
            let mut auth_err = None;
            let handle = self
                .tokens
                .acquire(challenge.get_scope().clone(), || async {
                    let (username, password) = (self.credentials)(url);
                    match auth::fetch_token(
                        &self.client,
                        challenge.get_auth_url(),
                        &username,
                        &password,
                        deadline,
                    )
                    .await
                    {
                        Ok(token) => Some(token),
                        Err(error) => {
                            auth_err = Some(error);
                            None
                        }
                    }
                })
                .await;
            match handle {
                Some(handle) => token = Some(handle),
                None => {
                    return Err(auth_err.unwrap_or_else(|| {
                        RegistryFsError::AuthDenied(format!("failed to get token for {url}"))
                    }))
                }
            }
        }

        let mut request = self.client.get(url);
        if let Some(token) = &token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token.as_str()));
        }
        let response = match deadline.apply(request).send().await {
            Ok(response) => response,
            Err(error) => {
                if let Some(token) = token {
                    token.invalidate();
                }
                return Err(if error.is_timeout() {
                    RegistryFsError::Timeout(url.to_string())
                } else {
                    RegistryFsError::HttpTransport(error)
                });
            }
        };

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let Some(location) = location else {
                if let Some(token) = token {
                    token.invalidate();
                }
                return Err(RegistryFsError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            };
            tracing::debug!(%url, %location, "registry redirects blob fetches");
            return Ok(ResolvedUrl::Redirect { location });
        }

        if status == StatusCode::OK {
            let authorization = match &token {
                Some(token) if !token.is_empty() => format!("Bearer {}", token.as_str()),
                _ => String::new(),
            };
            return Ok(ResolvedUrl::Direct { authorization });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(
                %url,
                status = status.as_u16(),
                "token rejected, re-prompting for credentials on the next attempt"
            );
            if let Some(token) = token {
                token.invalidate();
            }
            return Err(RegistryFsError::AuthDenied(format!(
                "registry rejected the bearer token for {url}"
            )));
        }

        if let Some(token) = token {
            token.invalidate();
        }
        Err(RegistryFsError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }

    /// Issues the one-byte probe and extracts the bearer challenge, if any.
    ///
    /// A reachable registry that answers anything but 401 or 403 is treated
    /// as not requiring auth.
    async fn probe_challenge(
        &self,
        url: &str,
        deadline: Deadline,
    ) -> RegistryFsResult<Option<AuthChallenge>> {
        if deadline.is_expired() {
            return Err(RegistryFsError::Timeout(url.to_string()));
        }

        let request = self.client.get(url).header(header::RANGE, "bytes=0-0");
        let response = deadline.apply(request).send().await.map_err(|error| {
            if error.is_timeout() {
                RegistryFsError::Timeout(url.to_string())
            } else {
                RegistryFsError::NotFound(format!("connection failed: {url}"))
            }
        })?;

        let status = response.status();
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            return Ok(None);
        }

        let header_value = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .ok_or_else(|| {
                RegistryFsError::AuthChallengeMalformed(format!("no auth header in response: {url}"))
            })?
            .to_str()
            .map_err(|_| {
                RegistryFsError::AuthChallengeMalformed(format!(
                    "auth header is not valid text: {url}"
                ))
            })?;
        AuthChallenge::parse(header_value).map(Some)
    }

    /// Unsupported: the filesystem is read-only.
    pub async fn create_file(&self, _url: &str) -> RegistryFsResult<()> {
        Err(RegistryFsError::NotImplemented("create_file"))
    }

    /// Unsupported: the filesystem is read-only.
    pub async fn create_directory(&self, _url: &str) -> RegistryFsResult<()> {
        Err(RegistryFsError::NotImplemented("create_directory"))
    }

    /// Unsupported: the filesystem is read-only.
    pub async fn create_symlink(&self, _url: &str, _target: &str) -> RegistryFsResult<()> {
        Err(RegistryFsError::NotImplemented("create_symlink"))
    }

    /// Unsupported: blobs have no directory structure to list.
    pub async fn read_directory(&self, _url: &str) -> RegistryFsResult<Vec<String>> {
        Err(RegistryFsError::NotImplemented("read_directory"))
    }

    /// Unsupported: the registry has no symlinks.
    pub async fn read_symlink(&self, _url: &str) -> RegistryFsResult<String> {
        Err(RegistryFsError::NotImplemented("read_symlink"))
    }

    /// Unsupported: the filesystem is read-only.
    pub async fn write_file(&self, _url: &str, _offset: u64, _data: &[u8]) -> RegistryFsResult<()> {
        Err(RegistryFsError::NotImplemented("write_file"))
    }

    /// Unsupported: the filesystem is read-only.
    pub async fn remove(&self, _url: &str) -> RegistryFsResult<()> {
        Err(RegistryFsError::NotImplemented("remove"))
    }

    /// Unsupported: the filesystem is read-only.
    pub async fn remove_directory(&self, _url: &str) -> RegistryFsResult<()> {
        Err(RegistryFsError::NotImplemented("remove_directory"))
    }

    /// Unsupported: the filesystem is read-only.
    pub async fn rename(&self, _old_url: &str, _new_url: &str) -> RegistryFsResult<()> {
        Err(RegistryFsError::NotImplemented("rename"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
