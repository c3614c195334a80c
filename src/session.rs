//! Session Manager - authenticated, paced access to the course platform
//!
//! A [`Session`] is produced once by [`Session::sign_in`] and is immutable
//! afterwards, so it can be shared behind an `Arc` by every download worker.
//! Every request it issues is preceded by the configured pause and carries the
//! browser user agent plus the anti-forgery token (as cookie and header).
//! Sessions are never refreshed: once the TTL elapses every authenticated call
//! fails with [`CoursyncError::SessionExpired`] without touching the network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, ORIGIN, REFERER};
use reqwest::{Response, Url};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CoursyncError;
use crate::sync::{VideoDownload, VideoFetcher};

/// Length of the anti-forgery token
pub const CSRF_TOKEN_LEN: usize = 24;

const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "X-CSRFToken";

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub full_name: String,
    #[serde(rename = "id", alias = "Id")]
    pub id: u64,
}

/// Everything a session needs to know about the remote platform
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Canonical platform address, e.g. `https://www.coursera.org`
    pub base_url: String,
    pub user_agent: String,
    pub ttl: Duration,
    /// Pause before every request
    pub pause: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: config.platform.base_url.clone(),
            user_agent: config.platform.user_agent.clone(),
            ttl: config.session_ttl()?,
            pause: config.request_pause()?,
        })
    }

    fn origin(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn signin_page_url(&self) -> String {
        format!("{}/account/signin", self.origin())
    }

    pub fn login_url(&self) -> String {
        format!("{}/maestro/api/user/login", self.origin())
    }

    pub fn topic_list_url(&self, user_id: u64) -> String {
        format!("{}/maestro/api/topic/list_my?user_id={}", self.origin(), user_id)
    }
}

/// An authenticated session with the platform
pub struct Session {
    client: reqwest::Client,
    jar: Arc<Jar>,
    settings: SessionSettings,
    csrf_token: String,
    user: User,
    signed_in_at: DateTime<Utc>,
    expired: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.settings.base_url)
            .field("user", &self.user)
            .field("signed_in_at", &self.signed_in_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Sign into the platform. Must succeed before anything else can run.
    ///
    /// The sign-in page is fetched first purely to seed the cookies the
    /// platform expects; the session clock starts when that fetch completes.
    /// Any failure here is reported as [`CoursyncError::Auth`].
    pub async fn sign_in(
        settings: SessionSettings,
        email: &str,
        password: &str,
    ) -> Result<Self, CoursyncError> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| CoursyncError::Auth(format!("failed to build HTTP client: {}", e)))?;

        let signin_page = settings.signin_page_url();
        pace(settings.pause).await;
        debug!("Fetching sign-in page: {}", signin_page);
        client
            .get(&signin_page)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| CoursyncError::Auth(format!("failed to fetch sign-in page: {}", e)))?
            .bytes()
            .await
            .map_err(|e| CoursyncError::Auth(format!("failed to read sign-in page: {}", e)))?;
        let signed_in_at = Utc::now();

        let csrf_token = generate_csrf_token();
        let login_url = parse_url(&settings.login_url())
            .map_err(|e| CoursyncError::Auth(e.to_string()))?;
        attach_csrf_cookie(&jar, &csrf_token, &login_url);

        pace(settings.pause).await;
        debug!("Submitting credentials to {}", login_url);
        let response = client
            .post(login_url)
            .form(&[("email_address", email), ("password", password)])
            .header(ORIGIN, settings.origin())
            .header(REFERER, &signin_page)
            .header(CSRF_HEADER, &csrf_token)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .map_err(|e| CoursyncError::Auth(format!("failed to submit credentials: {}", e)))?
            .error_for_status()
            .map_err(|e| CoursyncError::Auth(format!("credentials rejected: {}", e)))?;

        let user: User = response
            .json()
            .await
            .map_err(|e| CoursyncError::Auth(format!("unexpected sign-in response: {}", e)))?;

        info!("Signed in as {} (id {})", user.full_name, user.id);

        Ok(Self {
            client,
            jar,
            settings,
            csrf_token,
            user,
            signed_in_at,
            expired: AtomicBool::new(false),
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn signed_in_at(&self) -> DateTime<Utc> {
        self.signed_in_at
    }

    /// True once the session is older than its TTL. Never reverts to false.
    pub fn is_expired(&self) -> bool {
        if self.expired.load(Ordering::Acquire) {
            return true;
        }

        let age = Utc::now().signed_duration_since(self.signed_in_at);
        let elapsed = match chrono::Duration::from_std(self.settings.ttl) {
            Ok(ttl) => age >= ttl,
            Err(_) => false,
        };

        if elapsed {
            self.expired.store(true, Ordering::Release);
        }
        elapsed
    }

    /// Fail fast with the expired-session signal
    pub fn ensure_active(&self) -> Result<(), CoursyncError> {
        if self.is_expired() {
            debug!("Rejecting request: session signed in at {} has expired", self.signed_in_at);
            return Err(CoursyncError::SessionExpired);
        }
        Ok(())
    }

    /// Paced, authenticated GET. Non-2xx responses are errors.
    pub async fn get(&self, url: &str) -> Result<Response, CoursyncError> {
        self.ensure_active()?;

        let url = parse_url(url)?;
        attach_csrf_cookie(&self.jar, &self.csrf_token, &url);

        pace(self.settings.pause).await;
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(CSRF_HEADER, &self.csrf_token)
            .send()
            .await?
            .error_for_status()?;

        Ok(response)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: chrono::Duration) {
        self.signed_in_at = self.signed_in_at - by;
    }
}

#[async_trait]
impl VideoFetcher for Session {
    fn ensure_active(&self) -> Result<(), CoursyncError> {
        Session::ensure_active(self)
    }

    async fn start_download(&self, video_url: &str) -> Result<VideoDownload, CoursyncError> {
        let response = self.get(video_url).await?;
        let content_disposition = content_disposition(response.headers())?;
        let body = response.bytes_stream().map_err(CoursyncError::from).boxed();

        Ok(VideoDownload {
            content_disposition,
            body,
        })
    }
}

/// A fresh 24-character token drawn uniformly from `[0-9a-zA-Z]`
pub fn generate_csrf_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CSRF_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// The single `Content-Disposition` value, decoded from its raw bytes.
///
/// Filenames are commonly sent as UTF-8, which `HeaderValue::to_str` rejects.
fn content_disposition(headers: &HeaderMap) -> Result<Option<String>, CoursyncError> {
    let mut values = headers.get_all(CONTENT_DISPOSITION).iter();
    let value = match (values.next(), values.next()) {
        (None, _) => return Ok(None),
        (Some(value), None) => value,
        (Some(_), Some(_)) => {
            return Err(CoursyncError::FilenameParse(
                "multiple Content-Disposition headers".to_string(),
            ))
        }
    };

    std::str::from_utf8(value.as_bytes())
        .map(|value| Some(value.to_owned()))
        .map_err(|e| {
            CoursyncError::FilenameParse(format!("Content-Disposition header is not UTF-8: {}", e))
        })
}

fn attach_csrf_cookie(jar: &Jar, token: &str, url: &Url) {
    jar.add_cookie_str(&format!("{}={}; Path=/", CSRF_COOKIE, token), url);
}

fn parse_url(url: &str) -> Result<Url, CoursyncError> {
    Url::parse(url).map_err(|e| CoursyncError::Catalog(format!("invalid URL {}: {}", url, e)))
}

async fn pace(pause: Duration) {
    if !pause.is_zero() {
        debug!("Pausing {:?} before request", pause);
        tokio::time::sleep(pause).await;
    }
}
