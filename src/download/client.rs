//! HTTP session abstraction and its reqwest-backed implementation.
//!
//! Fetching code talks to an [`HttpGet`] trait object so tests can inject
//! scripted responses. The live client sits in a [`Session`] slot that can be
//! replaced ("refreshed") while other workers keep using it: a refresh swaps
//! the `Arc` under a lock, and requests already in flight finish on the old
//! client they cloned.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::TransportError;
use crate::user_agent::pick_browser_user_agent;

/// Status code and body of one GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Full response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Minimal HTTP capability: `get(url) -> {status, body}`.
#[async_trait]
pub trait HttpGet: Send + Sync {
    /// Performs a GET and returns the status and body, whatever the status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response was received.
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// Builds fresh HTTP clients for a [`Session`].
pub trait SessionFactory: Send + Sync {
    /// Creates a new client with a clean identity (cookies, User-Agent).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Session`] if the client cannot be built.
    fn create(&self) -> Result<Arc<dyn HttpGet>, TransportError>;
}

/// Shared, replaceable HTTP session.
///
/// Workers call [`current`](Self::current) to clone the live client handle and
/// release the lock before issuing their request; [`refresh`](Self::refresh)
/// swaps in a new client under the same lock, so no worker ever observes a
/// half-replaced session.
pub struct Session {
    factory: Arc<dyn SessionFactory>,
    current: Mutex<Arc<dyn HttpGet>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session with a first client from `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Session`] if the first client cannot be built.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Result<Self, TransportError> {
        let client = factory.create()?;
        Ok(Self {
            factory,
            current: Mutex::new(client),
            generation: AtomicU64::new(0),
        })
    }

    /// Returns a handle to the live client.
    pub async fn current(&self) -> Arc<dyn HttpGet> {
        Arc::clone(&*self.current.lock().await)
    }

    /// Number of refreshes performed so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Discards the live client and installs a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Session`] if the new client cannot be built;
    /// the old client stays installed in that case.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), TransportError> {
        let mut slot = self.current.lock().await;
        let fresh = self.factory.create()?;
        *slot = fresh;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "refreshed HTTP session to shed flagged identity");
        Ok(())
    }
}

/// reqwest-backed [`HttpGet`] with a cookie store and browser headers.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    user_agent: &'static str,
}

impl ReqwestClient {
    /// Builds a client presenting `user_agent`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Session`] if the reqwest builder fails.
    pub fn new(
        user_agent: &'static str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,image/avif,image/webp,*/*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-TW,zh;q=0.9,en;q=0.8"),
        );

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|source| TransportError::Session { source })?;
        Ok(Self { client, user_agent })
    }

    /// Returns the User-Agent this client presents.
    #[must_use]
    pub fn user_agent(&self) -> &'static str {
        self.user_agent
    }
}

#[async_trait]
impl HttpGet for ReqwestClient {
    #[instrument(level = "trace", skip(self))]
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::network(url, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::network(url, e))?;
        debug!(status, bytes = body.len(), "received response");
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Creates [`ReqwestClient`]s, rotating the browser identity on every call.
#[derive(Debug)]
pub struct ReqwestSessionFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
    last_user_agent: std::sync::Mutex<Option<&'static str>>,
}

impl Default for ReqwestSessionFactory {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }
}

impl ReqwestSessionFactory {
    /// Creates a factory with explicit timeouts.
    #[must_use]
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            last_user_agent: std::sync::Mutex::new(None),
        }
    }
}

impl SessionFactory for ReqwestSessionFactory {
    fn create(&self) -> Result<Arc<dyn HttpGet>, TransportError> {
        let mut last = self
            .last_user_agent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let user_agent = pick_browser_user_agent(*last);
        let client = ReqwestClient::new(user_agent, self.connect_timeout, self.read_timeout)?;
        *last = Some(client.user_agent());
        debug!(user_agent = client.user_agent(), "created HTTP session");
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Tagged(usize);

    #[async_trait]
    impl HttpGet for Tagged {
        async fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse::new(200, self.0.to_string()))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl SessionFactory for CountingFactory {
        fn create(&self) -> Result<Arc<dyn HttpGet>, TransportError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Tagged(n)))
        }
    }

    #[tokio::test]
    async fn test_session_refresh_swaps_client() {
        let factory = Arc::new(CountingFactory::default());
        let session = Session::new(factory.clone()).unwrap();
        let before = session.current().await;
        assert_eq!(before.get("x").await.unwrap().text(), "0");

        session.refresh().await.unwrap();
        assert_eq!(session.generation(), 1);
        assert_eq!(session.current().await.get("x").await.unwrap().text(), "1");

        // The handle cloned before the refresh keeps working.
        assert_eq!(before.get("x").await.unwrap().text(), "0");
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_are_serialized() {
        let factory = Arc::new(CountingFactory::default());
        let session = Arc::new(Session::new(factory.clone()).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                session.refresh().await.unwrap();
                session.current().await.get("x").await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().status, 200);
        }
        assert_eq!(session.generation(), 8);
        assert_eq!(factory.created.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_reqwest_factory_rotates_identity() {
        let factory = ReqwestSessionFactory::default();
        factory.create().unwrap();
        let first = *factory.last_user_agent.lock().unwrap();
        factory.create().unwrap();
        let second = *factory.last_user_agent.lock().unwrap();
        assert!(first.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn test_reqwest_client_reports_its_identity() {
        let agent = crate::user_agent::BROWSER_USER_AGENTS[0];
        let client =
            ReqwestClient::new(agent, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        assert_eq!(client.user_agent(), agent);
    }

    #[test]
    fn test_http_response_text_is_lossy() {
        let response = HttpResponse::new(200, vec![b'o', b'k', 0xff]);
        assert_eq!(response.text(), "ok\u{fffd}");
    }
}
