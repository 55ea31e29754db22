//! Repository session: credential, discovered workspace, last exchange.
//!
//! # Design
//! A `Session` is the only stateful value in the crate. It owns the transport
//! and drives every HTTP exchange through [`Session::execute`], which applies
//! the credential, enforces the configured deadline and records the outcome.
//! The workspace is written only by discovery; the last-exchange record is
//! written by every completed exchange and never by a failed transport call.
//! A session is meant for one logical conversation; share it across threads
//! only behind external synchronization.

use std::fmt;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::check_status;
use crate::codec::{parse_service_document, APP_SERVICE_TYPE};
use crate::config::SessionConfig;
use crate::error::{CmisError, Result};
use crate::http::{Exchange, HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
use crate::transport::UreqTransport;
use crate::workspace::Workspace;

/// How a session authenticates. Exactly one form is active per session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// HTTP basic authentication on every request.
    Basic { username: String, password: String },
    /// A pre-issued ticket sent as the `identity` query parameter
    /// (e.g. `alf_ticket`) on every request.
    Ticket { identity: String, ticket: String },
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn ticket(identity: impl Into<String>, ticket: impl Into<String>) -> Self {
        Self::Ticket {
            identity: identity.into(),
            ticket: ticket.into(),
        }
    }

    fn apply(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        match self {
            Self::Basic { username, password } => {
                let token = STANDARD.encode(format!("{username}:{password}"));
                Ok(request.with_header("authorization", format!("Basic {token}")))
            }
            Self::Ticket { identity, ticket } => {
                let mut url = Url::parse(&request.url).map_err(|e| {
                    CmisError::InvalidArgument(format!("invalid request URL {}: {e}", request.url))
                })?;
                url.query_pairs_mut().append_pair(identity, ticket);
                request.url = url.into();
                Ok(request)
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Ticket { identity, .. } => f
                .debug_struct("Ticket")
                .field("identity", identity)
                .field("ticket", &"<redacted>")
                .finish(),
        }
    }
}

/// A connection to one CMIS repository over the AtomPub binding.
pub struct Session<T: Transport = UreqTransport> {
    base_url: String,
    credential: Credential,
    config: SessionConfig,
    transport: T,
    workspace: Option<Workspace>,
    last_exchange: Option<Exchange>,
}

impl Session<UreqTransport> {
    /// Connects with default configuration and discovers the workspace.
    pub fn connect(base_url: &str, credential: Credential) -> Result<Self> {
        Self::connect_with(base_url, credential, SessionConfig::default(), UreqTransport::new())
    }
}

impl<T: Transport> Session<T> {
    /// Creates a session without contacting the server. The workspace is
    /// discovered on first use.
    pub fn new(
        base_url: &str,
        credential: Credential,
        config: SessionConfig,
        transport: T,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            config,
            transport,
            workspace: None,
            last_exchange: None,
        }
    }

    /// Creates a session and discovers the workspace eagerly.
    pub fn connect_with(
        base_url: &str,
        credential: Credential,
        config: SessionConfig,
        transport: T,
    ) -> Result<Self> {
        let mut session = Self::new(base_url, credential, config, transport);
        session.discover_workspace()?;
        Ok(session)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The workspace from the last successful discovery, if any.
    pub fn cached_workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Method, URL, status and body of the most recent completed exchange.
    pub fn last_exchange(&self) -> Option<&Exchange> {
        self.last_exchange.as_ref()
    }

    pub fn record_exchange(&mut self, method: HttpMethod, url: String, status: u16, body: Vec<u8>) {
        self.last_exchange = Some(Exchange {
            method,
            url,
            status,
            body,
        });
    }

    /// Fetches the service document and replaces the cached workspace.
    ///
    /// Any failure after a response arrives leaves the session without a
    /// workspace; a transport failure keeps the previous one.
    pub fn discover_workspace(&mut self) -> Result<&Workspace> {
        let request = HttpRequest::new(HttpMethod::Get, self.base_url.clone())
            .with_header("accept", APP_SERVICE_TYPE);
        let response = self.execute(request)?;

        let discovered = check_status(&response, "discoverWorkspace")
            .and_then(|()| parse_service_document(&response.body))
            .and_then(|workspace| workspace.ensure_usable().map(|()| workspace));

        match discovered {
            Ok(workspace) => {
                info!(
                    repository = workspace.repository_id.as_deref().unwrap_or("-"),
                    collections = workspace.collections.len(),
                    templates = workspace.uri_templates.len(),
                    "discovered cmis workspace"
                );
                let workspace: &Workspace = self.workspace.insert(workspace);
                Ok(workspace)
            }
            Err(err) => {
                warn!(url = %self.base_url, error = %err, "workspace discovery failed");
                self.workspace = None;
                Err(err)
            }
        }
    }

    /// The cached workspace, discovering it first if needed.
    pub fn workspace(&mut self) -> Result<&Workspace> {
        if self.workspace.is_none() {
            self.discover_workspace()?;
        }
        self.workspace
            .as_ref()
            .ok_or_else(|| CmisError::RepositoryDiscovery("no workspace available".to_string()))
    }

    /// Resolves a server-supplied href against the base URL.
    pub(crate) fn resolve(&self, href: &str) -> Result<String> {
        let base = Url::parse(&self.base_url).map_err(|e| {
            CmisError::InvalidArgument(format!("invalid base URL {}: {e}", self.base_url))
        })?;
        base.join(href)
            .map(String::from)
            .map_err(|e| CmisError::InvalidArgument(format!("invalid href {href}: {e}")))
    }

    /// Performs one exchange and records it.
    ///
    /// Non-2xx statuses are returned as data; classifying them is up to the
    /// caller.
    pub(crate) fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let request = self
            .credential
            .apply(request)?
            .with_header("user-agent", self.config.user_agent.clone());
        let timeout = self.config.timeout;
        let started = Instant::now();

        match self.transport.exchange(&request, timeout) {
            Ok(response) => {
                debug!(
                    method = %request.method,
                    url = %request.url,
                    status = response.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "cmis exchange"
                );
                self.record_exchange(
                    request.method,
                    request.url,
                    response.status,
                    response.body.clone(),
                );
                Ok(response)
            }
            Err(TransportError::Timeout) => {
                warn!(method = %request.method, url = %request.url, ?timeout, "exchange timed out");
                Err(CmisError::TransportTimeout {
                    method: request.method.to_string(),
                    url: request.url,
                    timeout,
                })
            }
            Err(TransportError::Failed(reason)) => {
                warn!(method = %request.method, url = %request.url, %reason, "transport failure");
                Err(CmisError::Transport {
                    method: request.method.to_string(),
                    url: request.url,
                    reason,
                })
            }
        }
    }
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .field("config", &self.config)
            .field("workspace", &self.workspace.is_some())
            .field("last_exchange", &self.last_exchange)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn session(
        transport: &ScriptedTransport,
        credential: Credential,
    ) -> Session<&ScriptedTransport> {
        Session::new(BASE, credential, SessionConfig::default(), transport)
    }

    #[test]
    fn basic_credential_sets_authorization_header() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC)]);
        let mut session = session(&transport, Credential::basic("admin", "admin"));
        session.discover_workspace().unwrap();

        let request = transport.request(0);
        assert_eq!(request.url, BASE);
        assert_eq!(request.header("authorization"), Some("Basic YWRtaW46YWRtaW4="));
        assert_eq!(request.header("accept"), Some(APP_SERVICE_TYPE));
        assert!(request.header("user-agent").unwrap().starts_with("cmis-core/"));
    }

    #[test]
    fn ticket_credential_is_a_query_parameter() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC)]);
        let mut session = session(&transport, Credential::ticket("alf_ticket", "TICKET_abc"));
        session.discover_workspace().unwrap();

        let request = transport.request(0);
        assert_eq!(request.url, "http://repo/cmis?alf_ticket=TICKET_abc");
        assert!(request.header("authorization").is_none());
        assert_eq!(session.last_exchange().unwrap().url, request.url);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", Credential::basic("admin", "s3cret"));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("s3cret"));
        let rendered = format!("{:?}", Credential::ticket("alf_ticket", "TICKET_abc"));
        assert!(!rendered.contains("TICKET_abc"));
    }

    #[test]
    fn discovery_is_idempotent() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC), ok(SERVICE_DOC)]);
        let mut session = session(&transport, Credential::basic("u", "p"));
        let first = session.discover_workspace().unwrap().clone();
        let second = session.discover_workspace().unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(first.root_folder_id.as_deref(), Some("root"));
    }

    #[test]
    fn failed_discovery_clears_workspace() {
        let broken =
            SERVICE_DOC.replace("<cmisra:collectionType>query</cmisra:collectionType>", "");
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC), ok(broken)]);
        let mut session = session(&transport, Credential::basic("u", "p"));
        session.discover_workspace().unwrap();
        let err = session.discover_workspace().unwrap_err();
        assert!(matches!(err, CmisError::RepositoryDiscovery(_)));
        assert!(session.cached_workspace().is_none());
    }

    #[test]
    fn non_success_discovery_keeps_status_and_body() {
        let transport = ScriptedTransport::new(vec![status(401, "unauthorized")]);
        let mut session = session(&transport, Credential::basic("u", "bad"));
        let err = session.discover_workspace().unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.body(), Some(&b"unauthorized"[..]));
        assert_eq!(session.last_exchange().unwrap().status, 401);
    }

    #[test]
    fn timeout_leaves_last_exchange_untouched() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC), Err(TransportError::Timeout)]);
        let mut session = session(&transport, Credential::basic("u", "p"));
        session.discover_workspace().unwrap();
        let before = session.last_exchange().cloned();

        let err = session.discover_workspace().unwrap_err();
        assert!(matches!(err, CmisError::TransportTimeout { .. }));
        assert_eq!(session.last_exchange().cloned(), before);
        assert!(session.cached_workspace().is_some());
    }

    #[test]
    fn workspace_is_discovered_once_on_demand() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC)]);
        let mut session = session(&transport, Credential::basic("u", "p"));
        assert!(session.cached_workspace().is_none());
        session.workspace().unwrap();
        session.workspace().unwrap();
        assert_eq!(transport.count(), 1);
    }

    #[test]
    fn relative_hrefs_resolve_against_base() {
        let transport = ScriptedTransport::default();
        let session = session(&transport, Credential::basic("u", "p"));
        assert_eq!(session.resolve("/query").unwrap(), "http://repo/query");
        assert_eq!(session.resolve("http://other/x").unwrap(), "http://other/x");
    }
}
