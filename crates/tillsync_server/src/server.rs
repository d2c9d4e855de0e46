//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::log::ServerLog;
use std::sync::Arc;
use tillsync_protocol::{EntityId, PullRequest, PullResponse, PushRequest, PushResponse, Revision};

/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/sync/push";
/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/sync/pull";

/// The sync server.
///
/// Holds the server log and answers push and pull requests from devices.
/// Bodies are CBOR-encoded protocol messages.
///
/// # Example
///
/// ```
/// use tillsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
///
/// // An HTTP front end forwards POST bodies to
/// // server.handle_post(path, body) and returns the result.
/// assert_eq!(server.head(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    log: Arc<ServerLog>,
}

impl SyncServer {
    /// Creates a server with an empty log.
    pub fn new(config: ServerConfig) -> Self {
        let log = Arc::new(ServerLog::new(config.device_priority.clone()));
        Self::with_log(config, log)
    }

    /// Creates a server over an existing log.
    pub fn with_log(config: ServerConfig, log: Arc<ServerLog>) -> Self {
        let handler = RequestHandler::new(config, Arc::clone(&log));
        Self { handler, log }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        self.handler.config()
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> Result<PushResponse, String> {
        self.handler.handle_push(request).map_err(|e| e.to_string())
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> Result<PullResponse, String> {
        self.handler.handle_pull(request).map_err(|e| e.to_string())
    }

    /// Handles an encoded request posted to `path`.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.dispatch(path, body).map_err(|e| e.to_string())
    }

    fn dispatch(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        match path {
            PUSH_PATH => {
                let request = PushRequest::decode(body)?;
                Ok(self.handler.handle_push(request)?.encode()?)
            }
            PULL_PATH => {
                let request = PullRequest::decode(body)?;
                Ok(self.handler.handle_pull(request)?.encode()?)
            }
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }

    /// Returns the highest assigned sequence.
    pub fn head(&self) -> u64 {
        self.log.head()
    }

    /// Returns the number of logged records.
    pub fn record_count(&self) -> usize {
        self.log.len()
    }

    /// Returns the winning revision of an entity.
    pub fn current(&self, entity_type: &str, entity_id: &EntityId) -> Option<Revision> {
        self.log.current(entity_type, entity_id)
    }

    /// Returns the shared log.
    pub fn log(&self) -> &Arc<ServerLog> {
        &self.log
    }
}
