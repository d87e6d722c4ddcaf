use super::{Operation, Response, Session, SessionError, SessionProvider};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Sessions backed by plain HTTP navigation.
///
/// Every session gets its own [`Client`], and with it its own connection pool and cookie jar,
/// so users never share connections or cookies. The number of live sessions is capped by `max_sessions`, the way a
/// browser caps open tabs; acquisition waits for a free slot.
#[derive(Clone)]
pub struct HttpSessionProvider {
    slots: Arc<Semaphore>,
    user_agent: Option<String>,
}

impl HttpSessionProvider {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_sessions.min(Semaphore::MAX_PERMITS))),
            user_agent: None,
        }
    }

    /// A provider that never runs out of sessions.
    pub fn unbounded() -> Self {
        Self::new(Semaphore::MAX_PERMITS)
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    /// Sessions that can still be acquired without waiting.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

impl Default for HttpSessionProvider {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl SessionProvider for HttpSessionProvider {
    type Session = HttpSession;

    fn acquire(
        &self,
        user: usize,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send {
        let slots = self.slots.clone();
        let user_agent = self.user_agent.clone();
        async move {
            let permit = slots
                .acquire_owned()
                .await
                .map_err(|_| SessionError::Unavailable("session pool is closed".to_string()))?;

            let mut builder = Client::builder().cookie_store(true);
            if let Some(user_agent) = user_agent {
                builder = builder.user_agent(user_agent);
            }
            let client = builder
                .build()
                .map_err(|e| SessionError::Unavailable(e.to_string()))?;

            trace!(user, "Opened HTTP session");
            Ok(HttpSession {
                client: Some(client),
                permit: Some(permit),
            })
        }
    }
}

pub struct HttpSession {
    client: Option<Client>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Session for HttpSession {
    fn execute(
        &mut self,
        op: Operation<'_>,
    ) -> impl Future<Output = Result<Response, SessionError>> + Send {
        let client = self.client.clone();
        let target = op.target.clone();
        async move {
            let client = client.ok_or(SessionError::Released)?;
            let res = client
                .get(target)
                .send()
                .await
                .map_err(|e| SessionError::Operation(e.to_string()))?;

            let status = res.status().as_u16();
            // A navigation is only done once the whole page has arrived.
            let body = res
                .bytes()
                .await
                .map_err(|e| SessionError::Operation(e.to_string()))?;

            Ok(Response {
                status,
                bytes: body.len(),
            })
        }
    }

    fn release(&mut self) {
        self.client.take();
        self.permit.take();
    }
}
