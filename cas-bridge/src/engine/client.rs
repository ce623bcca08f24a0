//! Queued client handle
//!
//! A [`CaClient`] stands in for a remote Channel Access client: every call
//! enqueues a request on the engine and blocks until some thread running
//! [`CasEngine::process`](super::CasEngine::process) has serviced it.

use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use thiserror::Error;

use super::gdd::Gdd;
use super::types::{CaNetAddr, CaStatus, PvExistReturn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum Request {
    Search {
        client: CaNetAddr,
        name: String,
        reply: Sender<PvExistReturn>,
    },
    Connect {
        name: String,
        reply: Sender<Result<(), CaStatus>>,
    },
    Get {
        name: String,
        reply: Sender<Result<Gdd, CaStatus>>,
    },
    Put {
        name: String,
        value: Gdd,
        reply: Sender<CaStatus>,
    },
    Disconnect {
        name: String,
    },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("request was not serviced in time")]
    Timeout,

    #[error("request rejected: {0}")]
    Rejected(CaStatus),

    #[error("engine is not accepting requests")]
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct CaClient {
    requests: Sender<Request>,
    address: CaNetAddr,
    timeout: Duration,
}

impl CaClient {
    pub(crate) fn new(requests: Sender<Request>, address: CaNetAddr) -> Self {
        Self {
            requests,
            address,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// How long each call waits for the engine to service it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> CaNetAddr {
        self.address
    }

    /// Ask whether the server serves `name`.
    pub fn search(&self, name: &str) -> Result<bool, ClientError> {
        let answer = self.call(|reply| Request::Search {
            client: self.address,
            name: name.to_owned(),
            reply,
        })?;
        Ok(answer == PvExistReturn::ExistsHere)
    }

    pub fn connect(&self, name: &str) -> Result<(), ClientError> {
        self.call(|reply| Request::Connect {
            name: name.to_owned(),
            reply,
        })?
        .map_err(ClientError::Rejected)
    }

    pub fn get(&self, name: &str) -> Result<Gdd, ClientError> {
        self.call(|reply| Request::Get {
            name: name.to_owned(),
            reply,
        })?
        .map_err(ClientError::Rejected)
    }

    /// Write `value`; waits for asynchronous completion as well.
    pub fn put(&self, name: &str, value: Gdd) -> Result<(), ClientError> {
        let status = self.call(|reply| Request::Put {
            name: name.to_owned(),
            value,
            reply,
        })?;
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Rejected(status))
        }
    }

    pub fn disconnect(&self, name: &str) -> Result<(), ClientError> {
        self.requests
            .send(Request::Disconnect {
                name: name.to_owned(),
            })
            .map_err(|_| ClientError::Disconnected)
    }

    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> Result<T, ClientError> {
        let (reply, response) = bounded(1);
        self.requests
            .send(build(reply))
            .map_err(|_| ClientError::Disconnected)?;
        response.recv_timeout(self.timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ClientError::Timeout,
            RecvTimeoutError::Disconnected => ClientError::Disconnected,
        })
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, name) = match self {
            Request::Search { name, .. } => ("search", name),
            Request::Connect { name, .. } => ("connect", name),
            Request::Get { name, .. } => ("get", name),
            Request::Put { name, .. } => ("put", name),
            Request::Disconnect { name } => ("disconnect", name),
        };
        f.debug_struct("Request")
            .field("kind", &kind)
            .field("name", name)
            .finish()
    }
}
