use std::fmt;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use tokio::task::JoinHandle;

use crate::connector::{ConnectionKey, Connector};
use crate::{ErrorKind, Response, Result};

/// An established HTTP/1.1 connection
pub(crate) struct Protocol {
    pub(crate) id: u64,
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    pub(crate) should_close: bool,
}

impl Protocol {
    pub(crate) fn new(id: u64, sender: SendRequest<Full<Bytes>>, driver: JoinHandle<()>) -> Self {
        Self {
            id,
            sender,
            driver,
            should_close: false,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.sender.is_closed() && !self.driver.is_finished()
    }
}

impl Drop for Protocol {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.id)
            .field("should_close", &self.should_close)
            .finish_non_exhaustive()
    }
}

/// A connection handed out by a [`Connector`] to a single request.
///
/// Give it back with [`release`](Self::release) once the response body was
/// read, or discard it with [`close`](Self::close). A connection dropped
/// without either is closed.
pub struct Connection {
    connector: Connector,
    key: ConnectionKey,
    protocol: Option<Protocol>,
    absolute_form: bool,
    reused: bool,
}

impl Connection {
    pub(crate) fn new(
        connector: Connector,
        key: ConnectionKey,
        protocol: Protocol,
        absolute_form: bool,
        reused: bool,
    ) -> Self {
        Self {
            connector,
            key,
            protocol: Some(protocol),
            absolute_form,
            reused,
        }
    }

    /// The pool key of this connection
    #[must_use]
    pub const fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Whether the connection was taken from the idle pool
    #[must_use]
    pub const fn is_reused(&self) -> bool {
        self.reused
    }

    /// Whether requests must use an absolute URI as request target.
    ///
    /// This is the case for plain HTTP requests sent through a proxy.
    #[must_use]
    pub const fn uses_absolute_form(&self) -> bool {
        self.absolute_form
    }

    /// Send `request` and wait for the response head.
    ///
    /// The connection is marked for closing if sending fails or the server
    /// asks for it with `Connection: close`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection broke down
    pub async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<Incoming>> {
        let protocol = self.protocol.as_mut().ok_or(ErrorKind::ConnectorClosed)?;

        if let Err(error) = protocol.sender.ready().await {
            protocol.should_close = true;
            return Err(error.into());
        }

        match protocol.sender.send_request(request).await {
            Ok(response) => {
                if Response::wants_close(response.headers()) {
                    protocol.should_close = true;
                }
                Ok(response)
            }
            Err(error) => {
                protocol.should_close = true;
                Err(error.into())
            }
        }
    }

    /// Return the connection to the pool for reuse
    pub fn release(mut self) {
        if let Some(protocol) = self.protocol.take() {
            self.connector.release(&self.key, protocol, false);
        }
    }

    /// Close the connection instead of pooling it
    pub fn close(mut self) {
        if let Some(protocol) = self.protocol.take() {
            self.connector.release(&self.key, protocol, true);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(protocol) = self.protocol.take() {
            self.connector.release(&self.key, protocol, true);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("protocol", &self.protocol)
            .field("reused", &self.reused)
            .finish_non_exhaustive()
    }
}
