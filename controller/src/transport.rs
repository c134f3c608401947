use std::{collections::BTreeMap, io, path::Path, pin::Pin, sync::Arc, time::Duration};

use anyhow::Context;
use podctl_common::{
    protocol::parse_variables, Component, ControllerConfig, DeviceCommand, DeviceRequest,
    ServiceState,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixListener,
    sync::{watch, Mutex},
};
use tracing::{debug, info, warn};

use crate::{error::TransportError, framer::MessageFramer, status::StatusBoard};

pub trait DeviceStream: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> DeviceStream for T {}

type BoxedStream = Pin<Box<dyn DeviceStream>>;

#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Bound on queueing plus the whole exchange.
    pub command_timeout: Duration,
    /// Bound on waiting for the reply frame.
    pub read_timeout: Duration,
    /// Pause after each reply before the next request may be written.
    pub settle_delay: Duration,
    pub connect_timeout: Duration,
}

impl From<&ControllerConfig> for TransportOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

/// One connection to the hardware control service.
///
/// The protocol has no request ids, so exchanges are strictly one at a time.
/// Callers queue on a fair mutex and are served in arrival order.
pub struct DeviceTransport {
    framer: Arc<Mutex<MessageFramer<BoxedStream>>>,
    options: TransportOptions,
}

impl DeviceTransport {
    pub fn new<S>(io: S, options: TransportOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let stream: BoxedStream = Box::pin(io);
        Self {
            framer: Arc::new(Mutex::new(MessageFramer::new(stream))),
            options,
        }
    }

    /// Writes one request and returns the next reply frame.
    ///
    /// The caller takes its place in the queue, so callers are served in
    /// call order and one that times out while queued never writes. Once
    /// dequeued the exchange runs in its own task. When the outer timeout
    /// fires the caller gets [`TransportError::Timeout`] but the exchange
    /// keeps the queue until its reply (or read timeout) arrives, so a late
    /// reply is never handed to the next caller.
    pub async fn send(&self, request: &DeviceRequest) -> Result<String, TransportError> {
        if request.command != DeviceCommand::DeviceStatus {
            debug!("sending {request} to device");
        }

        let framer = Arc::clone(&self.framer);
        let options = self.options;
        let body = request.encode();
        let exchange = async move {
            let mut framer = framer.lock_owned().await;
            tokio::spawn(async move {
                framer.write_message(body).await?;
                let reply = framer.read_message(options.read_timeout).await;
                tokio::time::sleep(options.settle_delay).await;
                reply
            })
            .await
        };

        let reply = match tokio::time::timeout(self.options.command_timeout, exchange).await {
            Err(_) => {
                return Err(TransportError::Timeout {
                    after: self.options.command_timeout,
                })
            }
            Ok(Err(join)) => return Err(TransportError::Io(io::Error::other(join))),
            Ok(Ok(reply)) => reply?,
        };
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

/// Holds the currently connected transport, if any.
#[derive(Clone)]
pub struct DeviceLink {
    current: Arc<watch::Sender<Option<Arc<DeviceTransport>>>>,
    options: TransportOptions,
    status: StatusBoard,
}

impl DeviceLink {
    pub fn new(options: TransportOptions, status: StatusBoard) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current: Arc::new(current),
            options,
            status,
        }
    }

    /// Replaces the active connection.
    pub async fn attach<S>(&self, io: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let transport = Arc::new(DeviceTransport::new(io, self.options));
        self.current.send_replace(Some(transport));
        self.status
            .set(Component::Franken, ServiceState::Healthy, "connected")
            .await;
    }

    pub fn is_connected(&self) -> bool {
        self.current.borrow().is_some()
    }

    async fn transport(&self) -> Result<Arc<DeviceTransport>, TransportError> {
        let mut rx = self.current.subscribe();
        let waited = tokio::time::timeout(self.options.connect_timeout, async {
            rx.wait_for(Option::is_some).await.ok().and_then(|t| t.clone())
        })
        .await;
        waited.ok().flatten().ok_or(TransportError::NotConnected)
    }

    pub async fn execute(&self, request: &DeviceRequest) -> Result<String, TransportError> {
        let transport = self.transport().await?;
        let result = transport.send(request).await;

        if let Err(TransportError::StreamEnded) = &result {
            // Drop the dead connection unless a newer one already replaced it.
            self.current.send_if_modified(|current| match current {
                Some(active) if Arc::ptr_eq(active, &transport) => {
                    *current = None;
                    true
                }
                _ => false,
            });
            self.status
                .set(Component::Franken, ServiceState::Restarting, "waiting for reconnect")
                .await;
        }
        result
    }

    /// Polls device status and parses its `key = value` reply.
    pub async fn get_variables(&self) -> Result<BTreeMap<String, String>, TransportError> {
        let reply = self.execute(&DeviceRequest::status()).await?;
        Ok(parse_variables(&reply))
    }
}

/// Accepts connections from the hardware control service on `path`.
/// Each new connection replaces the previous one.
pub async fn serve_unix(link: DeviceLink, path: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed stale socket {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).context("failed to remove stale device socket"),
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind device socket at {}", path.display()))?;
    link.status
        .set(Component::Franken, ServiceState::Started, "waiting for connection")
        .await;
    info!("device socket listening on {}", path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                if link.is_connected() {
                    info!("device reconnected, replacing previous connection");
                } else {
                    info!("device connected");
                }
                link.attach(stream).await;
            }
            Err(err) => {
                warn!("device socket accept failed: {err}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    fn options() -> TransportOptions {
        TransportOptions {
            command_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(400),
            settle_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(100),
        }
    }

    async fn read_request(device: &mut DuplexStream) -> String {
        let mut received = Vec::new();
        while !received.ends_with(b"\n\n") {
            let mut byte = [0u8; 1];
            device.read_exact(&mut byte).await.unwrap();
            received.push(byte[0]);
        }
        received.truncate(received.len() - 2);
        String::from_utf8(received).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn request_and_reply_round_trip() {
        let (socket, mut device) = tokio::io::duplex(256);
        let transport = DeviceTransport::new(socket, options());

        let responder = tokio::spawn(async move {
            let request = read_request(&mut device).await;
            device.write_all(b"ok\n\n").await.unwrap();
            request
        });

        let reply = transport
            .send(&DeviceRequest::new(DeviceCommand::TempLevelLeft, "-9"))
            .await
            .unwrap();

        assert_eq!(reply, "ok");
        assert_eq!(responder.await.unwrap(), "11\n-9");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_callers_are_served_in_call_order() {
        let (socket, mut device) = tokio::io::duplex(256);
        let transport = Arc::new(DeviceTransport::new(socket, options()));

        let responder = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let request = read_request(&mut device).await;
                device
                    .write_all(format!("re:{request}\n\n").as_bytes())
                    .await
                    .unwrap();
                seen.push(request);
            }
            seen
        });

        let (a, b, c) = (
            Arc::clone(&transport),
            Arc::clone(&transport),
            Arc::clone(&transport),
        );
        let (ra, rb, rc) = tokio::join!(
            async move { a.send(&DeviceRequest::empty(DeviceCommand::Hello)).await },
            async move { b.send(&DeviceRequest::empty(DeviceCommand::Prime)).await },
            async move { c.send(&DeviceRequest::status()).await },
        );

        // Every caller gets the reply to its own request.
        assert_eq!(ra.unwrap(), "re:0\nempty");
        assert_eq!(rb.unwrap(), "re:13\nempty");
        assert_eq!(rc.unwrap(), "re:14");
        assert_eq!(responder.await.unwrap(), vec!["0\nempty", "13\nempty", "14"]);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_that_times_out_while_queued_never_writes() {
        let (socket, mut device) = tokio::io::duplex(256);
        let transport = Arc::new(DeviceTransport::new(
            socket,
            TransportOptions {
                command_timeout: Duration::from_millis(200),
                ..options()
            },
        ));

        // The first request goes unanswered and holds the queue until the
        // read timeout.
        let responder = tokio::spawn(async move {
            let first = read_request(&mut device).await;
            let second = read_request(&mut device).await;
            device
                .write_all(format!("re:{second}\n\n").as_bytes())
                .await
                .unwrap();
            (first, second)
        });

        let (a, b) = (Arc::clone(&transport), Arc::clone(&transport));
        let (ra, rb) = tokio::join!(
            async move { a.send(&DeviceRequest::empty(DeviceCommand::Hello)).await },
            async move { b.send(&DeviceRequest::empty(DeviceCommand::Prime)).await },
        );
        assert!(matches!(ra, Err(TransportError::Timeout { .. })));
        assert!(matches!(rb, Err(TransportError::Timeout { .. })));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let reply = transport.send(&DeviceRequest::status()).await.unwrap();

        assert_eq!(reply, "re:14");
        assert_eq!(
            responder.await.unwrap(),
            ("0\nempty".to_string(), "14".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn outer_timeout_does_not_leak_late_reply() {
        let (socket, mut device) = tokio::io::duplex(256);
        let transport = Arc::new(DeviceTransport::new(
            socket,
            TransportOptions {
                command_timeout: Duration::from_millis(100),
                read_timeout: Duration::from_millis(300),
                ..options()
            },
        ));

        let responder = tokio::spawn(async move {
            read_request(&mut device).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            device.write_all(b"late\n\n").await.unwrap();
            let second = read_request(&mut device).await;
            device.write_all(b"fresh\n\n").await.unwrap();
            second
        });

        let err = transport
            .send(&DeviceRequest::empty(DeviceCommand::Hello))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));

        // Let the abandoned exchange collect its reply and release the queue.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let reply = transport.send(&DeviceRequest::status()).await.unwrap();
        assert_eq!(reply, "fresh");
        assert_eq!(responder.await.unwrap(), "14");
    }

    #[tokio::test(start_paused = true)]
    async fn closed_socket_reports_stream_ended() {
        let (socket, device) = tokio::io::duplex(256);
        let link = DeviceLink::new(options(), StatusBoard::new());
        link.attach(socket).await;
        drop(device);

        let err = link.execute(&DeviceRequest::status()).await.unwrap_err();

        assert!(matches!(
            err,
            TransportError::StreamEnded | TransportError::Io(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn no_connection_fails_after_connect_timeout() {
        let status = StatusBoard::new();
        let link = DeviceLink::new(options(), status);

        let err = link.execute(&DeviceRequest::status()).await.unwrap_err();

        assert!(matches!(err, TransportError::NotConnected));
        assert!(!link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_detaches_connection() {
        let (socket, mut device) = tokio::io::duplex(256);
        let status = StatusBoard::new();
        let link = DeviceLink::new(options(), status.clone());
        link.attach(socket).await;

        let responder = tokio::spawn(async move {
            read_request(&mut device).await;
            // Hang up without replying.
        });

        let err = link.execute(&DeviceRequest::status()).await.unwrap_err();
        responder.await.unwrap();

        assert!(matches!(err, TransportError::StreamEnded));
        assert!(!link.is_connected());
        assert_eq!(
            status.snapshot().await.franken.status,
            ServiceState::Restarting
        );
    }

    #[tokio::test(start_paused = true)]
    async fn get_variables_parses_status_reply() {
        let (socket, mut device) = tokio::io::duplex(256);
        let link = DeviceLink::new(options(), StatusBoard::new());
        link.attach(socket).await;

        tokio::spawn(async move {
            let request = read_request(&mut device).await;
            assert_eq!(request, "14");
            device
                .write_all(b"tgHeatLevelL = -9\nheatLevelR = 12\n\n")
                .await
                .unwrap();
            device
        });

        let vars = link.get_variables().await.unwrap();

        assert_eq!(vars["tgHeatLevelL"], "-9");
        assert_eq!(vars["heatLevelR"], "12");
    }
}
