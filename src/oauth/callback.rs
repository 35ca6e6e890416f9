use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, FlowStage};
use crate::oauth::receiver::{Redirect, RedirectContext, RedirectParams, RedirectReceiver};

pub const CALLBACK_PATH: &str = "/callback";

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
    <title>lmsctl</title></head><body><h1>Authorization complete</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";

/// Loopback address with an OS-assigned port.
pub fn default_callback_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

fn error_page(message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>lmsctl</title></head>\
         <body><h1>Authorization failed</h1><p>{}</p>\
         <p>Return to the terminal for details.</p></body></html>",
        escape_html(message)
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\
         Cache-Control: no-store\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Redirect parameters waiting to be handed to the flow, plus the slot to hand them to.
type Delivery = (oneshot::Sender<RedirectParams>, RedirectParams);

/// Turns callback requests into responses. Delivers at most once.
struct CallbackHandler {
    sender: Mutex<Option<oneshot::Sender<RedirectParams>>>,
}

impl CallbackHandler {
    fn new(sender: oneshot::Sender<RedirectParams>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn take_sender(&self) -> Option<oneshot::Sender<RedirectParams>> {
        match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn handle(&self, request: &str) -> (String, Option<Delivery>) {
        let mut parts = request.lines().next().unwrap_or_default().split_whitespace();
        let (method, target) = match (parts.next(), parts.next()) {
            (Some(m), Some(t)) => (m, t),
            _ => return (http_response("400 Bad Request", &error_page("Malformed request")), None),
        };
        if method != "GET" {
            return (
                http_response("405 Method Not Allowed", &error_page("Method not allowed")),
                None,
            );
        }
        let (path, params) = match RedirectParams::from_request_target(target) {
            Some(parsed) => parsed,
            None => return (http_response("400 Bad Request", &error_page("Malformed request")), None),
        };
        if path != CALLBACK_PATH {
            return (http_response("404 Not Found", &error_page("Not found")), None);
        }
        if params.is_empty() {
            return (
                http_response("400 Bad Request", &error_page("Missing authorization code")),
                None,
            );
        }

        let body = match &params.error {
            Some(error) => error_page(params.error_description.as_deref().unwrap_or(error)),
            None => SUCCESS_PAGE.to_string(),
        };
        let delivery = match self.take_sender() {
            Some(sender) => Some((sender, params)),
            None => {
                tracing::debug!("duplicate callback request ignored");
                None
            }
        };
        (http_response("200 OK", &body), delivery)
    }
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn handle_connection(mut stream: TcpStream, handler: Arc<CallbackHandler>) {
    let request = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            tracing::debug!("callback connection read failed: {e}");
            return;
        }
        Err(_) => return,
    };

    let (response, delivery) = handler.handle(&request);
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("failed to write callback response: {e}");
    }
    let _ = stream.shutdown().await;

    // Respond before delivering, so the page reaches the browser before the
    // flow tears the server down.
    if let Some((sender, params)) = delivery {
        let _ = sender.send(params);
    }
}

async fn serve(listener: TcpListener, handler: Arc<CallbackHandler>, shutdown: CancellationToken) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(%peer, "callback connection");
                    connections.spawn(handle_connection(stream, handler.clone()));
                }
                Err(e) => tracing::debug!("callback accept failed: {e}"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    // Dropping the listener here releases the port; dropping the set aborts
    // connections still in flight.
    drop(listener);
    connections.shutdown().await;
}

/// One-shot HTTP listener on loopback that receives the authorization redirect.
///
/// The port is bound by [`LocalCallbackServer::bind`], before the
/// authorization URL exists, so the redirect URI can embed it. The accept loop
/// runs in its own task and is stopped, and the port released, by
/// [`RedirectReceiver::shutdown`] or on drop.
pub struct LocalCallbackServer {
    addr: SocketAddr,
    result_rx: Option<oneshot::Receiver<RedirectParams>>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LocalCallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCallbackServer")
            .field("addr", &self.addr)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl LocalCallbackServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let (tx, rx) = oneshot::channel();
        let handler = Arc::new(CallbackHandler::new(tx));
        let stop = CancellationToken::new();
        let task = tokio::spawn(serve(listener, handler, stop.clone()));

        tracing::debug!(%addr, "callback server listening");
        Ok(Self {
            addr,
            result_rx: Some(rx),
            stop,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl RedirectReceiver for LocalCallbackServer {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn redirect_uri(&self) -> String {
        format!("http://{}:{}{CALLBACK_PATH}", self.addr.ip(), self.addr.port())
    }

    async fn await_redirect(&mut self, ctx: &RedirectContext<'_>) -> Result<Redirect, AuthError> {
        let stage = FlowStage::AwaitingRedirect;
        let rx = match self.result_rx.take() {
            Some(rx) => rx,
            None => {
                return Err(AuthError::Configuration(
                    "Callback server has already delivered a redirect".into(),
                ))
            }
        };

        let outcome = tokio::select! {
            received = rx => match received {
                Ok(params) => params.into_redirect(None),
                Err(_) => Err(AuthError::network(stage, "Callback server stopped unexpectedly")),
            },
            _ = tokio::time::sleep(ctx.timeout) => Err(AuthError::cancelled(
                stage,
                format!("timed out after {}s waiting for the browser redirect", ctx.timeout.as_secs()),
            )),
            _ = ctx.cancel.cancelled() => Err(AuthError::cancelled(stage, "login aborted")),
        };

        self.shutdown().await;
        outcome
    }

    async fn shutdown(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
            tracing::debug!(addr = %self.addr, "callback server stopped");
        }
    }
}

impl Drop for LocalCallbackServer {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
