//! Browser tab driving the interactive sign-in
//!
//! [`CallbackTab`] opens the system browser on the authorize URL and listens
//! on the redirect URI's port. The URL of the first request that reaches the
//! redirect path becomes the tab's current URL.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

/// How long one `current_url` check waits for a connection.
const ACCEPT_SLICE: Duration = Duration::from_millis(50);

/// How long to wait for a connected browser to send its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A controlled browser tab.
pub trait Tab {
    /// Load `url` in the tab.
    async fn navigate(&mut self, url: &Url) -> Result<()>;

    /// The URL the tab is currently showing, if known.
    async fn current_url(&mut self) -> Result<Option<String>>;

    /// Release the tab. Safe to call more than once.
    fn close(&mut self);
}

/// System browser plus a localhost listener on the redirect URI.
pub struct CallbackTab {
    listener: Option<TcpListener>,
    origin: String,
    path: String,
    open_browser: bool,
    current: Option<String>,
}

impl CallbackTab {
    /// Bind the listener for `redirect_uri`. Only loopback redirect URIs can
    /// be served.
    pub async fn bind(redirect_uri: &str, open_browser: bool) -> Result<Self> {
        let url = Url::parse(redirect_uri)
            .with_context(|| format!("Invalid redirect_uri {:?}", redirect_uri))?;

        let host = url.host_str().unwrap_or_default();
        if !matches!(host, "localhost" | "127.0.0.1" | "[::1]") {
            bail!(
                "redirect_uri host {:?} is not a loopback address; cannot receive the callback",
                host
            );
        }
        let port = url
            .port_or_known_default()
            .with_context(|| format!("redirect_uri {:?} has no port", redirect_uri))?;

        let addr = if host == "[::1]" {
            format!("[::1]:{}", port)
        } else {
            format!("127.0.0.1:{}", port)
        };
        let listener = TcpListener::bind(addr.as_str())
            .await
            .with_context(|| format!("Failed to bind callback listener on {}", addr))?;
        tracing::debug!("Callback listener on {}", addr);

        Ok(Self {
            listener: Some(listener),
            origin: url.origin().ascii_serialization(),
            path: url.path().to_string(),
            open_browser,
            current: None,
        })
    }

    /// Actual bound port (differs from the redirect URI when it asks for 0).
    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }

    /// Serve one connection; returns the full callback URL if it hit the
    /// redirect path.
    async fn handle_connection(&self, mut stream: TcpStream) -> Option<String> {
        let mut buffer = [0u8; 4096];
        let bytes_read = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buffer)).await
        {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::debug!("Failed to read callback request: {}", e);
                return None;
            }
            Err(_) => {
                tracing::debug!("Timed out reading callback request");
                return None;
            }
        };

        let request = String::from_utf8_lossy(&buffer[..bytes_read]);
        let request_line = request.lines().next().unwrap_or_default();
        tracing::debug!("Callback request: {}", request_line);

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            respond(&mut stream, 400, "Bad Request", PLAIN, "Bad Request").await;
            return None;
        };

        if method != "GET" {
            respond(&mut stream, 405, "Method Not Allowed", PLAIN, "Method Not Allowed").await;
            return None;
        }

        let target_path = target.split('?').next().unwrap_or_default();
        if target_path != self.path {
            respond(&mut stream, 404, "Not Found", PLAIN, "Not Found").await;
            return None;
        }

        let page = if target.contains("code=") {
            SUCCESS_PAGE
        } else {
            FAILURE_PAGE
        };
        respond(&mut stream, 200, "OK", HTML, page).await;

        Some(format!("{}{}", self.origin, target))
    }
}

impl Tab for CallbackTab {
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        if self.listener.is_none() {
            bail!("Browser tab already closed");
        }

        println!();
        println!("Sign in at: {}", url);
        println!();

        if self.open_browser {
            tracing::info!("Opening browser for authorization...");
            if let Err(e) = open::that(url.as_str()) {
                tracing::warn!("Could not launch browser ({}); open the URL above manually", e);
            }
        }

        tracing::debug!("Listening for the redirect on port {:?}", self.local_port());
        self.current = None;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Option<String>> {
        let Some(listener) = self.listener.as_ref() else {
            bail!("Browser tab already closed");
        };

        let accepted = tokio::time::timeout(ACCEPT_SLICE, listener.accept()).await;
        match accepted {
            Ok(Ok((stream, peer))) => {
                tracing::debug!("Connection from {}", peer);
                if let Some(url) = self.handle_connection(stream).await {
                    self.current = Some(url);
                }
            }
            Ok(Err(e)) => {
                return Err(e).context("Error accepting callback connection");
            }
            Err(_) => {}
        }

        Ok(self.current.clone())
    }

    fn close(&mut self) {
        if self.listener.take().is_some() {
            tracing::debug!("Callback listener closed");
        }
    }
}

impl Drop for CallbackTab {
    fn drop(&mut self) {
        self.close();
    }
}

const PLAIN: &str = "text/plain";
const HTML: &str = "text/html; charset=utf-8";

const SUCCESS_PAGE: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Signed in</title></head>\
<body><h1>Authorization complete</h1><p>You can close this tab now.</p></body></html>";

const FAILURE_PAGE: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Sign-in failed</title></head>\
<body><h1>Authorization failed</h1><p>No authorization code was returned. Check the terminal for details.</p></body></html>";

async fn respond(stream: &mut TcpStream, status: u16, reason: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}
