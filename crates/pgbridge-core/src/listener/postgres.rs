use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::StreamExt;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_postgres::config::SslMode;
use tokio_postgres::{AsyncMessage, Client, Config, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

use super::{NotificationSource, RawNotification, SourceHandle, SourceSession};
use crate::error::{ConfigError, ListenerError};

/// PostgreSQL `LISTEN`/`NOTIFY` source.
///
/// Accepts both `postgres://` URLs and libpq `key=value` strings. TLS is
/// negotiated unless the string carries `sslmode=disable`; with the default
/// `prefer` a server without SSL support is still reached in plain text.
#[derive(Debug, Clone)]
pub struct PgSource {
    uri: String,
    config: Config,
}

impl PgSource {
    pub fn parse(uri: impl Into<String>) -> Result<Self, ConfigError> {
        let uri = uri.into();
        let config = uri
            .parse::<Config>()
            .map_err(|e| ConfigError::InvalidConnectionString(e.to_string()))?;
        if config.get_hosts().is_empty() {
            return Err(ConfigError::InvalidConnectionString("no host given".into()));
        }
        Ok(Self { uri, config })
    }

    /// Whether connections go through the TLS connector.
    pub fn wants_tls(&self) -> bool {
        self.config.get_ssl_mode() != SslMode::Disable
    }
}

#[async_trait]
impl NotificationSource for PgSource {
    fn describe(&self) -> String {
        redact_uri(&self.uri)
    }

    async fn connect(&self) -> Result<SourceSession, ListenerError> {
        let (tx, rx) = mpsc::unbounded();
        let client = if self.wants_tls() {
            let (client, connection) = self
                .config
                .connect(tls_connector()?)
                .await
                .map_err(|e| ListenerError::Connection(e.to_string()))?;
            tokio::spawn(drive_connection(connection, tx));
            client
        } else {
            let (client, connection) = self
                .config
                .connect(NoTls)
                .await
                .map_err(|e| ListenerError::Connection(e.to_string()))?;
            tokio::spawn(drive_connection(connection, tx));
            client
        };

        let handle = PgHandle { client };
        handle
            .ping()
            .await
            .map_err(|e| ListenerError::Connection(e.to_string()))?;

        Ok(SourceSession {
            handle: Arc::new(handle),
            notifications: rx.boxed(),
        })
    }
}

/// rustls connector trusting the Mozilla root set, the same roots reqwest
/// uses for webhooks.
fn tls_connector() -> Result<MakeRustlsConnect, ListenerError> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ListenerError::Connection(format!("cannot set up TLS: {}", e)))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

struct PgHandle {
    client: Client,
}

#[async_trait]
impl SourceHandle for PgHandle {
    async fn listen(&self, channel: &str) -> Result<(), ListenerError> {
        self.client
            .batch_execute(&format!("LISTEN {}", quote_ident(channel)))
            .await
            .map_err(|e| ListenerError::Subscription {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    async fn ping(&self) -> Result<(), ListenerError> {
        if self.client.is_closed() {
            return Err(ListenerError::Probe("connection closed".into()));
        }
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| ListenerError::Probe(e.to_string()))
    }
}

/// Polls the connection so that client queries make progress, forwarding
/// notifications. Ends when the server goes away or every client is dropped.
async fn drive_connection<T>(
    mut connection: Connection<Socket, T>,
    tx: UnboundedSender<Result<RawNotification, ListenerError>>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
    futures::pin_mut!(messages);

    while let Some(message) = messages.next().await {
        match message {
            Ok(AsyncMessage::Notification(n)) => {
                let raw = RawNotification {
                    channel: n.channel().to_string(),
                    payload: n.payload().to_string(),
                };
                if tx.unbounded_send(Ok(raw)).is_err() {
                    break;
                }
            }
            Ok(AsyncMessage::Notice(notice)) => {
                debug!(notice = %notice.message(), "PostgreSQL notice");
            }
            Ok(_) => {}
            Err(e) => {
                let _ = tx.unbounded_send(Err(ListenerError::ConnectionLost(e.to_string())));
                break;
            }
        }
    }

    debug!("PostgreSQL connection driver finished");
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Hides credentials: URL userinfo, and any `password` parameter in either
/// the URL query or a `key=value` string.
fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return redact_key_values(uri);
    };
    let (scheme, rest) = (&uri[..scheme_end], &uri[scheme_end + 3..]);
    let (authority, tail) = match rest.find(|c: char| c == '/' || c == '?') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    match tail.split_once('?') {
        Some((path, query)) => {
            let query: Vec<&str> = query
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some(("password", _)) => "password=***",
                    _ => pair,
                })
                .collect();
            format!("{}://{}{}?{}", scheme, host, path, query.join("&"))
        }
        None => format!("{}://{}{}", scheme, host, tail),
    }
}

fn redact_key_values(conn: &str) -> String {
    let mut parts = Vec::new();
    let mut chars = conn.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next_if_eq(&'=').is_none() {
            parts.push(key);
            continue;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            value.push('\'');
            while let Some(c) = chars.next() {
                value.push(c);
                match c {
                    '\\' => value.extend(chars.next()),
                    '\'' => break,
                    _ => {}
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
                if c == '\\' {
                    value.extend(chars.next());
                }
            }
        }

        if key == "password" {
            value = "***".to_string();
        }
        parts.push(format!("{}={}", key, value));
    }
    parts.join(" ")
}
