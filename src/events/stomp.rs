//! Minimal STOMP 1.2 client over WebSocket
//!
//! Only what the push channel needs: CONNECT, SUBSCRIBE to one destination,
//! then a stream of MESSAGE bodies. Heart-beats are disabled in the CONNECT
//! handshake; stray EOL heart-beats from the server are skipped anyway.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use super::push::{FrameStream, PushTransport};

const NUL: char = '\0';

/// One STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First value of a header (repeated headers: first one wins)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize, NUL-terminated. CONNECT headers are not escaped.
    pub fn encode(&self) -> String {
        let escape = self.command != "CONNECT" && self.command != "CONNECTED";
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Parse every frame in a text payload. Heart-beat EOLs are skipped.
    pub fn decode_all(text: &str) -> Result<Vec<StompFrame>, StompError> {
        let mut frames = Vec::new();
        let mut rest = text;
        loop {
            rest = rest.trim_start_matches(['\r', '\n']);
            if rest.is_empty() {
                break;
            }
            let (frame, remaining) = Self::decode_one(rest)?;
            frames.push(frame);
            rest = remaining;
        }
        Ok(frames)
    }

    fn decode_one(text: &str) -> Result<(StompFrame, &str), StompError> {
        let (head, after_head) = split_head(text).ok_or(StompError::Truncated)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command = lines.next().unwrap_or_default().to_string();
        if command.is_empty() {
            return Err(StompError::MissingCommand);
        }
        let unescape = command != "CONNECT" && command != "CONNECTED";

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::BadHeader(line.to_string()))?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = StompFrame {
            command,
            headers,
            body: String::new(),
        };

        let content_length = frame
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok());
        let (body, remaining) = match content_length {
            Some(len) => {
                if after_head.len() < len || !after_head.is_char_boundary(len) {
                    return Err(StompError::Truncated);
                }
                let (body, tail) = after_head.split_at(len);
                (body, tail.strip_prefix(NUL).ok_or(StompError::Truncated)?)
            }
            None => {
                let end = after_head.find(NUL).ok_or(StompError::Truncated)?;
                (&after_head[..end], &after_head[end + 1..])
            }
        };
        frame.body = body.to_string();
        Ok((frame, remaining))
    }
}

/// Split at the blank line ending the headers (LF or CRLF).
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let (idx, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&text[..idx], &text[idx + sep..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(StompError::BadEscape(format!(
                    "\\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Malformed STOMP input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StompError {
    #[error("frame is truncated")]
    Truncated,
    #[error("frame has no command")]
    MissingCommand,
    #[error("malformed header line: {0}")]
    BadHeader(String),
    #[error("invalid escape sequence {0}")]
    BadEscape(String),
}

/// Push transport speaking STOMP over a plain WebSocket.
#[derive(Debug, Clone)]
pub struct StompTransport {
    url: url::Url,
    destination: String,
}

impl StompTransport {
    /// `url` is the WebSocket endpoint, `destination` the topic to subscribe to.
    pub fn new(url: &str, destination: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(url)
            .map_err(|e| anyhow::anyhow!("Invalid push URL {}: {}", url, e))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            anyhow::bail!("Push URL must use ws:// or wss://, got {}", url);
        }
        Ok(Self {
            url,
            destination: destination.to_string(),
        })
    }

    fn connect_frame(&self) -> StompFrame {
        let host = self.url.host_str().unwrap_or("localhost").to_string();
        StompFrame::new("CONNECT")
            .header("accept-version", "1.2,1.1")
            .header("host", &host)
            .header("heart-beat", "0,0")
    }

    fn subscribe_frame(&self) -> StompFrame {
        StompFrame::new("SUBSCRIBE")
            .header("id", "sub-0")
            .header("destination", &self.destination)
            .header("ack", "auto")
    }
}

#[async_trait]
impl PushTransport for StompTransport {
    async fn connect(&self) -> anyhow::Result<FrameStream> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;

        ws.send(Message::Text(self.connect_frame().encode())).await?;

        // Wait for CONNECTED before subscribing.
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frames = StompFrame::decode_all(&text)?;
                    if let Some(error) = frames.iter().find(|f| f.command == "ERROR") {
                        anyhow::bail!(
                            "STOMP server refused connection: {}",
                            error.get("message").unwrap_or(error.body.as_str())
                        );
                    }
                    if frames.iter().any(|f| f.command == "CONNECTED") {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    anyhow::bail!("Connection closed during STOMP handshake")
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }

        ws.send(Message::Text(self.subscribe_frame().encode())).await?;
        info!(url = %self.url, destination = %self.destination, "STOMP subscription active");

        let stream = futures::stream::unfold(Some(ws), |state| async move {
            let mut ws = state?;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match StompFrame::decode_all(&text) {
                            Ok(frames) => {
                                let mut bodies: Vec<anyhow::Result<String>> = Vec::new();
                                for frame in frames {
                                    match frame.command.as_str() {
                                        "MESSAGE" => bodies.push(Ok(frame.body)),
                                        "ERROR" => bodies.push(Err(anyhow::anyhow!(
                                            "STOMP ERROR frame: {}",
                                            frame.get("message").unwrap_or(frame.body.as_str())
                                        ))),
                                        other => debug!(command = %other, "Ignoring STOMP frame"),
                                    }
                                }
                                if !bodies.is_empty() {
                                    let done = bodies.iter().any(|b| b.is_err());
                                    return Some((bodies, if done { None } else { Some(ws) }));
                                }
                            }
                            Err(e) => {
                                return Some((vec![Err(anyhow::Error::from(e))], None));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some((vec![Err(anyhow::Error::from(e))], None)),
                }
            }
        })
        .flat_map(futures::stream::iter);

        Ok(stream.boxed())
    }
}
