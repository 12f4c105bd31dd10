//! Stdio side of the protocol bridge
//!
//! Pumps messages between the HTTP proxy and a container's standard
//! streams: a dispatcher task serializes client messages onto stdin one
//! line at a time, and a reader task splits stdout into lines, parses each
//! as JSON-RPC, and fans the result out to the connected SSE clients.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::jsonrpc::{self, JsonRpcMessage};
use crate::proxy::{HttpSseProxy, Middleware};

const READ_BUFFER_SIZE: usize = 4096;

/// A running bridge between HTTP/SSE clients and one container's stdio.
pub struct StdioBridge {
    proxy: Arc<HttpSseProxy>,
    container_name: String,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl StdioBridge {
    /// Start the bridge: bring up the HTTP proxy and spawn the two stdio
    /// pump tasks. Returns once the proxy is accepting connections.
    pub async fn start<W, R>(
        port: u16,
        container_name: &str,
        stdin: W,
        stdout: R,
        middlewares: Vec<Middleware>,
    ) -> Result<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let proxy = Arc::new(HttpSseProxy::new(port, container_name, middlewares));
        proxy.start().await?;

        let (shutdown_tx, _) = watch::channel(false);

        let message_rx = proxy
            .take_message_receiver()
            .ok_or(crate::error::TransportError::Shutdown)?;

        let dispatcher = tokio::spawn(dispatch_to_container(
            container_name.to_string(),
            stdin,
            message_rx,
            shutdown_tx.subscribe(),
        ));
        let reader = tokio::spawn(read_from_container(
            container_name.to_string(),
            stdout,
            proxy.clone(),
            shutdown_tx.subscribe(),
        ));

        Ok(Self {
            proxy,
            container_name: container_name.to_string(),
            shutdown_tx,
            dispatcher: Some(dispatcher),
            reader: Some(reader),
        })
    }

    /// The HTTP proxy backing this bridge
    pub fn proxy(&self) -> Arc<HttpSseProxy> {
        self.proxy.clone()
    }

    /// Stop the bridge: shut the HTTP server, signal both pump tasks, and
    /// wait up to `deadline` for them before aborting.
    pub async fn stop(&mut self, deadline: Duration) {
        tracing::info!(container = %self.container_name, "stopping bridge");
        let _ = self.shutdown_tx.send(true);
        self.proxy.stop(deadline).await;

        for task in [self.dispatcher.take(), self.reader.take()]
            .into_iter()
            .flatten()
        {
            let mut task = task;
            if tokio::time::timeout(deadline, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

// Drain the inbound channel and write each message to container stdin,
// newline terminated. Writes are serialized here, so concurrent POSTs
// interleave at the channel but never on the stream.
async fn dispatch_to_container<W>(
    container_name: String,
    mut stdin: W,
    mut message_rx: tokio::sync::mpsc::Receiver<JsonRpcMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            maybe_msg = message_rx.recv() => {
                let Some(msg) = maybe_msg else { break };
                if let Err(err) = write_message(&mut stdin, &msg).await {
                    tracing::error!(container = %container_name, error = %err, "failed to write to container stdin");
                }
            }
        }
    }
    tracing::debug!(container = %container_name, "stdin dispatcher stopped");
}

async fn write_message<W>(stdin: &mut W, msg: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut line = msg.to_line()?.into_bytes();
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

// Accumulate container stdout into a line buffer; parse each complete line
// as JSON-RPC and fan it out. Parse failures are logged and dropped so one
// noisy line never stalls the stream.
async fn read_from_container<R>(
    container_name: String,
    mut stdout: R,
    proxy: Arc<HttpSseProxy>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            read = stdout.read(&mut chunk) => {
                match read {
                    Ok(0) => {
                        tracing::info!(container = %container_name, "container stdout closed");
                        break;
                    }
                    Ok(n) => {
                        buffer.extend_from_slice(&chunk[..n]);
                        process_buffer(&container_name, &mut buffer, &proxy);
                    }
                    Err(err) => {
                        tracing::error!(container = %container_name, error = %err, "error reading container stdout");
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!(container = %container_name, "stdout reader stopped");
}

fn process_buffer(container_name: &str, buffer: &mut Vec<u8>, proxy: &HttpSseProxy) {
    while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
        let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
        let line = String::from_utf8_lossy(&line_bytes[..newline]);
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        match jsonrpc::parse_line(line) {
            Ok(msg) => {
                if let Err(err) = proxy.forward_to_clients(&msg) {
                    tracing::error!(container = %container_name, error = %err, "failed to forward message to clients");
                }
                if let Err(err) = proxy.send_response(msg) {
                    tracing::debug!(container = %container_name, error = %err, "response channel full, dropping copy");
                }
            }
            Err(err) => {
                tracing::warn!(container = %container_name, error = %err, line = %line, "dropping unparseable stdout line");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn started_bridge() -> (StdioBridge, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (stdin_writer, stdin_reader) = tokio::io::duplex(64 * 1024);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(64 * 1024);

        let bridge = StdioBridge::start(0, "fetch", stdin_writer, stdout_reader, Vec::new())
            .await
            .unwrap();
        (bridge, stdin_reader, stdout_writer)
    }

    #[tokio::test]
    async fn test_client_message_reaches_container_stdin() {
        use tokio::io::AsyncBufReadExt;

        let (bridge, stdin_reader, _stdout_writer) = started_bridge().await;
        let mut lines = tokio::io::BufReader::new(stdin_reader).lines();
        let addr = bridge.proxy().local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = client.into_split();

        // Open an SSE stream to obtain a session id
        write_half
            .write_all(b"GET /sse HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n")
            .await
            .unwrap();
        let mut sse_reader = tokio::io::BufReader::new(read_half);
        let mut session_id = None;
        loop {
            let mut line = String::new();
            sse_reader.read_line(&mut line).await.unwrap();
            if let Some(rest) = line.trim().strip_prefix("data: ") {
                if let Some((_, id)) = rest.split_once("session_id=") {
                    session_id = Some(id.trim().to_string());
                    break;
                }
            }
        }
        let session_id = session_id.unwrap();

        // POST a message against that session
        let post_client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_post_read, mut post_write) = post_client.into_split();
        let body = json!({"jsonrpc":"2.0","id":1,"method":"ping"}).to_string();
        let request = format!(
            "POST /messages?session_id={session_id} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nContent-Type: application/json\r\n\r\n{body}",
            body.len()
        );
        post_write.write_all(request.as_bytes()).await.unwrap();

        // The dispatcher serializes it onto container stdin
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("stdin write within deadline")
            .unwrap()
            .unwrap();
        let written: JsonRpcMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(written.method.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_container_output_reaches_response_channel() {
        let (mut bridge, _stdin_reader, mut stdout_writer) = started_bridge().await;
        let proxy = bridge.proxy();
        let mut response_rx = proxy.take_response_receiver().unwrap();

        stdout_writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":\"pong\"}\n")
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), response_rx.recv())
            .await
            .expect("message within deadline")
            .expect("one message");
        assert_eq!(msg.result, Some(json!("pong")));

        bridge.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_dirty_output_recovers_and_stream_continues() {
        let (mut bridge, _stdin_reader, mut stdout_writer) = started_bridge().await;
        let proxy = bridge.proxy();
        let mut response_rx = proxy.take_response_receiver().unwrap();

        stdout_writer
            .write_all(b"\x1b[1mstartup banner\x07\n")
            .await
            .unwrap();
        stdout_writer
            .write_all(b"\x07{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":\"ok\"}\x1b[0m\n")
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), response_rx.recv())
            .await
            .expect("message within deadline")
            .expect("one recovered message");
        assert_eq!(msg.id, Some(json!(2)));
        assert_eq!(msg.result, Some(json!("ok")));

        bridge.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_is_clean_after_eof() {
        let (mut bridge, _stdin_reader, stdout_writer) = started_bridge().await;
        drop(stdout_writer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        bridge.stop(Duration::from_secs(1)).await;
    }
}
