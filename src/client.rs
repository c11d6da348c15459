//! WebSocket clients for the relay
//!
//! [`BroadcastClient`] pushes encoded frames and the end-of-stream notice.
//! [`listen`] pumps a listener connection into a playout session.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{Error, PlayoutError, RelayError, Result};
use crate::playout::SessionIngress;
use crate::protocol::{encode, ControlMessage, Frame, CLOSE_PRODUCER_CONFLICT};
use crate::relay::ConnectParams;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Full connect URL for a relay endpoint and parameters
pub fn connect_url(endpoint: &str, params: &ConnectParams) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}{}", endpoint, sep, params.to_query())
}

/// Open a WebSocket to the relay
pub async fn connect(endpoint: &str, params: &ConnectParams) -> Result<WsStream> {
    let url = connect_url(endpoint, params);
    let (ws, _response) = connect_async(url.as_str()).await?;
    info!("Connected to {} as {}", endpoint, params.role);
    Ok(ws)
}

fn close_error(code: Option<u16>, stream_id: u32) -> Error {
    match code {
        Some(CLOSE_PRODUCER_CONFLICT) => RelayError::ProducerConflict { stream_id }.into(),
        other => Error::ConnectionClosed(other),
    }
}

/// Producer side of one stream
pub struct BroadcastClient {
    stream_id: u32,
    sink: SplitSink<WsStream, Message>,
    closed: watch::Receiver<Option<Option<u16>>>,
    reader: JoinHandle<()>,
}

impl BroadcastClient {
    pub async fn connect(endpoint: &str, stream_id: u32) -> Result<Self> {
        let ws = connect(endpoint, &ConnectParams::broadcaster(stream_id)).await?;
        let (sink, stream) = ws.split();
        let (closed_tx, closed) = watch::channel(None);
        let reader = tokio::spawn(watch_close(stream, closed_tx));

        Ok(Self {
            stream_id,
            sink,
            closed,
            reader,
        })
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Close code from the relay, once the connection has closed
    pub fn close_code(&self) -> Option<Option<u16>> {
        *self.closed.borrow()
    }

    /// Wait until the relay closes the connection or `timeout` passes
    pub async fn wait_closed(&mut self, timeout: Duration) -> Option<Option<u16>> {
        if tokio::time::timeout(timeout, self.closed.wait_for(Option::is_some))
            .await
            .is_err()
        {
            debug!("Stream {} still open after {:?}", self.stream_id, timeout);
        }
        self.close_code()
    }

    fn check_open(&self) -> Result<()> {
        match self.close_code() {
            Some(code) => Err(close_error(code, self.stream_id)),
            None => Ok(()),
        }
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.check_open()?;
        let data = encode(frame)?;
        self.sink.send(Message::Binary(data.to_vec())).await?;
        Ok(())
    }

    pub async fn send_control(&mut self, msg: &ControlMessage) -> Result<()> {
        self.check_open()?;
        self.sink.send(Message::Text(msg.to_text())).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        let result = self.sink.close().await;
        self.reader.abort();
        result.map_err(Into::into)
    }
}

async fn watch_close(mut stream: SplitStream<WsStream>, closed: watch::Sender<Option<Option<u16>>>) {
    let mut code = None;
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(frame)) => {
                code = frame.map(|f| u16::from(f.code));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Broadcast connection error: {}", e);
                code = Some(u16::from(CloseCode::Abnormal));
                break;
            }
        }
    }
    if closed.send(Some(code)).is_err() {
        debug!("Broadcast client dropped before close code {:?}", code);
    }
}

/// Counters for one listener connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenReport {
    pub frames: u64,
    pub controls: u64,
    pub rejected: u64,
}

/// Feed a listener connection into a playout session
///
/// Returns when the relay closes the socket or the session starts stopping.
pub async fn listen(
    endpoint: &str,
    params: &ConnectParams,
    ingress: SessionIngress,
) -> Result<ListenReport> {
    let mut ws = connect(endpoint, params).await?;
    let mut report = ListenReport::default();
    let mut stop_check = tokio::time::interval(Duration::from_millis(100));

    loop {
        let msg = tokio::select! {
            msg = ws.next() => msg,
            _ = stop_check.tick() => {
                if ingress.is_stopping() {
                    break;
                }
                continue;
            }
        };

        let Some(msg) = msg else { break };
        match msg? {
            Message::Binary(data) => match ingress.ingest_binary(&data) {
                Ok(()) => report.frames += 1,
                Err(Error::Playout(PlayoutError::Stopped)) => break,
                Err(e) => {
                    report.rejected += 1;
                    debug!("Frame rejected: {}", e);
                }
            },
            Message::Text(text) => match ingress.ingest_text(&text) {
                Ok(control) => {
                    report.controls += 1;
                    info!("Received {:?}", control);
                }
                Err(e) => debug!("Ignored text message: {}", e),
            },
            Message::Close(frame) => {
                let code = frame.map(|f| u16::from(f.code));
                if code != Some(u16::from(CloseCode::Normal)) && code.is_some() {
                    warn!("Relay closed listener connection with code {:?}", code);
                }
                break;
            }
            _ => {}
        }
    }

    if let Err(e) = ws.close(None).await {
        debug!("Listener close handshake failed: {}", e);
    }
    Ok(report)
}
