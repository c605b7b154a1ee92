use crate::channel::{CloseInfo, Connector, SocketEvent, SocketLink};
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace};

/// Socket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn launch(&self, url: &str, link: SocketLink) -> Option<JoinHandle<()>> {
        let url = url.to_string();
        Some(tokio::spawn(run_socket(url, link)))
    }
}

async fn run_socket(url: String, link: SocketLink) {
    let SocketLink {
        mut outbound,
        events,
    } = link;

    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(error) => {
            let _ = events.send(SocketEvent::Failed(format!("connect failed: {error}")));
            return;
        }
    };
    if events.send(SocketEvent::Opened).is_err() {
        return;
    }

    let (mut write_half, mut read_half) = socket.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!("outbound queue dropped, closing socket");
                    let _ = write_half.send(WsMessage::Close(None)).await;
                    while let Some(Ok(message)) = read_half.next().await {
                        if message.is_close() {
                            break;
                        }
                    }
                    return;
                };
                if let Err(error) = write_half.send(outbound_message(frame)).await {
                    let _ = events.send(SocketEvent::Failed(format!("send failed: {error}")));
                    return;
                }
            }
            message = read_half.next() => {
                let Some(event) = inbound_event(message) else {
                    continue;
                };
                let terminal = !matches!(event, SocketEvent::Message(_));
                if events.send(event).is_err() || terminal {
                    return;
                }
            }
        }
    }
}

fn outbound_message(frame: Vec<u8>) -> WsMessage {
    match String::from_utf8(frame) {
        Ok(text) => WsMessage::Text(text.into()),
        Err(error) => WsMessage::Binary(error.into_bytes().into()),
    }
}

fn inbound_event(
    message: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
) -> Option<SocketEvent> {
    let message = match message {
        Some(Ok(message)) => message,
        Some(Err(error)) => return Some(SocketEvent::Failed(format!("receive failed: {error}"))),
        None => return Some(SocketEvent::Closed(CloseInfo::default())),
    };

    match message {
        WsMessage::Text(text) => Some(SocketEvent::Message(text.as_str().as_bytes().to_vec())),
        WsMessage::Binary(data) => Some(SocketEvent::Message(data.to_vec())),
        WsMessage::Close(frame) => {
            let info = frame
                .map(|frame| CloseInfo {
                    code: Some(u16::from(frame.code)),
                    reason: frame.reason.as_str().to_string(),
                })
                .unwrap_or_default();
            Some(SocketEvent::Closed(info))
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
            trace!("skipping control frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{WsConnector, inbound_event, outbound_message};
    use crate::channel::{CloseInfo, Connector, SocketEvent, SocketLink};
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn utf8_frames_go_out_as_text() {
        assert!(matches!(outbound_message(b"ls\r".to_vec()), WsMessage::Text(_)));
        assert!(matches!(
            outbound_message(vec![0xff, 0x00]),
            WsMessage::Binary(_)
        ));
    }

    #[test]
    fn close_frame_keeps_code_and_reason() {
        let event = inbound_event(Some(Ok(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "pod terminated".into(),
        })))));
        assert_eq!(
            event,
            Some(SocketEvent::Closed(CloseInfo {
                code: Some(1001),
                reason: "pod terminated".to_string(),
            }))
        );
    }

    #[test]
    fn stream_end_counts_as_close_and_pings_are_skipped() {
        assert_eq!(
            inbound_event(None),
            Some(SocketEvent::Closed(CloseInfo::default()))
        );
        assert_eq!(inbound_event(Some(Ok(WsMessage::Ping(Vec::new().into())))), None);
        assert_eq!(
            inbound_event(Some(Ok(WsMessage::Text("hi".to_string().into())))),
            Some(SocketEvent::Message(b"hi".to_vec()))
        );
    }

    fn link() -> (
        SocketLink,
        mpsc::UnboundedSender<Vec<u8>>,
        mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = SocketLink {
            outbound: outbound_rx,
            events: events_tx,
        };
        (link, outbound_tx, events_rx)
    }

    #[tokio::test]
    async fn secure_urls_attempt_a_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let (link, _outbound, mut events) = link();
        let task = WsConnector
            .launch(&format!("wss://127.0.0.1:{port}/ws/logs"), link)
            .expect("socket task");
        let event = events.recv().await.expect("socket event");
        task.await.expect("socket task finished");

        let SocketEvent::Failed(reason) = event else {
            panic!("expected a failed handshake, got {event:?}");
        };
        assert!(!reason.contains("TLS support not compiled in"), "{reason}");
    }

    #[tokio::test]
    async fn dropping_the_outbound_queue_sends_a_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = accept_async(stream).await.expect("handshake");
            let mut received = Vec::new();
            while let Some(Ok(message)) = socket.next().await {
                let is_close = message.is_close();
                received.push(message);
                if is_close {
                    break;
                }
            }
            received
        });

        let (link, outbound, mut events) = link();
        let task = WsConnector
            .launch(&format!("ws://127.0.0.1:{port}/ws/terminal"), link)
            .expect("socket task");
        assert_eq!(events.recv().await, Some(SocketEvent::Opened));
        outbound.send(b"ls\r".to_vec()).expect("queue frame");
        drop(outbound);

        let received = server.await.expect("server task");
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], WsMessage::Text("ls\r".to_string().into()));
        assert!(received[1].is_close());
        task.await.expect("socket task finished");
    }
}
