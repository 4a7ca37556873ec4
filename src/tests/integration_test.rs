use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::codec::decode_remaining_length;
use crate::{ConnectReturnCode, Error, QoS, Result, Session, SessionState};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn broker() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("tcp://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Reads one whole packet (fixed header included) as the broker sees it.
async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut frame = vec![stream.read_u8().await.unwrap()];
    let len = loop {
        frame.push(stream.read_u8().await.unwrap());
        if let Some((len, _)) = decode_remaining_length(&frame[1..]).unwrap() {
            break len;
        }
    };
    let start = frame.len();
    frame.resize(start + len, 0);
    stream.read_exact(&mut frame[start..]).await.unwrap();
    frame
}

fn spawn_connect(
    session: Arc<Session>,
    cancel: CancellationToken,
    url: &str,
) -> JoinHandle<Result<()>> {
    let url = url.to_string();
    tokio::spawn(async move { session.connect(cancel, &url).await })
}

/// Accepts the client, returns its CONNECT bytes and answers with `connack`.
async fn accept(listener: &TcpListener, connack: [u8; 2]) -> (TcpStream, Vec<u8>) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let connect = read_frame(&mut stream).await;
    stream
        .write_all(&[0x20, 0x02, connack[0], connack[1]])
        .await
        .unwrap();
    (stream, connect)
}

#[tokio::test]
async fn lifecycle_bytes_match_the_wire_format() {
    let (listener, url) = broker().await;
    let session = Arc::new(Session::new("test"));
    let cancel = CancellationToken::new();
    let driver = spawn_connect(session.clone(), cancel.clone(), &url);

    // S1: connect
    let (mut stream, connect) = accept(&listener, [0x00, 0x00]).await;
    assert_eq!(
        connect,
        vec![
            0x10, 16, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x0A, 0x00, 0x04,
            b't', b'e', b's', b't',
        ]
    );
    assert_eq!(session.ready().await, SessionState::Connected);

    // S2: publish
    session.publish("test", "test").await.unwrap();
    let publish = read_frame(&mut stream).await;
    assert_eq!(
        publish,
        vec![0x30, 10, 0x00, 0x04, b't', b'e', b's', b't', 0x74, 0x65, 0x73, 0x74]
    );

    // S3: subscribe, ids 1 then 2
    assert_eq!(session.subscribe("test/", QoS::AtMostOnce).await.unwrap(), 1);
    let subscribe = read_frame(&mut stream).await;
    assert_eq!(
        subscribe,
        vec![0x82, 10, 0x00, 0x01, 0x00, 0x05, b't', b'e', b's', b't', b'/', 0x00]
    );
    assert_eq!(session.subscribe("test/", QoS::AtMostOnce).await.unwrap(), 2);
    let subscribe = read_frame(&mut stream).await;
    assert_eq!(&subscribe[2..4], &[0x00, 0x02]);

    // S4: disconnect
    session.disconnect().await.unwrap();
    assert_eq!(read_frame(&mut stream).await, vec![0xE0, 0x00]);

    cancel.cancel();
    let res = tokio::time::timeout(TIMEOUT, driver).await.unwrap().unwrap();
    assert!(res.is_ok());
}

#[tokio::test]
async fn cancelling_an_idle_session_returns_ok() {
    let (listener, url) = broker().await;
    let session = Arc::new(Session::new("idle"));
    let cancel = CancellationToken::new();
    let driver = spawn_connect(session.clone(), cancel.clone(), &url);

    let (mut stream, _) = accept(&listener, [0x00, 0x00]).await;
    assert_eq!(session.ready().await, SessionState::Connected);

    cancel.cancel();
    let res = tokio::time::timeout(TIMEOUT, driver).await.unwrap().unwrap();
    assert!(res.is_ok());
    assert_eq!(session.state(), SessionState::Closed);

    // the transport is closed, so the broker sees EOF
    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    assert!(matches!(
        session.publish("t", "late").await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn cancelling_while_awaiting_connack_returns_ok() {
    let (listener, url) = broker().await;
    let session = Arc::new(Session::new("silent"));
    let cancel = CancellationToken::new();
    let driver = spawn_connect(session.clone(), cancel.clone(), &url);

    // read CONNECT and never answer
    let (mut stream, _) = listener.accept().await.unwrap();
    read_frame(&mut stream).await;
    assert_eq!(session.state(), SessionState::Connecting);

    cancel.cancel();
    let res = tokio::time::timeout(TIMEOUT, driver).await.unwrap().unwrap();
    assert!(res.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.ready().await, SessionState::Closed);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(TIMEOUT, stream.read(&mut buf)).await.unwrap();
    assert_eq!(read.unwrap(), 0);
    assert!(matches!(
        session.publish("t", "late").await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn connect_rejects_bad_urls_and_dead_endpoints() {
    let session = Session::new("s6");
    assert!(matches!(
        session
            .connect(CancellationToken::new(), "udp://localhost:1883")
            .await,
        Err(Error::UnsupportedScheme(_))
    ));
    assert!(matches!(
        session.connect(CancellationToken::new(), "notaurl").await,
        Err(Error::InvalidUrl(_))
    ));

    let (listener, url) = broker().await;
    drop(listener);
    assert!(matches!(
        session.connect(CancellationToken::new(), &url).await,
        Err(Error::TransportDial { .. })
    ));
}

#[tokio::test]
async fn refused_connack_codes_map_to_reasons() {
    let cases = [
        (1, ConnectReturnCode::UnacceptableProtocolVersion),
        (2, ConnectReturnCode::IdentifierRejected),
        (3, ConnectReturnCode::ServerUnavailable),
        (4, ConnectReturnCode::BadCredentials),
        (5, ConnectReturnCode::NotAuthorized),
        (42, ConnectReturnCode::Unknown(42)),
    ];
    for (code, expected) in cases {
        let (listener, url) = broker().await;
        let session = Arc::new(Session::new("refused"));
        let driver = spawn_connect(session.clone(), CancellationToken::new(), &url);
        let _conn = accept(&listener, [0x00, code]).await;

        let res = tokio::time::timeout(TIMEOUT, driver).await.unwrap().unwrap();
        match res {
            Err(Error::ConnectionRefused(reason)) => assert_eq!(reason, expected),
            other => panic!("code {code}: expected refusal, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Closed);
    }
}

#[tokio::test]
async fn accepted_connack_with_session_present_is_ok() {
    let (listener, url) = broker().await;
    let session = Arc::new(Session::new("present"));
    let cancel = CancellationToken::new();
    let driver = spawn_connect(session.clone(), cancel.clone(), &url);

    let _conn = accept(&listener, [0x01, 0x00]).await;
    assert_eq!(session.ready().await, SessionState::Connected);

    cancel.cancel();
    assert!(
        tokio::time::timeout(TIMEOUT, driver)
            .await
            .unwrap()
            .unwrap()
            .is_ok()
    );
}

#[tokio::test]
async fn malformed_connack_is_rejected() {
    let (listener, url) = broker().await;
    let session = Arc::new(Session::new("malformed"));
    let driver = spawn_connect(session.clone(), CancellationToken::new(), &url);

    let (mut stream, _) = listener.accept().await.unwrap();
    read_frame(&mut stream).await;
    stream.write_all(&[0x20, 0x03, 0x00, 0x00]).await.unwrap();

    let res = tokio::time::timeout(TIMEOUT, driver).await.unwrap().unwrap();
    assert!(matches!(res, Err(Error::MalformedPacket(_))));
}

#[tokio::test]
async fn inbound_publishes_reach_the_handler_in_order() {
    let (listener, url) = broker().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new("sub");
    session.on_publish(move |publish| {
        let _ = tx.send((publish.topic, publish.payload));
    });
    let session = Arc::new(session);
    let cancel = CancellationToken::new();
    let driver = spawn_connect(session.clone(), cancel.clone(), &url);

    let (mut stream, _) = accept(&listener, [0x00, 0x00]).await;
    stream
        .write_all(&[
            0x30, 0x05, 0x00, 0x01, b'a', b'1', b'1', // PUBLISH a
            0x90, 0x03, 0x00, 0x01, 0x00, // SUBACK, not decoded
            0x30, 0x04, 0x00, 0x01, b'b', 0x00, // PUBLISH b, zero byte payload
        ])
        .await
        .unwrap();

    let (topic, payload) = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(topic, "a");
    assert_eq!(&payload[..], b"11");
    let (topic, payload) = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(topic, "b");
    assert_eq!(&payload[..], &[0x00]);

    cancel.cancel();
    assert!(
        tokio::time::timeout(TIMEOUT, driver)
            .await
            .unwrap()
            .unwrap()
            .is_ok()
    );
}

#[tokio::test]
async fn broker_hangup_ends_the_session_quietly() {
    let (listener, url) = broker().await;
    let session = Arc::new(Session::new("hangup"));
    let driver = spawn_connect(session.clone(), CancellationToken::new(), &url);

    let (stream, _) = accept(&listener, [0x00, 0x00]).await;
    assert_eq!(session.ready().await, SessionState::Connected);
    drop(stream);

    let res = tokio::time::timeout(TIMEOUT, driver).await.unwrap().unwrap();
    assert!(res.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn concurrent_publishes_are_never_interleaved() {
    let (listener, url) = broker().await;
    let session = Arc::new(Session::new("burst"));
    let cancel = CancellationToken::new();
    let driver = spawn_connect(session.clone(), cancel.clone(), &url);

    let (mut stream, _) = accept(&listener, [0x00, 0x00]).await;
    assert_eq!(session.ready().await, SessionState::Connected);

    let senders: Vec<_> = (0..16u8)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move {
                let payload = vec![i; 300];
                session.publish(&format!("burst/{i}"), payload).await
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap().unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..16 {
        let frame = read_frame(&mut stream).await;
        assert_eq!(frame[0], 0x30);
        let body = &frame[3..]; // 2-byte remaining length for these sizes
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let topic = std::str::from_utf8(&body[2..2 + topic_len]).unwrap();
        let i: u8 = topic.trim_start_matches("burst/").parse().unwrap();
        let payload = &body[2 + topic_len..];
        assert_eq!(payload.len(), 300);
        assert!(payload.iter().all(|&b| b == i));
        seen.push(i);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..16u8).collect::<Vec<_>>());

    cancel.cancel();
    let _ = tokio::time::timeout(TIMEOUT, driver).await.unwrap();
}
