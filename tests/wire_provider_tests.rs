//! CloudSqlProvider against a scripted Postgres backend on a local listener

use bytes::{BufMut, BytesMut};
use cloudsql_connect::{
    CloudSqlProvider, ConnectTarget, Connector, DatabaseTarget, Error, InstanceEndpoints,
    InstanceRef, NetworkMode, PrincipalIdentity, ProxyEndpoint, SslMode, StaticToken,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const SSL_REQUEST_CODE: i32 = 80_877_103;

/// How the scripted backend answers startup
#[derive(Clone, Copy)]
enum Auth {
    /// AuthenticationOk straight away (auth proxy path)
    Trust,
    /// Cleartext password request; accept only this token
    Token(&'static str),
    /// MD5 password request
    Md5,
    /// Refuse the SSLRequest
    RefuseTls,
    /// Accept the SSLRequest but send plaintext auth right behind the `S`
    InjectAfterTls,
}

/// What the backend saw from the client
#[derive(Debug, Default)]
struct Seen {
    params: HashMap<String, String>,
    password: Option<String>,
    queries: Vec<String>,
    terminated: bool,
}

fn frame(tag: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(body.len() + 5);
    buf.put_u8(tag);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(body);
    buf
}

fn cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn auth_request(code: i32) -> BytesMut {
    frame(b'R', &code.to_be_bytes())
}

fn ready() -> BytesMut {
    frame(b'Z', b"I")
}

fn error_response(code: &str, message: &str) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(b'S');
    cstr(&mut body, "FATAL");
    body.put_u8(b'C');
    cstr(&mut body, code);
    body.put_u8(b'M');
    cstr(&mut body, message);
    body.put_u8(0);
    frame(b'E', &body)
}

fn single_int_result(value: &str) -> BytesMut {
    let mut out = BytesMut::new();

    let mut desc = BytesMut::new();
    desc.put_i16(1);
    cstr(&mut desc, "?column?");
    desc.put_i32(0);
    desc.put_i16(0);
    desc.put_i32(23);
    desc.put_i16(4);
    desc.put_i32(-1);
    desc.put_i16(0);
    out.extend_from_slice(&frame(b'T', &desc));

    let mut row = BytesMut::new();
    row.put_i16(1);
    row.put_i32(value.len() as i32);
    row.put_slice(value.as_bytes());
    out.extend_from_slice(&frame(b'D', &row));

    let mut complete = BytesMut::new();
    cstr(&mut complete, "SELECT 1");
    out.extend_from_slice(&frame(b'C', &complete));
    out.extend_from_slice(&ready());
    out
}

async fn read_untagged(sock: &mut TcpStream) -> Vec<u8> {
    let len = sock.read_i32().await.unwrap() as usize;
    let mut body = vec![0u8; len - 4];
    sock.read_exact(&mut body).await.unwrap();
    body
}

async fn read_tagged(sock: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let tag = sock.read_u8().await.ok()?;
    let len = sock.read_i32().await.ok()? as usize;
    let mut body = vec![0u8; len - 4];
    sock.read_exact(&mut body).await.ok()?;
    Some((tag, body))
}

fn parse_cstrs(data: &[u8]) -> Vec<String> {
    data.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Serve one connection following `auth`, then answer simple queries
async fn backend(auth: Auth) -> (u16, JoinHandle<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut seen = Seen::default();

        let mut startup = read_untagged(&mut sock).await;
        if i32::from_be_bytes([startup[0], startup[1], startup[2], startup[3]]) == SSL_REQUEST_CODE
        {
            if matches!(auth, Auth::InjectAfterTls) {
                let mut reply = BytesMut::from(&b"S"[..]);
                reply.extend_from_slice(&auth_request(0));
                sock.write_all(&reply).await.unwrap();
                // Hold the socket until the client gives up
                let _ = sock.read_u8().await;
                return seen;
            }
            sock.write_all(b"N").await.unwrap();
            if matches!(auth, Auth::RefuseTls) {
                return seen;
            }
            startup = read_untagged(&mut sock).await;
        }
        let pairs = parse_cstrs(&startup[4..]);
        for kv in pairs.chunks(2) {
            if let [k, v] = kv {
                seen.params.insert(k.clone(), v.clone());
            }
        }

        match auth {
            Auth::Trust | Auth::RefuseTls | Auth::InjectAfterTls => {}
            Auth::Md5 => {
                let mut body = BytesMut::new();
                body.put_i32(5);
                body.put_slice(&[1, 2, 3, 4]);
                sock.write_all(&frame(b'R', &body)).await.unwrap();
                let _ = read_tagged(&mut sock).await;
                return seen;
            }
            Auth::Token(expected) => {
                sock.write_all(&auth_request(3)).await.unwrap();
                let (tag, body) = read_tagged(&mut sock).await.unwrap();
                assert_eq!(tag, b'p');
                let password = parse_cstrs(&body).pop().unwrap_or_default();
                let accepted = password == expected;
                seen.password = Some(password);
                if !accepted {
                    sock.write_all(&error_response(
                        "28P01",
                        "password authentication failed for user",
                    ))
                    .await
                    .unwrap();
                    return seen;
                }
            }
        }

        let mut out = auth_request(0);
        let mut status = BytesMut::new();
        cstr(&mut status, "server_version");
        cstr(&mut status, "15.4");
        out.extend_from_slice(&frame(b'S', &status));
        let mut key = BytesMut::new();
        key.put_i32(4242);
        key.put_i32(7);
        out.extend_from_slice(&frame(b'K', &key));
        out.extend_from_slice(&ready());
        sock.write_all(&out).await.unwrap();

        while let Some((tag, body)) = read_tagged(&mut sock).await {
            match tag {
                b'Q' => {
                    let sql = parse_cstrs(&body).pop().unwrap_or_default();
                    seen.queries.push(sql.clone());
                    let reply = match sql.strip_prefix("SELECT ") {
                        Some(n) if n.parse::<i64>().is_ok() => single_int_result(n),
                        _ => {
                            let mut out = error_response("42601", "syntax error");
                            out.extend_from_slice(&ready());
                            out
                        }
                    };
                    sock.write_all(&reply).await.unwrap();
                }
                b'X' => {
                    seen.terminated = true;
                    break;
                }
                other => panic!("unexpected frontend message {}", other as char),
            }
        }
        seen
    });

    (port, handle)
}

fn instance() -> InstanceRef {
    "proj:region:inst".parse().unwrap()
}

fn target(mode: NetworkMode) -> ConnectTarget {
    ConnectTarget::new(
        instance(),
        PrincipalIdentity::parse("svc@proj.iam").unwrap(),
        DatabaseTarget::new("appdb").unwrap(),
        mode,
    )
}

fn proxy_provider(port: u16) -> CloudSqlProvider {
    CloudSqlProvider::builder()
        .instance(
            instance(),
            InstanceEndpoints::new().proxy(ProxyEndpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            }),
        )
        .build()
        .unwrap()
}

fn private_provider(port: u16, token: &str, sslmode: SslMode) -> CloudSqlProvider {
    CloudSqlProvider::builder()
        .instance(
            instance(),
            InstanceEndpoints::new()
                .private_address("127.0.0.1")
                .private_port(port),
        )
        .token_source(Arc::new(StaticToken::new(token)))
        .sslmode(sslmode)
        .connect_timeout(Some(Duration::from_secs(5)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_public_proxied_select_one() {
    let (port, server) = backend(Auth::Trust).await;
    let connector = Connector::new(Arc::new(proxy_provider(port)));

    let mut session = connector
        .acquire(&target(NetworkMode::PublicProxied))
        .await
        .expect("acquire");
    let value: i64 = session.query_scalar("SELECT 1").await.expect("query");
    assert_eq!(value, 1);
    connector.release(session).await.expect("release");
    connector.shutdown().await.expect("shutdown");

    let seen = server.await.unwrap();
    assert_eq!(seen.params.get("user").map(String::as_str), Some("svc@proj.iam"));
    assert_eq!(seen.params.get("database").map(String::as_str), Some("appdb"));
    assert_eq!(
        seen.params.get("application_name").map(String::as_str),
        Some("cloudsql-connect")
    );
    assert!(seen.password.is_none());
    assert_eq!(seen.queries, vec!["SELECT 1".to_string()]);
    assert!(seen.terminated);
}

#[tokio::test]
async fn test_private_sends_iam_token_as_password() {
    let (port, server) = backend(Auth::Token("ya29.good")).await;
    let connector = Connector::new(Arc::new(private_provider(
        port,
        "ya29.good",
        SslMode::Disable,
    )));

    let mut session = connector
        .acquire(&target(NetworkMode::PrivatePeered))
        .await
        .expect("acquire");
    assert_eq!(session.query_scalar::<i64>("SELECT 42").await.unwrap(), 42);
    connector.release(session).await.unwrap();
    connector.shutdown().await.unwrap();

    let seen = server.await.unwrap();
    assert_eq!(seen.password.as_deref(), Some("ya29.good"));
}

#[tokio::test]
async fn test_rejected_token_is_auth_error() {
    let (port, server) = backend(Auth::Token("ya29.good")).await;
    let connector = Connector::new(Arc::new(private_provider(
        port,
        "ya29.stale",
        SslMode::Disable,
    )));

    let result = connector.acquire(&target(NetworkMode::PrivatePeered)).await;
    match result {
        Err(Error::Auth(msg)) => assert!(msg.contains("28P01"), "{}", msg),
        other => panic!("expected Auth error, got {:?}", other.map(|s| s.id())),
    }
    assert_eq!(connector.outstanding(), 0);
    connector.shutdown().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_md5_request_is_auth_error() {
    let (port, server) = backend(Auth::Md5).await;
    let provider = private_provider(port, "ya29.good", SslMode::Disable);
    let connector = Connector::new(Arc::new(provider));

    let result = connector.acquire(&target(NetworkMode::PrivatePeered)).await;
    assert!(matches!(result, Err(Error::Auth(_))));
    drop(result);
    server.abort();
}

#[tokio::test]
async fn test_tls_refused_is_transport_error() {
    let (port, server) = backend(Auth::RefuseTls).await;
    let connector = Connector::new(Arc::new(private_provider(
        port,
        "ya29.good",
        SslMode::Require,
    )));

    let result = connector.acquire(&target(NetworkMode::PrivatePeered)).await;
    assert!(matches!(result, Err(Error::Transport(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn test_plaintext_after_tls_accept_is_rejected() {
    let (port, server) = backend(Auth::InjectAfterTls).await;
    let connector = Connector::new(Arc::new(private_provider(
        port,
        "ya29.good",
        SslMode::Require,
    )));

    let result = connector.acquire(&target(NetworkMode::PrivatePeered)).await;
    assert!(matches!(result, Err(Error::Protocol(_))), "{:?}", result.map(|s| s.id()));
    assert_eq!(connector.outstanding(), 0);
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_private_address_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let connector = Connector::new(Arc::new(private_provider(
        port,
        "ya29.good",
        SslMode::Disable,
    )));
    let result = connector.acquire(&target(NetworkMode::PrivatePeered)).await;
    assert!(matches!(result, Err(Error::Transport(_))));
    connector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sql_error_keeps_session_usable() {
    let (port, server) = backend(Auth::Trust).await;
    let connector = Connector::new(Arc::new(proxy_provider(port)));

    let mut session = connector
        .acquire(&target(NetworkMode::PublicProxied))
        .await
        .unwrap();
    let err = session.simple_query("SELEKT 1").await.unwrap_err();
    assert!(matches!(err, Error::Sql(ref msg) if msg.contains("42601")));
    assert_eq!(session.query_scalar::<i64>("SELECT 3").await.unwrap(), 3);

    connector.release(session).await.unwrap();
    connector.shutdown().await.unwrap();
    assert_eq!(server.await.unwrap().queries.len(), 2);
}
