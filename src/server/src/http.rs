//! A small HTTP/1.1 front for the router: one request per connection,
//! `Content-Length` or chunked bodies, and the connection is closed after
//! the reply.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::protocol::Response;
use crate::router::Router;

const MAX_HEADER_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_BODY: usize = 64 * 1024 * 1024;
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request body too large: {0} bytes")]
    TooLarge(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, PartialEq, Eq)]
enum BodyLength {
    Fixed(usize),
    Chunked,
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    /// percent-decoded, without the query
    path: String,
    body: BodyLength,
    expect_continue: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct RawRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self, HttpError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HttpError> {
        Ok(self.listener.local_addr()?)
    }

    /// serve accepts connections until shutdown resolves, then waits for the
    /// requests in flight.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<(), HttpError> {
        tokio::pin!(shutdown);
        let mut conns = JoinSet::new();

        tracing::info!("listening on {}", self.listener.local_addr()?);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let router = self.router.clone();
                            conns.spawn(async move {
                                if let Err(e) = handle_conn(stream, router).await {
                                    tracing::debug!("connection from {} failed: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => tracing::warn!("accept failed: {}", e),
                    }
                }
                // reap finished connections
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }

        tracing::info!("stop serving, {} requests in flight", conns.len());
        while conns.join_next().await.is_some() {}
        Ok(())
    }
}

async fn handle_conn(stream: TcpStream, router: Router) -> Result<(), HttpError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let (code, resp) = match read_request(&mut reader, &mut write).await {
        Ok(req) => router.handle(&req.method, &req.path, &req.body).await,
        Err(HttpError::Io(e)) => return Err(HttpError::Io(e)),
        Err(e) => {
            let e = skizze_manager::Error::InvalidRequest(e.to_string());
            (400, Response::error(&e))
        }
    };

    let body = resp.to_vec();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        code,
        reason(code),
        body.len()
    );
    write.write_all(head.as_bytes()).await?;
    write.write_all(&body).await?;
    write.shutdown().await?;
    Ok(())
}

/// read_request reads one request. The interim 100 Continue goes to write
/// when the client waits for it before sending the body.
async fn read_request<R, W>(reader: &mut BufReader<R>, write: &mut W) -> Result<RawRequest, HttpError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let head = read_head(reader).await?;
    if head.expect_continue && head.body != BodyLength::Fixed(0) {
        write.write_all(CONTINUE).await?;
        write.flush().await?;
    }

    let body = match head.body {
        BodyLength::Fixed(n) => {
            let mut body = vec![0u8; n];
            reader.read_exact(&mut body).await?;
            body
        }
        BodyLength::Chunked => read_chunked(reader).await?,
    };

    Ok(RawRequest {
        method: head.method,
        path: head.path,
        body,
    })
}

async fn read_head<R>(reader: &mut BufReader<R>) -> Result<RequestHead, HttpError>
where
    R: AsyncRead + Unpin,
{
    let line = read_line(reader).await?;
    let mut parts = line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v)) if v.starts_with("HTTP/1.") => (m.to_string(), p),
        _ => return Err(HttpError::Malformed(format!("bad request line {:?}", line))),
    };
    let path = decode_path(target)?;

    let mut content_length = None;
    let mut chunked = false;
    let mut expect_continue = false;
    let mut headers = 0;
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        headers += 1;
        if headers > MAX_HEADERS {
            return Err(HttpError::Malformed("too many headers".to_string()));
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Malformed(format!("bad header {:?}", line)))?;
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("content-length") {
            let n: usize = value
                .parse()
                .map_err(|_| HttpError::Malformed(format!("bad content length {:?}", value)))?;
            content_length = Some(n);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = transfer_chunked(value)?;
        } else if name.eq_ignore_ascii_case("expect") {
            expect_continue = value.eq_ignore_ascii_case("100-continue");
        }
    }

    let body = match (chunked, content_length) {
        (true, Some(_)) => {
            return Err(HttpError::Malformed(
                "both content length and chunked transfer encoding".to_string(),
            ))
        }
        (true, None) => BodyLength::Chunked,
        (false, Some(n)) if n > MAX_BODY => return Err(HttpError::TooLarge(n)),
        (false, n) => BodyLength::Fixed(n.unwrap_or(0)),
    };

    Ok(RequestHead {
        method,
        path,
        body,
        expect_continue,
    })
}

/// transfer_chunked tells whether a Transfer-Encoding value asks for chunked
/// framing. Codings other than chunked and identity are rejected.
fn transfer_chunked(value: &str) -> Result<bool, HttpError> {
    let codings: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("identity"))
        .collect();
    match codings.as_slice() {
        [] => Ok(false),
        [c] if c.eq_ignore_ascii_case("chunked") => Ok(true),
        _ => Err(HttpError::Malformed(format!(
            "unsupported transfer encoding {:?}",
            value
        ))),
    }
}

/// read_chunked decodes a chunked body, dropping extensions and trailers.
async fn read_chunked<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let size = line.split(';').next().unwrap_or("").trim();
        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HttpError::Malformed(format!("bad chunk size {:?}", line)));
        }
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| HttpError::Malformed(format!("bad chunk size {:?}", line)))?;
        if size == 0 {
            break;
        }

        let total = body.len().saturating_add(size);
        if total > MAX_BODY {
            return Err(HttpError::TooLarge(total));
        }
        let start = body.len();
        body.resize(total, 0);
        reader.read_exact(&mut body[start..]).await?;

        if !read_line(reader).await?.is_empty() {
            return Err(HttpError::Malformed("chunk overruns its size".to_string()));
        }
    }

    let mut trailers = 0;
    while !read_line(reader).await?.is_empty() {
        trailers += 1;
        if trailers > MAX_HEADERS {
            return Err(HttpError::Malformed("too many trailers".to_string()));
        }
    }
    Ok(body)
}

/// decode_path drops the query of a request target and percent-decodes the rest.
fn decode_path(target: &str) -> Result<String, HttpError> {
    let raw = target.split('?').next().unwrap_or("").as_bytes();
    let bad = || HttpError::Malformed(format!("bad percent encoding in {:?}", target));

    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'%' {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        let hex = raw.get(i + 1..i + 3).ok_or_else(bad)?;
        if !hex.iter().all(u8::is_ascii_hexdigit) {
            return Err(bad());
        }
        let hex = std::str::from_utf8(hex).map_err(|_| bad())?;
        out.push(u8::from_str_radix(hex, 16).map_err(|_| bad())?);
        i += 3;
    }

    String::from_utf8(out).map_err(|_| HttpError::Malformed(format!("path is not utf-8: {:?}", target)))
}

/// read_line reads one CRLF terminated line, without the terminator.
async fn read_line<R>(reader: &mut BufReader<R>) -> Result<String, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_HEADER_LINE as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Err(HttpError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    if buf.last() != Some(&b'\n') {
        return Err(HttpError::Malformed("header line too long".to_string()));
    }

    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| HttpError::Malformed("header is not utf-8".to_string()))
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        501 => "Not Implemented",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use serde_json::{json, Value};
    use skizze_manager::{Manager, ManagerOptions};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    use crate::http::{decode_path, read_request, HttpError, HttpServer, RawRequest};
    use crate::router::Router;

    struct Running {
        addr: SocketAddr,
        manager: Manager,
        stop: oneshot::Sender<()>,
        handle: JoinHandle<Result<(), HttpError>>,
        _dirs: (TempDir, TempDir),
    }

    impl Running {
        async fn start() -> anyhow::Result<Self> {
            let info = tempfile::tempdir()?;
            let data = tempfile::tempdir()?;
            let manager = Manager::open(info.path(), data.path(), ManagerOptions::default())?;

            let server = HttpServer::bind("127.0.0.1:0".parse()?, Router::new(manager.clone())).await?;
            let addr = server.local_addr()?;
            let (stop, rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(server.serve(async {
                let _ = rx.await;
            }));
            Ok(Self {
                addr,
                manager,
                stop,
                handle,
                _dirs: (info, data),
            })
        }

        async fn stop(self) -> anyhow::Result<()> {
            let _ = self.stop.send(());
            self.handle.await??;
            Ok(())
        }
    }

    fn parse_response(resp: &str) -> anyhow::Result<(u16, Value)> {
        let (head, body) = resp
            .split_once("\r\n\r\n")
            .ok_or_else(|| anyhow::anyhow!("no header end in {:?}", resp))?;
        let code = head
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow::anyhow!("bad status line {:?}", head))?
            .parse()?;
        assert!(head.contains("Connection: close"));
        Ok((code, serde_json::from_str(body)?))
    }

    async fn call(addr: SocketAddr, raw: &str) -> anyhow::Result<(u16, Value)> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(raw.as_bytes()).await?;

        let mut resp = String::new();
        stream.read_to_string(&mut resp).await?;
        parse_response(&resp)
    }

    fn request(method: &str, path: &str, body: &str) -> String {
        format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}",
            method,
            path,
            body.len(),
            body
        )
    }

    async fn parse(raw: &str) -> Result<RawRequest, HttpError> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_request(&mut reader, &mut tokio::io::sink()).await
    }

    #[tokio::test]
    async fn test_read_request() -> anyhow::Result<()> {
        let req = parse(&request("PUT", "/marvel?x=1", r#"{"values":["a"]}"#)).await?;
        assert_eq!(
            req,
            RawRequest {
                method: "PUT".to_string(),
                path: "/marvel".to_string(),
                body: br#"{"values":["a"]}"#.to_vec(),
            }
        );

        assert!(parse("garbage\r\n\r\n").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_chunked() -> anyhow::Result<()> {
        let raw = "PUT /marvel HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                   5;name=value\r\n{\"val\r\n\
                   f\r\nues\":[\"a\",\"b\"]}\r\n\
                   0\r\nX-Trailer: 1\r\n\r\n";
        let req = parse(raw).await?;
        assert_eq!(req.body, br#"{"values":["a","b"]}"#.to_vec());

        // identity is no coding at all
        let raw = "PUT /m HTTP/1.1\r\nTransfer-Encoding: identity\r\nContent-Length: 2\r\n\r\n{}";
        assert_eq!(parse(raw).await?.body, b"{}".to_vec());

        for raw in [
            "PUT /m HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n0\r\n\r\n",
            "PUT /m HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 5\r\n\r\n0\r\n\r\n",
            "PUT /m HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n\r\n",
            "PUT /m HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nabc\r\n0\r\n\r\n",
        ] {
            assert!(matches!(parse(raw).await, Err(HttpError::Malformed(_))), "{:?}", raw);
        }
        Ok(())
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/x%2Dmen").unwrap(), "/x-men");
        assert_eq!(decode_path("/caf%C3%A9?q=%zz").unwrap(), "/café");
        assert_eq!(decode_path("/plain").unwrap(), "/plain");

        for bad in ["/a%2", "/a%zz", "/a%+1", "/a%FF"] {
            assert!(decode_path(bad).is_err(), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_serve() -> anyhow::Result<()> {
        let server = Running::start().await?;
        let addr = server.addr;

        let (code, _) = call(addr, &request("POST", "/marvel", r#"{"domainType":"hllpp","capacity":10000}"#)).await?;
        assert_eq!(code, 200);
        let (code, _) = call(addr, &request("PUT", "/marvel", r#"{"values":["wolverine"]}"#)).await?;
        assert_eq!(code, 200);

        let (code, body) = call(addr, &request("GET", "/marvel", "")).await?;
        assert_eq!(code, 200);
        assert_eq!(body, json!({"result": {"cardinality": 1}, "error": null}));

        let (code, body) = call(addr, &request("GET", "/missing", "")).await?;
        assert_eq!(code, 404);
        assert_eq!(body["error"]["code"], json!("DOMAIN_NOT_FOUND"));

        let (code, body) = call(addr, "NONSENSE\r\n").await?;
        assert_eq!(code, 400);
        assert_eq!(body["error"]["code"], json!("INVALID_REQUEST"));

        // names arrive percent-encoded
        let (code, _) = call(addr, &request("POST", "/x%2Dmen", "")).await?;
        assert_eq!(code, 200);
        let (_, body) = call(addr, &request("GET", "/", "")).await?;
        assert_eq!(body["result"], json!(["marvel", "x-men"]));

        server.stop().await
    }

    #[tokio::test]
    async fn test_chunked_ingest() -> anyhow::Result<()> {
        let server = Running::start().await?;
        let addr = server.addr;
        call(addr, &request("POST", "/marvel", r#"{"domainType":"hllpp"}"#)).await?;

        let body = r#"{"values":["wolverine","storm"]}"#;
        let (head, tail) = body.split_at(12);
        let raw = format!(
            "PUT /marvel HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{}\r\n{:x}\r\n{}\r\n0\r\n\r\n",
            head.len(),
            head,
            tail.len(),
            tail
        );
        let (code, _) = call(addr, &raw).await?;
        assert_eq!(code, 200);

        let (_, body) = call(addr, &request("GET", "/marvel", "")).await?;
        assert_eq!(body["result"], json!({"cardinality": 2}));

        // a coding the server cannot undo must not be taken for an empty body
        let raw = "PUT /marvel HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n";
        let (code, body) = call(addr, raw).await?;
        assert_eq!(code, 400);
        assert_eq!(body["error"]["code"], json!("INVALID_REQUEST"));
        assert_eq!(
            server.manager.get_count_for_domain("marvel").await?,
            skizze_sketches::QueryResult::Cardinality(2)
        );

        server.stop().await
    }

    #[tokio::test]
    async fn test_expect_continue() -> anyhow::Result<()> {
        let server = Running::start().await?;
        let addr = server.addr;
        call(addr, &request("POST", "/marvel", r#"{"domainType":"dict"}"#)).await?;

        let body = r#"{"values":["storm"]}"#;
        let mut stream = TcpStream::connect(addr).await?;
        let head = format!(
            "PUT /marvel HTTP/1.1\r\nContent-Length: {}\r\nExpect: 100-continue\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await?;

        let mut interim = [0u8; 25];
        stream.read_exact(&mut interim).await?;
        assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

        stream.write_all(body.as_bytes()).await?;
        let mut resp = String::new();
        stream.read_to_string(&mut resp).await?;
        let (code, _) = parse_response(&resp)?;
        assert_eq!(code, 200);

        let (_, body) = call(addr, &request("GET", "/marvel", "")).await?;
        assert_eq!(body["result"], json!({"cardinality": 1}));

        server.stop().await
    }
}
