use crate::util::error::{HttpError, NetError};
use httparse::Status;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Read, Write};

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Minimal HTTP request captured by the blocking parser. Only ASCII header
/// names and an eagerly-buffered body are supported; chunked encoding is
/// rejected by construction (no `Content-Length`, no body).
#[derive(Debug, Clone)]
pub struct SimpleHttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SimpleHttpRequest {
    pub fn path_segments(&self) -> Vec<&str> {
        self.path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect()
    }
}

/// Parses one blocking HTTP/1.1 request from the stream, capping header and
/// body sizes to avoid unbounded buffering.
pub fn read_request(stream: &mut impl Read) -> Result<SimpleHttpRequest, NetError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_len = loop {
        let read = stream.read(&mut chunk).map_err(map_read_error)?;
        if read == 0 {
            return Err(HttpError::ConnectionClosedBeforeHeaders.into());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(HttpError::HeadersTooLarge.into());
        }
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(&buffer) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => return Err(HttpError::PartialRequest.into()),
        Err(err) => return Err(HttpError::from(err).into()),
    }
    let method = parsed.method.ok_or(HttpError::MissingMethod)?.to_string();
    let path = parsed.path.ok_or(HttpError::MissingPath)?;
    let path = path.split('?').next().unwrap_or(path).to_string();

    let header_pairs: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_string(),
                String::from_utf8_lossy(header.value).into_owned(),
            )
        })
        .collect();

    let content_length = header_pairs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(HttpError::HeadersTooLarge.into());
    }

    let mut body = Vec::with_capacity(content_length);
    body.extend_from_slice(&buffer[header_len..header_len + (buffer.len() - header_len).min(content_length)]);
    while body.len() < content_length {
        let read = stream.read(&mut chunk).map_err(map_read_error)?;
        if read == 0 {
            return Err(HttpError::ConnectionClosedBeforeHeaders.into());
        }
        let remaining = content_length - body.len();
        body.extend_from_slice(&chunk[..read.min(remaining)]);
    }

    Ok(SimpleHttpRequest {
        method,
        path,
        headers: header_pairs,
        body,
    })
}

pub fn write_json_response<T: Serialize>(
    stream: &mut (impl Write + ?Sized),
    status: u16,
    payload: &T,
) -> Result<(), NetError> {
    let body = serde_json::to_vec(payload).map_err(HttpError::JsonSerialize)?;
    write_response(stream, status, "application/json", &body)
}

pub fn write_response(
    stream: &mut (impl Write + ?Sized),
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<(), NetError> {
    let mut head = String::new();
    write!(
        head,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len(),
        content_type
    )
    .map_err(|_| HttpError::ResponseFormat)?;
    stream.write_all(head.as_bytes()).map_err(map_write_error)?;
    stream.write_all(body).map_err(map_write_error)?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

fn map_read_error(err: io::Error) -> NetError {
    if is_timeout(&err) {
        HttpError::RequestTimeout.into()
    } else {
        NetError::Io(err)
    }
}

fn map_write_error(err: io::Error) -> NetError {
    if is_timeout(&err) {
        HttpError::ResponseTimeout.into()
    } else {
        NetError::Io(err)
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_get() {
        let mut raw: &[u8] = b"GET /shop/42?x=1 HTTP/1.1\r\nHost: sim\r\n\r\n";
        let request = read_request(&mut raw).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/shop/42");
        assert_eq!(request.path_segments(), vec!["shop", "42"]);
    }

    #[test]
    fn reads_a_content_length_body() {
        let mut raw: &[u8] = b"POST /load HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd";
        let request = read_request(&mut raw).unwrap();
        assert_eq!(request.body, b"abcd");
    }

    #[test]
    fn response_head_names_the_status() {
        let mut out = Vec::new();
        write_response(&mut out, 429, "text/plain", b"slow down").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 429 Too Many Requests\r\n"));
        assert!(text.ends_with("slow down"));
    }
}
