//! Streaming `multipart/form-data` decoder.
//!
//! Parts are decoded incrementally from the request body: part bytes are
//! yielded as soon as they cannot belong to the next delimiter, so a part of
//! any size is relayed with bounded buffering.
//!
//! ```text
//! preamble CRLF "--" boundary [padding] CRLF
//! headers CRLF CRLF
//! body CRLF "--" boundary [padding] CRLF
//! ...
//! body CRLF "--" boundary "--" epilogue
//! ```

use std::pin::Pin;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Request};
use http_body_util::BodyExt;
use mime::Mime;

use crate::handler::{BoxError, RequestBody};

/// Largest header block accepted for a single part.
pub const MAX_HEADER_SIZE: usize = 16 * 1024;

/// Errors raised while decoding a multipart body.
#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    /// The request content type is not `multipart/form-data`.
    #[error("request is not a multipart/form")]
    NotMultipart,

    /// The content type carries no boundary parameter.
    #[error("no multipart boundary param in Content-Type")]
    MissingBoundary,

    /// The body ended before the closing delimiter.
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// A delimiter line is followed by something other than padding and CRLF.
    #[error("malformed multipart delimiter")]
    MalformedBoundary,

    /// A part header line could not be parsed.
    #[error("malformed MIME header line: {0}")]
    MalformedHeader(String),

    /// A part header block exceeds [`MAX_HEADER_SIZE`].
    #[error("part header block too large")]
    HeadersTooLarge,

    /// The request body itself failed.
    #[error("failed to read request body")]
    Body(#[source] BoxError),
}

type Source = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Boundary,
    Headers,
    Body,
    Done,
}

/// Incremental decoder over a multipart body.
pub struct Multipart {
    source: Source,
    buf: BytesMut,
    delimiter: Bytes,
    state: State,
    eof: bool,
}

impl std::fmt::Debug for Multipart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multipart")
            .field("delimiter", &self.delimiter)
            .field("state", &self.state)
            .field("buffered", &self.buf.len())
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl Multipart {
    /// Decode `source` using `boundary`.
    pub fn new<S, E>(source: S, boundary: &str) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let delimiter = Bytes::from(format!("\r\n--{boundary}"));
        // A leading CRLF lets the first delimiter match like every later one.
        let mut buf = BytesMut::with_capacity(8 * 1024);
        buf.extend_from_slice(b"\r\n");
        Self {
            source: Box::pin(source.map_err(Into::<BoxError>::into)),
            buf,
            delimiter,
            state: State::Preamble,
            eof: false,
        }
    }

    /// Decode the body of `req`, taking the boundary from its content type.
    pub fn from_request(req: Request<RequestBody>) -> Result<Self, MultipartError> {
        let boundary = boundary(req.headers())?;
        Ok(Self::new(req.into_body().into_data_stream(), &boundary))
    }

    /// Advance to the next part, discarding any unread bytes of the current one.
    ///
    /// Returns `None` once the closing delimiter has been read.
    pub async fn next_part(&mut self) -> Result<Option<Part<'_>>, MultipartError> {
        loop {
            match self.state {
                State::Preamble => self.skip_preamble().await?,
                State::Body => while self.read_body().await?.is_some() {},
                State::Boundary => self.after_delimiter().await?,
                State::Headers => {
                    let headers = self.read_headers().await?;
                    self.state = State::Body;
                    return Ok(Some(Part {
                        multipart: self,
                        headers,
                    }));
                }
                State::Done => return Ok(None),
            }
        }
    }

    async fn fill(&mut self) -> Result<bool, MultipartError> {
        while !self.eof {
            match self.source.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => {
                    self.buf.extend_from_slice(&chunk);
                    return Ok(true);
                }
                Some(Err(err)) => return Err(MultipartError::Body(err)),
                None => self.eof = true,
            }
        }
        Ok(false)
    }

    async fn skip_preamble(&mut self) -> Result<(), MultipartError> {
        loop {
            if let Some(pos) = find_bytes(&self.buf, &self.delimiter) {
                self.buf.advance(pos + self.delimiter.len());
                self.state = State::Boundary;
                return Ok(());
            }
            let keep = self.delimiter.len() - 1;
            if self.buf.len() > keep {
                self.buf.advance(self.buf.len() - keep);
            }
            if !self.fill().await? {
                return Err(MultipartError::UnexpectedEof);
            }
        }
    }

    async fn after_delimiter(&mut self) -> Result<(), MultipartError> {
        loop {
            if self.buf.starts_with(b"--") {
                self.state = State::Done;
                return Ok(());
            }
            if let Some(pos) = find_bytes(&self.buf, b"\r\n") {
                if !self.buf[..pos].iter().all(|b| matches!(b, b' ' | b'\t')) {
                    return Err(MultipartError::MalformedBoundary);
                }
                self.buf.advance(pos + 2);
                self.state = State::Headers;
                return Ok(());
            }
            let last = self.buf.len().saturating_sub(1);
            let padding_only = self
                .buf
                .iter()
                .enumerate()
                .all(|(i, b)| matches!(b, b' ' | b'\t') || (*b == b'\r' && i == last));
            let closing_start = self.buf.as_ref() == b"-";
            if !(padding_only || closing_start) || self.buf.len() > MAX_HEADER_SIZE {
                return Err(MultipartError::MalformedBoundary);
            }
            if !self.fill().await? {
                return Err(MultipartError::UnexpectedEof);
            }
        }
    }

    async fn read_headers(&mut self) -> Result<HeaderMap, MultipartError> {
        loop {
            if self.buf.starts_with(b"\r\n") {
                self.buf.advance(2);
                return Ok(HeaderMap::new());
            }
            if let Some(pos) = find_bytes(&self.buf, b"\r\n\r\n") {
                if pos > MAX_HEADER_SIZE {
                    return Err(MultipartError::HeadersTooLarge);
                }
                let block = self.buf.split_to(pos + 4);
                return parse_headers(&block[..pos]);
            }
            if self.buf.len() > MAX_HEADER_SIZE {
                return Err(MultipartError::HeadersTooLarge);
            }
            if !self.fill().await? {
                return Err(MultipartError::UnexpectedEof);
            }
        }
    }

    async fn read_body(&mut self) -> Result<Option<Bytes>, MultipartError> {
        if self.state != State::Body {
            return Ok(None);
        }
        loop {
            if let Some(pos) = find_bytes(&self.buf, &self.delimiter) {
                if pos > 0 {
                    return Ok(Some(self.buf.split_to(pos).freeze()));
                }
                self.buf.advance(self.delimiter.len());
                self.state = State::Boundary;
                return Ok(None);
            }
            // Anything before the last `delimiter.len() - 1` bytes cannot be
            // the start of a delimiter.
            let keep = self.delimiter.len() - 1;
            if self.buf.len() > keep {
                let ready = self.buf.len() - keep;
                return Ok(Some(self.buf.split_to(ready).freeze()));
            }
            if !self.fill().await? {
                return Err(MultipartError::UnexpectedEof);
            }
        }
    }
}

/// One part of a multipart body, borrowed from its [`Multipart`].
pub struct Part<'a> {
    multipart: &'a mut Multipart,
    headers: HeaderMap,
}

impl std::fmt::Debug for Part<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl<'a> Part<'a> {
    /// The part's MIME headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The `name` parameter of `Content-Disposition: form-data`.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.disposition_param("name")
    }

    /// The `filename` parameter of `Content-Disposition`.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        self.disposition_param("filename")
    }

    /// The part's declared content type.
    #[must_use]
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(CONTENT_TYPE)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    /// Next chunk of the part body, or `None` at its end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        self.multipart.read_body().await
    }

    /// The rest of the part body as a stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, MultipartError>> + Send + 'a {
        futures::stream::try_unfold(self, |mut part| async move {
            Ok::<_, MultipartError>(part.chunk().await?.map(|chunk| (chunk, part)))
        })
    }

    fn disposition_param(&self, param: &str) -> Option<String> {
        let value = self.headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
        disposition_param(value, param)
    }
}

/// The boundary of a `multipart/form-data` content type.
pub fn boundary(headers: &HeaderMap) -> Result<String, MultipartError> {
    let mime: Mime = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(MultipartError::NotMultipart)?;
    if mime.type_() != mime::MULTIPART || mime.subtype() != mime::FORM_DATA {
        return Err(MultipartError::NotMultipart);
    }
    mime.get_param(mime::BOUNDARY)
        .map(|b| b.as_str().trim_matches('"').to_owned())
        .filter(|b| !b.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

fn parse_headers(block: &[u8]) -> Result<HeaderMap, MultipartError> {
    let mut headers = HeaderMap::new();
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let malformed =
            || MultipartError::MalformedHeader(String::from_utf8_lossy(line).into_owned());
        let colon = line.iter().position(|&b| b == b':').ok_or_else(malformed)?;
        let name =
            HeaderName::from_bytes(line[..colon].trim_ascii()).map_err(|_| malformed())?;
        let value =
            HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).map_err(|_| malformed())?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn disposition_param(value: &str, param: &str) -> Option<String> {
    let mut fields = value.split(';');
    let kind = fields.next()?.trim();
    if kind.is_empty() {
        return None;
    }
    fields.find_map(|field| {
        let (key, val) = field.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(param) {
            return None;
        }
        let val = val.trim();
        let val = val
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(val);
        Some(val.to_owned())
    })
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn form(parts: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (name, content) in parts {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.txt\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn chunked(body: &str, size: usize) -> Multipart {
        let chunks: Vec<Result<Bytes, BoxError>> = body
            .as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Multipart::new(futures::stream::iter(chunks), BOUNDARY)
    }

    async fn read_part(part: Part<'_>) -> Result<String, MultipartError> {
        let chunks: Vec<Bytes> = part.into_stream().try_collect().await?;
        Ok(String::from_utf8(chunks.concat()).unwrap())
    }

    #[tokio::test]
    async fn test_should_decode_single_part() {
        let mut mp = chunked(&form(&[("file", "hello world")]), 1024);
        let part = mp.next_part().await.unwrap().unwrap();
        assert_eq!(part.name().as_deref(), Some("file"));
        assert_eq!(part.file_name().as_deref(), Some("file.txt"));
        assert_eq!(part.content_type(), Some(mime::TEXT_PLAIN));
        assert_eq!(read_part(part).await.unwrap(), "hello world");
        assert!(mp.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_should_decode_byte_at_a_time() {
        let content = "line one\r\nline two\r\n--not-the-boundary\r\n";
        let mut mp = chunked(&form(&[("file", content)]), 1);
        let part = mp.next_part().await.unwrap().unwrap();
        assert_eq!(read_part(part).await.unwrap(), content);
        assert!(mp.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_should_skip_preamble() {
        let body = format!("this is a preamble\r\n{}", form(&[("file", "data")]));
        let mut mp = chunked(&body, 3);
        let part = mp.next_part().await.unwrap().unwrap();
        assert_eq!(read_part(part).await.unwrap(), "data");
    }

    #[tokio::test]
    async fn test_should_decode_empty_part() {
        let mut mp = chunked(&form(&[("file", "")]), 7);
        let part = mp.next_part().await.unwrap().unwrap();
        assert_eq!(read_part(part).await.unwrap(), "");
        assert!(mp.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_should_accept_part_without_headers() {
        let body = format!("--{BOUNDARY}\r\n\r\nbare\r\n--{BOUNDARY}--");
        let mut mp = chunked(&body, 5);
        let part = mp.next_part().await.unwrap().unwrap();
        assert!(part.headers().is_empty());
        assert!(part.name().is_none());
        assert_eq!(read_part(part).await.unwrap(), "bare");
    }

    #[tokio::test]
    async fn test_should_skip_unread_parts() {
        let mut mp = chunked(&form(&[("a", "first"), ("b", "second")]), 4);
        let first = mp.next_part().await.unwrap().unwrap();
        assert_eq!(first.name().as_deref(), Some("a"));

        let second = mp.next_part().await.unwrap().unwrap();
        assert_eq!(second.name().as_deref(), Some("b"));
        assert_eq!(read_part(second).await.unwrap(), "second");
        assert!(mp.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_should_return_none_for_form_without_parts() {
        let mut mp = chunked(&format!("--{BOUNDARY}--\r\n"), 2);
        assert!(mp.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_should_fail_on_empty_body() {
        let mut mp = chunked("", 1);
        assert!(matches!(
            mp.next_part().await,
            Err(MultipartError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_should_fail_on_missing_closing_delimiter() {
        let body = format!("--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\ntruncated");
        let mut mp = chunked(&body, 4);
        let part = mp.next_part().await.unwrap().unwrap();
        assert!(matches!(
            read_part(part).await,
            Err(MultipartError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_should_reject_malformed_header() {
        let body = format!("--{BOUNDARY}\r\nno colon here\r\n\r\ndata\r\n--{BOUNDARY}--");
        let mut mp = chunked(&body, 64);
        assert!(matches!(
            mp.next_part().await,
            Err(MultipartError::MalformedHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_should_reject_garbage_after_delimiter() {
        let body = format!("--{BOUNDARY}garbage\r\n\r\ndata\r\n--{BOUNDARY}--");
        let mut mp = chunked(&body, 64);
        assert!(matches!(
            mp.next_part().await,
            Err(MultipartError::MalformedBoundary)
        ));
    }

    #[tokio::test]
    async fn test_should_reject_oversized_headers() {
        let body = format!(
            "--{BOUNDARY}\r\nX-Big: {}\r\n\r\ndata\r\n--{BOUNDARY}--",
            "a".repeat(MAX_HEADER_SIZE + 1)
        );
        let mut mp = chunked(&body, 4096);
        assert!(matches!(
            mp.next_part().await,
            Err(MultipartError::HeadersTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_should_surface_body_error() {
        let chunks: Vec<Result<Bytes, BoxError>> = vec![
            Ok(Bytes::from(format!("--{BOUNDARY}\r\n\r\npartial"))),
            Err("connection reset".into()),
        ];
        let mut mp = Multipart::new(futures::stream::iter(chunks), BOUNDARY);
        let part = mp.next_part().await.unwrap().unwrap();
        assert!(matches!(read_part(part).await, Err(MultipartError::Body(_))));
    }

    #[test]
    fn test_should_extract_boundary() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=\"abc-123\""),
        );
        assert_eq!(boundary(&headers).unwrap(), "abc-123");
    }

    #[test]
    fn test_should_reject_non_form_content_types() {
        let mut headers = HeaderMap::new();
        assert!(matches!(boundary(&headers), Err(MultipartError::NotMultipart)));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(matches!(boundary(&headers), Err(MultipartError::NotMultipart)));

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/mixed; boundary=abc"),
        );
        assert!(matches!(boundary(&headers), Err(MultipartError::NotMultipart)));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("multipart/form-data"));
        assert!(matches!(
            boundary(&headers),
            Err(MultipartError::MissingBoundary)
        ));
    }

    #[test]
    fn test_should_parse_disposition_params() {
        let value = r#"form-data; name="upload"; filename="a.bin""#;
        assert_eq!(disposition_param(value, "name").as_deref(), Some("upload"));
        assert_eq!(disposition_param(value, "filename").as_deref(), Some("a.bin"));
        assert_eq!(disposition_param("form-data; NAME=plain", "name").as_deref(), Some("plain"));
        assert!(disposition_param("form-data", "filename").is_none());
    }
}
