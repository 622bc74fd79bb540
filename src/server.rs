//! Minimal JSON-over-HTTP front for the diet and food requests.
//!
//! One thread per connection, `Content-Length` bodies only, and every
//! response closes the connection.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::{
    completion::{Completion, CompletionSettings},
    diet,
    food::{self, FoodError},
    types::BodyMetrics,
};

pub const GENERATE_DIET_PATH: &str = "/api/generateDiet";
pub const IDENTIFY_FOOD_PATH: &str = "/api/identifyFood";

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const MAX_HEADER_LINES: usize = 100;
const MAX_LINE_BYTES: usize = 8 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const LINGER_TIMEOUT: Duration = Duration::from_millis(500);
const LINGER_BYTES: u64 = 64 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    fn error_with_details(status: u16, message: impl Into<String>, details: String) -> Self {
        Self {
            status,
            body: json!({ "error": message.into(), "details": details }),
        }
    }

    fn to_http(&self) -> Vec<u8> {
        let body = self.body.to_string();
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            reason_phrase(self.status),
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body.as_bytes());
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn parse_json_body(body: &[u8]) -> Result<Value, ApiResponse> {
    serde_json::from_slice(body).map_err(|err| {
        ApiResponse::error_with_details(400, "Invalid JSON body", err.to_string())
    })
}

/// `POST /api/generateDiet` with `{ "metrics": BodyMetrics }`.
pub fn handle_generate_diet<C: Completion + ?Sized>(
    client: &C,
    settings: &CompletionSettings,
    body: &[u8],
) -> ApiResponse {
    let request = match parse_json_body(body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let metrics = match request.get("metrics") {
        None | Some(Value::Null) => {
            log::warn!("diet request without metrics");
            return ApiResponse::error(400, "Metrics not provided");
        }
        Some(metrics) => metrics,
    };
    let metrics: BodyMetrics = match serde_json::from_value(metrics.clone()) {
        Ok(metrics) => metrics,
        Err(err) => {
            return ApiResponse::error_with_details(400, "Invalid metrics", err.to_string());
        }
    };

    match diet::generate_diet_plan(client, settings, &metrics) {
        Ok(plan) => ApiResponse::ok(json!({ "dietPlan": plan })),
        Err(err) => {
            log::error!("diet generation failed: {err}");
            ApiResponse::error_with_details(500, err.to_string(), format!("{err:?}"))
        }
    }
}

/// `POST /api/identifyFood` with `{ "image": "data:image/...;base64,..." }`.
pub fn handle_identify_food<C: Completion + ?Sized>(
    client: &C,
    settings: &CompletionSettings,
    body: &[u8],
) -> ApiResponse {
    let request = match parse_json_body(body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let Some(image) = request
        .get("image")
        .and_then(Value::as_str)
        .filter(|image| !image.trim().is_empty())
    else {
        return ApiResponse::error(400, "Image not provided");
    };

    let prepared = match food::normalize_data_url(image) {
        Ok(url) => url,
        Err(err) => return ApiResponse::error(400, err.to_string()),
    };

    match food::identify_food(client, settings, &prepared) {
        Ok(analysis) => ApiResponse::ok(json!({
            "description": analysis.description,
            "calories": analysis.calories,
        })),
        Err(FoodError::NoAnalysis) => ApiResponse::error(500, FoodError::NoAnalysis.to_string()),
        Err(err) => {
            log::error!("food identification failed: {err}");
            ApiResponse::error_with_details(500, err.to_string(), format!("{err:?}"))
        }
    }
}

pub fn route<C: Completion + ?Sized>(
    client: &C,
    settings: &CompletionSettings,
    method: &str,
    path: &str,
    body: &[u8],
) -> ApiResponse {
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    match (method, path) {
        ("POST", GENERATE_DIET_PATH) => handle_generate_diet(client, settings, body),
        ("POST", IDENTIFY_FOOD_PATH) => handle_identify_food(client, settings, body),
        (_, GENERATE_DIET_PATH | IDENTIFY_FOOD_PATH) => {
            ApiResponse::error(405, "Method not allowed")
        }
        _ => ApiResponse::error(404, "Not found"),
    }
}

struct ApiState<C> {
    client: C,
    settings: CompletionSettings,
}

pub struct ApiServer<C> {
    listener: TcpListener,
    state: Arc<ApiState<C>>,
}

impl<C: Completion + 'static> ApiServer<C> {
    pub fn bind<A: ToSocketAddrs>(addr: A, client: C, settings: CompletionSettings) -> Result<Self> {
        let listener = TcpListener::bind(addr).context("failed to bind API listener")?;
        Ok(Self {
            listener,
            state: Arc::new(ApiState { client, settings }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    /// Accepts connections until the listener fails.
    pub fn run(self) -> Result<()> {
        log::info!("API listening on {}", self.local_addr()?);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("failed to accept connection: {err}");
                    continue;
                }
            };
            let state = self.state.clone();
            thread::spawn(move || {
                let peer = stream.peer_addr().ok();
                if let Err(err) = serve_connection(stream, &state) {
                    log::warn!("connection {peer:?} failed: {err:?}");
                }
            });
        }
        Ok(())
    }
}

struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn serve_connection<C: Completion>(mut stream: TcpStream, state: &ApiState<C>) -> Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let response = match read_request(&stream) {
        Ok(request) => {
            log::info!("{} {}", request.method, request.path);
            route(
                &state.client,
                &state.settings,
                &request.method,
                &request.path,
                &request.body,
            )
        }
        Err(response) => response,
    };

    stream
        .write_all(&response.to_http())
        .context("failed to write response")?;
    stream.flush()?;

    // Drain unread request bytes so the close is not sent as a reset.
    if stream.shutdown(Shutdown::Write).is_ok() {
        stream.set_read_timeout(Some(LINGER_TIMEOUT))?;
        let _ = io::copy(&mut (&stream).take(LINGER_BYTES), &mut io::sink());
    }
    Ok(())
}

fn header_too_large() -> ApiResponse {
    ApiResponse::error(431, "Request header too large")
}

/// Reads one CRLF/LF terminated line of at most [`MAX_LINE_BYTES`].
fn read_line_limited<R: BufRead>(reader: &mut R) -> Result<String, ApiResponse> {
    let bad_request = || ApiResponse::error(400, "Bad request");
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', &mut buf)
        .map_err(|_| bad_request())?;
    if buf.last() != Some(&b'\n') {
        return Err(if buf.len() > MAX_LINE_BYTES {
            header_too_large()
        } else {
            bad_request()
        });
    }
    String::from_utf8(buf).map_err(|_| bad_request())
}

fn read_request<R: Read>(stream: R) -> Result<HttpRequest, ApiResponse> {
    let bad_request = || ApiResponse::error(400, "Bad request");
    let mut reader = BufReader::new(stream);

    let request_line = read_line_limited(&mut reader)?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(bad_request());
    };
    let (method, path) = (method.to_string(), path.to_string());

    let mut content_length = 0usize;
    let mut headers_done = false;
    for _ in 0..MAX_HEADER_LINES {
        let line = read_line_limited(&mut reader)?;
        let line = line.trim_end();
        if line.is_empty() {
            headers_done = true;
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().map_err(|_| bad_request())?;
            }
        }
    }
    if !headers_done {
        return Err(header_too_large());
    }

    if content_length > MAX_BODY_BYTES {
        return Err(ApiResponse::error(413, "Request body too large"));
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).map_err(|_| bad_request())?;

    Ok(HttpRequest { method, path, body })
}
