//! Shared test utilities: a local tiny_http server and one client per
//! compiled-in backend.

#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use once_cell::sync::OnceCell;
use serde_json::json;
use switchyard::{Backend, Http};
use tiny_http::{Header, Request, Response, Server, StatusCode};
use url::Url;

/// How long `/slow` stalls before answering; longer than libcurl's
/// one-second stall window.
pub const SLOW_ROUTE_STALL: Duration = Duration::from_millis(3000);

#[derive(Debug)]
pub struct TestServer {
    base: String,
    // Keep the thread alive for the duration of the tests.
    _thread: thread::JoinHandle<()>,
}

/// Build a full URL against the local test server.
pub fn uri(path: &str) -> String {
    format!("{}/{}", test_server().base, path.trim_start_matches('/'))
}

pub fn test_server() -> &'static TestServer {
    static INSTANCE: OnceCell<TestServer> = OnceCell::new();
    INSTANCE.get_or_init(TestServer::start)
}

/// One client per compiled-in backend.
pub fn clients() -> Vec<(Backend, Http)> {
    Backend::available()
        .into_iter()
        .map(|backend| {
            let http = Http::builder()
                .backend(backend)
                .build()
                .expect("build client");
            (backend, http)
        })
        .collect()
}

/// An address nobody listens on.
pub fn refused_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let addr = listener.local_addr().expect("probe address");
    drop(listener);
    format!("http://{addr}/")
}

impl TestServer {
    fn start() -> Self {
        let server = Server::http("127.0.0.1:0").expect("start test server");
        let base = format!("http://{}", server.server_addr());
        let thread = thread::spawn(move || run_server(&server));

        Self {
            base,
            _thread: thread,
        }
    }
}

fn run_server(server: &Server) {
    for mut request in server.incoming_requests() {
        // one thread per request so a stalled route never blocks the others
        thread::spawn(move || {
            let response = handle_request(&mut request);
            let _ = request.respond(response);
        });
    }
}

fn handle_request(request: &mut Request) -> Response<Cursor<Vec<u8>>> {
    // tiny_http only provides the path/query, so prefix with a dummy scheme/host.
    let url = Url::parse(&format!("http://localhost{}", request.url())).unwrap();
    let path = url.path().to_string();

    match path.as_str() {
        "/echo" => echo(request, &url),
        "/json" => json_response(StatusCode(200), r#"{"x":1}"#),
        "/items" => json_response(StatusCode(200), r#"[{"x":1},{"x":2}]"#),
        "/bytes" => Response::from_data(vec![0_u8, 159, 146, 150]).with_status_code(StatusCode(200)),
        "/slow" => {
            thread::sleep(SLOW_ROUTE_STALL);
            text_response(StatusCode(200), "slow")
        }
        "/cached" => {
            static HITS: AtomicUsize = AtomicUsize::new(0);
            let hit = HITS.fetch_add(1, Ordering::SeqCst);
            text_response(StatusCode(200), format!("hit {hit}"))
                .with_header(header("Cache-Control", "max-age=60"))
        }
        "/etag" => {
            if header_value(request, "if-none-match").as_deref() == Some("\"v1\"") {
                return no_content(StatusCode(304)).with_header(header("ETag", "\"v1\""));
            }
            text_response(StatusCode(200), "tagged")
                .with_header(header("ETag", "\"v1\""))
                .with_header(header("Cache-Control", "no-cache"))
        }
        _ => {
            if let Some(stripped) = path.strip_prefix("/status/") {
                let status = stripped.parse::<u16>().unwrap_or(400);
                if status == 204 {
                    return no_content(StatusCode(status));
                }
                return text_response(StatusCode(status), format!("status {status}"));
            }
            if let Some(stripped) = path.strip_prefix("/redirect/") {
                let steps = stripped.parse::<u32>().unwrap_or(0);
                if steps == 0 {
                    return text_response(StatusCode(200), "redirect complete");
                }
                return Response::from_string("redirect")
                    .with_status_code(StatusCode(302))
                    .with_header(header("Location", &format!("/redirect/{}", steps - 1)));
            }
            text_response(StatusCode(404), format!("no route for {path}"))
        }
    }
}

/// Describe the request as JSON: method, query pairs, headers (lower-case
/// names, repeated values joined by `, `) and the body as lossy text.
fn echo(request: &mut Request, url: &Url) -> Response<Cursor<Vec<u8>>> {
    let mut body = Vec::new();
    let _ = request.as_reader().read_to_end(&mut body);

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for header in request.headers() {
        let name = header.field.to_string().to_ascii_lowercase();
        let value = header.value.to_string();
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    let description = json!({
        "method": request.method().to_string(),
        "query": query,
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    });
    json_response(StatusCode(200), &description.to_string())
}

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name, value).unwrap()
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|header| header.field.to_string().eq_ignore_ascii_case(name))
        .map(|header| header.value.to_string())
}

fn json_response(status: StatusCode, body: &str) -> Response<Cursor<Vec<u8>>> {
    Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(header("Content-Type", "application/json"))
}

fn no_content(status: StatusCode) -> Response<Cursor<Vec<u8>>> {
    Response::from_data(Vec::new()).with_status_code(status)
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Cursor<Vec<u8>>> {
    Response::from_string(body.into()).with_status_code(status)
}
