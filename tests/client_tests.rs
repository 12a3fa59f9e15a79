//! Request encoding and submission against the local server, once per
//! compiled-in backend.

mod common;

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use switchyard::{ErrorKind, Method, ParamValue, ResponseBody};

use common::{clients, uri};

#[derive(Debug, Deserialize)]
struct Echo {
    method: String,
    query: Vec<(String, String)>,
    headers: HashMap<String, String>,
    body: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Point {
    x: i32,
}

#[tokio::test]
async fn get_sends_params_in_query_and_never_a_body() {
    for (backend, http) in clients() {
        let echo: Echo = http
            .get(&uri("/echo"))
            .unwrap()
            .params([("q", "a b"), ("q", "c"), ("lang", "en")])
            .unwrap()
            .body_text("must not be sent")
            .submit_for_object()
            .await
            .unwrap();

        assert_eq!(echo.method, "GET", "{backend}");
        assert_eq!(
            echo.query,
            [
                ("q".to_owned(), "a b".to_owned()),
                ("q".to_owned(), "c".to_owned()),
                ("lang".to_owned(), "en".to_owned()),
            ],
            "{backend}"
        );
        assert_eq!(echo.body, "", "{backend}");
    }
}

#[tokio::test]
async fn delete_uses_query_string() {
    for (backend, http) in clients() {
        let echo: Echo = http
            .delete(&uri("/echo"))
            .unwrap()
            .param("id", 42)
            .unwrap()
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(echo.method, "DELETE", "{backend}");
        assert_eq!(echo.query, [("id".to_owned(), "42".to_owned())], "{backend}");
    }
}

#[tokio::test]
async fn post_params_become_a_form() {
    for (backend, http) in clients() {
        let echo: Echo = http
            .post(&uri("/echo"))
            .unwrap()
            .param("x", "1")
            .unwrap()
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(echo.method, "POST", "{backend}");
        assert_eq!(echo.body, "x=1", "{backend}");
        assert_eq!(
            echo.headers["content-type"], "application/x-www-form-urlencoded",
            "{backend}"
        );
    }
}

#[tokio::test]
async fn json_body_is_sent_with_its_content_type() {
    for (backend, http) in clients() {
        let echo: Echo = http
            .put(&uri("/echo"))
            .unwrap()
            .body_json(&serde_json::json!({"name": "widget"}))
            .unwrap()
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(echo.method, "PUT", "{backend}");
        assert_eq!(echo.headers["content-type"], "application/json", "{backend}");
        let sent: Value = serde_json::from_str(&echo.body).unwrap();
        assert_eq!(sent["name"], "widget", "{backend}");
    }
}

#[tokio::test]
async fn configured_content_type_header_wins() {
    for (backend, http) in clients() {
        let echo: Echo = http
            .patch(&uri("/echo"))
            .unwrap()
            .header("Content-Type", "text/csv")
            .mime_type("text/plain")
            .body_text("a,b")
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(echo.method, "PATCH", "{backend}");
        assert_eq!(echo.headers["content-type"], "text/csv", "{backend}");
        assert_eq!(echo.body, "a,b", "{backend}");
    }
}

#[tokio::test]
async fn file_body_is_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload.txt");
    std::fs::write(&path, "from disk").unwrap();

    for (backend, http) in clients() {
        let echo: Echo = http
            .post(&uri("/echo"))
            .unwrap()
            .mime_type("text/plain")
            .body_file(&path)
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(echo.body, "from disk", "{backend}");
        assert_eq!(echo.headers["content-type"], "text/plain", "{backend}");
    }
}

#[tokio::test]
async fn multipart_sends_text_and_binary_parts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "file contents").unwrap();

    for (backend, http) in clients() {
        let echo: Echo = http
            .post(&uri("/echo"))
            .unwrap()
            .mime_type("multipart/form-data")
            .param("title", "hello")
            .unwrap()
            .param("blob", ParamValue::from(b"raw bytes".to_vec()))
            .unwrap()
            .param("upload", path.clone())
            .unwrap()
            .submit_for_object()
            .await
            .unwrap();

        assert!(
            echo.headers["content-type"].starts_with("multipart/form-data; boundary="),
            "{backend}: {}",
            echo.headers["content-type"]
        );
        assert!(echo.body.contains("name=\"title\""), "{backend}");
        assert!(echo.body.contains("hello"), "{backend}");
        assert!(echo.body.contains("raw bytes"), "{backend}");
        assert!(echo.body.contains("filename=\"notes.txt\""), "{backend}");
        assert!(echo.body.contains("file contents"), "{backend}");
    }
}

#[tokio::test]
async fn form_uses_request_charset() {
    for (backend, http) in clients() {
        let echo: Echo = http
            .post(&uri("/echo"))
            .unwrap()
            .charset("iso-8859-1")
            .unwrap()
            .param("name", "é")
            .unwrap()
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(echo.body, "name=%E9", "{backend}");
        assert!(
            echo.headers["content-type"].ends_with("charset=windows-1252"),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn headers_are_sent() {
    for (backend, http) in clients() {
        let echo: Echo = http
            .get(&uri("/echo"))
            .unwrap()
            .header("X-Single", "one")
            .add_header("X-Multi", "a")
            .add_header("X-Multi", "b")
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(echo.headers["x-single"], "one", "{backend}");
        assert_eq!(echo.headers["x-multi"], "a, b", "{backend}");
    }
}

#[tokio::test]
async fn status_errors_carry_code_and_uri() {
    for (backend, http) in clients() {
        let target = uri("/status/404");
        let err = http
            .get(&target)
            .unwrap()
            .submit_for_text()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status, "{backend}");
        assert_eq!(err.status_code(), 404, "{backend}");
        assert_eq!(err.uri(), Some(target.as_str()), "{backend}");
        assert!(err.diagnostic().unwrap().ends_with("=>resp:status 404"), "{backend}");
        assert!(err.is_client_error(), "{backend}");

        let err = http
            .get(&uri("/status/503"))
            .unwrap()
            .submit_for_bytes()
            .await
            .unwrap_err();
        assert!(err.is_server_error(), "{backend}");
    }
}

#[tokio::test]
async fn objects_and_generic_shapes() {
    for (backend, http) in clients() {
        let point: Point = http
            .get(&uri("/json"))
            .unwrap()
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(point, Point { x: 1 }, "{backend}");

        let points: Vec<Point> = http
            .get(&uri("/items"))
            .unwrap()
            .submit_for_object()
            .await
            .unwrap();
        assert_eq!(points.len(), 2, "{backend}");

        let err = http
            .get(&uri("/status/204"))
            .unwrap()
            .submit_for_object::<Point>()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec, "{backend}");
    }
}

#[tokio::test]
async fn bytes_and_files() {
    for (backend, http) in clients() {
        let bytes = http
            .get(&uri("/bytes"))
            .unwrap()
            .submit_for_bytes()
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), [0_u8, 159, 146, 150], "{backend}");

        let path = http
            .get(&uri("/bytes"))
            .unwrap()
            .submit_for_file()
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), [0_u8, 159, 146, 150], "{backend}");
        std::fs::remove_file(path).unwrap();
    }
}

#[tokio::test]
async fn head_has_no_body() {
    for (backend, http) in clients() {
        let text = http
            .head(&uri("/json"))
            .unwrap()
            .submit_for_text()
            .await
            .unwrap();
        assert!(text.is_empty(), "{backend}");
    }
}

#[tokio::test]
async fn stream_handler_reads_the_body() {
    for (backend, http) in clients() {
        let text = http
            .new_req(&uri("/json"))
            .unwrap()
            .method(Method::Get)
            .submit_for_stream(
                async |body: &mut ResponseBody| -> anyhow::Result<String> {
                    Ok(body.text().await?)
                },
                async |err: &switchyard::Error| -> anyhow::Result<String> {
                    Err(anyhow::anyhow!("unexpected failure: {err}"))
                },
            )
            .await
            .unwrap();
        assert_eq!(text, r#"{"x":1}"#, "{backend}");
    }
}

#[tokio::test]
async fn stream_error_handler_sees_status_failures() {
    for (backend, http) in clients() {
        let code = http
            .get(&uri("/status/500"))
            .unwrap()
            .submit_for_stream(
                async |_: &mut ResponseBody| -> anyhow::Result<u16> { Ok(200) },
                async |err: &switchyard::Error| -> anyhow::Result<u16> { Ok(err.status_code()) },
            )
            .await
            .unwrap();
        assert_eq!(code, 500, "{backend}");
    }
}
