//! Request encoding policy shared by every backend.
//!
//! - `GET`, `DELETE`, `HEAD`: parameters go to the query string, the body is
//!   never sent.
//! - `POST`, `PUT`, `PATCH`, first match wins:
//!   1. `multipart/form-data` content type: one part per parameter value;
//!   2. explicit body: sent as-is with the configured content type;
//!   3. parameters: URL-encoded form in the request charset;
//!   4. otherwise an empty entity.

use std::borrow::Cow;

use bytes::Bytes;
use encoding_rs::UTF_8;
use url::form_urlencoded;

use crate::{
    Request,
    request::Body,
    transport::{Entity, Outgoing},
};

/// Content type of URL-encoded forms.
pub const APPLICATION_X_WWW_FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Content type selecting the multipart encoding.
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

pub(crate) fn encode(request: &Request) -> Outgoing {
    let mut url = request.url.clone();
    let entity = if request.method.has_entity() {
        Some(entity(request))
    } else {
        if !request.params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, values) in &request.params {
                for value in values {
                    query.append_pair(name, &value.to_string());
                }
            }
        }
        None
    };

    let headers = request
        .headers
        .iter()
        .flat_map(|(name, values)| values.iter().map(move |value| (name.clone(), value.clone())))
        .collect();

    Outgoing {
        method: request.method,
        url,
        headers,
        entity,
    }
}

fn entity(request: &Request) -> Entity {
    if is_multipart(request.mime_type.as_deref()) {
        let parts = request
            .params
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name.clone(), value.clone())))
            .collect();
        return Entity::Multipart { parts };
    }

    let content_type = request.mime_type.clone();
    match &request.body {
        Some(Body::Bytes(data)) => Entity::Bytes {
            data: data.clone(),
            content_type,
        },
        Some(Body::File(path)) => Entity::File {
            path: path.clone(),
            content_type,
        },
        None if !request.params.is_empty() => Entity::Bytes {
            data: form(request),
            content_type: Some(form_content_type(request)),
        },
        None => Entity::Empty { content_type },
    }
}

fn is_multipart(mime_type: Option<&str>) -> bool {
    mime_type.is_some_and(|mime| {
        mime.split(';')
            .next()
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(MULTIPART_FORM_DATA))
    })
}

fn form(request: &Request) -> Bytes {
    let charset = request.charset;
    let encode: &dyn Fn(&str) -> Cow<'_, [u8]> = &|text: &str| charset.encode(text).0;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer.encoding_override(Some(encode));
    for (name, values) in &request.params {
        for value in values {
            serializer.append_pair(name, &value.to_string());
        }
    }
    Bytes::from(serializer.finish())
}

fn form_content_type(request: &Request) -> String {
    if request.charset == UTF_8 {
        APPLICATION_X_WWW_FORM_URLENCODED.to_owned()
    } else {
        format!(
            "{APPLICATION_X_WWW_FORM_URLENCODED}; charset={}",
            request.charset.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use super::*;
    use crate::{
        Http, Method,
        param::ParamValue,
        transport::{Transport, TransportFuture},
    };

    #[derive(Debug)]
    struct Unreachable;

    impl Transport for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn execute(&self, _request: Outgoing) -> TransportFuture<'_> {
            unreachable!("encoding tests never submit")
        }
    }

    fn request(url: &str) -> Request {
        Http::builder()
            .transport(Arc::new(Unreachable))
            .build()
            .unwrap()
            .new_req(url)
            .unwrap()
    }

    #[test]
    fn query_methods_append_params_and_drop_body() {
        for method in [Method::Get, Method::Delete, Method::Head] {
            let request = request("http://example.com/search?lang=en")
                .method(method)
                .params([("q", "a b"), ("q", "c")])
                .unwrap()
                .body_text("ignored");
            let outgoing = encode(&request);
            assert_eq!(
                outgoing.url.as_str(),
                "http://example.com/search?lang=en&q=a+b&q=c"
            );
            assert!(outgoing.entity.is_none());
        }
    }

    #[test]
    fn query_is_untouched_without_params() {
        let outgoing = encode(&request("http://example.com/path"));
        assert_eq!(outgoing.url.as_str(), "http://example.com/path");
    }

    #[test]
    fn post_params_become_urlencoded_form() {
        let request = request("http://example.com/")
            .method(Method::Post)
            .param("x", "1")
            .unwrap();
        let outgoing = encode(&request);
        assert_eq!(
            outgoing.entity,
            Some(Entity::Bytes {
                data: Bytes::from_static(b"x=1"),
                content_type: Some(APPLICATION_X_WWW_FORM_URLENCODED.to_owned()),
            })
        );
        assert_eq!(outgoing.url.as_str(), "http://example.com/");
    }

    #[test]
    fn form_uses_request_charset() {
        let request = request("http://example.com/")
            .method(Method::Put)
            .charset("iso-8859-1")
            .unwrap()
            .param("name", "é")
            .unwrap();
        let Some(Entity::Bytes { data, content_type }) = encode(&request).entity else {
            panic!("expected a form entity");
        };
        assert_eq!(data, Bytes::from_static(b"name=%E9"));
        assert_eq!(
            content_type.as_deref(),
            Some("application/x-www-form-urlencoded; charset=windows-1252")
        );
    }

    #[test]
    fn explicit_body_wins_over_params() {
        let request = request("http://example.com/")
            .method(Method::Patch)
            .param("x", "1")
            .unwrap()
            .mime_type("text/plain")
            .body_text("raw");
        assert_eq!(
            encode(&request).entity,
            Some(Entity::Bytes {
                data: Bytes::from_static(b"raw"),
                content_type: Some("text/plain".to_owned()),
            })
        );

        let file = request.body_file("/tmp/upload.bin");
        assert_eq!(
            encode(&file).entity,
            Some(Entity::File {
                path: PathBuf::from("/tmp/upload.bin"),
                content_type: Some("text/plain".to_owned()),
            })
        );
    }

    #[test]
    fn multipart_keeps_every_value_in_order() {
        let request = request("http://example.com/upload")
            .method(Method::Post)
            .mime_type("multipart/form-data")
            .params([("a", ParamValue::from("1")), ("a", ParamValue::from(vec![0_u8, 1]))])
            .unwrap()
            .param("f", PathBuf::from("/tmp/x.txt"))
            .unwrap();
        let Some(Entity::Multipart { parts }) = encode(&request).entity else {
            panic!("expected multipart");
        };
        let names: Vec<_> = parts.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["a", "a", "f"]);
        assert!(!parts[0].1.is_binary());
        assert!(parts[1].1.is_binary());
        assert!(parts[2].1.is_binary());
    }

    #[test]
    fn empty_entity_without_body_or_params() {
        let request = request("http://example.com/").method(Method::Post);
        assert_eq!(
            encode(&request).entity,
            Some(Entity::Empty { content_type: None })
        );
    }

    #[test]
    fn headers_are_flattened_in_order() {
        let request = request("http://example.com/")
            .header("Accept", "a; b")
            .add_header("X-Id", "7");
        let outgoing = encode(&request);
        assert_eq!(
            outgoing.headers,
            vec![
                ("Accept".to_owned(), "a".to_owned()),
                ("Accept".to_owned(), "b".to_owned()),
                ("X-Id".to_owned(), "7".to_owned()),
            ]
        );
    }
}
