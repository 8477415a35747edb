//! Per-request context handed to route handlers and middleware.

use serde::de::DeserializeOwned;

use crate::Request;

/// Per-request context wrapping the parsed [`Request`].
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Deserializes the request body as JSON.
    ///
    /// An empty body is treated as `{}`, so payload types whose fields all
    /// have defaults still deserialize and can report missing fields themselves.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        let body = self.request.body();
        if body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_slice(b"{}");
        }
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct Payload {
        name: String,
    }

    fn context(body: &str) -> Context {
        let raw = format!(
            "POST /x HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req)
    }

    #[test]
    fn parses_json_body() {
        let p: Payload = context(r#"{"name":"glm"}"#).json().unwrap();
        assert_eq!(p.name, "glm");
    }

    #[test]
    fn empty_body_is_empty_object() {
        let p: Payload = context("").json().unwrap();
        assert!(p.name.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(context("not json").json::<Payload>().is_err());
    }
}
