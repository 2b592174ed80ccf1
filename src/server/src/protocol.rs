//! Wire model of the JSON requests and responses.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skizze_manager::{Error, ErrorKind};

/// Request is the body of every call. Fields a verb does not need are ignored,
/// missing fields take their defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Request {
    pub domain: String,
    pub domain_type: String,
    pub capacity: u64,
    pub values: Vec<String>,
}

impl Request {
    /// parse decodes a request body. An empty body is an empty request.
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| Error::InvalidRequest(format!("malformed request body: {}", e)))
    }

    pub fn values(&self) -> Vec<Bytes> {
        self.values
            .iter()
            .map(|v| Bytes::copy_from_slice(v.as_bytes()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result: Option<Value>,
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn error(e: &Error) -> Self {
        Self {
            result: None,
            error: Some(ErrorBody {
                code: e.kind().code().to_string(),
                message: e.to_string(),
            }),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("failed to encode response: {}", e);
                br#"{"result":null,"error":{"code":"SERIALIZATION_FAILURE","message":"response encoding failed"}}"#.to_vec()
            }
        }
    }
}

/// status maps an error kind to its HTTP status code.
pub fn status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::DomainNotFound => 404,
        ErrorKind::DomainAlreadyExists => 409,
        ErrorKind::InvalidMethod => 405,
        ErrorKind::InvalidRequest => 400,
        ErrorKind::NotSupported => 501,
        ErrorKind::StorageFailure | ErrorKind::SerializationFailure => 500,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use skizze_manager::Error;

    use crate::protocol::{status, Request, Response};

    #[test]
    fn test_parse_request() {
        let req = Request::parse(br#"{"domainType":"hllpp","capacity":100,"values":["a","b"]}"#).unwrap();
        assert_eq!(req.domain_type, "hllpp");
        assert_eq!(req.capacity, 100);
        assert_eq!(req.values(), vec!["a".as_bytes(), "b".as_bytes()]);

        assert_eq!(Request::parse(b"").unwrap(), Request::default());
        assert_eq!(Request::parse(b" \r\n").unwrap(), Request::default());

        let err = Request::parse(b"{\"values\":").err().unwrap();
        assert_eq!(err.kind().code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_response_shape() {
        let ok = serde_json::to_value(Response::ok(json!(["a"]))).unwrap();
        assert_eq!(ok, json!({"result": ["a"], "error": null}));

        let e = Error::DomainNotFound("x".into());
        assert_eq!(status(e.kind()), 404);
        let err = serde_json::to_value(Response::error(&e)).unwrap();
        assert_eq!(err["result"], json!(null));
        assert_eq!(err["error"]["code"], json!("DOMAIN_NOT_FOUND"));
    }
}
