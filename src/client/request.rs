use reqwest::Method;
use serde_json::Value;

/// An outbound platform API call. The access token is added by the client.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path under the API base, e.g. `/message/send`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Multipart upload in the `media` field
    Media { file_name: String, bytes: Vec<u8> },
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn upload(path: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Media {
                file_name: file_name.into(),
                bytes,
            },
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiPayload {
    Json(Value),
    Binary {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

impl ApiPayload {
    /// Classify a raw body. JSON is recognized by content type or by a
    /// leading `{`; anything that fails to parse is kept as binary.
    pub fn from_body(content_type: Option<String>, bytes: Vec<u8>) -> Self {
        let declared_json = content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);
        let looks_json = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .map(|b| *b == b'{')
            .unwrap_or(false);

        if declared_json || looks_json {
            if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                return ApiPayload::Json(value);
            }
        }
        ApiPayload::Binary {
            content_type,
            bytes,
        }
    }

    /// `errcode`, if this is a JSON body carrying one.
    pub fn error_code(&self) -> Option<i64> {
        match self {
            ApiPayload::Json(value) => value.get("errcode").and_then(Value::as_i64),
            ApiPayload::Binary { .. } => None,
        }
    }

    pub fn error_message(&self) -> String {
        match self {
            ApiPayload::Json(value) => value
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            ApiPayload::Binary { .. } => String::new(),
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ApiPayload::Json(value) => Some(value),
            ApiPayload::Binary { .. } => None,
        }
    }
}
