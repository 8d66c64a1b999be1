//! Response classification.
//!
//! # Design
//! Every attempt ends here. The body is parsed as JSON even for failing
//! status codes so the server's `"message"` can be surfaced. A body that does
//! not parse is permanent regardless of the status code: a 503 with an HTML
//! body from an edge proxy is reported as malformed and not retried.

use serde_json::{Map, Value};

use crate::error::{ApiError, TransportError, ILL_FORMED_RESPONSE, INVALID_RESPONSE};
use crate::http::HttpResponse;

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

pub fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}

pub fn is_server_error(status: u16) -> bool {
    (500..600).contains(&status)
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Transient(ApiError),
    Permanent(ApiError),
}

impl Outcome {
    fn from_error(error: ApiError) -> Self {
        if error.is_transient() {
            Outcome::Transient(error)
        } else {
            Outcome::Permanent(error)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Classify the raw result of a single transport attempt.
pub fn classify(result: Result<HttpResponse, TransportError>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(err) => return Outcome::Transient(ApiError::Network(err)),
    };

    let object = match parse_object(&response.body) {
        Ok(object) => object,
        Err(err) => return Outcome::Permanent(err),
    };

    if is_success(response.status) {
        return Outcome::Success(Value::Object(object));
    }

    let message = object
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    Outcome::from_error(ApiError::HttpStatus {
        status: response.status,
        message,
    })
}

fn parse_object(body: &str) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(ApiError::MalformedResponse {
            status: INVALID_RESPONSE,
            message: "server response not a JSON object".to_string(),
        }),
        Err(err) => Err(ApiError::MalformedResponse {
            status: ILL_FORMED_RESPONSE,
            message: format!("server returned ill-formed JSON: {err}"),
        }),
    }
}
