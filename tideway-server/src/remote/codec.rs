//! Wire encodings for the three protocol generations.
//!
//! v4 and v5 speak JSON-RPC 1.0 with a single positional parameter. v4
//! errors are bare strings; v5 errors carry a kind and help text. v6 speaks
//! JSON-RPC 2.0 and separates application errors, which travel inside a
//! successful result, from transport errors in the `error` member.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ErrorKind, ProtocolVersion, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Ping,
    Version,
    ListServices,
    ListImages,
    Export,
    UpdateManifests,
    SyncNotify,
    JobStatus,
    SyncStatus,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Ping,
        Method::Version,
        Method::ListServices,
        Method::ListImages,
        Method::Export,
        Method::UpdateManifests,
        Method::SyncNotify,
        Method::JobStatus,
        Method::SyncStatus,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            Method::Ping => "Daemon.Ping",
            Method::Version => "Daemon.Version",
            Method::ListServices => "Daemon.ListServices",
            Method::ListImages => "Daemon.ListImages",
            Method::Export => "Daemon.Export",
            Method::UpdateManifests => "Daemon.UpdateManifests",
            Method::SyncNotify => "Daemon.NotifyChange",
            Method::JobStatus => "Daemon.JobStatus",
            Method::SyncStatus => "Daemon.SyncStatus",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.wire_name() == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub result: Result<Value, RemoteError>,
}

/// One protocol generation's framing.
///
/// The server uses the request encoder and response decoder; the daemon
/// side uses the other two.
pub trait Codec: Copy + Send + Sync + 'static {
    const VERSION: ProtocolVersion;

    fn encode_request(&self, request: &Request) -> Result<String, RemoteError>;
    fn decode_request(&self, frame: &str) -> Result<Request, RemoteError>;
    fn encode_response(&self, response: &Response) -> Result<String, RemoteError>;
    fn decode_response(&self, frame: &str) -> Result<Response, RemoteError>;
}

#[derive(Serialize, Deserialize)]
struct LegacyRequest {
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Serialize, Deserialize)]
struct LegacyResponse<E> {
    id: u64,
    #[serde(default)]
    result: Value,
    error: Option<E>,
}

fn encode_legacy_request(request: &Request) -> Result<String, RemoteError> {
    serde_json::to_string(&LegacyRequest {
        method: request.method.clone(),
        params: vec![request.params.clone()],
        id: request.id,
    })
    .map_err(RemoteError::protocol)
}

fn decode_legacy_request(frame: &str) -> Result<Request, RemoteError> {
    let request: LegacyRequest = serde_json::from_str(frame).map_err(RemoteError::protocol)?;
    Ok(Request {
        id: request.id,
        method: request.method,
        params: request.params.into_iter().next().unwrap_or(Value::Null),
    })
}

fn encode_legacy_response<E: Serialize>(
    response: &Response,
    encode_error: impl FnOnce(&RemoteError) -> E,
) -> Result<String, RemoteError> {
    let wire = match &response.result {
        Ok(value) => LegacyResponse {
            id: response.id,
            result: value.clone(),
            error: None,
        },
        Err(err) => LegacyResponse {
            id: response.id,
            result: Value::Null,
            error: Some(encode_error(err)),
        },
    };
    serde_json::to_string(&wire).map_err(RemoteError::protocol)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V4Codec;

impl Codec for V4Codec {
    const VERSION: ProtocolVersion = ProtocolVersion::V4;

    fn encode_request(&self, request: &Request) -> Result<String, RemoteError> {
        encode_legacy_request(request)
    }

    fn decode_request(&self, frame: &str) -> Result<Request, RemoteError> {
        decode_legacy_request(frame)
    }

    fn encode_response(&self, response: &Response) -> Result<String, RemoteError> {
        encode_legacy_response(response, RemoteError::to_string)
    }

    fn decode_response(&self, frame: &str) -> Result<Response, RemoteError> {
        let wire: LegacyResponse<String> =
            serde_json::from_str(frame).map_err(RemoteError::protocol)?;
        // v4 can't say whose fault an error is; treat it as the daemon's.
        let result = match wire.error {
            Some(message) => Err(RemoteError::application(ErrorKind::Server, message)),
            None => Ok(wire.result),
        };
        Ok(Response {
            id: wire.id,
            result,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ApplicationError {
    #[serde(rename = "type")]
    kind: ErrorKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    help: Option<String>,
}

impl ApplicationError {
    fn from_remote(err: &RemoteError) -> Option<Self> {
        match err {
            RemoteError::Application {
                kind,
                message,
                help,
            } => Some(Self {
                kind: *kind,
                message: message.clone(),
                help: help.clone(),
            }),
            _ => None,
        }
    }

    fn into_remote(self) -> RemoteError {
        RemoteError::Application {
            kind: self.kind,
            message: self.message,
            help: self.help,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum V5Error {
    Structured(ApplicationError),
    Plain(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V5Codec;

impl Codec for V5Codec {
    const VERSION: ProtocolVersion = ProtocolVersion::V5;

    fn encode_request(&self, request: &Request) -> Result<String, RemoteError> {
        encode_legacy_request(request)
    }

    fn decode_request(&self, frame: &str) -> Result<Request, RemoteError> {
        decode_legacy_request(frame)
    }

    fn encode_response(&self, response: &Response) -> Result<String, RemoteError> {
        encode_legacy_response(response, |err| match ApplicationError::from_remote(err) {
            Some(app) => V5Error::Structured(app),
            None => V5Error::Plain(err.to_string()),
        })
    }

    fn decode_response(&self, frame: &str) -> Result<Response, RemoteError> {
        let wire: LegacyResponse<V5Error> =
            serde_json::from_str(frame).map_err(RemoteError::protocol)?;
        let result = match wire.error {
            Some(V5Error::Structured(app)) => Err(app.into_remote()),
            Some(V5Error::Plain(message)) => Err(RemoteError::Fatal(message)),
            None => Ok(wire.result),
        };
        Ok(Response {
            id: wire.id,
            result,
        })
    }
}

const JSONRPC_VERSION: &str = "2.0";
const INVALID_REQUEST: i64 = -32600;
const SERVER_ERROR: i64 = -32000;

#[derive(Serialize, Deserialize)]
struct V6Request {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: u64,
}

#[derive(Serialize, Deserialize)]
struct V6Response {
    jsonrpc: String,
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<V6Result>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<V6Error>,
}

#[derive(Serialize, Deserialize)]
struct V6Result {
    #[serde(rename = "Result", default)]
    result: Value,
    #[serde(rename = "ApplicationError", default)]
    application_error: Option<ApplicationError>,
}

#[derive(Serialize, Deserialize)]
struct V6Error {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V6Codec;

impl Codec for V6Codec {
    const VERSION: ProtocolVersion = ProtocolVersion::V6;

    fn encode_request(&self, request: &Request) -> Result<String, RemoteError> {
        serde_json::to_string(&V6Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: request.method.clone(),
            params: request.params.clone(),
            id: request.id,
        })
        .map_err(RemoteError::protocol)
    }

    fn decode_request(&self, frame: &str) -> Result<Request, RemoteError> {
        let request: V6Request = serde_json::from_str(frame).map_err(RemoteError::protocol)?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(RemoteError::Protocol(format!(
                "unsupported jsonrpc version {:?}",
                request.jsonrpc
            )));
        }
        Ok(Request {
            id: request.id,
            method: request.method,
            params: request.params,
        })
    }

    fn encode_response(&self, response: &Response) -> Result<String, RemoteError> {
        let (result, error) = match &response.result {
            Ok(value) => (
                Some(V6Result {
                    result: value.clone(),
                    application_error: None,
                }),
                None,
            ),
            Err(err) => match ApplicationError::from_remote(err) {
                Some(app) => (
                    Some(V6Result {
                        result: Value::Null,
                        application_error: Some(app),
                    }),
                    None,
                ),
                None => {
                    let code = match err {
                        RemoteError::Protocol(_) => INVALID_REQUEST,
                        _ => SERVER_ERROR,
                    };
                    let error = V6Error {
                        code,
                        message: err.to_string(),
                    };
                    (None, Some(error))
                }
            },
        };

        serde_json::to_string(&V6Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: response.id,
            result,
            error,
        })
        .map_err(RemoteError::protocol)
    }

    fn decode_response(&self, frame: &str) -> Result<Response, RemoteError> {
        let wire: V6Response = serde_json::from_str(frame).map_err(RemoteError::protocol)?;
        let result = match (wire.error, wire.result) {
            (Some(error), _) => Err(RemoteError::Fatal(error.message)),
            (None, Some(V6Result {
                application_error: Some(app),
                ..
            })) => Err(app.into_remote()),
            (None, Some(result)) => Ok(result.result),
            (None, None) => Ok(Value::Null),
        };
        Ok(Response {
            id: wire.id,
            result,
        })
    }
}
