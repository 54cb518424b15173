//! Values handed to handler methods and the conversions around them.
//!
//! A handler method takes zero parameters or exactly one. The single parameter
//! is extracted from a [`HandlerInput`] through [`FromInput`]; the return value
//! is turned into a response through [`IntoHandlerOutcome`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::Query;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::HandlerError;

pub type HandlerResult = Result<Response, HandlerError>;

/// Which kind of input a handler parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Http,
    Socket,
    Event,
    /// Accepts whatever the transport supplies (`HandlerInput` itself).
    Any,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputKind::Http => "http",
            InputKind::Socket => "socket",
            InputKind::Event => "event",
            InputKind::Any => "any",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Request-scoped state for HTTP routes, global handlers and failure handlers.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    data: HashMap<String, Value>,
    user: Option<String>,
    failure: Option<Arc<HandlerError>>,
}

impl RoutingContext {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            params: HashMap::new(),
            data: HashMap::new(),
            user: None,
            failure: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path parameter captured by `:name`, `{name}` or a regex group.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// First query-string value for `name`, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&self.uri).ok()?;
        pairs.into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_as_string(&self) -> Result<String, HandlerError> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| HandlerError::bad_request(format!("body is not valid UTF-8: {e}")))
    }

    pub fn body_as_json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HandlerError::bad_request(format!("invalid JSON body: {e}")))
    }

    /// Stores a value for later handlers in the same request.
    pub fn put(&mut self, key: impl Into<String>, value: impl Serialize) {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.data.insert(key.into(), v);
            }
            Err(e) => tracing::warn!(error = %e, "RoutingContext::put: value is not serializable"),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Identity established by an auth handler.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = Some(user.into());
    }

    /// The error being handled, when this context reached a failure handler.
    pub fn failure(&self) -> Option<&HandlerError> {
        self.failure.as_deref()
    }

    /// Status code of the failure being handled (500 when unknown).
    pub fn status_code(&self) -> Option<StatusCode> {
        self.failure.as_ref().map(|f| f.status_code())
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub(crate) fn set_failure(&mut self, failure: Arc<HandlerError>) {
        self.failure = Some(failure);
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Frame received from a socket peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    Binary(Bytes),
}

/// Upgraded connection handed to `#[sockjs]` handlers.
pub struct SocketSession {
    socket: WebSocket,
    path: String,
    params: HashMap<String, String>,
    user: Option<String>,
}

impl fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSession")
            .field("path", &self.path)
            .field("params", &self.params)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl SocketSession {
    pub(crate) fn new(
        socket: WebSocket,
        path: String,
        params: HashMap<String, String>,
        user: Option<String>,
    ) -> Self {
        Self {
            socket,
            path,
            params,
            user,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Next data frame; `None` once the peer closed the connection.
    /// Control frames are answered by the transport and skipped here.
    pub async fn recv(&mut self) -> Option<Result<SocketFrame, HandlerError>> {
        loop {
            let msg = match self.socket.recv().await? {
                Ok(m) => m,
                Err(e) => return Some(Err(HandlerError::Other(anyhow::Error::new(e)))),
            };
            match msg {
                Message::Text(t) => return Some(Ok(SocketFrame::Text(t.as_str().to_owned()))),
                Message::Binary(b) => return Some(Ok(SocketFrame::Binary(b))),
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), HandlerError> {
        let text: String = text.into();
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| HandlerError::Other(anyhow::Error::new(e)))
    }

    pub async fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<(), HandlerError> {
        self.socket
            .send(Message::Binary(data.into()))
            .await
            .map_err(|e| HandlerError::Other(anyhow::Error::new(e)))
    }

    pub async fn close(mut self) -> Result<(), HandlerError> {
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| HandlerError::Other(anyhow::Error::new(e)))
    }
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Value>>>>;

/// Message delivered to `#[consumer]` handlers.
#[derive(Debug, Clone)]
pub struct EventMessage {
    address: String,
    body: Value,
    headers: HashMap<String, String>,
    reply: Option<ReplySlot>,
}

impl EventMessage {
    pub fn new(address: impl Into<String>, body: Value) -> Self {
        Self {
            address: address.into(),
            body,
            headers: HashMap::new(),
            reply: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub(crate) fn with_reply(mut self, tx: oneshot::Sender<Value>) -> Self {
        self.reply = Some(Arc::new(Mutex::new(Some(tx))));
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        T::deserialize(&self.body)
            .map_err(|e| HandlerError::bad_request(format!("invalid event body: {e}")))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Answers a `request`. Returns false when the sender expects no reply
    /// or a reply was already sent.
    pub fn reply(&self, value: impl Serialize) -> bool {
        let Some(slot) = &self.reply else {
            return false;
        };
        let Some(tx) = slot.lock().take() else {
            return false;
        };
        match serde_json::to_value(value) {
            Ok(v) => tx.send(v).is_ok(),
            Err(e) => {
                tracing::warn!(address = %self.address, error = %e, "event reply is not serializable");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input / output conversions
// ---------------------------------------------------------------------------

/// Whatever the transport supplies to a handler invocation.
#[derive(Debug)]
pub enum HandlerInput {
    Http(RoutingContext),
    Socket(SocketSession),
    Event(EventMessage),
}

impl HandlerInput {
    pub fn kind(&self) -> InputKind {
        match self {
            HandlerInput::Http(_) => InputKind::Http,
            HandlerInput::Socket(_) => InputKind::Socket,
            HandlerInput::Event(_) => InputKind::Event,
        }
    }
}

/// Extraction of a handler's single parameter.
pub trait FromInput: Sized + Send + 'static {
    const KIND: InputKind;

    fn from_input(input: HandlerInput) -> Result<Self, HandlerError>;
}

fn mismatch(expected: InputKind, input: &HandlerInput) -> HandlerError {
    HandlerError::InputMismatch {
        expected,
        actual: input.kind(),
    }
}

impl FromInput for RoutingContext {
    const KIND: InputKind = InputKind::Http;

    fn from_input(input: HandlerInput) -> Result<Self, HandlerError> {
        match input {
            HandlerInput::Http(ctx) => Ok(ctx),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

impl FromInput for SocketSession {
    const KIND: InputKind = InputKind::Socket;

    fn from_input(input: HandlerInput) -> Result<Self, HandlerError> {
        match input {
            HandlerInput::Socket(s) => Ok(s),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

impl FromInput for EventMessage {
    const KIND: InputKind = InputKind::Event;

    fn from_input(input: HandlerInput) -> Result<Self, HandlerError> {
        match input {
            HandlerInput::Event(m) => Ok(m),
            other => Err(mismatch(Self::KIND, &other)),
        }
    }
}

impl FromInput for HandlerInput {
    const KIND: InputKind = InputKind::Any;

    fn from_input(input: HandlerInput) -> Result<Self, HandlerError> {
        Ok(input)
    }
}

/// Conversion of a handler's return value.
pub trait IntoHandlerOutcome {
    fn into_outcome(self) -> HandlerResult;
}

impl IntoHandlerOutcome for () {
    fn into_outcome(self) -> HandlerResult {
        Ok(StatusCode::OK.into_response())
    }
}

impl IntoHandlerOutcome for Response {
    fn into_outcome(self) -> HandlerResult {
        Ok(self)
    }
}

impl IntoHandlerOutcome for String {
    fn into_outcome(self) -> HandlerResult {
        Ok(self.into_response())
    }
}

impl IntoHandlerOutcome for &'static str {
    fn into_outcome(self) -> HandlerResult {
        Ok(self.into_response())
    }
}

impl IntoHandlerOutcome for StatusCode {
    fn into_outcome(self) -> HandlerResult {
        Ok(self.into_response())
    }
}

impl IntoHandlerOutcome for Value {
    fn into_outcome(self) -> HandlerResult {
        Ok(Json(self).into_response())
    }
}

impl<T: Serialize> IntoHandlerOutcome for Json<T> {
    fn into_outcome(self) -> HandlerResult {
        Ok(self.into_response())
    }
}

impl<T: Serialize> IntoHandlerOutcome for (StatusCode, Json<T>) {
    fn into_outcome(self) -> HandlerResult {
        Ok(self.into_response())
    }
}

impl<T, E> IntoHandlerOutcome for Result<T, E>
where
    T: IntoHandlerOutcome,
    E: Into<HandlerError>,
{
    fn into_outcome(self) -> HandlerResult {
        self.map_err(Into::into).and_then(IntoHandlerOutcome::into_outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uri: &str) -> RoutingContext {
        RoutingContext::new(
            Method::GET,
            uri.parse().unwrap(),
            HeaderMap::new(),
            Bytes::from_static(br#"{"name":"ada"}"#),
        )
    }

    #[test]
    fn query_params_are_decoded() {
        let c = ctx("/users/list?name=ada%20lovelace&page=2&q=a+b&tag=x&tag=y&flag");
        assert_eq!(c.query_param("name").as_deref(), Some("ada lovelace"));
        assert_eq!(c.query_param("page").as_deref(), Some("2"));
        assert_eq!(c.query_param("q").as_deref(), Some("a b"));
        assert_eq!(c.query_param("tag").as_deref(), Some("x"));
        assert_eq!(c.query_param("flag").as_deref(), Some(""));
        assert!(c.query_param("missing").is_none());
        assert!(ctx("/users/list").query_param("name").is_none());
    }

    #[test]
    fn json_body_and_data_bag() {
        #[derive(serde::Deserialize)]
        struct Body {
            name: String,
        }
        let mut c = ctx("/");
        let body: Body = c.body_as_json().unwrap();
        assert_eq!(body.name, "ada");

        c.put("count", 3);
        assert_eq!(c.get("count"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn input_extraction_reports_mismatch() {
        let msg = EventMessage::new("users.created", serde_json::json!({}));
        let err = RoutingContext::from_input(HandlerInput::Event(msg)).unwrap_err();
        match err {
            HandlerError::InputMismatch { expected, actual } => {
                assert_eq!(expected, InputKind::Http);
                assert_eq!(actual, InputKind::Event);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn result_outcome_maps_errors() {
        let ok: Result<&'static str, HandlerError> = Ok("fine");
        assert_eq!(ok.into_outcome().unwrap().status(), StatusCode::OK);

        let err: Result<String, anyhow::Error> = Err(anyhow::anyhow!("boom"));
        let e = err.into_outcome().unwrap_err();
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn event_reply_is_single_shot() {
        let (tx, rx) = oneshot::channel();
        let msg = EventMessage::new("a", Value::Null).with_reply(tx);
        let copy = msg.clone();
        assert!(msg.reply("first"));
        assert!(!copy.reply("second"));
        assert_eq!(rx.await.unwrap(), serde_json::json!("first"));
    }
}
