//! The execution loop: one ordered queue, one in-flight call.
//!
//! # Design
//! A `Session` is owned by a single tokio task. That task is the only code
//! that touches the queue, the token, or the sticky error, so exactly one
//! network call (login or data) is outstanding per session at any time and
//! no locking is needed. Callers submit through an unbounded channel; the
//! task appends submissions to the tail in arrival order and drains the
//! queue one [`step`](Session::step) at a time.
//!
//! Token lifecycle: no token → log in before the next dispatch. A 401 clears
//! the token and puts the same action back at the head, so it is the first
//! thing tried after the fresh login. That happens at most
//! [`MAX_AUTH_RETRIES`] times per action; a 401 on a token obtained for the
//! retry means login itself is not producing usable tokens, which is fatal
//! for the session. A 403 clears the token but is delivered to the caller.
//!
//! A failed login is sticky: every queued action, and every action
//! submitted afterwards, fails with that error without touching the network.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::auth::{self, TokenBundle};
use crate::config::Credentials;
use crate::error::ApiError;
use crate::http::HttpRequest;
use crate::response::classify;
use crate::transport::Transport;

/// Re-attempts allowed per action after a rejected token.
pub const MAX_AUTH_RETRIES: u8 = 1;

pub struct Session {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    pending: VecDeque<Action>,
    auth: Option<TokenBundle>,
    last_error: Option<ApiError>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials) -> Self {
        Session {
            transport,
            credentials,
            pending: VecDeque::new(),
            auth: None,
            last_error: None,
        }
    }

    pub fn enqueue(&mut self, action: Action) {
        self.pending.push_back(action);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn token(&self) -> Option<&TokenBundle> {
        self.auth.as_ref()
    }

    pub fn last_error(&self) -> Option<&ApiError> {
        self.last_error.as_ref()
    }

    /// Process queued actions until none are left.
    pub async fn drive(&mut self) {
        while !self.pending.is_empty() {
            self.step().await;
        }
    }

    /// Perform one transition: fail-drain, log in, or dispatch the head action.
    pub async fn step(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(err) = self.last_error.clone() {
            self.fail_drain(&err);
            return;
        }
        let Some(token) = self.auth.clone() else {
            self.login().await;
            return;
        };
        if let Some(action) = self.pending.pop_front() {
            self.dispatch(action, &token).await;
        }
    }

    async fn login(&mut self) {
        info!(host = %self.credentials.login_host, user = %self.credentials.username, "logging in");
        match auth::authenticate(self.transport.as_ref(), &self.credentials).await {
            Ok(token) => {
                info!(instance = %token.instance_host, "login succeeded");
                self.auth = Some(token);
            }
            Err(err) => {
                warn!(error = %err, queued = self.pending.len(), "login failed, session is now unusable");
                self.last_error = Some(err.clone());
                self.fail_drain(&err);
            }
        }
    }

    async fn dispatch(&mut self, mut action: Action, token: &TokenBundle) {
        debug!(method = action.method.as_str(), command = %action.command, "dispatching");
        let request = HttpRequest::api(
            action.method,
            &token.instance_host,
            &action.command,
            &token.access_token,
            action.payload.clone(),
        );
        let result = match self.transport.send(request, action.mode()).await {
            Ok(response) => classify(response),
            Err(err) => Err(err),
        };

        match result {
            Ok(outcome) => action.complete(Ok(outcome)),
            Err(err) if err.is_retryable() => {
                self.auth = None;
                if action.auth_retries < MAX_AUTH_RETRIES {
                    action.auth_retries += 1;
                    debug!(command = %action.command, "token rejected, retrying after login");
                    self.pending.push_front(action);
                } else {
                    let fatal = ApiError::auth(false, "token rejected again right after login");
                    warn!(command = %action.command, "fresh token rejected, session is now unusable");
                    self.last_error = Some(fatal.clone());
                    action.complete(Err(fatal.clone()));
                    self.fail_drain(&fatal);
                }
            }
            Err(err) => {
                if err.clears_token() {
                    debug!("access denied, dropping token");
                    self.auth = None;
                }
                action.complete(Err(err));
            }
        }
    }

    fn fail_drain(&mut self, err: &ApiError) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), error = %err, "failing queued actions");
        }
        while let Some(action) = self.pending.pop_front() {
            action.complete(Err(err.clone()));
        }
    }

    /// Own the session until every submitter is gone.
    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Action>) {
        while let Some(action) = inbox.recv().await {
            self.enqueue(action);
            while let Ok(action) = inbox.try_recv() {
                self.enqueue(action);
            }
            self.drive().await;
        }
        debug!("all broker handles dropped, session finished");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::action::Reply;
    use crate::auth::TOKEN_PATH;
    use crate::http::{BodyMode, HttpMethod, HttpResponse};
    use crate::response::Body;

    /// Plays back canned responses and records every request it sees.
    #[derive(Default)]
    struct Script {
        responses: Mutex<VecDeque<Result<HttpResponse, ApiError>>>,
        seen: Mutex<Vec<(HttpMethod, String, Option<String>)>>,
    }

    impl Script {
        fn new(responses: Vec<Result<HttpResponse, ApiError>>) -> Arc<Self> {
            Arc::new(Script {
                responses: Mutex::new(responses.into()),
                seen: Mutex::default(),
            })
        }

        fn seen(&self) -> Vec<(HttpMethod, String, Option<String>)> {
            self.seen.lock().unwrap().clone()
        }

        fn logins(&self) -> usize {
            self.seen().iter().filter(|(_, path, _)| path.starts_with(TOKEN_PATH)).count()
        }

        fn data_calls(&self) -> Vec<String> {
            self.seen()
                .into_iter()
                .filter(|(_, path, _)| !path.starts_with(TOKEN_PATH))
                .map(|(_, path, _)| path)
                .collect()
        }
    }

    #[async_trait]
    impl Transport for Script {
        async fn send(&self, request: HttpRequest, _mode: BodyMode) -> Result<HttpResponse, ApiError> {
            let auth = request.header("Authorization").map(str::to_string);
            self.seen.lock().unwrap().push((request.method, request.path.clone(), auth));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("script ran out of responses")
        }
    }

    fn login_ok(token: &str) -> Result<HttpResponse, ApiError> {
        let body = json!({"access_token": token, "instance_url": "https://na1.example.com"}).to_string();
        Ok(HttpResponse::buffered(200, Some("application/json"), body))
    }

    fn json_ok(status: u16, value: serde_json::Value) -> Result<HttpResponse, ApiError> {
        Ok(HttpResponse::buffered(status, Some("application/json"), value.to_string()))
    }

    fn status(code: u16) -> Result<HttpResponse, ApiError> {
        Ok(HttpResponse::buffered(code, Some("application/json"), "[]"))
    }

    fn credentials() -> Credentials {
        Credentials {
            login_host: "login.example.com".into(),
            username: "u".into(),
            password: "p".into(),
            credential: "t".into(),
            client_id: "c".into(),
            client_secret: "s".into(),
        }
    }

    fn session(script: &Arc<Script>) -> Session {
        Session::new(script.clone(), credentials())
    }

    fn get(session: &mut Session, path: &str) -> Reply<Body> {
        let (action, reply) = Action::buffered(HttpMethod::Get, path.to_string(), None);
        session.enqueue(action);
        reply
    }

    #[tokio::test]
    async fn actions_complete_in_submission_order() {
        let script = Script::new(vec![
            login_ok("t1"),
            json_ok(200, json!({"n": 1})),
            json_ok(200, json!({"n": 2})),
            json_ok(200, json!({"n": 3})),
        ]);
        let mut s = session(&script);
        let replies: Vec<_> = ["/a", "/b", "/c"].iter().map(|p| get(&mut s, p)).collect();
        s.drive().await;

        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(reply.await.unwrap(), Body::Json(json!({"n": i + 1})));
        }
        assert_eq!(script.data_calls(), vec!["/a", "/b", "/c"]);
        assert_eq!(script.logins(), 1);
    }

    #[tokio::test]
    async fn empty_queue_does_nothing() {
        let script = Script::new(vec![]);
        let mut s = session(&script);
        s.drive().await;
        assert!(script.seen().is_empty());
        assert!(s.token().is_none());
    }

    #[tokio::test]
    async fn unauthorized_is_retried_once_before_later_actions() {
        let script = Script::new(vec![
            login_ok("old"),
            status(401),
            login_ok("new"),
            json_ok(201, json!({"id": "003xx", "success": true})),
            json_ok(200, json!({"after": true})),
        ]);
        let mut s = session(&script);
        let (create, created) = Action::buffered(
            HttpMethod::Post,
            "/sobjects/Contact".into(),
            Some(Bytes::from_static(br#"{"LastName":"Doe"}"#)),
        );
        s.enqueue(create);
        let later = get(&mut s, "/later");
        s.drive().await;

        assert_eq!(created.await.unwrap(), Body::Json(json!({"id": "003xx", "success": true})));
        assert!(later.await.is_ok());
        assert_eq!(script.data_calls(), vec!["/sobjects/Contact", "/sobjects/Contact", "/later"]);
        assert_eq!(script.logins(), 2);

        let auth: Vec<_> = script.seen().into_iter().filter_map(|(_, _, a)| a).collect();
        assert_eq!(auth, vec!["OAuth old", "OAuth new", "OAuth new"]);
    }

    #[tokio::test]
    async fn second_unauthorized_is_fatal_not_a_loop() {
        let script = Script::new(vec![login_ok("a"), status(401), login_ok("b"), status(401)]);
        let mut s = session(&script);
        let first = get(&mut s, "/first");
        let second = get(&mut s, "/second");
        s.drive().await;

        assert!(matches!(first.await, Err(ApiError::Auth { retryable: false, .. })));
        assert!(matches!(second.await, Err(ApiError::Auth { retryable: false, .. })));
        assert_eq!(script.data_calls(), vec!["/first", "/first"]);
        assert!(s.last_error().is_some());

        let late = get(&mut s, "/late");
        s.drive().await;
        assert!(late.await.is_err());
        assert_eq!(script.seen().len(), 4);
    }

    #[tokio::test]
    async fn forbidden_goes_to_caller_and_next_action_logs_in() {
        let script = Script::new(vec![login_ok("a"), status(403), login_ok("b"), json_ok(200, json!({}))]);
        let mut s = session(&script);
        let denied = get(&mut s, "/denied");
        let next = get(&mut s, "/next");
        s.drive().await;

        assert!(matches!(denied.await, Err(ApiError::Auth { retryable: false, .. })));
        assert!(next.await.is_ok());
        assert_eq!(script.data_calls(), vec!["/denied", "/next"]);
        assert_eq!(script.logins(), 2);
        assert!(s.last_error().is_none());
    }

    #[tokio::test]
    async fn failed_login_fails_everything_without_network() {
        let script = Script::new(vec![status(400)]);
        let mut s = session(&script);
        let a = get(&mut s, "/a");
        let b = get(&mut s, "/b");
        s.drive().await;

        assert!(matches!(a.await, Err(ApiError::Auth { retryable: false, .. })));
        assert!(matches!(b.await, Err(ApiError::Auth { retryable: false, .. })));

        let c = get(&mut s, "/c");
        s.drive().await;
        assert!(matches!(c.await, Err(ApiError::Auth { .. })));
        assert_eq!(script.seen().len(), 1);
        assert!(script.data_calls().is_empty());
    }

    #[tokio::test]
    async fn request_errors_are_not_retried_and_keep_the_token() {
        let script = Script::new(vec![
            login_ok("a"),
            status(500),
            Err(ApiError::Decode("simulated".into())),
            json_ok(200, json!({"ok": true})),
        ]);
        let mut s = session(&script);
        let failed = get(&mut s, "/boom");
        let broken = get(&mut s, "/broken");
        let fine = get(&mut s, "/fine");
        s.drive().await;

        assert!(matches!(failed.await, Err(ApiError::Request { status: 500, .. })));
        assert!(matches!(broken.await, Err(ApiError::Decode(_))));
        assert!(fine.await.is_ok());
        assert_eq!(script.logins(), 1);
        assert!(s.token().is_some());
    }

    fn refused() -> ApiError {
        ApiError::transport(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
    }

    #[tokio::test]
    async fn transport_failure_is_delivered_unchanged_and_not_retried() {
        let script = Script::new(vec![login_ok("a"), Err(refused()), json_ok(200, json!({"ok": true}))]);
        let mut s = session(&script);
        let dropped = get(&mut s, "/dropped");
        let next = get(&mut s, "/next");
        s.drive().await;

        match dropped.await {
            Err(ApiError::Transport(source)) => assert_eq!(source.to_string(), "refused"),
            other => panic!("expected transport failure, got {other:?}"),
        }
        assert!(next.await.is_ok());
        assert_eq!(script.data_calls(), vec!["/dropped", "/next"]);
        assert_eq!(script.logins(), 1);
        assert!(s.token().is_some());
        assert!(s.last_error().is_none());
    }

    #[tokio::test]
    async fn transport_failure_during_login_is_sticky() {
        let script = Script::new(vec![Err(refused())]);
        let mut s = session(&script);
        let a = get(&mut s, "/a");
        let b = get(&mut s, "/b");
        s.drive().await;

        assert!(matches!(a.await, Err(ApiError::Transport(_))));
        assert!(matches!(b.await, Err(ApiError::Transport(_))));
        assert!(matches!(s.last_error(), Some(ApiError::Transport(_))));

        let c = get(&mut s, "/c");
        s.drive().await;
        assert!(matches!(c.await, Err(ApiError::Transport(_))));
        assert_eq!(script.seen().len(), 1);
    }

    #[tokio::test]
    async fn no_content_is_synthesized() {
        let script = Script::new(vec![login_ok("a"), Ok(HttpResponse::buffered(204, None, ""))]);
        let mut s = session(&script);
        let (action, reply) = Action::buffered(HttpMethod::Delete, "/sobjects/Account/001".into(), None);
        s.enqueue(action);
        s.drive().await;
        assert_eq!(reply.await.unwrap(), Body::Json(json!({"errors": [], "success": true})));
    }

    #[tokio::test]
    async fn run_loop_serves_channel_submissions_in_order() {
        let script = Script::new(vec![login_ok("a"), json_ok(200, json!(1)), json_ok(200, json!(2))]);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session(&script).run(rx));

        let (a, first) = Action::buffered(HttpMethod::Get, "/1".into(), None);
        let (b, second) = Action::buffered(HttpMethod::Get, "/2".into(), None);
        tx.send(a).unwrap();
        tx.send(b).unwrap();

        assert_eq!(first.await.unwrap(), Body::Json(json!(1)));
        assert_eq!(second.await.unwrap(), Body::Json(json!(2)));
        drop(tx);
        task.await.unwrap();
    }
}
