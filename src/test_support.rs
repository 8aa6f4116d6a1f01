#![forbid(unsafe_code)]

//! In-process stand-in for the Twitch API. Serves canned replies from a
//! background thread and records every request it receives.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
};

use axum::{
    Form, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::twitch::TwitchApi;

#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Replies {
    pub token: Reply,
    pub user: Reply,
    pub channel: Reply,
    pub subscription: Reply,
}

impl Replies {
    /// Every endpoint succeeds and the user is subscribed.
    pub fn happy() -> Self {
        Self {
            token: Reply::json(200, json!({"access_token": "A", "refresh_token": "R"})),
            user: Reply::json(
                200,
                json!({
                    "_id": "42",
                    "email": "viewer+tv@example.com",
                    "name": "viewer",
                    "display_name": "Viewer",
                    "logo": "https://cdn.example.com/logo 1.png",
                }),
            ),
            channel: Reply::json(200, json!({"data": [{"id": "99", "login": "chan"}]})),
            subscription: Reply::json(
                200,
                json!({
                    "sub_plan_name": "Tier 1",
                    "created_at": "2021-05-03T10:00:00Z",
                    "channel": {"_id": "99", "name": "chan"},
                }),
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Recorded {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

struct StubState {
    replies: Replies,
    calls: Mutex<Vec<Recorded>>,
}

impl StubState {
    fn record(
        &self,
        path: String,
        headers: &HeaderMap,
        query: HashMap<String, String>,
        form: HashMap<String, String>,
    ) {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        self.calls.lock().unwrap().push(Recorded {
            path,
            headers,
            query,
            form,
        });
    }
}

pub(crate) struct StubTwitch {
    pub base: String,
    state: Arc<StubState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubTwitch {
    pub fn start(replies: Replies) -> Self {
        let state = Arc::new(StubState {
            replies,
            calls: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/kraken/oauth2/token", post(token))
            .route("/kraken/user", get(user))
            .route("/helix/users", get(channel))
            .route(
                "/kraken/users/{user_id}/subscriptions/{channel_id}",
                get(subscription),
            )
            .with_state(state.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .unwrap();
            });
        });

        Self {
            base: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown),
        }
    }

    pub fn api(&self) -> TwitchApi {
        TwitchApi::new(self.base.clone())
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, prefix: &str) -> Vec<Recorded> {
        self.calls()
            .into_iter()
            .filter(|call| call.path.starts_with(prefix))
            .collect()
    }
}

impl Drop for StubTwitch {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn respond(reply: &Reply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap();
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body.clone(),
    )
        .into_response()
}

async fn token(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.record("/kraken/oauth2/token".into(), &headers, HashMap::new(), form);
    respond(&state.replies.token)
}

async fn user(State(state): State<Arc<StubState>>, headers: HeaderMap) -> Response {
    state.record("/kraken/user".into(), &headers, HashMap::new(), HashMap::new());
    respond(&state.replies.user)
}

async fn channel(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("/helix/users".into(), &headers, query, HashMap::new());
    respond(&state.replies.channel)
}

async fn subscription(
    State(state): State<Arc<StubState>>,
    Path((user_id, channel_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    state.record(
        format!("/kraken/users/{user_id}/subscriptions/{channel_id}"),
        &headers,
        HashMap::new(),
        HashMap::new(),
    );
    respond(&state.replies.subscription)
}
