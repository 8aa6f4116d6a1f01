#![forbid(unsafe_code)]

//! Axum wiring for the OAuth callback. The pipeline itself is blocking, so
//! each request runs it on the blocking pool.

use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    extract::{RawQuery, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tracing::{error, info};

use crate::config::load_app_config;
use crate::pipeline::{self, CallbackParams, Outcome};
use crate::twitch::TwitchApi;

pub const CALLBACK_PATH: &str = "/auth";

/// Shared state injected into the handlers. Settings are not cached here;
/// they are read again for every callback.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<TwitchApi>,
    pub properties_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(api: TwitchApi, properties_path: PathBuf) -> Self {
        Self {
            api: Arc::new(api),
            properties_path: Arc::new(properties_path),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(auth_callback))
        .fallback(not_found)
        .with_state(state)
}

pub async fn auth_callback(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Response {
    info!("processing callback request");
    let params = CallbackParams::from_query(query.as_deref());
    let result = tokio::task::spawn_blocking(move || {
        let config = match load_app_config(&state.properties_path) {
            Ok(config) => config,
            Err(err) => {
                error!("could not load properties: {err:#}");
                return Outcome::ConfigurationError;
            }
        };
        pipeline::run(&state.api, &config, &params)
    })
    .await;

    match result {
        Ok(outcome) => outcome.into_response(),
        Err(err) => {
            error!("pipeline task failed: {err}");
            Html("<html><body>Server error</body></html>").into_response()
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("<html><body>Not found</body></html>")).into_response()
}

/// Every outcome other than a redirect is a 200 with an inline page.
impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        let Outcome::Redirect(url) = &self else {
            return Html(self.page()).into_response();
        };
        match HeaderValue::from_str(url) {
            Ok(location) => (
                StatusCode::MOVED_PERMANENTLY,
                [(header::LOCATION, location)],
                Html(self.page()),
            )
                .into_response(),
            Err(err) => {
                error!("redirect url is not a valid header value: {err}");
                Html(Outcome::ConfigurationError.page()).into_response()
            }
        }
    }
}
