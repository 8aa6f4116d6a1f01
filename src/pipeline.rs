#![forbid(unsafe_code)]

//! The request pipeline: validate settings and parameters, then exchange the
//! code, resolve the user, resolve the channel and check the subscription.
//! The first failing stage ends the request.

use tracing::{error, info, warn};

use crate::config::{AppConfig, SuccessMode};
use crate::http::StageError;
use crate::redirect::build_redirect_url;
use crate::twitch::{Identity, SubscriptionRecord, SubscriptionStatus, TokenPair, TwitchApi};

/// Query parameters Twitch appends when redirecting back to us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub scope: Option<String>,
}

impl CallbackParams {
    /// Reads the raw query string. A repeated parameter keeps its first
    /// value, and malformed percent escapes are kept as written, so no query
    /// is ever rejected.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        for pair in query.unwrap_or_default().split('&') {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match decode_component(name).as_str() {
                "code" => &mut params.code,
                "scope" => &mut params.scope,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(decode_component(value));
            }
        }
        params
    }
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Token,
    User,
    Channel,
    Subscription,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::User => "user",
            Self::Channel => "channel",
            Self::Subscription => "subscription",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            Self::Token => "Could not get access token",
            Self::User => "Could not get user information",
            Self::Channel => "Could not get channel information",
            Self::Subscription => "Could not get subscription status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    ConfigurationError,
    MissingParameter(&'static str),
    Upstream { stage: Stage, error: StageError },
    NotSubscribed,
    Redirect(String),
    Report(String),
}

impl Outcome {
    /// Inline HTML shown for every outcome except a redirect. Upstream detail
    /// stays in the logs.
    pub fn page(&self) -> String {
        match self {
            Self::ConfigurationError => wrap_page("Server error: Invalid configuration"),
            Self::MissingParameter(name) => {
                wrap_page(&format!("Bad request: Missing required parameter: {name}"))
            }
            Self::Upstream { stage, .. } => {
                wrap_page(&format!("Server error: {}", stage.failure_message()))
            }
            Self::NotSubscribed => wrap_page("User is not subscribed to the channel"),
            Self::Redirect(url) => wrap_page(&format!(
                "Redirecting to <a href=\"{0}\">{0}</a>",
                escape_html(url)
            )),
            Self::Report(page) => page.clone(),
        }
    }
}

fn wrap_page(body: &str) -> String {
    format!("<html><body>{body}</body></html>")
}

/// Runs the whole chain for one callback. Blocks on each outbound call.
pub fn run(api: &TwitchApi, config: &AppConfig, params: &CallbackParams) -> Outcome {
    let missing = config.missing_settings();
    if !missing.is_empty() {
        error!(?missing, "required settings are blank");
        return Outcome::ConfigurationError;
    }

    let Some(code) = params
        .code
        .as_deref()
        .filter(|code| !code.trim().is_empty())
    else {
        warn!("callback without an authorization code");
        return Outcome::MissingParameter("code");
    };

    let tokens = match api.exchange_code(
        &config.client_id,
        &config.client_secret,
        &config.redirect_uri,
        code,
    ) {
        Ok(tokens) => tokens,
        Err(error) => return upstream_failure(Stage::Token, error),
    };

    let identity = match api.current_user(&config.client_id, &tokens.access_token) {
        Ok(identity) => identity,
        Err(error) => return upstream_failure(Stage::User, error),
    };

    let channel = match api.find_channel(
        &config.client_id,
        &config.channel_name,
        &tokens.access_token,
    ) {
        Ok(channel) => channel,
        Err(error) => return upstream_failure(Stage::Channel, error),
    };

    let subscription = match api.subscription_status(
        &config.client_id,
        &tokens.access_token,
        &identity.id,
        &channel.id,
    ) {
        Ok(SubscriptionStatus::Subscribed(record)) => record,
        Ok(SubscriptionStatus::NotSubscribed) => {
            info!(user = %identity.name, channel = %channel.name, "user is not subscribed");
            return Outcome::NotSubscribed;
        }
        Err(error) => return upstream_failure(Stage::Subscription, error),
    };

    info!(
        user = %identity.name,
        channel = %subscription.channel.name,
        plan = %subscription.plan_name,
        "subscription confirmed"
    );
    match config.success_mode {
        SuccessMode::Redirect => Outcome::Redirect(build_redirect_url(
            &config.success_redirect_url,
            &identity,
            &subscription,
        )),
        SuccessMode::Report => Outcome::Report(render_report(
            code,
            params.scope.as_deref().unwrap_or_default(),
            &tokens,
            &identity,
            &subscription,
        )),
    }
}

fn upstream_failure(stage: Stage, error: StageError) -> Outcome {
    error!(stage = stage.as_str(), %error, "pipeline stage failed");
    Outcome::Upstream { stage, error }
}

/// Diagnostic page listing everything the pipeline learned.
pub fn render_report(
    code: &str,
    scope: &str,
    tokens: &TokenPair,
    identity: &Identity,
    subscription: &SubscriptionRecord,
) -> String {
    let rows = [
        ("code", code),
        ("scope", scope),
        ("access token", tokens.access_token.as_str()),
        ("refresh token", tokens.refresh_token.as_str()),
        ("user id", identity.id.as_str()),
        ("user email", identity.email.as_str()),
        ("user name", identity.name.as_str()),
        ("user displayed name", identity.display_name.as_str()),
        ("subscription plan name", subscription.plan_name.as_str()),
        ("channel id", subscription.channel.id.as_str()),
        ("channel name", subscription.channel.name.as_str()),
    ];
    let body = rows
        .iter()
        .map(|(label, value)| format!("{label}: {}", escape_html(value)))
        .collect::<Vec<_>>()
        .join("<br>");
    wrap_page(&body)
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
