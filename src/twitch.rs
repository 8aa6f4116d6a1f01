#![forbid(unsafe_code)]

//! The four upstream lookups. Kraken (v5) calls authenticate with the
//! `OAuth` scheme and ask for the versioned media type; the Helix user lookup
//! uses `Bearer`.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::http::{HttpResponse, StageError, USER_AGENT, read_response};

const KRAKEN_V5_MEDIA_TYPE: &str = "application/vnd.twitchtv.v5+json";
const TOKEN_PATH: &str = "/kraken/oauth2/token";
const USER_PATH: &str = "/kraken/user";
const USERS_BY_LOGIN_PATH: &str = "/helix/users";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
    pub display_name: String,
    /// Empty when the API omitted it.
    pub logo: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub plan_name: String,
    pub started_at: DateTime<FixedOffset>,
    /// The channel as the subscription API describes it.
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribed(SubscriptionRecord),
    NotSubscribed,
}

#[derive(Deserialize)]
struct TokenBody {
    access_token: String,
    refresh_token: String,
}

#[derive(Deserialize)]
struct KrakenUser {
    #[serde(rename = "_id")]
    id: String,
    email: String,
    name: String,
    display_name: String,
    #[serde(default)]
    logo: Option<String>,
}

#[derive(Deserialize)]
struct HelixUsers {
    data: Vec<HelixUser>,
}

#[derive(Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

#[derive(Deserialize)]
struct KrakenSubscription {
    sub_plan_name: String,
    created_at: String,
    channel: KrakenChannel,
}

#[derive(Deserialize)]
struct KrakenChannel {
    #[serde(rename = "_id")]
    id: String,
    name: String,
}

/// Blocking client for the Twitch endpoints the pipeline needs.
pub struct TwitchApi {
    agent: ureq::Agent,
    api_base: String,
}

impl TwitchApi {
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            agent: ureq::AgentBuilder::new().user_agent(USER_AGENT).build(),
            api_base,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Trades an authorization code for an access/refresh token pair.
    pub fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenPair, StageError> {
        info!("exchanging authorization code");
        let result = self.agent.post(&self.url(TOKEN_PATH)).send_form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ]);
        let response = expect_ok(read_response(result), "token")?;
        let body: TokenBody = parse_body(&response, "token")?;
        Ok(TokenPair {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
        })
    }

    /// Resolves the user the access token belongs to.
    pub fn current_user(
        &self,
        client_id: &str,
        access_token: &str,
    ) -> Result<Identity, StageError> {
        info!("resolving authenticated user");
        let result = self
            .agent
            .get(&self.url(USER_PATH))
            .set("Accept", KRAKEN_V5_MEDIA_TYPE)
            .set("Client-ID", client_id)
            .set("Authorization", &format!("OAuth {access_token}"))
            .call();
        let response = expect_ok(read_response(result), "user")?;
        let user: KrakenUser = parse_body(&response, "user")?;
        if user.logo.is_none() {
            debug!(user_id = %user.id, "user has no logo");
        }
        Ok(Identity {
            id: user.id,
            email: user.email,
            name: user.name,
            display_name: user.display_name,
            logo: user.logo.unwrap_or_default(),
        })
    }

    /// Looks a channel up by login. The first match is used as-is.
    pub fn find_channel(
        &self,
        client_id: &str,
        login: &str,
        access_token: &str,
    ) -> Result<Channel, StageError> {
        info!(login, "resolving channel");
        let result = self
            .agent
            .get(&self.url(USERS_BY_LOGIN_PATH))
            .query("login", login)
            .set("Client-ID", client_id)
            .set("Authorization", &format!("Bearer {access_token}"))
            .call();
        let response = expect_ok(read_response(result), "channel")?;
        let users: HelixUsers = parse_body(&response, "channel")?;
        let Some(first) = users.data.into_iter().next() else {
            warn!(login, "channel lookup returned no users");
            return Err(StageError::Parse("empty data array".into()));
        };
        Ok(Channel {
            id: first.id,
            name: first.login,
        })
    }

    /// Asks whether `user_id` subscribes to `channel_id`. A 404 is the normal
    /// "not subscribed" answer, not a failure.
    pub fn subscription_status(
        &self,
        client_id: &str,
        access_token: &str,
        user_id: &str,
        channel_id: &str,
    ) -> Result<SubscriptionStatus, StageError> {
        info!(user_id, channel_id, "checking subscription");
        let path = format!(
            "/kraken/users/{}/subscriptions/{}",
            urlencoding::encode(user_id),
            urlencoding::encode(channel_id)
        );
        let result = self
            .agent
            .get(&self.url(&path))
            .set("Accept", KRAKEN_V5_MEDIA_TYPE)
            .set("Client-ID", client_id)
            .set("Authorization", &format!("OAuth {access_token}"))
            .call();
        let response = read_response(result).inspect_err(|err| {
            warn!(stage = "subscription", error = %err, "request failed");
        })?;
        if response.code == 404 {
            debug!(user_id, channel_id, "user is not subscribed");
            return Ok(SubscriptionStatus::NotSubscribed);
        }
        let response = expect_ok(Ok(response), "subscription")?;
        let body: KrakenSubscription = parse_body(&response, "subscription")?;
        let started_at = DateTime::parse_from_rfc3339(&body.created_at).map_err(|err| {
            warn!(
                stage = "subscription",
                created_at = %body.created_at,
                error = %err,
                "unparseable subscription date"
            );
            StageError::Parse(format!("created_at: {err}"))
        })?;
        Ok(SubscriptionStatus::Subscribed(SubscriptionRecord {
            plan_name: body.sub_plan_name,
            started_at,
            channel: Channel {
                id: body.channel.id,
                name: body.channel.name,
            },
        }))
    }
}

/// Only a 200 counts as success; anything else is logged with its body.
fn expect_ok(
    result: Result<HttpResponse, StageError>,
    stage: &'static str,
) -> Result<HttpResponse, StageError> {
    let response = result.inspect_err(|err| {
        warn!(stage, error = %err, "request failed");
    })?;
    if response.code != 200 {
        warn!(stage, %response, "unexpected http status code");
        return Err(StageError::status(&response));
    }
    debug!(stage, code = response.code, "upstream responded");
    Ok(response)
}

fn parse_body<T: serde::de::DeserializeOwned>(
    response: &HttpResponse,
    stage: &'static str,
) -> Result<T, StageError> {
    serde_json::from_str(&response.body).map_err(|err| {
        warn!(stage, error = %err, "could not parse response body");
        StageError::from(err)
    })
}
