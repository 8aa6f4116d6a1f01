#![forbid(unsafe_code)]

//! Success redirect construction. Only the four allow-listed placeholders are
//! ever substituted; every other `${...}` in the template is left untouched.

use std::collections::BTreeMap;

use tracing::debug;

use crate::twitch::{Identity, SubscriptionRecord};

pub const USERNAME: &str = "username";
pub const EMAIL: &str = "email";
pub const LOGO: &str = "logo";
pub const SUBDATE: &str = "subdate";

const ALLOWED_KEYS: [&str; 4] = [USERNAME, EMAIL, LOGO, SUBDATE];
const SUBDATE_FORMAT: &str = "%Y-%m-%d";

/// Percent-encoded values keyed by placeholder name.
pub fn redirect_parameters(
    identity: &Identity,
    subscription: &SubscriptionRecord,
) -> BTreeMap<&'static str, String> {
    let subdate = subscription.started_at.format(SUBDATE_FORMAT).to_string();
    [
        (USERNAME, identity.name.as_str()),
        (EMAIL, identity.email.as_str()),
        (LOGO, identity.logo.as_str()),
        (SUBDATE, subdate.as_str()),
    ]
    .into_iter()
    .map(|(key, value)| (key, urlencoding::encode(value).into_owned()))
    .collect()
}

/// Replaces `${key}` for allow-listed keys present in `params`. Scans the
/// template once, so substituted values are never rescanned.
pub fn substitute(template: &str, params: &BTreeMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match params.get(key).filter(|_| ALLOWED_KEYS.contains(&key)) {
            Some(value) => out.push_str(value),
            None => {
                debug!(placeholder = key, "leaving placeholder unsubstituted");
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

pub fn build_redirect_url(
    template: &str,
    identity: &Identity,
    subscription: &SubscriptionRecord,
) -> String {
    substitute(template, &redirect_parameters(identity, subscription))
}
