#![forbid(unsafe_code)]

//! Twitch subscription checker: consumes the OAuth callback, confirms the
//! user subscribes to the configured channel and forwards them on.

pub mod config;
pub mod http;
pub mod pipeline;
pub mod redirect;
pub mod server;
pub mod twitch;

#[cfg(test)]
mod test_support;
