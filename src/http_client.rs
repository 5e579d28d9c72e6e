use std::time::Duration;

use tracing::error;

use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("levelgate/", env!("CARGO_PKG_VERSION"));

/// Client used to talk to the remote filter store.
///
/// An unusable proxy setting is logged and ignored rather than failing
/// startup.
#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config.https_proxy.as_deref()) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, no proxy will be used",
                e
            );
            build_client(None).unwrap_or_default()
        }
    }
}

fn build_client(https_proxy: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
    let builder = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT);
    // This covers LEVELGATE_PROXY_HTTPS and HTTPS_PROXY
    match https_proxy {
        Some(uri) => builder.proxy(reqwest::Proxy::https(uri)?).build(),
        None => builder.build(),
    }
}
