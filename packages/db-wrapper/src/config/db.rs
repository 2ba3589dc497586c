use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use super::providers::ConfigProvider;
use super::secrets::UnlockedSecret;
use crate::error::AppError;

/// Dialect used when the secret does not name one.
pub const DEFAULT_DIALECT: &str = "postgresql";

/// Everything except RFC 3986 unreserved characters gets escaped.
const CREDENTIAL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn escape(raw: &str) -> String {
    utf8_percent_encode(raw, CREDENTIAL_ESCAPE).to_string()
}

/// Builds the connection URL for the secret stored at `config_path`.
///
/// The secret is unlocked only for the duration of this call.
pub fn connection_string(
    provider: &dyn ConfigProvider,
    config_path: &[&str],
    db_name: Option<&str>,
) -> Result<String, AppError> {
    let secret = provider.provide(config_path)?;
    secret.with_unlocked(|config| build_connection_string(config, db_name))
}

/// Assembles `dialect[+driver]://username:password@host:port/database[?query]`.
///
/// Username, password and host are percent-escaped; unescaped special
/// characters would otherwise split the URL in the wrong place.
pub fn build_connection_string(
    config: &UnlockedSecret<'_>,
    db_name: Option<&str>,
) -> Result<String, AppError> {
    let username = config.require_string("username")?;
    let password = config.require_string("password")?;
    let host = config.require_string("host")?;
    let port = config.require_string("port")?;

    let dialect = config
        .get_str("dialect")
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DIALECT);
    let scheme = match config.get_str("driver").filter(|d| !d.is_empty()) {
        Some(driver) => format!("{dialect}+{driver}"),
        None => dialect.to_string(),
    };

    let database = match db_name {
        Some(name) => name.to_string(),
        None => config.get_str("database").unwrap_or_default().to_string(),
    };

    let mut url = format!(
        "{scheme}://{username}:{password}@{host}:{port}/{database}",
        username = escape(&username),
        password = escape(&password),
        host = escape(&host),
    );

    if let Some(params) = config.get("query_params") {
        let query = encode_query_params(params)?;
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
    }

    Ok(url)
}

fn encode_query_params(params: &Value) -> Result<String, AppError> {
    match params {
        Value::Null => Ok(String::new()),
        Value::Object(map) => {
            if let Some((key, _)) = map.iter().find(|(_, v)| v.is_object() || v.is_array()) {
                return Err(AppError::config(format!(
                    "query_params.{key} must be a scalar value"
                )));
            }
            serde_urlencoded::to_string(map)
                .map_err(|e| AppError::config(format!("Invalid query_params: {e}")))
        }
        _ => Err(AppError::config("query_params must be a mapping")),
    }
}

/// Replaces the password portion of a connection URL for logging.
///
/// Credentials end at the last `@` before the query string, so a raw `@`
/// in the username or password still lands inside the masked part.
pub fn sanitize_connection_string(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let before_query = rest.split('?').next().unwrap_or(rest);
    let Some(at) = before_query.rfind('@') else {
        return url.to_string();
    };
    let credentials = &rest[..at];
    match credentials.find(':') {
        Some(colon) => format!(
            "{}://{}:***{}",
            &url[..scheme_end],
            &credentials[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
