//! Session cookie helpers

use axum::http::HeaderMap;

use crate::config::CookieConfig;

/// Read a cookie value from the `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value storing `value` under `name` for `max_age_secs`
pub fn build_set_cookie(config: &CookieConfig, name: &str, value: &str, max_age_secs: i64) -> String {
    let mut cookie = format!("{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax", name, value, max_age_secs);
    if config.secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &config.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    cookie
}

/// `Set-Cookie` value that makes the browser drop `name`
pub fn build_clear_cookie(config: &CookieConfig, name: &str) -> String {
    build_set_cookie(config, name, "", -1)
}
