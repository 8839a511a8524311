use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::JwtClaims;
use crate::error::ApiError;
use crate::services::AppState;

/// Fixed-window counter: the first hit creates the key with a TTL, later hits
/// increment it until the limit is reached.
const FIXED_WINDOW_SCRIPT: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if current == false then
        redis.call('SET', KEYS[1], 1, 'EX', tonumber(ARGV[2]))
        return 1
    end
    if tonumber(current) >= tonumber(ARGV[1]) then
        return 0
    end
    redis.call('INCR', KEYS[1])
    return 1
"#;

#[derive(Debug, Clone, Copy)]
struct RateRule {
    scope: &'static str,
    limit: u32,
    window_seconds: u64,
    /// Env var that overrides `limit`.
    limit_env: &'static str,
}

const API_RULE: RateRule = RateRule {
    scope: "api",
    limit: 120,
    window_seconds: 60,
    limit_env: "RATE_LIMIT_PER_USER",
};

const LOGIN_RULE: RateRule = RateRule {
    scope: "login",
    limit: 10,
    window_seconds: 300,
    limit_env: "RATE_LIMIT_LOGIN_ATTEMPTS",
};

const REGISTER_RULE: RateRule = RateRule {
    scope: "register",
    limit: 5,
    window_seconds: 3600,
    limit_env: "RATE_LIMIT_REGISTER_ATTEMPTS",
};

impl RateRule {
    fn effective_limit(&self) -> u32 {
        std::env::var(self.limit_env)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(self.limit)
    }

    fn key(&self, subject: &str) -> String {
        format!("ratelimit:{}:{}", self.scope, subject)
    }
}

fn rate_limiting_disabled() -> bool {
    std::env::var("RATE_LIMIT_DISABLED").is_ok_and(|value| value == "1")
}

/// Client address, preferring proxy headers over the socket peer.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    if let Some(forwarded_for) = header("x-forwarded-for") {
        if let Some(first) = forwarded_for.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(forwarded) = header("forwarded") {
        let found = forwarded
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("for="))
            .map(|value| value.trim_matches('"'))
            .next();
        if let Some(ip) = found {
            return ip.to_string();
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.trim().to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn enforce(redis: &ConnectionManager, rule: RateRule, subject: &str) -> Result<(), ApiError> {
    if rate_limiting_disabled() {
        return Ok(());
    }

    let mut conn = redis.clone();
    let allowed: u32 = redis::Script::new(FIXED_WINDOW_SCRIPT)
        .key(rule.key(subject))
        .arg(rule.effective_limit())
        .arg(rule.window_seconds)
        .invoke_async(&mut conn)
        .await
        .map_err(|e| anyhow::anyhow!("rate limit check failed: {}", e))?;

    if allowed == 1 {
        Ok(())
    } else {
        tracing::warn!(scope = rule.scope, subject, "Rate limit exceeded");
        Err(ApiError::RateLimited(
            "Too many requests, please try again later".to_string(),
        ))
    }
}

/// Per-user limit for authenticated routes; falls back to the client IP
/// when no claims are present. Must run after the auth middleware.
pub async fn api_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let subject = match request.extensions().get::<JwtClaims>() {
        Some(claims) => format!("user:{}", claims.sub),
        None => format!("ip:{}", client_ip(request.headers(), request.extensions())),
    };
    enforce(&state.redis, API_RULE, &subject).await?;
    Ok(next.run(request).await)
}

pub async fn login_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(request.headers(), request.extensions());
    enforce(&state.redis, LOGIN_RULE, &ip).await?;
    Ok(next.run(request).await)
}

pub async fn register_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(request.headers(), request.extensions());
    enforce(&state.redis, REGISTER_RULE, &ip).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_for_entry() {
        let h = headers(&[("x-forwarded-for", "10.0.0.1, 172.16.0.1"), ("x-real-ip", "9.9.9.9")]);
        assert_eq!(client_ip(&h, &Extensions::new()), "10.0.0.1");
    }

    #[test]
    fn test_client_ip_reads_forwarded_header() {
        let h = headers(&[("forwarded", "for=\"5.6.7.8\";proto=https")]);
        assert_eq!(client_ip(&h, &Extensions::new()), "5.6.7.8");
    }

    #[test]
    fn test_client_ip_falls_back_to_socket_peer() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo::<SocketAddr>("7.7.7.7:1234".parse().unwrap()));
        assert_eq!(client_ip(&HeaderMap::new(), &extensions), "7.7.7.7");
        assert_eq!(client_ip(&HeaderMap::new(), &Extensions::new()), "unknown");
    }

    #[test]
    fn test_keys_are_scoped() {
        assert_eq!(LOGIN_RULE.key("1.2.3.4"), "ratelimit:login:1.2.3.4");
        assert_eq!(API_RULE.key("user:abc"), "ratelimit:api:user:abc");
    }

    #[test]
    #[serial]
    fn test_limit_override_from_env() {
        std::env::set_var("RATE_LIMIT_LOGIN_ATTEMPTS", "3");
        assert_eq!(LOGIN_RULE.effective_limit(), 3);
        std::env::set_var("RATE_LIMIT_LOGIN_ATTEMPTS", "not-a-number");
        assert_eq!(LOGIN_RULE.effective_limit(), LOGIN_RULE.limit);
        std::env::remove_var("RATE_LIMIT_LOGIN_ATTEMPTS");
    }
}
