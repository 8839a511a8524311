use serde::Deserialize;
use std::env;

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub bind_addr: String,
    pub activity_channel_capacity: usize,
    /// Zero disables expiry of unsubmitted quiz attempts.
    pub quiz_attempt_ttl_seconds: i64,
    pub metrics_basic_auth: String,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings, &app_env)
    }

    pub fn from_settings(
        settings: &config::Config,
        app_env: &str,
    ) -> Result<Self, config::ConfigError> {
        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "coursegraph".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            Err(_) => {
                tracing::warn!("Using default JWT secret (dev mode only)");
                DEV_JWT_SECRET.to_string()
            }
        };

        let token_ttl_seconds = settings.get_int("auth.token_ttl_seconds").unwrap_or(7200);
        if token_ttl_seconds <= 0 {
            return Err(config::ConfigError::Message(
                "auth.token_ttl_seconds must be positive".to_string(),
            ));
        }

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let activity_channel_capacity = settings
            .get_int("activity.channel_capacity")
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(256);

        let quiz_attempt_ttl_seconds = settings
            .get_int("quiz.attempt_ttl_seconds")
            .unwrap_or(0)
            .max(0);

        let metrics_basic_auth = settings
            .get_string("metrics.basic_auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or_else(|_| "admin:changeme".to_string());

        let admin_email = settings
            .get_string("bootstrap.admin_email")
            .or_else(|_| env::var("ADMIN_EMAIL"))
            .ok();
        let admin_password = settings
            .get_string("bootstrap.admin_password")
            .or_else(|_| env::var("ADMIN_PASSWORD"))
            .ok();
        let bootstrap_admin = match (admin_email, admin_password) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                email,
                password,
                name: settings
                    .get_string("bootstrap.admin_name")
                    .unwrap_or_else(|_| "Administrator".to_string()),
            }),
            _ => None,
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            token_ttl_seconds,
            bind_addr,
            activity_channel_capacity,
            quiz_attempt_ttl_seconds,
            metrics_basic_auth,
            bootstrap_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn settings(overrides: &[(&str, &str)]) -> config::Config {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    #[serial]
    fn test_defaults_when_only_secret_is_set() {
        let cfg = Config::from_settings(&settings(&[("auth.jwt_secret", "s3cret")]), "dev")
            .unwrap();

        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.token_ttl_seconds, 7200);
        assert_eq!(cfg.activity_channel_capacity, 256);
        assert_eq!(cfg.quiz_attempt_ttl_seconds, 0);
    }

    #[test]
    #[serial]
    fn test_prod_requires_jwt_secret() {
        std::env::remove_var("JWT_SECRET");
        let result = Config::from_settings(&settings(&[]), "prod");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_bootstrap_admin_needs_email_and_password() {
        std::env::remove_var("ADMIN_EMAIL");
        std::env::remove_var("ADMIN_PASSWORD");

        let partial = Config::from_settings(
            &settings(&[
                ("auth.jwt_secret", "x"),
                ("bootstrap.admin_email", "root@example.com"),
            ]),
            "dev",
        )
        .unwrap();
        assert!(partial.bootstrap_admin.is_none());

        let full = Config::from_settings(
            &settings(&[
                ("auth.jwt_secret", "x"),
                ("bootstrap.admin_email", "root@example.com"),
                ("bootstrap.admin_password", "Root123!@#"),
            ]),
            "dev",
        )
        .unwrap();
        let admin = full.bootstrap_admin.unwrap();
        assert_eq!(admin.email, "root@example.com");
        assert_eq!(admin.name, "Administrator");
    }

    #[test]
    #[serial]
    fn test_negative_attempt_ttl_is_clamped() {
        let cfg = Config::from_settings(
            &settings(&[("auth.jwt_secret", "x"), ("quiz.attempt_ttl_seconds", "-5")]),
            "dev",
        )
        .unwrap();
        assert_eq!(cfg.quiz_attempt_ttl_seconds, 0);
    }
}
