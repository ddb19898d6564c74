use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub access: AccessConfig,
    pub filter: FilterConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub declarations_path: String,
    /// Log every enforced restriction at info level
    pub enable_audit_logging: bool,
    /// Warn at startup for call sites without any restriction policy
    pub warn_unrestricted: bool,
    /// Right a caller needs to use the explain endpoint; `None` leaves it open
    pub explain_right: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_limit: Option<i64>,
    pub max_nested_depth: u32,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Access overrides
        if let Ok(v) = env::var("ACCESS_DECLARATIONS_PATH") {
            self.access.declarations_path = v;
        }
        if let Ok(v) = env::var("ACCESS_ENABLE_AUDIT_LOGGING") {
            self.access.enable_audit_logging = v.parse().unwrap_or(self.access.enable_audit_logging);
        }
        if let Ok(v) = env::var("ACCESS_WARN_UNRESTRICTED") {
            self.access.warn_unrestricted = v.parse().unwrap_or(self.access.warn_unrestricted);
        }
        if let Ok(v) = env::var("ACCESS_EXPLAIN_RIGHT") {
            self.access.explain_right = Some(v).filter(|right| !right.is_empty());
        }

        // Filter overrides
        if let Ok(v) = env::var("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().ok();
        }
        if let Ok(v) = env::var("FILTER_MAX_NESTED_DEPTH") {
            self.filter.max_nested_depth = v.parse().unwrap_or(self.filter.max_nested_depth);
        }
        if let Ok(v) = env::var("FILTER_DEBUG_LOGGING") {
            self.filter.debug_logging = v.parse().unwrap_or(self.filter.debug_logging);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }

        // Server overrides
        if let Ok(v) = env::var("HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            access: AccessConfig {
                declarations_path: "config/access.yaml".to_string(),
                enable_audit_logging: false,
                warn_unrestricted: true,
                explain_right: Some("ACCESS_EXPLAIN".to_string()),
            },
            filter: FilterConfig { max_limit: Some(1000), max_nested_depth: 10, debug_logging: true },
            database: DatabaseConfig { max_connections: 10, connection_timeout: 30, enable_query_logging: true },
            server: ServerConfig { host: "127.0.0.1".to_string(), port: 9001 },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                jwt_secret: "development-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            access: AccessConfig {
                declarations_path: "config/access.yaml".to_string(),
                enable_audit_logging: true,
                warn_unrestricted: true,
                explain_right: Some("ACCESS_EXPLAIN".to_string()),
            },
            filter: FilterConfig { max_limit: Some(500), max_nested_depth: 5, debug_logging: false },
            database: DatabaseConfig { max_connections: 20, connection_timeout: 10, enable_query_logging: true },
            server: ServerConfig { host: "0.0.0.0".to_string(), port: 9001 },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            access: AccessConfig {
                declarations_path: "/etc/custodian/access.yaml".to_string(),
                enable_audit_logging: true,
                warn_unrestricted: true,
                explain_right: Some("ACCESS_EXPLAIN".to_string()),
            },
            filter: FilterConfig { max_limit: Some(100), max_nested_depth: 3, debug_logging: false },
            database: DatabaseConfig { max_connections: 50, connection_timeout: 5, enable_query_logging: false },
            server: ServerConfig { host: "0.0.0.0".to_string(), port: 9001 },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}
