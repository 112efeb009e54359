//! Catalog database configuration

use serde::{Deserialize, Serialize};

/// Connection settings for the shared source catalog (Postgres).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Hostname of the database server
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number of the database server
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username for database authentication
    pub user: String,
    /// Password for database authentication
    #[serde(default)]
    pub password: String,
    /// Name of the database
    pub dbname: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

impl DatabaseConfig {
    /// Connection URL in the form the sqlx Postgres driver expects.
    pub fn connect_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: "crawler".to_string(),
            password: String::new(),
            dbname: "sitehound".to_string(),
        }
    }
}
