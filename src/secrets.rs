//! Credential resolution.
//!
//! Providers are consulted once per process by [`crate::context::RunContext`];
//! nothing else in the pipeline reads credentials.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::SecretsError;

const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_NAME: &str = "aruba_central";

// ---

#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    /// Absent or blank selects bearer fallback.
    pub client_id: Option<String>,
    pub client_secret: SecretString,
    pub customer_id: Option<String>,
    pub base_url: Option<String>,
    pub oauth_token_url: Option<String>,
}

pub trait SecretsProvider: Send + Sync {
    fn get_db_credentials(&self) -> Result<DbCredentials, SecretsError>;
    fn get_api_credentials(&self) -> Result<ApiCredentials, SecretsError>;
}

// ---

/// Credentials from environment variables.
///
/// DB: `DB_HOST`, `DB_USER`, `DB_PASSWORD` (required), `DB_PORT`, `DB_NAME`.
/// API: `ARUBA_CLIENT_SECRET` (required), `ARUBA_CLIENT_ID`,
/// `ARUBA_CUSTOMER_ID`.
pub struct EnvSecrets {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl fmt::Debug for EnvSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSecrets").finish_non_exhaustive()
    }
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSecrets {
    pub fn new() -> Self {
        Self {
            lookup: Box::new(|name| env::var(name).ok()),
        }
    }

    /// Resolve from a fixed map instead of the process environment.
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self {
            lookup: Box::new(move |name| vars.get(name).cloned()),
        }
    }

    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String, SecretsError> {
        self.optional(name)
            .ok_or_else(|| SecretsError::Missing(name.to_owned()))
    }
}

impl SecretsProvider for EnvSecrets {
    fn get_db_credentials(&self) -> Result<DbCredentials, SecretsError> {
        // ---
        let port = match self.optional("DB_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| SecretsError::Missing(format!("DB_PORT (invalid '{raw}')")))?,
            None => DEFAULT_DB_PORT,
        };
        Ok(DbCredentials {
            host: self.required("DB_HOST")?,
            port,
            user: self.required("DB_USER")?,
            password: SecretString::from(self.required("DB_PASSWORD")?),
            database: self
                .optional("DB_NAME")
                .unwrap_or_else(|| DEFAULT_DB_NAME.to_owned()),
        })
    }

    fn get_api_credentials(&self) -> Result<ApiCredentials, SecretsError> {
        // ---
        Ok(ApiCredentials {
            client_id: self.optional("ARUBA_CLIENT_ID"),
            client_secret: SecretString::from(self.required("ARUBA_CLIENT_SECRET")?),
            customer_id: self.optional("ARUBA_CUSTOMER_ID"),
            base_url: None,
            oauth_token_url: None,
        })
    }
}

// ---

#[derive(Deserialize)]
struct DbSecretDoc {
    host: String,
    port: Option<u16>,
    #[serde(alias = "user")]
    username: String,
    password: String,
    #[serde(alias = "database")]
    dbname: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSecretDoc {
    client_id: Option<String>,
    client_secret: String,
    customer_id: Option<String>,
    base_url: Option<String>,
    oauth_token_url: Option<String>,
}

/// Credentials from JSON secret documents on disk, e.g. mounted by the
/// secret store. A side without a path falls back to [`EnvSecrets`].
#[derive(Debug, Default)]
pub struct FileSecrets {
    pub db_path: Option<PathBuf>,
    pub api_path: Option<PathBuf>,
    env: EnvSecrets,
}

impl FileSecrets {
    pub fn new(db_path: Option<PathBuf>, api_path: Option<PathBuf>) -> Self {
        Self {
            db_path,
            api_path,
            env: EnvSecrets::new(),
        }
    }
}

fn read_doc<T: for<'de> Deserialize<'de>>(path: &PathBuf) -> Result<T, SecretsError> {
    // ---
    let name = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| SecretsError::Io {
        path: name.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SecretsError::Invalid { name, source })
}

impl SecretsProvider for FileSecrets {
    fn get_db_credentials(&self) -> Result<DbCredentials, SecretsError> {
        // ---
        let Some(path) = &self.db_path else {
            return self.env.get_db_credentials();
        };
        let doc: DbSecretDoc = read_doc(path)?;
        Ok(DbCredentials {
            host: doc.host,
            port: doc.port.unwrap_or(DEFAULT_DB_PORT),
            user: doc.username,
            password: SecretString::from(doc.password),
            database: doc.dbname.unwrap_or_else(|| DEFAULT_DB_NAME.to_owned()),
        })
    }

    fn get_api_credentials(&self) -> Result<ApiCredentials, SecretsError> {
        // ---
        let Some(path) = &self.api_path else {
            return self.env.get_api_credentials();
        };
        let doc: ApiSecretDoc = read_doc(path)?;
        Ok(ApiCredentials {
            client_id: doc.client_id,
            client_secret: SecretString::from(doc.client_secret),
            customer_id: doc.customer_id,
            base_url: doc.base_url,
            oauth_token_url: doc.oauth_token_url,
        })
    }
}

/// Fixed credentials, for tests and embedding.
#[derive(Debug, Clone)]
pub struct StaticSecrets {
    pub db: Option<DbCredentials>,
    pub api: ApiCredentials,
}

impl SecretsProvider for StaticSecrets {
    fn get_db_credentials(&self) -> Result<DbCredentials, SecretsError> {
        self.db
            .clone()
            .ok_or_else(|| SecretsError::Missing("db credentials".to_owned()))
    }

    fn get_api_credentials(&self) -> Result<ApiCredentials, SecretsError> {
        Ok(self.api.clone())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use secrecy::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> EnvSecrets {
        EnvSecrets::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_env_db_defaults() {
        // ---
        let secrets = vars(&[("DB_HOST", "db"), ("DB_USER", "ingest"), ("DB_PASSWORD", "pw")]);
        let creds = secrets.get_db_credentials().unwrap();
        assert_eq!(creds.port, 5432);
        assert_eq!(creds.database, "aruba_central");
        assert_eq!(creds.password.expose_secret(), "pw");
    }

    #[test]
    fn test_env_missing_secret() {
        // ---
        let err = vars(&[("ARUBA_CLIENT_ID", "id")]).get_api_credentials().unwrap_err();
        assert!(matches!(err, SecretsError::Missing(name) if name == "ARUBA_CLIENT_SECRET"));
    }

    #[test]
    fn test_blank_client_id_is_absent() {
        // ---
        let creds = vars(&[("ARUBA_CLIENT_ID", " "), ("ARUBA_CLIENT_SECRET", "tok")])
            .get_api_credentials()
            .unwrap();
        assert!(creds.client_id.is_none());
    }

    #[test]
    fn test_file_secret_documents() {
        // ---
        let dir = env::temp_dir().join(format!("aruba-ingest-secrets-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let db = dir.join("db.json");
        let api = dir.join("api.json");
        fs::write(&db, r#"{"host":"h","username":"u","password":"p","dbname":"central"}"#).unwrap();
        fs::write(
            &api,
            r#"{"clientId":"cid","clientSecret":"cs","baseUrl":"https://api.central.example"}"#,
        )
        .unwrap();

        let secrets = FileSecrets::new(Some(db), Some(api));
        let db = secrets.get_db_credentials().unwrap();
        let api = secrets.get_api_credentials().unwrap();

        assert_eq!(db.user, "u");
        assert_eq!(db.database, "central");
        assert_eq!(api.client_id.as_deref(), Some("cid"));
        assert_eq!(api.base_url.as_deref(), Some("https://api.central.example"));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_malformed_document() {
        // ---
        let path = env::temp_dir().join(format!("aruba-ingest-bad-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "{not json").unwrap();
        let err = FileSecrets::new(None, Some(path.clone())).get_api_credentials().unwrap_err();
        assert!(matches!(err, SecretsError::Invalid { .. }));
        fs::remove_file(path).ok();
    }
}
