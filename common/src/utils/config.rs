use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    pub surrealdb_address: String,
    #[serde(default)]
    pub surrealdb_username: String,
    #[serde(default)]
    pub surrealdb_password: String,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_database")]
    pub surrealdb_database: String,

    /// Default tenant URI for the optimizer when none is passed explicitly
    /// (the `GRAPH_DATABASE_URI` environment variable).
    #[serde(default)]
    pub graph_database_uri: Option<String>,

    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    /// Critic models for the quality optimizer; the completion model votes
    /// alone when empty.
    #[serde(default)]
    pub critic_models: Vec<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_state_file")]
    pub optimizer_state_file: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_namespace() -> String {
    "narrative".to_string()
}

fn default_database() -> String {
    "knowledge".to_string()
}

fn default_upload_dir() -> String {
    "./uploads".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_state_file() -> String {
    "./optimizer_state.json".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
