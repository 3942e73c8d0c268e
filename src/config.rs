use dotenvy::dotenv;
use std::env;

pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x100bd2512011b0e93A01266a646ba8eB4dee5312";
pub const DEFAULT_ESTIMATOR_URL: &str = "http://127.0.0.1:8002/predict";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub rpc_url: String,
    pub contract_address: String,
    /// Backend signing key. Absent means the ledger runs read-only.
    pub private_key: Option<String>,
    pub estimator_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            rpc_url: env::var("RPC_URL")?,
            contract_address: env::var("CONTRACT_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_CONTRACT_ADDRESS.to_string()),
            private_key: env::var("PRIVATE_KEY").ok().filter(|k| !k.is_empty()),
            estimator_url: env::var("AI_ENGINE_URL")
                .unwrap_or_else(|_| DEFAULT_ESTIMATOR_URL.to_string()),
        })
    }
}
