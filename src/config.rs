use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_host: String,
    pub api_port: u16,
    /// LND gRPC endpoint, e.g. `https://localhost:10009`.
    pub lnd_grpc_address: String,
    pub lnd_tls_cert_path: String,
    pub lnd_macaroon_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            api_host: read_optional_string("API_HOST", "127.0.0.1"),
            api_port: read_optional_u16("API_PORT", 8080)?,
            lnd_grpc_address: read_var("LND_GRPC_ADDRESS")?,
            lnd_tls_cert_path: read_var("LND_TLS_CERT_PATH")?,
            lnd_macaroon_path: read_var("LND_MACAROON_PATH")?,
        })
    }
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn read_optional_u16(key: &str, default: u16) -> Result<u16, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
