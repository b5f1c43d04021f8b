use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Parser, Debug, Clone)]
#[command(name = "prism-gateway")]
#[command(about = "Prism gateway - presence, call signaling and filtered video relay")]
pub struct GatewayConfig {
    /// Address to listen on
    #[arg(long, env = "PRISM_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding index.html, styles.css and scripts/index.js
    #[arg(long, env = "PRISM_PUBLIC_DIR", default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/public"))]
    pub public_dir: PathBuf,

    /// STUN/TURN URLs for server-side peer connections
    #[arg(
        long = "ice-server",
        env = "PRISM_ICE_SERVERS",
        value_delimiter = ',',
        default_value = DEFAULT_ICE_SERVER
    )]
    pub ice_servers: Vec<String>,

    /// Allow binding a non-loopback address
    #[arg(long, env = "PRISM_ALLOW_PUBLIC_BIND", default_value_t = false)]
    pub allow_public_bind: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            public_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/public")),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            allow_public_bind: false,
            log_level: "info".to_string(),
        }
    }
}
