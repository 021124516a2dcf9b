// echod: Echo service demonstrating the wirecall RPC endpoint over TCP.
//
// Serve mode (default) answers every message with its own payload; send
// mode performs a one-shot round trip against a running server.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::info;

fn validate_socket_addr(value: &str) -> Result<String, String> {
    value
        .parse::<std::net::SocketAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| "Invalid socket address".to_owned())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "echod starting");

    let matches = Command::new("echod")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Echo service for the wirecall RPC endpoint")
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to the TOML config file")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("send")
                .long("send")
                .help("One-shot mode: send this message and print the response")
                .value_name("MESSAGE"),
        )
        .arg(
            Arg::new("addr")
                .long("addr")
                .help("Server address for one-shot mode. Eg. 127.0.0.1:9917")
                .value_name("ADDR")
                .value_parser(validate_socket_addr)
                .requires("send"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Verbose per-packet endpoint logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut cfg = match matches.get_one::<PathBuf>("config") {
        Some(path) => match echod::load_config_from_path(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => echod::EchodConfig::default(),
    };
    if matches.get_flag("debug") {
        cfg.debug = true;
    }

    match matches.get_one::<String>("send") {
        Some(message) => {
            let addr = matches
                .get_one::<String>("addr")
                .cloned()
                .unwrap_or_else(|| cfg.bind.clone());
            match echod::send_once(addr, message.clone().into_bytes(), &cfg).await {
                Ok(response) => {
                    println!("{}", String::from_utf8_lossy(&response));
                }
                Err(e) => {
                    eprintln!("FATAL: round trip failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            if let Err(e) = echod::run_server(cfg).await {
                eprintln!("FATAL: server failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
