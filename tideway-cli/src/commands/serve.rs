use anyhow::Result;
use colored::Colorize;
use std::net::SocketAddr;
use tideway_server::{ServerConfig, TenantId, TidewayServer};

pub fn run(port: u16, default_tenant: &str) -> Result<()> {
    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        default_tenant: TenantId::from(default_tenant),
    };

    println!("{}", "🚀 Starting tideway server...".bold().cyan());
    println!(
        "   {}: {}",
        "API Server".bold(),
        format!("http://localhost:{}", port).green()
    );
    println!(
        "   {}: {}",
        "Daemons".bold(),
        format!("ws://localhost:{}/v6/daemon", port).green()
    );
    println!("   {}: {}", "Default tenant".bold(), config.default_tenant);
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(TidewayServer::new(config).serve())
}
