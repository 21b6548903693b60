use anyhow::Context;
use ldapfix::{Denylist, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Starts a server from `LDAPFIX_*` environment variables and runs it until Ctrl-C
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut builder = ServerConfig::builder();
    if let Ok(port) = std::env::var("LDAPFIX_PORT") {
        builder.port(port.parse::<u16>().context("LDAPFIX_PORT is not a port number")?);
    }
    if let Ok(domain) = std::env::var("LDAPFIX_DOMAIN") {
        builder.domain(domain);
    }
    if let Some(ldif) = std::env::var_os("LDAPFIX_LDIF") {
        builder.ldif(ldif);
    }
    if let Ok(java) = std::env::var("LDAPFIX_JAVA") {
        builder.java_bin(java);
    }
    if let Some(path) = std::env::var_os("LDAPFIX_DENYLIST") {
        builder.denylist(Denylist::from_json_file(path)?);
    }
    builder.verbose(std::env::var_os("LDAPFIX_VERBOSE").is_some());

    let config = builder.build().context("Invalid server configuration")?;
    let mut server = Server::new(config);

    let ready = server.start().await?;
    println!(
        "LDAP server listening on port {} (pid {}, started in {} ms)",
        ready.port,
        ready.pid.map_or_else(|| "?".to_string(), |p| p.to_string()),
        ready.elapsed.as_millis()
    );
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    server.stop().await?;
    println!("LDAP server stopped");
    Ok(())
}
