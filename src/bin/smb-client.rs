//! SMB2/3 Client CLI

use clap::Parser;
use smb_session::auth::AnonymousAuthenticator;
use smb_session::client::{ClientConfig, SmbClient};
use smb_session::protocol::smb2_constants::Smb2Dialect;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "smb-client")]
#[command(about = "Negotiate, open an anonymous session and query an SMB2/3 server", long_about = None)]
struct Args {
    /// SMB server address or hostname
    #[arg(short = 'H', long)]
    host: String,

    /// Port to connect to
    #[arg(short = 'p', long, default_value = "445")]
    port: u16,

    /// Share to connect to, e.g. IPC$
    #[arg(short = 's', long)]
    share: Option<String>,

    /// Highest dialect to offer (2.0.2, 2.1, 3.0, 3.0.2, 3.1.1)
    #[arg(long, default_value = "3.1.1")]
    max_dialect: String,

    /// Refuse sessions that cannot sign
    #[arg(long)]
    require_signing: bool,

    /// Workstation name to identify as
    #[arg(long, default_value = "RUST-SMB-CLIENT")]
    client_name: String,

    /// Request timeout in seconds
    #[arg(short = 't', long, default_value = "30")]
    timeout: u64,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let max_dialect = Smb2Dialect::parse_name(&args.max_dialect)?;
    let config = ClientConfig::builder()
        .dialects(
            Smb2Dialect::ALL
                .iter()
                .copied()
                .filter(|dialect| *dialect <= max_dialect),
        )
        .signing_required(args.require_signing)
        .client_name(args.client_name)
        .request_timeout(Duration::from_secs(args.timeout))
        .build()?;

    println!("Client:         {}", config.client_name);
    let client = SmbClient::with_config(config);
    let connection = client.connect(&args.host, args.port).await?;

    if let Some(negotiated) = connection.negotiated() {
        println!("Dialect:        SMB {}", negotiated.dialect);
        println!("Server GUID:    {}", negotiated.server_guid);
        println!("Security mode:  {:?}", negotiated.security_mode);
        println!("Capabilities:   {:?}", negotiated.capabilities);
        println!("Max transact:   {}", negotiated.max_transact_size);
        println!("Max read:       {}", negotiated.max_read_size);
        println!("Max write:      {}", negotiated.max_write_size);
        println!("Signing:        {:?}", negotiated.signing_algorithm);
    }

    connection.echo().await?;
    tracing::info!("Echo answered");

    let mut authenticator = AnonymousAuthenticator;
    let session = client.session_setup(&connection, &mut authenticator).await?;
    println!("Session:        {:#x} ({:?})", session.id(), session.flags());

    if let Some(share) = args.share {
        let path = format!("\\\\{}\\{}", args.host, share);
        let tree = session.tree_connect(&path).await?;
        println!(
            "Tree:           {} ({:?}, access {:?})",
            tree.tree_id(),
            tree.share_type(),
            tree.maximal_access()
        );
        tree.disconnect().await?;
    }

    session.logoff().await?;
    connection.disconnect().await?;
    Ok(())
}
