use anyhow::Result;
use clap::{Parser, Subcommand};
use roletls::{Dialer, Listener, Role};
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "echo-app",
    about = "Echo demo over IAM-role-authenticated connections",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept connections and echo everything back
    Server(ServerCommand),
    /// Connect, send one message, and print the echo
    Client(ClientCommand),
}

#[derive(Parser, Debug, Clone)]
struct ServerCommand {
    /// Address to listen on
    #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:7443")]
    listen: String,

    /// IAM role ARNs allowed to connect (repeatable)
    #[arg(long = "allow-role", env = "ALLOWED_CLIENT_ROLES", value_delimiter = ',')]
    allowed_roles: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
struct ClientCommand {
    /// Server address to dial
    #[arg(short, long, env = "SERVER_ADDR", default_value = "127.0.0.1:7443")]
    addr: String,

    /// IAM role ARNs the server may be running as (repeatable)
    #[arg(long = "allow-role", env = "ALLOWED_SERVER_ROLES", value_delimiter = ',')]
    allowed_roles: Vec<String>,

    /// Message to send
    #[arg(short, long, default_value = "hello world")]
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("RUST_LOG", &cli.log_level);
    tracing_subscriber::fmt().init();

    match cli.command {
        Commands::Server(cmd) => run_server(cmd).await,
        Commands::Client(cmd) => run_client(cmd).await,
    }
}

fn parse_roles(inputs: &[String]) -> Result<Vec<Role>> {
    inputs
        .iter()
        .map(|arn| Ok(Role::parse(arn)?))
        .collect()
}

async fn run_server(cmd: ServerCommand) -> Result<()> {
    let allowed = parse_roles(&cmd.allowed_roles)?;

    let tcp = TcpListener::bind(&cmd.listen).await?;
    let listener = Listener::new(tcp, allowed).await?;
    info!("listening on {}", listener.local_addr()?);

    loop {
        let (conn, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("accept failed: {err}");
                continue;
            }
        };

        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = match conn.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        error!("{peer_addr}: read failed: {err}");
                        break;
                    }
                };
                if let Err(err) = conn.write_all(&buf[..n]).await {
                    error!("{peer_addr}: write failed: {err}");
                    break;
                }
            }
            if let Some(peer) = conn.peer() {
                info!("{peer_addr}: closed connection from {}", peer.role);
            }
        });
    }
}

async fn run_client(cmd: ClientCommand) -> Result<()> {
    let allowed = parse_roles(&cmd.allowed_roles)?;

    let dialer = Dialer::new(allowed).await?;
    let conn = dialer.dial(&cmd.addr).await?;
    if let Some(peer) = conn.peer() {
        info!("connected to {} (account {})", peer.role, peer.account_id);
    }

    conn.write_all(cmd.message.as_bytes()).await?;

    let mut buf = vec![0u8; cmd.message.len()];
    let mut received = 0;
    while received < buf.len() {
        let n = conn.read(&mut buf[received..]).await?;
        if n == 0 {
            break;
        }
        received += n;
    }

    println!("{}", String::from_utf8_lossy(&buf[..received]));
    conn.shutdown().await?;
    Ok(())
}
