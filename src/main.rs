use clap::Parser;
use coffeechess::address::WalletAddress;
use coffeechess::config::{self, Config};
use coffeechess::coordinator::Coordinator;
use coffeechess::escrow::EscrowClient;
use coffeechess::gateway::Gateway;
use coffeechess::rpc::AdminServer;
use coffeechess::shutdown::ShutdownManager;
use coffeechess::signer::VerdictSigner;
use coffeechess::username::UsernameRegistry;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "coffeechess-coordinator")]
#[command(about = "CoffeeChess authoritative match coordinator", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(long)]
    gateway_addr: Option<String>,

    #[arg(long)]
    admin_addr: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,

    /// Run with an ephemeral, randomly generated signing key instead of
    /// requiring `COFFEECHESS_SIGNER_KEY`. Verdicts it signs will never be
    /// honored by a real escrow deployment.
    #[arg(long)]
    demo_key: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(()) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {e}");
                std::process::exit(1);
            }
        }
    }

    let config = match Config::load_or_create(&args.config) {
        Ok(cfg) => {
            println!("✓ Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            eprintln!("❌ Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("BUILD_DATE").unwrap_or("unknown");
    println!("\n🚀 CoffeeChess Coordinator v{version} ({git_hash})");
    println!("  └─ Build: {build_date}");
    println!("═══════════════════════════════════════════════════════");

    let contract = match WalletAddress::parse(&config.escrow.contract_address) {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("❌ Invalid escrow.contract_address in config: {e}");
            std::process::exit(1);
        }
    };

    let signer = match load_signer(args.demo_key) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };
    println!("✓ Signer initialized");
    println!("  └─ Address: {}", signer.address());

    let escrow = Arc::new(EscrowClient::new(
        config.escrow.rpc_endpoints.clone(),
        contract,
        config.escrow.max_retries,
        Duration::from_secs(config.escrow.poll_interval_seconds),
    ));

    if config.signer.verify_trusted_signer_on_startup && !args.demo_key {
        match escrow.trusted_signer().await {
            Ok(trusted) => match signer.assert_matches_trusted_signer(trusted) {
                Ok(()) => println!("✓ Signer matches escrow's trustedSigner()"),
                Err(e) => {
                    eprintln!("❌ {e}");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("❌ Failed to read escrow trustedSigner(): {e}");
                std::process::exit(1);
            }
        }
    } else {
        println!("⚠ Skipping trustedSigner() startup check");
    }

    let coordinator = Coordinator::new(
        Arc::new(signer),
        escrow,
        config.escrow.chain_id,
        contract,
        &config.room,
    );

    let data_dir = config::get_data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("⚠ Failed to create data directory {}: {e}", data_dir.display());
    }
    let username_path = std::path::Path::new(&config.username.file_path);
    let username_path = if username_path.is_absolute() {
        username_path.to_path_buf()
    } else {
        data_dir.join(username_path)
    };
    let usernames = match UsernameRegistry::load_or_create(&username_path).await {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            eprintln!("❌ Failed to load username registry at {}: {e}", username_path.display());
            std::process::exit(1);
        }
    };
    println!("✓ Username registry loaded from {}", username_path.display());

    let mut shutdown_manager = ShutdownManager::new();
    let shutdown_token = shutdown_manager.token();

    let gateway_addr = args.gateway_addr.unwrap_or_else(|| config.gateway.listen_address.clone());
    let admin_addr = args.admin_addr.unwrap_or_else(|| config.admin.listen_address.clone());
    let heartbeat = Duration::from_secs(config.gateway.heartbeat_interval_seconds);

    let gateway = Gateway::new(coordinator.clone(), usernames, heartbeat, &config.rate_limit);
    let gateway_shutdown = shutdown_token.clone();
    let gateway_addr_clone = gateway_addr.clone();
    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.serve(&gateway_addr_clone, gateway_shutdown).await {
            eprintln!("❌ Gateway listener error: {e}");
        }
    });
    shutdown_manager.register_task(gateway_handle);

    let admin = Arc::new(AdminServer::new(coordinator));
    let admin_shutdown = shutdown_token.clone();
    let admin_addr_clone = admin_addr.clone();
    let admin_handle = tokio::spawn(async move {
        if let Err(e) = admin.serve(&admin_addr_clone, admin_shutdown).await {
            eprintln!("❌ Admin surface error: {e}");
        }
    });
    shutdown_manager.register_task(admin_handle);

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║  🎉 CoffeeChess Coordinator is Running!               ║");
    println!("╠═══════════════════════════════════════════════════════╣");
    println!("║  Gateway:    {:<40} ║", gateway_addr);
    println!("║  Admin:      {:<40} ║", admin_addr);
    println!("║  Chain ID:   {:<40} ║", config.escrow.chain_id);
    println!("╚═══════════════════════════════════════════════════════╝");
    println!("\nPress Ctrl+C to stop\n");

    shutdown_manager.wait_for_shutdown().await;
}

fn load_signer(demo_key: bool) -> Result<VerdictSigner, String> {
    if demo_key {
        println!("⚠ Using an ephemeral demo signing key — verdicts are worthless on a real escrow");
        return Ok(VerdictSigner::ephemeral());
    }
    let hex_key = std::env::var("COFFEECHESS_SIGNER_KEY")
        .map_err(|_| "COFFEECHESS_SIGNER_KEY is not set (pass --demo-key for a local test run)".to_string())?;
    VerdictSigner::from_hex_key(&hex_key).map_err(|e| format!("invalid COFFEECHESS_SIGNER_KEY: {e}"))
}

fn setup_logging(config: &config::LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let is_systemd = std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    match config.format.as_str() {
        "json" => {
            fmt().json().with_env_filter(filter).with_thread_ids(false).init();
        }
        _ => {
            if is_systemd {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .without_time()
                    .compact()
                    .init();
            } else {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact()
                    .init();
            }
        }
    }
}
