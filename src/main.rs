//! Gift Detector - Main Entry Point
//!
//! Serves the HTTP control panel and runs the gift detector on demand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use gift_responder::api::{self, AppState};
use gift_responder::config::{
    APP_NAME, APP_VERSION, DetectionRules, DetectorSettings, ServerSettings, TelegramConfig,
};
use gift_responder::detector::{AuthState, DetectorController};
use gift_responder::telegram::{TelegramBot, TelegramError};

/// Telegram userbot that answers incoming gifts.
#[derive(Parser, Debug)]
#[command(name = "gift_detector")]
#[command(about = "Detect Telegram gifts and reply to the sender")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error). Overrides LOG_LEVEL.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Address to bind. Overrides HOST.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on. Overrides PORT.
    #[arg(short, long)]
    port: Option<u16>,

    /// Start the detector with the environment credentials at boot.
    #[arg(long)]
    autostart: bool,

    /// Log in interactively in the terminal, save the session and exit.
    #[arg(long)]
    login: bool,

    /// Write example detection rules to the given path and exit.
    #[arg(long, value_name = "PATH")]
    generate_rules: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load environment variables before logging so LOG_LEVEL applies
    let env_loaded = dotenvy::from_filename(&args.env_file);

    init_logging(args.log_level.as_deref());

    if let Err(e) = env_loaded {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    if let Some(path) = &args.generate_rules {
        return generate_rules(path);
    }

    let settings = DetectorSettings::from_env_with_defaults();
    let problems = settings.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{}", problem);
        }
        anyhow::bail!("Invalid detector settings ({} problems)", problems.len());
    }

    let rules = match &settings.rules_path {
        Some(path) => {
            let rules = DetectionRules::load_from_file(path)
                .with_context(|| format!("Failed to load detection rules from {}", path.display()))?;
            rules.validate().context("Detection rules validation failed")?;
            info!("Loaded {} detection rules from {}", rules.len(), path.display());
            rules
        }
        None => DetectionRules::default(),
    };

    let env_config = match TelegramConfig::from_env() {
        Ok(config) => {
            info!("Telegram credentials from environment: {}", config.redacted());
            Some(config)
        }
        Err(e) => {
            debug!("No Telegram credentials in environment: {}", e);
            None
        }
    };

    if args.login {
        let config = env_config.context("--login needs API_ID and API_HASH in the environment")?;
        return login(&config, &settings).await;
    }

    let mut server = ServerSettings::from_env_with_defaults();
    if let Some(host) = args.host {
        server.host = host;
    }
    if let Some(port) = args.port {
        server.port = port;
    }

    info!("{} v{} ({})", APP_NAME, APP_VERSION, server.environment);
    info!("Detector settings: {}", settings.summary());

    // Sessions live in SESSION_DIR even when credentials only arrive over HTTP.
    let session_dir = TelegramConfig::session_dir_from_env();
    let controller = Arc::new(DetectorController::new(settings, rules, session_dir));

    if args.autostart {
        autostart(&controller, env_config.clone()).await;
    }

    let addr = server.bind_addr();
    let app = api::router(AppState::new(Arc::clone(&controller), server, env_config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Control panel listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Cleanup
    info!("Shutting down...");
    controller.stop().await;

    Ok(())
}

/// Initializes the logging subsystem.
///
/// `RUST_LOG` wins, then the `--log-level` flag, then `LOG_LEVEL`.
fn init_logging(flag: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = flag
            .map(str::to_owned)
            .or_else(|| std::env::var("LOG_LEVEL").ok())
            .unwrap_or_else(|| "info".to_owned());
        EnvFilter::new(level.to_lowercase())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down...");
}

/// Starts the detector with the environment credentials.
async fn autostart(controller: &DetectorController, config: Option<TelegramConfig>) {
    let Some(config) = config else {
        warn!("--autostart ignored: API_ID and API_HASH are not set");
        return;
    };

    match controller.start(config).await {
        Ok(AuthState::Running) => info!("Detector started at boot"),
        Ok(state) => info!(
            "Detector waiting for login ({}), use POST /detector/complete_auth",
            state.as_str()
        ),
        Err(e) => warn!("Autostart failed: {}", e),
    }
}

/// Writes example detection rules.
fn generate_rules(path: &Path) -> Result<()> {
    let example = DetectionRules::example();
    example
        .save_to_file(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✓ Example detection rules written to: {}", path.display());
    println!("\nTo use them:");
    println!("1. Edit the keyword lists to your liking");
    println!("2. Check the file with: validate_rules --file {}", path.display());
    println!("3. Set RULES_PATH={} in your .env", path.display());

    Ok(())
}

/// Logs in from the terminal and saves the session.
async fn login(config: &TelegramConfig, settings: &DetectorSettings) -> Result<()> {
    let bot = TelegramBot::connect(config, settings.response_delay())
        .await
        .context("Failed to connect to Telegram")?;

    if bot.is_authorized().await.context("Failed to check authorization")? {
        info!("Session {} is already authorized", config.session_path().display());
    } else {
        authenticate(&bot, config).await?;
    }

    match bot.me().await {
        Ok(account) => info!("Logged in as {}", account.label()),
        Err(e) => warn!("Could not fetch account info: {}", e),
    }

    bot.disconnect();
    Ok(())
}

/// Handles Telegram authentication.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let phone: String = match &config.phone_number {
        Some(phone) => phone.clone(),
        None => Input::new()
            .with_prompt("Enter your phone number (with country code)")
            .interact_text()?,
    };

    let token = bot
        .request_login_code(&phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => {
            info!("Successfully signed in!");
            Ok(())
        }
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;

            info!("Successfully signed in with 2FA!");
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
