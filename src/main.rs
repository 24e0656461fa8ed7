//! Binary entrypoint: installs the global tracing subscriber, loads
//! configuration, and dispatches the CLI surface (spec 6). The default
//! action with no subcommand starts the supervisor and its workers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use clap::Parser;
use mailengine::cli::{Cli, Command, TokenAction};
use mailengine::config::EngineConfig;
use mailengine::tokens::TokenStore;
use sha2::Digest;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    install_tracing();

    let cli = Cli::parse();
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        None => run_server(config).await,
        Some(Command::Encrypt) => run_encrypt(config).await,
        Some(Command::Scan) => run_scan(config).await,
        Some(Command::Password { password, hash }) => run_password(password, hash),
        Some(Command::Tokens { action }) => run_tokens(config, action).await,
    };

    if let Err(e) = result {
        error!(error = %e, "mailengine exited with an error");
        std::process::exit(1);
    }
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Spec 4.7: spawns the supervisor plus the worker pools it manages,
/// and blocks until SIGTERM/SIGINT (spec 5).
async fn run_server(mut config: EngineConfig) -> mailengine::Result<()> {
    info!("starting mailengine");

    let kv = Arc::new(mailengine_kv::KvStore::new(config.kv.clone()).await?);

    // GLOSSARY: service secret is auto-generated and persisted on first
    // start if not supplied via the environment.
    config.service_secret =
        mailengine::config::resolve_service_secret(&kv, &config.service_secret).await?;

    let supervisor = Arc::new(mailengine::Supervisor::new(config.supervisor.clone()));
    let registry = Arc::new(match &config.encryption_secret {
        Some(secret) => mailengine::AccountRegistry::with_encryption(kv.clone(), supervisor.clone(), secret),
        None => mailengine::AccountRegistry::new(kv.clone(), supervisor.clone()),
    });
    let stats = Arc::new(mailengine::StatsRecorder::new(kv.clone(), 30));

    let submit_queue = mailengine_queue::Queue::new(
        config.kv.connection_url(),
        mailengine_queue::QueueName::Submit,
    )
    .await?;
    let notify_queue = mailengine_queue::Queue::new(
        config.kv.connection_url(),
        mailengine_queue::QueueName::Notify,
    )
    .await?;

    let ids: Vec<String> = kv.smembers("accounts").await?;
    {
        let mut assignment = supervisor.assignment().lock().await;
        assignment.seed_unassigned(ids);
    }

    let webhook_client = Arc::new(mailengine_webhooks::WebhookClient::new(config.service_secret.clone()));

    let mut submit_worker = mailengine::submit::spawn(
        "submit",
        submit_queue,
        notify_queue.clone(),
        kv.clone(),
        supervisor.clone(),
        mailengine_queue::WorkerConfig {
            concurrency: config.supervisor.submit_workers,
            ..Default::default()
        },
    );
    let mut notify_worker = mailengine::notify::spawn(
        "notify",
        notify_queue.clone(),
        kv.clone(),
        registry.clone(),
        webhook_client,
        config.webhook_defaults.clone(),
        stats.clone(),
        mailengine_queue::WorkerConfig {
            concurrency: config.supervisor.notify_workers,
            ..Default::default()
        },
    );

    submit_worker.start().await?;
    notify_worker.start().await?;

    // Spec 4.3/4.4: one task per IMAP worker slot, each hosting many
    // accounts; the real wire-protocol client is an out-of-scope
    // external collaborator (spec 1), so each is handed a placeholder
    // capability until one is wired in.
    let mut imap_workers = Vec::with_capacity(config.supervisor.imap_workers);
    for n in 0..config.supervisor.imap_workers {
        imap_workers.push(mailengine::imap::spawn(
            format!("imap-{n}"),
            Box::new(mailengine::imap::UnimplementedCapability),
            notify_queue.clone(),
            registry.clone(),
            supervisor.clone(),
        ));
    }
    let broadcast_router = supervisor.clone().spawn_broadcast_router();
    let assignment_loop = supervisor.clone().spawn_assignment_loop(std::time::Duration::from_secs(2));

    shutdown_signal().await;

    info!("shutdown signal received, draining");
    supervisor.shutdown().await;
    submit_worker.stop().await;
    notify_worker.stop().await;
    assignment_loop.abort();
    broadcast_router.abort();
    for handle in imap_workers {
        handle.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_encrypt(config: EngineConfig) -> mailengine::Result<()> {
    let Some(secret) = &config.encryption_secret else {
        return Err(mailengine::EngineError::Config(
            "MAILENGINE_ENCRYPTION_SECRET must be set to encrypt stored credentials".to_string(),
        ));
    };

    let kv = Arc::new(mailengine_kv::KvStore::new(config.kv.clone()).await?);
    let supervisor = Arc::new(mailengine::Supervisor::new(config.supervisor.clone()));
    let registry = mailengine::AccountRegistry::with_encryption(kv, supervisor, secret);
    let rewrapped = registry.rewrap_all().await?;
    info!(rewrapped, "encrypt: sealed plaintext credential secrets");
    Ok(())
}

async fn run_scan(config: EngineConfig) -> mailengine::Result<()> {
    let kv = mailengine_kv::KvStore::new(config.kv.clone()).await?;
    let ids: Vec<String> = kv.smembers("accounts").await?;
    let mut plaintext_count = 0;
    for id in &ids {
        let json: Option<String> = kv.get_value(&format!("iad:{id}")).await?;
        if let Some(json) = json
            && json.contains("\"plaintext\":true")
        {
            plaintext_count += 1;
        }
    }
    info!(accounts = ids.len(), plaintext_count, "scan complete");
    Ok(())
}

const MIN_PASSWORD_LEN: usize = 8;

/// Spec 6: `password [--password <pw>] [--hash]`, min 8 chars, prints
/// a generated password when none is given, or the base64url-encoded
/// hash when `--hash` is set; exit 0 on success, 1 on failure.
fn run_password(password: Option<String>, hash: bool) -> mailengine::Result<()> {
    let generated = password.is_none();
    let password = password.unwrap_or_else(generate_password);

    if password.len() < MIN_PASSWORD_LEN {
        eprintln!("password must be at least {MIN_PASSWORD_LEN} characters");
        std::process::exit(1);
    }

    if generated {
        println!("{password}");
    } else if hash {
        let digest = sha2::Sha256::digest(password.as_bytes());
        println!("{}", URL_SAFE_NO_PAD.encode(digest));
    } else {
        println!("password accepted");
    }
    Ok(())
}

fn generate_password() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 18];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Spec 6: `tokens issue|export|import`.
async fn run_tokens(config: EngineConfig, action: TokenAction) -> mailengine::Result<()> {
    let kv = Arc::new(mailengine_kv::KvStore::new(config.kv.clone()).await?);
    let store = TokenStore::new(kv);

    match action {
        TokenAction::Issue { scopes } => {
            let scopes: Vec<String> = scopes.split(',').map(|s| s.trim().to_string()).collect();
            let token = store.issue(scopes).await?;
            println!("{} {}", token.id, token.secret);
        }
        TokenAction::Export => {
            let encoded = store.export().await?;
            println!("{encoded}");
        }
        TokenAction::Import { path } => {
            let encoded = std::fs::read_to_string(&path)?;
            let imported = store.import(&encoded).await?;
            info!(imported, path = %path, "tokens imported");
        }
    }
    Ok(())
}
