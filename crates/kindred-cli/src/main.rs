use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use kindred_core::{classify, Responder};
use kindred_schema::{IdentityProfile, PersonalityTag};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod serve;

use config::load_config;

#[derive(Parser)]
#[command(name = "kindred", version, about = "Scripted chat companions")]
struct Cli {
    #[arg(long, default_value = "kindred.yaml", help = "Config file (YAML)")]
    config: PathBuf,

    #[arg(long, default_value = "logs", help = "Directory for rolling log files")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Read JSON lines from stdin and print published events")]
    Serve,
    #[command(about = "Print the reply a personality would give")]
    Reply {
        #[arg(long, default_value = "friendly", help = "Personality tag")]
        personality: String,
        #[arg(long = "interest", help = "Profile interest (repeatable)")]
        interests: Vec<String>,
        #[arg(long, help = "Seed for the random source")]
        seed: Option<u64>,
        #[arg(help = "Inbound message text")]
        text: String,
    },
    #[command(about = "Validate the config file")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&cli.log_dir, "kindred.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Serve => {
            let config = load_config(&cli.config)?;
            serve::serve(config).await?;
        }
        Commands::Reply {
            personality,
            interests,
            seed,
            text,
        } => {
            let config = load_config(&cli.config)?;
            let personality = PersonalityTag::parse_lenient(&personality);
            let profile = IdentityProfile {
                id: "cli".into(),
                display_name: personality.display_name().into(),
                personality,
                scripted: true,
                interests,
                ..Default::default()
            };
            let mut rng = match seed.or(config.session.rng_seed) {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let responder = Responder::new(config.templates());
            let reply = responder.reply(&text, personality, &profile, &mut rng);
            println!("[{}] {reply}", classify(&text).as_str());
        }
        Commands::Validate => {
            let config = load_config(&cli.config)?;
            println!(
                "Config valid. {} identities, {} conversations, idle threshold {}s.",
                config.seed.identities.len(),
                config.seed.conversations.len(),
                config.initiative.idle_threshold_secs
            );
        }
    }

    Ok(())
}
