use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::FacePipeline;
use facegate_hw::Camera;
use facegate_store::UserStore;

mod auth;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facegate", about = "Password plus face-recognition account authentication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account, optionally enrolling a facial photo
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        /// Enrollment photo (JPEG or PNG) containing the user's face
        #[arg(long)]
        photo: Option<std::path::PathBuf>,
    },
    /// Log in: password check followed by a live camera face check
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Show a registered account's profile
    Profile {
        #[arg(short, long)]
        email: String,
        #[arg(long)]
        json: bool,
    },
    /// List registered accounts and their enrollment state
    Users {
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();

    // Startup: database schema and uploads directory.
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::create_dir_all(&config.upload_dir)
        .with_context(|| format!("creating {}", config.upload_dir.display()))?;

    let store = UserStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    store.init_schema()?;

    match cli.command {
        Commands::Register { username, email, password, photo } => {
            let photo_bytes = photo
                .map(|path| {
                    std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
                })
                .transpose()?;

            // Models are only loaded when there is a photo to enroll.
            let mut pipeline = photo_bytes
                .as_ref()
                .map(|_| load_pipeline(&config))
                .transpose()?;

            auth::register_account(
                &store,
                &username,
                &email,
                &password,
                pipeline.as_mut().zip(photo_bytes.as_deref()),
            )?;
            println!("Registered {username}. You can now log in.");
        }
        Commands::Login { email, password } => {
            let mut pipeline = load_pipeline(&config)?;

            let camera = Camera::open(&config.camera_device)?;
            println!("Look at the camera...");
            let frame = camera.capture_frame()?;
            drop(camera);

            let session = auth::login(
                &store,
                &mut pipeline,
                &frame.data,
                frame.width,
                frame.height,
                &email,
                &password,
                config.match_threshold,
            )?;
            println!("Welcome, {}! You are now logged in.", session.username);
        }
        Commands::Profile { email, json } => {
            let profile = store.profile(&email)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                println!("Username: {}", profile.username);
                println!("Account created: {}", profile.created_at.to_rfc3339());
            }
        }
        Commands::Users { json } => {
            let accounts = store.accounts()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
            } else {
                println!("{} account(s)", accounts.len());
                for account in accounts {
                    let enrolled = match account.descriptor_len {
                        Some(len) => format!("descriptor: {len} bytes"),
                        None => "no descriptor".to_string(),
                    };
                    println!("  {} <{}> ({enrolled})", account.username, account.email);
                }
            }
        }
    }

    Ok(())
}

fn load_pipeline(config: &Config) -> Result<FacePipeline> {
    FacePipeline::load(&config.detector_model_path(), &config.recognizer_model_path())
        .context("loading face models")
}
