use clap::{Parser, Subcommand};
use dotenv::dotenv;
use slidespeak_cli::{
    api::{self, GenerateRequest, Metadata, MetadataKind, Replacement, SlideApi, SlideSpeakClient},
    config::Config,
    deck,
    poller::{self, Poller},
    render,
    shell::Shell,
    store::JobLog,
    Error,
};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "slidespeak", author, version, about = "Generate presentations with the SlideSpeak API", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// CSV file that records every submitted task
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Seconds to wait between status checks
    #[arg(long, global = true)]
    poll_interval: Option<u64>,

    /// Stop waiting after this many status checks (default: wait until done)
    #[arg(long, global = true)]
    max_polls: Option<NonZeroU32>,

    /// Override the API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive menu (the default)
    Shell,
    /// Generate a presentation from a prompt and wait for it
    Generate {
        /// What the presentation should be about
        prompt: String,

        /// Theme name, see `slidespeak themes`
        #[arg(short, long)]
        theme: Option<String>,

        /// Number of slides
        #[arg(short, long)]
        length: Option<u32>,

        /// Submit and return without polling
        #[arg(long)]
        no_wait: bool,
    },
    /// Check a task once and record the result in the log
    Status { task_id: String },
    /// Show the presentation log
    Log,
    /// List available themes
    Themes,
    /// Show the account the API key belongs to
    Me,
    /// Replace shape contents in an existing .pptx
    Edit {
        file: PathBuf,

        /// SHAPE=CONTENT, repeatable
        #[arg(short, long = "replace", value_parser = parse_replacement, required = true)]
        replacements: Vec<Replacement>,
    },
    /// Download a finished presentation
    Download {
        url: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the slides and shape names of a .pptx file or URL
    Slides {
        source: String,

        /// Also write the listing as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn parse_replacement(raw: &str) -> Result<Replacement, String> {
    let (shape, content) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SHAPE=CONTENT, got {raw:?}"))?;
    if shape.trim().is_empty() {
        return Err("shape name must not be empty".to_string());
    }
    Ok(Replacement {
        shape_name: shape.trim().to_string(),
        content: content.to_string(),
    })
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = Args::parse();

    let default_filter = if args.verbose {
        "slidespeak_cli=debug"
    } else {
        "slidespeak_cli=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Missing configuration fails here, before any network traffic.
    let result = match load_config(&args) {
        Ok(config) => run(args, config).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args, config: Config) -> slidespeak_cli::Result<()> {
    let client = SlideSpeakClient::new(&config)?;
    let log = JobLog::open(&config.log_path);
    let poller = Poller::new(config.poll_interval, config.max_polls);

    match args.command.unwrap_or(Command::Shell) {
        Command::Shell => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            Shell::new(
                &client,
                &log,
                &poller,
                config.default_length,
                stdin.lock(),
                stdout.lock(),
            )
            .run()
            .await
            .map_err(Error::Terminal)?;
        }
        Command::Generate {
            prompt,
            theme,
            length,
            no_wait,
        } => {
            let request = GenerateRequest {
                plain_text: prompt,
                theme,
                length: length.unwrap_or(config.default_length),
            };
            println!("Generating presentation...");
            let task_id = poller::submit(&client, &log, &request).await?;
            println!("Task ID: {task_id}");
            if no_wait {
                println!("Check on it later with `slidespeak status {task_id}`.");
                return Ok(());
            }
            println!("Polling for completion...");
            let outcome = poller
                .run(&client, &log, &task_id, &request.plain_text, |status| {
                    println!("Status: {}", status.task_status)
                })
                .await?;
            print!("{}", render::poll_outcome(&task_id, &outcome));
        }
        Command::Status { task_id } => {
            let status = client.fetch_status(&task_id).await?;
            let record = log.upsert(&task_id, "", &status.task_status, status.result_url())?;
            println!("Status: {}", record.status);
            if record.has_url() {
                println!("URL: {}", record.result_url);
            }
        }
        Command::Log => {
            print!("{}", render::job_table(&log.list_all()?));
        }
        Command::Themes => {
            if let Metadata::Themes(themes) = client.fetch_metadata(MetadataKind::Themes).await? {
                print!("{}", render::theme_list(&themes));
            }
        }
        Command::Me => {
            if let Metadata::User(user) = client.fetch_metadata(MetadataKind::User).await? {
                print!("{user}");
            }
        }
        Command::Edit { file, replacements } => {
            println!("Sending edits to the presentation...");
            let url = client.edit(&file, &replacements).await?;
            println!("Edits applied. New presentation available at: {url}");
        }
        Command::Download { url, output } => {
            println!("Downloading presentation...");
            let path = api::download(&client, &url, output).await?;
            println!("Saved to {}", path.display());
        }
        Command::Slides { source, json } => {
            let deck = deck::load(&client, &source).await?;
            print!("{}", render::slide_listing(&deck));
            if let Some(path) = json {
                deck.save_json(&path)?;
                println!("JSON content saved to '{}'.", path.display());
            }
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> slidespeak_cli::Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url)?;
    }
    if let Some(path) = &args.log_file {
        config.log_path = path.clone();
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    if args.max_polls.is_some() {
        config.max_polls = args.max_polls;
    }
    Ok(config)
}
