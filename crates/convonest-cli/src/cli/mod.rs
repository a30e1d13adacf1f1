//! CLI entry and dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use convonest_core::listing::SortKey;
use convonest_core::notice::NoticeSink;
use convonest_core::{Forum, config, logging};
use convonest_types::VoteKind;
use tokio_util::sync::CancellationToken;

mod commands;
mod notices;

#[derive(Parser)]
#[command(name = "convonest")]
#[command(version)]
#[command(about = "Command-line client for the ConvoNest discussion forum")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output from convonest to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Only log notices instead of printing them
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in with email and password (or a Google ID token)
    Login {
        /// Account email
        #[arg(long, required_unless_present = "google_token")]
        email: Option<String>,
        /// Account password (read from stdin when omitted)
        #[arg(long, env = "CONVONEST_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Sign in with a Google ID token instead
        #[arg(long, value_name = "ID_TOKEN", conflicts_with = "email")]
        google_token: Option<String>,
    },

    /// Log out and forget stored credentials
    Logout,

    /// Create an account
    Register {
        /// Display name
        #[arg(long)]
        name: String,
        /// Account email
        #[arg(long)]
        email: String,
        /// Password, at least 6 characters (read from stdin when omitted)
        #[arg(long, env = "CONVONEST_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Profile image URL
        #[arg(long, value_name = "URL")]
        photo_url: Option<String>,
    },

    /// Show who is logged in
    Whoami,

    /// Browse and write posts
    Posts {
        #[command(subcommand)]
        command: PostCommands,
    },

    /// Toggle your vote on a post
    Vote {
        /// Post id
        #[arg(value_name = "POST_ID")]
        id: String,
        /// up or down
        #[arg(value_name = "DIRECTION")]
        direction: VoteKind,
    },

    /// Comment on a post
    Comment {
        /// Post id
        #[arg(value_name = "POST_ID")]
        id: String,
        /// Comment text
        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// List tags
    Tags,

    /// Read or publish announcements
    Announcements {
        #[command(subcommand)]
        command: AnnouncementCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum PostCommands {
    /// Lists posts, one page at a time
    List {
        /// newest or popularity
        #[arg(long, default_value_t = SortKey::Newest)]
        sort: SortKey,
        /// Page to show (1-based)
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Only posts with this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Shows a post with its comments
    Show {
        /// The ID of the post to show
        #[arg(value_name = "POST_ID")]
        id: String,
    },
    /// Writes a new post
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        tag: String,
    },
}

#[derive(clap::Subcommand)]
enum AnnouncementCommands {
    /// Lists announcements, newest first
    List,
    /// Publishes an announcement (admins only)
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Config commands must work even when the config file is broken.
    if let Commands::Config { command } = &cli.command {
        return match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        };
    }

    let config = config::Config::load().context("load config")?;
    let log_file = cli.log_file.clone().or_else(|| config.log_file_path());
    let _logging = logging::init(log_file.as_deref(), cli.verbose)?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli, &config).await })
}

async fn dispatch(cli: Cli, config: &config::Config) -> Result<()> {
    let notices: Option<Arc<dyn NoticeSink>> = if cli.quiet {
        None
    } else {
        Some(Arc::new(notices::StderrNotices))
    };

    // Ctrl+C cancels whatever request is in flight.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let forum = Forum::connect(config, notices)?.cancel_on(cancel);

    match cli.command {
        Commands::Login {
            email,
            password,
            google_token,
        } => match (email, google_token) {
            (_, Some(token)) => commands::auth::login_with_google(&forum, &token).await,
            (Some(email), None) => commands::auth::login(&forum, &email, password).await,
            (None, None) => anyhow::bail!("Please specify --email or --google-token"),
        },
        Commands::Logout => commands::auth::logout(&forum),
        Commands::Register {
            name,
            email,
            password,
            photo_url,
        } => commands::auth::register(&forum, &name, &email, password, photo_url).await,
        Commands::Whoami => commands::auth::whoami(&forum).await,

        Commands::Posts { command } => match command {
            PostCommands::List { sort, page, tag } => {
                commands::posts::list(&forum, sort, page, tag.as_deref()).await
            }
            PostCommands::Show { id } => commands::posts::show(&forum, &id).await,
            PostCommands::Add { title, body, tag } => {
                commands::posts::add(&forum, title, body, tag).await
            }
        },
        Commands::Vote { id, direction } => commands::posts::vote(&forum, &id, direction).await,
        Commands::Comment { id, text } => commands::posts::comment(&forum, &id, &text).await,

        Commands::Tags => commands::board::tags(&forum).await,
        Commands::Announcements { command } => match command {
            AnnouncementCommands::List => commands::board::announcements(&forum).await,
            AnnouncementCommands::Add { title, description } => {
                commands::board::add_announcement(&forum, title, description).await
            }
        },

        Commands::Config { .. } => Ok(()),
    }
}
