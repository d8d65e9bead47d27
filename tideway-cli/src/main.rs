use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{export, images, job, policy, release, serve, services, sync_status, AwaitArgs};

#[derive(Parser)]
#[command(name = "tidectl")]
#[command(version, about = "Continuous delivery from a git config repo", long_about = None)]
struct Cli {
    /// Base URL of the tideway server
    #[arg(long, global = true, default_value = "http://localhost:3030")]
    url: String,

    /// Tenant to act for (defaults to the server's default tenant)
    #[arg(long, global = true)]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server that daemons connect to
    Serve {
        /// Port for the API server
        #[arg(short, long, default_value = "3030")]
        port: u16,

        /// Tenant for requests and daemons that don't name one
        #[arg(long, default_value = tideway_server::DEFAULT_TENANT)]
        default_tenant: String,
    },

    /// Release an image to one or more services
    Release {
        /// Service to release to (repeatable)
        #[arg(short, long = "service", required_unless_present = "all")]
        services: Vec<String>,

        /// Release to every service
        #[arg(long, conflicts_with = "services")]
        all: bool,

        /// Image to release; omit to release the latest image of each service
        #[arg(short, long)]
        image: Option<String>,

        /// Service to leave alone (repeatable)
        #[arg(long = "exclude")]
        excludes: Vec<String>,

        /// Work out what would change without committing
        #[arg(long)]
        dry_run: bool,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,

        /// Who is asking
        #[arg(long)]
        user: Option<String>,

        #[command(flatten)]
        wait: AwaitArgs,
    },

    /// Change the policies of one or more services
    Policy {
        /// Service to change (repeatable)
        #[arg(short, long = "service", required = true)]
        services: Vec<String>,

        /// Policy to set, as name=value (repeatable)
        #[arg(long = "add", value_parser = commands::parse_key_value)]
        add: Vec<(String, String)>,

        /// Policy to remove (repeatable)
        #[arg(long = "remove")]
        remove: Vec<String>,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,

        /// Who is asking
        #[arg(long)]
        user: Option<String>,

        #[command(flatten)]
        wait: AwaitArgs,
    },

    /// Wait for an already submitted job
    Job {
        /// Job ID
        id: String,

        #[command(flatten)]
        wait: AwaitArgs,
    },

    /// Show which revisions up to a reference are not yet applied
    SyncStatus {
        /// Revision or ref to check
        reference: String,
    },

    /// List the services a daemon is running
    Services {
        /// Only list services in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List the images services run and the ones available to them
    Images {
        /// Only list images for this service
        #[arg(short, long)]
        service: Option<String>,
    },

    /// Print the config the daemon is applying
    Export,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = || commands::client(&cli.url, cli.tenant.as_deref());

    match cli.command {
        Commands::Serve {
            port,
            ref default_tenant,
        } => {
            serve::run(port, default_tenant)?;
        }
        Commands::Release {
            ref services,
            all,
            ref image,
            ref excludes,
            dry_run,
            ref message,
            ref user,
            ref wait,
        } => {
            let request = release::Request {
                services,
                all,
                image: image.as_deref(),
                excludes,
                dry_run,
            };
            let cause = commands::cause(message.as_deref(), user.as_deref());
            release::run(&client(), request, cause, wait)?;
        }
        Commands::Policy {
            ref services,
            ref add,
            ref remove,
            ref message,
            ref user,
            ref wait,
        } => {
            let cause = commands::cause(message.as_deref(), user.as_deref());
            policy::run(&client(), services, add, remove, cause, wait)?;
        }
        Commands::Job { ref id, ref wait } => {
            job::run(&client(), id, wait)?;
        }
        Commands::SyncStatus { ref reference } => {
            sync_status::run(&client(), reference)?;
        }
        Commands::Services { ref namespace } => {
            services::run(&client(), namespace.as_deref())?;
        }
        Commands::Images { ref service } => {
            images::run(&client(), service.as_deref())?;
        }
        Commands::Export => {
            export::run(&client())?;
        }
    }

    Ok(())
}
