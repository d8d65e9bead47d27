pub mod export;
pub mod images;
pub mod job;
pub mod policy;
pub mod release;
pub mod serve;
pub mod services;
pub mod sync_status;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::time::Duration;
use tideway_core::{Cause, JobId};
use tideway_sdk::{watch_change, Backoff, Progress, TidewayClient};
use tracing::debug;

#[derive(Args, Debug, Clone)]
pub struct AwaitArgs {
    /// Also wait until the cluster has applied the commit
    #[arg(long)]
    pub sync: bool,

    /// Seconds to wait for each stage
    #[arg(long, default_value = "60")]
    pub timeout: u64,
}

pub fn client(url: &str, tenant: Option<&str>) -> TidewayClient {
    let client = TidewayClient::new(url);
    match tenant {
        Some(tenant) => client.with_tenant(tenant),
        None => client,
    }
}

pub fn cause(message: Option<&str>, user: Option<&str>) -> Cause {
    Cause {
        message: message.unwrap_or_default().to_string(),
        user: user
            .map(str::to_string)
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_default(),
    }
}

/// Follow a submitted job, printing each step as it happens.
pub fn follow(client: &TidewayClient, job: &JobId, wait: &AwaitArgs) -> Result<()> {
    let backoff = Backoff::default().with_timeout(Duration::from_secs(wait.timeout));
    debug!(%job, sync = wait.sync, timeout = wait.timeout, "following job");
    println!("{}: {}", "Job".bold(), job.to_string().yellow());

    watch_change(client, job, wait.sync, &backoff, |progress| {
        let line = progress.to_string();
        match progress {
            Progress::Queued => println!("{}", line.dimmed()),
            Progress::NothingToDo => println!("{}", line.yellow()),
            Progress::Pushed(_) => println!("{}", line.green()),
            Progress::Applied => println!("{}", line.green().bold()),
        }
    })?;
    Ok(())
}

pub fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("missing name in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
