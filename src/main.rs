use std::{collections::HashMap, path::PathBuf, process::ExitCode, thread};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{Config, PartialConfig},
    report::Reporter,
    sources::{instagram::InstagramResolver, twitter::TwitterClient},
    tracker::PollCursor,
};

mod config;
mod media;
mod report;
mod sources;
mod tracker;

#[derive(Parser)]
#[clap(version, about)]
struct Args {
    /// Optional toml configuration. Command line and environment take precedence.
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    #[clap(long, value_parser, env = "TWITTER_CONSUMER_KEY", hide_env_values = true)]
    consumer_key: Option<String>,
    #[clap(long, value_parser, env = "TWITTER_CONSUMER_SECRET", hide_env_values = true)]
    consumer_secret: Option<String>,
    #[clap(long, value_parser, env = "TWITTER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    #[clap(long, value_parser, env = "TWITTER_ACCESS_TOKEN_SECRET", hide_env_values = true)]
    access_token_secret: Option<String>,

    /// Accounts to monitor (screen names or ids).
    #[clap(short, long = "account", value_parser, env = "TWITTER_ACCOUNTS", value_delimiter = ',')]
    accounts: Vec<String>,

    /// Max pages fetched per feed per cycle [default: 25]
    #[clap(long, value_parser, env = "TWEET_PAGES")]
    page_limit: Option<u32>,

    /// Posts per page [default: 200]
    #[clap(long, value_parser, env = "TWEET_COUNT")]
    page_size: Option<u32>,

    /// Watched feeds: any combination of "fav", "rt", "mixed" [default: rt]
    #[clap(short, long, value_parser, env = "MODE_SPECIFIED")]
    mode: Option<String>,

    /// Seconds between poll cycles [default: 300]
    #[clap(long, value_parser, env = "POLL_INTERVAL")]
    interval: Option<u64>,

    /// Run a single cycle and exit.
    #[clap(long, value_parser, default_value_t = false)]
    once: bool,

    /// Report original size of twitter images.
    #[clap(long, value_parser, default_value_t = false)]
    original_quality: bool,

    /// Emit logs as json.
    #[clap(long, value_parser, default_value_t = false)]
    json_logs: bool,
}

impl Args {
    fn overrides(&self) -> PartialConfig {
        PartialConfig {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            access_token: self.access_token.clone(),
            access_token_secret: self.access_token_secret.clone(),
            accounts: self.accounts.clone(),
            page_limit: self.page_limit,
            page_size: self.page_size,
            mode: self.mode.clone(),
            interval: self.interval,
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.json_logs);

    let file = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "reading config");
            match PartialConfig::from_file(path) {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => PartialConfig::default(),
    };

    let cfg = match Config::try_from(args.overrides().or(file)) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let twitter = TwitterClient::new(cfg.credentials.clone());
    let instagram = InstagramResolver::new();
    let reporter = Reporter::new(args.original_quality);

    let mut cursors: HashMap<String, PollCursor> = cfg
        .accounts
        .iter()
        .map(|a| (a.clone(), PollCursor::default()))
        .collect();

    loop {
        for account in &cfg.accounts {
            let cursor = cursors.remove(account).unwrap_or_default();
            let (cursor, cycle) = tracker::poll(cursor, &twitter, &instagram, account, &cfg.poll);
            cursors.insert(account.clone(), cursor);

            if !cycle.failures.is_empty() {
                let ids: Vec<&str> = cycle.failures.iter().filter_map(|f| f.post_id.as_deref()).collect();
                error!(%account, failed = cycle.failures.len(), ?ids, "some posts could not be resolved");
            }

            for record in cycle.delivered.values() {
                debug!(post_id = %record.post_id, text = %report::description(&record.source_post), "delivering");
            }
            for line in reporter.lines(&cycle.delivered) {
                println!("{line}");
            }
        }

        if args.once {
            break;
        }

        info!(secs = cfg.interval.as_secs(), "sleeping until next cycle");
        thread::sleep(cfg.interval);
    }

    ExitCode::SUCCESS
}
