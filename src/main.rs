use anyhow::{bail, Context, Result};
use cedula_lookup::{
    config::{Config, SourceConfig},
    fetch::{Format, SourceKind},
    render, Answer, Session,
};
use clap::Parser;
use std::{path::PathBuf, process::exit};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Look up a record by its ID (CEDULA) in a remote or relational dataset.
#[derive(Parser, Debug)]
#[command(name = "cedula-lookup", version)]
struct Cli {
    /// YAML config file (defaults to ./cedula-lookup.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured retrieval strategy
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Override the file URL
    #[arg(long)]
    url: Option<String>,

    /// Override the file format instead of guessing it from the URL
    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Column holding the lookup key
    #[arg(long)]
    key_column: Option<String>,

    /// Disable memoization of the loaded dataset
    #[arg(long)]
    no_cache: bool,

    /// Print found records as JSON
    #[arg(long)]
    json: bool,

    /// Answer a single query and exit
    #[arg(long)]
    id: Option<String>,
}

impl Cli {
    /// Merge the flags into `config`. Flags the resulting source cannot use
    /// are rejected rather than dropped.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(kind) = self.source {
            match &mut config.source {
                Some(sc) => sc.kind = kind,
                None => config.source = Some(SourceConfig::new(kind)),
            }
        }
        if let Some(url) = &self.url {
            let sc = config
                .source
                .get_or_insert_with(|| SourceConfig::new(SourceKind::Remote));
            sc.url = Some(url.clone());
        }
        if let Some(format) = self.format {
            match &mut config.source {
                Some(sc) => sc.format = Some(format),
                None => bail!("--format needs a file source (--source or --url)"),
            }
        }
        if let Some(sc) = &config.source {
            if sc.kind == SourceKind::Postgres {
                if self.url.is_some() {
                    bail!("--url does not apply to the postgres source");
                }
                if self.format.is_some() {
                    bail!("--format does not apply to the postgres source");
                }
            }
        }
        if let Some(col) = &self.key_column {
            config.key_column = col.clone();
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        Ok(())
    }
}

fn print_answer(answer: &Answer, json: bool) {
    if let Some(notice) = &answer.notice {
        eprintln!("{}", notice);
    }
    if let Some(outcome) = &answer.outcome {
        println!("{}", render::outcome(outcome, json));
    }
}

#[tokio::main]
async fn main() {
    // ─── 1) init logging ─────────────────────────────────────────────
    // .env first so RUST_LOG set there reaches the filter
    dotenv::dotenv().ok();
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ─── 2) configuration ───────────────────────────────────────────
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config)?;

    let loader = config.build_loader().context("configuring data source")?;
    if let Some(source) = loader.source() {
        info!(kind = ?source.kind(), key_column = %config.key_column, "startup");
    }
    let mut session = Session::new(loader, config.key_column.clone());

    // ─── 3) one-shot query ──────────────────────────────────────────
    if let Some(id) = &cli.id {
        let answer = session.ask(id).await?;
        print_answer(&answer, cli.json);
        return Ok(());
    }

    // ─── 4) interactive prompt ──────────────────────────────────────
    // load up front so a schema failure halts before the first prompt
    let (outcome, _) = session.refresh().await?;
    if let Some(notice) = outcome.diagnostic() {
        eprintln!("{}", notice);
    }

    println!("Search information by {}", session.key_column());
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"ID> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let answer = session.ask(input).await?;
        print_answer(&answer, cli.json);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(args: &[&str], config: &mut Config) -> Result<()> {
        let argv = std::iter::once("cedula-lookup").chain(args.iter().copied());
        let cli = Cli::try_parse_from(argv)?;
        cli.apply(config)
    }

    #[test]
    fn test_url_implies_remote_source() {
        let mut config = Config::default();
        let args = ["--url", "https://example.com/d.csv", "--format", "csv"];
        applied(&args, &mut config).unwrap();
        let sc = config.source.unwrap();
        assert_eq!(sc.kind, SourceKind::Remote);
        assert_eq!(sc.format, Some(Format::Csv));
    }

    #[test]
    fn test_format_without_source_is_rejected() {
        let mut config = Config::default();
        let err = applied(&["--format", "parquet"], &mut config).unwrap_err();
        assert!(err.to_string().contains("--format"));
    }

    #[test]
    fn test_file_flags_rejected_for_postgres() {
        let mut config = Config::default();
        let err = applied(
            &["--source", "postgres", "--url", "https://example.com/d.csv"],
            &mut config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--url"));

        let mut config = Config::default();
        config.source = Some(SourceConfig::new(SourceKind::Postgres));
        let err = applied(&["--format", "csv"], &mut config).unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }
}
