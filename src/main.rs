use anyhow::{Context, Result};
use std::io::{self, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use git_mr::api::{ApiClient, UreqTransport};
use git_mr::checkout::{CheckoutOptions, checkout};
use git_mr::cli::{self, Cli, Commands};
use git_mr::config::{self, Config};
use git_mr::fixmsg::fixmsg;
use git_mr::git::Git;
use git_mr::origin;
use git_mr::state::RequestDb;
use git_mr::status::print_status;
use git_mr::Session;

fn main() -> ExitCode {
    let args = cli::parse_args();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr. `--verbose` shows every git command and cache lookup;
/// `RUST_LOG` overrides both levels.
fn init_logging(verbose: bool) {
    let directives = config::log_directives(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(args: Cli) -> Result<()> {
    let config = Config::from_cli(&args)?;
    let git = Git::new();
    let origin = origin::resolve(&git)?;

    std::fs::create_dir_all(&config.cache_root).with_context(|| {
        format!(
            "Failed to create cache directory {}",
            config.cache_root.display()
        )
    })?;
    let db = RequestDb::open(&config.db_path()).with_context(|| {
        format!(
            "Failed to open request database {}",
            config.db_path().display()
        )
    })?;

    let transport = UreqTransport::new(config.token.clone());
    let mut session = Session {
        vcs: &git,
        api: ApiClient::new(
            origin.api_base_url.clone(),
            config.http_cache_dir(),
            &transport,
        ),
        origin,
        db,
        default_branch: config.default_branch.clone(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Commands::Status(status_args) => {
            let request_id = match status_args.request_id {
                Some(id) => Some(id),
                None => session.checked_out()?,
            };
            print_status(&session, request_id, args.no_cache, &mut out)?;
        }
        Commands::Checkout(checkout_args) => {
            let options = CheckoutOptions {
                request_id: checkout_args.request_id,
                no_cache: args.no_cache,
                fetch: !checkout_args.no_fetch,
                overwrite_remote: checkout_args.overwrite_remote,
            };
            checkout(&mut session, &options, &mut out)?;
            writeln!(out)?;
            print_status(&session, Some(options.request_id), false, &mut out)?;
        }
        Commands::Fixmsg => {
            let request_id = session.checked_out()?;
            let upstream = session.upstream();
            fixmsg(session.vcs, &upstream, request_id, &mut out)?;
            writeln!(out)?;
            print_status(&session, request_id, false, &mut out)?;
        }
        Commands::List => {
            handle_list(&session, &mut out)?;
        }
    }

    Ok(())
}

/// Handle list command - show the branches recorded for this project.
fn handle_list(session: &Session<'_>, out: &mut dyn Write) -> Result<()> {
    let origin = &session.origin;
    let records = session.db.list(&origin.host, &origin.project_path)?;

    if records.is_empty() {
        writeln!(out, "No merge requests checked out for {}", origin.project_path)?;
        return Ok(());
    }

    let current = session.vcs.current_branch().ok();
    for record in records {
        let marker = if current.as_deref() == Some(record.branch.as_str()) {
            "*"
        } else {
            " "
        };
        writeln!(
            out,
            "{} {:>8}  {:40} {}",
            marker,
            format!("!{}", record.request_id),
            record.branch,
            record.updated_at
        )?;
    }
    Ok(())
}
