use std::fs::File;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use log::{error, info};
use ratatui::{Terminal, backend::CrosstermBackend};
use simplelog::{Config, LevelFilter, WriteLogger};

use jobtail::api::ApiClient;
use jobtail::event_source::KeyboardEventSource;
use jobtail::panic_handler::initialize_panic_handler;
use jobtail::query_set::{encode_arr, search_input_queryset};
use jobtail::{App, AppConfig, run_app_with_event_source, settings};

#[derive(Parser, Debug)]
#[command(name = "jobtail", version)]
#[command(about = "Follow and search AWX job output in the terminal")]
struct Args {
    /// Id of the job to open
    job_id: u64,

    /// Controller base URL, e.g. https://awx.example.com
    #[arg(short, long)]
    url: Option<String>,

    /// Personal access token sent as a bearer token
    #[arg(short, long)]
    token: Option<String>,

    /// Initial search, written the way it is typed in the search box
    #[arg(short, long)]
    search: Option<String>,

    #[arg(long)]
    page_size: Option<usize>,

    /// Live pages kept in memory
    #[arg(long)]
    page_limit: Option<usize>,

    #[arg(long, default_value = "jobtail.log")]
    log_file: PathBuf,

    /// Overrides `log_level` from the config file
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Store --url and --token in the config file
    #[arg(long)]
    save: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    settings::load_settings();

    let level = args
        .log_level
        .unwrap_or_else(|| settings::get_log_level().parse().unwrap_or(LevelFilter::Info));
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("Failed to create log file {:?}", args.log_file))?,
    )?;

    info!("Starting jobtail for job {}", args.job_id);

    if args.save {
        if let Some(url) = &args.url {
            settings::set_controller_url(url);
        }
        if let Some(token) = &args.token {
            settings::set_token(token);
        }
    }

    let url = args.url.unwrap_or_else(settings::get_controller_url);
    let token = args.token.or_else(settings::get_token);
    let client = ApiClient::new(&url, token, settings::get_request_timeout())
        .with_context(|| format!("Failed to set up client for {url}"))?;

    let config = AppConfig {
        page_size: args.page_size.unwrap_or_else(settings::get_page_size),
        page_limit: args.page_limit.unwrap_or_else(settings::get_page_limit),
        poll_interval: settings::get_poll_interval(),
    };
    let search_param = args
        .search
        .as_deref()
        .map(|terms| encode_arr(&search_input_queryset(terms)))
        .unwrap_or_default();

    // Open before taking over the terminal so connection errors print plainly
    let mut app = App::open(Arc::new(client), args.job_id, config, search_param)?;

    initialize_panic_handler();

    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app_with_event_source(&mut terminal, &mut app, &mut KeyboardEventSource);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        error!("Application error: {err:?}");
        eprintln!("{err:?}");
    }

    info!("Shutting down jobtail");
    Ok(())
}
