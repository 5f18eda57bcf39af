//! CLI binary for inkpage.
//!
//! Stands in for the device loop: opens a book, applies the navigation given
//! on the command line, prints the resulting page and saves the position.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use inkpage::{
    ExtractionProgressCallback, MonospaceMetrics, ProgressCallback, ReaderConfig, ReaderEvent,
    ReaderSession, RenderPayload,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar for the full pass, shown with `--wait`.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Opening");
        bar.set_message("reading first chapters…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_quick_pass_complete(&self, items_read: usize, pages: usize) {
        self.bar.println(format!(
            "  {} First {pages} pages ready {}",
            green("✓"),
            dim(&format!("({items_read} items)"))
        ));
    }

    fn on_full_pass_start(&self, total_items: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} items  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_items as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Paginating");
    }

    fn on_item_processed(&self, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
    }

    fn on_item_error(&self, index: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} item {index}: {}", red("✗"), red(error)));
    }

    fn on_full_pass_complete(&self, pages: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        if errors == 0 {
            eprintln!("{} {} pages", green("✔"), bold(&pages.to_string()));
        } else {
            eprintln!(
                "{} {} pages  ({} items skipped)",
                green("✔"),
                bold(&pages.to_string()),
                red(&errors.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Reopen the last book at its saved page
  inkpage

  # Open a book and turn two pages forward
  inkpage ~/books/moby-dick.epub --turn 2

  # Jump to page 120 once the whole book is paginated
  inkpage moby-dick.epub --wait --page 120

  # Chapter list as JSON
  inkpage moby-dick.epub --chapters --json

  # Re-extract a book from scratch
  inkpage moby-dick.epub --refresh

  # List the library
  inkpage --list

ENVIRONMENT VARIABLES:
  INKPAGE_CACHE_DIR      Override the cache directory
  INKPAGE_BOOKMARK_DIR   Override the bookmark directory
  INKPAGE_BOOKS_DIR      Override the books directory (default ~/books)
  RUST_LOG               Log filter, overrides -v / -q
"#;

#[derive(Parser, Debug)]
#[command(
    name = "inkpage",
    version,
    about = "Paginate EPUB books for e-paper displays",
    long_about = "Open an EPUB book at its saved page. The first pages are available at once; \
the rest of the book is paginated in the background and cached for the next open.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Book to open. Default: the last book read, else the newest in the library.
    book: Option<PathBuf>,

    /// Go to this page (1-based) after opening.
    #[arg(long)]
    page: Option<usize>,

    /// Move by this many pages after opening (negative goes back).
    #[arg(long, allow_hyphen_values = true)]
    turn: Option<i64>,

    /// Jump to this chapter (1-based) after opening.
    #[arg(long)]
    chapter: Option<usize>,

    /// Delete the cached pages and extract the book again.
    #[arg(long)]
    refresh: bool,

    /// Wait for the whole book to be paginated before navigating.
    #[arg(long)]
    wait: bool,

    /// Print the chapter list instead of the page.
    #[arg(long)]
    chapters: bool,

    /// List the books in the library and exit.
    #[arg(long)]
    list: bool,

    /// Print JSON payloads instead of text.
    #[arg(long, env = "INKPAGE_JSON")]
    json: bool,

    #[arg(long, env = "INKPAGE_WIDTH", default_value_t = 300.0)]
    width: f32,

    #[arg(long, env = "INKPAGE_HEIGHT", default_value_t = 400.0)]
    height: f32,

    #[arg(long, env = "INKPAGE_MARGIN", default_value_t = 4.0)]
    margin: f32,

    /// Average glyph advance of the book font, in pixels.
    #[arg(long, env = "INKPAGE_ADVANCE", default_value_t = 9.0)]
    advance: f32,

    #[arg(long, env = "INKPAGE_LINE_HEIGHT", default_value_t = 19.0)]
    line_height: f32,

    /// Quick-pass word target.
    #[arg(long, env = "INKPAGE_QUICK_WORDS", default_value_t = 10_000)]
    quick_words: usize,

    #[arg(long, env = "INKPAGE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[arg(long, env = "INKPAGE_BOOKMARK_DIR")]
    bookmark_dir: Option<PathBuf>,

    #[arg(long, env = "INKPAGE_BOOKS_DIR")]
    books_dir: Option<PathBuf>,

    #[arg(long, env = "INKPAGE_NO_PROGRESS")]
    no_progress: bool,

    #[arg(short, long, env = "INKPAGE_VERBOSE")]
    verbose: bool,

    #[arg(short, long, env = "INKPAGE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = cli.wait && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let cli_progress = show_progress.then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = cli_progress
        .clone()
        .map(|cb| cb as Arc<dyn ExtractionProgressCallback>);
    let config = build_config(&cli, progress_cb)?;
    let grace = config.shutdown_grace();
    let mut session = ReaderSession::new(config);

    // ── Library listing ──────────────────────────────────────────────────
    if cli.list {
        let books = session.library().scan();
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&books).context("Failed to serialise book list")?
            );
        } else if books.is_empty() {
            eprintln!("No books in {}", session.library().books_dir().display());
        } else {
            for b in &books {
                println!(
                    "{:<40}  {:>8} KiB  {}",
                    b.file_name,
                    b.size / 1024,
                    dim(&b.modified.format("%Y-%m-%d %H:%M").to_string())
                );
            }
        }
        return Ok(());
    }

    // ── Open ─────────────────────────────────────────────────────────────
    let path = match cli.book.clone() {
        Some(p) => p,
        None => match session.library().last_book() {
            Some(p) => p,
            None => {
                print_payload(&session.render(), cli.json)?;
                return Ok(());
            }
        },
    };

    let mut payload = session.open(&path).await;

    if cli.refresh {
        payload = session.handle(ReaderEvent::Refresh).await;
    }

    if cli.wait {
        if !session.wait_for_full(None).await && !cli.quiet {
            eprintln!("{} full pagination unavailable", red("✘"));
        }
        payload = session.render();
    }
    if let Some(ref cb) = cli_progress {
        // Full hits and unreadable books never start the bar.
        cb.bar.finish_and_clear();
    }

    // ── Navigate ─────────────────────────────────────────────────────────
    if let Some(chapter) = cli.chapter {
        payload = session
            .handle(ReaderEvent::SelectChapter(chapter.saturating_sub(1)))
            .await;
    }
    if let Some(page) = cli.page {
        let current = session.page_number().unwrap_or(1) as i64;
        payload = session
            .handle(ReaderEvent::Turn(page.max(1) as i64 - current))
            .await;
    }
    if let Some(delta) = cli.turn {
        payload = session.handle(ReaderEvent::Turn(delta)).await;
    }
    if session.poll_completion() {
        payload = session.render();
    }

    // ── Output ───────────────────────────────────────────────────────────
    if cli.chapters {
        print_payload(&session.chapter_payload(0), cli.json)?;
    } else {
        print_payload(&payload, cli.json)?;
    }

    if !session.shutdown(grace).await && !cli.quiet {
        eprintln!("{} bookmark may not have been saved", red("⚠"));
    }
    Ok(())
}

fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ReaderConfig> {
    let mut builder = ReaderConfig::builder()
        .page_size(cli.width, cli.height)
        .margin(cli.margin)
        .metrics(Arc::new(MonospaceMetrics::new(cli.advance, cli.line_height)))
        .quick_word_target(cli.quick_words);

    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(ref dir) = cli.bookmark_dir {
        builder = builder.bookmark_dir(dir);
    }
    if let Some(ref dir) = cli.books_dir {
        builder = builder.books_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_payload(payload: &RenderPayload, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if json {
        let text = serde_json::to_string_pretty(payload).context("Failed to serialise payload")?;
        writeln!(out, "{text}").context("Failed to write to stdout")?;
        return Ok(());
    }

    match payload {
        RenderPayload::Page {
            lines,
            page_number,
            total_pages,
            complete,
        } => {
            for line in lines {
                writeln!(out, "{line}").context("Failed to write to stdout")?;
            }
            let status = if *complete { "" } else { " (more loading)" };
            eprintln!("{}", dim(&format!("── {page_number}/{total_pages}{status} ──")));
        }
        RenderPayload::Menu {
            title,
            items,
            selected,
        } => {
            writeln!(out, "{}", bold(title))?;
            for (i, item) in items.iter().enumerate() {
                let marker = if i == *selected { ">" } else { " " };
                writeln!(out, "{marker} {item}")?;
            }
        }
        RenderPayload::Chapters { chapters, .. } => {
            for (i, chapter) in chapters.iter().enumerate() {
                let page = chapter
                    .page_index
                    .map(|p| format!("p. {}", p + 1))
                    .unwrap_or_default();
                writeln!(out, "{:>3}. {:<60} {}", i + 1, chapter.title, dim(&page))?;
            }
        }
        RenderPayload::Confirmation {
            title,
            message,
            options,
        } => {
            writeln!(out, "{}", bold(title))?;
            writeln!(out, "{message}")?;
            if !options.is_empty() {
                writeln!(out, "[{}]", options.join(" / "))?;
            }
        }
    }
    Ok(())
}
