use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use atty::Stream;
use clap::{Parser, Subcommand};
use ogechina_rs::config::default_data_dir;
use ogechina_rs::render::{BookmarkView, ChapterRow, ChapterView, render_chapter, render_index};
use ogechina_rs::{
    AudioCache, AudioOutput, BookmarkTag, CloudClient, Command as SessionCommand, Event,
    FileStore, Filter, KeyValueStore, MemoryStore, Notice, PlayState, Reader, ReaderConfig,
    Session, SilentOutput,
};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_EXPORT_FILE: &str = "bookmarks.json";

#[derive(Parser, Debug)]
#[command(
    name = "ogechina",
    about = "Read and listen to the Quran from the terminal",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding the cache, bookmarks and config.json.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory for this run.
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Base URL of the content API.
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Maximum number of chapters kept in the cache.
    #[arg(long, global = true)]
    cache_budget: Option<usize>,

    /// Read settings from this JSON file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all chapters.
    Chapters {
        /// Only show chapters whose name contains this text.
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Print a chapter with its translation.
    Read {
        chapter: u32,
        /// Only show verses containing this text.
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// List the available reciters.
    Reciters,
    /// Manage bookmarks.
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    /// Manage the local cache.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Interactive reading and recitation session on stdin.
    Listen {
        /// Chapter to open first.
        chapter: Option<u32>,
        /// Reciter id, e.g. ar.husary.
        #[arg(short, long)]
        reciter: Option<String>,
    },
    /// Serve the reader over HTTP.
    #[cfg(feature = "web")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Public base URL used in links.
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum BookmarkCommand {
    /// Bookmark a verse, e.g. `2:255`.
    Add { tag: BookmarkTag },
    List,
    Clear,
    /// Write all bookmarks as a JSON array.
    Export {
        #[arg(short, long, default_value = DEFAULT_EXPORT_FILE)]
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Remove cached chapters, audio and bookmarks.
    Clear,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(dispatch(cli));
    // A pending stdin read must not hold the process open.
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("ogechina_rs=debug,ogechina=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ogechina_rs=info,ogechina=info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Defaults, then the config file, then command-line flags.
fn load_config(cli: &Cli) -> Result<ReaderConfig, Box<dyn Error>> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let mut config = ReaderConfig::load(cli.config.as_deref(), &data_dir)?;
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    }
    if let Some(base) = &cli.api_base {
        config.api_base = base.clone();
    }
    if cli.cache_budget.is_some() {
        config.cache_budget = cli.cache_budget;
    }
    Ok(config)
}

fn build_reader(cli: &Cli, config: &ReaderConfig) -> Result<Reader<CloudClient>, Box<dyn Error>> {
    let client = CloudClient::new(config.api_base.clone(), &config.user_agent)?;
    let (store, audio_cache): (Arc<dyn KeyValueStore>, AudioCache) = if cli.ephemeral {
        (Arc::new(MemoryStore::new()), AudioCache::disabled())
    } else {
        let dir = config.resolved_data_dir();
        (
            Arc::new(FileStore::new(dir.join("store"))),
            AudioCache::in_dir(&dir),
        )
    };
    Ok(Reader::new(client, store, audio_cache, config))
}

async fn dispatch(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = load_config(&cli)?;
    let reader = build_reader(&cli, &config)?;
    let as_json = cli.json;
    match cli.command {
        Command::Chapters { filter } => handle_chapters(&reader, filter, as_json).await,
        Command::Read { chapter, filter } => handle_read(&reader, chapter, filter, as_json).await,
        Command::Reciters => handle_reciters(&config, as_json),
        Command::Bookmark(command) => handle_bookmark(&reader, command, as_json),
        Command::Cache(CacheCommand::Clear) => {
            reader.clear_all()?;
            if as_json {
                println!("{}", json!({ "cleared": true }));
            } else {
                println!("Cache cleared.");
            }
            Ok(())
        }
        Command::Listen { chapter, reciter } => {
            let reciter = reciter.unwrap_or_else(|| config.initial_reciter());
            if config.find_reciter(&reciter).is_none() {
                warn!(%reciter, "reciter is not in the catalogue");
            }
            handle_listen(Arc::new(reader), reciter, chapter, as_json).await
        }
        #[cfg(feature = "web")]
        Command::Serve { addr, base_url } => {
            let web_config = ogechina_rs::web::WebConfig {
                addr,
                base_url: base_url.unwrap_or_else(|| format!("http://{addr}")),
            };
            let state = ogechina_rs::web::AppState::new(Arc::new(reader), &config);
            ogechina_rs::web::serve(web_config, state).await?;
            Ok(())
        }
    }
}

async fn handle_chapters(
    reader: &Reader<CloudClient>,
    filter: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let chapters = reader.chapter_index().await.map_err(|err| {
        warn!(error = %err, "chapter index unavailable");
        Notice::IndexUnavailable
    })?;
    let filter = Filter::parse(filter.as_deref().unwrap_or_default());
    let rows: Vec<ChapterRow> = render_index(&chapters, &filter)
        .into_iter()
        .filter(|row| row.visible)
        .collect();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_index_table(&rows, filter.query());
    }
    Ok(())
}

async fn handle_read(
    reader: &Reader<CloudClient>,
    chapter: u32,
    filter: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let loaded = reader.open_chapter(chapter).await.map_err(|err| {
        warn!(chapter, error = %err, "chapter unavailable");
        Notice::ChapterUnavailable { chapter }
    })?;
    let filter = Filter::parse(filter.as_deref().unwrap_or_default());
    let view = render_chapter(&loaded, &filter, None);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_chapter(&view);
    }
    Ok(())
}

fn handle_reciters(config: &ReaderConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let active = config.initial_reciter();
    if as_json {
        let payload = json!({ "default": active, "reciters": config.reciters });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    let width = config
        .reciters
        .iter()
        .map(|reciter| reciter.id.len())
        .max()
        .unwrap_or(2)
        .max("ID".len());
    println!("  {:<width$}  {}", "ID", "NAME", width = width);
    println!("  {:-<width$}  {}", "", "----", width = width);
    for reciter in &config.reciters {
        let marker = if reciter.id == active { '*' } else { ' ' };
        println!("{marker} {:<width$}  {}", reciter.id, reciter.name, width = width);
    }
    Ok(())
}

fn handle_bookmark(
    reader: &Reader<CloudClient>,
    command: BookmarkCommand,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    match command {
        BookmarkCommand::Add { tag } => {
            let added = reader.add_bookmark(tag)?;
            if as_json {
                println!("{}", json!({ "tag": tag, "added": added }));
            } else if added {
                println!("Bookmarked {tag}.");
            } else {
                println!("{tag} is already bookmarked.");
            }
        }
        BookmarkCommand::List => {
            let tags = reader.bookmarks().list();
            if as_json {
                println!("{}", serde_json::to_string_pretty(&tags)?);
            } else {
                print_bookmarks(&ogechina_rs::render::render_bookmarks(&tags));
            }
        }
        BookmarkCommand::Clear => {
            reader.bookmarks().clear()?;
            if as_json {
                println!("{}", json!({ "cleared": true }));
            } else {
                println!("Bookmarks cleared.");
            }
        }
        BookmarkCommand::Export { output } => {
            let exported = reader.bookmarks().export_json()?;
            write_export(&output, &exported)?;
            if as_json {
                let count = reader.bookmarks().list().len();
                println!("{}", json!({ "path": output, "bookmarks": count }));
            } else {
                println!("Exported bookmarks to {}.", output.display());
            }
        }
    }
    Ok(())
}

fn write_export(path: &Path, contents: &str) -> Result<(), Box<dyn Error>> {
    fs::write(path, contents).map_err(|err| format!("cannot write {}: {err}", path.display()))?;
    Ok(())
}

async fn handle_listen(
    reader: Arc<Reader<CloudClient>>,
    reciter: String,
    chapter: Option<u32>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "audio")]
    {
        match ogechina_rs::audio::RodioOutput::try_default() {
            Ok(output) => return drive_session(reader, output, reciter, chapter, as_json).await,
            Err(err) => warn!(error = %err, "no audio device; continuing without sound"),
        }
    }
    drive_session(reader, SilentOutput::default(), reciter, chapter, as_json).await
}

async fn drive_session<O: AudioOutput>(
    reader: Arc<Reader<CloudClient>>,
    output: O,
    reciter: String,
    chapter: Option<u32>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (commands, command_rx) = mpsc::unbounded_channel();
    let session = Session::new(reader, output, reciter, event_tx);

    let printer = tokio::spawn(print_events(events, as_json));
    if let Some(chapter) = chapter {
        commands.send(SessionCommand::OpenChapter(chapter))?;
    }
    if !as_json {
        println!("Type `help` for commands.");
    }
    let input = tokio::spawn(read_commands(commands));

    // The output may not be Send, so the session runs on this task.
    session.run(command_rx).await;
    input.abort();
    printer.await?;
    Ok(())
}

async fn read_commands(commands: mpsc::UnboundedSender<SessionCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "stdin closed");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(command)) => {
                if commands.send(command).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(message) => eprintln!("{message}"),
        }
    }
    let _ = commands.send(SessionCommand::Shutdown);
}

const HELP: &str = "\
open N         open chapter N
play [V]       play verse V of the open chapter, or toggle
pause, toggle  pause or resume
next, prev     move one verse
seek P         jump to P percent of the current verse
reciter ID     switch reciter
search [TEXT]  filter the open chapter (or the index); empty clears
bookmark C:V   bookmark a verse
bookmarks      list bookmarks
goto C:V       open a bookmarked verse
export         write bookmarks.json
index          list all chapters
clear-cache    wipe cache and bookmarks
quit";

/// Parses one input line. `Ok(None)` means nothing to send.
fn parse_command(line: &str) -> Result<Option<SessionCommand>, String> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((line, ""));
    let command = match word {
        "" => return Ok(None),
        "help" | "?" => {
            println!("{HELP}");
            return Ok(None);
        }
        "open" => SessionCommand::OpenChapter(parse_number(rest, "chapter")?),
        "play" if rest.is_empty() => SessionCommand::TogglePlay,
        "play" => {
            let verse: usize = parse_number(rest, "verse")?;
            if verse == 0 {
                return Err("verses are numbered from 1".to_string());
            }
            SessionCommand::Play(verse - 1)
        }
        "pause" | "toggle" => SessionCommand::TogglePlay,
        "next" => SessionCommand::Next,
        "prev" | "previous" => SessionCommand::Previous,
        "seek" => SessionCommand::Seek(parse_number(rest, "percent")?),
        "reciter" if rest.is_empty() => return Err("usage: reciter ID".to_string()),
        "reciter" => SessionCommand::SelectReciter(rest.to_string()),
        "search" => SessionCommand::Search(rest.to_string()),
        "bookmark" => SessionCommand::AddBookmark(parse_tag(rest)?),
        "bookmarks" => SessionCommand::ShowBookmarks,
        "goto" => SessionCommand::OpenBookmark(parse_tag(rest)?),
        "export" => SessionCommand::ExportBookmarks,
        "index" => SessionCommand::LoadIndex,
        "clear-cache" => SessionCommand::ClearCache,
        "quit" | "exit" => SessionCommand::Shutdown,
        other => return Err(format!("unknown command {other:?}; type `help`")),
    };
    Ok(Some(command))
}

fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("expected a {what} number, got {raw:?}"))
}

fn parse_tag(raw: &str) -> Result<BookmarkTag, String> {
    raw.parse().map_err(|err: ogechina_rs::ReaderError| err.to_string())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<Event>, as_json: bool) {
    while let Some(event) = events.recv().await {
        if as_json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "event not serializable"),
            }
            if let Event::BookmarksExported(exported) = &event {
                export_from_session(exported, false);
            }
            continue;
        }
        match event {
            Event::IndexLoaded(rows) => print_index_table(&rows, None),
            Event::IndexFiltered(rows) => {
                let visible: Vec<ChapterRow> = rows.into_iter().filter(|row| row.visible).collect();
                print_index_table(&visible, None);
            }
            Event::ChapterLoading(chapter) => println!("Loading surah {chapter}…"),
            Event::ChapterRendered(view) => print_chapter(&view),
            Event::Playback {
                state,
                chapter,
                index,
            } => print_playback(state, chapter, index),
            Event::Seeked(offset) => println!("at {:.1}s", offset.as_secs_f64()),
            Event::ReciterChanged(reciter) => println!("Reciter: {reciter}"),
            Event::Bookmarks(view) => print_bookmarks(&view),
            Event::BookmarksExported(exported) => export_from_session(&exported, true),
            Event::CacheCleared => println!("Cache cleared."),
            Event::Notice(notice) => eprintln!("! {notice}"),
        }
    }
}

fn export_from_session(exported: &str, report: bool) {
    let path = Path::new(DEFAULT_EXPORT_FILE);
    match write_export(path, exported) {
        Ok(()) if report => println!("Exported bookmarks to {}.", path.display()),
        Ok(()) => {}
        Err(err) => eprintln!("! {err}"),
    }
}

fn print_playback(state: PlayState, chapter: Option<u32>, index: usize) {
    let at = chapter
        .map(|chapter| format!("{chapter}:{}", index + 1))
        .unwrap_or_else(|| "-".to_string());
    let label = match state {
        PlayState::Playing => "playing",
        PlayState::Paused => "paused",
        PlayState::Idle => "stopped",
    };
    println!("[{label}] {at}");
}

fn print_index_table(rows: &[ChapterRow], query: Option<&str>) {
    if rows.is_empty() {
        match query {
            Some(query) => println!("No chapters match \"{query}\"."),
            None => println!("No chapters."),
        }
        return;
    }
    let width = rows
        .iter()
        .map(|row| row.label.chars().count())
        .max()
        .unwrap_or(7)
        .max("CHAPTER".len());
    println!("{:<width$}  {:>6}  {}", "CHAPTER", "AYAHS", "NAME", width = width);
    println!("{:-<width$}  {:->6}  {}", "", "", "----", width = width);
    for row in rows {
        let count = row.meta.split_whitespace().next().unwrap_or_default();
        println!(
            "{:<width$}  {:>6}  {}",
            row.label,
            count,
            row.name,
            width = width
        );
    }
}

fn print_chapter(view: &ChapterView) {
    let mut body = String::new();
    for row in &view.rows {
        let marker = if row.highlighted { "▶ " } else { "" };
        body.push_str(&format!(
            "{marker}**{}** {}\n\n> {}\n\n",
            row.position, row.text, row.translation_line
        ));
    }
    let heading = match &view.query {
        Some(query) => format!(
            "{} ({} of {} ayahs match \"{query}\")",
            view.title,
            view.rows.len(),
            view.total_verses
        ),
        None => view.title.clone(),
    };
    render_markdown_block(&heading, &body);
}

fn print_bookmarks(view: &BookmarkView) {
    if let Some(placeholder) = view.placeholder {
        println!("{placeholder}");
        return;
    }
    println!("Bookmarks:");
    for entry in &view.entries {
        println!("- {}", entry.label);
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown_block(title: &str, body: &str) {
    println!("\n{title}:");
    let trimmed = body.trim();
    if trimmed.is_empty() {
        println!("(no ayahs)");
        return;
    }
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
