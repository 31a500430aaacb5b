use askama::Template;
use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, warn};

use crate::api::ContentSource;
use crate::config::ReaderConfig;
use crate::error::{Notice, ReaderError};
use crate::model::{BookmarkTag, Chapter, ChapterSummary, Reciter};
use crate::reader::Reader;
use crate::render::{
    BookmarkView, ChapterRow, ChapterView, VerseRow, render_bookmarks, render_chapter,
    render_index,
};
use crate::search::Filter;

type SharedState<S> = Arc<AppState<S>>;

pub struct AppState<S> {
    pub reader: Arc<Reader<S>>,
    pub reciters: Vec<Reciter>,
    pub default_reciter: String,
    /// Public origin used for canonical links, without a trailing slash.
    pub base_url: String,
}

impl<S> AppState<S> {
    pub fn new(reader: Arc<Reader<S>>, config: &ReaderConfig) -> Self {
        Self {
            reader,
            reciters: config.reciters.clone(),
            default_reciter: config.initial_reciter(),
            base_url: WebConfig::default().base_url,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn chapter_url(&self, chapter: u32) -> String {
        format!("{}/chapter/{chapter}", self.base_url)
    }

    fn reciter_or_default(&self, requested: Option<&str>) -> String {
        requested
            .filter(|id| self.reciters.iter().any(|reciter| reciter.id == *id))
            .unwrap_or(&self.default_reciter)
            .to_string()
    }
}

#[derive(Debug, Clone, Copy)]
struct Chrome {
    body_class: &'static str,
    main_class: &'static str,
    card_class: &'static str,
    eyebrow_class: &'static str,
    headline_class: &'static str,
    lede_class: &'static str,
    button_class: &'static str,
    row_class: &'static str,
}

const CHROME: Chrome = Chrome {
    body_class: "bg-stone-50 text-stone-900",
    main_class: "min-h-screen flex flex-col items-center justify-start py-10 px-4",
    card_class: "max-w-4xl w-full space-y-6",
    eyebrow_class: "uppercase tracking-wide text-sm text-stone-500",
    headline_class: "text-3xl font-extrabold tracking-tight",
    lede_class: "text-lg text-stone-600",
    button_class: "inline-flex items-center rounded-md bg-emerald-800 px-3 py-1 text-white text-sm font-semibold shadow hover:bg-emerald-700 transition-colors",
    row_class: "border-b border-stone-200 py-4 space-y-2",
};

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub base_url: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn serve<S: ContentSource + 'static>(
    config: WebConfig,
    state: AppState<S>,
) -> Result<(), WebError> {
    let state = state.with_base_url(&config.base_url);
    let router = build_router(Arc::new(state));
    info!(%config.addr, base = %config.base_url, "Binding HTTP listener");
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Maps a reader failure for `chapter` onto a status and notice text.
    fn for_chapter(chapter: u32, err: ReaderError) -> Self {
        match err {
            ReaderError::ChapterNotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            err => {
                warn!(chapter, error = %err, "chapter unavailable");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    Notice::ChapterUnavailable { chapter }.to_string(),
                )
            }
        }
    }

    fn into_page(self) -> Response {
        (self.status, Html(render_error_page(&self.message))).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router<S: ContentSource + 'static>(state: SharedState<S>) -> Router {
    Router::new()
        .route("/", get(index_html::<S>))
        .route("/chapter/:number", get(chapter_html::<S>))
        .route("/bookmarks", post(add_bookmark::<S>))
        .route("/bookmarks/clear", post(clear_bookmarks::<S>))
        .route("/bookmarks/export", get(export_bookmarks::<S>))
        .route("/cache/clear", post(clear_cache::<S>))
        .route("/api/chapters", get(api_chapters::<S>))
        .route("/api/chapter/:number", get(api_chapter::<S>))
        .route("/api/bookmarks", get(api_bookmarks::<S>))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "ogechina-web" }))
}

#[derive(Debug, Deserialize)]
struct IndexParams {
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChapterParams {
    q: Option<String>,
    reciter: Option<String>,
    /// Verse position to highlight, used by bookmark links.
    verse: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BookmarkForm {
    tag: String,
    /// Local path to return to after saving.
    back: Option<String>,
}

async fn index_html<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
    Query(params): Query<IndexParams>,
) -> Response {
    let chapters = match state.reader.chapter_index().await {
        Ok(chapters) => chapters,
        Err(err) => {
            warn!(error = %err, "chapter index unavailable");
            return ApiError::new(StatusCode::BAD_GATEWAY, Notice::IndexUnavailable.to_string())
                .into_page();
        }
    };
    let filter = Filter::parse(params.q.as_deref().unwrap_or_default());
    let rows = render_index(&chapters, &filter);
    let bookmarks = render_bookmarks(&state.reader.bookmarks().list());
    let template = IndexTemplate {
        chrome: CHROME,
        query: filter.query().unwrap_or_default(),
        visible: rows.iter().filter(|row| row.visible).count(),
        rows: &rows,
        bookmarks: &bookmarks,
        version: env!("CARGO_PKG_VERSION"),
        canonical_url: format!("{}/", state.base_url),
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(&err.to_string())),
    )
    .into_response()
}

struct ReciterOption<'a> {
    id: &'a str,
    name: &'a str,
    selected: bool,
}

struct VerseBlock<'a> {
    row: &'a VerseRow,
    tag: String,
    audio: Option<&'a str>,
}

async fn chapter_html<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
    Path(number): Path<u32>,
    Query(params): Query<ChapterParams>,
) -> Response {
    let chapter = match state.reader.open_chapter(number).await {
        Ok(chapter) => chapter,
        Err(err) => return ApiError::for_chapter(number, err).into_page(),
    };
    let reciter = state.reciter_or_default(params.reciter.as_deref());
    let audio = match state.reader.audio_list(number, &reciter).await {
        Ok(list) => Some(list),
        Err(err) => {
            debug!(chapter = number, %reciter, error = %err, "audio list unavailable");
            None
        }
    };
    let filter = Filter::parse(params.q.as_deref().unwrap_or_default());
    let current = params.verse.and_then(|position| chapter.index_of(position));
    let view = render_chapter(&chapter, &filter, current);
    let blocks = view
        .rows
        .iter()
        .map(|row| VerseBlock {
            row,
            tag: BookmarkTag::new(number, row.position).to_string(),
            audio: audio.as_ref().and_then(|list| list.url(row.index)),
        })
        .collect();
    let template = ChapterTemplate {
        chrome: CHROME,
        view: &view,
        blocks,
        query: filter.query().unwrap_or_default(),
        reciters: state
            .reciters
            .iter()
            .map(|option| ReciterOption {
                id: &option.id,
                name: &option.name,
                selected: option.id == reciter,
            })
            .collect(),
        audio_missing: audio.is_none(),
        canonical_url: state.chapter_url(number),
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(&err.to_string())),
    )
    .into_response()
}

async fn add_bookmark<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
    Form(form): Form<BookmarkForm>,
) -> Response {
    let tag: BookmarkTag = match form.tag.parse() {
        Ok(tag) => tag,
        Err(err) => {
            return ApiError::new(StatusCode::BAD_REQUEST, err.to_string()).into_page();
        }
    };
    if let Err(err) = state.reader.add_bookmark(tag) {
        warn!(%tag, error = %err, "bookmark not saved");
        return ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Notice::BookmarkNotSaved {
                tag: tag.to_string(),
            }
            .to_string(),
        )
        .into_page();
    }
    let back = form
        .back
        .filter(|path| path.starts_with('/') && !path.starts_with("//"))
        .unwrap_or_else(|| {
            format!(
                "/chapter/{}?verse={}#v{}",
                tag.chapter, tag.position, tag.position
            )
        });
    Redirect::to(&back).into_response()
}

async fn clear_bookmarks<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
) -> Result<Redirect, ApiError> {
    state.reader.bookmarks().clear().map_err(|err| {
        warn!(error = %err, "bookmarks not cleared");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;
    Ok(Redirect::to("/"))
}

async fn export_bookmarks<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
) -> Result<Response, ApiError> {
    let exported = state
        .reader
        .bookmarks()
        .export_json()
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"bookmarks.json\"",
            ),
        ],
        exported,
    )
        .into_response())
}

async fn clear_cache<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
) -> Result<Redirect, ApiError> {
    state.reader.clear_all().map_err(|err| {
        warn!(error = %err, "cache clear incomplete");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;
    Ok(Redirect::to("/"))
}

async fn api_chapters<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
) -> Result<Json<Vec<ChapterSummary>>, ApiError> {
    let chapters = state.reader.chapter_index().await.map_err(|err| {
        warn!(error = %err, "chapter index unavailable");
        ApiError::new(StatusCode::BAD_GATEWAY, Notice::IndexUnavailable.to_string())
    })?;
    Ok(Json(chapters))
}

async fn api_chapter<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
    Path(number): Path<u32>,
) -> Result<Json<Chapter>, ApiError> {
    let chapter = state
        .reader
        .open_chapter(number)
        .await
        .map_err(|err| ApiError::for_chapter(number, err))?;
    Ok(Json(chapter))
}

async fn api_bookmarks<S: ContentSource + 'static>(
    State(state): State<SharedState<S>>,
) -> Json<Vec<BookmarkTag>> {
    Json(state.reader.bookmarks().list())
}

fn render_error_page(message: &str) -> String {
    let template = ErrorTemplate {
        chrome: CHROME,
        message,
    };
    template
        .render()
        .unwrap_or_else(|_| format!("<!DOCTYPE html><p>{}</p>", html_escape_text(message)))
}

fn html_escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Ogechina • Surahs</title>
    <link rel="canonical" href="{{ canonical_url }}">
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div class="{{ chrome.card_class }}">
        <div>
          <p class="{{ chrome.eyebrow_class }}">Ogechina v{{ version }}</p>
          <h1 class="{{ chrome.headline_class }}">The Noble Quran</h1>
          <p class="{{ chrome.lede_class }}">Read each surah with its English translation and listen verse by verse.</p>
        </div>
        <form method="get" action="/" class="flex gap-2">
          <input type="search" name="q" value="{{ query }}" placeholder="Search surahs" class="flex-1 rounded border px-3 py-1" />
          <button type="submit" class="{{ chrome.button_class }}">Search</button>
        </form>
        {% if visible == 0 %}
        <p>No surahs match “{{ query }}”.</p>
        {% endif %}
        <ul class="grid gap-2 md:grid-cols-2">
          {% for row in rows %}{% if row.visible %}
          <li>
            <a href="/chapter/{{ row.number }}" class="block px-3 py-2 bg-white rounded shadow hover:shadow-md transition">
              <p class="font-semibold">{{ row.label }}</p>
              <p class="text-sm text-stone-500"><span dir="rtl">{{ row.name }}</span> • {{ row.meta }}</p>
            </a>
          </li>
          {% endif %}{% endfor %}
        </ul>
        <section id="bookmarks" class="space-y-2">
          <h2 class="text-xl font-semibold">Bookmarks</h2>
          {% match bookmarks.placeholder %}
          {% when Some with (placeholder) %}
          <p class="text-stone-500">{{ placeholder }}</p>
          {% when None %}
          <ul class="flex flex-wrap gap-2">
            {% for entry in bookmarks.entries %}
            <li><a href="/chapter/{{ entry.tag.chapter }}?verse={{ entry.tag.position }}#v{{ entry.tag.position }}" class="px-2 py-1 rounded border bg-white">{{ entry.label }}</a></li>
            {% endfor %}
          </ul>
          {% endmatch %}
          <div class="flex flex-wrap gap-2">
            <a href="/bookmarks/export" class="{{ chrome.button_class }}">Export</a>
            <form method="post" action="/bookmarks/clear"><button type="submit" class="{{ chrome.button_class }}">Clear bookmarks</button></form>
            <form method="post" action="/cache/clear"><button type="submit" class="{{ chrome.button_class }}">Clear cache</button></form>
          </div>
        </section>
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct IndexTemplate<'a> {
    chrome: Chrome,
    query: &'a str,
    visible: usize,
    rows: &'a [ChapterRow],
    bookmarks: &'a BookmarkView,
    version: &'a str,
    canonical_url: String,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Ogechina • {{ view.title }}</title>
    <link rel="canonical" href="{{ canonical_url }}">
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div class="{{ chrome.card_class }}">
        <div>
          <p class="{{ chrome.eyebrow_class }}"><a href="/">← All surahs</a></p>
          <h1 class="{{ chrome.headline_class }}">{{ view.title }}</h1>
          <p class="{{ chrome.lede_class }}">{{ view.total_verses }} ayahs{% if query.len() > 0 %}, {{ view.rows.len() }} matching “{{ query }}”{% endif %}</p>
        </div>
        <form method="get" action="/chapter/{{ view.number }}" class="flex flex-wrap gap-2">
          <input type="search" name="q" value="{{ query }}" placeholder="Search this surah" class="flex-1 rounded border px-3 py-1" />
          <select name="reciter" class="rounded border px-2 py-1">
            {% for option in reciters %}
            <option value="{{ option.id }}"{% if option.selected %} selected{% endif %}>{{ option.name }}</option>
            {% endfor %}
          </select>
          <button type="submit" class="{{ chrome.button_class }}">Apply</button>
        </form>
        {% if audio_missing %}
        <p class="text-amber-700">Audio not available for this reciter/surah.</p>
        {% endif %}
        {% for block in blocks %}
        <article id="v{{ block.row.position }}" class="{{ chrome.row_class }}{% if block.row.highlighted %} bg-emerald-50{% endif %}">
          <p dir="rtl" lang="ar" class="text-2xl leading-loose">{{ block.row.text }}</p>
          <p class="text-stone-600">{{ block.row.translation_line }}</p>
          <div class="flex items-center gap-3">
            {% match block.audio %}
            {% when Some with (url) %}
            <audio controls preload="none" src="{{ url }}"></audio>
            {% when None %}
            <span class="text-sm text-stone-400">No audio</span>
            {% endmatch %}
            <form method="post" action="/bookmarks">
              <input type="hidden" name="tag" value="{{ block.tag }}" />
              <button type="submit" class="{{ chrome.button_class }}">Bookmark {{ block.tag }}</button>
            </form>
          </div>
        </article>
        {% endfor %}
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ChapterTemplate<'a> {
    chrome: Chrome,
    view: &'a ChapterView,
    blocks: Vec<VerseBlock<'a>>,
    query: &'a str,
    reciters: Vec<ReciterOption<'a>>,
    audio_missing: bool,
    canonical_url: String,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Ogechina • Error</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div class="{{ chrome.card_class }}">
        <h1 class="{{ chrome.headline_class }}">Something went wrong</h1>
        <p class="{{ chrome.lede_class }}">{{ message }}</p>
        <a href="/" class="{{ chrome.button_class }}">Back to surahs</a>
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ErrorTemplate<'a> {
    chrome: Chrome,
    message: &'a str,
}
