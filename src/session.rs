//! Interactive reading session.
//!
//! A [`Session`] owns all mutable application state (chapter index, open
//! chapter, active filter, player) and is driven by [`Command`] messages.
//! Everything a surface needs to show comes back as [`Event`] messages.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::ContentSource;
use crate::error::{Notice, Result};
use crate::model::{BookmarkTag, Chapter, ChapterSummary};
use crate::player::{AudioOutput, PlayState, Player, Step, Toggle};
use crate::reader::Reader;
use crate::render::{
    BookmarkView, ChapterRow, ChapterView, render_bookmarks, render_chapter, render_index,
};
use crate::search::Filter;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadIndex,
    OpenChapter(u32),
    Search(String),
    Play(usize),
    TogglePlay,
    Next,
    Previous,
    Seek(f64),
    SelectReciter(String),
    AddBookmark(BookmarkTag),
    ShowBookmarks,
    ClearBookmarks,
    OpenBookmark(BookmarkTag),
    ExportBookmarks,
    ClearCache,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    IndexLoaded(Vec<ChapterRow>),
    IndexFiltered(Vec<ChapterRow>),
    ChapterLoading(u32),
    ChapterRendered(ChapterView),
    Playback {
        state: PlayState,
        chapter: Option<u32>,
        index: usize,
    },
    Seeked(Duration),
    ReciterChanged(String),
    Bookmarks(BookmarkView),
    BookmarksExported(String),
    CacheCleared,
    Notice(Notice),
}

struct Loaded {
    ticket: u64,
    number: u32,
    focus: Option<u32>,
    result: Result<Chapter>,
}

#[derive(Default)]
struct AppState {
    index: Vec<ChapterSummary>,
    chapter: Option<Chapter>,
    filter: Filter,
    /// Ticket of the most recent open request; older results are discarded.
    pending: Option<u64>,
    next_ticket: u64,
}

pub struct Session<S, O> {
    reader: Arc<Reader<S>>,
    player: Player<O>,
    state: AppState,
    events: mpsc::UnboundedSender<Event>,
    loads_tx: mpsc::UnboundedSender<Loaded>,
    loads_rx: Option<mpsc::UnboundedReceiver<Loaded>>,
    poll_interval: Duration,
}

impl<S, O> Session<S, O>
where
    S: ContentSource + 'static,
    O: AudioOutput,
{
    pub fn new(
        reader: Arc<Reader<S>>,
        output: O,
        reciter: impl Into<String>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        Self {
            reader,
            player: Player::new(output, reciter),
            state: AppState::default(),
            events,
            loads_tx,
            loads_rx: Some(loads_rx),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often the output is checked for the end of the playing verse.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Processes commands until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let Some(mut loads) = self.loads_rx.take() else {
            return;
        };
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                Some(loaded) = loads.recv() => self.finish_open(loaded).await,
                _ = ticker.tick() => self.poll_playback().await,
            }
        }
        self.player.stop();
        debug!("session stopped");
    }

    async fn handle(&mut self, command: Command) {
        debug!(?command, "session command");
        match command {
            Command::LoadIndex => self.load_index().await,
            Command::OpenChapter(number) => self.begin_open(number, None),
            Command::OpenBookmark(tag) => self.open_bookmark(tag),
            Command::Search(query) => self.search(&query),
            Command::Play(index) => self.play_index(index).await,
            Command::TogglePlay => self.toggle().await,
            Command::Next => self.next().await,
            Command::Previous => {
                if let Some(index) = self.player.previous_index() {
                    self.play_index(index).await;
                }
            }
            Command::Seek(percent) => {
                if let Some(offset) = self.player.seek(percent) {
                    self.emit(Event::Seeked(offset));
                }
            }
            Command::SelectReciter(reciter) => {
                self.player.set_reciter(reciter.clone());
                self.emit(Event::ReciterChanged(reciter));
                self.emit_playback();
            }
            Command::AddBookmark(tag) => {
                if let Err(err) = self.reader.add_bookmark(tag) {
                    warn!(%tag, error = %err, "bookmark not saved");
                    self.emit(Event::Notice(Notice::BookmarkNotSaved {
                        tag: tag.to_string(),
                    }));
                }
                self.emit_bookmarks();
            }
            Command::ShowBookmarks => self.emit_bookmarks(),
            Command::ClearBookmarks => {
                if let Err(err) = self.reader.bookmarks().clear() {
                    warn!(error = %err, "bookmarks not cleared");
                }
                self.emit_bookmarks();
            }
            Command::ExportBookmarks => match self.reader.bookmarks().export_json() {
                Ok(json) => self.emit(Event::BookmarksExported(json)),
                Err(err) => warn!(error = %err, "bookmark export failed"),
            },
            Command::ClearCache => self.clear_cache().await,
            Command::Shutdown => {}
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn emit_playback(&self) {
        self.emit(Event::Playback {
            state: self.player.state(),
            chapter: self.state.chapter.as_ref().map(|chapter| chapter.number),
            index: self.player.index(),
        });
    }

    fn emit_bookmarks(&self) {
        self.emit(Event::Bookmarks(render_bookmarks(
            &self.reader.bookmarks().list(),
        )));
    }

    fn render_open_chapter(&self) {
        if let Some(chapter) = &self.state.chapter {
            let current = Some(self.player.index());
            self.emit(Event::ChapterRendered(render_chapter(
                chapter,
                &self.state.filter,
                current,
            )));
        }
    }

    async fn load_index(&mut self) {
        match self.reader.chapter_index().await {
            Ok(index) => {
                self.state.index = index;
                self.emit(Event::IndexLoaded(render_index(
                    &self.state.index,
                    &Filter::none(),
                )));
            }
            Err(err) => {
                warn!(error = %err, "chapter index unavailable");
                self.emit(Event::Notice(Notice::IndexUnavailable));
            }
        }
    }

    fn search(&mut self, query: &str) {
        self.state.filter = Filter::parse(query);
        if self.state.chapter.is_some() {
            self.render_open_chapter();
        } else {
            self.emit(Event::IndexFiltered(render_index(
                &self.state.index,
                &self.state.filter,
            )));
        }
    }

    fn open_bookmark(&mut self, tag: BookmarkTag) {
        let already_open = self.state.pending.is_none()
            && self
                .state
                .chapter
                .as_ref()
                .is_some_and(|chapter| chapter.number == tag.chapter);
        if !already_open {
            self.begin_open(tag.chapter, Some(tag.position));
            return;
        }
        if let Some(index) = self
            .state
            .chapter
            .as_ref()
            .and_then(|chapter| chapter.index_of(tag.position))
        {
            self.player.cue(index);
        }
        self.render_open_chapter();
        self.emit_playback();
    }

    fn begin_open(&mut self, number: u32, focus: Option<u32>) {
        self.state.next_ticket += 1;
        let ticket = self.state.next_ticket;
        self.state.pending = Some(ticket);
        self.emit(Event::ChapterLoading(number));

        let reader = Arc::clone(&self.reader);
        let loads = self.loads_tx.clone();
        tokio::spawn(async move {
            let result = reader.open_chapter(number).await;
            let _ = loads.send(Loaded {
                ticket,
                number,
                focus,
                result,
            });
        });
    }

    async fn finish_open(&mut self, loaded: Loaded) {
        if self.state.pending != Some(loaded.ticket) {
            debug!(
                chapter = loaded.number,
                ticket = loaded.ticket,
                "discarding stale chapter load"
            );
            return;
        }
        self.state.pending = None;
        let chapter = match loaded.result {
            Ok(chapter) => chapter,
            Err(err) => {
                warn!(chapter = loaded.number, error = %err, "chapter unavailable");
                self.emit(Event::Notice(Notice::ChapterUnavailable {
                    chapter: loaded.number,
                }));
                return;
            }
        };

        let index = loaded
            .focus
            .and_then(|position| chapter.index_of(position))
            .unwrap_or(0);
        self.player.cue(index);
        self.state.filter = Filter::none();
        let number = chapter.number;
        self.state.chapter = Some(chapter);
        self.render_open_chapter();
        self.emit_playback();

        if self.refresh_audio_list(number).await {
            if let Some(list) = self.player.audio_list_for(number) {
                self.reader.warm_audio(list).await;
            }
        }
    }

    /// Fetches the audio list for `chapter` and the active reciter.
    async fn refresh_audio_list(&mut self, chapter: u32) -> bool {
        let reciter = self.player.reciter().to_string();
        match self.reader.audio_list(chapter, &reciter).await {
            Ok(list) => {
                self.player.install_audio_list(list);
                true
            }
            Err(err) => {
                debug!(chapter, %reciter, error = %err, "audio list unavailable");
                false
            }
        }
    }

    async fn play_index(&mut self, index: usize) {
        let Some((number, position)) = self.state.chapter.as_ref().and_then(|chapter| {
            chapter
                .verses
                .get(index)
                .map(|verse| (chapter.number, verse.position))
        }) else {
            if self.state.chapter.is_none() {
                self.emit(Event::Notice(Notice::NoChapterOpen));
            }
            return;
        };

        if self.player.audio_list_for(number).is_none() {
            self.refresh_audio_list(number).await;
        }
        let url = self
            .player
            .audio_list_for(number)
            .and_then(|list| list.url(index))
            .map(str::to_string);
        let unavailable = Notice::AudioUnavailable {
            chapter: number,
            position,
        };
        let Some(url) = url else {
            self.emit(Event::Notice(unavailable));
            return;
        };
        let clip = match self.reader.audio_clip(&url).await {
            Ok(clip) => clip,
            Err(err) => {
                warn!(%url, error = %err, "audio download failed");
                self.emit(Event::Notice(unavailable));
                return;
            }
        };
        match self.player.start(index, clip) {
            Ok(()) => self.emit_playback(),
            Err(notice) => {
                self.emit(Event::Notice(notice));
                self.emit_playback();
            }
        }
    }

    async fn toggle(&mut self) {
        match self.player.toggle() {
            Toggle::Paused | Toggle::Resumed => self.emit_playback(),
            Toggle::NeedsSource(index) => self.play_index(index).await,
            Toggle::Failed(notice) => {
                self.emit(Event::Notice(notice));
                self.emit_playback();
            }
        }
    }

    async fn next(&mut self) {
        let Some((number, len)) = self
            .state
            .chapter
            .as_ref()
            .map(|chapter| (chapter.number, chapter.len()))
        else {
            self.emit(Event::Notice(Notice::NoChapterOpen));
            return;
        };
        match self.player.next_step(len) {
            Step::Play(index) => self.play_index(index).await,
            Step::EndOfChapter => self.end_of_chapter(number),
        }
    }

    fn end_of_chapter(&mut self, chapter: u32) {
        self.player.stop();
        self.emit(Event::Notice(Notice::EndOfChapter { chapter }));
        self.emit_playback();
    }

    async fn poll_playback(&mut self) {
        if self.player.take_finished() {
            debug!(index = self.player.index(), "verse finished");
            self.next().await;
        }
    }

    async fn clear_cache(&mut self) {
        if let Err(err) = self.reader.clear_all() {
            warn!(error = %err, "cache clear incomplete");
        }
        self.player.stop();
        self.player.cue(0);
        self.state = AppState {
            next_ticket: self.state.next_ticket,
            ..AppState::default()
        };
        self.emit(Event::CacheCleared);
        self.emit_bookmarks();
        self.load_index().await;
    }
}
