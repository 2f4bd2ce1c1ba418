//! Editor state and the pure reducer that drives it.
//!
//! `reduce` never performs I/O. It returns the next state plus the effects
//! the controller has to run; completed effects come back in as events
//! tagged with the request id they were issued under, and anything that is
//! no longer the pending request is dropped as stale.

use std::fmt;

use retouch_contracts::image::Image;

use crate::codec::LocalFile;
use crate::error::EditorError;

pub const DEFAULT_IMAGE_FAILED_MESSAGE: &str =
    "Failed to load default image. Please upload your own.";
pub const FILE_READ_FAILED_MESSAGE: &str = "Failed to read image file.";
pub const URL_FETCH_FAILED_MESSAGE: &str = "Failed to fetch image from URL.";
pub const MISSING_INPUT_MESSAGE: &str = "Please provide an image and a prompt.";
pub const NO_IMAGE_RETURNED_MESSAGE: &str =
    "The model did not return an image. Try a different prompt.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the pending or current source image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    Default,
    Upload,
    Url,
}

impl SourceOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Upload => "upload",
            Self::Url => "url",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            Self::Default => DEFAULT_IMAGE_FAILED_MESSAGE,
            Self::Upload => FILE_READ_FAILED_MESSAGE,
            Self::Url => URL_FETCH_FAILED_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorState {
    pub source_loading: bool,
    pub editing: bool,
    pub error: Option<String>,
    pub source_image: Option<Image>,
    pub source_origin: Option<SourceOrigin>,
    pub edited_image: Option<Image>,
    pub prompt: String,
    pending_source: Option<(RequestId, SourceOrigin)>,
    pending_edit: Option<RequestId>,
    last_request: u64,
}

impl EditorState {
    pub fn pending_source(&self) -> Option<RequestId> {
        self.pending_source.map(|(id, _)| id)
    }

    pub fn pending_edit(&self) -> Option<RequestId> {
        self.pending_edit
    }

    pub fn is_idle(&self) -> bool {
        self.pending_source.is_none() && self.pending_edit.is_none()
    }

    /// Whether a submit right now would start an edit.
    pub fn can_submit(&self) -> bool {
        !self.editing
            && !self.source_loading
            && self.source_image.is_some()
            && !self.prompt.trim().is_empty()
    }

    fn next_request(&mut self) -> RequestId {
        self.last_request += 1;
        RequestId(self.last_request)
    }
}

#[derive(Debug)]
pub enum Event {
    Startup {
        url: String,
    },
    FileSelected {
        file: LocalFile,
    },
    UrlSelected {
        url: String,
    },
    PromptChanged {
        text: String,
    },
    Submit,
    SourceLoaded {
        request: RequestId,
        result: Result<Image, EditorError>,
    },
    EditCompleted {
        request: RequestId,
        result: Result<Option<Image>, EditorError>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::FileSelected { .. } => "file_selected",
            Self::UrlSelected { .. } => "url_selected",
            Self::PromptChanged { .. } => "prompt_changed",
            Self::Submit => "submit",
            Self::SourceLoaded { .. } => "source_loaded",
            Self::EditCompleted { .. } => "edit_completed",
        }
    }

    pub fn request(&self) -> Option<RequestId> {
        match self {
            Self::SourceLoaded { request, .. } | Self::EditCompleted { request, .. } => {
                Some(*request)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchRemote {
        request: RequestId,
        url: String,
    },
    DecodeFile {
        request: RequestId,
        file: LocalFile,
    },
    RequestEdit {
        request: RequestId,
        image: Image,
        instruction: String,
    },
    Cancel {
        request: RequestId,
    },
}

/// How the reducer treated an event, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// Submit refused because validation failed.
    Invalid,
    /// Submit refused because a request is already in flight.
    Busy,
    /// Completion for a request that is no longer pending.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: EditorState,
    pub effects: Vec<Effect>,
    pub disposition: Disposition,
}

impl Transition {
    fn applied(state: EditorState, effects: Vec<Effect>) -> Self {
        Self {
            state,
            effects,
            disposition: Disposition::Applied,
        }
    }

    fn unchanged(state: EditorState, disposition: Disposition) -> Self {
        Self {
            state,
            effects: Vec::new(),
            disposition,
        }
    }
}

pub fn reduce(state: EditorState, event: Event) -> Transition {
    match event {
        Event::Startup { url } => begin_source_load(state, SourceOrigin::Default, |request| {
            Effect::FetchRemote { request, url }
        }),
        Event::FileSelected { file } => begin_source_load(state, SourceOrigin::Upload, |request| {
            Effect::DecodeFile { request, file }
        }),
        Event::UrlSelected { url } => begin_source_load(state, SourceOrigin::Url, |request| {
            Effect::FetchRemote { request, url }
        }),
        Event::PromptChanged { text } => {
            let mut next = state;
            next.prompt = text;
            Transition::applied(next, Vec::new())
        }
        Event::Submit => submit(state),
        Event::SourceLoaded { request, result } => {
            let Some((pending, origin)) = state.pending_source else {
                return Transition::unchanged(state, Disposition::Stale);
            };
            if pending != request {
                return Transition::unchanged(state, Disposition::Stale);
            }
            let mut next = state;
            next.pending_source = None;
            next.source_loading = false;
            match result {
                Ok(image) => {
                    next.source_image = Some(image);
                    next.source_origin = Some(origin);
                    next.error = None;
                }
                Err(_) => {
                    next.error = Some(origin.failure_message().to_string());
                }
            }
            Transition::applied(next, Vec::new())
        }
        Event::EditCompleted { request, result } => {
            if state.pending_edit != Some(request) {
                return Transition::unchanged(state, Disposition::Stale);
            }
            let mut next = state;
            next.pending_edit = None;
            next.editing = false;
            match result {
                Ok(Some(image)) => next.edited_image = Some(image),
                Ok(None) => next.error = Some(NO_IMAGE_RETURNED_MESSAGE.to_string()),
                Err(err) => next.error = Some(err.to_string()),
            }
            Transition::applied(next, Vec::new())
        }
    }
}

/// A new source replaces whatever source load or edit is still running.
fn begin_source_load(
    state: EditorState,
    origin: SourceOrigin,
    effect: impl FnOnce(RequestId) -> Effect,
) -> Transition {
    let mut next = state;
    let mut effects = Vec::new();
    if let Some((superseded, _)) = next.pending_source.take() {
        effects.push(Effect::Cancel {
            request: superseded,
        });
    }
    if let Some(superseded) = next.pending_edit.take() {
        effects.push(Effect::Cancel {
            request: superseded,
        });
        next.editing = false;
    }

    // The default image never clears an earlier result; user picks do.
    if origin != SourceOrigin::Default {
        next.edited_image = None;
    }
    next.error = None;
    next.source_loading = true;
    let request = next.next_request();
    next.pending_source = Some((request, origin));
    effects.push(effect(request));
    Transition::applied(next, effects)
}

fn submit(state: EditorState) -> Transition {
    if state.editing || state.source_loading {
        return Transition::unchanged(state, Disposition::Busy);
    }
    let Some(image) = state.source_image.clone() else {
        return invalid_submit(state);
    };
    if state.prompt.trim().is_empty() {
        return invalid_submit(state);
    }

    let mut next = state;
    next.error = None;
    next.edited_image = None;
    next.editing = true;
    let request = next.next_request();
    next.pending_edit = Some(request);
    let instruction = next.prompt.clone();
    Transition::applied(
        next,
        vec![Effect::RequestEdit {
            request,
            image,
            instruction,
        }],
    )
}

fn invalid_submit(state: EditorState) -> Transition {
    let mut next = state;
    next.error = Some(MISSING_INPUT_MESSAGE.to_string());
    Transition {
        state: next,
        effects: Vec::new(),
        disposition: Disposition::Invalid,
    }
}
