use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use reqwest::Client as HttpClient;
use retouch_contracts::events::{EventPayload, EventWriter};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::EditService;
use crate::codec::{decode_local_file, decode_remote_resource, LocalFile};
use crate::state::{reduce, Disposition, Effect, EditorState, Event, RequestId};

/// Owns the editor state and runs the reducer's effects.
///
/// Each effect runs as its own tokio task guarded by a cancellation token;
/// finished tasks report back over a channel and are folded into the state
/// by [`Controller::next_completion`]. The controller itself is driven from
/// one place (`&mut self`), so state only ever changes through `reduce`.
pub struct Controller<S: EditService> {
    state: EditorState,
    service: Arc<S>,
    http: HttpClient,
    events: Option<EventWriter>,
    in_flight: HashMap<RequestId, CancellationToken>,
    completions_tx: mpsc::UnboundedSender<Event>,
    completions_rx: mpsc::UnboundedReceiver<Event>,
}

impl<S: EditService> Controller<S> {
    pub fn new(service: S, http: HttpClient) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            state: EditorState::default(),
            service: Arc::new(service),
            http,
            events: None,
            in_flight: HashMap::new(),
            completions_tx,
            completions_rx,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Swaps the edit service for later requests. A running edit keeps the
    /// service it started with.
    pub fn replace_service(&mut self, service: S) {
        self.service = Arc::new(service);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn start(&mut self, default_url: impl Into<String>) -> Disposition {
        self.dispatch(Event::Startup {
            url: default_url.into(),
        })
    }

    pub fn select_file(&mut self, file: LocalFile) -> Disposition {
        self.dispatch(Event::FileSelected { file })
    }

    pub fn select_url(&mut self, url: impl Into<String>) -> Disposition {
        self.dispatch(Event::UrlSelected { url: url.into() })
    }

    pub fn set_prompt(&mut self, text: impl Into<String>) -> Disposition {
        self.dispatch(Event::PromptChanged { text: text.into() })
    }

    pub fn submit(&mut self) -> Disposition {
        self.dispatch(Event::Submit)
    }

    pub fn dispatch(&mut self, event: Event) -> Disposition {
        let kind = event.kind();
        let request = event.request();
        let failure = failure_detail(&event);
        if let Some(request) = request {
            self.in_flight.remove(&request);
        }

        let transition = reduce(std::mem::take(&mut self.state), event);
        self.state = transition.state;
        for effect in transition.effects {
            self.run(effect);
        }

        match transition.disposition {
            Disposition::Applied => {
                if let Some((error_kind, detail)) = &failure {
                    warn!(event = kind, error_kind, detail = %detail, "request failed");
                } else {
                    debug!(event = kind, "event applied");
                }
            }
            Disposition::Invalid => info!("submit refused: missing image or prompt"),
            Disposition::Busy => info!("submit refused: a request is already running"),
            Disposition::Stale => {
                debug!(event = kind, request = ?request, "discarded stale completion")
            }
        }
        self.record(kind, request, transition.disposition, failure);
        transition.disposition
    }

    /// Waits for the next finished request and applies it. Returns `false`
    /// when nothing is pending.
    pub async fn next_completion(&mut self) -> bool {
        if self.state.is_idle() {
            return false;
        }
        match self.completions_rx.recv().await {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Applies completions until no request is pending.
    pub async fn settle(&mut self) {
        while self.next_completion().await {}
    }

    fn run(&mut self, effect: Effect) {
        match effect {
            Effect::Cancel { request } => {
                if let Some(token) = self.in_flight.remove(&request) {
                    token.cancel();
                    debug!(%request, "cancelled superseded request");
                }
            }
            Effect::FetchRemote { request, url } => {
                info!(%request, url = %url, "fetching source image");
                let http = self.http.clone();
                self.spawn(request, async move {
                    let result = decode_remote_resource(&http, &url).await;
                    Event::SourceLoaded { request, result }
                });
            }
            Effect::DecodeFile { request, file } => {
                info!(%request, path = %file.path.display(), "reading source image");
                self.spawn(request, async move {
                    let result = decode_local_file(&file).await;
                    Event::SourceLoaded { request, result }
                });
            }
            Effect::RequestEdit {
                request,
                image,
                instruction,
            } => {
                info!(%request, media_type = image.media_type(), "requesting edit");
                let service = Arc::clone(&self.service);
                self.spawn(request, async move {
                    let result = service.request_edit(&image, &instruction).await;
                    Event::EditCompleted { request, result }
                });
            }
        }
    }

    fn spawn<F>(&mut self, request: RequestId, task: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let token = CancellationToken::new();
        self.in_flight.insert(request, token.clone());
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                event = task => {
                    let _ = completions.send(event);
                }
            }
        });
    }

    fn record(
        &self,
        kind: &str,
        request: Option<RequestId>,
        disposition: Disposition,
        failure: Option<(&'static str, String)>,
    ) {
        let Some(events) = &self.events else {
            return;
        };
        let event_type = match disposition {
            Disposition::Applied if kind == "submit" => "edit_requested",
            Disposition::Applied => kind,
            Disposition::Invalid => "submit_invalid",
            Disposition::Busy => "submit_rejected",
            Disposition::Stale => "stale_discarded",
        };
        let state = &self.state;
        let mut payload = EventPayload::new();
        payload.insert(
            "request".to_string(),
            request.map(|id| json!(id.get())).unwrap_or(Value::Null),
        );
        payload.insert("source_loading".to_string(), json!(state.source_loading));
        payload.insert("editing".to_string(), json!(state.editing));
        payload.insert("error".to_string(), json!(state.error));
        payload.insert(
            "source".to_string(),
            state
                .source_image
                .as_ref()
                .map(|image| json!({ "media_type": image.media_type(), "bytes": image.byte_len() }))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "edited".to_string(),
            state
                .edited_image
                .as_ref()
                .map(|image| json!({ "media_type": image.media_type(), "bytes": image.byte_len() }))
                .unwrap_or(Value::Null),
        );
        if let Some((error_kind, detail)) = failure {
            payload.insert(
                "failure".to_string(),
                json!({ "kind": error_kind, "detail": detail }),
            );
        }
        if let Err(err) = events.emit(event_type, payload) {
            warn!(error = %err, "failed writing event log");
        }
    }
}

fn failure_detail(event: &Event) -> Option<(&'static str, String)> {
    let err = match event {
        Event::SourceLoaded { result: Err(err), .. } => err,
        Event::EditCompleted { result: Err(err), .. } => err,
        _ => return None,
    };
    let mut detail = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        detail.push_str(" | caused by: ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    Some((err.kind(), detail))
}
