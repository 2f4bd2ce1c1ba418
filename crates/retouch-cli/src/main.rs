use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use reqwest::Client as HttpClient;
use retouch_contracts::chat::{parse_intent, SESSION_HELP_COMMANDS};
use retouch_contracts::events::{EventPayload, EventWriter};
use retouch_contracts::image::{extension_for_media_type, Image};
use retouch_contracts::models::{ModelSelector, EDIT_CAPABILITY};
use retouch_contracts::receipts::{build_receipt, write_receipt, EditReceipt, ImageSummary};
use retouch_contracts::EditorConfig;
use retouch_engine::{Controller, Disposition, EditorState, GeminiEditClient, LocalFile};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "Edit images with a text instruction")]
struct Cli {
    /// `.env` file read after the process environment.
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply one instruction to one image and write the result.
    Edit(EditArgs),
    /// Interactive editing session.
    Session(SessionArgs),
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, conflicts_with = "url")]
    image: Option<PathBuf>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    receipt: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long, conflicts_with = "url")]
    image: Option<PathBuf>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long, default_value = "retouch-session")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Edit(args) => run_edit(args, &cli.env_file).await,
        Command::Session(args) => run_session(args, &cli.env_file).await,
    }
}

async fn run_edit(args: EditArgs, env_file: &Path) -> Result<i32> {
    let (config, warnings) = resolve_config(env_file, args.model.as_deref())?;
    let http = build_http(&config)?;
    let session_id = Uuid::new_v4().to_string();
    let client = GeminiEditClient::with_http(&config, http.clone());
    let mut controller = Controller::new(client, http);
    if let Some(path) = &args.events {
        controller = controller.with_events(EventWriter::new(path, &session_id));
    }

    select_initial_source(&mut controller, args.image, args.url, &config.default_image_url);
    controller.settle().await;
    if let Some(error) = &controller.state().error {
        eprintln!("{error}");
        return Ok(1);
    }

    controller.set_prompt(args.prompt);
    let submitted = SubmittedEdit::capture(controller.state(), controller.service());
    if controller.submit() != Disposition::Applied {
        eprintln!(
            "{}",
            controller.state().error.as_deref().unwrap_or("Edit was not started.")
        );
        return Ok(1);
    }
    controller.settle().await;

    let state = controller.state();
    if let Some(error) = &state.error {
        eprintln!("{error}");
        return Ok(1);
    }
    let (Some(edited), Some(submitted)) = (state.edited_image.as_ref(), submitted) else {
        bail!("edit finished without a result");
    };

    let image_path = output_path(&args.out, edited);
    let receipt_path = args
        .receipt
        .clone()
        .unwrap_or_else(|| receipt_path_for(&image_path));
    write_artifacts(edited, &submitted, &image_path, &receipt_path, &warnings)?;
    println!("Saved edited image to {}", image_path.display());
    println!("Receipt: {}", receipt_path.display());
    Ok(0)
}

async fn run_session(args: SessionArgs, env_file: &Path) -> Result<i32> {
    let (config, mut warnings) = resolve_config(env_file, args.model.as_deref())?;
    let http = build_http(&config)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = Uuid::new_v4().to_string();
    let events = EventWriter::new(&events_path, &session_id);
    let mut config = config;
    let client = GeminiEditClient::with_http(&config, http.clone());
    let mut controller = Controller::new(client, http.clone()).with_events(events.clone());

    select_initial_source(&mut controller, args.image, args.url, &config.default_image_url);
    println!(
        "Retouch session started ({}). Type /help for commands.",
        config.model
    );
    info!(
        session_id = events.session_id(),
        events = %events.path().display(),
        "session started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted: Option<SubmittedEdit> = None;
    let mut saved = 0usize;

    loop {
        let busy = !controller.state().is_idle();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let intent = parse_intent(&line);
                match intent.action.as_str() {
                    "noop" => {}
                    "help" => println!("Commands: {}", SESSION_HELP_COMMANDS.join(" ")),
                    "quit" => break,
                    "status" => {
                        for row in status_lines(controller.state(), &config.model) {
                            println!("{row}");
                        }
                    }
                    "select_file" => match intent.arg_str("path") {
                        Some(path) => {
                            controller.select_file(LocalFile::new(path));
                            println!("Loading {path}...");
                        }
                        None => println!("/open requires a path"),
                    },
                    "select_url" => match intent.arg_str("url") {
                        Some(url) => {
                            controller.select_url(url);
                            println!("Fetching {url}...");
                        }
                        None => println!("/fetch requires a URL"),
                    },
                    "set_prompt" => {
                        let text = intent.arg_str("text").unwrap_or_default().to_string();
                        controller.set_prompt(text);
                        println!("Prompt set.");
                    }
                    "submit" | "edit" => {
                        if let Some(prompt) = intent.prompt.clone() {
                            controller.set_prompt(prompt);
                        }
                        let capture = SubmittedEdit::capture(controller.state(), controller.service());
                        match controller.submit() {
                            Disposition::Applied => {
                                submitted = capture;
                                println!("Editing...");
                            }
                            Disposition::Busy => println!("Still working on the previous request."),
                            _ => {
                                if let Some(error) = &controller.state().error {
                                    println!("{error}");
                                }
                            }
                        }
                    }
                    "save_edited" => {
                        let Some(path) = intent.arg_str("path") else {
                            println!("/save requires a path");
                            continue;
                        };
                        match &controller.state().edited_image {
                            Some(edited) => {
                                let target = output_path(Path::new(path), edited);
                                save_image(edited, &target)?;
                                println!("Saved {}", target.display());
                            }
                            None => println!("No edited image yet."),
                        }
                    }
                    "set_model" => {
                        let Some(requested) = intent.arg_str("model") else {
                            let names: Vec<String> = ModelSelector::default()
                                .registry
                                .by_capability(EDIT_CAPABILITY)
                                .into_iter()
                                .map(|model| format!("{} ({})", model.name, model.provider))
                                .collect();
                            println!("Model: {} (available: {})", config.model, names.join(", "));
                            continue;
                        };
                        let (model, fallback) = select_model(requested)?;
                        if let Some(reason) = fallback {
                            println!("{reason} Using {model}.");
                            warnings.push(reason);
                        }
                        config = config.with_model(model);
                        controller.replace_service(GeminiEditClient::with_http(&config, http.clone()));
                        println!("Model set to {}", config.model);
                    }
                    _ => {
                        let command = intent.arg_str("command").unwrap_or_default();
                        println!("Unknown command /{command}. Type /help for commands.");
                    }
                }
            }
            progressed = controller.next_completion(), if busy => {
                if !progressed {
                    continue;
                }
                let state = controller.state();
                for message in completion_messages(state) {
                    println!("{message}");
                }
                if let (Some(edited), false) = (state.edited_image.as_ref(), state.editing) {
                    if let Some(done) = submitted.take() {
                        saved += 1;
                        let image_path = output_path(
                            &args.out.join(format!(
                                "edit-{}-{saved:03}",
                                Utc::now().format("%Y%m%dT%H%M%S")
                            )),
                            edited,
                        );
                        let receipt_path = receipt_path_for(&image_path);
                        write_artifacts(edited, &done, &image_path, &receipt_path, &warnings)?;
                        println!("Saved {}", image_path.display());
                    }
                } else if state.is_idle() && state.error.is_some() {
                    submitted = None;
                }
            }
        }
    }

    let mut payload = EventPayload::new();
    payload.insert("saved".to_string(), Value::from(saved as u64));
    if let Err(err) = events.emit("session_ended", payload) {
        warn!(error = %err, "failed writing event log");
    }
    Ok(0)
}

fn resolve_config(
    env_file: &Path,
    requested_model: Option<&str>,
) -> Result<(EditorConfig, Vec<String>)> {
    let config = EditorConfig::from_env_and_dotenv(env_file);
    let requested = requested_model.unwrap_or(&config.model).to_string();
    let (model, fallback) = select_model(&requested)?;
    let mut warnings = Vec::new();
    if let Some(reason) = fallback {
        warn!(requested = %requested, model = %model, "{reason}");
        warnings.push(reason);
    }
    Ok((config.with_model(model), warnings))
}

/// Edit-capable model for `requested`, plus the reason when it had to fall
/// back to the default.
fn select_model(requested: &str) -> Result<(String, Option<String>)> {
    let selection = ModelSelector::default().select_edit(Some(requested))?;
    Ok((selection.model.name, selection.fallback_reason))
}

fn build_http(config: &EditorConfig) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(config.request_timeout)
        .build()
        .context("failed building HTTP client")
}

fn select_initial_source(
    controller: &mut Controller<GeminiEditClient>,
    image: Option<PathBuf>,
    url: Option<String>,
    default_url: &str,
) {
    match (image, url) {
        (Some(path), _) => controller.select_file(LocalFile::new(path)),
        (None, Some(url)) => controller.select_url(url),
        (None, None) => controller.start(default_url),
    };
}

/// Inputs of a submitted edit, captured before the request goes out so the
/// receipt matches what was sent.
struct SubmittedEdit {
    prompt: String,
    model: String,
    source: Image,
    source_origin: Option<String>,
    service_request: Map<String, Value>,
}

impl SubmittedEdit {
    fn capture(state: &EditorState, client: &GeminiEditClient) -> Option<Self> {
        let source = state.source_image.clone()?;
        Some(Self {
            prompt: state.prompt.clone(),
            model: client.model().to_string(),
            service_request: client.describe_request(&source, &state.prompt),
            source_origin: state.source_origin.map(|origin| origin.as_str().to_string()),
            source,
        })
    }
}

fn write_artifacts(
    edited: &Image,
    submitted: &SubmittedEdit,
    image_path: &Path,
    receipt_path: &Path,
    warnings: &[String],
) -> Result<()> {
    save_image(edited, image_path)?;
    let receipt = EditReceipt {
        prompt: submitted.prompt.clone(),
        model: submitted.model.clone(),
        source: ImageSummary::of(&submitted.source),
        result: ImageSummary::of(edited),
        source_origin: submitted.source_origin.clone(),
        warnings: warnings.to_vec(),
    };
    let payload = build_receipt(&receipt, image_path, receipt_path, &submitted.service_request);
    write_receipt(receipt_path, &payload)
        .with_context(|| format!("failed writing receipt {}", receipt_path.display()))
}

fn save_image(image: &Image, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let bytes = image.decode_bytes()?;
    fs::write(path, bytes).with_context(|| format!("failed writing {}", path.display()))
}

/// Adds the extension for the image's media type when `path` has none.
fn output_path(path: &Path, image: &Image) -> PathBuf {
    if path.extension().is_some() {
        return path.to_path_buf();
    }
    path.with_extension(extension_for_media_type(image.media_type()))
}

fn receipt_path_for(image_path: &Path) -> PathBuf {
    image_path.with_extension("receipt.json")
}

fn describe_image(image: &Image) -> String {
    let dimensions = image
        .decode_bytes()
        .ok()
        .and_then(|bytes| {
            image::ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()
                .ok()?
                .into_dimensions()
                .ok()
        })
        .map(|(width, height)| format!(", {width}x{height}"))
        .unwrap_or_default();
    format!(
        "{}{dimensions}, {} bytes",
        image.media_type(),
        image.byte_len()
    )
}

fn status_lines(state: &EditorState, model: &str) -> Vec<String> {
    let source = if state.source_loading {
        "loading...".to_string()
    } else {
        state
            .source_image
            .as_ref()
            .map(describe_image)
            .unwrap_or_else(|| "none".to_string())
    };
    let edited = if state.editing {
        "editing...".to_string()
    } else {
        state
            .edited_image
            .as_ref()
            .map(describe_image)
            .unwrap_or_else(|| "none".to_string())
    };
    let mut rows = vec![
        format!("model: {model}"),
        format!("source: {source}"),
        format!("edited: {edited}"),
        format!("prompt: {}", state.prompt),
        format!(
            "ready to submit: {}",
            if state.can_submit() { "yes" } else { "no" }
        ),
    ];
    if let Some(error) = &state.error {
        rows.push(format!("error: {error}"));
    }
    rows
}

/// What to tell the user after a request finished.
fn completion_messages(state: &EditorState) -> Vec<String> {
    if let Some(error) = &state.error {
        return vec![error.clone()];
    }
    let mut rows = Vec::new();
    if !state.editing {
        if let Some(edited) = &state.edited_image {
            rows.push(format!("Edited image ready: {}", describe_image(edited)));
            return rows;
        }
    }
    if !state.source_loading {
        if let Some(source) = &state.source_image {
            rows.push(format!("Source image ready: {}", describe_image(source)));
        }
    }
    rows
}
