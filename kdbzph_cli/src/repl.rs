use kdbzph_session::render::PENDING;
use kdbzph_session::{ws_actor, Session, SessionConfig, SessionHandle, Status, UiEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
lines are evaluated in the live session; end a line with \\ to continue it
:prior / :next   recall history into the draft
:run             submit the draft
:history         list history
:status          connection status
:quit            exit";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Submit(String),
    Prior,
    Next,
    Run,
    History,
    Status,
    Help,
    Quit,
}

/// Only exact local commands are intercepted; everything else goes to the engine.
fn parse_input(text: &str) -> Input {
    match text.trim() {
        ":prior" | ":p" => Input::Prior,
        ":next" | ":n" => Input::Next,
        ":run" | ":r" => Input::Run,
        ":history" => Input::History,
        ":status" => Input::Status,
        ":help" => Input::Help,
        ":quit" | ":q" => Input::Quit,
        _ => Input::Submit(text.to_string()),
    }
}

/// Joins `\`-terminated lines into one multi-line expression.
#[derive(Default)]
struct Continuation {
    lines: Vec<String>,
}

impl Continuation {
    fn push(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches('\r');
        match line.strip_suffix('\\') {
            Some(head) => {
                self.lines.push(head.to_string());
                None
            }
            None => {
                self.lines.push(line.to_string());
                Some(std::mem::take(&mut self.lines).join("\n"))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Out(String),
    Note(String),
}

#[derive(Default)]
struct View {
    status: Option<Status>,
    ready: bool,
    awaiting: bool,
    draft: String,
}

impl View {
    fn apply(&mut self, event: UiEvent) -> Option<Line> {
        match event {
            UiEvent::Status(s) => {
                if matches!(s, Status::Disconnected { .. }) {
                    self.awaiting = false;
                }
                let line = Line::Note(format!("[{s}]"));
                self.status = Some(s);
                Some(line)
            }
            UiEvent::SubmitEnabled(on) => {
                // Re-enabling is how the session reports the request resolved.
                self.ready = on;
                if on {
                    self.awaiting = false;
                }
                None
            }
            UiEvent::Pending => Some(Line::Note(PENDING.to_string())),
            UiEvent::Result(text) => Some(Line::Out(text)),
            UiEvent::OrphanResult(text) => Some(Line::Out(format!("[orphan] {text}"))),
            UiEvent::Draft(text) => {
                let line = if text.is_empty() {
                    "draft: (empty)".to_string()
                } else {
                    format!("draft: {text}")
                };
                self.draft = text;
                Some(Line::Note(line))
            }
            UiEvent::History(entries) if entries.is_empty() => {
                Some(Line::Out("(no history)".to_string()))
            }
            UiEvent::History(entries) => Some(Line::Out(
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{:>3}  {e}", i + 1))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
        }
    }

    fn status_text(&self) -> String {
        self.status
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "not started".to_string())
    }
}

pub async fn run(config: SessionConfig) -> anyhow::Result<()> {
    tracing::info!(server = %config.server, history = ?config.history_file, "starting repl");
    let session = Session::from_config(&config);
    let (handle, mut events, join) = ws_actor::spawn(session, config.ws_url());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut continuation = Continuation::default();
    let mut view = View::default();
    let mut stdin_open = true;

    loop {
        // Piped input: once stdin is done, wait only for the last answer.
        if !stdin_open && !view.awaiting {
            break;
        }

        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                let Some(text) = continuation.push(&line) else {
                    continue;
                };
                match parse_input(&text) {
                    Input::Quit => break,
                    Input::Prior => handle.history_prior().await?,
                    Input::Next => handle.history_next().await?,
                    Input::History => handle.list_history().await?,
                    Input::Status => println!("{}", view.status_text()),
                    Input::Help => println!("{HELP}"),
                    Input::Run => {
                        let draft = view.draft.clone();
                        submit(&handle, &mut view, draft).await?;
                    }
                    Input::Submit(text) => submit(&handle, &mut view, text).await?,
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match view.apply(event) {
                    Some(Line::Out(text)) => println!("{text}"),
                    Some(Line::Note(text)) => eprintln!("{text}"),
                    None => {}
                }
            }
        }
    }

    // The actor may already be gone.
    let _ = handle.shutdown().await;
    let _ = join.await;
    Ok(())
}

async fn submit(handle: &SessionHandle, view: &mut View, text: String) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        handle.submit(text).await?;
        return Ok(());
    }
    if view.ready {
        view.ready = false;
        view.awaiting = true;
        handle.submit(text).await?;
    } else if view.awaiting {
        eprintln!("busy: waiting for the previous result");
    } else {
        eprintln!("not connected ({})", view.status_text());
    }
    Ok(())
}
