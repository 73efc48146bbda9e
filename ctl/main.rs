#![forbid(unsafe_code)]

//! `agent-bridge-ctl`: terminal front-end for `agent-bridge`.
//!
//! Connects to the rendezvous socket and speaks the bridge's NDJSON protocol.
//! `start` and `resume` stream the session's events to stdout until it goes
//! idle or closes; the remaining subcommands send a single record.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericFilePath, Stream, ToFsName};
use serde_json::{json, Map, Value};

use agent_bridge::protocol::{
    Inbound, InboundBody, Outbound, OutboundBody, PermissionBehavior, PermissionRequest,
    QuestionRequest, SessionStatus,
};
use agent_bridge::BridgeConfig;

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "agent-bridge-ctl",
    about = "Terminal front-end for agent-bridge",
    version,
    long_about = None
)]
struct Cli {
    /// Rendezvous socket path.
    ///
    /// When omitted, resolved the same way as the bridge: `AGENT_BRIDGE_SOCKET`,
    /// then `$XDG_RUNTIME_DIR/agent-bridge.sock`.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Print received records as raw JSON lines.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session and stream its events.
    Start {
        /// First prompt.
        prompt: String,
        /// Session identifier; a random one is generated when omitted.
        #[arg(long)]
        session: Option<String>,
        /// Engine working directory.
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
        /// Model override.
        #[arg(long)]
        model: Option<String>,
        /// System prompt override.
        #[arg(long)]
        system_prompt: Option<String>,
        /// Engine permission mode.
        #[arg(long)]
        permission_mode: Option<String>,
        /// Tools the engine may use without asking (repeatable).
        #[arg(long = "allow-tool")]
        allowed_tools: Vec<String>,
        /// Answer requests and send follow-up prompts from the terminal.
        #[arg(long)]
        interactive: bool,
    },

    /// Attach a new session to an existing engine conversation.
    Resume {
        /// Engine conversation identifier.
        conversation: String,
        /// Prompt for the resumed turn.
        prompt: String,
        /// Session identifier; a random one is generated when omitted.
        #[arg(long)]
        session: Option<String>,
        /// Engine working directory.
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
        /// Answer requests and send follow-up prompts from the terminal.
        #[arg(long)]
        interactive: bool,
    },

    /// Send a follow-up prompt. Output goes to the session's own connection.
    Prompt {
        /// Session identifier.
        session: String,
        /// Follow-up prompt.
        prompt: String,
    },

    /// Interrupt the running invocation.
    Interrupt {
        /// Session identifier.
        session: String,
    },

    /// Close a session, denying anything still pending.
    Close {
        /// Session identifier.
        session: String,
    },

    /// Allow a pending permission request.
    Allow {
        /// Session identifier.
        session: String,
        /// Request identifier from the `permission_request` event.
        request_id: String,
        /// Replacement tool input as JSON.
        #[arg(long)]
        input: Option<String>,
    },

    /// Deny a pending permission request.
    Deny {
        /// Session identifier.
        session: String,
        /// Request identifier from the `permission_request` event.
        request_id: String,
        /// Reason reported to the engine.
        #[arg(long)]
        message: Option<String>,
    },

    /// Answer a pending question.
    Answer {
        /// Session identifier.
        session: String,
        /// Request identifier from the `question` event.
        request_id: String,
        /// Answers as a JSON object.
        answers: String,
    },
}

fn main() {
    let args = Cli::parse();
    let socket = args
        .socket
        .clone()
        .unwrap_or_else(|| BridgeConfig::default().socket_path());

    if let Err(err) = run(&args, &socket) {
        eprintln!("Error: {err}");
        eprintln!("Is agent-bridge listening on '{}'?", socket.display());
        std::process::exit(1);
    }
}

fn run(args: &Cli, socket: &Path) -> CtlResult<()> {
    let stream = connect(socket)?;

    match &args.command {
        Command::Start {
            prompt,
            session,
            cwd,
            model,
            system_prompt,
            permission_mode,
            allowed_tools,
            interactive,
        } => {
            let session_id = session.clone().unwrap_or_else(new_session_id);
            let body = InboundBody::StartSession {
                cwd: cwd.display().to_string(),
                prompt: prompt.clone(),
                system_prompt: system_prompt.clone(),
                model: model.clone(),
                permission_mode: permission_mode.clone(),
                allowed_tools: (!allowed_tools.is_empty()).then(|| allowed_tools.clone()),
                setting_sources: None,
            };
            send(&stream, &Inbound::new(session_id.clone(), body))?;
            eprintln!("session: {session_id}");
            stream_session(&stream, &session_id, *interactive, args.json)
        }
        Command::Resume {
            conversation,
            prompt,
            session,
            cwd,
            interactive,
        } => {
            let session_id = session.clone().unwrap_or_else(new_session_id);
            let body = InboundBody::ResumeSession {
                external_conversation_id: conversation.clone(),
                prompt: prompt.clone(),
                cwd: cwd.display().to_string(),
            };
            send(&stream, &Inbound::new(session_id.clone(), body))?;
            eprintln!("session: {session_id}");
            stream_session(&stream, &session_id, *interactive, args.json)
        }
        Command::Prompt { session, prompt } => send(
            &stream,
            &Inbound::new(
                session.clone(),
                InboundBody::SendPrompt {
                    prompt: prompt.clone(),
                },
            ),
        ),
        Command::Interrupt { session } => {
            send(&stream, &Inbound::new(session.clone(), InboundBody::Interrupt))
        }
        Command::Close { session } => {
            send(&stream, &Inbound::new(session.clone(), InboundBody::CloseSession))?;
            await_close_ack(&stream, session, args.json)
        }
        Command::Allow {
            session,
            request_id,
            input,
        } => {
            let updated_input = input
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?;
            let body = InboundBody::PermissionResponse {
                request_id: request_id.clone(),
                behavior: PermissionBehavior::Allow,
                updated_input,
                message: None,
            };
            send(&stream, &Inbound::new(session.clone(), body))
        }
        Command::Deny {
            session,
            request_id,
            message,
        } => {
            let body = InboundBody::PermissionResponse {
                request_id: request_id.clone(),
                behavior: PermissionBehavior::Deny,
                updated_input: None,
                message: message.clone(),
            };
            send(&stream, &Inbound::new(session.clone(), body))
        }
        Command::Answer {
            session,
            request_id,
            answers,
        } => {
            let body = InboundBody::QuestionResponse {
                request_id: request_id.clone(),
                answers: serde_json::from_str(answers)?,
            };
            send(&stream, &Inbound::new(session.clone(), body))
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

fn connect(socket: &Path) -> CtlResult<Stream> {
    let name = socket.to_fs_name::<GenericFilePath>()?;
    Ok(Stream::connect(name)?)
}

/// Send one record as a single JSON line.
fn send(stream: &Stream, msg: &Inbound) -> CtlResult<()> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    let mut writer = stream;
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read the next outbound record; `None` on EOF. Unparseable lines are skipped.
fn next_event(reader: &mut impl BufRead, raw: bool) -> CtlResult<Option<Outbound>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if raw {
            println!("{trimmed}");
        }
        match serde_json::from_str::<Outbound>(trimmed) {
            Ok(event) => return Ok(Some(event)),
            Err(err) => eprintln!("skipping unreadable record: {err}"),
        }
    }
}

fn await_close_ack(stream: &Stream, session_id: &str, raw: bool) -> CtlResult<()> {
    let mut reader = BufReader::new(stream);

    while let Some(event) = next_event(&mut reader, raw)? {
        if event.session_id != session_id {
            continue;
        }
        match event.body {
            OutboundBody::SessionStatus {
                status: SessionStatus::Closed,
            } => {
                if !raw {
                    println!("closed");
                }
                return Ok(());
            }
            OutboundBody::Error { error, .. } => return Err(error.into()),
            _ => {}
        }
    }
    Ok(())
}

// ── Conversation streaming ───────────────────────────────────────────────────

fn stream_session(stream: &Stream, session_id: &str, interactive: bool, raw: bool) -> CtlResult<()> {
    let mut reader = BufReader::new(stream);
    let stdin = io::stdin();

    while let Some(event) = next_event(&mut reader, raw)? {
        if event.session_id != session_id && !event.session_id.is_empty() {
            continue;
        }
        if !raw {
            render(&event.body);
        }

        match event.body {
            OutboundBody::PermissionRequest(request) if interactive => {
                let body = ask_permission(&mut stdin.lock(), &request)?;
                send(stream, &Inbound::new(session_id, body))?;
            }
            OutboundBody::Question(request) if interactive => {
                let body = ask_questions(&mut stdin.lock(), &request)?;
                send(stream, &Inbound::new(session_id, body))?;
            }
            OutboundBody::SessionStatus {
                status: SessionStatus::Idle,
            } => {
                if !interactive {
                    return Ok(());
                }
                let next = read_reply(&mut stdin.lock(), "next prompt (empty to quit)")?;
                if next.is_empty() {
                    return Ok(());
                }
                send(
                    stream,
                    &Inbound::new(session_id, InboundBody::SendPrompt { prompt: next }),
                )?;
            }
            OutboundBody::SessionStatus {
                status: SessionStatus::Closed,
            } => return Ok(()),
            OutboundBody::Error { error, code } => {
                // Engine failures are followed by `idle`; anything else ends the turn.
                if code.as_deref() != Some("engine_error") {
                    return Err(error.into());
                }
            }
            _ => {}
        }
    }

    Err("bridge closed the connection".into())
}

fn render(body: &OutboundBody) {
    match body {
        OutboundBody::System(init) => {
            println!("[system] conversation {}", init.external_conversation_id);
        }
        OutboundBody::AssistantText(text) => println!("{}", text.text),
        OutboundBody::ToolUse(tool) => println!("[tool] {} {}", tool.tool_name, tool.tool_input),
        OutboundBody::ToolResult(result) => {
            let marker = if result.is_error == Some(true) { "error" } else { "ok" };
            println!("[tool {marker}] {}", result.output);
        }
        OutboundBody::PermissionRequest(request) => println!(
            "[permission {}] {} {}",
            request.request_id, request.tool_name, request.tool_input
        ),
        OutboundBody::Question(request) => {
            for item in &request.questions {
                println!("[question {}] {}", request.request_id, item.question);
                for (index, option) in item.options.iter().enumerate() {
                    println!("  {}. {} - {}", index + 1, option.label, option.description);
                }
            }
        }
        OutboundBody::StreamDelta(_) => {}
        OutboundBody::Result(summary) => println!(
            "[result] {} turns={} cost=${:.4} {}ms",
            summary.subtype,
            summary.num_turns,
            summary.total_cost.as_f64().unwrap_or_default(),
            summary.duration_ms
        ),
        OutboundBody::Error { error, code } => match code {
            Some(code) => eprintln!("[error {code}] {error}"),
            None => eprintln!("[error] {error}"),
        },
        OutboundBody::SessionStatus { status } => {
            let label = serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            eprintln!("[status] {label}");
        }
    }
}

// ── Terminal prompts ─────────────────────────────────────────────────────────

fn read_reply(input: &mut impl BufRead, prompt: &str) -> CtlResult<String> {
    eprint!("{prompt}> ");
    io::stderr().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_owned())
}

fn ask_permission(input: &mut impl BufRead, request: &PermissionRequest) -> CtlResult<InboundBody> {
    let reply = read_reply(input, &format!("allow {}? [y/N/reason]", request.tool_name))?;
    let allowed = matches!(reply.to_ascii_lowercase().as_str(), "y" | "yes");

    Ok(InboundBody::PermissionResponse {
        request_id: request.request_id.clone(),
        behavior: if allowed {
            PermissionBehavior::Allow
        } else {
            PermissionBehavior::Deny
        },
        updated_input: None,
        message: match reply.to_ascii_lowercase().as_str() {
            "" | "y" | "yes" | "n" | "no" => None,
            _ => Some(reply),
        },
    })
}

/// Collect one answer per question; a number picks an option, anything else
/// is taken verbatim.
fn ask_questions(input: &mut impl BufRead, request: &QuestionRequest) -> CtlResult<InboundBody> {
    let mut answers = Map::new();
    for item in &request.questions {
        let reply = read_reply(input, &item.question)?;
        let picked = reply
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| item.options.get(index))
            .map_or_else(|| reply.clone(), |option| option.label.clone());
        answers.insert(item.question.clone(), Value::String(picked));
    }

    Ok(InboundBody::QuestionResponse {
        request_id: request.request_id.clone(),
        answers: json!(answers),
    })
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
