//! # Quire CLI
//!
//! A terminal front end for Quire document sessions.
//!
//! `edit` restores the session stored under `--data-dir`, applies an
//! optional launch argument (a file path, a `quire://` link or a share URL)
//! and drops into a small command loop over the active document. `status`
//! prints what is stored. `demo` runs two peers in one process to show a
//! shared room converging and a version being restored.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use quire_session::{
    Controller, DirStore, DocumentRef, FsFiles, MemoryFiles, MemoryHub, MemoryStore,
    RestoreReport, SessionArgs, SessionConfig, SessionConfigBuilder, SessionContext,
    SessionError,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Local-first collaborative text editing from the terminal")]
#[command(version)]
struct Cli {
    /// Directory holding the persisted session
    #[arg(long, default_value = ".quire")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the session, optionally with a file, a quire:// link or a share URL
    Edit { source: Option<String> },
    /// Print the persisted session
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Two peers share a room, edit concurrently and restore a version
    Demo,
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn fail(text: &str) {
    println!("  {} {}", "!".bright_red(), text);
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > 40 {
        format!("{}…", line.chars().take(40).collect::<String>())
    } else {
        line.to_string()
    }
}

fn show_active(controller: &Controller) {
    let doc = controller.lifecycle.active();
    let status = controller.collab.status();
    let border = "─".repeat(56);

    println!("  ┌{}┐", border);
    println!("  │ {:<54} │", format!("Document {}", doc.id()).bright_yellow().to_string());
    if let Some(path) = doc.path() {
        println!("  │ {:<54} │", format!("file: {}", path.display()));
    }
    let mode = if doc.markdown() { "markdown" } else { "plain" };
    let sharing = match (&status.room, status.started, status.connected) {
        (Some(_), true, true) => format!("shared, {} in room", status.peer_count),
        (Some(_), true, false) => "shared, offline".to_string(),
        _ => "local".to_string(),
    };
    println!("  │ {:<54} │", format!("{mode} · {sharing}").dimmed().to_string());
    println!("  ├{}┤", border);
    let text = doc.text();
    if text.is_empty() {
        println!("  │ {:^54} │", "(empty)".dimmed().to_string());
    } else {
        for line in text.lines() {
            println!("  │ {:<54} │", line);
        }
    }
    println!("  └{}┘", border);
}

fn show_report(report: &RestoreReport) {
    step(&format!(
        "restored {} document(s), rejected {}",
        report.restored, report.rejected
    ));
    if let Some(err) = &report.error {
        fail(&format!("stored session unusable: {err}"));
        fail("changes are not saved until you run 'dismiss' or 'clean'");
    }
}

// ─── Session wiring ───────────────────────────────────────────────────────

fn disk_session(data_dir: &Path) -> Controller {
    let ctx = SessionContext::new(
        SessionConfig::default(),
        Arc::new(DirStore::new(data_dir)),
        Arc::new(FsFiles),
        Arc::new(MemoryHub::new()),
    );
    Controller::new(Arc::new(ctx))
}

fn memory_session(hub: &MemoryHub, name: &str) -> Controller {
    let config = SessionConfigBuilder::new()
        .user_name(name)
        .save_debounce(20)
        .build();
    let ctx = SessionContext::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFiles::new()),
        Arc::new(hub.clone()),
    );
    Controller::new(Arc::new(ctx))
}

fn parse_index(arg: Option<&&str>, what: &str) -> Result<usize, String> {
    arg.and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("expected a {what} number (1-based)"))
}

// ─── Command loop ─────────────────────────────────────────────────────────

enum Flow {
    Continue,
    Quit,
}

async fn dispatch(controller: &Controller, line: &str) -> Result<Flow, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(command) = parts.first() else {
        return Ok(Flow::Continue);
    };
    let rest = |from: usize| parts.get(from..).map(|p| p.join(" ")).unwrap_or_default();
    let lifecycle = &controller.lifecycle;
    let map = |e: SessionError| e.to_string();

    match *command {
        "show" | "s" => show_active(controller),

        "files" | "ls" => {
            let state = controller.state();
            if state.files.is_empty() {
                println!("  {}", "(no other documents)".dimmed());
            }
            for (i, doc) in state.files.iter().enumerate() {
                let label = match doc.path() {
                    Some(path) => path.display().to_string(),
                    None => first_line(&doc.text()),
                };
                println!("  {:>3}. {} {}", i + 1, doc.id().as_str().dimmed(), label);
            }
        }

        "insert" | "i" => {
            let position = parse_index(parts.get(1), "position").map(|n| n - 1)?;
            lifecycle.insert_text(position, &rest(2)).await;
        }

        "append" | "a" => {
            let len = lifecycle.active().content().len();
            let text = rest(1);
            let text = if len == 0 { text } else { format!("\n{text}") };
            lifecycle.insert_text(len, &text).await;
        }

        "delete" | "del" => {
            let start = parse_index(parts.get(1), "start").map(|n| n - 1)?;
            let length = parse_index(parts.get(2), "length")?;
            lifecycle.delete_text(start, length).await;
        }

        "set" => {
            lifecycle.set_text(&rest(1)).await;
        }

        "new" => {
            let id = lifecycle.new_document().await.map_err(map)?;
            step(&format!("active document {id}"));
        }

        "open" | "o" => {
            let target = parts.get(1).ok_or("Usage: open <n|path|id>")?;
            let reference = match target.parse::<usize>() {
                Ok(n) => {
                    let state = controller.state();
                    let doc = n
                        .checked_sub(1)
                        .and_then(|i| state.files.get(i))
                        .ok_or_else(|| format!("no document {n}"))?;
                    DocumentRef::id(doc.id().clone())
                }
                Err(_) if Path::new(target).exists() => DocumentRef::path(*target),
                Err(_) => DocumentRef::id(*target),
            };
            let doc = lifecycle.open_document(reference).await.map_err(map)?;
            step(&format!("opened {}", doc.id()));
        }

        "discard" => lifecycle.discard().await.map_err(map)?,

        "clean" => {
            lifecycle.clean().await.map_err(map)?;
            step("session reset");
        }

        "dismiss" => lifecycle.dismiss_error(),

        "markdown" | "md" => {
            let on = lifecycle.toggle_markdown().await;
            step(if on { "markdown on" } else { "markdown off" });
        }

        "path" => {
            let path = parts.get(1).ok_or("Usage: path <file>")?;
            lifecycle.update_path(*path).map_err(map)?;
            step(&format!("saving to {path}"));
        }

        "version" | "v" => {
            controller.versions.add_version().await.map_err(map)?;
            step(&format!("version {} saved", controller.versions.versions().len()));
        }

        "versions" | "vs" => {
            let versions = controller.versions.versions();
            if versions.is_empty() {
                println!("  {}", "(no versions)".dimmed());
            }
            for (i, version) in versions.iter().enumerate() {
                let text = version.text().unwrap_or_default();
                println!(
                    "  {:>3}. {} {}",
                    i + 1,
                    version.date.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    first_line(&text)
                );
            }
        }

        "render" | "restore" => {
            let n = parse_index(parts.get(1), "version")?;
            let versions = controller.versions.versions();
            let version = versions.get(n - 1).ok_or_else(|| format!("no version {n}"))?;
            if *command == "render" {
                let text = controller.versions.render_version(&version.id).map_err(map)?;
                println!("{}", text.bright_white());
                println!("  {}", "(preview; 'unrender' to return)".dimmed());
            } else {
                let changed = controller
                    .versions
                    .apply_version(&version.id)
                    .await
                    .map_err(map)?;
                step(if changed { "version restored" } else { "already at this version" });
            }
        }

        "unrender" => {
            controller.versions.unrender_version();
        }

        "share" => {
            let room = parts.get(1).map(|r| quire_session::DocumentId::from(*r));
            let status = controller.collab.start_collab(room).await.map_err(map)?;
            if let Some(err) = status.error {
                fail(&format!("not connected: {err}"));
            }
            if let Some(links) = controller.collab.share_link() {
                step(&format!("share {}", links.web.bright_cyan()));
            }
        }

        "stop" => {
            controller.collab.stop_collab().await.map_err(map)?;
            step("left the room");
        }

        "reconnect" => {
            let status = controller.collab.reconnect().await.map_err(map)?;
            step(if status.connected { "connected" } else { "still offline" });
        }

        "link" => match controller.collab.share_link() {
            Some(links) => {
                step(&links.web);
                step(&links.app);
            }
            None => fail("not sharing"),
        },

        "save" => {
            controller.persistence.flush().await;
            step(&format!("saved (#{})", controller.persistence.sequence()));
        }

        "quit" | "exit" | "q" => return Ok(Flow::Quit),

        "help" | "h" | "?" => {
            println!("  show | files | insert <pos> <text> | append <text> | delete <pos> <len>");
            println!("  set <text> | new | open <n|path|id> | discard | clean | dismiss");
            println!("  markdown | path <file> | version | versions | render <n> | unrender");
            println!("  restore <n> | share [room] | stop | reconnect | link | save | quit");
        }

        other => {
            println!("  {} Unknown command '{}', type 'help'", "?".bright_yellow(), other);
        }
    }
    Ok(Flow::Continue)
}

async fn run_edit(data_dir: &Path, source: Option<String>) {
    header("QUIRE");
    let controller = disk_session(data_dir);
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let args = source.as_deref().map(|s| SessionArgs::parse(s, &cwd));

    let report = controller.init(args).await;
    show_report(&report);
    if let Some(err) = controller.state().error.filter(|_| report.error.is_none()) {
        fail(&err.to_string());
    }
    show_active(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let prompt = format!("{}", "quire> ".bright_cyan().bold());
        if stdout.write_all(prompt.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            break;
        }
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => break,
        };
        match dispatch(&controller, line.trim()).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(message) => fail(&message),
        }
    }

    match controller.shutdown().await {
        Ok(()) => println!("  {}", "Saved. Goodbye!".dimmed()),
        Err(err) => fail(&format!("could not save: {err}")),
    }
}

async fn run_status(data_dir: &Path, json: bool) {
    let controller = disk_session(data_dir);
    let report = controller.persistence.restore().await;
    let state = controller.state();

    if json {
        let files: Vec<_> = state
            .files
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id().as_str(),
                    "path": d.path().map(|p| p.display().to_string()),
                    "length": d.content().len(),
                })
            })
            .collect();
        let summary = serde_json::json!({
            "active": {
                "id": state.active.id().as_str(),
                "path": state.active.path().map(|p| p.display().to_string()),
                "length": state.active.content().len(),
                "versions": state.active.content().versions().len(),
            },
            "files": files,
            "room": report.room.as_ref().map(|r| r.as_str()),
            "rejected": state.rejected.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            "error": report.error.as_ref().map(ToString::to_string),
            "storage_bytes": controller.persistence.storage_size().await.unwrap_or(0),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{text}"),
            Err(err) => fail(&err.to_string()),
        }
        return;
    }

    header("SESSION STATUS");
    show_report(&report);
    show_active(&controller);
    section("Other documents");
    for doc in &state.files {
        step(&format!("{} {}", doc.id(), first_line(&doc.text())));
    }
    for rejected in &state.rejected {
        fail(&format!("{}: {}", rejected.id, rejected.error));
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn converge(a: &Controller, b: &Controller) -> bool {
    for _ in 0..200 {
        if a.lifecycle.active().text() == b.lifecycle.active().text() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "PEERS CONVERGED, texts are identical".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED, texts differ".bright_red().bold()
        );
    }
}

async fn run_demo() -> Result<(), SessionError> {
    header("DEMO: Sharing a Document");
    let hub = MemoryHub::new();
    let alice = memory_session(&hub, "Alice");
    let bob = memory_session(&hub, "Bob");
    alice.init(None).await;
    bob.init(None).await;

    section("Phase 1: Alice drafts offline");
    alice.lifecycle.insert_text(0, "Shopping list").await;
    alice.versions.add_version().await?;
    step("alice: typed a title and saved a version");

    section("Phase 2: Alice shares, Bob follows the link");
    alice.collab.start_collab(None).await?;
    let link = alice
        .collab
        .share_link()
        .ok_or_else(|| SessionError::InvalidState("room not started".to_string()))?;
    step(&format!("alice: shared at {}", link.web.bright_cyan()));
    step(&format!(
        "alice: kept {} backup copy in her files",
        alice.state().files.len()
    ));
    bob.handle_args(SessionArgs::parse(&link.app, Path::new("."))).await?;
    step(&format!("bob:   joined, {} peers in room", bob.collab.status().peer_count));

    section("Phase 3: Concurrent edits");
    let len = alice.lifecycle.active().content().len();
    alice.lifecycle.insert_text(len, "\n- eggs").await;
    bob.lifecycle.insert_text(len, "\n- milk").await;
    step("alice: appended '- eggs'");
    step("bob:   appended '- milk'");
    let converged = converge(&alice, &bob).await;
    show_active(&alice);
    show_active(&bob);
    convergence_result(converged);

    section("Phase 4: Bob restores the first version");
    let first = bob
        .versions
        .versions()
        .first()
        .cloned()
        .ok_or_else(|| SessionError::NotFound("version".to_string()))?;
    bob.versions.apply_version(&first.id).await?;
    step("bob:   restored 'Shopping list' as a forward edit");
    let converged = converge(&alice, &bob).await;
    show_active(&alice);
    convergence_result(converged);
    step(&format!(
        "history kept: {} version(s)",
        alice.versions.versions().len()
    ));

    alice.shutdown().await?;
    bob.shutdown().await?;
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Edit { source } => run_edit(&cli.data_dir, source).await,
        Commands::Status { json } => run_status(&cli.data_dir, json).await,
        Commands::Demo => {
            if let Err(err) = run_demo().await {
                fail(&format!("demo failed: {err}"));
                std::process::exit(1);
            }
        }
    }
}
