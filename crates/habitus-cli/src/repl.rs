//! REPL – Read-Eval-Print Loop for the Habitus operator shell.
//!
//! Supported slash-commands:
//!   /help                         – show this list
//!   /memories                     – list stored memories (confidence >= 0.1)
//!   /search <words>               – search memories (confidence >= 0.3)
//!   /save <text>                  – store a memory at confidence 0.5
//!   /edit <id> <text>             – replace a memory's text
//!   /confidence <id> <value>      – overwrite a memory's confidence
//!   /forget <id>                  – delete a memory
//!   /stats                        – memory statistics
//!   /log <tool> [json-arguments]  – log an execution and schedule recognition
//!   /executions [tool] [limit]    – show logged executions, newest first
//!   /patterns [days]              – full pattern summary
//!   /recognize [tool]             – run a recognition cycle in the foreground
//!   /cleanup [threshold]          – evict low-confidence memories
//!   /models                       – list models on the configured server
//!   /quit | /exit                 – drain background work and exit

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use habitus_runtime::{MemoryEngine, RecognitionOutcome, ToolResponse, TriggerContext};
use habitus_types::{Memory, MemoryId, NewToolExecution};
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::model_server;

const DEFAULT_EXECUTIONS_SHOWN: usize = 10;
const DEFAULT_PATTERN_DAYS: i64 = 30;
const DEFAULT_CLEANUP_THRESHOLD: f64 = 0.1;

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Memories,
    Search(String),
    Save(String),
    Edit { id: MemoryId, text: String },
    Confidence { id: MemoryId, value: f64 },
    Forget(MemoryId),
    Stats,
    Log { tool: String, arguments: Option<Value> },
    Executions { tool: Option<String>, limit: usize },
    Patterns { days: i64 },
    Recognize(Option<String>),
    Cleanup(f64),
    Models,
    Quit,
}

fn parse_id(raw: Option<&str>) -> Result<MemoryId, String> {
    let raw = raw.ok_or("missing memory id")?;
    raw.parse::<MemoryId>()
        .map_err(|_| format!("'{raw}' is not a memory id"))
}

fn required<'a>(rest: &'a str, what: &str) -> Result<&'a str, String> {
    if rest.is_empty() {
        Err(format!("missing {what}"))
    } else {
        Ok(rest)
    }
}

/// Parse one input line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match name {
        "/help" => Ok(Command::Help),
        "/memories" => Ok(Command::Memories),
        "/search" => Ok(Command::Search(required(rest, "search words")?.to_string())),
        "/save" => Ok(Command::Save(required(rest, "memory text")?.to_string())),
        "/edit" => {
            let (id, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Ok(Command::Edit {
                id: parse_id(Some(id).filter(|s| !s.is_empty()))?,
                text: required(text.trim(), "memory text")?.to_string(),
            })
        }
        "/confidence" => {
            let mut parts = rest.split_whitespace();
            let id = parse_id(parts.next())?;
            let raw = parts.next().ok_or("missing confidence value")?;
            let value = raw
                .parse::<f64>()
                .map_err(|_| format!("'{raw}' is not a number"))?;
            Ok(Command::Confidence { id, value })
        }
        "/forget" => Ok(Command::Forget(parse_id(rest.split_whitespace().next())?)),
        "/stats" => Ok(Command::Stats),
        "/log" => {
            let (tool, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let tool = required(tool, "tool name")?.to_string();
            let args = args.trim();
            let arguments = if args.is_empty() {
                None
            } else {
                Some(
                    serde_json::from_str(args)
                        .map_err(|e| format!("arguments are not valid JSON: {e}"))?,
                )
            };
            Ok(Command::Log { tool, arguments })
        }
        "/executions" => {
            let mut tool = None;
            let mut limit = DEFAULT_EXECUTIONS_SHOWN;
            for part in rest.split_whitespace() {
                match part.parse::<usize>() {
                    Ok(n) => limit = n,
                    Err(_) => tool = Some(part.to_string()),
                }
            }
            Ok(Command::Executions { tool, limit })
        }
        "/patterns" => {
            let days = match rest {
                "" => DEFAULT_PATTERN_DAYS,
                raw => raw
                    .parse::<i64>()
                    .ok()
                    .filter(|d| *d > 0)
                    .ok_or_else(|| format!("'{raw}' is not a positive number of days"))?,
            };
            Ok(Command::Patterns { days })
        }
        "/recognize" => Ok(Command::Recognize(
            rest.split_whitespace().next().map(str::to_string),
        )),
        "/cleanup" => {
            let threshold = match rest {
                "" => DEFAULT_CLEANUP_THRESHOLD,
                raw => raw
                    .parse::<f64>()
                    .ok()
                    .filter(|t| (0.0..=1.0).contains(t))
                    .ok_or_else(|| format!("'{raw}' is not a threshold in [0, 1]"))?,
            };
            Ok(Command::Cleanup(threshold))
        }
        "/models" => Ok(Command::Models),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command '{other}'")),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
/// Async work runs on `runtime`.
pub fn run(engine: &MemoryEngine, runtime: &Runtime, cfg: &Config, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "habitus>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{} Type {} for available commands.", e.red(), "/help".bold());
                continue;
            }
        };

        match command {
            Command::Help => cmd_help(),
            Command::Memories => print_response(&engine.tools().get_all_memories()),
            Command::Search(query) => print_response(&engine.tools().search_memory(&query)),
            Command::Save(text) => print_response(&engine.tools().save_memory(&text)),
            Command::Edit { id, text } => {
                print_response(&engine.tools().modify_memory(id, Some(&text), None))
            }
            Command::Confidence { id, value } => {
                print_response(&engine.tools().modify_memory(id, None, Some(value)))
            }
            Command::Forget(id) => print_response(&engine.tools().delete_memory(id)),
            Command::Stats => cmd_stats(engine),
            Command::Log { tool, arguments } => cmd_log(engine, runtime, tool, arguments),
            Command::Executions { tool, limit } => cmd_executions(engine, tool.as_deref(), limit),
            Command::Patterns { days } => cmd_patterns(engine, days),
            Command::Recognize(tool) => cmd_recognize(engine, runtime, tool),
            Command::Cleanup(threshold) => cmd_cleanup(engine, threshold),
            Command::Models => cmd_models(cfg),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Habitus Commands".bold().underline());
    for (cmd, what) in [
        ("/memories", "list stored memories"),
        ("/search <words>", "search memories"),
        ("/save <text>", "store a memory"),
        ("/edit <id> <text>", "replace a memory's text"),
        ("/confidence <id> <value>", "overwrite a memory's confidence"),
        ("/forget <id>", "delete a memory"),
        ("/stats", "memory statistics"),
        ("/log <tool> [json]", "log an execution, schedule recognition"),
        ("/executions [tool] [n]", "show logged executions"),
        ("/patterns [days]", "full pattern summary"),
        ("/recognize [tool]", "run a recognition cycle now"),
        ("/cleanup [threshold]", "evict low-confidence memories"),
        ("/models", "list models on the configured server"),
        ("/quit  /exit", "exit the shell"),
    ] {
        println!("  {:<26} – {}", cmd.bold().cyan(), what);
    }
    println!();
}

fn cmd_stats(engine: &MemoryEngine) {
    let stats = match engine.store().get_memory_stats() {
        Ok(stats) => stats,
        Err(e) => return println!("{}: {}", "Error".red(), e),
    };
    let executions = engine.store().count_tool_executions().unwrap_or(0);
    println!("{}", "Memory Statistics".bold().underline());
    println!("  Memories            : {}", stats.total_memories.to_string().yellow());
    println!("  Average confidence  : {:.3}", stats.average_confidence);
    println!("  High confidence     : {}", stats.high_confidence_memories);
    println!("  Logged executions   : {}", executions);
    println!("  Cycles in flight    : {}", engine.in_flight());
}

fn cmd_log(engine: &MemoryEngine, runtime: &Runtime, tool: String, arguments: Option<Value>) {
    // Background recognition cycles are spawned onto this runtime.
    let _enter = runtime.enter();
    let mut execution = NewToolExecution::new(tool);
    if let Some(arguments) = arguments {
        execution = execution.with_arguments(arguments);
    }
    match engine.on_tool_executed(execution) {
        Ok(id) => println!(
            "  {} execution {} logged; recognition scheduled",
            "✓".green(),
            id.to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_executions(engine: &MemoryEngine, tool: Option<&str>, limit: usize) {
    match engine.store().get_tool_executions(tool, limit) {
        Ok(executions) if executions.is_empty() => println!("  {}", "No executions logged.".dimmed()),
        Ok(executions) => {
            for e in executions {
                let args = e.arguments.map(|a| a.to_string()).unwrap_or_default();
                println!(
                    "  {:>5}  {}  {}  {}",
                    e.id,
                    e.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                    e.tool.bold(),
                    args
                );
            }
        }
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_patterns(engine: &MemoryEngine, days: i64) {
    match engine.recognizer().extractor().generate_pattern_summary(days) {
        Ok(summary) => print_json(&summary),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_recognize(engine: &MemoryEngine, runtime: &Runtime, tool: Option<String>) {
    let tool = match tool {
        Some(tool) => tool,
        None => match engine.store().get_tool_executions(None, 1) {
            Ok(latest) if !latest.is_empty() => latest[0].tool.clone(),
            Ok(_) => return println!("  {}", "No executions logged.".dimmed()),
            Err(e) => return println!("{}: {}", "Error".red(), e),
        },
    };
    println!("  Running recognition for {} …", tool.bold());
    let outcome = runtime.block_on(engine.recognize_now(&TriggerContext::for_tool(tool)));
    match &outcome {
        RecognitionOutcome::Skipped { reason, .. } => {
            println!("  {} {}", "skipped:".yellow(), reason)
        }
        RecognitionOutcome::Failed { error } => println!("  {} {}", "failed:".red(), error),
        RecognitionOutcome::Completed(summary) => {
            println!(
                "  {} {} applied, {} rejected, {} cleaned up",
                "completed:".green(),
                summary.insights_saved_count,
                summary.rejected.len(),
                summary.memories_cleaned_up
            );
            print_json(&outcome);
        }
    }
}

fn cmd_cleanup(engine: &MemoryEngine, threshold: f64) {
    match engine.store().cleanup_low_confidence_memories(threshold) {
        Ok(n) => println!("  {} {} memory(ies) below {} removed", "✓".green(), n, threshold),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_models(cfg: &Config) {
    print!("  Probing {} … ", cfg.llm_url.dimmed());
    io::stdout().flush().ok();
    match model_server::fetch_models(&cfg.llm_url, &cfg.api_key) {
        Ok(models) => {
            println!("{}", "online".green());
            for m in &models {
                let marker = if m.id == cfg.model { "▶" } else { " " };
                println!("    {} {}", marker.green(), m.id.bold());
            }
            if !model_server::is_served(&models, &cfg.model) {
                println!("  {} '{}' is not served here", "Warning:".yellow(), cfg.model);
            }
        }
        Err(e) => {
            println!("{}", "offline".red());
            println!("  {}", e.dimmed());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_memory(m: &Memory) {
    let confidence = format!("{:.2}", m.confidence);
    let confidence = if m.confidence >= 0.7 {
        confidence.green()
    } else if m.confidence >= 0.3 {
        confidence.yellow()
    } else {
        confidence.red()
    };
    println!("  [{:>3}] {}  {}", m.id, confidence, m.text);
}

fn print_response(response: &ToolResponse) {
    if !response.is_success() {
        println!("{}: {}", "Error".red(), response.message.as_deref().unwrap_or("unknown"));
        return;
    }
    if let Some(message) = &response.message {
        println!("  {} {}", "✓".green(), message);
    }
    if let Some(memories) = &response.memories {
        if memories.is_empty() {
            println!("  {}", "No memories.".dimmed());
        }
        memories.iter().for_each(print_memory);
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_command("/help"), Ok(Command::Help));
        assert_eq!(parse_command("  /stats  "), Ok(Command::Stats));
        assert_eq!(parse_command("/exit"), Ok(Command::Quit));
        assert!(parse_command("/dance").is_err());
    }

    #[test]
    fn parses_text_arguments() {
        assert_eq!(
            parse_command("/save User likes EDM music"),
            Ok(Command::Save("User likes EDM music".into()))
        );
        assert_eq!(
            parse_command("/edit 4 User likes house music"),
            Ok(Command::Edit { id: 4, text: "User likes house music".into() })
        );
        assert!(parse_command("/save").is_err());
        assert!(parse_command("/edit 4").is_err());
        assert!(parse_command("/edit x text").is_err());
    }

    #[test]
    fn parses_confidence_and_forget() {
        assert_eq!(
            parse_command("/confidence 3 0.8"),
            Ok(Command::Confidence { id: 3, value: 0.8 })
        );
        assert!(parse_command("/confidence 3").is_err());
        assert_eq!(parse_command("/forget 12"), Ok(Command::Forget(12)));
        assert!(parse_command("/forget").is_err());
    }

    #[test]
    fn parses_log_with_json_arguments() {
        assert_eq!(
            parse_command(r#"/log play_song {"artist": "Avicii"}"#),
            Ok(Command::Log {
                tool: "play_song".into(),
                arguments: Some(json!({"artist": "Avicii"})),
            })
        );
        assert_eq!(
            parse_command("/log check_weather"),
            Ok(Command::Log { tool: "check_weather".into(), arguments: None })
        );
        assert!(parse_command("/log play_song {not json").is_err());
        assert!(parse_command("/log").is_err());
    }

    #[test]
    fn parses_optional_arguments() {
        assert_eq!(
            parse_command("/executions"),
            Ok(Command::Executions { tool: None, limit: DEFAULT_EXECUTIONS_SHOWN })
        );
        assert_eq!(
            parse_command("/executions play_song 5"),
            Ok(Command::Executions { tool: Some("play_song".into()), limit: 5 })
        );
        assert_eq!(parse_command("/patterns 7"), Ok(Command::Patterns { days: 7 }));
        assert!(parse_command("/patterns -1").is_err());
        assert_eq!(parse_command("/recognize"), Ok(Command::Recognize(None)));
        assert_eq!(
            parse_command("/recognize play_song"),
            Ok(Command::Recognize(Some("play_song".into())))
        );
        assert_eq!(parse_command("/cleanup"), Ok(Command::Cleanup(0.1)));
        assert!(parse_command("/cleanup 2").is_err());
    }
}
