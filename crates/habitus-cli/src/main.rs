//! `habitus-cli` – Habitus operator shell
//!
//! This binary is a hands-on front end to the memory engine. It:
//!
//! 1. Checks for `~/.habitus/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Opens the memory database and probes the configured model server.
//! 3. Drops the user into an **interactive REPL** with slash-commands for
//!    inspecting memories, logging executions and running recognition.
//! 4. Intercepts **Ctrl-C** and drains in-flight recognition cycles before
//!    exiting.

mod config;
mod model_server;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use habitus_runtime::{MemoryEngine, init_tracing};

fn main() {
    // RUST_LOG filters (default "info"); HABITUS_LOG_FORMAT=json switches to
    // JSON lines. User-facing output still uses println!.
    let _telemetry = init_tracing("habitus-cli");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing background work …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Engine ────────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            println!("{}: {}", "Cannot start async runtime".red(), e);
            return;
        }
    };
    let engine = match MemoryEngine::from_config(&cfg.engine_config()) {
        Ok(engine) => engine,
        Err(e) => {
            println!("{}: {}", "Cannot open memory database".red(), e);
            return;
        }
    };
    println!("  Memory database: {}", cfg.db_path.display().to_string().bold());
    println!("  Posture        : {}", cfg.posture.to_string().yellow());

    // ── Model server discovery ────────────────────────────────────────────
    print!("\n  Probing model server at {} … ", cfg.llm_url.dimmed());
    match model_server::fetch_models(&cfg.llm_url, &cfg.api_key) {
        Ok(models) if model_server::is_served(&models, &cfg.model) => {
            println!("{} (model {} available)", "online".green(), cfg.model.bold());
        }
        Ok(_) => {
            println!("{}", "online".green());
            println!(
                "  {} model '{}' is not served; recognition cycles will fail.",
                "Warning:".yellow(),
                cfg.model
            );
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Executions are still logged; recognition fails until the server is up.",
                "No model server detected.".dimmed()
            );
        }
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&engine, &runtime, &cfg, shutdown);

    let report = runtime.block_on(engine.shutdown());
    if report.aborted > 0 {
        println!(
            "  {} {} recognition cycle(s) aborted at shutdown",
            "⚠".yellow(),
            report.aborted
        );
    }
    println!("{}", "  ✓ Exiting Habitus.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Habitus First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Habitus.\n");

    let mut cfg = config::Config::default();

    cfg.llm_url = prompt_line(
        &format!("  Model server URL [{}]: ", cfg.llm_url),
        &cfg.llm_url,
    );
    cfg.model = prompt_line(&format!("  Model [{}]: ", cfg.model), &cfg.model);

    println!("  When should recognition run?");
    println!("    1) After every execution  (development, default)");
    println!("    2) After every {}th execution (production)", cfg.every_n);
    if prompt_line("  Enter choice [1]: ", "1").trim() == "2" {
        cfg.posture = config::PostureChoice::Production;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    __  __      __    _ __            "#.bold().cyan());
    println!("{}", r#"   / / / /___ _/ /_  (_) /___  _______"#.bold().cyan());
    println!("{}", r#"  / /_/ / __ `/ __ \/ / __/ / / / ___/"#.bold().cyan());
    println!("{}", r#" / __  / /_/ / /_/ / / /_/ /_/ (__  ) "#.bold().cyan());
    println!("{}", r#"/_/ /_/\__,_/_.___/_/\__/\__,_/____/  "#.bold().cyan());
    println!();
    println!("  {} {}",
        "Habitus".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Memory & Pattern Recognition Engine");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
