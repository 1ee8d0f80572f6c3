//! `rovlink` – operator console for a robot or simulator speaking the
//! line-based robot link protocol.
//!
//! This binary:
//!
//! 1. Checks for `~/.rovlink/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Connects to the robot and hands the link to the supervisor.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/speed`, `/turn`, `/led`, `/status`, `/watch`, `/help`).
//! 4. Intercepts **Ctrl-C** to stop the robot and close the link before
//!    exiting.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use rovlink_middleware::RobotLink;
use rovlink_runtime::supervise;
use rovlink_types::LinkState;

fn main() {
    // Structured logging; RUST_LOG, ROVLINK_LOG_FORMAT and
    // OTEL_EXPORTER_OTLP_ENDPOINT are honoured.  User-facing output stays on
    // println!.
    let _telemetry = rovlink_runtime::init_tracing("rovlink");

    print_banner();

    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Connect ───────────────────────────────────────────────────────────
    print!(
        "\n  Connecting to {} … ",
        format!("{}:{}", cfg.host, cfg.port).dimmed()
    );
    std::io::Write::flush(&mut std::io::stdout()).ok();
    let link = match runtime.block_on(RobotLink::connect(cfg.link_options())) {
        Ok(link) => Arc::new(link),
        Err(e) => {
            println!("{}", "failed".red());
            println!("  {}", e);
            std::process::exit(1);
        }
    };
    println!("{}", "connected".green());
    info!(host = %cfg.host, port = cfg.port, "operator session started");

    // The supervisor releases the socket if the telemetry stream dies.
    let supervised = Arc::clone(&link);
    runtime.spawn(async move {
        if supervise(supervised).await == LinkState::Failed {
            println!();
            let msg = "⚠  Robot link failed. Press Enter to leave the shell.";
            println!("{}", msg.yellow().bold());
        }
    });

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let handle = runtime.handle().clone();
    let ctrlc_link = Arc::clone(&link);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        let msg = "⚠  Ctrl-C received – stopping the robot …";
        println!("{}", msg.yellow().bold());
        handle.block_on(stop_and_close(&ctrlc_link));
        println!("{}", "  ✓ Link closed. Exiting rovlink.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the robot");
    }

    println!();
    println!("  Type {} for commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(runtime.handle(), &link);

    runtime.block_on(stop_and_close(&link));
}

/// Zero the speed if the link still accepts commands, then shut it down.
async fn stop_and_close(link: &RobotLink) {
    if link.state() == LinkState::Active
        && let Err(e) = link.stop().await
    {
        warn!(error = %e, "could not stop the robot before closing");
    }
    link.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

const WIZARD_BOX: &[&str] = &[
    "  ╔══════════════════════════════════════╗",
    "  ║       rovlink First-Run Wizard       ║",
    "  ╚══════════════════════════════════════╝",
];

fn run_first_run_wizard() -> config::Config {
    println!();
    for line in WIZARD_BOX {
        println!("{}", line.bold().cyan());
    }
    println!();
    println!("  No configuration found. Let's set one up.\n");

    let mut cfg = config::Config::default();

    cfg.host = prompt_line(&format!("  Robot host [{}]: ", cfg.host), &cfg.host);

    let port_str = prompt_line(
        &format!("  Robot port [{}]: ", cfg.port),
        &cfg.port.to_string(),
    );
    match port_str.parse::<u16>() {
        Ok(p) => cfg.port = p,
        Err(_) => println!(
            "  {} '{}' is not a valid port number, keeping {}",
            "Warning:".yellow(),
            port_str,
            cfg.port
        ),
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

const BANNER: &[&str] = &[
    r#"   ___            __   _       __  "#,
    r#"  / _ \___ _  __ / /  (_)___  / /__"#,
    r#" / , _/ _ \ |/ // /__/ / _ \ /  '_/"#,
    r#"/_/|_|\___/___//____/_/_//_//_/\_\ "#,
];

fn print_banner() {
    println!();
    for line in BANNER {
        println!("{}", line.bold().cyan());
    }
    println!();
    println!(
        "  {} {}",
        "rovlink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot link operator console");
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
