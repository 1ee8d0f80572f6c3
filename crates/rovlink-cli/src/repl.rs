//! REPL – Read-Eval-Print Loop for driving the robot from a terminal.
//!
//! Supported slash-commands:
//!   /help                – show this list
//!   /speed <v>           – set forward speed, keep the current turn
//!   /turn <v>            – set turn ratio (+1 full left, -1 full right)
//!   /stop                – zero the speed
//!   /led <id> <status>   – switch an LED
//!   /status [json]       – print link state and the latest telemetry
//!   /watch [secs]        – stream sensor updates for a while (default 5 s)
//!   /quit | /exit        – stop the robot and exit

use colored::Colorize;
use futures_util::StreamExt;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use rovlink_hal::drive::{MAX_SPEED, MAX_TURN};
use rovlink_hal::led::LedStatus;
use rovlink_middleware::{DriveAdapter, RobotLink};
use rovlink_types::{DriveIntent, GpsFix, LocalPose, SensorUpdate, SensorValue};
use tokio::runtime::Handle;

const DEFAULT_WATCH_SECS: u64 = 5;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Speed(f64),
    Turn(f64),
    Stop,
    Led {
        id: u32,
        status: String,
    },
    Status { json: bool },
    Watch(u64),
    Quit,
}

impl ReplCommand {
    /// The drive intent this command maps to, if any.
    pub fn intent(&self) -> Option<DriveIntent> {
        match self {
            ReplCommand::Speed(v) => Some(DriveIntent::SetSpeed(*v)),
            ReplCommand::Turn(v) => Some(DriveIntent::SetTurn(*v)),
            ReplCommand::Stop => Some(DriveIntent::Stop),
            ReplCommand::Led { id, status } => Some(DriveIntent::Led {
                id: *id,
                status: status.clone(),
            }),
            _ => None,
        }
    }
}

const COMMANDS: &[&str] = &[
    "/help", "/quit", "/exit", "/stop", "/speed", "/turn", "/led", "/status", "/watch",
];

const HELP: &[(&str, &str)] = &[
    ("/speed <v>", "set forward speed, keep the current turn"),
    ("/turn <v>", "set turn ratio, +1 left / -1 right"),
    ("/stop", "zero the speed"),
    ("/led <id> <status>", "switch an LED (on / off)"),
    ("/status [json]", "link state and latest telemetry"),
    ("/watch [secs]", "stream sensor updates"),
    ("/quit  /exit", "stop the robot and exit"),
];

/// Parse one line of operator input.
pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    match (head, args.as_slice()) {
        ("/help", []) => Ok(ReplCommand::Help),
        ("/quit" | "/exit", []) => Ok(ReplCommand::Quit),
        ("/stop", []) => Ok(ReplCommand::Stop),
        ("/speed", [v]) => Ok(ReplCommand::Speed(parse_finite(v)?)),
        ("/turn", [v]) => Ok(ReplCommand::Turn(parse_finite(v)?)),
        ("/led", [id, status]) => {
            let Ok(id) = id.parse::<u32>() else {
                return Err(format!("'{id}' is not a valid LED id"));
            };
            // Known spellings are normalised; anything else goes out verbatim.
            let status = match status.parse::<LedStatus>() {
                Ok(known) => known.as_str().to_string(),
                Err(_) => status.to_string(),
            };
            Ok(ReplCommand::Led { id, status })
        }
        ("/status", []) => Ok(ReplCommand::Status { json: false }),
        ("/status", ["json"]) => Ok(ReplCommand::Status { json: true }),
        ("/watch", []) => Ok(ReplCommand::Watch(DEFAULT_WATCH_SECS)),
        ("/watch", [secs]) => match secs.parse::<u64>() {
            Ok(secs) => Ok(ReplCommand::Watch(secs)),
            Err(_) => Err(format!("'{secs}' is not a number of seconds")),
        },
        (other, _) if COMMANDS.contains(&other) => Err(format!("wrong arguments for {other}")),
        (other, _) => Err(format!("Unknown command '{other}'")),
    }
}

fn parse_finite(raw: &str) -> Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("'{raw}' is not a number")),
    }
}

/// Range warning for a motion command, or `None` when within limits.
pub fn range_warning(cmd: &ReplCommand) -> Option<String> {
    match cmd {
        ReplCommand::Speed(v) if v.abs() > MAX_SPEED => Some(format!(
            "speed {v} exceeds the nominal maximum of {MAX_SPEED:.4}; wheel output will saturate"
        )),
        ReplCommand::Turn(v) if v.abs() > MAX_TURN => Some(format!(
            "turn {v} is outside [-{MAX_TURN}, {MAX_TURN}]"
        )),
        _ => None,
    }
}

fn gps_text(g: &GpsFix) -> String {
    format!(
        "lat {:.6} lon {:.6} alt {:.2} heading {:.2}",
        g.latitude, g.longitude, g.altitude, g.heading
    )
}

fn pos_text(p: &LocalPose) -> String {
    format!(
        "x {:.3} y {:.3} z {:.3} heading {:.2}",
        p.x, p.y, p.z, p.heading
    )
}

/// One-line human rendering of a sensor update.
pub fn format_update(update: &SensorUpdate) -> String {
    let body = match &update.value {
        SensorValue::Reward(r) => r.to_string(),
        SensorValue::Gps(g) => gps_text(g),
        SensorValue::Pos(p) => pos_text(p),
        SensorValue::Ranges(values) => {
            let parts: Vec<String> = values.iter().map(|v| format!("{v:.3}")).collect();
            format!("[{}]", parts.join(", "))
        }
        SensorValue::Ultrasonic(u) => {
            format!("{:.3} at {:.1} deg", u.distance, u.angle_rad.to_degrees())
        }
        SensorValue::Image(img) => format!("{}x{} frame", img.width, img.height),
        SensorValue::Button(pressed) => {
            let label = if *pressed { "pressed" } else { "released" };
            label.to_string()
        }
    };
    format!("{} = {}", update.channel, body)
}

/// Entry point for the interactive REPL.
///
/// Returns on `/quit`, end of input, or once the link reaches a terminal
/// state.
pub fn run(rt: &Handle, link: &RobotLink) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        let state = link.state();
        if state.is_terminal() {
            println!(
                "{} link is {}; leaving the shell.",
                "⚠".yellow().bold(),
                state.to_string().yellow()
            );
            break;
        }

        print!("{} ", "rovlink>".bold().cyan());
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

        let cmd = match parse_command(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    e,
                    "/help".bold()
                );
                continue;
            }
        };

        if let Some(warning) = range_warning(&cmd) {
            println!("  {} {}", "Warning:".yellow(), warning);
        }

        match cmd {
            ReplCommand::Help => cmd_help(),
            ReplCommand::Status { json } => cmd_status(rt, link, json),
            ReplCommand::Watch(secs) => {
                let seen = rt.block_on(watch(link, Duration::from_secs(secs)));
                println!("  {} update(s) in {}s", seen, secs);
            }
            ReplCommand::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
            other => {
                if let Some(intent) = other.intent() {
                    match rt.block_on(link.execute(intent)) {
                        Ok(()) => println!("  {}", "ok".green()),
                        Err(e) => println!("  {} {}", "Error:".red(), e),
                    }
                }
            }
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "rovlink Commands".bold().underline());
    for (usage, what) in HELP {
        println!("  {} – {}", format!("{usage:<20}").bold().cyan(), what);
    }
    println!("  Nominal top speed is {MAX_SPEED:.4}.");
    println!();
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "–".dimmed().to_string())
}

fn cmd_status(rt: &Handle, link: &RobotLink, json: bool) {
    let snapshot = link.store().snapshot();
    if json {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(s) => println!("{s}"),
            Err(e) => println!("{}: {}", "Serialization error".red(), e),
        }
        return;
    }

    let (speed, turn) = rt.block_on(async { (link.speed().await, link.turn().await) });
    println!("{}", "Link".bold().underline());
    println!("  state    : {}", link.state().to_string().yellow());
    match link.peer() {
        Some(peer) => println!("  peer     : {}", peer),
        None => println!("  peer     : {}:{}", link.host(), link.port()),
    }
    println!("  drive    : speed {:.4} turn {:.2}", speed, turn);

    let reward = snapshot.reward.map(|r| r.to_string());
    let gps = snapshot.gps.as_ref().map(gps_text);
    let pos = snapshot.pos.as_ref().map(pos_text);
    let sense = snapshot.sense.as_ref().map(|v| format!("{v:?}"));
    let image = snapshot.image_size.map(|(w, h)| format!("{w}x{h}"));

    println!("{}", "Telemetry".bold().underline());
    println!("  reward   : {}", or_dash(reward));
    println!("  gps      : {}", or_dash(gps));
    println!("  pos      : {}", or_dash(pos));
    println!("  sense    : {}", or_dash(sense));
    println!("  image    : {}", or_dash(image));
    if !snapshot.buttons.is_empty() {
        let buttons: Vec<String> = snapshot
            .buttons
            .iter()
            .map(|(id, on)| format!("{id}={}", u8::from(*on)))
            .collect();
        println!("  buttons  : {}", buttons.join(" "));
    }
}

/// Print sensor updates from `adapter` until `window` elapses or the stream
/// ends.  Returns the number of updates printed.
pub async fn watch(adapter: &dyn DriveAdapter, window: Duration) -> usize {
    let mut stream = adapter.sensor_stream().await;
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let mut seen = 0;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            next = stream.next() => match next {
                Some(update) => {
                    println!("  {}", format_update(&update));
                    seen += 1;
                }
                None => break,
            },
        }
    }
    seen
}
