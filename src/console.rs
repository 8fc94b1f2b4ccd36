//! Commands typed on stdin while the monitor runs.

use std::io::{self, BufRead};
use std::path::Path;
use std::thread;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, unbounded};

use crate::config;
use crate::grid::CellId;
use crate::monitor::Monitor;

const HELP: &str = "\
Commands:
  stats                  log the monitor counters
  cells                  print every cell's state as JSON
  enable <m> <r> <c>     resume scanning a cell
  disable <m> <r> <c>    stop scanning a cell
  reset [<m> <r> <c>]    end one cooldown, or every cooldown
  check <text>           run text through correction and matching
  reload                 rebuild the grid from the config file
  clear                  drop cached recognitions and corrections
  pause | resume         stop or restart the pipeline
  quit                   stop and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Stats,
    Cells,
    Enable(CellId),
    Disable(CellId),
    /// `None` resets every cell
    Reset(Option<CellId>),
    Check(String),
    Reload,
    Clear,
    Pause,
    Resume,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match word.to_ascii_lowercase().as_str() {
            "stats" => Command::Stats,
            "cells" => Command::Cells,
            "enable" => Command::Enable(parse_cell(rest)?),
            "disable" => Command::Disable(parse_cell(rest)?),
            "reset" => match rest {
                "" | "all" => Command::Reset(None),
                id => Command::Reset(Some(parse_cell(id)?)),
            },
            "check" => {
                if rest.is_empty() {
                    bail!("check needs some text");
                }
                Command::Check(rest.to_string())
            }
            "reload" => Command::Reload,
            "clear" => Command::Clear,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{other}' (try 'help')"),
        };
        Ok(command)
    }
}

/// `<monitor> <row> <col>`, separated by spaces or commas.
fn parse_cell(text: &str) -> Result<CellId> {
    let parts = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .with_context(|| format!("'{s}' is not a cell index"))
        })
        .collect::<Result<Vec<u32>>>()?;

    match parts.as_slice() {
        &[monitor, row, col] => Ok(CellId::new(monitor, row, col)),
        _ => bail!("expected <monitor> <row> <col>, got '{text}'"),
    }
}

/// Reads commands on a background thread. The receiver disconnects when
/// stdin closes. Lines that do not parse are logged and skipped.
pub fn spawn_reader() -> Result<Receiver<Command>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("{e}"),
                }
            }
        })
        .context("failed to spawn console thread")?;
    Ok(rx)
}

/// Runs one command. Returns `false` when the program should exit.
pub fn execute(monitor: &Monitor, command: Command, config_path: &Path) -> Result<bool> {
    match command {
        Command::Stats => log::info!("{}", monitor.stats().summary()),
        Command::Cells => print_state(monitor)?,
        Command::Enable(id) => require_cell(monitor.set_cell_enabled(id, true), id)?,
        Command::Disable(id) => require_cell(monitor.set_cell_enabled(id, false), id)?,
        Command::Reset(Some(id)) => require_cell(monitor.reset_cell(id), id)?,
        Command::Reset(None) => monitor.reset_all(),
        Command::Check(text) => {
            let (corrected, found) = monitor.check_text(&text);
            match found {
                Some(m) => log::info!(
                    "{:?} matches {:?} at distance {}",
                    corrected,
                    m.phrase,
                    m.distance
                ),
                None => log::info!("{:?} matches no trigger phrase", corrected),
            }
        }
        Command::Reload => {
            let config = config::load_config(config_path)?;
            monitor.rebuild_grid(&config.grid)?;
        }
        Command::Clear => monitor.clear_caches(),
        Command::Pause => {
            if monitor.is_running() {
                monitor.stop();
            } else {
                log::info!("Monitor is not running");
            }
        }
        Command::Resume => {
            if monitor.is_running() {
                log::info!("Monitor is already running");
            } else {
                monitor.start()?;
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn require_cell(found: bool, id: CellId) -> Result<()> {
    if !found {
        bail!("no cell {id} in the current grid");
    }
    Ok(())
}

/// Prints every cell's snapshot as pretty JSON on stdout.
pub fn print_state(monitor: &Monitor) -> Result<()> {
    let states = monitor.cell_states();
    println!("{}", serde_json::to_string_pretty(&states)?);
    Ok(())
}
