// src/inputs/stdin.rs
//! Interactive symbol prompt on the terminal.

use crate::core::lock::PairLock;
use crate::error::LockError;
use crossterm::style::Stylize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

const PROMPT: &str = "Enter base coin symbol (coin to buy and sell): ";

/// Reads symbols until a pair is locked (here or elsewhere) or input ends.
pub fn prompt_loop<R: BufRead, W: Write>(
    lock: &PairLock,
    mut input: R,
    mut output: W,
) -> io::Result<()> {
    let mut line = String::new();
    while !lock.is_locked() {
        write!(output, "{}", PROMPT.cyan().bold())?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            debug!("stdin closed, prompt stopped");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        match lock.attempt_lock(&line) {
            Ok(()) => return Ok(()),
            Err(e @ LockError::InvalidPair { .. }) => {
                writeln!(output, "{}", e.to_string().red())?;
            }
            Err(_) => return Ok(()),
        }
    }
    Ok(())
}

/// Runs the prompt on a detached thread; a pending read never holds up shutdown.
pub fn spawn(lock: Arc<PairLock>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-prompt".into())
        .spawn(move || {
            let stdin = io::stdin();
            if let Err(e) = prompt_loop(&lock, stdin.lock(), io::stdout()) {
                error!("stdin prompt failed: {}", e);
            }
        })
}
