use std::io::{stdin, stdout, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::defaults::PROMPT;

/// File paths typed by the operator, one per line.
///
/// Stdin is read on a dedicated OS thread: a blocking read cannot be
/// cancelled, and a runtime worker stuck in one would hold up shutdown.
#[derive(Debug)]
pub struct Prompt {
    receiver: mpsc::Receiver<PathBuf>,
}

impl Prompt {
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel(1);

        let spawned = thread::Builder::new()
            .name("stdin".to_owned())
            .spawn(move || read_paths(&sender));

        if let Err(err) = spawned {
            warn!(%err, "Failed to start the input prompt");
        }

        Self { receiver }
    }

    /// Resolves to `None` once stdin is closed.
    pub async fn next_path(&mut self) -> Option<PathBuf> {
        self.receiver.recv().await
    }
}

fn show() {
    print!("{PROMPT}");
    drop(stdout().flush());
}

fn read_paths(sender: &mpsc::Sender<PathBuf>) {
    let mut lines = stdin().lock().lines();

    loop {
        show();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                warn!(%err, "Failed to read from stdin");
                break;
            }
            None => break,
        };

        let path = line.trim();

        if path.is_empty() {
            continue;
        }

        if sender.blocking_send(PathBuf::from(path)).is_err() {
            break;
        }
    }

    debug!("Input prompt closed");
}
