//! Console engines: typed transcripts in, printed speech out

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{CaptureEngine, CaptureEvent, CaptureRequest, SynthesisEngine, SynthesisEvent, UtteranceId};
use crate::Result;
use crate::arbiter::{Command, Event, EventSender};

/// Capture engine fed by lines of text
///
/// Each capture attempt takes the next line. Lines typed while no attempt
/// is running wait for the next one. When the line source closes the engine
/// asks the arbiter to shut down.
pub struct ConsoleCapture {
    lines: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    events: EventSender,
    active: Arc<AtomicBool>,
    abort: Option<oneshot::Sender<()>>,
}

impl ConsoleCapture {
    /// Read transcripts from an arbitrary line channel
    #[must_use]
    pub fn new(lines: mpsc::Receiver<String>, events: EventSender) -> Self {
        Self {
            lines: Arc::new(tokio::sync::Mutex::new(lines)),
            events,
            active: Arc::new(AtomicBool::new(false)),
            abort: None,
        }
    }

    /// Read transcripts from standard input
    ///
    /// Lines starting with `:` are control commands (see
    /// [`parse_command`]) and go straight to the arbiter.
    #[must_use]
    pub fn stdin(events: EventSender) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let commands = events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(command) = parse_command(&line) {
                            if commands.send(command.into()).await.is_err() {
                                break;
                            }
                        } else if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        });
        Self::new(rx, events)
    }

    fn end_attempt(&mut self) {
        if let Some(abort) = self.abort.take() {
            // the attempt may already have finished
            let _ = abort.send(());
        }
        self.active.store(false, Ordering::Relaxed);
    }
}

impl CaptureEngine for ConsoleCapture {
    fn start(&mut self, request: &CaptureRequest) -> Result<()> {
        self.end_attempt();

        let (abort_tx, mut abort_rx) = oneshot::channel();
        self.abort = Some(abort_tx);
        self.active.store(true, Ordering::Relaxed);

        let lines = Arc::clone(&self.lines);
        let events = self.events.clone();
        let active = Arc::clone(&self.active);
        tracing::debug!(locale = %request.locale, "console capture started");

        tokio::spawn(async move {
            let mut lines = lines.lock().await;
            if events.send(CaptureEvent::Ready.into()).await.is_err() {
                return;
            }

            let event: Event = tokio::select! {
                biased;
                _ = &mut abort_rx => return,
                line = lines.recv() => match line {
                    Some(line) => CaptureEvent::Final(line.trim().to_string()).into(),
                    None => Command::Shutdown.into(),
                },
            };

            active.store(false, Ordering::Relaxed);
            if events.send(event).await.is_err() {
                tracing::trace!("arbiter gone, console transcript dropped");
            }
        });

        Ok(())
    }

    fn stop(&mut self) {
        self.end_attempt();
    }

    fn cancel(&mut self) {
        self.end_attempt();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Parse a console control line
///
/// `:start`, `:stop`, `:quit` and `:community <name>`; anything else is a
/// transcript.
#[must_use]
pub fn parse_command(line: &str) -> Option<Command> {
    let rest = line.trim().strip_prefix(':')?;
    let (verb, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(verb, arg)| (verb, arg.trim()));

    match verb {
        "start" => Some(Command::Start),
        "stop" => Some(Command::Stop),
        "quit" | "exit" => Some(Command::Shutdown),
        "community" if !arg.is_empty() => Some(Command::SelectCommunity(arg.to_string())),
        _ => None,
    }
}

/// Synthesis engine that prints replies
///
/// An utterance "lasts" a fixed time so the turn-taking behaves like real
/// speech.
pub struct ConsoleSynthesis {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    events: EventSender,
    duration: Duration,
    current: Option<JoinHandle<()>>,
}

impl ConsoleSynthesis {
    /// Print replies to standard output
    #[must_use]
    pub fn stdout(events: EventSender, duration: Duration) -> Self {
        Self::with_writer(Box::new(std::io::stdout()), events, duration)
    }

    /// Print replies to any writer
    #[must_use]
    pub fn with_writer(out: Box<dyn Write + Send>, events: EventSender, duration: Duration) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            events,
            duration,
            current: None,
        }
    }
}

impl SynthesisEngine for ConsoleSynthesis {
    fn speak(&mut self, text: &str, id: UtteranceId) -> Result<()> {
        self.stop();

        {
            let mut out = self
                .out
                .lock()
                .map_err(|_| crate::Error::Synthesis("console writer poisoned".to_string()))?;
            writeln!(out, "» {text}")?;
            out.flush()?;
        }

        let events = self.events.clone();
        let duration = self.duration;
        self.current = Some(tokio::spawn(async move {
            if events.send(SynthesisEvent::Started(id).into()).await.is_err() {
                return;
            }
            tokio::time::sleep(duration).await;
            if events.send(SynthesisEvent::Done(id).into()).await.is_err() {
                tracing::trace!(id, "arbiter gone, synthesis completion dropped");
            }
        }));

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }
}
