//! Monitor loop
//!
//! Blocks on the next kernel event, the check interval, control commands and
//! the run deadline, and handles whichever comes first. Everything runs on the
//! calling task, so the checker never sees the cache mid-update.

use crate::error::{Result, WatchError};
use crate::escape::{dump_to_log, EscapeHatch};
use crate::platform::KernelWatcher;
use crate::reconcile::{Flow, Reconciler};
use dtree_core::{DtreeConfig, Event};
use std::future;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Control command, one per input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `c`: run a consistency check
    Check,

    /// `d`: dump the cache to the log
    Dump,

    /// `r`: rebuild the cache from scratch
    Rebuild,

    /// `p <path>`: print the watch id cached for a path
    Lookup(PathBuf),

    /// `q`: stop monitoring
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        let (verb, argument) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match (verb, argument) {
            ("c", "") => Ok(Command::Check),
            ("d", "") => Ok(Command::Dump),
            ("r", "") => Ok(Command::Rebuild),
            ("q", "") => Ok(Command::Quit),
            ("p", "") => anyhow::bail!("p needs a path"),
            ("p", path) => Ok(Command::Lookup(PathBuf::from(path))),
            _ => anyhow::bail!("unknown command {:?} (expected c, d, r, p <path> or q)", line),
        }
    }
}

/// Why monitoring stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every root was deleted, renamed away or unmounted
    RootsExhausted,

    Quit,

    /// The configured run duration passed
    DeadlineReached,

    /// The configured number of periodic checks ran
    ChecksCompleted,

    /// The event source ended
    SourceClosed,
}

/// Loop timing and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub rename_window: Duration,

    /// Periodic check interval, if any
    pub check_interval: Option<Duration>,

    /// Stop after this many periodic checks
    pub max_checks: Option<u64>,

    /// Stop after running this long
    pub duration: Option<Duration>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from(&DtreeConfig::default())
    }
}

impl From<&DtreeConfig> for MonitorOptions {
    fn from(config: &DtreeConfig) -> Self {
        Self {
            rename_window: config.rename_window(),
            check_interval: config.check_interval(),
            max_checks: config.max_checks(),
            duration: config.duration(),
        }
    }
}

/// What woke the loop
enum Wake {
    Event(Event),
    RenameWindowElapsed,
    SourceClosed,
    CheckDue,
    Command(Option<Command>),
    Deadline,
}

/// Event loop around a started `Reconciler`
pub struct Monitor<W: KernelWatcher> {
    reconciler: Reconciler<W>,
    escape: EscapeHatch,
    options: MonitorOptions,
    checks_run: u64,
}

impl<W: KernelWatcher> Monitor<W> {
    pub fn new(reconciler: Reconciler<W>, escape: EscapeHatch, options: MonitorOptions) -> Self {
        Self {
            reconciler,
            escape,
            options,
            checks_run: 0,
        }
    }

    /// Monitor until an `Outcome` is reached
    ///
    /// A divergence takes the escape hatch and never returns. Other errors
    /// are returned to the caller.
    pub async fn run(&mut self, commands: mpsc::Receiver<Command>) -> anyhow::Result<Outcome> {
        match self.run_until_divergence(commands).await {
            Ok(outcome) => {
                tracing::info!("monitoring stopped: {:?}", outcome);
                Ok(outcome)
            }
            Err(WatchError::Divergence(reason)) => {
                self.escape.engage(self.reconciler.cache(), &reason)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Monitor until an `Outcome` or an error, divergence included
    pub async fn run_until_divergence(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
    ) -> Result<Outcome> {
        if self.reconciler.flow() == Flow::RootsExhausted {
            return Ok(Outcome::RootsExhausted);
        }

        let deadline = self.options.duration.map(|d| Instant::now() + d);
        let mut checks = self.options.check_interval.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut commands_open = true;

        loop {
            let rename_wait = self.reconciler.rename_wait(self.options.rename_window);

            let wake = tokio::select! {
                next = next_event(self.reconciler.watcher_mut(), rename_wait) => next?,
                _ = tick(&mut checks) => Wake::CheckDue,
                command = commands.recv(), if commands_open => Wake::Command(command),
                _ = sleep_until(deadline) => Wake::Deadline,
            };

            let outcome = match wake {
                Wake::Event(event) => match self.reconciler.handle_event(event)? {
                    Flow::Continue => None,
                    Flow::RootsExhausted => Some(Outcome::RootsExhausted),
                },
                Wake::RenameWindowElapsed => {
                    self.reconciler.expire_pending_moves();
                    None
                }
                Wake::SourceClosed => Some(Outcome::SourceClosed),
                Wake::CheckDue => self.periodic_check()?,
                Wake::Command(Some(command)) => self.execute(command)?,
                Wake::Command(None) => {
                    tracing::debug!("control input closed");
                    commands_open = false;
                    None
                }
                Wake::Deadline => Some(Outcome::DeadlineReached),
            };

            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    fn periodic_check(&mut self) -> Result<Option<Outcome>> {
        self.reconciler.check()?;
        self.checks_run += 1;

        if self.reconciler.flow() == Flow::RootsExhausted {
            return Ok(Some(Outcome::RootsExhausted));
        }
        match self.options.max_checks {
            Some(max) if self.checks_run >= max => Ok(Some(Outcome::ChecksCompleted)),
            _ => Ok(None),
        }
    }

    fn execute(&mut self, command: Command) -> Result<Option<Outcome>> {
        tracing::debug!("command {:?}", command);

        match command {
            Command::Check => {
                self.reconciler.check()?;
            }
            Command::Dump => dump_to_log(self.reconciler.cache(), false),
            Command::Rebuild => {
                self.reconciler.rebuild()?;
            }
            Command::Lookup(path) => match self.reconciler.lookup(&path) {
                Some(watch_id) => tracing::info!("{}: watch {}", path.display(), watch_id),
                None => tracing::info!("{}: not in the cache", path.display()),
            },
            Command::Quit => return Ok(Some(Outcome::Quit)),
        }

        match self.reconciler.flow() {
            Flow::Continue => Ok(None),
            Flow::RootsExhausted => Ok(Some(Outcome::RootsExhausted)),
        }
    }

    /// Periodic checks completed so far
    pub fn checks_run(&self) -> u64 {
        self.checks_run
    }

    pub fn reconciler(&self) -> &Reconciler<W> {
        &self.reconciler
    }
}

/// Next event, bounded by the rename window while a rename is pending
async fn next_event<W: KernelWatcher>(watcher: &mut W, rename_wait: Option<Duration>) -> Result<Wake> {
    match rename_wait {
        Some(wait) => Ok(match watcher.next_event_within(wait).await? {
            Some(event) => Wake::Event(event),
            None => Wake::RenameWindowElapsed,
        }),
        None => Ok(match watcher.next_event().await? {
            Some(event) => Wake::Event(event),
            None => Wake::SourceClosed,
        }),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
