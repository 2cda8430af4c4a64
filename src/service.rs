//! Manager service
//!
//! Runs a [`UsageManager`] on a single coordination task. The task drives the
//! poll timer, executes commands sent through a [`ManagerHandle`], and merges
//! fetch outcomes that spawned fetch tasks send back over a channel. Nothing
//! else ever touches the manager, so state updates never race.

use quotabar_core::config::{ProviderConfigMap, ProviderInstanceConfig};
use quotabar_core::error::{QuotabarError, Result};
use quotabar_core::provider::FetchResult;
use quotabar_core::types::InstanceId;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::manager::{CycleSummary, FetchJob, ManagerEvent, ManagerState, UsageManager};
use crate::sorting::SortMode;

const COMMAND_CAPACITY: usize = 32;
const OUTCOME_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    RefreshAll,
    Refresh(String),
    SetEnabled {
        id: String,
        enabled: bool,
        reply: Reply<()>,
    },
    Add {
        type_id: String,
        label: Option<String>,
        config: ProviderConfigMap,
        reply: Reply<InstanceId>,
    },
    Update {
        config: ProviderInstanceConfig,
        reply: Reply<()>,
    },
    Remove {
        id: String,
        reply: Reply<()>,
    },
    Reorder {
        ids: Vec<String>,
        reply: Reply<()>,
    },
    SetPollInterval {
        interval: Duration,
        reply: Reply<Duration>,
    },
    SetSortMode {
        mode: SortMode,
        reply: Reply<()>,
    },
    State(oneshot::Sender<ManagerState>),
    Shutdown,
}

/// Cheap, cloneable access to a running [`ManagerService`]
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ManagerEvent>,
}

impl ManagerHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| QuotabarError::ServiceStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| QuotabarError::ServiceStopped)?
    }

    /// Start a poll cycle now
    pub async fn refresh_all(&self) -> Result<()> {
        self.send(Command::RefreshAll).await
    }

    /// Fetch one instance now
    pub async fn refresh(&self, id: &str) -> Result<()> {
        self.send(Command::Refresh(id.to_string())).await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| Command::SetEnabled { id, enabled, reply })
            .await
    }

    pub async fn add_instance(
        &self,
        type_id: &str,
        label: Option<&str>,
        config: ProviderConfigMap,
    ) -> Result<InstanceId> {
        let type_id = type_id.to_string();
        let label = label.map(str::to_string);
        self.request(|reply| Command::Add {
            type_id,
            label,
            config,
            reply,
        })
        .await
    }

    pub async fn update_instance(&self, config: ProviderInstanceConfig) -> Result<()> {
        self.request(|reply| Command::Update { config, reply }).await
    }

    pub async fn remove_instance(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| Command::Remove { id, reply }).await
    }

    pub async fn reorder_instances(&self, ids: Vec<String>) -> Result<()> {
        self.request(|reply| Command::Reorder { ids, reply }).await
    }

    /// Change the poll interval, restarting the timer
    pub async fn set_poll_interval(&self, interval: Duration) -> Result<Duration> {
        self.request(|reply| Command::SetPollInterval { interval, reply })
            .await
    }

    pub async fn set_sort_mode(&self, mode: SortMode) -> Result<()> {
        self.request(|reply| Command::SetSortMode { mode, reply })
            .await
    }

    /// Snapshot of the manager's current state
    pub async fn state(&self) -> Result<ManagerState> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::State(tx)).await?;
        rx.await.map_err(|_| QuotabarError::ServiceStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Stop the service loop
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

/// Outcomes of the poll cycle currently being collected
#[derive(Default)]
struct CycleProgress {
    pending: HashSet<InstanceId>,
    summary: CycleSummary,
}

/// Coordination task owning a [`UsageManager`]
pub struct ManagerService {
    manager: UsageManager,
    commands: mpsc::Receiver<Command>,
    outcome_tx: mpsc::Sender<(InstanceId, FetchResult)>,
    outcomes: mpsc::Receiver<(InstanceId, FetchResult)>,
    cycle: Option<CycleProgress>,
}

impl ManagerService {
    /// Wrap a started manager; returns the service and a handle to it
    pub fn new(manager: UsageManager) -> (Self, ManagerHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (outcome_tx, outcomes) = mpsc::channel(OUTCOME_CAPACITY);
        let handle = ManagerHandle {
            commands: command_tx,
            events: manager.event_sender(),
        };
        let service = Self {
            manager,
            commands,
            outcome_tx,
            outcomes,
            cycle: None,
        };
        (service, handle)
    }

    /// Spawn the service loop on the runtime
    pub fn spawn(manager: UsageManager) -> (ManagerHandle, JoinHandle<UsageManager>) {
        let (service, handle) = Self::new(manager);
        (handle, tokio::spawn(service.run()))
    }

    /// Run until shutdown or until every handle is dropped; returns the manager
    pub async fn run(mut self) -> UsageManager {
        let mut period = self.manager.store().poll_interval();
        // First tick fires immediately so startup polls right away
        let mut ticker = poll_timer(period, Instant::now());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.start_cycle();
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All manager handles dropped");
                        break;
                    };
                    match command {
                        Command::Shutdown => break,
                        Command::SetPollInterval { interval, reply } => {
                            let result = self.manager.set_poll_interval(interval);
                            if let Ok(new_period) = result
                                && new_period != period
                            {
                                info!("Poll interval changed to {}s", new_period.as_secs());
                                period = new_period;
                                ticker = poll_timer_after(period);
                            }
                            let _ = reply.send(result);
                        }
                        other => self.handle(other),
                    }
                }
                Some((id, result)) = self.outcomes.recv() => {
                    self.finish_fetch(id, result);
                }
            }
        }

        info!("Manager service stopped");
        self.manager
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RefreshAll => self.start_cycle(),
            Command::Refresh(id) => {
                if let Some(job) = self.manager.start_fetch(&id) {
                    self.dispatch(job);
                }
            }
            Command::SetEnabled { id, enabled, reply } => {
                let result = self.manager.set_enabled(&id, enabled);
                let _ = reply.send(self.dispatch_result(result));
            }
            Command::Add {
                type_id,
                label,
                config,
                reply,
            } => {
                let result = self
                    .manager
                    .add_instance(&type_id, label.as_deref(), config)
                    .map(|(id, job)| {
                        if let Some(job) = job {
                            self.dispatch(job);
                        }
                        id
                    });
                let _ = reply.send(result);
            }
            Command::Update { config, reply } => {
                let result = self.manager.update_instance(config);
                let _ = reply.send(self.dispatch_result(result));
            }
            Command::Remove { id, reply } => {
                if let Some(cycle) = &mut self.cycle {
                    cycle.pending.remove(id.as_str());
                }
                let _ = reply.send(self.manager.remove_instance(&id));
                self.maybe_complete_cycle();
            }
            Command::Reorder { ids, reply } => {
                let _ = reply.send(self.manager.reorder_instances(&ids));
            }
            Command::SetSortMode { mode, reply } => {
                let _ = reply.send(self.manager.set_sort_mode(mode));
            }
            Command::State(reply) => {
                let _ = reply.send(self.manager.state());
            }
            // Handled in the loop
            Command::SetPollInterval { .. } | Command::Shutdown => {}
        }
    }

    fn dispatch_result(&self, result: Result<Option<FetchJob>>) -> Result<()> {
        if let Some(job) = result? {
            self.dispatch(job);
        }
        Ok(())
    }

    fn start_cycle(&mut self) {
        let jobs = self.manager.begin_cycle();
        info!("Polling {} instances", jobs.len());
        let cycle = self.cycle.get_or_insert_with(CycleProgress::default);
        cycle.pending.extend(jobs.iter().map(|job| job.id().clone()));
        for job in jobs {
            self.dispatch(job);
        }
        self.maybe_complete_cycle();
    }

    fn dispatch(&self, job: FetchJob) {
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = job.run_isolated().await;
            // The service may have stopped meanwhile
            let _ = tx.send(outcome).await;
        });
    }

    fn finish_fetch(&mut self, id: InstanceId, result: FetchResult) {
        let in_cycle = self
            .cycle
            .as_mut()
            .is_some_and(|cycle| cycle.pending.remove(&id));
        let succeeded = self.manager.apply_outcome(id, result);
        if in_cycle && let Some(cycle) = &mut self.cycle {
            if succeeded {
                cycle.summary.succeeded += 1;
            } else {
                cycle.summary.failed += 1;
            }
        }
        self.maybe_complete_cycle();
    }

    fn maybe_complete_cycle(&mut self) {
        if self.cycle.as_ref().is_some_and(|c| c.pending.is_empty())
            && let Some(cycle) = self.cycle.take()
        {
            self.manager.complete_cycle(cycle.summary);
        }
    }
}

fn poll_timer(period: Duration, start: Instant) -> Interval {
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Timer restarted after an interval change: next tick one period from now
fn poll_timer_after(period: Duration) -> Interval {
    poll_timer(period, Instant::now() + period)
}
