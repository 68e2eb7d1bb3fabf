//! Per-page push tasks. Each one owns a cancellation token and a command
//! inbox and writes only through the session's [`Outbound`].

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{
    collect_host, collect_processes, collect_services, collect_software, collect_stats,
    MetricSource,
};
use crate::outbound::{Outbound, OutboundError};
use crate::proto::{Command, Page};
use crate::state::AppState;
use crate::types::{ProcessList, ServiceList, SoftwareList};

pub struct PushTask {
    pub page: Page,
    pub out: Outbound,
    pub state: AppState,
    pub cancel: CancellationToken,
    pub commands: mpsc::UnboundedReceiver<Command>,
}

pub fn spawn_sampler(task: PushTask) -> JoinHandle<()> {
    tokio::spawn(async move {
        let page = task.page;
        debug!("push task for {page} started");
        match page {
            Page::Stats => stats_loop(task).await,
            Page::Process => process_loop(task).await,
            Page::Software => software_loop(task).await,
            Page::Service => service_loop(task).await,
            Page::Management => management_loop(task).await,
        }
        debug!("push task for {page} stopped");
    })
}

// Collection blocks for the sampling window, so it runs off the runtime
// threads. A panicking collector costs one tick, not the task.
async fn sample<T, F>(source: &Arc<dyn MetricSource>, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn MetricSource) -> T + Send + 'static,
{
    let source = Arc::clone(source);
    match tokio::task::spawn_blocking(move || f(source.as_ref())).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("sampling task failed: {e}");
            None
        }
    }
}

// Best effort: a failed send is logged and the loop carries on; socket
// teardown reaches us through the cancellation token.
async fn push<T: Serialize>(out: &Outbound, page: Page, payload: &T) {
    match out.send_json(payload).await {
        Ok(()) => {}
        Err(OutboundError::Encode(e)) => warn!("couldn't serialize {page} payload, skipping: {e}"),
        Err(e) => warn!("{page}: {e}"),
    }
}

async fn stats_loop(task: PushTask) {
    loop {
        let snap = sample(&task.state.source, collect_stats).await;
        if task.cancel.is_cancelled() {
            break;
        }
        if let Some(snap) = snap {
            push(&task.out, task.page, &snap).await;
        }
        if task.cancel.is_cancelled() {
            break;
        }
    }
}

async fn process_loop(mut task: PushTask) {
    loop {
        let processes = sample(&task.state.source, collect_processes).await;
        if task.cancel.is_cancelled() {
            break;
        }
        if let Some(processes) = processes {
            push(&task.out, task.page, &ProcessList { processes }).await;
        }
        if task.cancel.is_cancelled() {
            break;
        }
        while let Ok(cmd) = task.commands.try_recv() {
            run_signal(&task.state, cmd).await;
        }
    }
}

async fn run_signal(state: &AppState, cmd: Command) {
    let (pid, signal) = match cmd {
        Command::Signal { pid, signal } => (pid, signal),
        other => {
            debug!("ignoring {other:?} on {}", Page::Process);
            return;
        }
    };
    let executor = Arc::clone(&state.executor);
    match tokio::task::spawn_blocking(move || executor.signal_process(pid, signal)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("couldn't signal process {pid}: {e:#}"),
        Err(e) => warn!("signal task failed: {e}"),
    }
}

// Waits for the next command; None once cancelled or the inbox is closed.
async fn next_command(task: &mut PushTask) -> Option<Command> {
    tokio::select! {
        biased;
        _ = task.cancel.cancelled() => None,
        cmd = task.commands.recv() => cmd,
    }
}

// Runs a command and its follow-up listing off the runtime. None when the
// page changed first: the job still runs to completion, only the reply is
// dropped.
async fn run_job<T, F>(task: &PushTask, what: &str, job: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(job);
    tokio::select! {
        biased;
        _ = task.cancel.cancelled() => {
            info!("page changed while {what} was running, reply dropped");
            None
        }
        r = handle => match r {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("{what} task failed: {e}");
                None
            }
        },
    }
}

async fn software_loop(mut task: PushTask) {
    let software = sample(&task.state.source, collect_software)
        .await
        .unwrap_or_default();
    if task.cancel.is_cancelled() {
        return;
    }
    let initial = SoftwareList {
        software,
        response: String::new(),
    };
    push(&task.out, task.page, &initial).await;

    while let Some(cmd) = next_command(&mut task).await {
        let (action, args) = match cmd {
            Command::Software { action, args } => (action, args),
            other => {
                debug!("ignoring {other:?} on {}", task.page);
                continue;
            }
        };
        let state = task.state.clone();
        let job = move || {
            let output =
                state
                    .executor
                    .run_software_command(&state.config.software_tool, action, &args);
            (output, collect_software(state.source.as_ref()))
        };
        let Some((output, software)) = run_job(&task, action.as_str(), job).await else {
            if task.cancel.is_cancelled() {
                break;
            }
            continue;
        };
        let response = output.unwrap_or_else(|e| {
            warn!("software command failed: {e:#}");
            format!("{e:#}")
        });
        push(&task.out, task.page, &SoftwareList { software, response }).await;
    }
}

async fn service_loop(mut task: PushTask) {
    let services = sample(&task.state.source, collect_services)
        .await
        .unwrap_or_default();
    if task.cancel.is_cancelled() {
        return;
    }
    push(&task.out, task.page, &ServiceList { services }).await;

    while let Some(cmd) = next_command(&mut task).await {
        let (action, unit) = match cmd {
            Command::Service { action, unit } => (action, unit),
            other => {
                debug!("ignoring {other:?} on {}", task.page);
                continue;
            }
        };
        let state = task.state.clone();
        let job = move || {
            match state.executor.run_service_command(action, &unit) {
                Ok(output) => debug!("systemctl {} {unit}: {}", action.as_str(), output.trim_end()),
                Err(e) => warn!("couldn't {} {unit}: {e:#}", action.as_str()),
            }
            collect_services(state.source.as_ref())
        };
        let Some(services) = run_job(&task, action.as_str(), job).await else {
            if task.cancel.is_cancelled() {
                break;
            }
            continue;
        };
        push(&task.out, task.page, &ServiceList { services }).await;
    }
}

async fn management_loop(mut task: PushTask) {
    let host = sample(&task.state.source, collect_host).await.unwrap_or_default();
    if task.cancel.is_cancelled() {
        return;
    }
    push(&task.out, task.page, &host).await;

    while let Some(cmd) = next_command(&mut task).await {
        let verb = match cmd {
            Command::Power(verb) => verb,
            other => {
                debug!("ignoring {other:?} on {}", task.page);
                continue;
            }
        };
        // fire and forget: the host going down ends the connection for us
        if let Err(e) = task.state.executor.run_power_command(verb) {
            warn!("power action {} failed: {e:#}", verb.as_str());
        }
    }
}
