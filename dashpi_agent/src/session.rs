//! `/ws` session: decodes client requests and keeps exactly one push task
//! running for the page the client is looking at.

use axum::extract::ws::Message;
use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::outbound::Outbound;
use crate::proto::{Command, DecodeError, Inbound, Page, RawRequest};
use crate::sampler::{spawn_sampler, PushTask};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Streaming(Page),
    /// The page's task was told to stop and is being awaited.
    Stopping(Page),
}

struct ActiveTask {
    page: Page,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

pub struct PageController {
    app: AppState,
    out: Outbound,
    active: Option<ActiveTask>,
    state: ControllerState,
}

impl PageController {
    pub fn new(app: AppState, out: Outbound) -> Self {
        Self {
            app,
            out,
            active: None,
            state: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn active_page(&self) -> Option<Page> {
        self.active.as_ref().map(|t| t.page)
    }

    pub async fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Switch(page) => self.switch_to(page).await,
            Inbound::Reassert => debug!("client still on {:?}", self.active_page()),
            Inbound::Command(cmd) => self.dispatch(cmd),
        }
    }

    /// Stops the running task (waiting until it has exited) and starts the
    /// one for `page`. A polling page that is already running is left alone.
    pub async fn switch_to(&mut self, page: Page) {
        if self.active_page() == Some(page) && page.is_polling() {
            debug!("{page} already streaming");
            return;
        }
        self.stop().await;

        info!("switching to {page}");
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_sampler(PushTask {
            page,
            out: self.out.clone(),
            state: self.app.clone(),
            cancel: cancel.clone(),
            commands: rx,
        });
        self.active = Some(ActiveTask {
            page,
            cancel,
            commands: tx,
            handle,
        });
        self.state = ControllerState::Streaming(page);
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.active.take() {
            self.state = ControllerState::Stopping(task.page);
            task.cancel.cancel();
            drop(task.commands);
            if let Err(e) = task.handle.await {
                warn!("push task for {} ended abnormally: {e}", task.page);
            }
        }
        self.state = ControllerState::Idle;
    }

    fn dispatch(&mut self, cmd: Command) {
        match &self.active {
            Some(task) => {
                if task.commands.send(cmd).is_err() {
                    warn!("push task for {} is gone, command dropped", task.page);
                }
            }
            None => warn!("command {cmd:?} with no active page dropped"),
        }
    }
}

/// Runs one control session until the client disconnects or the socket
/// fails; the push task is stopped before this returns.
pub async fn run_session<S, R>(sink: S, mut stream: R, app: AppState)
where
    S: Sink<Message, Error = axum::Error> + Send + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let out = Outbound::new(sink);
    let mut pages = PageController::new(app, out.clone());

    loop {
        let msg = match stream.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("couldn't get data from client: {e}");
                break;
            }
            None => break,
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Binary(_) => {
                warn!("dropping request: {}", DecodeError::Binary);
                continue;
            }
        };
        let inbound = match RawRequest::decode(&text).and_then(|r| r.classify(pages.active_page())) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("dropping request: {e}");
                continue;
            }
        };
        pages.handle(inbound).await;
    }

    pages.stop().await;
    if let Err(e) = out.close().await {
        debug!("socket already closed: {e}");
    }
    info!("session closed");
}
