mod actions;
mod api;
mod core;
mod history;
mod logging;
mod socket;
mod state;
mod updates;
mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use api::{ApiError, MessageRecord, SessionUser, UserRecord};
pub use state::*;
pub use updates::{AppUpdate, AppUpdateListener, CoreMsg, InternalEvent};
pub use wire::{ClientFrame, ServerEvent};

/// Handle to the app core. Construction spawns the single-threaded actor;
/// everything else is message passing against it.
pub struct App {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

impl App {
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "App::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core =
                crate::core::AppCore::new(update_tx, core_tx_for_core, data_dir, shared_for_core);
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, listener: Box<dyn AppUpdateListener>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                listener.update(update);
            }
        });
    }
}

impl App {
    /// Feed the core a frame as if it had arrived on the live socket.
    pub fn inject_socket_event_for_tests(&self, event: ServerEvent) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::InjectedSocketEvent { event },
        )));
    }

    /// Feed the core a directory snapshot without a server round trip.
    pub fn inject_users_for_tests(&self, users: Vec<UserRecord>) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::UsersFetched { result: Ok(users) },
        )));
    }

    /// Feed the core a failed directory fetch without a server round trip.
    pub fn inject_users_failure_for_tests(&self, error: ApiError) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::UsersFetched { result: Err(error) },
        )));
    }
}
