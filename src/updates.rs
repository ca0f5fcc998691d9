//! Messages in and out of the app core.
//!
//! `CoreMsg` is everything the single-threaded core consumes: UI actions and
//! the internal events its own IO tasks send back. `AppUpdate` is the typed
//! change stream the presentation layer subscribes to; each variant carries
//! the state revision it was emitted at so a listener can drop stale ones.

use crate::actions::AppAction;
use crate::api::{ApiError, CommentRecord, MessageRecord, PostRecord, SessionUser, UserRecord};
use crate::state::ConnectionState;
use crate::wire::ServerEvent;

pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Completion events from spawned IO tasks, plus socket lifecycle. All carry
/// enough context for the core to discard results that arrive after the state
/// they were fetched for is gone.
pub enum InternalEvent {
    // Socket lifecycle. `epoch` identifies which socket generation the event
    // came from; events from a superseded socket are ignored.
    SocketOpened {
        epoch: u64,
    },
    SocketClosed {
        epoch: u64,
    },
    SocketEvent {
        epoch: u64,
        event: ServerEvent,
    },
    /// Test-only ingress that bypasses the epoch check, for driving the core
    /// as if a live socket frame had arrived.
    InjectedSocketEvent {
        event: ServerEvent,
    },
    ReconnectDue,

    // Auth
    AuthProbed {
        result: Result<SessionUser, ApiError>,
    },
    LoginFinished {
        username: String,
        result: Result<SessionUser, ApiError>,
    },
    RegisterFinished {
        result: Result<(), ApiError>,
    },

    // Directory
    UsersFetched {
        result: Result<Vec<UserRecord>, ApiError>,
    },

    // Conversation history
    MessagesFetched {
        peer_id: i64,
        epoch: u64,
        initial: bool,
        result: Result<Vec<MessageRecord>, ApiError>,
    },
    MessagePersisted {
        peer_id: i64,
        local_seq: u64,
        result: Result<MessageRecord, ApiError>,
    },

    // Forum
    PostsFetched {
        initial: bool,
        result: Result<Vec<PostRecord>, ApiError>,
    },
    PostCreated {
        result: Result<(), ApiError>,
    },
    CommentsFetched {
        post_id: i64,
        initial: bool,
        result: Result<Vec<CommentRecord>, ApiError>,
    },
    CommentCreated {
        post_id: i64,
        result: Result<(), ApiError>,
    },

    // UI
    ToastExpired {
        token: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppUpdate {
    /// Full resync; sent once to each new listener.
    FullState { rev: u64 },
    RouterChanged { rev: u64 },
    AuthChanged { rev: u64 },
    BusyChanged { rev: u64 },
    ConnectionChanged { rev: u64, connection: ConnectionState },
    UsersChanged { rev: u64 },
    UnreadChanged { rev: u64 },
    PostsChanged { rev: u64 },
    CurrentPostChanged { rev: u64 },
    CurrentChatChanged { rev: u64 },
    /// Older history was prepended; the count lets the UI keep its scroll
    /// position anchored.
    OlderMessagesPrepended { rev: u64, peer_id: i64, count: usize },
    ToastChanged { rev: u64 },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState { rev }
            | AppUpdate::RouterChanged { rev }
            | AppUpdate::AuthChanged { rev }
            | AppUpdate::BusyChanged { rev }
            | AppUpdate::ConnectionChanged { rev, .. }
            | AppUpdate::UsersChanged { rev }
            | AppUpdate::UnreadChanged { rev }
            | AppUpdate::PostsChanged { rev }
            | AppUpdate::CurrentPostChanged { rev }
            | AppUpdate::CurrentChatChanged { rev }
            | AppUpdate::OlderMessagesPrepended { rev, .. }
            | AppUpdate::ToastChanged { rev } => *rev,
        }
    }
}

pub trait AppUpdateListener: Send + Sync + 'static {
    fn update(&self, update: AppUpdate);
}
