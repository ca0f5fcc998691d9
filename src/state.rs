use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub router: Router,
    pub auth: AuthState,
    pub busy: BusyState,
    pub connection: ConnectionState,
    pub users: Vec<UserEntry>,
    /// peer id -> messages received while that conversation was not open.
    /// Survives directory refreshes; the UI joins this with `users`.
    pub unread_counts: HashMap<i64, u32>,
    pub post_feed: PostFeedState,
    pub current_post: Option<PostViewState>,
    pub current_chat: Option<ChatViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            router: Router {
                default_screen: Screen::Login,
                screen_stack: vec![],
            },
            auth: AuthState::LoggedOut,
            busy: BusyState::idle(),
            connection: ConnectionState::Disconnected,
            users: vec![],
            unread_counts: HashMap::new(),
            post_feed: PostFeedState::empty(),
            current_post: None,
            current_chat: None,
            toast: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Router {
    pub default_screen: Screen,
    pub screen_stack: Vec<Screen>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    Login,
    Register,
    Forum,
    Post { post_id: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { user_id: i64, username: String },
}

/// "In flight" flags for operations the UI should reflect with a spinner.
/// Doubles as the reentrancy guard for wholesale refreshes: a second
/// refresh dispatched while one is in flight is suppressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub logging_in: bool,
    pub registering: bool,
    pub refreshing_users: bool,
    pub loading_posts: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            logging_in: false,
            registering: false,
            refreshing_users: false,
            loading_posts: false,
        }
    }
}

/// Lifecycle of the single live socket. One per session; owned by the
/// connection manager task, observed by everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserEntry {
    pub id: i64,
    pub username: String,
    pub online: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Confirmed,
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-assigned id; `None` until the server confirms the record.
    pub id: Option<i64>,
    /// Actor-local identity for optimistic entries, so a pending message can
    /// be resolved precisely when its own POST completes.
    pub local_seq: Option<u64>,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_mine: bool,
    pub delivery: MessageDeliveryState,
}

#[derive(Clone, Debug)]
pub struct ChatViewState {
    pub peer_id: i64,
    pub peer_username: String,
    /// Oldest-first for display.
    pub messages: Vec<ChatMessage>,
    pub can_load_older: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub content: String,
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct PostFeedState {
    pub posts: Vec<Post>,
    pub can_load_older: bool,
}

impl PostFeedState {
    pub fn empty() -> Self {
        Self {
            posts: vec![],
            can_load_older: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PostViewState {
    pub post: Post,
    /// Oldest-first for display.
    pub comments: Vec<Comment>,
    pub can_load_older: bool,
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
