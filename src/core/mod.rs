mod chat;
mod config;
mod forum;
mod session;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flume::Sender;
use tokio::sync::mpsc::UnboundedSender;

use crate::actions::AppAction;
use crate::api::{ApiClient, ApiError, MessageRecord, SessionUser};
use crate::history::Conversation;
use crate::socket::ReconnectPolicy;
use crate::state::{
    AppState, AuthState, BusyState, ChatMessage, ChatViewState, ConnectionState,
    MessageDeliveryState, Screen,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};
use crate::wire::{ClientFrame, ServerEvent};

struct SocketHandle {
    epoch: u64,
    outbound: UnboundedSender<ClientFrame>,
}

struct Session {
    user_id: i64,
    username: String,
    socket: Option<SocketHandle>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    outbox_seq: u64,
    toast_token: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    data_dir: String,
    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    api: ApiClient,

    session: Option<Session>,
    // Which socket generation is current; events from older ones are ignored.
    socket_epoch: u64,
    reconnect: ReconnectPolicy,

    // Per-peer history, kept across conversation switches.
    history: HashMap<i64, Conversation>,

    checking_auth: bool,
    posts_offset: usize,
    loading_older_posts: bool,
    comments_offset: usize,
    loading_older_comments: bool,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = AppState::empty();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let api = ApiClient::new(config.base_url());
        let reconnect = ReconnectPolicy::new(config.reconnect_delay());

        let this = Self {
            state,
            rev: 0,
            outbox_seq: 0,
            toast_token: 0,
            update_sender,
            core_sender,
            shared_state,
            data_dir,
            config,
            runtime,
            api,
            session: None,
            socket_epoch: 0,
            reconnect,
            history: HashMap::new(),
            checking_auth: false,
            posts_offset: 0,
            loading_older_posts: false,
            comments_offset: 0,
            loading_older_comments: false,
        };

        // Ensure App.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    /// Bump the revision, publish the snapshot, then send the typed update.
    fn emit(&mut self, f: impl FnOnce(u64) -> AppUpdate) {
        let rev = self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(f(rev));
    }

    fn emit_full(&mut self) {
        self.emit(|rev| AppUpdate::FullState { rev });
    }

    fn emit_router(&mut self) {
        self.emit(|rev| AppUpdate::RouterChanged { rev });
    }

    fn emit_auth(&mut self) {
        self.emit(|rev| AppUpdate::AuthChanged { rev });
    }

    fn emit_busy(&mut self) {
        self.emit(|rev| AppUpdate::BusyChanged { rev });
    }

    fn emit_connection(&mut self) {
        let connection = self.state.connection;
        self.emit(move |rev| AppUpdate::ConnectionChanged { rev, connection });
    }

    fn emit_users(&mut self) {
        self.emit(|rev| AppUpdate::UsersChanged { rev });
    }

    fn emit_unread(&mut self) {
        self.emit(|rev| AppUpdate::UnreadChanged { rev });
    }

    fn emit_posts(&mut self) {
        self.emit(|rev| AppUpdate::PostsChanged { rev });
    }

    fn emit_current_post(&mut self) {
        self.emit(|rev| AppUpdate::CurrentPostChanged { rev });
    }

    fn emit_current_chat(&mut self) {
        self.emit(|rev| AppUpdate::CurrentChatChanged { rev });
    }

    fn emit_toast(&mut self) {
        self.emit(|rev| AppUpdate::ToastChanged { rev });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        self.state.toast = Some(msg.into());
        self.toast_token = self.toast_token.wrapping_add(1);
        self.emit_toast();

        // Auto-expire; a newer toast invalidates the timer via the token.
        let token = self.toast_token;
        let ttl = self.config.toast_ttl();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ToastExpired {
                token,
            })));
        });
    }

    fn clear_toast(&mut self) {
        self.toast_token = self.toast_token.wrapping_add(1);
        if self.state.toast.take().is_some() {
            self.emit_toast();
        }
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_busy();
        }
    }

    fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Our own user id while logged in.
    fn me(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.user_id)
    }

    fn push_screen(&mut self, screen: Screen) {
        if self.state.router.screen_stack.last() != Some(&screen) {
            self.state.router.screen_stack.push(screen);
            self.emit_router();
        }
    }

    fn update_screen_stack(&mut self, stack: Vec<Screen>) {
        self.state.router.screen_stack = stack;
        self.emit_router();
        self.sync_current_post_to_router();
    }

    /// The post view is router-derived: it tracks whatever `Screen::Post` is
    /// on top of the stack.
    fn sync_current_post_to_router(&mut self) {
        match self.state.router.screen_stack.last().cloned() {
            Some(Screen::Post { post_id }) => {
                let needs_load = self
                    .state
                    .current_post
                    .as_ref()
                    .map(|p| p.post.id != post_id)
                    .unwrap_or(true);
                if needs_load {
                    self.load_post(post_id);
                }
            }
            _ => {
                if self.state.current_post.is_some() {
                    self.state.current_post = None;
                    self.emit_current_post();
                }
            }
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can contain credentials.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::CheckAuth => self.check_auth(),
            AppAction::Login { username, password } => self.login(username, password),
            AppAction::Register {
                username,
                email,
                password,
                first_name,
                last_name,
                gender,
            } => self.register(username, email, password, first_name, last_name, gender),
            AppAction::Logout => self.logout(),

            AppAction::PushScreen { screen } => {
                self.push_screen(screen);
                self.sync_current_post_to_router();
            }
            AppAction::UpdateScreenStack { stack } => self.update_screen_stack(stack),

            AppAction::RefreshUsers => self.refresh_users(),
            AppAction::OpenConversation { peer_id } => self.open_conversation(peer_id),
            AppAction::CloseConversation => self.close_conversation(),
            AppAction::SendMessage { peer_id, content } => self.send_message(peer_id, content),
            AppAction::LoadOlderMessages { peer_id } => self.load_older_messages(peer_id),

            AppAction::LoadPosts => self.refresh_posts(),
            AppAction::LoadOlderPosts => self.load_older_posts(),
            AppAction::CreatePost {
                title,
                content,
                categories,
            } => self.create_post(title, content, categories),
            AppAction::OpenPost { post_id } => self.open_post(post_id),
            AppAction::ClosePost => self.close_post(),
            AppAction::LoadOlderComments => self.load_older_comments(),
            AppAction::CreateComment { content } => self.create_comment(content),

            AppAction::ClearToast => self.clear_toast(),
            AppAction::Foregrounded => self.foregrounded(),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::SocketOpened { epoch } => self.on_socket_opened(epoch),
            InternalEvent::SocketClosed { epoch } => self.on_socket_closed(epoch),
            InternalEvent::SocketEvent { epoch, event } => {
                if epoch != self.socket_epoch {
                    return;
                }
                self.on_socket_event(event);
            }
            InternalEvent::InjectedSocketEvent { event } => self.on_socket_event(event),
            InternalEvent::ReconnectDue => self.on_reconnect_due(),

            InternalEvent::AuthProbed { result } => self.on_auth_probed(result),
            InternalEvent::LoginFinished { username, result } => {
                self.on_login_finished(username, result)
            }
            InternalEvent::RegisterFinished { result } => self.on_register_finished(result),

            InternalEvent::UsersFetched { result } => self.on_users_fetched(result),

            InternalEvent::MessagesFetched {
                peer_id,
                epoch,
                initial,
                result,
            } => self.on_messages_fetched(peer_id, epoch, initial, result),
            InternalEvent::MessagePersisted {
                peer_id,
                local_seq,
                result,
            } => self.on_message_persisted(peer_id, local_seq, result),

            InternalEvent::PostsFetched { initial, result } => {
                self.on_posts_fetched(initial, result)
            }
            InternalEvent::PostCreated { result } => self.on_post_created(result),
            InternalEvent::CommentsFetched {
                post_id,
                initial,
                result,
            } => self.on_comments_fetched(post_id, initial, result),
            InternalEvent::CommentCreated { post_id, result } => {
                self.on_comment_created(post_id, result)
            }

            InternalEvent::ToastExpired { token } => {
                if token == self.toast_token && self.state.toast.take().is_some() {
                    self.emit_toast();
                }
            }
        }
    }

    /// The server rejected the session cookie on a protected call.
    fn force_logout(&mut self) {
        tracing::warn!("session rejected by server, logging out");
        self.stop_session();
        self.toast("Session expired, please log in again");
    }

    fn foregrounded(&mut self) {
        if !self.is_logged_in() {
            return;
        }
        // If a reconnect timer is already armed, let it do its job instead of
        // racing it with an immediate attempt.
        if matches!(
            self.state.connection,
            ConnectionState::Closed | ConnectionState::Disconnected
        ) && !self.reconnect.pending()
        {
            self.connect_socket();
        }
        self.refresh_users();
    }
}
