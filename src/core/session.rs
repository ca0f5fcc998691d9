// Session lifecycle: auth flows, the identity cache, and the socket.

use std::path::PathBuf;

use super::*;

impl AppCore {
    fn identity_cache_path(&self) -> PathBuf {
        std::path::Path::new(&self.data_dir).join("agora_session.json")
    }

    pub(super) fn load_cached_identity(&self) -> Option<SessionUser> {
        let bytes = std::fs::read(self.identity_cache_path()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn save_cached_identity(&self, user: &SessionUser) {
        if let Err(err) = self.try_save_cached_identity(user) {
            tracing::warn!(%err, "identity cache write failed");
        }
    }

    fn try_save_cached_identity(&self, user: &SessionUser) -> anyhow::Result<()> {
        let json = serde_json::to_string(user)?;
        std::fs::write(self.identity_cache_path(), json)?;
        Ok(())
    }

    fn clear_cached_identity(&self) {
        let _ = std::fs::remove_file(self.identity_cache_path());
    }

    pub(super) fn check_auth(&mut self) {
        if self.checking_auth || self.is_logged_in() {
            return;
        }

        if !self.network_enabled() {
            match self.load_cached_identity() {
                Some(user) => self.start_session(user),
                None => {
                    self.state.auth = AuthState::LoggedOut;
                    self.state.router.default_screen = Screen::Login;
                    self.emit_auth();
                }
            }
            return;
        }

        self.checking_auth = true;
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.check_auth().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::AuthProbed {
                result,
            })));
        });
    }

    pub(super) fn on_auth_probed(&mut self, result: Result<SessionUser, ApiError>) {
        self.checking_auth = false;
        match result {
            Ok(user) => self.start_session(user),
            Err(ApiError::Unauthorized) => {
                self.clear_cached_identity();
                self.state.auth = AuthState::LoggedOut;
                self.state.router.default_screen = Screen::Login;
                self.state.router.screen_stack.clear();
                self.emit_auth();
                self.emit_router();
            }
            Err(err) => {
                // Server unreachable: resume from the cached identity if we
                // have one so the app still opens to local state.
                tracing::warn!(%err, "auth probe failed");
                match self.load_cached_identity() {
                    Some(user) => self.start_session(user),
                    None => {
                        self.state.router.default_screen = Screen::Login;
                        self.emit_router();
                        self.toast("Could not reach server");
                    }
                }
            }
        }
    }

    pub(super) fn login(&mut self, username: String, password: String) {
        let username = username.trim().to_string();
        if username.is_empty() || password.is_empty() {
            self.toast("Username and password are required");
            return;
        }
        if self.state.busy.logging_in {
            return;
        }

        if !self.network_enabled() {
            let user = SessionUser {
                id: synthetic_user_id(&username),
                username,
            };
            self.start_session(user);
            return;
        }

        self.set_busy(|b| b.logging_in = true);
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            // The login endpoint only sets the cookie; probe for the identity.
            let result = match api.login(&username, &password).await {
                Ok(()) => api.check_auth().await,
                Err(err) => Err(err),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::LoginFinished {
                username,
                result,
            })));
        });
    }

    pub(super) fn on_login_finished(&mut self, username: String, result: Result<SessionUser, ApiError>) {
        self.set_busy(|b| b.logging_in = false);
        match result {
            Ok(user) => self.start_session(user),
            Err(ApiError::Unauthorized) => self.toast("Invalid username or password"),
            Err(err) => {
                tracing::warn!(user = %username, %err, "login failed");
                self.toast(format!("Login failed: {err}"));
            }
        }
    }

    pub(super) fn register(
        &mut self,
        username: String,
        email: String,
        password: String,
        first_name: String,
        last_name: String,
        gender: String,
    ) {
        let username = username.trim().to_string();
        let email = email.trim().to_string();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            self.toast("Username, email and password are required");
            return;
        }
        if !email.contains('@') {
            self.toast("That email address doesn't look valid");
            return;
        }
        if self.state.busy.registering {
            return;
        }

        if !self.network_enabled() {
            self.state.router.default_screen = Screen::Login;
            self.state.router.screen_stack.clear();
            self.emit_router();
            self.toast("Account created, you can log in now");
            return;
        }

        self.set_busy(|b| b.registering = true);
        let form = crate::api::RegisterForm {
            username,
            email,
            password,
            first_name,
            last_name,
            gender,
        };
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.register(&form).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::RegisterFinished { result },
            )));
        });
    }

    pub(super) fn on_register_finished(&mut self, result: Result<(), ApiError>) {
        self.set_busy(|b| b.registering = false);
        match result {
            Ok(()) => {
                self.state.router.default_screen = Screen::Login;
                self.state.router.screen_stack.clear();
                self.emit_router();
                self.toast("Account created, you can log in now");
            }
            Err(err) => self.toast(format!("Registration failed: {err}")),
        }
    }

    pub(super) fn start_session(&mut self, user: SessionUser) {
        // Tear down any existing session first.
        self.stop_session_quietly();

        tracing::info!(user_id = user.id, user = %user.username, "start_session");
        self.save_cached_identity(&user);

        self.session = Some(Session {
            user_id: user.id,
            username: user.username.clone(),
            socket: None,
        });

        self.state.auth = AuthState::LoggedIn {
            user_id: user.id,
            username: user.username,
        };
        self.state.router.default_screen = Screen::Forum;
        self.state.router.screen_stack.clear();
        self.emit_auth();
        self.emit_router();

        self.connect_socket();
        self.refresh_users();
        self.refresh_posts();
    }

    pub(super) fn logout(&mut self) {
        if self.network_enabled() {
            // Best effort; the local session dies either way.
            let api = self.api.clone();
            self.runtime.spawn(async move {
                let _ = api.logout().await;
            });
        }
        self.clear_cached_identity();
        self.stop_session_quietly();
    }

    fn stop_session_quietly(&mut self) {
        // Orphan any live socket task; its events carry a stale epoch now.
        self.socket_epoch = self.socket_epoch.wrapping_add(1);
        self.reconnect.reset();
        if let Some(sess) = self.session.take() {
            tracing::info!(user_id = sess.user_id, user = %sess.username, "stop_session");
        }
        self.history.clear();

        self.state.auth = AuthState::LoggedOut;
        self.state.router.default_screen = Screen::Login;
        self.state.router.screen_stack.clear();
        self.state.connection = ConnectionState::Disconnected;
        self.state.users = vec![];
        self.state.unread_counts.clear();
        self.state.post_feed = crate::state::PostFeedState::empty();
        self.state.current_post = None;
        self.state.current_chat = None;
        self.state.busy = BusyState::idle();
        self.posts_offset = 0;
        self.loading_older_posts = false;
        self.comments_offset = 0;
        self.loading_older_comments = false;
        self.emit_full();
    }

    pub(super) fn stop_session(&mut self) {
        self.stop_session_quietly();
    }

    /// Open a fresh socket generation. A no-op while one is already
    /// connecting or open.
    pub(super) fn connect_socket(&mut self) {
        if !self.is_logged_in() {
            return;
        }
        if matches!(
            self.state.connection,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }
        if !self.network_enabled() {
            return;
        }

        self.socket_epoch = self.socket_epoch.wrapping_add(1);
        let epoch = self.socket_epoch;
        let url = self.config.ws_url();

        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        if let Some(sess) = self.session.as_mut() {
            sess.socket = Some(SocketHandle {
                epoch,
                outbound: outbound_tx,
            });
        }

        self.state.connection = ConnectionState::Connecting;
        self.emit_connection();

        let tx = self.core_sender.clone();
        self.runtime
            .spawn(crate::socket::run_socket(url, epoch, outbound_rx, tx));
    }

    pub(super) fn on_socket_opened(&mut self, epoch: u64) {
        if epoch != self.socket_epoch {
            return;
        }
        self.reconnect.reset();
        self.state.connection = ConnectionState::Open;
        self.emit_connection();
    }

    pub(super) fn on_socket_closed(&mut self, epoch: u64) {
        if epoch != self.socket_epoch {
            return;
        }
        if let Some(sess) = self.session.as_mut() {
            if sess.socket.as_ref().map(|h| h.epoch) == Some(epoch) {
                sess.socket = None;
            }
        }
        self.state.connection = ConnectionState::Closed;
        self.emit_connection();

        if !self.is_logged_in() || !self.network_enabled() {
            return;
        }
        // Flat delay, one timer at a time; no backoff and no timer stacking.
        let Some(delay) = self.reconnect.on_closed() else {
            return;
        };
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ReconnectDue)));
        });
    }

    pub(super) fn on_reconnect_due(&mut self) {
        if !self.reconnect.timer_fired() {
            return;
        }
        if !self.is_logged_in() {
            return;
        }
        self.connect_socket();
    }

    /// Fire-and-forget fast path; delivery is guaranteed by the POST, not by
    /// the socket. Returns whether a frame actually went out.
    pub(super) fn send_socket_frame(&mut self, frame: ClientFrame) -> bool {
        if self.state.connection != ConnectionState::Open {
            tracing::debug!("socket not open, skipping fast-path send");
            return false;
        }
        let Some(handle) = self.session.as_ref().and_then(|s| s.socket.as_ref()) else {
            return false;
        };
        handle.outbound.send(frame).is_ok()
    }
}

/// Stable fake id for offline mode, where there is no server to assign one.
fn synthetic_user_id(username: &str) -> i64 {
    let h = username
        .bytes()
        .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    (h % 1_000_000) as i64 + 1
}
