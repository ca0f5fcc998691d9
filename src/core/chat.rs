// Directory + presence + conversations.

use super::*;

impl AppCore {
    pub(super) fn refresh_users(&mut self) {
        if !self.is_logged_in() {
            return;
        }
        if !self.network_enabled() {
            // Tests drive the directory through injected UsersFetched events.
            return;
        }
        if self.state.busy.refreshing_users {
            return;
        }
        self.set_busy(|b| b.refreshing_users = true);

        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.get_users().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::UsersFetched {
                result,
            })));
        });
    }

    pub(super) fn on_users_fetched(
        &mut self,
        result: Result<Vec<crate::api::UserRecord>, ApiError>,
    ) {
        self.set_busy(|b| b.refreshing_users = false);
        let records = match result {
            Ok(records) => records,
            Err(ApiError::Unauthorized) => {
                self.force_logout();
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "users fetch failed");
                // A stale directory is worse than an empty one; presence
                // flags in it may be long dead.
                if !self.state.users.is_empty() {
                    self.state.users.clear();
                    self.emit_users();
                }
                self.toast("Could not load users");
                return;
            }
        };

        let me = self.me();
        // Presence learned from the socket wins over a stale REST snapshot;
        // going offline is only ever reported by a disconnect frame.
        let previously_online: std::collections::HashSet<i64> = self
            .state
            .users
            .iter()
            .filter(|u| u.online)
            .map(|u| u.id)
            .collect();

        let mut users: Vec<crate::state::UserEntry> = records
            .into_iter()
            .filter(|r| Some(r.id) != me)
            .map(|r| {
                let online = r.online || previously_online.contains(&r.id);
                let mut entry: crate::state::UserEntry = r.into();
                entry.online = online;
                entry
            })
            .collect();
        users.sort_by(|a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()));

        self.state.users = users;
        self.emit_users();
    }

    pub(super) fn on_socket_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Message { content } => self.on_incoming_message(content),
            ServerEvent::UserConnected { user_id } => self.apply_presence(user_id, true),
            ServerEvent::UserDisconnected { user_id } => self.apply_presence(user_id, false),
        }
    }

    fn apply_presence(&mut self, user_id: i64, online: bool) {
        if Some(user_id) == self.me() {
            return;
        }
        if let Some(entry) = self.state.users.iter_mut().find(|u| u.id == user_id) {
            if entry.online != online {
                entry.online = online;
                self.emit_users();
            }
        } else if online {
            // Someone we have never seen; likely a fresh registration.
            self.refresh_users();
        } else {
            tracing::debug!(user_id, "dropping disconnect for unknown user");
        }
    }

    fn username_for(&self, user_id: i64) -> String {
        self.state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.username.clone())
            .unwrap_or_else(|| format!("user {user_id}"))
    }

    pub(super) fn open_conversation(&mut self, peer_id: i64) {
        if !self.is_logged_in() {
            return;
        }
        let peer_username = self.username_for(peer_id);
        let page_size = self.config.page_size();

        // Opening a conversation consumes its unread count.
        if self.state.unread_counts.remove(&peer_id).is_some() {
            self.emit_unread();
        }

        let network = self.network_enabled();
        let (epoch, messages, can_load_older) = {
            let conv = self
                .history
                .entry(peer_id)
                .or_insert_with(|| Conversation::new(peer_id));
            // With no server to reload from, the cached history is the
            // history; only a networked open resets pagination.
            let epoch = network.then(|| conv.begin_initial());
            (epoch, conv.messages().to_vec(), conv.can_load_older())
        };

        self.state.current_chat = Some(ChatViewState {
            peer_id,
            peer_username,
            messages,
            can_load_older,
        });
        self.emit_current_chat();

        let Some(epoch) = epoch else {
            return;
        };

        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.get_messages(peer_id, page_size, 0).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::MessagesFetched {
                    peer_id,
                    epoch,
                    initial: true,
                    result,
                },
            )));
        });
    }

    pub(super) fn close_conversation(&mut self) {
        if self.state.current_chat.take().is_some() {
            self.emit_current_chat();
        }
    }

    pub(super) fn send_message(&mut self, peer_id: i64, content: String) {
        let content = content.trim().to_string();
        if content.is_empty() {
            self.toast("Message cannot be empty");
            return;
        }
        let Some(me) = self.me() else {
            self.toast("Not logged in");
            return;
        };

        self.outbox_seq += 1;
        let seq = self.outbox_seq;
        let pending = ChatMessage {
            id: None,
            local_seq: Some(seq),
            sender_id: me,
            receiver_id: peer_id,
            content: content.clone(),
            created_at: crate::state::now(),
            is_mine: true,
            delivery: MessageDeliveryState::Pending,
        };
        self.history
            .entry(peer_id)
            .or_insert_with(|| Conversation::new(peer_id))
            .append_local(pending);
        if self.refresh_chat_view(peer_id) {
            self.emit_current_chat();
        }

        // Fast path: fan out over the socket if it happens to be open. The
        // POST below is what actually guarantees delivery.
        self.send_socket_frame(ClientFrame {
            receiver_id: peer_id,
            content: content.clone(),
            sender_id: me,
        });

        if !self.network_enabled() {
            let record = MessageRecord {
                id: 1_000_000 + seq as i64,
                sender_id: me,
                receiver_id: peer_id,
                content,
                created_at: crate::state::now(),
            };
            self.on_message_persisted(peer_id, seq, Ok(record));
            return;
        }

        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.send_message(peer_id, &content).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::MessagePersisted {
                    peer_id,
                    local_seq: seq,
                    result,
                },
            )));
        });
    }

    pub(super) fn load_older_messages(&mut self, peer_id: i64) {
        let page_size = self.config.page_size();
        let Some(conv) = self.history.get_mut(&peer_id) else {
            return;
        };
        // None while a page is in flight or when history is exhausted.
        let Some((offset, epoch)) = conv.begin_older() else {
            return;
        };

        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.get_messages(peer_id, page_size, offset).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::MessagesFetched {
                    peer_id,
                    epoch,
                    initial: false,
                    result,
                },
            )));
        });
    }

    pub(super) fn on_messages_fetched(
        &mut self,
        peer_id: i64,
        epoch: u64,
        initial: bool,
        result: Result<Vec<MessageRecord>, ApiError>,
    ) {
        let Some(me) = self.me() else {
            return;
        };
        let page_size = self.config.page_size();

        let page = match result {
            Ok(page) => page,
            Err(ApiError::Unauthorized) => {
                self.force_logout();
                return;
            }
            Err(err) => {
                tracing::warn!(peer_id, %err, "messages fetch failed");
                if let Some(conv) = self.history.get_mut(&peer_id) {
                    if !initial {
                        conv.abort_older(epoch);
                    }
                }
                self.toast("Could not load messages");
                return;
            }
        };

        let msgs: Vec<ChatMessage> = page.into_iter().map(|r| confirmed_message(r, me)).collect();
        let Some(conv) = self.history.get_mut(&peer_id) else {
            return;
        };

        if initial {
            if conv.apply_initial(epoch, msgs, page_size) && self.refresh_chat_view(peer_id) {
                self.emit_current_chat();
            }
        } else if let Some(count) = conv.apply_older(epoch, msgs, page_size) {
            if self.refresh_chat_view(peer_id) {
                self.emit(move |rev| AppUpdate::OlderMessagesPrepended {
                    rev,
                    peer_id,
                    count,
                });
            }
        }
    }

    pub(super) fn on_message_persisted(
        &mut self,
        peer_id: i64,
        local_seq: u64,
        result: Result<MessageRecord, ApiError>,
    ) {
        let Some(me) = self.me() else {
            return;
        };
        match result {
            Ok(record) => {
                let confirmed = confirmed_message(record, me);
                if let Some(conv) = self.history.get_mut(&peer_id) {
                    conv.confirm_local(local_seq, confirmed);
                }
                if self.refresh_chat_view(peer_id) {
                    self.emit_current_chat();
                }
            }
            Err(ApiError::Unauthorized) => {
                if let Some(conv) = self.history.get_mut(&peer_id) {
                    conv.fail_local(local_seq, "not authenticated");
                }
                self.force_logout();
            }
            Err(err) => {
                tracing::warn!(peer_id, local_seq, %err, "message persist failed");
                if let Some(conv) = self.history.get_mut(&peer_id) {
                    conv.fail_local(local_seq, "could not send");
                }
                if self.refresh_chat_view(peer_id) {
                    self.emit_current_chat();
                }
                self.toast("Message failed to send");
            }
        }
    }

    /// Route a live message to its conversation. Open conversation renders it
    /// immediately; anything else becomes an unread bump and a toast.
    fn on_incoming_message(&mut self, record: MessageRecord) {
        let Some(me) = self.me() else {
            return;
        };
        let peer_id = if record.sender_id == me {
            record.receiver_id
        } else {
            record.sender_id
        };
        let is_mine = record.sender_id == me;
        let sender_name = self.username_for(peer_id);
        let msg = confirmed_message(record, me);

        let open = self
            .state
            .current_chat
            .as_ref()
            .map(|c| c.peer_id == peer_id)
            .unwrap_or(false);

        self.history
            .entry(peer_id)
            .or_insert_with(|| Conversation::new(peer_id))
            .merge_incoming(msg);

        if open {
            if self.refresh_chat_view(peer_id) {
                self.emit_current_chat();
            }
        } else if !is_mine {
            *self.state.unread_counts.entry(peer_id).or_default() += 1;
            self.emit_unread();
            self.toast(format!("New message from {sender_name}"));
        }
    }

    /// Rebuild the chat view from history if `peer_id` is the open
    /// conversation. Returns whether the view was refreshed.
    fn refresh_chat_view(&mut self, peer_id: i64) -> bool {
        let Some(conv) = self.history.get(&peer_id) else {
            return false;
        };
        let Some(cur) = self.state.current_chat.as_mut() else {
            return false;
        };
        if cur.peer_id != peer_id {
            return false;
        }
        cur.messages = conv.messages().to_vec();
        cur.can_load_older = conv.can_load_older();
        true
    }
}

fn confirmed_message(record: MessageRecord, me: i64) -> ChatMessage {
    ChatMessage {
        id: Some(record.id),
        local_seq: None,
        sender_id: record.sender_id,
        receiver_id: record.receiver_id,
        content: record.content,
        created_at: record.created_at,
        is_mine: record.sender_id == me,
        delivery: MessageDeliveryState::Confirmed,
    }
}
