//! Per-peer conversation history: the single source of truth merged from both
//! the pull path (offset pagination, newest-first pages) and the push path
//! (live socket frames). The UI only ever reads snapshots; all mutation goes
//! through the actor.

use crate::state::{ChatMessage, MessageDeliveryState};

/// How far apart `created_at` may be for a server echo to still match a
/// pending optimistic entry. The server re-stamps on insert, so an exact
/// timestamp match cannot be required.
const RECONCILE_WINDOW_SECS: i64 = 30;

pub struct Conversation {
    peer_id: i64,
    /// Oldest-first.
    messages: Vec<ChatMessage>,
    /// Count of server-backed messages loaded; doubles as the next offset.
    loaded: usize,
    has_more: bool,
    /// Reentrancy guard: a second "load older" while one is in flight is
    /// suppressed, not merged.
    loading_older: bool,
    /// Bumped on every reset; in-flight pages tagged with an older epoch are
    /// discarded on arrival.
    epoch: u64,
}

impl Conversation {
    pub fn new(peer_id: i64) -> Self {
        Self {
            peer_id,
            messages: vec![],
            loaded: 0,
            has_more: false,
            loading_older: false,
            epoch: 0,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn can_load_older(&self) -> bool {
        self.has_more
    }

    /// Reset pagination for a fresh open and return the new epoch. Optimistic
    /// entries that never got confirmed survive the reset; confirmed history
    /// is reloaded from the server.
    pub fn begin_initial(&mut self) -> u64 {
        tracing::debug!(peer_id = self.peer_id, "reset conversation history");
        self.messages
            .retain(|m| m.is_mine && !matches!(m.delivery, MessageDeliveryState::Confirmed));
        self.loaded = 0;
        self.has_more = false;
        self.loading_older = false;
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }

    /// Most recent page, newest-first as the server sends it. Returns false
    /// (and mutates nothing) if the page belongs to a superseded epoch.
    pub fn apply_initial(&mut self, epoch: u64, page: Vec<ChatMessage>, page_size: usize) -> bool {
        if epoch != self.epoch {
            return false;
        }
        let fetched = page.len();
        // Everything present right now either survived the reset (optimistic
        // entries) or was pushed live while the page was in flight; both must
        // outlive the page swap.
        let stashed: Vec<ChatMessage> = self.messages.drain(..).collect();

        self.messages = page;
        self.messages.reverse();
        self.loaded = fetched;
        self.has_more = fetched == page_size;
        self.loading_older = false;

        // Re-seat the stash; entries the page already contains get
        // matched-and-replaced rather than duplicated.
        for m in stashed {
            if matches!(m.delivery, MessageDeliveryState::Confirmed) {
                self.reconcile(m);
            } else {
                self.insert_ordered(m);
            }
        }
        true
    }

    /// Start an older-page load. Returns `(offset, epoch)` to tag the fetch
    /// with, or None when a load is already in flight or history is exhausted
    /// (a further call after `has_more` went false is a no-op).
    pub fn begin_older(&mut self) -> Option<(usize, u64)> {
        if self.loading_older || !self.has_more {
            return None;
        }
        self.loading_older = true;
        Some((self.loaded, self.epoch))
    }

    /// Clear the in-flight guard after a failed older-page fetch.
    pub fn abort_older(&mut self, epoch: u64) {
        if epoch == self.epoch {
            self.loading_older = false;
        }
    }

    /// Merge an older page (newest-first) by prepending it. Returns the
    /// number of entries actually inserted — the caller needs it to keep the
    /// viewport anchored after the prepend — or None for a stale page.
    pub fn apply_older(
        &mut self,
        epoch: u64,
        page: Vec<ChatMessage>,
        page_size: usize,
    ) -> Option<usize> {
        if epoch != self.epoch {
            return None;
        }
        self.loading_older = false;
        let fetched = page.len();
        self.has_more = fetched == page_size;
        // Advance by the server page length even if some entries were already
        // present, or the next fetch would return the same page forever.
        self.loaded += fetched;
        if fetched == 0 {
            return Some(0);
        }

        let mut older: Vec<ChatMessage> = page
            .into_iter()
            .rev()
            .filter(|m| m.id.is_none() || !self.contains_id(m.id))
            .collect();
        let inserted = older.len();
        older.append(&mut self.messages);
        self.messages = older;
        Some(inserted)
    }

    /// Insert an optimistic pending message at the end, ahead of server
    /// confirmation.
    pub fn append_local(&mut self, msg: ChatMessage) {
        self.insert_ordered(msg);
    }

    /// Resolve a specific optimistic entry with the record its own POST
    /// returned. Falls back to approximate reconciliation if the entry is
    /// gone (e.g. already replaced by a socket echo).
    pub fn confirm_local(&mut self, local_seq: u64, mut confirmed: ChatMessage) {
        confirmed.local_seq = Some(local_seq);
        if let Some(pos) = self
            .messages
            .iter()
            .position(|m| m.local_seq == Some(local_seq) && m.id.is_none())
        {
            if confirmed.id.is_some() && self.contains_id(confirmed.id) {
                // The socket echo beat the POST response; drop the duplicate.
                self.messages.remove(pos);
            } else {
                self.messages[pos] = confirmed;
                self.resort();
            }
            return;
        }
        self.reconcile(confirmed);
    }

    /// Mark an optimistic entry as failed so it never lingers as pending.
    pub fn fail_local(&mut self, local_seq: u64, reason: &str) -> bool {
        if let Some(m) = self.messages.iter_mut().find(|m| {
            m.local_seq == Some(local_seq)
                && m.id.is_none()
                && matches!(m.delivery, MessageDeliveryState::Pending)
        }) {
            m.delivery = MessageDeliveryState::Failed {
                reason: reason.to_string(),
            };
            return true;
        }
        false
    }

    /// Merge a server-confirmed message: replace the best-matching pending
    /// entry, or append if nothing matches. Never drops a confirmed message;
    /// idempotent because a known server id is replaced in place.
    pub fn reconcile(&mut self, confirmed: ChatMessage) {
        if confirmed.id.is_some() {
            if let Some(pos) = self.messages.iter().position(|m| m.id == confirmed.id) {
                let mut replacement = confirmed;
                // A redelivery carries no local identity; keep the one the
                // first reconcile preserved.
                replacement.local_seq = replacement.local_seq.or(self.messages[pos].local_seq);
                self.messages[pos] = replacement;
                self.resort();
                return;
            }
        }
        if let Some(pos) = self.best_pending_match(&confirmed) {
            let local_seq = self.messages[pos].local_seq;
            let mut replacement = confirmed;
            replacement.local_seq = replacement.local_seq.or(local_seq);
            self.messages[pos] = replacement;
            self.resort();
            return;
        }
        self.insert_ordered(confirmed);
    }

    /// Live-pushed message for this (open) conversation. Same semantics as
    /// `reconcile`: de-duplicated against anything already confirmed, matched
    /// against pending echoes of our own sends.
    pub fn merge_incoming(&mut self, msg: ChatMessage) {
        self.reconcile(msg);
    }

    fn best_pending_match(&self, confirmed: &ChatMessage) -> Option<usize> {
        self.messages.iter().position(|m| {
            m.id.is_none()
                && matches!(m.delivery, MessageDeliveryState::Pending)
                && m.sender_id == confirmed.sender_id
                && m.receiver_id == confirmed.receiver_id
                && m.content == confirmed.content
                && (m.created_at - confirmed.created_at)
                    .num_seconds()
                    .abs()
                    <= RECONCILE_WINDOW_SECS
        })
    }

    fn contains_id(&self, id: Option<i64>) -> bool {
        id.is_some() && self.messages.iter().any(|m| m.id == id)
    }

    fn insert_ordered(&mut self, msg: ChatMessage) {
        let key = sort_key(&msg);
        let pos = self
            .messages
            .binary_search_by(|m| sort_key(m).cmp(&key))
            .unwrap_or_else(|p| p);
        self.messages.insert(pos, msg);
    }

    fn resort(&mut self) {
        self.messages.sort_by_key(sort_key);
    }
}

fn sort_key(m: &ChatMessage) -> (chrono::DateTime<chrono::Utc>, i64, u64) {
    (
        m.created_at,
        m.id.unwrap_or(i64::MAX),
        m.local_seq.unwrap_or(u64::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const PAGE: usize = 10;

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn confirmed(id: i64, sender: i64, receiver: i64, content: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: Some(id),
            local_seq: None,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            created_at: at(secs),
            is_mine: sender == 1,
            delivery: MessageDeliveryState::Confirmed,
        }
    }

    fn pending(seq: u64, sender: i64, receiver: i64, content: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: None,
            local_seq: Some(seq),
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            created_at: at(secs),
            is_mine: true,
            delivery: MessageDeliveryState::Pending,
        }
    }

    /// Newest-first slice of `all` (which is oldest-first), as the server
    /// would return for the given offset/limit.
    fn server_page(all: &[ChatMessage], offset: usize, limit: usize) -> Vec<ChatMessage> {
        all.iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    fn full_history(count: i64) -> Vec<ChatMessage> {
        (1..=count)
            .map(|i| confirmed(i, if i % 2 == 0 { 1 } else { 2 }, 1, &format!("m{i}"), i))
            .collect()
    }

    #[test]
    fn pagination_terminates_after_23_messages() {
        let all = full_history(23);
        let mut conv = Conversation::new(2);

        let epoch = conv.begin_initial();
        assert!(conv.apply_initial(epoch, server_page(&all, 0, PAGE), PAGE));
        assert_eq!(conv.messages().len(), 10);
        assert!(conv.can_load_older());

        let (offset, epoch) = conv.begin_older().unwrap();
        assert_eq!(offset, 10);
        assert_eq!(conv.apply_older(epoch, server_page(&all, offset, PAGE), PAGE), Some(10));
        assert!(conv.can_load_older());

        let (offset, epoch) = conv.begin_older().unwrap();
        assert_eq!(offset, 20);
        assert_eq!(conv.apply_older(epoch, server_page(&all, offset, PAGE), PAGE), Some(3));
        assert!(!conv.can_load_older());

        // Exhausted history: a further load is a no-op.
        assert!(conv.begin_older().is_none());
        assert_eq!(conv.messages().len(), 23);
    }

    #[test]
    fn sequence_stays_ascending_with_no_duplicates() {
        let all = full_history(23);
        let mut conv = Conversation::new(2);
        let epoch = conv.begin_initial();
        conv.apply_initial(epoch, server_page(&all, 0, PAGE), PAGE);
        while let Some((offset, epoch)) = conv.begin_older() {
            conv.apply_older(epoch, server_page(&all, offset, PAGE), PAGE);
        }

        let msgs = conv.messages();
        for pair in msgs.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        let mut ids: Vec<i64> = msgs.iter().filter_map(|m| m.id).collect();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
        assert_eq!(before, 23);
    }

    #[test]
    fn concurrent_older_load_is_suppressed() {
        let all = full_history(23);
        let mut conv = Conversation::new(2);
        let epoch = conv.begin_initial();
        conv.apply_initial(epoch, server_page(&all, 0, PAGE), PAGE);

        assert!(conv.begin_older().is_some());
        // First fetch still in flight.
        assert!(conv.begin_older().is_none());
    }

    #[test]
    fn stale_page_after_reset_is_discarded() {
        let all = full_history(23);
        let mut conv = Conversation::new(2);
        let epoch = conv.begin_initial();
        conv.apply_initial(epoch, server_page(&all, 0, PAGE), PAGE);
        let (offset, stale_epoch) = conv.begin_older().unwrap();
        let stale_page = server_page(&all, offset, PAGE);

        // Conversation reopened before the page arrived.
        let fresh_epoch = conv.begin_initial();
        assert!(conv.apply_older(stale_epoch, stale_page, PAGE).is_none());
        assert!(conv.apply_initial(fresh_epoch, server_page(&all, 0, PAGE), PAGE));
        assert_eq!(conv.messages().len(), 10);
    }

    #[test]
    fn send_hi_then_confirm_yields_single_confirmed_message() {
        // User 1 opens an empty conversation with user 2 and sends "hi".
        let mut conv = Conversation::new(2);
        let epoch = conv.begin_initial();
        conv.apply_initial(epoch, vec![], PAGE);

        conv.append_local(pending(1, 1, 2, "hi", 100));
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].delivery, MessageDeliveryState::Pending);

        conv.reconcile(confirmed(99, 1, 2, "hi", 101));
        assert_eq!(conv.messages().len(), 1);
        let m = &conv.messages()[0];
        assert_eq!(m.id, Some(99));
        assert_eq!(m.delivery, MessageDeliveryState::Confirmed);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut conv = Conversation::new(2);
        conv.append_local(pending(1, 1, 2, "hi", 100));

        let echo = confirmed(99, 1, 2, "hi", 101);
        conv.reconcile(echo.clone());
        let once: Vec<ChatMessage> = conv.messages().to_vec();
        conv.reconcile(echo);
        assert_eq!(conv.messages(), &once[..]);
    }

    #[test]
    fn reconcile_without_match_appends() {
        let mut conv = Conversation::new(2);
        conv.reconcile(confirmed(7, 2, 1, "surprise", 50));
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].id, Some(7));
    }

    #[test]
    fn reconcile_ignores_pending_outside_time_window() {
        let mut conv = Conversation::new(2);
        conv.append_local(pending(1, 1, 2, "hi", 0));
        conv.reconcile(confirmed(99, 1, 2, "hi", 120));
        // Too far apart to be the same message: both survive.
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn confirm_local_resolves_exact_entry() {
        let mut conv = Conversation::new(2);
        conv.append_local(pending(1, 1, 2, "a", 100));
        conv.append_local(pending(2, 1, 2, "a", 101));

        conv.confirm_local(2, confirmed(50, 1, 2, "a", 101));
        let still_pending: Vec<_> = conv
            .messages()
            .iter()
            .filter(|m| m.delivery == MessageDeliveryState::Pending)
            .collect();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].local_seq, Some(1));
    }

    #[test]
    fn confirm_local_after_socket_echo_leaves_no_duplicate() {
        let mut conv = Conversation::new(2);
        conv.append_local(pending(1, 1, 2, "hi", 100));
        // Socket echo reconciles first.
        conv.merge_incoming(confirmed(99, 1, 2, "hi", 101));
        // Then the POST response lands for the same message.
        conv.confirm_local(1, confirmed(99, 1, 2, "hi", 101));
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].id, Some(99));
    }

    #[test]
    fn fail_local_marks_entry_failed() {
        let mut conv = Conversation::new(2);
        conv.append_local(pending(1, 1, 2, "hi", 100));
        assert!(conv.fail_local(1, "persist failed"));
        assert!(matches!(
            conv.messages()[0].delivery,
            MessageDeliveryState::Failed { .. }
        ));
        // Already resolved entries are not re-failed.
        assert!(!conv.fail_local(1, "again"));
    }

    #[test]
    fn live_message_during_initial_load_survives_the_page_swap() {
        let mut conv = Conversation::new(2);
        let epoch = conv.begin_initial();
        // The peer's message is pushed over the socket while the initial page
        // is still in flight, and the page predates it.
        conv.merge_incoming(confirmed(7, 2, 1, "hello there", 100));
        conv.apply_initial(epoch, vec![confirmed(5, 2, 1, "old", 10)], PAGE);

        assert_eq!(conv.messages().len(), 2);
        assert!(conv.messages().iter().any(|m| m.id == Some(7)));
    }

    #[test]
    fn live_message_already_in_the_initial_page_is_not_duplicated() {
        let mut conv = Conversation::new(2);
        let epoch = conv.begin_initial();
        conv.merge_incoming(confirmed(7, 2, 1, "hello there", 100));
        // The page raced the push and already includes the same message.
        conv.apply_initial(
            epoch,
            vec![confirmed(7, 2, 1, "hello there", 100), confirmed(5, 2, 1, "old", 10)],
            PAGE,
        );

        assert_eq!(conv.messages().len(), 2);
        assert_eq!(
            conv.messages().iter().filter(|m| m.id == Some(7)).count(),
            1
        );
    }

    #[test]
    fn pending_entries_survive_a_reopen() {
        let mut conv = Conversation::new(2);
        let epoch = conv.begin_initial();
        conv.apply_initial(epoch, vec![confirmed(5, 2, 1, "old", 10)], PAGE);
        conv.append_local(pending(1, 1, 2, "unsent", 100));

        let epoch = conv.begin_initial();
        conv.apply_initial(epoch, vec![confirmed(5, 2, 1, "old", 10)], PAGE);
        assert_eq!(conv.messages().len(), 2);
        assert!(conv.messages().iter().any(|m| m.id.is_none()));
    }
}
