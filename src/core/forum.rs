// Forum feed + post view paging.

use super::*;

use crate::state::{Comment, Post, PostViewState};

impl AppCore {
    pub(super) fn refresh_posts(&mut self) {
        if !self.is_logged_in() {
            return;
        }
        if !self.network_enabled() {
            self.state.post_feed = crate::state::PostFeedState::empty();
            self.posts_offset = 0;
            self.emit_posts();
            return;
        }
        if self.state.busy.loading_posts {
            return;
        }
        self.set_busy(|b| b.loading_posts = true);

        let page_size = self.config.page_size();
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.get_posts(page_size, 0).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PostsFetched {
                initial: true,
                result,
            })));
        });
    }

    pub(super) fn load_older_posts(&mut self) {
        if self.loading_older_posts || !self.state.post_feed.can_load_older {
            return;
        }
        self.loading_older_posts = true;

        let page_size = self.config.page_size();
        let offset = self.posts_offset;
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.get_posts(page_size, offset).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PostsFetched {
                initial: false,
                result,
            })));
        });
    }

    pub(super) fn on_posts_fetched(
        &mut self,
        initial: bool,
        result: Result<Vec<crate::api::PostRecord>, ApiError>,
    ) {
        if initial {
            self.set_busy(|b| b.loading_posts = false);
        } else {
            self.loading_older_posts = false;
        }

        let page = match result {
            Ok(page) => page,
            Err(ApiError::Unauthorized) => {
                self.force_logout();
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "posts fetch failed");
                self.toast("Could not load posts");
                return;
            }
        };

        let page_size = self.config.page_size();
        let fetched = page.len();
        // The feed renders newest-first, which is exactly the server order;
        // older pages go on the end.
        let posts: Vec<Post> = page.into_iter().map(Into::into).collect();

        if initial {
            self.state.post_feed.posts = posts;
            self.posts_offset = fetched;
        } else {
            for p in posts {
                if !self.state.post_feed.posts.iter().any(|e| e.id == p.id) {
                    self.state.post_feed.posts.push(p);
                }
            }
            self.posts_offset += fetched;
        }
        self.state.post_feed.can_load_older = fetched == page_size;
        self.emit_posts();
    }

    pub(super) fn create_post(&mut self, title: String, content: String, categories: Vec<String>) {
        let title = title.trim().to_string();
        let content = content.trim().to_string();
        if title.is_empty() || content.is_empty() {
            self.toast("Title and content are required");
            return;
        }
        let Some(me) = self.me() else {
            self.toast("Not logged in");
            return;
        };

        if !self.network_enabled() {
            self.outbox_seq += 1;
            let post = Post {
                id: 1_000_000 + self.outbox_seq as i64,
                author_id: me,
                title,
                content,
                categories,
                created_at: crate::state::now(),
            };
            self.state.post_feed.posts.insert(0, post);
            self.emit_posts();
            self.toast("Post created");
            return;
        }

        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.create_post(&title, &content, &categories).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PostCreated {
                result,
            })));
        });
    }

    pub(super) fn on_post_created(&mut self, result: Result<(), ApiError>) {
        match result {
            Ok(()) => {
                self.toast("Post created");
                self.refresh_posts();
            }
            Err(ApiError::Unauthorized) => self.force_logout(),
            Err(err) => {
                tracing::warn!(%err, "post create failed");
                self.toast("Could not create post");
            }
        }
    }

    pub(super) fn open_post(&mut self, post_id: i64) {
        if self.load_post(post_id) {
            self.push_screen(Screen::Post { post_id });
        }
    }

    /// Load the post view without touching the router; the router sync path
    /// uses this directly. Returns whether the post was found in the feed.
    pub(super) fn load_post(&mut self, post_id: i64) -> bool {
        let Some(post) = self
            .state
            .post_feed
            .posts
            .iter()
            .find(|p| p.id == post_id)
            .cloned()
        else {
            self.toast("Post not found");
            return false;
        };

        self.state.current_post = Some(PostViewState {
            post,
            comments: vec![],
            can_load_older: false,
        });
        self.comments_offset = 0;
        self.loading_older_comments = false;
        self.emit_current_post();

        if !self.network_enabled() {
            return true;
        }

        let page_size = self.config.page_size();
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.get_comments(post_id, page_size, 0).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::CommentsFetched {
                    post_id,
                    initial: true,
                    result,
                },
            )));
        });
        true
    }

    pub(super) fn close_post(&mut self) {
        if matches!(
            self.state.router.screen_stack.last(),
            Some(Screen::Post { .. })
        ) {
            self.state.router.screen_stack.pop();
            self.emit_router();
        }
        if self.state.current_post.take().is_some() {
            self.emit_current_post();
        }
    }

    pub(super) fn load_older_comments(&mut self) {
        if self.loading_older_comments {
            return;
        }
        let Some(view) = self.state.current_post.as_ref() else {
            return;
        };
        if !view.can_load_older {
            return;
        }
        let post_id = view.post.id;
        self.loading_older_comments = true;

        let page_size = self.config.page_size();
        let offset = self.comments_offset;
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.get_comments(post_id, page_size, offset).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::CommentsFetched {
                    post_id,
                    initial: false,
                    result,
                },
            )));
        });
    }

    pub(super) fn on_comments_fetched(
        &mut self,
        post_id: i64,
        initial: bool,
        result: Result<Vec<crate::api::CommentRecord>, ApiError>,
    ) {
        if !initial {
            self.loading_older_comments = false;
        }
        // The view may have moved to another post while this was in flight.
        let open = self
            .state
            .current_post
            .as_ref()
            .map(|v| v.post.id == post_id)
            .unwrap_or(false);
        if !open {
            return;
        }

        let page = match result {
            Ok(page) => page,
            Err(ApiError::Unauthorized) => {
                self.force_logout();
                return;
            }
            Err(err) => {
                tracing::warn!(post_id, %err, "comments fetch failed");
                self.toast("Could not load comments");
                return;
            }
        };

        let page_size = self.config.page_size();
        let fetched = page.len();
        // Newest-first page, displayed oldest-first.
        let mut older: Vec<Comment> = page.into_iter().rev().map(Into::into).collect();

        let Some(view) = self.state.current_post.as_mut() else {
            return;
        };
        if initial {
            view.comments = older;
        } else {
            older.retain(|c| !view.comments.iter().any(|e| e.id == c.id));
            older.append(&mut view.comments);
            view.comments = older;
        }
        view.can_load_older = fetched == page_size;
        if initial {
            self.comments_offset = fetched;
        } else {
            self.comments_offset += fetched;
        }
        self.emit_current_post();
    }

    pub(super) fn create_comment(&mut self, content: String) {
        let content = content.trim().to_string();
        if content.is_empty() {
            self.toast("Comment cannot be empty");
            return;
        }
        let Some(me) = self.me() else {
            self.toast("Not logged in");
            return;
        };
        let Some(post_id) = self.state.current_post.as_ref().map(|v| v.post.id) else {
            self.toast("No post open");
            return;
        };

        if !self.network_enabled() {
            self.outbox_seq += 1;
            let comment = Comment {
                id: 1_000_000 + self.outbox_seq as i64,
                post_id,
                author_id: me,
                content,
                created_at: crate::state::now(),
            };
            if let Some(view) = self.state.current_post.as_mut() {
                view.comments.push(comment);
            }
            self.emit_current_post();
            return;
        }

        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.create_comment(post_id, &content).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::CommentCreated {
                post_id,
                result,
            })));
        });
    }

    pub(super) fn on_comment_created(&mut self, post_id: i64, result: Result<(), ApiError>) {
        match result {
            Ok(()) => {
                // Reload the first page so the new comment shows up with its
                // server identity.
                let open = self
                    .state
                    .current_post
                    .as_ref()
                    .map(|v| v.post.id == post_id)
                    .unwrap_or(false);
                if open {
                    self.load_post(post_id);
                }
            }
            Err(ApiError::Unauthorized) => self.force_logout(),
            Err(err) => {
                tracing::warn!(post_id, %err, "comment create failed");
                self.toast("Could not post comment");
            }
        }
    }
}
