//! REST client for the forum/chat server. Every endpoint the UI consumes goes
//! through here; callers catch every error at the call boundary and convert it
//! to a toast or a logout, never letting it escape the actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::state::{Comment, Post, UserEntry};

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401 on a protected endpoint: the session cookie is gone or expired.
    #[error("not authenticated")]
    Unauthorized,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Identity returned by the session probe; also what we cache on disk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub online: bool,
}

impl From<UserRecord> for UserEntry {
    fn from(u: UserRecord) -> Self {
        UserEntry {
            id: u.id,
            username: u.username,
            online: u.online,
        }
    }
}

/// A server-confirmed chat message, as it appears both in pagination
/// responses and inside live socket frames.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    #[serde(default)]
    pub author_id: i64,
    pub title: String,
    pub content: String,
    // The server has emitted both `category: "x"` and `categories: [..]`
    // over its lifetime; accept either.
    #[serde(default, alias = "category", deserialize_with = "one_or_many")]
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PostRecord> for Post {
    fn from(p: PostRecord) -> Self {
        Post {
            id: p.id,
            author_id: p.author_id,
            title: p.title,
            content: p.content,
            categories: p.categories,
            created_at: p.created_at,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    #[serde(default)]
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<CommentRecord> for Comment {
    fn from(c: CommentRecord) -> Self {
        Comment {
            id: c.id,
            post_id: c.post_id,
            author_id: c.author_id,
            content: c.content,
            created_at: c.created_at,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    pub async fn check_auth(&self) -> Result<SessionUser, ApiError> {
        let resp = self.http.get(self.url("/api/check-auth")).send().await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/login"))
            .json(&LoginBody { username, password })
            .send()
            .await?;
        expect_ok(resp).await?;
        Ok(())
    }

    pub async fn register(&self, form: &RegisterForm) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/register"))
            .json(form)
            .send()
            .await?;
        expect_ok(resp).await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let resp = self.http.post(self.url("/api/logout")).send().await?;
        expect_ok(resp).await?;
        Ok(())
    }

    pub async fn get_users(&self) -> Result<Vec<UserRecord>, ApiError> {
        let resp = self.http.get(self.url("/api/get-users")).send().await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn get_posts(&self, limit: usize, offset: usize) -> Result<Vec<PostRecord>, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/get-posts"))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn create_post(
        &self,
        title: &str,
        content: &str,
        categories: &[String],
    ) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/create-post"))
            .json(&serde_json::json!({
                "title": title,
                "content": content,
                "categories": categories,
            }))
            .send()
            .await?;
        expect_ok(resp).await?;
        Ok(())
    }

    pub async fn get_comments(
        &self,
        post_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CommentRecord>, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/get-comments"))
            .query(&[
                ("post_id", post_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    pub async fn create_comment(&self, post_id: i64, content: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/create-comment"))
            .json(&serde_json::json!({ "post_id": post_id, "content": content }))
            .send()
            .await?;
        expect_ok(resp).await?;
        Ok(())
    }

    /// Newest-first page of the conversation with `peer_id`.
    pub async fn get_messages(
        &self,
        peer_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/messages/{peer_id}")))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }

    /// Durable persistence path for an outgoing message; the socket send is
    /// the independent fast path. Returns the server-confirmed record.
    pub async fn send_message(&self, peer_id: i64, content: &str) -> Result<MessageRecord, ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/messages/{peer_id}")))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        Ok(expect_ok(resp).await?.json().await?)
    }
}

async fn expect_ok(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_record_accepts_single_category() {
        let p: PostRecord = serde_json::from_str(
            r#"{"id":1,"author_id":2,"title":"t","content":"c","category":"general",
                "created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(p.categories, vec!["general".to_string()]);
    }

    #[test]
    fn post_record_accepts_category_list() {
        let p: PostRecord = serde_json::from_str(
            r#"{"id":1,"author_id":2,"title":"t","content":"c","categories":["a","b"],
                "created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(p.categories, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn post_record_categories_default_empty() {
        let p: PostRecord = serde_json::from_str(
            r#"{"id":1,"title":"t","content":"c","created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(p.categories.is_empty());
        assert_eq!(p.author_id, 0);
    }
}
