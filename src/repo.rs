use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("forbidden")] Forbidden,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `Conflict` when the username or email is already taken.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    /// Case-insensitive substring match on username; `None` lists everyone.
    async fn search_users(&self, query: Option<&str>) -> RepoResult<Vec<User>>;
    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<User>;
    async fn set_password_hash(&self, id: Id, password_hash: String) -> RepoResult<()>;
    /// Removes the user together with everything that references them.
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn create_message(&self, new: NewMessage) -> RepoResult<Message>;
    async fn get_message(&self, id: Id) -> RepoResult<Message>;
    async fn get_feed_item(&self, id: Id) -> RepoResult<FeedItem>;
    async fn list_user_messages(&self, user_id: Id, limit: usize) -> RepoResult<Vec<FeedItem>>;
    async fn count_user_messages(&self, user_id: Id) -> RepoResult<usize>;
    async fn delete_message(&self, id: Id) -> RepoResult<()>;
    /// Own messages plus messages of followed users, newest first.
    async fn home_timeline(&self, user_id: Id, limit: usize) -> RepoResult<Vec<FeedItem>>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// Idempotent. `Forbidden` for a self-follow.
    async fn follow(&self, follower_id: Id, followed_id: Id) -> RepoResult<()>;
    /// Returns whether a follow row was removed.
    async fn unfollow(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool>;
    async fn list_following(&self, user_id: Id) -> RepoResult<Vec<User>>;
    async fn list_followers(&self, user_id: Id) -> RepoResult<Vec<User>>;
    async fn is_following(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait LikeRepo: Send + Sync {
    /// `Forbidden` when the message belongs to `user_id`.
    async fn toggle_like(&self, user_id: Id, message_id: Id) -> RepoResult<LikeToggle>;
    async fn liked_messages(&self, user_id: Id) -> RepoResult<Vec<FeedItem>>;
    async fn liked_message_ids(&self, user_id: Id) -> RepoResult<Vec<Id>>;
}

#[async_trait]
pub trait DirectMessageRepo: Send + Sync {
    async fn find_thread(&self, a: Id, b: Id) -> RepoResult<Option<DirectMessageThread>>;
    /// Resolves (or creates) the thread for the pair and appends the message in one step.
    async fn send_direct_message(&self, new: NewDirectMessage) -> RepoResult<DirectMessage>;
    /// Oldest first.
    async fn thread_messages(&self, thread_id: Id) -> RepoResult<Vec<DirectMessage>>;
}

pub trait Repo: UserRepo + MessageRepo + FollowRepo + LikeRepo + DirectMessageRepo {}

impl<T> Repo for T where T: UserRepo + MessageRepo + FollowRepo + LikeRepo + DirectMessageRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeSet, HashMap};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tracing::{info, warn};

    const SNAPSHOT_FILE: &str = "state.json";

    fn newest_first(items: &mut [FeedItem]) {
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    }

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        messages: HashMap<Id, Message>,
        follows: BTreeSet<(Id, Id)>, // (follower, followed)
        likes: BTreeSet<(Id, Id)>,   // (user, message)
        threads: HashMap<Id, DirectMessageThread>,
        direct_messages: HashMap<Id, DirectMessage>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn name_taken(&self, username: &str, email: &str, except: Option<Id>) -> bool {
            self.users.values().any(|u| {
                Some(u.id) != except && (u.username == username || u.email == email)
            })
        }

        fn feed_item(&self, message: &Message) -> Option<FeedItem> {
            self.users.get(&message.user_id).map(|author| FeedItem::from_parts(message, author))
        }

        fn feed<'a>(&self, messages: impl Iterator<Item = &'a Message>) -> Vec<FeedItem> {
            let mut v: Vec<_> = messages.filter_map(|m| self.feed_item(m)).collect();
            newest_first(&mut v);
            v
        }

        fn users_sorted(&self, ids: impl Iterator<Item = Id>) -> Vec<User> {
            let mut v: Vec<_> = ids.filter_map(|id| self.users.get(&id).cloned()).collect();
            v.sort_by_key(|u| u.id);
            v
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("PERCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    info!("no snapshot at '{}': {e}; starting empty", path.display());
                    State::default()
                }
            }
        }

        /// Store snapshotted to `$PERCH_DATA_DIR/state.json` after every write.
        pub fn new() -> Self {
            let path = Self::data_dir().join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        /// Store that never touches the filesystem.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => { warn!("failed to serialise snapshot: {e}"); return; }
                Err(e) => { warn!("failed to read state for snapshot: {e}"); return; }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path, bytes) {
                warn!("failed to write snapshot '{}': {e}", path.display());
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.name_taken(&new.username, &new.email, None) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                username: new.username,
                email: new.email,
                bio: String::new(),
                image_url: new.image_url.unwrap_or_else(|| DEFAULT_IMAGE_URL.to_string()),
                header_image_url: DEFAULT_HEADER_IMAGE_URL.to_string(),
                password_hash: new.password_hash,
            };
            s.users.insert(id, user.clone());
            drop(s);                       // release lock before persisting
            self.persist();
            Ok(user)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
            Ok(self.read()?.users.values().find(|u| u.username == username).cloned())
        }

        async fn search_users(&self, query: Option<&str>) -> RepoResult<Vec<User>> {
            let s = self.read()?;
            let needle = query.map(str::to_lowercase);
            let mut v: Vec<_> = s.users.values()
                .filter(|u| needle.as_deref().map_or(true, |n| u.username.to_lowercase().contains(n)))
                .cloned()
                .collect();
            v.sort_by_key(|u| u.id);
            Ok(v)
        }

        async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<User> {
            let mut s = self.write()?;

            // uniqueness check before taking the mutable borrow
            if s.name_taken(&upd.username, &upd.email, Some(id)) {
                return Err(RepoError::Conflict);
            }
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.username = upd.username;
            user.email = upd.email;
            user.image_url = upd.image_url;
            user.header_image_url = upd.header_image_url;
            user.bio = upd.bio;

            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn set_password_hash(&self, id: Id, password_hash: String) -> RepoResult<()> {
            let mut s = self.write()?;
            s.users.get_mut(&id).ok_or(RepoError::NotFound)?.password_hash = password_hash;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.users.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            let owned: BTreeSet<Id> = s.messages.values()
                .filter(|m| m.user_id == id)
                .map(|m| m.id)
                .collect();
            s.messages.retain(|_, m| m.user_id != id);
            s.follows.retain(|&(a, b)| a != id && b != id);
            s.likes.retain(|&(u, m)| u != id && !owned.contains(&m));
            let threads: BTreeSet<Id> = s.threads.values()
                .filter(|t| t.user_1 == id || t.user_2 == id)
                .map(|t| t.id)
                .collect();
            s.threads.retain(|tid, _| !threads.contains(tid));
            s.direct_messages.retain(|_, dm| !threads.contains(&dm.thread_id));
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl MessageRepo for InMemRepo {
        async fn create_message(&self, new: NewMessage) -> RepoResult<Message> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.user_id) { return Err(RepoError::NotFound); }
            let id = s.next_id();
            let message = Message { id, text: new.text, timestamp: Utc::now(), user_id: new.user_id };
            s.messages.insert(id, message.clone());
            drop(s);
            self.persist();
            Ok(message)
        }

        async fn get_message(&self, id: Id) -> RepoResult<Message> {
            self.read()?.messages.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_feed_item(&self, id: Id) -> RepoResult<FeedItem> {
            let s = self.read()?;
            s.messages.get(&id).and_then(|m| s.feed_item(m)).ok_or(RepoError::NotFound)
        }

        async fn list_user_messages(&self, user_id: Id, limit: usize) -> RepoResult<Vec<FeedItem>> {
            let s = self.read()?;
            let mut v = s.feed(s.messages.values().filter(|m| m.user_id == user_id));
            v.truncate(limit);
            Ok(v)
        }

        async fn count_user_messages(&self, user_id: Id) -> RepoResult<usize> {
            Ok(self.read()?.messages.values().filter(|m| m.user_id == user_id).count())
        }

        async fn delete_message(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.messages.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            s.likes.retain(|&(_, m)| m != id);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn home_timeline(&self, user_id: Id, limit: usize) -> RepoResult<Vec<FeedItem>> {
            let s = self.read()?;
            let followed: BTreeSet<Id> = s.follows.iter()
                .filter(|(follower, _)| *follower == user_id)
                .map(|&(_, followed)| followed)
                .collect();
            let mut v = s.feed(
                s.messages.values().filter(|m| m.user_id == user_id || followed.contains(&m.user_id)),
            );
            v.truncate(limit);
            Ok(v)
        }
    }

    #[async_trait]
    impl FollowRepo for InMemRepo {
        async fn follow(&self, follower_id: Id, followed_id: Id) -> RepoResult<()> {
            if follower_id == followed_id { return Err(RepoError::Forbidden); }
            let mut s = self.write()?;
            if !s.users.contains_key(&follower_id) || !s.users.contains_key(&followed_id) {
                return Err(RepoError::NotFound);
            }
            let inserted = s.follows.insert((follower_id, followed_id));
            drop(s);
            if inserted { self.persist(); }
            Ok(())
        }

        async fn unfollow(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            let mut s = self.write()?;
            let removed = s.follows.remove(&(follower_id, followed_id));
            drop(s);
            if removed { self.persist(); }
            Ok(removed)
        }

        async fn list_following(&self, user_id: Id) -> RepoResult<Vec<User>> {
            let s = self.read()?;
            Ok(s.users_sorted(s.follows.iter().filter(|(a, _)| *a == user_id).map(|&(_, b)| b)))
        }

        async fn list_followers(&self, user_id: Id) -> RepoResult<Vec<User>> {
            let s = self.read()?;
            Ok(s.users_sorted(s.follows.iter().filter(|(_, b)| *b == user_id).map(|&(a, _)| a)))
        }

        async fn is_following(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            Ok(self.read()?.follows.contains(&(follower_id, followed_id)))
        }
    }

    #[async_trait]
    impl LikeRepo for InMemRepo {
        async fn toggle_like(&self, user_id: Id, message_id: Id) -> RepoResult<LikeToggle> {
            let mut s = self.write()?;
            let owner = s.messages.get(&message_id).ok_or(RepoError::NotFound)?.user_id;
            if owner == user_id { return Err(RepoError::Forbidden); }
            let outcome = if s.likes.remove(&(user_id, message_id)) {
                LikeToggle::Unliked
            } else {
                s.likes.insert((user_id, message_id));
                LikeToggle::Liked
            };
            drop(s);
            self.persist();
            Ok(outcome)
        }

        async fn liked_messages(&self, user_id: Id) -> RepoResult<Vec<FeedItem>> {
            let s = self.read()?;
            Ok(s.feed(
                s.likes.iter()
                    .filter(|(u, _)| *u == user_id)
                    .filter_map(|(_, m)| s.messages.get(m)),
            ))
        }

        async fn liked_message_ids(&self, user_id: Id) -> RepoResult<Vec<Id>> {
            let s = self.read()?;
            Ok(s.likes.iter().filter(|(u, _)| *u == user_id).map(|&(_, m)| m).collect())
        }
    }

    #[async_trait]
    impl DirectMessageRepo for InMemRepo {
        async fn find_thread(&self, a: Id, b: Id) -> RepoResult<Option<DirectMessageThread>> {
            Ok(self.read()?.threads.values().find(|t| t.involves(a, b)).cloned())
        }

        async fn send_direct_message(&self, new: NewDirectMessage) -> RepoResult<DirectMessage> {
            if new.sender_id == new.recipient_id { return Err(RepoError::Forbidden); }
            let mut s = self.write()?;
            if !s.users.contains_key(&new.sender_id) || !s.users.contains_key(&new.recipient_id) {
                return Err(RepoError::NotFound);
            }
            let existing = s.threads.values()
                .find(|t| t.involves(new.sender_id, new.recipient_id))
                .map(|t| t.id);
            let thread_id = match existing {
                Some(id) => id,
                None => {
                    let id = s.next_id();
                    s.threads.insert(id, DirectMessageThread { id, user_1: new.sender_id, user_2: new.recipient_id });
                    id
                }
            };
            let id = s.next_id();
            let dm = DirectMessage {
                id,
                text: new.text,
                thread_id,
                sender_id: new.sender_id,
                recipient_id: new.recipient_id,
                timestamp: Utc::now(),
            };
            s.direct_messages.insert(id, dm.clone());
            drop(s);
            self.persist();
            Ok(dm)
        }

        async fn thread_messages(&self, thread_id: Id) -> RepoResult<Vec<DirectMessage>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.direct_messages.values()
                .filter(|dm| dm.thread_id == thread_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));    // ascending
            Ok(v)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const USER_COLUMNS: &str = "id, username, email, bio, image_url, header_image_url, password_hash";

    const FEED_SELECT: &str = r#"
        SELECT m.id, m.text, m.timestamp, m.user_id, u.username, u.image_url
        FROM messages m
        JOIN users u ON u.id = m.user_id
    "#;

    fn db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    /// Make `%`, `_` and `\` match literally inside an `ILIKE ... ESCAPE '\'` pattern.
    fn escape_like(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            if matches!(c, '%' | '_' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub fn pool(&self) -> &Pool<Postgres> { &self.pool }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "INSERT INTO users (username, email, password_hash, image_url)
                 VALUES ($1, $2, $3, COALESCE($4, '{DEFAULT_IMAGE_URL}'))
                 RETURNING {USER_COLUMNS}"
            ))
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(new.image_url.as_ref())
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
                .bind(username)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }

        async fn search_users(&self, query: Option<&str>) -> RepoResult<Vec<User>> {
            sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE $1::text IS NULL OR username ILIKE '%' || $1 || '%' ESCAPE '\\'
                 ORDER BY id"
            ))
            .bind(query.map(escape_like))
            .fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "UPDATE users
                 SET username = $2, email = $3, image_url = $4, header_image_url = $5, bio = $6
                 WHERE id = $1
                 RETURNING {USER_COLUMNS}"
            ))
            .bind(id)
            .bind(&upd.username)
            .bind(&upd.email)
            .bind(&upd.image_url)
            .bind(&upd.header_image_url)
            .bind(&upd.bio)
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn set_password_hash(&self, id: Id, password_hash: String) -> RepoResult<()> {
            let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            // follows, likes, messages and DM threads cascade
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl MessageRepo for PgRepo {
        async fn create_message(&self, new: NewMessage) -> RepoResult<Message> {
            sqlx::query_as::<_, Message>(
                "INSERT INTO messages (text, user_id) VALUES ($1, $2) RETURNING id, text, timestamp, user_id"
            )
            .bind(&new.text)
            .bind(new.user_id)
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn get_message(&self, id: Id) -> RepoResult<Message> {
            sqlx::query_as::<_, Message>("SELECT id, text, timestamp, user_id FROM messages WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn get_feed_item(&self, id: Id) -> RepoResult<FeedItem> {
            sqlx::query_as::<_, FeedItem>(&format!("{FEED_SELECT} WHERE m.id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn list_user_messages(&self, user_id: Id, limit: usize) -> RepoResult<Vec<FeedItem>> {
            sqlx::query_as::<_, FeedItem>(&format!(
                "{FEED_SELECT} WHERE m.user_id = $1 ORDER BY m.timestamp DESC, m.id DESC LIMIT $2"
            ))
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn count_user_messages(&self, user_id: Id) -> RepoResult<usize> {
            let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool).await.map_err(db_err)?;
            Ok(n as usize)
        }

        async fn delete_message(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM messages WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn home_timeline(&self, user_id: Id, limit: usize) -> RepoResult<Vec<FeedItem>> {
            sqlx::query_as::<_, FeedItem>(&format!(
                "{FEED_SELECT}
                 WHERE m.user_id = $1
                    OR m.user_id IN (SELECT followed_id FROM follows WHERE follower_id = $1)
                 ORDER BY m.timestamp DESC, m.id DESC
                 LIMIT $2"
            ))
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl FollowRepo for PgRepo {
        async fn follow(&self, follower_id: Id, followed_id: Id) -> RepoResult<()> {
            if follower_id == followed_id { return Err(RepoError::Forbidden); }
            sqlx::query(
                "INSERT INTO follows (follower_id, followed_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
            )
            .bind(follower_id)
            .bind(followed_id)
            .execute(&self.pool).await.map_err(db_err)?;
            Ok(())
        }

        async fn unfollow(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            let res = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND followed_id = $2")
                .bind(follower_id)
                .bind(followed_id)
                .execute(&self.pool).await.map_err(db_err)?;
            Ok(res.rows_affected() > 0)
        }

        async fn list_following(&self, user_id: Id) -> RepoResult<Vec<User>> {
            sqlx::query_as::<_, User>(
                "SELECT u.id, u.username, u.email, u.bio, u.image_url, u.header_image_url, u.password_hash
                 FROM follows f JOIN users u ON u.id = f.followed_id
                 WHERE f.follower_id = $1
                 ORDER BY u.id"
            )
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn list_followers(&self, user_id: Id) -> RepoResult<Vec<User>> {
            sqlx::query_as::<_, User>(
                "SELECT u.id, u.username, u.email, u.bio, u.image_url, u.header_image_url, u.password_hash
                 FROM follows f JOIN users u ON u.id = f.follower_id
                 WHERE f.followed_id = $1
                 ORDER BY u.id"
            )
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn is_following(&self, follower_id: Id, followed_id: Id) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND followed_id = $2)"
            )
            .bind(follower_id)
            .bind(followed_id)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl LikeRepo for PgRepo {
        async fn toggle_like(&self, user_id: Id, message_id: Id) -> RepoResult<LikeToggle> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let owner: Id = sqlx::query_scalar("SELECT user_id FROM messages WHERE id = $1 FOR SHARE")
                .bind(message_id)
                .fetch_optional(&mut *tx).await.map_err(db_err)?
                .ok_or(RepoError::NotFound)?;
            if owner == user_id { return Err(RepoError::Forbidden); }
            let removed = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND message_id = $2")
                .bind(user_id)
                .bind(message_id)
                .execute(&mut *tx).await.map_err(db_err)?
                .rows_affected();
            let outcome = if removed > 0 {
                LikeToggle::Unliked
            } else {
                sqlx::query("INSERT INTO likes (user_id, message_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                    .bind(user_id)
                    .bind(message_id)
                    .execute(&mut *tx).await.map_err(db_err)?;
                LikeToggle::Liked
            };
            tx.commit().await.map_err(db_err)?;
            Ok(outcome)
        }

        async fn liked_messages(&self, user_id: Id) -> RepoResult<Vec<FeedItem>> {
            sqlx::query_as::<_, FeedItem>(&format!(
                "{FEED_SELECT}
                 JOIN likes l ON l.message_id = m.id
                 WHERE l.user_id = $1
                 ORDER BY m.timestamp DESC, m.id DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn liked_message_ids(&self, user_id: Id) -> RepoResult<Vec<Id>> {
            sqlx::query_scalar::<_, Id>("SELECT message_id FROM likes WHERE user_id = $1 ORDER BY message_id")
                .bind(user_id)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl DirectMessageRepo for PgRepo {
        async fn find_thread(&self, a: Id, b: Id) -> RepoResult<Option<DirectMessageThread>> {
            sqlx::query_as::<_, DirectMessageThread>(
                "SELECT id, user_1, user_2 FROM direct_message_threads
                 WHERE LEAST(user_1, user_2) = LEAST($1::bigint, $2::bigint)
                   AND GREATEST(user_1, user_2) = GREATEST($1::bigint, $2::bigint)"
            )
            .bind(a)
            .bind(b)
            .fetch_optional(&self.pool).await.map_err(db_err)
        }

        async fn send_direct_message(&self, new: NewDirectMessage) -> RepoResult<DirectMessage> {
            if new.sender_id == new.recipient_id { return Err(RepoError::Forbidden); }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            // the no-op update makes RETURNING yield the existing row on conflict
            let thread = sqlx::query_as::<_, DirectMessageThread>(
                "INSERT INTO direct_message_threads (user_1, user_2) VALUES ($1, $2)
                 ON CONFLICT ((LEAST(user_1, user_2)), (GREATEST(user_1, user_2)))
                 DO UPDATE SET user_1 = direct_message_threads.user_1
                 RETURNING id, user_1, user_2"
            )
            .bind(new.sender_id)
            .bind(new.recipient_id)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            let dm = sqlx::query_as::<_, DirectMessage>(
                "INSERT INTO direct_messages (text, thread_id, sender_id, recipient_id)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, text, thread_id, sender_id, recipient_id, timestamp"
            )
            .bind(&new.text)
            .bind(thread.id)
            .bind(new.sender_id)
            .bind(new.recipient_id)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(dm)
        }

        async fn thread_messages(&self, thread_id: Id) -> RepoResult<Vec<DirectMessage>> {
            sqlx::query_as::<_, DirectMessage>(
                "SELECT id, text, thread_id, sender_id, recipient_id, timestamp
                 FROM direct_messages WHERE thread_id = $1
                 ORDER BY timestamp ASC, id ASC"
            )
            .bind(thread_id)
            .fetch_all(&self.pool).await.map_err(db_err)
        }
    }

}
