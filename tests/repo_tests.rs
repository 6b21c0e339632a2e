#![cfg(feature = "inmem-store")]

use perch::{
    models::{LikeToggle, NewDirectMessage, NewMessage, NewUser, UpdateProfile, User, DEFAULT_IMAGE_URL},
    repo::{inmem::InMemRepo, RepoError},
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use perch::repo::{DirectMessageRepo, FollowRepo, LikeRepo, MessageRepo, UserRepo};

/// Fresh, empty repository that never writes a snapshot.
fn repo() -> InMemRepo {
    InMemRepo::ephemeral()
}

async fn user(r: &InMemRepo, name: &str) -> User {
    r.create_user(NewUser {
        username: name.into(),
        email: format!("{name}@example.com"),
        password_hash: "x".into(),
        image_url: None,
    })
    .await
    .unwrap()
}

async fn post(r: &InMemRepo, author: &User, text: &str) -> i64 {
    r.create_message(NewMessage { user_id: author.id, text: text.into() }).await.unwrap().id
}

#[tokio::test]
async fn signup_uniqueness_and_defaults() {
    let r = repo();
    let alice = user(&r, "alice").await;
    assert_eq!(alice.image_url, DEFAULT_IMAGE_URL);
    assert_eq!(alice.bio, "");

    // same username, different email
    let err = r
        .create_user(NewUser {
            username: "alice".into(),
            email: "other@example.com".into(),
            password_hash: "x".into(),
            image_url: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    // same email, different username
    let err = r
        .create_user(NewUser {
            username: "alice2".into(),
            email: "alice@example.com".into(),
            password_hash: "x".into(),
            image_url: Some("http://img/a.png".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
    assert_eq!(r.search_users(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn search_is_case_insensitive_substring() {
    let r = repo();
    user(&r, "Alice").await;
    user(&r, "malice").await;
    user(&r, "bob").await;
    let hits: Vec<_> = r.search_users(Some("ALI")).await.unwrap().into_iter().map(|u| u.username).collect();
    assert_eq!(hits, ["Alice", "malice"]);
    assert!(r.search_users(Some("zzz")).await.unwrap().is_empty());
}

#[tokio::test]
async fn search_matches_underscore_and_percent_literally() {
    let r = repo();
    user(&r, "a_b").await;
    user(&r, "axb").await;
    let hits: Vec<_> = r.search_users(Some("a_b")).await.unwrap().into_iter().map(|u| u.username).collect();
    assert_eq!(hits, ["a_b"]);
    assert!(r.search_users(Some("a%")).await.unwrap().is_empty());
}

#[tokio::test]
async fn profile_update_rejects_taken_names() {
    let r = repo();
    let alice = user(&r, "alice").await;
    user(&r, "bob").await;
    let upd = |username: &str| UpdateProfile {
        username: username.into(),
        email: "alice@example.com".into(),
        image_url: DEFAULT_IMAGE_URL.into(),
        header_image_url: "h".into(),
        bio: "hi".into(),
    };
    assert!(matches!(r.update_profile(alice.id, upd("bob")).await, Err(RepoError::Conflict)));
    // keeping your own name is fine
    let updated = r.update_profile(alice.id, upd("alice")).await.unwrap();
    assert_eq!(updated.bio, "hi");
}

#[tokio::test]
async fn follow_unfollow_and_self_follow() {
    let r = repo();
    let u1 = user(&r, "u1").await;
    let u2 = user(&r, "u2").await;

    r.follow(u1.id, u2.id).await.unwrap();
    r.follow(u1.id, u2.id).await.unwrap(); // idempotent
    assert!(r.is_following(u1.id, u2.id).await.unwrap());
    assert!(!r.is_following(u2.id, u1.id).await.unwrap());
    assert_eq!(r.list_following(u1.id).await.unwrap(), vec![u2.clone()]);
    assert_eq!(r.list_followers(u2.id).await.unwrap(), vec![u1.clone()]);

    assert!(matches!(r.follow(u1.id, u1.id).await, Err(RepoError::Forbidden)));
    assert!(matches!(r.follow(u1.id, 9999).await, Err(RepoError::NotFound)));

    assert!(r.unfollow(u1.id, u2.id).await.unwrap());
    assert!(!r.unfollow(u1.id, u2.id).await.unwrap());
    assert!(r.list_following(u1.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn home_timeline_includes_self_and_followed_newest_first() {
    let r = repo();
    let u1 = user(&r, "u1").await;
    let u2 = user(&r, "u2").await;
    let u3 = user(&r, "u3").await;

    assert!(r.home_timeline(u1.id, 100).await.unwrap().is_empty());

    let m_own = post(&r, &u1, "mine").await;
    let m_followed = post(&r, &u2, "followed").await;
    post(&r, &u3, "stranger").await;
    r.follow(u1.id, u2.id).await.unwrap();

    let ids: Vec<_> = r.home_timeline(u1.id, 100).await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, [m_followed, m_own]);

    let feed = r.home_timeline(u1.id, 1).await.unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].username, "u2");
}

#[tokio::test]
async fn like_toggles_and_own_message_is_forbidden() {
    let r = repo();
    let u1 = user(&r, "u1").await;
    let u2 = user(&r, "u2").await;
    let m = post(&r, &u2, "likeable").await;

    assert_eq!(r.toggle_like(u1.id, m).await.unwrap(), LikeToggle::Liked);
    assert_eq!(r.liked_message_ids(u1.id).await.unwrap(), vec![m]);
    assert_eq!(r.liked_messages(u1.id).await.unwrap()[0].text, "likeable");
    assert_eq!(r.toggle_like(u1.id, m).await.unwrap(), LikeToggle::Unliked);
    assert!(r.liked_message_ids(u1.id).await.unwrap().is_empty());

    assert!(matches!(r.toggle_like(u2.id, m).await, Err(RepoError::Forbidden)));
    assert!(matches!(r.toggle_like(u1.id, 9999).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn deleting_a_message_drops_its_likes() {
    let r = repo();
    let u1 = user(&r, "u1").await;
    let u2 = user(&r, "u2").await;
    let m = post(&r, &u2, "soon gone").await;
    r.toggle_like(u1.id, m).await.unwrap();

    r.delete_message(m).await.unwrap();
    assert!(r.liked_message_ids(u1.id).await.unwrap().is_empty());
    assert!(matches!(r.get_message(m).await, Err(RepoError::NotFound)));
    assert!(matches!(r.delete_message(m).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn direct_message_thread_is_shared_by_the_pair() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;

    assert!(r.find_thread(a.id, b.id).await.unwrap().is_none());
    let first = r
        .send_direct_message(NewDirectMessage { sender_id: a.id, recipient_id: b.id, text: "hi".into() })
        .await
        .unwrap();
    let reply = r
        .send_direct_message(NewDirectMessage { sender_id: b.id, recipient_id: a.id, text: "hey".into() })
        .await
        .unwrap();
    assert_eq!(first.thread_id, reply.thread_id);

    let thread = r.find_thread(b.id, a.id).await.unwrap().unwrap();
    assert_eq!(thread.id, first.thread_id);
    assert_eq!(thread.other_participant(a.id), Some(b.id));

    let texts: Vec<_> = r.thread_messages(thread.id).await.unwrap().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, ["hi", "hey"]);

    let other = r
        .send_direct_message(NewDirectMessage { sender_id: a.id, recipient_id: c.id, text: "yo".into() })
        .await
        .unwrap();
    assert_ne!(other.thread_id, thread.id);

    let err = r
        .send_direct_message(NewDirectMessage { sender_id: a.id, recipient_id: a.id, text: "me".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));
}

#[tokio::test]
async fn deleting_a_user_cascades() {
    let r = repo();
    let u1 = user(&r, "u1").await;
    let u2 = user(&r, "u2").await;
    let m1 = post(&r, &u1, "by u1").await;
    let m2 = post(&r, &u2, "by u2").await;
    r.follow(u1.id, u2.id).await.unwrap();
    r.follow(u2.id, u1.id).await.unwrap();
    r.toggle_like(u2.id, m1).await.unwrap();
    r.toggle_like(u1.id, m2).await.unwrap();
    r.send_direct_message(NewDirectMessage { sender_id: u1.id, recipient_id: u2.id, text: "bye".into() })
        .await
        .unwrap();

    r.delete_user(u1.id).await.unwrap();

    assert!(matches!(r.get_user(u1.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.get_message(m1).await, Err(RepoError::NotFound)));
    assert!(r.list_followers(u2.id).await.unwrap().is_empty());
    assert!(r.list_following(u2.id).await.unwrap().is_empty());
    assert!(r.liked_message_ids(u2.id).await.unwrap().is_empty());
    assert!(r.find_thread(u1.id, u2.id).await.unwrap().is_none());
    assert_eq!(r.home_timeline(u2.id, 100).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial_test::serial]
async fn snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("PERCH_DATA_DIR", dir.path());
    let r = InMemRepo::new();
    let alice = user(&r, "alice").await;
    post(&r, &alice, "persisted").await;

    let reopened = InMemRepo::new();
    std::env::remove_var("PERCH_DATA_DIR");
    assert_eq!(reopened.get_user(alice.id).await.unwrap().username, "alice");
    assert_eq!(reopened.count_user_messages(alice.id).await.unwrap(), 1);
}
