#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use actix_web::test;
use perch::rate_limit::RateLimitConfig;
use perch::repo::inmem::InMemRepo;
use perch::repo::MessageRepo;
use perch::AppState;

use common::{login_cookie, seed_user};

fn limits(message_limit: usize, dm_limit: usize) -> RateLimitConfig {
    RateLimitConfig {
        enabled: true,
        message_limit,
        message_window: Duration::from_secs(300),
        dm_limit,
        dm_window: Duration::from_secs(300),
    }
}

#[actix_web::test]
async fn rate_limit_message_posting() {
    let repo = InMemRepo::ephemeral();
    let alice = seed_user(&repo, "alice").await;
    let bob = seed_user(&repo, "bob").await;
    let state = AppState::new(Arc::new(repo.clone())).with_rate_limits(limits(1, 100));
    let app = test_app!(state: state);

    let post = |uid: i64| {
        test::TestRequest::post()
            .uri("/messages/new")
            .cookie(login_cookie(uid))
            .set_form([("text", "hello")])
            .to_request()
    };

    assert_eq!(test::call_service(&app, post(alice.id)).await.status(), 302, "first post allowed");
    assert_eq!(test::call_service(&app, post(alice.id)).await.status(), 429, "second post limited");
    // limits are per user
    assert_eq!(test::call_service(&app, post(bob.id)).await.status(), 302);
    assert_eq!(repo.count_user_messages(alice.id).await.unwrap(), 1);
}

#[actix_web::test]
async fn rate_limit_direct_messages() {
    let repo = InMemRepo::ephemeral();
    let alice = seed_user(&repo, "alice").await;
    let bob = seed_user(&repo, "bob").await;
    let app = test_app!(state: AppState::new(Arc::new(repo.clone())).with_rate_limits(limits(100, 1)));

    let send = || {
        test::TestRequest::post()
            .uri("/users/message")
            .cookie(login_cookie(alice.id))
            .set_form([("send-to", bob.id.to_string()), ("text", "hi".to_string())])
            .to_request()
    };
    assert_eq!(test::call_service(&app, send()).await.status(), 302);
    assert_eq!(test::call_service(&app, send()).await.status(), 429);

    // posting to the public timeline is a separate budget
    let req = test::TestRequest::post()
        .uri("/messages/new")
        .cookie(login_cookie(alice.id))
        .set_form([("text", "still fine")])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 302);
}
