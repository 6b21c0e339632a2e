#![cfg(feature = "inmem-store")]

mod common;

use actix_web::test;
use perch::repo::inmem::InMemRepo;
use perch::repo::UserRepo;
use perch::session::{SessionState, SESSION_COOKIE};

use common::{flash_texts, location, login_cookie, seed_user, session_after, session_cookie, PASSWORD};

#[actix_web::test]
async fn login_sets_session_and_greets() {
    let repo = InMemRepo::ephemeral();
    let alice = seed_user(&repo, "alice").await;
    let app = test_app!(repo.clone());

    let req = test::TestRequest::post()
        .uri("/login")
        .set_form([("username", "alice"), ("password", PASSWORD)])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), "/");
    let session = session_after(&resp);
    assert_eq!(session.uid, Some(alice.id));
    assert_eq!(flash_texts(&resp), ["Hello, alice!"]);

    // the cookie is HttpOnly and scoped to the whole site
    let cookie = session_cookie(&resp).unwrap();
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.path(), Some("/"));
}

#[actix_web::test]
async fn bad_credentials_rerender_login_form() {
    let repo = InMemRepo::ephemeral();
    seed_user(&repo, "alice").await;
    let app = test_app!(repo.clone());

    for (username, password) in [("alice", "wrongpass"), ("nobody", PASSWORD)] {
        let req = test::TestRequest::post()
            .uri("/login")
            .set_form([("username", username), ("password", password)])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(session_after(&resp).uid, None);
        // flash is rendered on the page itself and consumed
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("Invalid credentials."), "{body}");
    }
}

#[actix_web::test]
async fn guarded_route_redirects_anonymous_users() {
    let app = test_app!(InMemRepo::ephemeral());

    let req = test::TestRequest::get().uri("/users/profile").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), "/login");
    assert_eq!(flash_texts(&resp), ["Access unauthorized."]);

    let req = test::TestRequest::get().uri("/logout").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(location(&resp), "/login");
    assert_eq!(flash_texts(&resp), ["You aren't currently logged in"]);
}

#[actix_web::test]
async fn logout_clears_the_user() {
    let repo = InMemRepo::ephemeral();
    let alice = seed_user(&repo, "alice").await;
    let app = test_app!(repo.clone());

    let req = test::TestRequest::get().uri("/logout").cookie(login_cookie(alice.id)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(location(&resp), "/");
    let session = session_after(&resp);
    assert_eq!(session.uid, None);
    assert_eq!(flash_texts(&resp), ["You have been logged out"]);
}

#[actix_web::test]
async fn tampered_cookie_is_ignored() {
    let repo = InMemRepo::ephemeral();
    let alice = seed_user(&repo, "alice").await;
    let app = test_app!(repo.clone());

    let forged = perch::SessionKey::new("some-other-secret")
        .cookie_for(&SessionState { uid: Some(alice.id), flashes: vec![] })
        .unwrap();
    let req = test::TestRequest::get().uri("/users/profile").cookie(forged).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(location(&resp), "/login");
}

#[actix_web::test]
async fn session_for_deleted_user_is_logged_out() {
    let repo = InMemRepo::ephemeral();
    let alice = seed_user(&repo, "alice").await;
    let app = test_app!(repo.clone());
    repo.delete_user(alice.id).await.unwrap();

    let req = test::TestRequest::get().uri("/").cookie(login_cookie(alice.id)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    // session emptied, so the cookie is removed
    let cookie = session_cookie(&resp).unwrap();
    assert_eq!(cookie.name(), SESSION_COOKIE);
    assert_eq!(cookie.value(), "");
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("Sign up now"));
}

#[actix_web::test]
async fn change_password_requires_current_password() {
    let repo = InMemRepo::ephemeral();
    let alice = seed_user(&repo, "alice").await;
    let app = test_app!(repo.clone());

    let req = test::TestRequest::post()
        .uri("/users/account")
        .cookie(login_cookie(alice.id))
        .set_form([
            ("current_password", "not-it-at-all"),
            ("new_password", "newpass1"),
            ("confirm_new_password", "newpass1"),
        ])
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert!(String::from_utf8_lossy(&body).contains("Current password is incorrect"));

    let req = test::TestRequest::post()
        .uri("/users/account")
        .cookie(login_cookie(alice.id))
        .set_form([
            ("current_password", PASSWORD),
            ("new_password", "newpass1"),
            ("confirm_new_password", "newpass1"),
        ])
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert!(String::from_utf8_lossy(&body).contains("Your password has been updated"));

    let stored = repo.get_user(alice.id).await.unwrap();
    assert!(perch::auth::verify_password("newpass1", &stored.password_hash));
}
