use std::sync::Arc;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::{debug, info};

use crate::assets;
use crate::auth::{self, CurrentUser, GuardContext, RequireLogin};
use crate::error::ApiError;
use crate::forms::*;
use crate::models::*;
use crate::rate_limit::{Action, RateLimitConfig, RateLimiter};
use crate::repo::{Repo, RepoError};
use crate::session::{FlashKind, Session};
use crate::views::{self, PageContext, ProfileSummary};

pub fn config(cfg: &mut web::ServiceConfig) {
    let login_required = || RequireLogin::new(GuardContext::UserDetails);

    cfg.service(web::resource("/").route(web::get().to(homepage)))
        .service(
            web::resource("/signup")
                .route(web::get().to(signup_form))
                .route(web::post().to(signup)),
        )
        .service(
            web::resource("/login")
                .route(web::get().to(login_form))
                .route(web::post().to(login)),
        )
        .service(
            web::resource("/logout")
                .wrap(RequireLogin::new(GuardContext::Logout))
                .route(web::get().to(logout)),
        )
        .service(web::resource("/users").route(web::get().to(list_users)))
        // fixed /users/... paths must be registered before /users/{id}
        .service(
            web::resource("/users/profile")
                .wrap(login_required())
                .route(web::get().to(profile_form))
                .route(web::post().to(update_profile)),
        )
        .service(
            web::resource("/users/account")
                .wrap(login_required())
                .route(web::get().to(change_password_form))
                .route(web::post().to(change_password)),
        )
        .service(
            web::resource("/users/delete")
                .wrap(login_required())
                .route(web::post().to(delete_user)),
        )
        .service(
            web::resource("/users/message")
                .wrap(login_required())
                .route(web::get().to(direct_message_back))
                .route(web::post().to(send_direct_message)),
        )
        .service(
            web::resource("/users/follow/{id}")
                .wrap(login_required())
                .route(web::post().to(add_follow)),
        )
        .service(
            web::resource("/users/stop-following/{id}")
                .wrap(login_required())
                .route(web::post().to(stop_following)),
        )
        .service(
            web::resource("/users/toggle_like/{id}")
                .wrap(login_required())
                .route(web::get().to(toggle_like))
                .route(web::post().to(toggle_like)),
        )
        .service(web::resource("/users/{id}").route(web::get().to(users_show)))
        .service(
            web::resource("/users/{id}/following")
                .wrap(login_required())
                .route(web::get().to(show_following)),
        )
        .service(
            web::resource("/users/{id}/followers")
                .wrap(login_required())
                .route(web::get().to(show_followers)),
        )
        .service(web::resource("/users/{id}/likes").route(web::get().to(show_likes)))
        .service(
            web::resource("/messages/new")
                .wrap(login_required())
                .route(web::get().to(new_message_form))
                .route(web::post().to(add_message)),
        )
        .service(web::resource("/messages/{id}").route(web::get().to(show_message)))
        .service(
            web::resource("/messages/{id}/delete")
                .wrap(login_required())
                .route(web::post().to(delete_message)),
        )
        .service(web::resource("/static/{path:.*}").route(web::get().to(assets::serve)));
}

#[derive(Clone)]
pub struct AppState { pub repo: Arc<dyn Repo>, pub rate_limiter: RateLimiter }

impl AppState {
    /// State with rate limiting switched off.
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo, rate_limiter: RateLimiter::new(RateLimitConfig::disabled()) }
    }

    pub fn with_rate_limits(mut self, cfg: RateLimitConfig) -> Self {
        self.rate_limiter = RateLimiter::new(cfg);
        self
    }
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().insert_header((header::LOCATION, location)).finish()
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok().content_type(views::HTML).body(body)
}

fn user_page(id: Id) -> String {
    format!("/users/{id}")
}

async fn profile_summary(repo: &dyn Repo, user: User, viewer: Option<Id>) -> Result<ProfileSummary, ApiError> {
    let message_count = repo.count_user_messages(user.id).await?;
    let following_count = repo.list_following(user.id).await?.len();
    let follower_count = repo.list_followers(user.id).await?.len();
    let like_count = repo.liked_message_ids(user.id).await?.len();
    let viewer_follows = match viewer {
        Some(v) if v != user.id => repo.is_following(v, user.id).await?,
        _ => false,
    };
    Ok(ProfileSummary { user, message_count, following_count, follower_count, like_count, viewer_follows })
}

// ---------------- signup / login / logout ---------------------------

pub async fn signup_form(session: Session, viewer: Option<CurrentUser>) -> HttpResponse {
    let ctx = PageContext::new(&session, viewer.as_ref().map(|v| &v.0));
    html(views::signup(&ctx, &SignupForm::default(), &FormErrors::default()))
}

pub async fn signup(
    session: Session,
    viewer: Option<CurrentUser>,
    data: web::Data<AppState>,
    form: web::Form<SignupForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    let viewer = viewer.map(|v| v.0);
    if let Err(errors) = form.validate() {
        return Ok(html(views::signup(&PageContext::new(&session, viewer.as_ref()), &form, &errors)));
    }
    let password_hash = auth::hash_password(&form.password).map_err(|e| {
        log::error!("password hashing failed: {e}");
        ApiError::Internal
    })?;
    let new = NewUser {
        username: form.username.trim().to_string(),
        email: form.email.trim().to_string(),
        password_hash,
        image_url: form.image_url(),
    };
    match data.repo.create_user(new).await {
        Ok(user) => {
            info!(user_id = user.id, "new user signed up");
            session.log_in(user.id);
            session.flash(FlashKind::Info, "Congrats on signing up!");
            Ok(redirect("/"))
        }
        Err(RepoError::Conflict) => {
            session.flash(FlashKind::Danger, "Username already taken");
            let ctx = PageContext::new(&session, viewer.as_ref());
            Ok(html(views::signup(&ctx, &form, &FormErrors::default())))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn login_form(session: Session, viewer: Option<CurrentUser>) -> HttpResponse {
    if viewer.is_some() {
        return redirect("/");
    }
    html(views::login(&PageContext::new(&session, None), &LoginForm::default(), &FormErrors::default()))
}

pub async fn login(
    session: Session,
    viewer: Option<CurrentUser>,
    data: web::Data<AppState>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse, ApiError> {
    if viewer.is_some() {
        return Ok(redirect("/"));
    }
    let form = form.into_inner();
    if let Err(errors) = form.validate() {
        return Ok(html(views::login(&PageContext::new(&session, None), &form, &errors)));
    }
    match auth::authenticate(&*data.repo, form.username.trim(), &form.password).await? {
        Some(user) => {
            info!(user_id = user.id, "user logged in");
            session.log_in(user.id);
            session.flash(FlashKind::Success, format!("Hello, {}!", user.username));
            Ok(redirect("/"))
        }
        None => {
            session.flash(FlashKind::Danger, "Invalid credentials.");
            Ok(html(views::login(&PageContext::new(&session, None), &form, &FormErrors::default())))
        }
    }
}

pub async fn logout(session: Session, me: CurrentUser) -> HttpResponse {
    session.log_out();
    session.flash(FlashKind::Success, "You have been logged out");
    info!(user_id = me.id(), "user logged out");
    redirect("/")
}

// ---------------- users ---------------------------------------------

#[derive(Deserialize)]
pub struct UserSearch {
    q: Option<String>,
}

pub async fn list_users(
    session: Session,
    viewer: Option<CurrentUser>,
    data: web::Data<AppState>,
    query: web::Query<UserSearch>,
) -> Result<HttpResponse, ApiError> {
    let q = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let users = data.repo.search_users(q).await?;
    let ctx = PageContext::new(&session, viewer.as_ref().map(|v| &v.0));
    Ok(html(views::users_index(&ctx, &users, q)))
}

pub async fn users_show(
    session: Session,
    viewer: Option<CurrentUser>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(path.into_inner()).await?;
    let messages = data.repo.list_user_messages(user.id, TIMELINE_LIMIT).await?;
    let viewer = viewer.map(|v| v.0);
    let summary = profile_summary(&*data.repo, user, viewer.as_ref().map(|v| v.id)).await?;
    let ctx = PageContext::new(&session, viewer.as_ref());
    Ok(html(views::user_show(&ctx, &summary, &messages)))
}

pub async fn show_following(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(path.into_inner()).await?;
    let following = data.repo.list_following(user.id).await?;
    let summary = profile_summary(&*data.repo, user, Some(me.id())).await?;
    let ctx = PageContext::new(&session, Some(&me.0));
    Ok(html(views::following(&ctx, &summary, &following)))
}

pub async fn show_followers(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(path.into_inner()).await?;
    let followers = data.repo.list_followers(user.id).await?;
    let summary = profile_summary(&*data.repo, user, Some(me.id())).await?;
    let ctx = PageContext::new(&session, Some(&me.0));
    Ok(html(views::followers(&ctx, &summary, &followers)))
}

pub async fn show_likes(
    session: Session,
    viewer: Option<CurrentUser>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(path.into_inner()).await?;
    let liked = data.repo.liked_messages(user.id).await?;
    let viewer = viewer.map(|v| v.0);
    let summary = profile_summary(&*data.repo, user, viewer.as_ref().map(|v| v.id)).await?;
    let ctx = PageContext::new(&session, viewer.as_ref());
    Ok(html(views::likes(&ctx, &summary, &liked)))
}

pub async fn add_follow(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let followed = data.repo.get_user(path.into_inner()).await?;
    match data.repo.follow(me.id(), followed.id).await {
        Ok(()) => debug!(follower = me.id(), followed = followed.id, "follow"),
        Err(RepoError::Forbidden) => session.flash(FlashKind::Danger, "You can't follow yourself"),
        Err(e) => return Err(e.into()),
    }
    Ok(redirect(&format!("/users/{}/following", me.id())))
}

pub async fn stop_following(
    me: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let followed = data.repo.get_user(path.into_inner()).await?;
    data.repo.unfollow(me.id(), followed.id).await?;
    Ok(redirect(&format!("/users/{}/following", me.id())))
}

pub async fn profile_form(session: Session, me: CurrentUser) -> HttpResponse {
    let ctx = PageContext::new(&session, Some(&me.0));
    html(views::edit_profile(&ctx, &ProfileEditForm::for_user(&me.0), &FormErrors::default()))
}

pub async fn update_profile(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    form: web::Form<ProfileEditForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    if let Err(errors) = form.validate() {
        return Ok(html(views::edit_profile(&PageContext::new(&session, Some(&me.0)), &form, &errors)));
    }
    if !auth::verify_password(&form.password, &me.0.password_hash) {
        session.flash(FlashKind::Danger, "Incorrect password");
        let ctx = PageContext::new(&session, Some(&me.0));
        return Ok(html(views::edit_profile(&ctx, &form, &FormErrors::default())));
    }
    match data.repo.update_profile(me.id(), form.to_update(&me.0)).await {
        Ok(user) => {
            session.flash(FlashKind::Success, "Profile successfully updated");
            Ok(redirect(&user_page(user.id)))
        }
        Err(RepoError::Conflict) => {
            session.flash(FlashKind::Danger, "Username or email already taken");
            let ctx = PageContext::new(&session, Some(&me.0));
            Ok(html(views::edit_profile(&ctx, &form, &FormErrors::default())))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_user(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    data.repo.delete_user(me.id()).await?;
    session.log_out();
    session.flash(FlashKind::Success, "You have been logged out");
    info!(user_id = me.id(), "account deleted");
    Ok(redirect("/signup"))
}

pub async fn change_password_form(session: Session, me: CurrentUser) -> HttpResponse {
    html(views::change_password(&PageContext::new(&session, Some(&me.0)), &FormErrors::default()))
}

pub async fn change_password(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    form: web::Form<ChangePasswordForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    if let Err(errors) = form.validate() {
        return Ok(html(views::change_password(&PageContext::new(&session, Some(&me.0)), &errors)));
    }
    if auth::change_password(&*data.repo, &me.0, &form.current_password, &form.new_password).await? {
        session.flash(FlashKind::Success, "Your password has been updated");
    } else {
        session.flash(FlashKind::Danger, "Current password is incorrect");
    }
    Ok(html(views::change_password(&PageContext::new(&session, Some(&me.0)), &FormErrors::default())))
}

// ---------------- messages ------------------------------------------

pub async fn new_message_form(session: Session, me: CurrentUser) -> HttpResponse {
    let ctx = PageContext::new(&session, Some(&me.0));
    html(views::new_message(&ctx, &MessageForm::default(), &FormErrors::default()))
}

pub async fn add_message(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    form: web::Form<MessageForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    if let Err(errors) = form.validate() {
        return Ok(html(views::new_message(&PageContext::new(&session, Some(&me.0)), &form, &errors)));
    }
    if !data.rate_limiter.allow(Action::Message, me.id()) {
        return Err(ApiError::TooManyRequests);
    }
    let message = data.repo
        .create_message(NewMessage { user_id: me.id(), text: form.text.trim().to_string() })
        .await?;
    debug!(message_id = message.id, user_id = me.id(), "message posted");
    Ok(redirect(&user_page(me.id())))
}

pub async fn show_message(
    session: Session,
    viewer: Option<CurrentUser>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let message = data.repo.get_feed_item(path.into_inner()).await?;
    let ctx = PageContext::new(&session, viewer.as_ref().map(|v| &v.0));
    Ok(html(views::message_show(&ctx, &message)))
}

pub async fn delete_message(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let message = data.repo.get_message(path.into_inner()).await?;
    if message.user_id != me.id() {
        session.flash(FlashKind::Danger, "Access unauthorized");
        return Ok(redirect("/"));
    }
    data.repo.delete_message(message.id).await?;
    Ok(redirect(&user_page(me.id())))
}

pub async fn toggle_like(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let message_id = path.into_inner();
    match data.repo.toggle_like(me.id(), message_id).await {
        Ok(outcome) => debug!(user_id = me.id(), message_id, ?outcome, "like toggled"),
        Err(RepoError::Forbidden) => session.flash(FlashKind::Danger, "You can't like your own message"),
        Err(e) => return Err(e.into()),
    }
    Ok(redirect("/"))
}

// ---------------- direct messages -----------------------------------

/// The compose form only accepts POSTs; send stray GETs back where they came from.
pub async fn direct_message_back(req: HttpRequest) -> HttpResponse {
    let back = req
        .headers()
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("/");
    redirect(back)
}

pub async fn send_direct_message(
    session: Session,
    me: CurrentUser,
    data: web::Data<AppState>,
    form: web::Form<DirectMessageForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    let to_id = form.recipient().ok_or(ApiError::NotFound)?;
    let send_to = data.repo.get_user(to_id).await?;
    if send_to.id == me.id() {
        session.flash(FlashKind::Danger, "You can't message yourself");
        return Ok(redirect(&user_page(me.id())));
    }
    let message = form.message();
    let errors = match message.validate() {
        Ok(()) => {
            if !data.rate_limiter.allow(Action::DirectMessage, me.id()) {
                return Err(ApiError::TooManyRequests);
            }
            let dm = data.repo
                .send_direct_message(NewDirectMessage {
                    sender_id: me.id(),
                    recipient_id: send_to.id,
                    text: message.text.trim().to_string(),
                })
                .await?;
            debug!(thread_id = dm.thread_id, sender = me.id(), "direct message sent");
            session.flash(FlashKind::Success, "Your message has been sent");
            return Ok(redirect(&user_page(send_to.id)));
        }
        // a blank form just opens the conversation
        Err(_) if message.text.trim().is_empty() => FormErrors::default(),
        Err(errors) => errors,
    };
    let history = match data.repo.find_thread(me.id(), send_to.id).await? {
        Some(thread) => data.repo.thread_messages(thread.id).await?,
        None => Vec::new(),
    };
    let ctx = PageContext::new(&session, Some(&me.0));
    Ok(html(views::direct_message(&ctx, &me.0, &send_to, &message, &errors, &history)))
}

// ---------------- home ----------------------------------------------

pub async fn homepage(
    session: Session,
    viewer: Option<CurrentUser>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let Some(CurrentUser(user)) = viewer else {
        return Ok(html(views::home_anon(&PageContext::new(&session, None))));
    };
    let messages = data.repo.home_timeline(user.id, TIMELINE_LIMIT).await?;
    let liked = data.repo.liked_message_ids(user.id).await?;
    Ok(html(views::home(&PageContext::new(&session, Some(&user)), &messages, &liked)))
}
