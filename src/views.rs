//! Server-rendered HTML pages.

use std::fmt::Write as _;

use crate::forms::{FormErrors, LoginForm, MessageForm, ProfileEditForm, SignupForm};
use crate::models::{DirectMessage, FeedItem, Id, User, MESSAGE_MAX_LEN};
use crate::session::{Flash, FlashKind, Session};

pub const HTML: &str = "text/html; charset=utf-8";

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Everything the shared layout needs: who is looking and what to tell them.
pub struct PageContext {
    pub user: Option<User>,
    pub flashes: Vec<Flash>,
}

impl PageContext {
    /// Consumes the session's pending flashes.
    pub fn new(session: &Session, user: Option<&User>) -> Self {
        Self { user: user.cloned(), flashes: session.take_flashes() }
    }

    fn viewer_id(&self) -> Option<Id> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// Counts and relationship shown on a profile header.
pub struct ProfileSummary {
    pub user: User,
    pub message_count: usize,
    pub following_count: usize,
    pub follower_count: usize,
    pub like_count: usize,
    pub viewer_follows: bool,
}

fn layout(ctx: &PageContext, title: &str, body: &str) -> String {
    let nav = match &ctx.user {
        Some(u) => format!(
            r#"<li><a href="/users/{id}">@{name}</a></li><li><a href="/messages/new">New Message</a></li><li><a href="/users/profile">Edit Profile</a></li><li><a href="/logout">Log out</a></li>"#,
            id = u.id,
            name = escape(&u.username)
        ),
        None => r#"<li><a href="/signup">Sign up</a></li><li><a href="/login">Log in</a></li>"#.to_string(),
    };
    let mut flashes = String::new();
    for f in &ctx.flashes {
        let class = match f.kind {
            FlashKind::Info => "info",
            FlashKind::Success => "success",
            FlashKind::Danger => "danger",
        };
        let _ = write!(flashes, r#"<div class="alert alert-{class}">{}</div>"#, escape(&f.text));
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{title}</title><link rel="stylesheet" href="/static/stylesheets/style.css"></head>
<body>
<nav class="navbar"><a class="navbar-brand" href="/">Perch</a>
<form action="/users" class="navbar-form"><input name="q" placeholder="Search Perch"></form>
<ul class="nav">{nav}</ul></nav>
<div class="container">{flashes}{body}</div>
</body>
</html>"#,
        title = escape(title)
    )
}

pub fn error_page(status: u16, reason: &str) -> String {
    let ctx = PageContext { user: None, flashes: Vec::new() };
    let body = format!(
        r#"<div class="error"><h1>{status}</h1><p>{}</p><a href="/">Back home</a></div>"#,
        escape(reason)
    );
    layout(&ctx, &status.to_string(), &body)
}

fn field_errors(errors: &FormErrors, field: &str) -> String {
    errors
        .get(field)
        .iter()
        .map(|e| format!(r#"<span class="text-danger">{}</span>"#, escape(e)))
        .collect()
}

fn input(errors: &FormErrors, name: &str, kind: &str, label: &str, value: &str) -> String {
    format!(
        r#"<div class="form-group"><input type="{kind}" name="{name}" placeholder="{label}" value="{value}">{errs}</div>"#,
        label = escape(label),
        value = escape(value),
        errs = field_errors(errors, name)
    )
}

fn message_list(items: &[FeedItem], liked: Option<&[Id]>) -> String {
    let mut out = String::from(r#"<ul class="list-group" id="messages">"#);
    for m in items {
        let like = match liked {
            Some(ids) => {
                let class = if ids.contains(&m.id) { "btn-primary" } else { "btn-secondary" };
                format!(
                    r#"<form method="POST" action="/users/toggle_like/{id}" class="like"><button class="btn {class}">&#9733;</button></form>"#,
                    id = m.id
                )
            }
            None => String::new(),
        };
        let _ = write!(
            out,
            r#"<li class="list-group-item"><a href="/messages/{id}" class="message-link"></a><a href="/users/{uid}"><img src="{img}" alt="" class="timeline-image"></a><div class="message-area"><a href="/users/{uid}">@{name}</a> <span class="text-muted">{ts}</span><p>{text}</p></div>{like}</li>"#,
            id = m.id,
            uid = m.user_id,
            img = escape(&m.image_url),
            name = escape(&m.username),
            ts = m.timestamp.format("%d %B %Y"),
            text = escape(&m.text),
        );
    }
    out.push_str("</ul>");
    out
}

fn user_cards(users: &[User]) -> String {
    if users.is_empty() {
        return r#"<h3>Sorry, no users found</h3>"#.to_string();
    }
    let mut out = String::from(r#"<div class="row">"#);
    for u in users {
        let _ = write!(
            out,
            r#"<div class="card user-card"><a href="/users/{id}"><img src="{img}" alt="Image for {name}"><p>@{name}</p></a><p class="small">{bio}</p></div>"#,
            id = u.id,
            img = escape(&u.image_url),
            name = escape(&u.username),
            bio = escape(&u.bio),
        );
    }
    out.push_str("</div>");
    out
}

pub fn home_anon(ctx: &PageContext) -> String {
    let body = r#"<div class="home-hero"><h1>What's Happening?</h1><h4>New to Perch?</h4><a href="/signup" class="btn btn-primary">Sign up now</a></div>"#;
    layout(ctx, "Perch", body)
}

pub fn home(ctx: &PageContext, messages: &[FeedItem], liked: &[Id]) -> String {
    let aside = match &ctx.user {
        Some(u) => format!(
            r#"<aside class="user-aside"><a href="/users/{id}"><img src="{img}" alt=""></a><h4>@{name}</h4></aside>"#,
            id = u.id,
            img = escape(&u.image_url),
            name = escape(&u.username)
        ),
        None => String::new(),
    };
    let body = format!("{aside}{}", message_list(messages, Some(liked)));
    layout(ctx, "Home", &body)
}

pub fn signup(ctx: &PageContext, form: &SignupForm, errors: &FormErrors) -> String {
    let body = format!(
        r#"<h2>Join Perch today.</h2><form method="POST" action="/signup">{}{}{}{}<button class="btn btn-primary">Sign me up!</button></form>"#,
        input(errors, "username", "text", "Username", &form.username),
        input(errors, "email", "email", "E-mail", &form.email),
        input(errors, "password", "password", "Password", ""),
        input(errors, "image_url", "text", "(Optional) Image URL", &form.image_url),
    );
    layout(ctx, "Sign up", &body)
}

pub fn login(ctx: &PageContext, form: &LoginForm, errors: &FormErrors) -> String {
    let body = format!(
        r#"<h2>Welcome back.</h2><form method="POST" action="/login">{}{}<button class="btn btn-primary">Log in</button></form>"#,
        input(errors, "username", "text", "Username", &form.username),
        input(errors, "password", "password", "Password", ""),
    );
    layout(ctx, "Log in", &body)
}

pub fn users_index(ctx: &PageContext, users: &[User], query: Option<&str>) -> String {
    let heading = match query {
        Some(q) => format!("<h2>Users matching &quot;{}&quot;</h2>", escape(q)),
        None => "<h2>Users</h2>".to_string(),
    };
    layout(ctx, "Users", &format!("{heading}{}", user_cards(users)))
}

fn profile_header(ctx: &PageContext, p: &ProfileSummary) -> String {
    let u = &p.user;
    let action = match ctx.viewer_id() {
        Some(me) if me == u.id => {
            r#"<a href="/users/profile" class="btn btn-outline-secondary">Edit Profile</a><a href="/users/account" class="btn btn-outline-secondary">Change Password</a><form method="POST" action="/users/delete"><button class="btn btn-outline-danger">Delete Profile</button></form>"#.to_string()
        }
        Some(_) if p.viewer_follows => format!(
            r#"<form method="POST" action="/users/stop-following/{id}"><button class="btn btn-primary">Unfollow</button></form>"#,
            id = u.id
        ),
        Some(_) => format!(
            r#"<form method="POST" action="/users/follow/{id}"><button class="btn btn-outline-primary">Follow</button></form>"#,
            id = u.id
        ),
        None => String::new(),
    };
    let dm = match ctx.viewer_id() {
        Some(me) if me != u.id => format!(
            r#"<form method="POST" action="/users/message" class="direct-message"><input type="hidden" name="send-to" value="{id}"><textarea name="text" maxlength="{MESSAGE_MAX_LEN}" placeholder="Send @{name} a message"></textarea><button class="btn btn-outline-success">Send</button></form>"#,
            id = u.id,
            name = escape(&u.username)
        ),
        _ => String::new(),
    };
    format!(
        r#"<img src="{header}" alt="" class="profile-hero"><img src="{img}" alt="Image for {name}" class="profile-avatar"><h4>@{name}</h4><p>{bio}</p><ul class="user-stats"><li><a href="/users/{id}">Messages <b>{messages}</b></a></li><li><a href="/users/{id}/following">Following <b>{following}</b></a></li><li><a href="/users/{id}/followers">Followers <b>{followers}</b></a></li><li><a href="/users/{id}/likes">Likes <b>{likes}</b></a></li></ul>{action}{dm}"#,
        id = u.id,
        header = escape(&u.header_image_url),
        img = escape(&u.image_url),
        name = escape(&u.username),
        bio = escape(&u.bio),
        messages = p.message_count,
        following = p.following_count,
        followers = p.follower_count,
        likes = p.like_count,
    )
}

pub fn user_show(ctx: &PageContext, profile: &ProfileSummary, messages: &[FeedItem]) -> String {
    let body = format!("{}{}", profile_header(ctx, profile), message_list(messages, None));
    layout(ctx, &format!("@{}", profile.user.username), &body)
}

pub fn following(ctx: &PageContext, profile: &ProfileSummary, users: &[User]) -> String {
    let body = format!("{}<h3>Following</h3>{}", profile_header(ctx, profile), user_cards(users));
    layout(ctx, &format!("@{} follows", profile.user.username), &body)
}

pub fn followers(ctx: &PageContext, profile: &ProfileSummary, users: &[User]) -> String {
    let body = format!("{}<h3>Followers</h3>{}", profile_header(ctx, profile), user_cards(users));
    layout(ctx, &format!("@{} followers", profile.user.username), &body)
}

pub fn likes(ctx: &PageContext, profile: &ProfileSummary, messages: &[FeedItem]) -> String {
    let body = format!("{}<h3>Liked messages</h3>{}", profile_header(ctx, profile), message_list(messages, None));
    layout(ctx, &format!("@{} likes", profile.user.username), &body)
}

pub fn edit_profile(ctx: &PageContext, form: &ProfileEditForm, errors: &FormErrors) -> String {
    let body = format!(
        r#"<h2>Edit Your Profile.</h2><form method="POST" action="/users/profile">{}{}{}{}<div class="form-group"><textarea name="bio" placeholder="Bio">{bio}</textarea></div><p>To confirm changes, enter your password:</p>{}<button class="btn btn-success">Edit this user!</button><a href="/users/{id}" class="btn btn-outline-secondary">Cancel</a></form>"#,
        input(errors, "username", "text", "Username", &form.username),
        input(errors, "email", "email", "E-mail", &form.email),
        input(errors, "image_url", "text", "Image URL", &form.image_url),
        input(errors, "header_image_url", "text", "Header Image URL", &form.header_image_url),
        input(errors, "password", "password", "Password", ""),
        bio = escape(&form.bio),
        id = ctx.viewer_id().unwrap_or_default(),
    );
    layout(ctx, "Edit profile", &body)
}

pub fn change_password(ctx: &PageContext, errors: &FormErrors) -> String {
    let body = format!(
        r#"<h2>Change your password.</h2><form method="POST" action="/users/account">{}{}{}<button class="btn btn-success">Update password</button></form>"#,
        input(errors, "current_password", "password", "Current password", ""),
        input(errors, "new_password", "password", "New password", ""),
        input(errors, "confirm_new_password", "password", "Confirm new password", ""),
    );
    layout(ctx, "Change password", &body)
}

pub fn new_message(ctx: &PageContext, form: &MessageForm, errors: &FormErrors) -> String {
    let body = format!(
        r#"<form method="POST" action="/messages/new"><div class="form-group"><textarea name="text" maxlength="{MESSAGE_MAX_LEN}" placeholder="What's happening?">{text}</textarea>{errs}</div><button class="btn btn-outline-success">Add my message!</button></form>"#,
        text = escape(&form.text),
        errs = field_errors(errors, "text"),
    );
    layout(ctx, "New message", &body)
}

pub fn message_show(ctx: &PageContext, message: &FeedItem) -> String {
    let delete = if ctx.viewer_id() == Some(message.user_id) {
        format!(
            r#"<form method="POST" action="/messages/{id}/delete"><button class="btn btn-outline-danger">Delete</button></form>"#,
            id = message.id
        )
    } else {
        String::new()
    };
    let body = format!(
        r#"<div class="message-detail"><a href="/users/{uid}"><img src="{img}" alt="" class="timeline-image"></a><a href="/users/{uid}">@{name}</a>{delete}<p class="single-message">{text}</p><span class="text-muted">{ts}</span></div>"#,
        uid = message.user_id,
        img = escape(&message.image_url),
        name = escape(&message.username),
        text = escape(&message.text),
        ts = message.timestamp.format("%d %B %Y %H:%M"),
    );
    layout(ctx, "Message", &body)
}

/// Heading for one direct message as seen by `me`.
pub fn message_metadata(dm: &DirectMessage, me: &User, other: &User) -> String {
    let name = move |id: Id| if id == me.id { me.username.as_str() } else { other.username.as_str() };
    if dm.sender_id == me.id {
        format!("from you to {}:", name(dm.recipient_id))
    } else if dm.recipient_id == me.id {
        format!("from {} to you:", name(dm.sender_id))
    } else {
        format!("from {} to {}:", name(dm.sender_id), name(dm.recipient_id))
    }
}

pub fn direct_message(
    ctx: &PageContext,
    me: &User,
    send_to: &User,
    form: &MessageForm,
    errors: &FormErrors,
    history: &[DirectMessage],
) -> String {
    let mut thread = String::from(r#"<ul class="direct-messages">"#);
    for dm in history {
        let _ = write!(
            thread,
            r#"<li><span class="text-muted">{meta}</span> {text}</li>"#,
            meta = escape(&message_metadata(dm, me, send_to)),
            text = escape(&dm.text),
        );
    }
    thread.push_str("</ul>");
    let body = format!(
        r#"<h3>Conversation with @{name}</h3>{thread}<form method="POST" action="/users/message"><input type="hidden" name="send-to" value="{id}"><textarea name="text" maxlength="{MESSAGE_MAX_LEN}">{text}</textarea>{errs}<button class="btn btn-outline-success">Send</button></form>"#,
        name = escape(&send_to.username),
        id = send_to.id,
        text = escape(&form.text),
        errs = field_errors(errors, "text"),
    );
    layout(ctx, "Direct message", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: Id, name: &str) -> User {
        User {
            id,
            username: name.into(),
            email: format!("{name}@example.com"),
            bio: String::new(),
            image_url: String::new(),
            header_image_url: String::new(),
            password_hash: String::new(),
        }
    }

    #[test]
    fn escape_neutralises_markup() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;");
    }

    #[test]
    fn metadata_is_relative_to_viewer() {
        let me = user(1, "alice");
        let bob = user(2, "bob");
        let dm = |from, to| DirectMessage {
            id: 1,
            text: String::new(),
            thread_id: 1,
            sender_id: from,
            recipient_id: to,
            timestamp: Utc::now(),
        };
        assert_eq!(message_metadata(&dm(1, 2), &me, &bob), "from you to bob:");
        assert_eq!(message_metadata(&dm(2, 1), &me, &bob), "from bob to you:");
    }

    #[test]
    fn layout_renders_and_escapes_flashes() {
        let ctx = PageContext {
            user: None,
            flashes: vec![Flash { kind: FlashKind::Danger, text: "<b>nope</b>".into() }],
        };
        let html = home_anon(&ctx);
        assert!(html.contains(r#"alert-danger">&lt;b&gt;nope&lt;/b&gt;"#));
        assert!(html.contains("Sign up now"));
    }
}
