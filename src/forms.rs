//! Form payloads and their server-side validation.
//!
//! Every field defaults to empty so a missing field shows up as a validation
//! error on the re-rendered form rather than a bare 400.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::models::{User, UpdateProfile, DEFAULT_HEADER_IMAGE_URL, DEFAULT_IMAGE_URL, MESSAGE_MAX_LEN};

pub const PASSWORD_MIN_LEN: usize = 6;

/// Field name -> messages, in field order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors(BTreeMap<&'static str, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &'static str, msg: impl Into<String>) {
        self.0.entry(field).or_default().push(msg.into());
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn finish(self) -> Result<(), FormErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    fn required(&mut self, field: &'static str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, "This field is required.");
        }
    }

    fn min_len(&mut self, field: &'static str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.add(field, format!("Field must be at least {min} characters long."));
        }
    }

    fn max_len(&mut self, field: &'static str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, format!("Field cannot be longer than {max} characters."));
        }
    }

    fn email(&mut self, field: &'static str, value: &str) {
        if !looks_like_email(value) {
            self.add(field, "Invalid email address.");
        }
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else { return false };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct SignupForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub image_url: String,
}

impl SignupForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();
        errors.required("username", &self.username);
        errors.required("email", &self.email);
        if !self.email.trim().is_empty() {
            errors.email("email", self.email.trim());
        }
        errors.min_len("password", &self.password, PASSWORD_MIN_LEN);
        errors.finish()
    }

    pub fn image_url(&self) -> Option<String> {
        non_empty(&self.image_url)
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();
        errors.required("username", &self.username);
        errors.min_len("password", &self.password, PASSWORD_MIN_LEN);
        errors.finish()
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct MessageForm {
    pub text: String,
}

impl MessageForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();
        errors.required("text", &self.text);
        errors.max_len("text", self.text.trim(), MESSAGE_MAX_LEN);
        errors.finish()
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DirectMessageForm {
    #[serde(rename = "send-to")]
    pub send_to: String,
    pub text: String,
}

impl DirectMessageForm {
    pub fn recipient(&self) -> Option<i64> {
        self.send_to.trim().parse().ok()
    }

    pub fn message(&self) -> MessageForm {
        MessageForm { text: self.text.clone() }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileEditForm {
    pub username: String,
    pub email: String,
    pub image_url: String,
    pub header_image_url: String,
    pub bio: String,
    pub password: String,
}

impl ProfileEditForm {
    pub fn for_user(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            image_url: user.image_url.clone(),
            header_image_url: user.header_image_url.clone(),
            bio: user.bio.clone(),
            password: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();
        if !self.email.trim().is_empty() {
            errors.email("email", self.email.trim());
        }
        errors.min_len("password", &self.password, PASSWORD_MIN_LEN);
        errors.finish()
    }

    /// Blank username/email keep the current values; blank images fall back
    /// to the defaults.
    pub fn to_update(&self, current: &User) -> UpdateProfile {
        UpdateProfile {
            username: non_empty(&self.username).unwrap_or_else(|| current.username.clone()),
            email: non_empty(&self.email).unwrap_or_else(|| current.email.clone()),
            image_url: non_empty(&self.image_url).unwrap_or_else(|| DEFAULT_IMAGE_URL.to_string()),
            header_image_url: non_empty(&self.header_image_url)
                .unwrap_or_else(|| DEFAULT_HEADER_IMAGE_URL.to_string()),
            bio: self.bio.trim().to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ChangePasswordForm {
    pub current_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

impl ChangePasswordForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();
        errors.required("current_password", &self.current_password);
        errors.min_len("new_password", &self.new_password, PASSWORD_MIN_LEN);
        errors.min_len("confirm_new_password", &self.confirm_new_password, PASSWORD_MIN_LEN);
        if !errors.is_empty() {
            return Err(errors);
        }
        let mismatch = if self.new_password != self.confirm_new_password {
            Some("New password and confirmation do not match.")
        } else if self.new_password == self.current_password {
            Some("New password must be different from current password")
        } else {
            None
        };
        if let Some(msg) = mismatch {
            errors.add("new_password", msg);
            errors.add("confirm_new_password", msg);
        }
        errors.finish()
    }
}
