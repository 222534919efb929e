//! HTML rendering for the signup, signin and home pages.
//!
//! Templates are compiled in with `include_str!` and filled by placeholder
//! substitution. Every interpolated value goes through [`escape_html`].

use std::fmt::Write;

use super::paths;
use crate::services::auth::FormErrors;
use crate::services::users::User;

const SIGNUP_TEMPLATE: &str = include_str!("../../templates/signup.html");
const SIGNIN_TEMPLATE: &str = include_str!("../../templates/signin.html");
const HOME_TEMPLATE: &str = include_str!("../../templates/home.html");

#[must_use]
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn error_list(messages: &[String]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut html = String::from(r#"<ul class="errorlist">"#);
    for message in messages {
        let _ = write!(html, "<li>{}</li>", escape_html(message));
    }
    html.push_str("</ul>");
    html
}

/// Substitute `{{KEY}}` placeholders in one pass over the template.
/// Inserted values are never rescanned; unknown placeholders are kept.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut html = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        html.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let key = &after[..end];
        match values.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => html.push_str(value),
            None => html.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    html.push_str(rest);
    html
}

/// Signup form, optionally re-filled with the submitted username and errors.
#[must_use]
pub fn signup_page(username: &str, errors: &FormErrors) -> String {
    fill(
        SIGNUP_TEMPLATE,
        &[
            ("ACTION", paths::SIGNUP),
            ("SIGNIN_URL", paths::SIGNIN),
            ("NON_FIELD_ERRORS", &error_list(errors.non_field())),
            ("USERNAME_ERRORS", &error_list(errors.field("username"))),
            ("PASSWORD1_ERRORS", &error_list(errors.field("password1"))),
            ("PASSWORD2_ERRORS", &error_list(errors.field("password2"))),
            ("USERNAME", &escape_html(username)),
        ],
    )
}

/// Signin form. `next` is carried through as a hidden field.
#[must_use]
pub fn signin_page(username: &str, next: Option<&str>, errors: &FormErrors) -> String {
    fill(
        SIGNIN_TEMPLATE,
        &[
            ("ACTION", paths::SIGNIN),
            ("SIGNUP_URL", paths::SIGNUP),
            ("NON_FIELD_ERRORS", &error_list(errors.non_field())),
            ("USERNAME_ERRORS", &error_list(errors.field("username"))),
            ("PASSWORD_ERRORS", &error_list(errors.field("password"))),
            ("NEXT", &escape_html(next.unwrap_or_default())),
            ("USERNAME", &escape_html(username)),
        ],
    )
}

/// Landing page: greets a signed-in user, otherwise links to the forms.
#[must_use]
pub fn home_page(user: Option<&User>) -> String {
    let body = match user {
        Some(user) => format!(
            r#"<p>Signed in as <strong>{}</strong>.</p>
  <form method="post" action="{}"><button type="submit">Log out</button></form>"#,
            escape_html(&user.username),
            paths::LOGOUT
        ),
        None => format!(
            r#"<p><a href="{}">Sign in</a> or <a href="{}">sign up</a>.</p>"#,
            paths::SIGNIN,
            paths::SIGNUP
        ),
    };
    fill(HOME_TEMPLATE, &[("BODY", &body)])
}

#[cfg(test)]
#[path = "pages_test.rs"]
mod tests;
