use super::*;

#[test]
fn escape_html_escapes_markup() {
    assert_eq!(escape_html(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;");
    assert_eq!(escape_html("plain"), "plain");
}

#[test]
fn error_list_empty_renders_nothing() {
    assert_eq!(error_list(&[]), "");
}

#[test]
fn error_list_escapes_messages() {
    let html = error_list(&["a <b>".to_owned(), "c".to_owned()]);
    assert_eq!(html, r#"<ul class="errorlist"><li>a &lt;b&gt;</li><li>c</li></ul>"#);
}

#[test]
fn signup_page_without_errors_has_no_placeholders() {
    let html = signup_page("", &FormErrors::default());
    assert!(!html.contains("{{"));
    assert!(!html.contains("errorlist"));
    assert!(html.contains(r#"action="/accounts/signup/""#));
    assert!(html.contains(r#"name="password1""#));
    assert!(html.contains(r#"name="password2""#));
}

#[test]
fn signup_page_refills_username_and_shows_field_errors() {
    let mut errors = FormErrors::default();
    errors.add("password2", "The two password fields didn't match.");
    let html = signup_page("<newuser>", &errors);
    assert!(html.contains(r#"value="&lt;newuser&gt;""#));
    assert!(html.contains("didn&#x27;t match"));
}

#[test]
fn signin_page_carries_next_and_non_field_errors() {
    let mut errors = FormErrors::default();
    errors.add(crate::services::auth::NON_FIELD_ERRORS, "Please enter a correct username and password.");
    let html = signin_page("existinguser", Some("/dashboard?tab=1&x=2"), &errors);
    assert!(html.contains(r#"name="next" value="/dashboard?tab=1&amp;x=2""#));
    assert!(html.contains("Please enter a correct username and password."));
    assert!(html.contains(r#"value="existinguser""#));
    assert!(!html.contains("{{"));
}

#[test]
fn user_values_do_not_expand_placeholders() {
    let html = signup_page("{{PASSWORD1_ERRORS}}", &FormErrors::default());
    assert!(html.contains(r#"value="{{PASSWORD1_ERRORS}}""#));
}

#[test]
fn home_page_anonymous_links_to_forms() {
    let html = home_page(None);
    assert!(html.contains(paths::SIGNIN));
    assert!(html.contains(paths::SIGNUP));
}

#[test]
fn home_page_greets_user() {
    let user = User {
        id: uuid::Uuid::nil(),
        username: "existinguser".into(),
        password_hash: String::new(),
        is_active: true,
        date_joined: time::OffsetDateTime::UNIX_EPOCH,
        last_login: None,
    };
    let html = home_page(Some(&user));
    assert!(html.contains("Signed in as <strong>existinguser</strong>"));
    assert!(html.contains(paths::LOGOUT));
}

#[test]
fn next_value_does_not_expand_placeholders() {
    let html = signin_page("victim", Some("/{{USERNAME}}"), &FormErrors::default());
    assert!(html.contains(r#"name="next" value="/{{USERNAME}}""#));
    assert!(html.contains(r#"value="victim""#));
}

#[test]
fn fill_keeps_unknown_and_unterminated_placeholders() {
    assert_eq!(fill("a {{X}} {{Y}} {{Z", &[("X", "1")]), "a 1 {{Y}} {{Z");
}
