use scraper::{ElementRef, Html, Selector};

const LOGGED_IN_MARKER: &str = "Log out";
const INVALID_LOGIN_MARKER: &str = "Invalid username or password";
const REDEEMED_MARKER: &str = "The request token has already been redeemed";
const VERIFIER_LABEL: &str = "Verification code:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

fn hidden_fields(form: ElementRef<'_>) -> Vec<(String, String)> {
    let hidden = selector(r#"input[type="hidden"]"#);
    form.select(&hidden)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

pub fn find_form(html: &str, action_fragment: Option<&str>) -> Option<Form> {
    let document = Html::parse_document(html);
    let forms = selector("form");
    document
        .select(&forms)
        .find(|form| match action_fragment {
            Some(fragment) => form
                .value()
                .attr("action")
                .is_some_and(|action| action.contains(fragment)),
            None => true,
        })
        .map(|form| Form {
            action: form.value().attr("action").unwrap_or_default().to_string(),
            fields: hidden_fields(form),
        })
}

pub fn extract_hidden_fields(html: &str) -> Vec<(String, String)> {
    find_form(html, None)
        .map(|form| form.fields)
        .unwrap_or_default()
}

pub fn extract_verifier(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let bold = selector("b");
    document
        .select(&bold)
        .map(|tag| tag.text().collect::<String>())
        .find(|text| text.contains(VERIFIER_LABEL))
        .and_then(|text| text.split(':').nth(1).map(|code| code.trim().to_string()))
        .filter(|code| !code.is_empty())
}

pub fn is_logged_in(html: &str) -> bool {
    html.contains(LOGGED_IN_MARKER)
}

pub fn is_invalid_login(html: &str) -> bool {
    html.contains(INVALID_LOGIN_MARKER)
}

pub fn is_request_token_redeemed(html: &str) -> bool {
    html.contains(REDEEMED_MARKER)
}
