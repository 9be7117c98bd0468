use crate::models::responses::BackNotification;

pub const START_FAILED: &str = "Transaction start was failed!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitElement {
    #[default]
    Button,
    Link,
    /// Button plus a script that submits on load.
    Auto,
}

impl SubmitElement {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "link" => SubmitElement::Link,
            "auto" => SubmitElement::Auto,
            _ => SubmitElement::Button,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormDetails {
    pub id: String,
    pub element: SubmitElement,
    pub element_text: String,
}

impl Default for FormDetails {
    fn default() -> Self {
        FormDetails {
            id: "SimplePayForm".to_string(),
            element: SubmitElement::Button,
            element_text: "Start SimplePay Payment".to_string(),
        }
    }
}

/// Small HTML snippets that move the browser to or from the payment page.
pub trait Renderer {
    /// GET form to the hosted payment page, or a failure text without a URL.
    fn payment_form(&self, payment_url: Option<&str>, form: &FormDetails) -> String;

    /// Legacy POST form of hidden fields.
    fn hidden_form(&self, action: &str, fields: &[(String, String)], form: &FormDetails) -> String;

    fn back_notification(&self, notification: &BackNotification) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    fn submit_element(form: &FormDetails) -> String {
        let text = escape(&form.element_text);
        let id = escape(&form.id);
        match form.element {
            SubmitElement::Link => format!(
                "\n<a href='javascript:document.getElementById(\"{}\").submit()'>{}</a>",
                id, text
            ),
            SubmitElement::Button => format!("\n<button type='submit'>{}</button>", text),
            SubmitElement::Auto => format!(
                "\n<button type='submit'>{}</button>\n<script type=\"text/javascript\">document.getElementById(\"{}\").submit();</script>",
                text, id
            ),
        }
    }

    fn hidden_field(name: &str, value: &str) -> String {
        let id = name.strip_suffix("[]").unwrap_or(name);
        format!(
            "\n<input type='hidden' name='{}' id='{}' value='{}' />",
            escape(name),
            escape(id),
            escape(value)
        )
    }
}

impl Renderer for HtmlRenderer {
    fn payment_form(&self, payment_url: Option<&str>, form: &FormDetails) -> String {
        match payment_url.filter(|url| !url.is_empty()) {
            Some(url) => format!(
                "<form action=\"{}\" method=\"GET\" id=\"{}\" accept-charset=\"UTF-8\">{}</form>",
                escape(url),
                escape(&form.id),
                Self::submit_element(form)
            ),
            None => START_FAILED.to_string(),
        }
    }

    fn hidden_form(&self, action: &str, fields: &[(String, String)], form: &FormDetails) -> String {
        let mut html = format!(
            "\n<form action='{}' method='POST' id='{}' accept-charset='UTF-8'>",
            escape(action),
            escape(&form.id)
        );
        for (name, value) in fields {
            html.push_str(&Self::hidden_field(name, value));
        }
        html.push_str(&Self::submit_element(form));
        html.push_str("\n</form>");
        html
    }

    fn back_notification(&self, notification: &BackNotification) -> String {
        let headline = if notification.is_success_event() {
            "Successful payment"
        } else {
            "Failed payment!"
        };
        format!(
            "<div><b>{}</b><b>SimplePay transaction id:</b> {}</br><b>Merchant order reference:</b> {}</br></div>",
            headline,
            escape(&notification.transaction_id()),
            escape(&notification.order_ref())
        )
    }
}

pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
