//! Client-facing fragments
//!
//! Every fragment is an htmx out-of-band swap: the element id addresses the
//! target on the page and `hx-swap-oob` says how to merge it.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::{self, Write};
use thiserror::Error;

/// Element that turn skeletons and error notices are appended to
pub const MESSAGE_LIST_ID: &str = "chat-messages";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to render fragment: {0}")]
    Format(#[from] fmt::Error),
}

/// A rendered fragment ready to be written to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment(String);

impl Fragment {
    pub fn new(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders turn data into client-displayable fragments
pub trait Presenter: Send + Sync {
    /// Start of a turn: the user's text and an empty reply addressed by `message_id`
    fn skeleton(
        &self,
        message_id: &str,
        user_text: &str,
        model_label: &str,
    ) -> Result<Fragment, RenderError>;

    /// A piece of reply text appended to `message_id`
    fn chunk(&self, message_id: &str, delta: &str) -> Result<Fragment, RenderError>;

    /// New last-activity time for `thread_id`
    fn last_message_timestamp(
        &self,
        thread_id: &str,
        at: &DateTime<Utc>,
    ) -> Result<Fragment, RenderError>;

    /// Error notice shown in place of a reply
    fn error(&self, message: &str) -> Result<Fragment, RenderError>;
}

/// HTML fragments for the htmx chat page
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPresenter;

impl HtmlPresenter {
    pub fn message_element_id(message_id: &str) -> String {
        format!("message-{message_id}")
    }

    pub fn timestamp_element_id(thread_id: &str) -> String {
        format!("last-message-timestamp-{thread_id}")
    }
}

impl Presenter for HtmlPresenter {
    fn skeleton(
        &self,
        message_id: &str,
        user_text: &str,
        model_label: &str,
    ) -> Result<Fragment, RenderError> {
        let mut html = String::new();
        write!(
            html,
            r#"<div id="{list}" hx-swap-oob="beforeend">"#,
            list = MESSAGE_LIST_ID
        )?;
        write!(
            html,
            r#"<div class="message human"><div class="message-content">{}</div></div>"#,
            Escaped(user_text)
        )?;
        write!(
            html,
            r#"<div class="message model" data-message-id="{id}"><span class="model-label">{label}</span><div id="{element}" class="message-content"></div></div>"#,
            id = Escaped(message_id),
            label = Escaped(model_label),
            element = Escaped(&Self::message_element_id(message_id)),
        )?;
        html.push_str("</div>");
        Ok(Fragment::new(html))
    }

    fn chunk(&self, message_id: &str, delta: &str) -> Result<Fragment, RenderError> {
        let mut html = String::new();
        write!(
            html,
            r#"<div id="{}" hx-swap-oob="beforeend">{}</div>"#,
            Escaped(&Self::message_element_id(message_id)),
            Escaped(delta)
        )?;
        Ok(Fragment::new(html))
    }

    fn last_message_timestamp(
        &self,
        thread_id: &str,
        at: &DateTime<Utc>,
    ) -> Result<Fragment, RenderError> {
        let mut html = String::new();
        write!(
            html,
            r#"<time id="{}" hx-swap-oob="true" datetime="{}">{}</time>"#,
            Escaped(&Self::timestamp_element_id(thread_id)),
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
            at.format("%Y-%m-%d %H:%M")
        )?;
        Ok(Fragment::new(html))
    }

    fn error(&self, message: &str) -> Result<Fragment, RenderError> {
        let mut html = String::new();
        write!(
            html,
            r#"<div id="{list}" hx-swap-oob="beforeend"><div class="message system error"><div class="message-content">{}</div></div></div>"#,
            Escaped(message),
            list = MESSAGE_LIST_ID
        )?;
        Ok(Fragment::new(html))
    }
}

/// HTML-escapes text and attribute values on display
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '&' => f.write_str("&amp;")?,
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&#39;")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_skeleton_addresses_model_message() {
        let fragment = HtmlPresenter.skeleton("m-1", "Hello", "groq-llama3").unwrap();
        let html = fragment.as_str();
        assert!(html.starts_with(r#"<div id="chat-messages" hx-swap-oob="beforeend">"#));
        assert!(html.contains(r#"id="message-m-1""#));
        assert!(html.contains(">Hello<"));
        assert!(html.contains(">groq-llama3<"));
    }

    #[test]
    fn test_chunk_is_escaped() {
        let fragment = HtmlPresenter.chunk("m-1", "<b>a & b</b>").unwrap();
        assert_eq!(
            fragment.as_str(),
            r#"<div id="message-m-1" hx-swap-oob="beforeend">&lt;b&gt;a &amp; b&lt;/b&gt;</div>"#
        );
    }

    #[test]
    fn test_user_text_cannot_break_out_of_markup() {
        let fragment = HtmlPresenter
            .skeleton("m-1", r#""><script>alert('x')</script>"#, "label")
            .unwrap();
        assert!(!fragment.as_str().contains("<script>"));
        assert!(fragment.as_str().contains("&#39;x&#39;"));
    }

    #[test]
    fn test_timestamp_addresses_thread() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let fragment = HtmlPresenter.last_message_timestamp("t-9", &at).unwrap();
        assert_eq!(
            fragment.as_str(),
            r#"<time id="last-message-timestamp-t-9" hx-swap-oob="true" datetime="2024-03-01T09:30:00Z">2024-03-01 09:30</time>"#
        );
    }

    #[test]
    fn test_error_notice() {
        let fragment = HtmlPresenter
            .error("Encountered an error: upstream unavailable")
            .unwrap();
        assert!(fragment.as_str().contains("message system error"));
        assert!(fragment
            .as_str()
            .contains("Encountered an error: upstream unavailable"));
    }
}
