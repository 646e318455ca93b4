//! Welcome email rendering.
//!
//! The body is a Handlebars template compiled once at startup. Handlebars
//! escapes `{{...}}` expressions, so user supplied names and addresses can
//! never inject markup into the message.

use chrono::{Datelike, Local};
use handlebars::Handlebars;
use serde::Serialize;

use crate::error::RenderError;
use crate::queue::PersonRegistered;

/// Subject line of every welcome email.
pub const WELCOME_SUBJECT: &str = "Bem-vindo ao nosso sistema Edragorn";

const WELCOME_TEMPLATE: &str = "welcome";

/// Subject and HTML body ready to hand to the mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

#[derive(Serialize)]
struct WelcomeContext<'a> {
    name: &'a str,
    email: &'a str,
    year: i32,
}

/// Renders registration events into welcome emails.
pub struct MailRenderer {
    registry: Handlebars<'static>,
}

impl MailRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_template_string(
            WELCOME_TEMPLATE,
            include_str!("../../templates/welcome.html"),
        )?;

        Ok(Self { registry })
    }

    /// Render the welcome email with an explicit copyright year.
    pub fn render(&self, event: &PersonRegistered, year: i32) -> Result<RenderedEmail, RenderError> {
        let context = WelcomeContext {
            name: event.name(),
            email: event.email(),
            year,
        };

        let body = self.registry.render(WELCOME_TEMPLATE, &context)?;

        Ok(RenderedEmail {
            subject: WELCOME_SUBJECT.to_string(),
            body,
        })
    }

    /// Render the welcome email stamped with the current local year.
    pub fn render_now(&self, event: &PersonRegistered) -> Result<RenderedEmail, RenderError> {
        self.render(event, Local::now().year())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> MailRenderer {
        MailRenderer::new().unwrap()
    }

    #[test]
    fn test_render_interpolates_fields() {
        let event = PersonRegistered::new(1, "Ana", "ana@example.com");

        let email = renderer().render(&event, 2025).unwrap();

        assert_eq!(email.subject, "Bem-vindo ao nosso sistema Edragorn");
        assert!(email.body.contains("<p>Olá <strong>Ana</strong>,</p>"));
        assert!(email.body.contains(">ana@example.com</td>"));
        assert!(email.body.contains("© 2025 - Pessoas API"));
        assert!(email.body.contains("width: 100%;"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let event = PersonRegistered::new("abc", "Maria", "maria@example.com");
        let renderer = renderer();

        let first = renderer.render(&event, 2024).unwrap();
        let second = renderer.render(&event, 2024).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_render_escapes_markup() {
        let event = PersonRegistered::new(1, "<script>alert(1)</script>", "x@example.com");

        let email = renderer().render(&event, 2025).unwrap();

        assert!(!email.body.contains("<script>"));
        assert!(email.body.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn test_render_now_uses_current_year() {
        let event = PersonRegistered::new(1, "Ana", "ana@example.com");

        let email = renderer().render_now(&event).unwrap();

        assert!(email.body.contains(&format!("© {} - Pessoas API", Local::now().year())));
    }
}
