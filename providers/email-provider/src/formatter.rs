use ammonia::clean;
use chrono::Utc;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Severity of an alert email, which picks the header colour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn color(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "#17a2b8",
            AlertSeverity::Warning => "#ffc107",
            AlertSeverity::Error => "#dc3545",
            AlertSeverity::Critical => "#721c24",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(AlertSeverity::Info),
            "warning" | "warn" => Ok(AlertSeverity::Warning),
            "error" => Ok(AlertSeverity::Error),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity: {}", other)),
        }
    }
}

/// Subject and bodies ready to be put into an `EmailMessage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub struct EmailFormatter {
    templates: Handlebars<'static>,
}

impl EmailFormatter {
    pub fn new() -> Self {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(false);

        // Register default templates
        let _ = templates.register_template_string("alert", include_str!("../templates/alert.hbs"));
        let _ = templates.register_template_string(
            "notification",
            include_str!("../templates/notification.hbs"),
        );
        let _ = templates.register_template_string(
            "verification",
            include_str!("../templates/verification.hbs"),
        );

        Self { templates }
    }

    pub fn alert(&self, title: &str, message: &str, severity: AlertSeverity) -> RenderedEmail {
        let context = json!({
            "title": title,
            "message": message,
            "severity": severity.label(),
            "color": severity.color(),
            "sent_at": Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        });

        let html = self.render("alert", &context).unwrap_or_else(|| {
            format!(
                r#"<html><body><div style="background-color: {}; color: #ffffff; padding: 15px;"><h2>{}</h2></div><p>{}</p></body></html>"#,
                severity.color(),
                escape(title),
                escape(message)
            )
        });

        RenderedEmail {
            subject: format!("[{}] {}", severity.label(), title),
            text: format!("[{}] {}\n\n{}", severity.label(), title, message),
            html,
        }
    }

    /// Wrap caller-provided HTML after stripping scripts and unsafe markup
    pub fn notification(&self, subject: &str, body_html: &str) -> RenderedEmail {
        let body = clean(body_html);
        let html = self
            .render("notification", &json!({ "body": body }))
            .unwrap_or_else(|| format!("<html><body>{}</body></html>", body));

        RenderedEmail {
            subject: subject.to_string(),
            text: html_to_text(&body),
            html,
        }
    }

    pub fn verification(&self, code: &str, ttl_minutes: u32) -> RenderedEmail {
        let context = json!({ "code": code, "ttl_minutes": ttl_minutes });
        let html = self.render("verification", &context).unwrap_or_else(|| {
            format!(
                "<html><body><p>Your verification code is <strong>{}</strong>.</p></body></html>",
                escape(code)
            )
        });

        RenderedEmail {
            subject: "Your verification code".to_string(),
            text: format!(
                "Your verification code is {}. The code expires in {} minutes.",
                code, ttl_minutes
            ),
            html,
        }
    }

    fn render(&self, template: &str, context: &serde_json::Value) -> Option<String> {
        match self.templates.render(template, context) {
            Ok(html) => Some(html),
            Err(e) => {
                warn!(template, error = %e, "Template rendering failed, using basic HTML");
                None
            }
        }
    }
}

impl Default for EmailFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(input: &str) -> String {
    handlebars::html_escape(input)
}

pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 80)
}
