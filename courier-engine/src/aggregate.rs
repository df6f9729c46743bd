//! Event aggregation and rendering.
//!
//! Renders a set of one user's events into a single message body in one of
//! three formats. The renderers are pure: the same input yields identical
//! output, except for the MIME boundary which is unique per call.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_core::{AggregationMethod, Event, EventType};

/// Body format of a rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    /// `text/plain; charset=utf-8`.
    Plain,
    /// `text/html; charset=utf-8`.
    Html,
    /// `multipart/mixed` with the given boundary; the body holds the parts
    /// and must be passed through to the mail transport unchanged.
    Multipart {
        /// Boundary separating the parts.
        boundary: String,
    },
}

impl ContentKind {
    /// Returns the MIME content type for this kind.
    #[must_use]
    pub fn mime_type(&self) -> String {
        match self {
            Self::Plain => "text/plain; charset=utf-8".to_string(),
            Self::Html => "text/html; charset=utf-8".to_string(),
            Self::Multipart { boundary } => {
                format!("multipart/mixed; boundary=\"{boundary}\"")
            }
        }
    }
}

/// One rendered, deliverable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Body format.
    pub content: ContentKind,
}

/// Renders `events` for `user_id` into a single message.
///
/// Events are grouped by type; within a type they appear in ascending
/// timestamp order regardless of input order. Empty input produces a
/// degenerate but valid document, which dry-run inspection relies on.
#[must_use]
pub fn render(user_id: &str, events: &[Event], method: AggregationMethod) -> RenderedMessage {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });

    let subject = format!("Event Summary for User {user_id}");
    match method {
        AggregationMethod::Plain => RenderedMessage {
            subject,
            body: render_plain(user_id, &ordered),
            content: ContentKind::Plain,
        },
        AggregationMethod::Html => RenderedMessage {
            subject,
            body: render_html(user_id, &ordered),
            content: ContentKind::Html,
        },
        AggregationMethod::Mime => {
            let boundary = format!("courier-{}", Uuid::new_v4().simple());
            let body = render_mime(user_id, &ordered, &boundary);
            RenderedMessage {
                subject,
                body,
                content: ContentKind::Multipart { boundary },
            }
        }
    }
}

fn period_line(events: &[&Event]) -> String {
    match (events.first(), events.last()) {
        (Some(first), Some(last)) => format!(
            "Period: {} to {}",
            first.timestamp.format("%Y-%m-%d"),
            last.timestamp.format("%Y-%m-%d")
        ),
        _ => "Period: n/a".to_string(),
    }
}

fn by_type<'a>(events: &[&'a Event]) -> Vec<(EventType, Vec<&'a Event>)> {
    EventType::ALL
        .iter()
        .filter_map(|&event_type| {
            let of_type: Vec<&Event> = events
                .iter()
                .copied()
                .filter(|e| e.event_type == event_type)
                .collect();
            (!of_type.is_empty()).then_some((event_type, of_type))
        })
        .collect()
}

/// One `HH:MM - <subject or message excerpt>` listing line.
fn listing_line(event: &Event) -> String {
    let text = if event.subject.is_empty() {
        excerpt(&event.message, 60)
    } else {
        event.subject.clone()
    };
    format!("{} - {}", event.timestamp.format("%H:%M"), text)
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

fn render_plain(user_id: &str, events: &[&Event]) -> String {
    let mut lines = vec![
        format!("Event Summary for User {user_id}"),
        period_line(events),
        format!("Total Events: {}", events.len()),
        "-".repeat(50),
    ];

    for (event_type, of_type) in by_type(events) {
        lines.push(String::new());
        lines.push(format!("{} ({} events):", event_type, of_type.len()));
        lines.push("-".repeat(30));
        for event in of_type {
            lines.push(listing_line(event));
        }
    }

    lines.join("\n")
}

/// Minute-precision ISO-8601 UTC timestamp for the HTML table.
fn table_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%MZ").to_string()
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn render_html(user_id: &str, events: &[&Event]) -> String {
    let mut html = vec![
        "<!DOCTYPE html>".to_string(),
        "<html><head>".to_string(),
        "<title>Event Summary</title>".to_string(),
        "<style>".to_string(),
        "table { border-collapse: collapse; width: 100%; }".to_string(),
        "th, td { border: 1px solid #ddd; padding: 6px; text-align: left; }".to_string(),
        "th { background-color: #f2f2f2; }".to_string(),
        "</style>".to_string(),
        "</head><body>".to_string(),
        format!("<h1>Event Summary for User {}</h1>", html_escape(user_id)),
        format!("<p>{} &middot; Total Events: {}</p>", html_escape(&period_line(events)), events.len()),
        "<table>".to_string(),
        "<tr><th>Timestamp</th><th>Event ID</th><th>Type</th><th>Subject</th></tr>".to_string(),
    ];

    for event in events {
        html.push(format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            table_timestamp(event.timestamp),
            html_escape(&event.event_id),
            event.event_type,
            html_escape(&event.subject),
        ));
    }

    html.push("</table>".to_string());
    html.push("</body></html>".to_string());
    html.join("\n")
}

fn render_mime(user_id: &str, events: &[&Event], boundary: &str) -> String {
    let mut parts = Vec::new();

    let summary = format!(
        "Event Summary for User {user_id}\n{}\nTotal Events: {}\n",
        period_line(events),
        events.len()
    );
    parts.push(mime_part("summary.txt", &summary, boundary));

    for (event_type, of_type) in by_type(events) {
        let mut listing = vec![format!("{} ({} events):", event_type, of_type.len())];
        listing.extend(of_type.iter().map(|e| listing_line(e)));
        parts.push(mime_part(
            &format!("{event_type}_events.txt"),
            &format!("{}\n", listing.join("\n")),
            boundary,
        ));
    }

    format!("{}--{}--\r\n", parts.concat(), boundary)
}

fn mime_part(filename: &str, content: &str, boundary: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Disposition: inline; filename=\"{filename}\"\r\n\
         \r\n\
         {content}\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, event_type: EventType, minute: u32, subject: &str) -> Event {
        Event::new(
            id,
            "u1",
            event_type,
            "the message body",
            "sender@example.org",
            subject,
            Utc.with_ymd_and_hms(2024, 5, 17, 10, minute, 0).unwrap(),
        )
    }

    #[test]
    fn test_plain_layout() {
        let events = vec![
            event("e2", EventType::Alert, 30, "Second"),
            event("e1", EventType::Alert, 5, "First"),
            event("e3", EventType::Info, 10, "Third"),
        ];
        let rendered = render("u1", &events, AggregationMethod::Plain);

        assert_eq!(rendered.subject, "Event Summary for User u1");
        assert_eq!(rendered.content, ContentKind::Plain);

        let body = &rendered.body;
        assert!(body.starts_with("Event Summary for User u1"));
        assert!(body.contains("Period: 2024-05-17 to 2024-05-17"));
        assert!(body.contains("Total Events: 3"));
        assert!(body.contains("ALERT (2 events):"));
        assert!(body.contains("INFO (1 events):"));
        assert!(body.contains("10:05 - First"));
        assert!(body.contains("10:30 - Second"));

        // Within a type, ascending by timestamp.
        let first = body.find("10:05 - First").unwrap();
        let second = body.find("10:30 - Second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_plain_uses_message_excerpt_without_subject() {
        let mut e = event("e1", EventType::Info, 0, "");
        e.message = "x".repeat(100);
        let rendered = render("u1", &[e], AggregationMethod::Plain);
        assert!(rendered.body.contains(&format!("10:00 - {}...", "x".repeat(60))));
    }

    #[test]
    fn test_plain_deterministic() {
        let events = vec![
            event("e1", EventType::Alert, 5, "First"),
            event("e2", EventType::Info, 6, "Second"),
        ];
        let a = render("u1", &events, AggregationMethod::Plain);
        let b = render("u1", &events, AggregationMethod::Plain);
        assert_eq!(a, b);
    }

    #[test]
    fn test_plain_empty_input() {
        let rendered = render("u1", &[], AggregationMethod::Plain);
        assert!(rendered.body.contains("Total Events: 0"));
        assert!(rendered.body.contains("Period: n/a"));
    }

    #[test]
    fn test_html_table_and_escaping() {
        let events = vec![event(
            "e<1>",
            EventType::Warning,
            30,
            "<script>alert('x')</script>",
        )];
        let rendered = render("u&1", &events, AggregationMethod::Html);

        assert_eq!(rendered.content, ContentKind::Html);
        let body = &rendered.body;
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("<th>Timestamp</th><th>Event ID</th><th>Type</th><th>Subject</th>"));
        assert!(body.contains("2024-05-17T10:30Z"));
        assert!(body.contains("e&lt;1&gt;"));
        assert!(body.contains("&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"));
        assert!(body.contains("Event Summary for User u&amp;1"));
        assert!(!body.contains("<script>"));
    }

    #[test]
    fn test_html_deterministic() {
        let events = vec![event("e1", EventType::Info, 1, "s")];
        assert_eq!(
            render("u1", &events, AggregationMethod::Html),
            render("u1", &events, AggregationMethod::Html)
        );
    }

    #[test]
    fn test_mime_structure() {
        let events = vec![
            event("e1", EventType::Alert, 5, "First"),
            event("e2", EventType::Info, 6, "Second"),
        ];
        let rendered = render("u1", &events, AggregationMethod::Mime);

        let ContentKind::Multipart { boundary } = &rendered.content else {
            panic!("expected multipart content");
        };

        let body = &rendered.body;
        // Summary part plus one part per type, then the closing marker.
        assert_eq!(body.matches(&format!("--{boundary}\r\n")).count(), 3);
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));
        assert!(body.contains("Content-Disposition: inline; filename=\"summary.txt\""));
        assert!(body.contains("Content-Disposition: inline; filename=\"ALERT_events.txt\""));
        assert!(body.contains("Content-Disposition: inline; filename=\"INFO_events.txt\""));
        assert!(body.contains("10:05 - First"));
    }

    #[test]
    fn test_mime_boundary_unique_per_call() {
        let events = vec![event("e1", EventType::Info, 1, "s")];
        let a = render("u1", &events, AggregationMethod::Mime);
        let b = render("u1", &events, AggregationMethod::Mime);
        assert_ne!(a.content, b.content);
    }

    #[test]
    fn test_mime_empty_input_still_valid() {
        let rendered = render("u1", &[], AggregationMethod::Mime);
        let ContentKind::Multipart { boundary } = &rendered.content else {
            panic!("expected multipart content");
        };
        assert!(rendered.body.contains("Total Events: 0"));
        assert!(rendered.body.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn test_content_kind_mime_types() {
        assert_eq!(ContentKind::Plain.mime_type(), "text/plain; charset=utf-8");
        assert_eq!(ContentKind::Html.mime_type(), "text/html; charset=utf-8");
        assert_eq!(
            ContentKind::Multipart {
                boundary: "b1".to_string()
            }
            .mime_type(),
            "multipart/mixed; boundary=\"b1\""
        );
    }
}
