use crate::registry::ConnectionRegistry;
use std::fmt::Write;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::Instant;

/// One line of the status table
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub last_seen_age: Duration,
}

/// Reads the current players, ordered by ID so the page is stable
pub fn collect_rows(registry: &ConnectionRegistry) -> Vec<StatusRow> {
    let now = Instant::now();
    let mut rows = Vec::new();

    registry.for_each(|_, record| {
        rows.push(StatusRow {
            id: record.id.clone(),
            x: record.x,
            y: record.y,
            last_seen_age: now.saturating_duration_since(record.last_seen),
        });
        ControlFlow::Continue(())
    });

    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}

pub fn render_status_page(rows: &[StatusRow]) -> String {
    let mut page = String::from("<html><body>");
    page.push_str("<h1>Game Server Status</h1>");
    let _ = write!(page, "<p>Connected players: {}</p>", rows.len());
    page.push_str("<table border='1'><tr><th>ID</th><th>Position</th><th>Last Seen</th></tr>");

    for row in rows {
        let _ = write!(
            page,
            "<tr><td>{}</td><td>({:.2}, {:.2})</td><td>{:.1?} ago</td></tr>",
            escape_html(&row.id),
            row.x,
            row.y,
            row.last_seen_age
        );
    }

    page.push_str("</table></body></html>");
    page
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::registry::PlayerRecord;

    #[test]
    fn test_empty_page() {
        let page = render_status_page(&[]);
        assert!(page.contains("<h1>Game Server Status</h1>"));
        assert!(page.contains("Connected players: 0"));
        assert!(page.ends_with("</table></body></html>"));
    }

    #[test]
    fn test_rows_rendered_with_two_decimals() {
        let rows = vec![StatusRow {
            id: "abc".to_string(),
            x: 1.0,
            y: -2.555,
            last_seen_age: Duration::from_millis(1500),
        }];

        let page = render_status_page(&rows);
        assert!(page.contains("Connected players: 1"));
        assert!(page.contains("<td>abc</td>"));
        assert!(page.contains("(1.00, -2.56)") || page.contains("(1.00, -2.55)"));
        assert!(page.contains("1.5s ago"));
    }

    #[test]
    fn test_ids_are_escaped() {
        let rows = vec![StatusRow {
            id: "<script>".to_string(),
            x: 0.0,
            y: 0.0,
            last_seen_age: Duration::ZERO,
        }];

        let page = render_status_page(&rows);
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_collect_rows_sorted_by_id() {
        let registry = ConnectionRegistry::new();
        let mut ios = Vec::new();
        for id in ["charlie", "alpha", "bravo"] {
            let (handle, io) = ConnectionHandle::new(None, 1);
            ios.push(io);
            registry.add(handle, PlayerRecord::new(id));
        }

        let ids: Vec<String> = collect_rows(&registry).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
    }
}
