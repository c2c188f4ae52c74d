//! Brain system endpoints: identification, LED blinking and the system log.

use brain_transport::HttpTransport;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoints;
use crate::error::{BrainError, Result};

/// Subset of the brain's `/v1/systeminfo` answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInfo {
    pub hostname: Option<String>,
    pub label: Option<String>,
    pub version: Option<String>,
    pub firmware_version: Option<String>,
    pub user: Option<String>,
}

async fn get_ok(transport: &dyn HttpTransport, url: &str) -> Result<String> {
    debug!(%url, "brain system request");
    let response = transport.get(url).await?;
    if !response.is_ok() {
        return Err(BrainError::Transport {
            status: response.status,
            body: response.body,
        });
    }
    Ok(response.body)
}

/// Fetch the system information, e.g. to check an address really is a brain
pub async fn fetch_system_info(transport: &dyn HttpTransport, brain_url: &str) -> Result<SystemInfo> {
    let body = get_ok(transport, &format!("{brain_url}{}", endpoints::SYSTEM_INFO)).await?;
    Ok(serde_json::from_str(&body)?)
}

/// Make the brain blink its LED
pub async fn identify_brain(transport: &dyn HttpTransport, brain_url: &str) -> Result<()> {
    get_ok(transport, &format!("{brain_url}{}", endpoints::IDENTIFY_BRAIN)).await?;
    Ok(())
}

/// Fetch the brain log rendered as HTML
pub async fn fetch_log_html(transport: &dyn HttpTransport, brain_url: &str) -> Result<String> {
    let body = get_ok(transport, &format!("{brain_url}{}", endpoints::GET_LOG)).await?;
    Ok(ansi_to_html(&body))
}

const ANSI_COLORS: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];

/// Convert ANSI-colored text to HTML.
///
/// Every line becomes a `<div>`; every SGR escape (`ESC [ ... m`) closes the
/// current `<span>` and opens a new one carrying the equivalent inline style.
pub fn ansi_to_html(text: &str) -> String {
    let mut html = String::with_capacity(text.len() + 64);
    html.push_str("<pre><div><span>");

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' | '\n' => {
                // A CRLF pair is one break; bare CR and bare LF are one each
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if chars.peek().is_some() {
                    html.push_str("</span></div><div><span>");
                }
            }
            '\u{1b}' if chars.peek() == Some(&'[') => {
                chars.next();
                let codes: String = chars.by_ref().take_while(|c| *c != 'm').collect();
                html.push_str("</span><span style='");
                html.push_str(&sgr_style(&codes));
                html.push_str("'>");
            }
            '<' => html.push_str("&lt;"),
            '>' => html.push_str("&gt;"),
            '&' => html.push_str("&amp;"),
            '\'' => html.push_str("&#39;"),
            '"' => html.push_str("&quot;"),
            c => html.push(c),
        }
    }

    html.push_str("</span></div></pre>");
    html
}

/// Inline CSS for the `;`-separated parameters of an SGR sequence
fn sgr_style(codes: &str) -> String {
    let mut style = String::new();
    for code in codes.split(';') {
        let code = code.trim();
        // ESC[m is shorthand for ESC[0m
        if code.is_empty() {
            style.clear();
            continue;
        }
        let Ok(code) = code.parse::<u8>() else {
            continue;
        };
        match code {
            0 => style.clear(),
            1 => style.push_str("font-weight:bold;"),
            4 => style.push_str("font-style:italic;"),
            30..=37 => {
                style.push_str("color:");
                style.push_str(ANSI_COLORS[usize::from(code - 30)]);
                style.push(';');
            }
            40..=47 => {
                style.push_str("background-color:");
                style.push_str(ANSI_COLORS[usize::from(code - 40)]);
                style.push(';');
            }
            _ => {}
        }
    }
    style
}
