use crate::api::Theme;
use crate::deck::Deck;
use crate::poller::PollOutcome;
use crate::JobRecord;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const PROMPT_WIDTH: usize = 40;
const HEADERS: [&str; 4] = ["Task ID", "Prompt", "Status", "URL"];

/// Renders the job log as a plain-text table.
pub fn job_table(records: &[JobRecord]) -> String {
    if records.is_empty() {
        return "No presentations yet.\n".to_string();
    }

    let rows: Vec<[String; 4]> = records
        .iter()
        .map(|r| {
            [
                r.task_id.clone(),
                truncate_to_width(&single_line(&r.description), PROMPT_WIDTH),
                r.status.clone(),
                r.result_url.clone(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.width());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.width());
        }
    }

    let separator = {
        let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("+{}+\n", dashes.join("+"))
    };

    let mut out = String::new();
    out.push_str(&separator);
    out.push_str(&format_row(&HEADERS.map(String::from), &widths));
    out.push_str(&separator);
    for row in &rows {
        out.push_str(&format_row(row, &widths));
    }
    out.push_str(&separator);
    out
}

pub fn theme_list(themes: &[Theme]) -> String {
    if themes.is_empty() {
        return "No themes available.\n".to_string();
    }
    themes
        .iter()
        .map(|t| format!("  - {}\n", t.name()))
        .collect()
}

/// Every slide with its shapes, the way the edit prompts refer to them.
pub fn slide_listing(deck: &Deck) -> String {
    if deck.slides.is_empty() {
        return "The presentation has no slides.\n".to_string();
    }
    let mut out = String::new();
    for slide in &deck.slides {
        out.push_str(&format!("\nSlide {}:\n", slide.slide_number));
        for shape in &slide.shapes {
            out.push_str(&format!(
                " - Shape Name: '{}' | Content: '{}'\n",
                shape.name,
                single_line(&shape.content)
            ));
        }
    }
    out
}

/// What the user is told once polling stops.
pub fn poll_outcome(task_id: &str, outcome: &PollOutcome) -> String {
    match outcome {
        PollOutcome::Succeeded { url, info_url } => {
            let banner = "*".repeat(42);
            let mut out = format!(
                "Presentation generation complete!\n{banner}\nDownload your presentation here: {url}\n"
            );
            if let Some(info) = info_url {
                out.push_str(&format!("Presentation info: {info}\n"));
            }
            out.push_str(&banner);
            out.push('\n');
            out
        }
        PollOutcome::Failed { status } => {
            format!("Presentation generation failed for task {task_id} (status {status}).\n")
        }
        PollOutcome::GaveUp {
            attempts,
            last_status,
        } => format!(
            "Stopped waiting for task {task_id} after {attempts} polls (last status {last_status}).\n\
             Run `slidespeak status {task_id}` to check on it later.\n"
        ),
    }
}

fn format_row(cells: &[String; 4], widths: &[usize; 4]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let pad = width.saturating_sub(cell.width());
            format!(" {}{} ", cell, " ".repeat(pad))
        })
        .collect();
    format!("|{}|\n", padded.join("|"))
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_to_width(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }

    let mut result = String::new();
    let mut current_width = 0;
    let limit = max_width.saturating_sub(1);

    for c in s.chars() {
        let char_width = c.width().unwrap_or(0);
        if current_width + char_width > limit {
            break;
        }
        result.push(c);
        current_width += char_width;
    }
    result.push('…');
    result
}
