//! Markdown summary generation
//!
//! This module generates human-readable markdown summaries of a crawl
//! session, including its outcome, link and content statistics.

use crate::output::stats::CrawlStatistics;
use crate::state::CrawlSession;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown summary of a session
///
/// # Arguments
///
/// * `session` - Final snapshot of the session
/// * `stats` - Statistics for the session's pages
/// * `output_path` - Path where the markdown file should be written
pub fn generate_markdown_summary(
    session: &CrawlSession,
    stats: &CrawlStatistics,
    output_path: &Path,
) -> std::io::Result<()> {
    let markdown = format_markdown_summary(session, stats);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a session summary as markdown
pub fn format_markdown_summary(session: &CrawlSession, stats: &CrawlStatistics) -> String {
    let mut md = String::new();

    md.push_str("# Kumo-Crawl Session Summary\n\n");

    md.push_str("## Session Information\n\n");
    md.push_str(&format!("- **Session ID**: {}\n", session.id));
    md.push_str(&format!("- **Base URL**: {}\n", session.base_url));
    md.push_str(&format!(
        "- **Limits**: depth {}, {} pages\n",
        session.max_depth, session.max_pages
    ));
    md.push_str(&format!("- **Started**: {}\n", session.started_at.to_rfc3339()));
    if let Some(finished) = session.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
        let seconds = session.duration().num_seconds();
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            seconds,
            seconds as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **State**: {}\n", session.state));
    if let Some(error) = &session.error {
        md.push_str(&format!("- **Error**: {}\n", error));
    }
    if let Some(hash) = &session.config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    md.push('\n');

    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Pages Crawled**: {}\n", session.pages_crawled));
    md.push_str(&format!("- **Pages Failed**: {}\n", session.pages_failed));
    md.push_str(&format!("- **Pages Blocked**: {}\n", session.pages_blocked));
    md.push_str(&format!("- **Duplicate Pages**: {}\n", session.duplicate_pages));
    md.push_str(&format!("- **Unique Domains**: {}\n", stats.unique_domains));
    md.push_str(&format!("- **Total Links**: {}\n", stats.total_links));
    md.push_str(&format!(
        "- **Average Links per Page**: {:.1}\n",
        stats.avg_links_per_page()
    ));
    md.push_str(&format!(
        "- **Average Fetch Time**: {:.0} ms\n",
        stats.avg_fetch_ms
    ));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        stats.success_rate()
    ));

    if !stats.pages_by_status.is_empty() {
        md.push_str("## Status Breakdown\n\n");
        md.push_str("| Status | Count |\n");
        md.push_str("|--------|-------|\n");
        for (status, count) in &stats.pages_by_status {
            md.push_str(&format!("| {} | {} |\n", status, count));
        }
        md.push('\n');
    }

    if !stats.depth_breakdown.is_empty() {
        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Pages |\n");
        md.push_str("|-------|-------|\n");
        for (depth, count) in &stats.depth_breakdown {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');
    }

    md
}
