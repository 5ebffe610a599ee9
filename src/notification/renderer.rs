//! Terminal renderer for notices.
//!
//! Renders a [`Notice`] as a bordered panel. Colors can be turned off for
//! non-terminal output.

use owo_colors::{OwoColorize, Rgb};

use super::{Notice, NoticeLevel};

/// Colors used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    /// Error color - red (239, 68, 68)
    pub error: Rgb,
    /// Warning color - yellow (234, 179, 8)
    pub warning: Rgb,
    /// Info / in-progress color - blue (59, 130, 246)
    pub info: Rgb,
    /// Muted/secondary text color - gray (107, 114, 128)
    pub muted: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            error: Rgb(239, 68, 68),
            warning: Rgb(234, 179, 8),
            info: Rgb(59, 130, 246),
            muted: Rgb(107, 114, 128),
        }
    }
}

/// Renders notices as text panels.
#[derive(Debug, Clone)]
pub struct NoticeRenderer {
    palette: Palette,
    /// Panel width (characters)
    width: usize,
    colored: bool,
}

impl Default for NoticeRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeRenderer {
    /// Creates a renderer with the default palette and colors enabled.
    pub fn new() -> Self {
        Self {
            palette: Palette::default(),
            width: 60,
            colored: true,
        }
    }

    /// Sets the panel width.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(10);
        self
    }

    /// Enables or disables ANSI colors.
    pub fn with_colors(mut self, colored: bool) -> Self {
        self.colored = colored;
        self
    }

    /// Safely truncates a string to the given maximum character count.
    fn safe_truncate(s: &str, max_chars: usize) -> String {
        if s.chars().count() <= max_chars {
            s.to_string()
        } else {
            let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{}...", truncated)
        }
    }

    fn paint(&self, text: &str, color: Rgb, bold: bool) -> String {
        match (self.colored, bold) {
            (false, _) => text.to_string(),
            (true, true) => text.color(color).bold().to_string(),
            (true, false) => text.color(color).to_string(),
        }
    }

    fn accent(&self, notice: &Notice) -> Rgb {
        match notice {
            Notice::Blocking { .. } => self.palette.error,
            Notice::Transient { level, .. } => match level {
                NoticeLevel::Error => self.palette.error,
                NoticeLevel::Warning => self.palette.warning,
                NoticeLevel::Info => self.palette.info,
            },
            Notice::Retrying { .. } | Notice::Persistent { .. } => self.palette.info,
        }
    }

    fn heading(notice: &Notice) -> String {
        match notice {
            Notice::Blocking { title, .. } => title.clone(),
            Notice::Transient { level, .. } => match level {
                NoticeLevel::Error => "Error".to_string(),
                NoticeLevel::Warning => "Warning".to_string(),
                NoticeLevel::Info => "Notice".to_string(),
            },
            Notice::Retrying {
                attempt,
                max_attempts,
                ..
            } => format!("Retrying ({}/{})", attempt, max_attempts),
            Notice::Persistent { .. } => "Safe Mode".to_string(),
        }
    }

    fn body(notice: &Notice) -> String {
        match notice {
            Notice::Blocking { message, .. }
            | Notice::Transient { message, .. }
            | Notice::Persistent { message } => message.clone(),
            Notice::Retrying { delay, origin, .. } => {
                format!("{} in {} ms", origin, delay.as_millis())
            }
        }
    }

    /// Renders a notice panel.
    pub fn render(&self, notice: &Notice) -> String {
        let accent = self.accent(notice);
        let inner_width = self.width - 2;
        let border = "─".repeat(inner_width);
        let mut output = String::new();

        output.push_str(&format!("{}\n", self.paint(&border, accent, false)));

        let heading = Self::safe_truncate(&Self::heading(notice), inner_width - 1);
        output.push_str(&format!(" {}\n", self.paint(&heading, accent, true)));

        let body = Self::safe_truncate(&Self::body(notice), inner_width - 1);
        output.push_str(&format!(" {}\n", body));

        if let Notice::Blocking { actions, .. } = notice {
            let labels: Vec<String> = actions
                .iter()
                .map(|action| format!("[{}]", action.label()))
                .collect();
            output.push_str(&format!(
                " {}\n",
                self.paint(&labels.join(" "), self.palette.muted, false)
            ));
        }

        output.push_str(&self.paint(&border, accent, false));
        output
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_render_blocking_lists_actions() {
        let renderer = NoticeRenderer::new().with_colors(false);
        let panel = renderer.render(&Notice::critical());
        assert!(panel.contains("Critical Error"));
        assert!(panel.contains("[Reload] [Report Issue]"));
    }

    #[test]
    fn test_render_retrying() {
        let renderer = NoticeRenderer::new().with_colors(false);
        let panel = renderer.render(&Notice::retrying(
            1,
            3,
            Duration::from_secs(1),
            "http://h/data",
        ));
        assert!(panel.contains("Retrying (1/3)"));
        assert!(panel.contains("http://h/data in 1000 ms"));
    }

    #[test]
    fn test_render_truncates_long_messages() {
        let renderer = NoticeRenderer::new().with_colors(false).with_width(20);
        let long = "x".repeat(100);
        let panel = renderer.render(&Notice::transient(
            NoticeLevel::Info,
            long,
            Duration::from_secs(1),
        ));
        assert!(panel.contains("..."));
        for line in panel.lines() {
            assert!(line.chars().count() <= 20, "line too wide: {:?}", line);
        }
    }

    #[test]
    fn test_safe_truncate_multibyte() {
        let s = "héllo wörld";
        assert_eq!(NoticeRenderer::safe_truncate(s, 100), s);
        assert_eq!(NoticeRenderer::safe_truncate(s, 6), "hél...");
    }
}
