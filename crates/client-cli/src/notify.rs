//! User-visible transient notifications.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub title: String,
    pub description: Option<String>,
}

impl Notification {
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            title: title.into(),
            description: Some(description.into()),
        }
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            title: title.into(),
            description: None,
        }
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            title: title.into(),
            description: None,
        }
    }
}

/// Sink for notifications; rendering is the caller's business
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Renders notifications as coloured lines on stderr
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notification: Notification) {
        let colour = match notification.level {
            Level::Info => "36",
            Level::Success => "32",
            Level::Error => "31",
        };
        match notification.description {
            Some(description) => eprintln!(
                "\x1b[{}m{}\x1b[0m \x1b[90m{}\x1b[0m",
                colour, notification.title, description
            ),
            None => eprintln!("\x1b[{}m{}\x1b[0m", colour, notification.title),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_level() {
        assert_eq!(Notification::info("Watching leads").level, Level::Info);
        assert_eq!(Notification::success("Lead deleted").level, Level::Success);

        let error = Notification::error("Could not load leads", "backend down");
        assert_eq!(error.level, Level::Error);
        assert_eq!(error.description.as_deref(), Some("backend down"));
    }
}
