//! Diagnostics and chat transcripts.
//!
//! [`init`] installs the `tracing` subscriber the library logs through.
//! [`Transcript`] writes chat updates to daily per-channel files, named
//! `<server>_<channel>_<date>.log`, under the configured transcript directory
//! (default: `~/.local/share/lichat/logs/`).

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{warn, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::LoggingConfig;
use crate::update::{Kind, Update};

/// Install the global `tracing` subscriber.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level: Level = config
        .level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", config.level))?;

    let writer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(writer)
        .with_ansi(config.file.is_none())
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}

fn expand_home(dir: &str) -> PathBuf {
    match dir.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(dir)),
        None => PathBuf::from(dir),
    }
}

/// Writes chat updates to per-channel daily log files.
///
/// File handles are cached for the lifetime of the transcript. A file that
/// cannot be opened is reported once and then skipped.
pub struct Transcript {
    enabled: bool,
    dir: PathBuf,
    files: HashMap<String, Option<File>>,
}

impl Transcript {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.transcripts,
            dir: expand_home(&config.transcript_dir),
            files: HashMap::new(),
        }
    }

    /// The transcript line for an update, or `None` for kinds not worth keeping.
    pub fn format_line(update: &Update) -> Option<String> {
        let time = update
            .unix_clock()
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| chrono::Local::now().format("%H:%M:%S").to_string());
        let from = update.from().unwrap_or("?");
        let line = match update.kind() {
            Kind::Message => format!("[{}] <{}> {}", time, from, update.text()?),
            Kind::Edit => format!("[{}] <{}> (edited) {}", time, from, update.text()?),
            Kind::Join => format!("[{}] *** {} joined", time, from),
            Kind::Leave => format!("[{}] *** {} left", time, from),
            Kind::Kick => format!(
                "[{}] *** {} kicked {}",
                time,
                from,
                update.target().unwrap_or("?")
            ),
            Kind::Data => format!(
                "[{}] *** {} sent {}",
                time,
                from,
                update.get_str("filename").unwrap_or("a file")
            ),
            kind if kind.is_failure() => format!(
                "[{}] !!! {}: {}",
                time,
                kind,
                update.text().unwrap_or("no reason given")
            ),
            _ => return None,
        };
        Some(line)
    }

    /// Append `update` to the transcript for `server`/`channel`. No-op when
    /// transcripts are disabled or the kind is not logged.
    pub fn record(&mut self, server: &str, channel: &str, update: &Update) {
        if !self.enabled {
            return;
        }
        let Some(line) = Self::format_line(update) else {
            return;
        };

        let safe = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                .collect()
        };
        let date = chrono::Local::now().format("%Y-%m-%d").to_string();
        let filename = format!("{}_{}_{}.log", safe(server), safe(channel), date);
        let path = self.dir.join(&filename);
        let dir = &self.dir;

        let handle = self.files.entry(filename).or_insert_with(|| {
            let opened = fs::create_dir_all(dir).and_then(|()| {
                OpenOptions::new().create(true).append(true).open(&path)
            });
            match opened {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "transcript unavailable");
                    None
                }
            }
        });

        if let Some(file) = handle {
            let _ = writeln!(file, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::UNIVERSAL_UNIX_OFFSET;

    #[test]
    fn rejects_unknown_level() {
        let config = LoggingConfig {
            level: "loud".into(),
            ..LoggingConfig::default()
        };
        assert!(init(&config).is_err());
    }

    #[test]
    fn formats_chat_kinds() {
        let message = Update::new(Kind::Message)
            .with_from("bob")
            .with_clock(UNIVERSAL_UNIX_OFFSET)
            .with("channel", "lobby")
            .with("text", "hi");
        let line = Transcript::format_line(&message).unwrap();
        assert!(line.ends_with("<bob> hi"), "{}", line);

        let failure = Update::new(Kind::NoSuchChannel).with("text", "gone");
        assert!(Transcript::format_line(&failure)
            .unwrap()
            .ends_with("!!! no-such-channel: gone"));

        assert!(Transcript::format_line(&Update::new(Kind::Ping)).is_none());
    }

    #[test]
    fn records_to_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            transcripts: true,
            transcript_dir: dir.path().to_string_lossy().into_owned(),
            ..LoggingConfig::default()
        };
        let mut transcript = Transcript::new(&config);
        let join = Update::new(Kind::Join).with_from("bob").with("channel", "a/b");
        transcript.record("tynet", "a/b", &join);
        transcript.record("tynet", "a/b", &join);

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("tynet_a_b_"), "{}", name);
        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn disabled_transcript_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            transcript_dir: dir.path().to_string_lossy().into_owned(),
            ..LoggingConfig::default()
        };
        let mut transcript = Transcript::new(&config);
        transcript.record("tynet", "lobby", &Update::new(Kind::Join).with_from("bob"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
