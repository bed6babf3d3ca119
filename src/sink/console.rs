use super::StatusSink;
use crate::error::SinkError;
use crate::phase::{CanonicalPhase, Direction};
use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::io::Write;

/// Marker shown next to a phase name
pub fn phase_marker(phase: CanonicalPhase) -> &'static str {
    match phase {
        CanonicalPhase::Stopped => "🟥",
        CanonicalPhase::Starting => "🟧",
        CanonicalPhase::Running => "🟩",
        CanonicalPhase::Stopping => "⬜",
        CanonicalPhase::Invalid => "⚠️",
    }
}

/// Accent colour (RGB) for a combined phase: red when fully down, green when
/// fully up, grey while anything is in between
pub fn status_colour(combined: CanonicalPhase) -> u32 {
    match combined {
        CanonicalPhase::Stopped => 0xd11f00,
        CanonicalPhase::Running => 0x04d45b,
        _ => 0xb8b9ba,
    }
}

fn title(direction: Direction) -> &'static str {
    match direction {
        Direction::Start => "Starting...",
        Direction::Stop => "Stopping...",
    }
}

/// Render one snapshot as a single status line
pub fn render_snapshot(snapshot: &Snapshot) -> String {
    format!(
        "[{}] {} | instance: {} {} | app: {} {} | overall: {}",
        snapshot.tick,
        title(snapshot.direction),
        phase_marker(snapshot.infra_phase),
        snapshot.infra_phase,
        phase_marker(snapshot.app_phase),
        snapshot.app_phase,
        snapshot.combined_phase
    )
}

/// Line format written by [`ConsoleSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleFormat {
    #[default]
    Text,
    /// One JSON object per snapshot
    Json,
}

/// Writes rendered snapshots to a terminal or any other writer
pub struct ConsoleSink {
    writer: Mutex<Box<dyn Write + Send>>,
    format: ConsoleFormat,
}

impl ConsoleSink {
    pub fn new(writer: Box<dyn Write + Send>, format: ConsoleFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
        }
    }

    pub fn stdout(format: ConsoleFormat) -> Self {
        Self::new(Box::new(std::io::stdout()), format)
    }

    fn render(&self, snapshot: &Snapshot) -> Result<String, SinkError> {
        match self.format {
            ConsoleFormat::Text => Ok(render_snapshot(snapshot)),
            ConsoleFormat::Json => serde_json::to_string(snapshot).map_err(|e| SinkError::Write {
                details: e.to_string(),
            }),
        }
    }
}

impl StatusSink for ConsoleSink {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let line = self.render(snapshot)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| SinkError::Write {
                details: e.to_string(),
            })
    }
}
