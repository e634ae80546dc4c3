use std::fmt;

use crate::model::PreparationError;

/// Streamed from a [`crate::model::PreparationTask`] to the host thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparationEvent {
    /// Fraction of scene objects processed, `0.0..=1.0`.
    Progress(f32),
    Succeeded { mesh_count: usize, triangle_count: usize },
    Failed(PreparationError),
}

impl PreparationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PreparationEvent::Progress(_))
    }
}

impl fmt::Display for PreparationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreparationEvent::Progress(fraction) => write!(f, "Progress {:.0}%", fraction * 100.0),
            PreparationEvent::Succeeded { mesh_count, triangle_count } => {
                write!(f, "Succeeded meshes={} triangles={}", mesh_count, triangle_count)
            }
            PreparationEvent::Failed(err) => write!(f, "Failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        assert_eq!(PreparationEvent::Progress(0.25).to_string(), "Progress 25%");
        assert_eq!(
            PreparationEvent::Succeeded { mesh_count: 3, triangle_count: 12 }.to_string(),
            "Succeeded meshes=3 triangles=12"
        );
        let failed = PreparationEvent::Failed(PreparationError::Empty);
        assert_eq!(failed.to_string(), "Failed: This model is empty.");
        assert!(failed.is_terminal());
        assert!(!PreparationEvent::Progress(1.0).is_terminal());
    }
}
