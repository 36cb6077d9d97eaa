use fire_watch_common::frame::Detection;

/// Which detection of a frame drives the notification decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// First detection in model output order.
    #[default]
    FirstDetected,
    /// Highest confidence; ties go to the earlier detection.
    HighestConfidence,
}

impl SelectionPolicy {
    pub fn parse(name: &str) -> Result<Self, UnknownPolicy> {
        match name {
            "first" => Ok(Self::FirstDetected),
            "highest_confidence" => Ok(Self::HighestConfidence),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }

    pub fn select<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        match self {
            Self::FirstDetected => detections.first(),
            Self::HighestConfidence => detections.iter().fold(None, |best, d| match best {
                Some(b) if b.confidence >= d.confidence => Some(b),
                _ => Some(d),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown selection policy {0:?}, expected 'first' or 'highest_confidence'")]
pub struct UnknownPolicy(String);

#[cfg(test)]
mod tests {
    use super::*;

    fn detections() -> Vec<Detection> {
        vec![
            Detection::new("smoke", 0.72, 1),
            Detection::new("fire", 0.95, 0),
            Detection::new("fire", 0.81, 0),
        ]
    }

    #[test]
    fn first_detected_follows_model_order() {
        let list = detections();
        let picked = SelectionPolicy::FirstDetected.select(&list).unwrap();
        assert_eq!(picked.label, "smoke");
        assert_eq!(picked.confidence, 0.72);
    }

    #[test]
    fn highest_confidence_picks_max() {
        let list = detections();
        let picked = SelectionPolicy::HighestConfidence.select(&list).unwrap();
        assert_eq!(picked.label, "fire");
        assert_eq!(picked.confidence, 0.95);
    }

    #[test]
    fn highest_confidence_tie_keeps_earliest() {
        let list = vec![
            Detection::new("smoke", 0.9, 1),
            Detection::new("fire", 0.9, 0),
        ];
        let picked = SelectionPolicy::HighestConfidence.select(&list).unwrap();
        assert_eq!(picked.label, "smoke");
    }

    #[test]
    fn empty_list_selects_nothing() {
        assert!(SelectionPolicy::FirstDetected.select(&[]).is_none());
        assert!(SelectionPolicy::HighestConfidence.select(&[]).is_none());
    }

    #[test]
    fn parse_names() {
        assert_eq!(SelectionPolicy::parse("first").unwrap(), SelectionPolicy::FirstDetected);
        assert_eq!(
            SelectionPolicy::parse("highest_confidence").unwrap(),
            SelectionPolicy::HighestConfidence
        );
        assert!(SelectionPolicy::parse("largest").is_err());
    }
}
