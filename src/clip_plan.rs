use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest clip the generation backend accepts in one request.
pub const BACKEND_MAX_SECONDS: f64 = 12.0;

const COUNT_EPSILON: f64 = 1e-9;

const CONTINUITY_HINT: &str = "Continue the same shot seamlessly from the provided first frame: \
same subjects, same lighting, same camera position and movement. Do not cut or reset the scene.";

/// Discrete durations the backend can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClipLength {
    Short,
    Medium,
    Max,
}

impl ClipLength {
    pub const ALL: [ClipLength; 3] = [ClipLength::Short, ClipLength::Medium, ClipLength::Max];

    pub fn seconds(self) -> u32 {
        match self {
            Self::Short => 4,
            Self::Medium => 8,
            Self::Max => 12,
        }
    }

    /// Smallest supported length that covers `secs`; anything above the
    /// backend ceiling maps to `Max`.
    pub fn covering(secs: f64) -> Self {
        Self::ALL
            .into_iter()
            .find(|len| secs <= len.seconds() as f64 + COUNT_EPSILON)
            .unwrap_or(Self::Max)
    }

    pub fn from_seconds(secs: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|len| len.seconds() == secs)
    }
}

/// How segment prompts after the first are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// `"{prompt} (part N)"`, for segments generated without a seed frame.
    Numbered,
    /// Base prompt plus an explicit continue-the-shot instruction.
    Continuation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// Zero-based position in the chain.
    pub index: usize,
    /// Slice of the total timeline this segment is meant to cover.
    pub planned_seconds: f64,
    pub length: ClipLength,
    pub prompt: String,
    pub seed_frame: Option<PathBuf>,
}

impl SegmentSpec {
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn requested_seconds(&self) -> f64 {
        self.length.seconds() as f64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub items: Vec<SegmentSpec>,
}

impl SegmentPlan {
    pub fn build(
        prompt: &str,
        total_seconds: f64,
        segment_seconds: f64,
        style: PromptStyle,
    ) -> Result<Self> {
        if !(total_seconds > 0.0) {
            return Err(ChainError::configuration(format!(
                "total duration must be positive (got {})",
                total_seconds
            )));
        }
        if !(segment_seconds > 0.0) || segment_seconds > BACKEND_MAX_SECONDS {
            return Err(ChainError::configuration(format!(
                "segment duration must be in (0, {}] (got {})",
                BACKEND_MAX_SECONDS, segment_seconds
            )));
        }

        let count = segment_count(total_seconds, segment_seconds);
        let mut items = Vec::with_capacity(count);
        for index in 0..count {
            let remaining = total_seconds - index as f64 * segment_seconds;
            let planned = segment_seconds.min(remaining);
            items.push(SegmentSpec {
                index,
                planned_seconds: planned,
                length: ClipLength::covering(planned),
                prompt: segment_prompt(prompt, index, count, style),
                seed_frame: None,
            });
        }

        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn requested_total(&self) -> f64 {
        self.items.iter().map(SegmentSpec::requested_seconds).sum()
    }
}

/// `ceil(total / segment)`, tolerant of float noise such as `3.0 / 0.1`.
///
/// The ceiling is only lowered when one fewer segment still covers the total.
pub fn segment_count(total_seconds: f64, segment_seconds: f64) -> usize {
    let ceiled = (total_seconds / segment_seconds).ceil().max(1.0) as usize;
    if ceiled > 1 && (ceiled - 1) as f64 * segment_seconds >= total_seconds {
        ceiled - 1
    } else {
        ceiled
    }
}

pub fn continuation_prompt(base: &str) -> String {
    let base = base.trim_end();
    let sep = if base.ends_with(['.', '!', '?']) { " " } else { ". " };
    format!("{}{}{}", base, sep, CONTINUITY_HINT)
}

fn segment_prompt(base: &str, index: usize, count: usize, style: PromptStyle) -> String {
    match style {
        PromptStyle::Numbered if count > 1 => format!("{} (part {})", base, index + 1),
        PromptStyle::Numbered => base.to_string(),
        PromptStyle::Continuation if index == 0 => base.to_string(),
        PromptStyle::Continuation => continuation_prompt(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_count_is_ceiling() {
        assert_eq!(segment_count(24.0, 12.0), 2);
        assert_eq!(segment_count(25.0, 12.0), 3);
        assert_eq!(segment_count(5.0, 12.0), 1);
        assert_eq!(segment_count(60.0, 8.0), 8);
        assert_eq!(segment_count(3.0, 0.1), 30);
        assert_eq!(segment_count(0.5, 0.25), 2);
        assert_eq!(segment_count(12.000000001, 12.0), 2);
        assert_eq!(segment_count(24.0000001, 12.0), 3);
    }

    #[test]
    fn test_total_just_over_a_multiple_gets_another_segment() {
        let total = 12.000000001;
        let plan = SegmentPlan::build("rain", total, 12.0, PromptStyle::Continuation).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.requested_total() >= total);
        assert_eq!(plan.items[1].length, ClipLength::Short);
    }

    #[test]
    fn test_covering_prefers_next_larger() {
        assert_eq!(ClipLength::covering(1.0), ClipLength::Short);
        assert_eq!(ClipLength::covering(4.0), ClipLength::Short);
        assert_eq!(ClipLength::covering(4.5), ClipLength::Medium);
        assert_eq!(ClipLength::covering(8.0), ClipLength::Medium);
        assert_eq!(ClipLength::covering(8.01), ClipLength::Max);
        assert_eq!(ClipLength::covering(12.0), ClipLength::Max);
        assert_eq!(ClipLength::covering(30.0), ClipLength::Max);
    }

    #[test]
    fn test_plan_covers_total_duration() {
        for (total, seg) in [(24.0, 12.0), (17.0, 12.0), (30.0, 8.0), (5.0, 4.0), (61.5, 10.0)] {
            let plan = SegmentPlan::build("ocean waves", total, seg, PromptStyle::Continuation).unwrap();
            assert_eq!(plan.len(), segment_count(total, seg));
            assert!(plan.requested_total() >= total, "{} / {}", total, seg);
            assert!(plan
                .items
                .iter()
                .all(|s| s.requested_seconds() <= BACKEND_MAX_SECONDS));
        }
    }

    #[test]
    fn test_last_segment_uses_remainder() {
        let plan = SegmentPlan::build("city", 20.0, 8.0, PromptStyle::Numbered).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.items[2].planned_seconds, 4.0);
        assert_eq!(plan.items[2].length, ClipLength::Short);
        assert_eq!(plan.items[0].length, ClipLength::Medium);
    }

    #[test]
    fn test_prompts_per_style() {
        let plan = SegmentPlan::build("A fox in snow", 24.0, 12.0, PromptStyle::Continuation).unwrap();
        assert_eq!(plan.items[0].prompt, "A fox in snow");
        assert!(plan.items[1].prompt.starts_with("A fox in snow. "));
        assert!(plan.items[1].prompt.contains("Do not cut or reset the scene"));

        let plan = SegmentPlan::build("A fox in snow", 24.0, 12.0, PromptStyle::Numbered).unwrap();
        assert_eq!(plan.items[0].prompt, "A fox in snow (part 1)");
        assert_eq!(plan.items[1].prompt, "A fox in snow (part 2)");

        let plan = SegmentPlan::build("A fox in snow", 10.0, 12.0, PromptStyle::Numbered).unwrap();
        assert_eq!(plan.items[0].prompt, "A fox in snow");
    }

    #[test]
    fn test_invalid_durations_rejected() {
        assert!(SegmentPlan::build("x", 0.0, 12.0, PromptStyle::Numbered).is_err());
        assert!(SegmentPlan::build("x", 10.0, 0.0, PromptStyle::Numbered).is_err());
        assert!(SegmentPlan::build("x", 10.0, 13.0, PromptStyle::Numbered).is_err());
    }
}
