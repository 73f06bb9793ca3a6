//! Crossfade planning and the typed filter graph that renders it.
//!
//! Planning works purely on measured segment durations. The graph is a list of
//! nodes whose inputs and outputs are [`Pad`]s; [`FilterGraph::render`] is the
//! only place that knows ffmpeg's `filter_complex` syntax.

use crate::error::{ChainError, Result};
use std::fmt;

/// Shortest transition the compositor will emit, and the margin kept between a
/// transition and the shortest segment.
pub const MIN_CROSSFADE_SECONDS: f64 = 0.1;

/// Frame rate used when no segment reports a usable one.
pub const FALLBACK_FPS: f64 = 30.0;

const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Crossfade length actually used for the given segment durations.
///
/// A request at or above the shortest segment is pulled back to
/// `min - 0.1s`, never below 0.1s.
pub fn effective_crossfade(requested: f64, durations: &[f64]) -> f64 {
    let shortest = durations.iter().copied().fold(f64::INFINITY, f64::min);
    if durations.len() < 2 || !shortest.is_finite() || requested < shortest {
        return requested;
    }
    (shortest - MIN_CROSSFADE_SECONDS).max(MIN_CROSSFADE_SECONDS)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub left_index: usize,
    pub right_index: usize,
    /// Start of the blend on the composite timeline.
    pub offset: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossfadePlan {
    /// Measured duration of every input, in timeline order.
    pub durations: Vec<f64>,
    pub transitions: Vec<Transition>,
    pub crossfade: f64,
    pub total_duration: f64,
}

impl CrossfadePlan {
    pub fn build(durations: &[f64], requested: f64) -> Result<Self> {
        if durations.len() < 2 {
            return Err(ChainError::Composition {
                reason: format!("crossfade needs at least 2 segments (got {})", durations.len()),
            });
        }
        if let Some(bad) = durations.iter().find(|d| !(**d > 0.0)) {
            return Err(ChainError::Composition {
                reason: format!("segment duration must be positive (got {})", bad),
            });
        }
        if !(requested > 0.0) {
            return Err(ChainError::Composition {
                reason: format!("crossfade must be positive (got {})", requested),
            });
        }

        let crossfade = effective_crossfade(requested, durations);
        let mut cumulative = durations[0];
        let mut transitions = Vec::with_capacity(durations.len() - 1);
        for (right, duration) in durations.iter().enumerate().skip(1) {
            transitions.push(Transition {
                left_index: right - 1,
                right_index: right,
                offset: cumulative - crossfade,
                duration: crossfade,
            });
            cumulative += duration - crossfade;
        }

        Ok(Self {
            durations: durations.to_vec(),
            transitions,
            crossfade,
            total_duration: cumulative,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Video,
    Audio,
}

impl Track {
    fn suffix(self) -> &'static str {
        match self {
            Self::Video => "v",
            Self::Audio => "a",
        }
    }
}

/// A labelled stream in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pad {
    /// Raw stream of input file `input`.
    Source { input: usize, track: Track },
    /// Input stream after rate/format normalisation.
    Normalized { input: usize, track: Track },
    /// Output of transition `step`.
    Blend { step: usize, track: Track },
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { input, track } => write!(f, "[{}:{}]", input, track.suffix()),
            Self::Normalized { input, track } => write!(f, "[n{}{}]", input, track.suffix()),
            Self::Blend { step, track } => write!(f, "[x{}{}]", step, track.suffix()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Normalize {
        input: usize,
        track: Track,
        fps: f64,
        /// Measured container duration; audio is padded or cut to exactly this.
        duration: f64,
    },
    Blend {
        step: usize,
        track: Track,
        left: Pad,
        right: Pad,
        offset: f64,
        duration: f64,
    },
}

impl FilterNode {
    pub fn output(&self) -> Pad {
        match *self {
            Self::Normalize { input, track, .. } => Pad::Normalized { input, track },
            Self::Blend { step, track, .. } => Pad::Blend { step, track },
        }
    }

    fn render(&self) -> String {
        match *self {
            Self::Normalize {
                input,
                track: Track::Video,
                fps,
                ..
            } => format!(
                "{}fps={:.3},format=yuv420p,setsar=1,settb=AVTB{}",
                Pad::Source { input, track: Track::Video },
                fps,
                self.output()
            ),
            Self::Normalize {
                input,
                track: Track::Audio,
                duration,
                ..
            } => format!(
                "{}aresample={},aformat=sample_fmts=fltp:channel_layouts=stereo,apad,atrim=duration={:.3},asetpts=PTS-STARTPTS{}",
                Pad::Source { input, track: Track::Audio },
                AUDIO_SAMPLE_RATE,
                duration,
                self.output()
            ),
            Self::Blend {
                track: Track::Video,
                left,
                right,
                offset,
                duration,
                ..
            } => format!(
                "{}{}xfade=transition=fade:duration={:.3}:offset={:.3}{}",
                left,
                right,
                duration,
                offset,
                self.output()
            ),
            Self::Blend {
                track: Track::Audio,
                left,
                right,
                duration,
                ..
            } => format!(
                "{}{}acrossfade=d={:.3}:c1=tri:c2=tri{}",
                left,
                right,
                duration,
                self.output()
            ),
        }
    }
}

/// N-way crossfade as a chain of pairwise blends over normalised inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub nodes: Vec<FilterNode>,
    pub video_out: Pad,
    pub audio_out: Option<Pad>,
}

impl FilterGraph {
    pub fn from_plan(plan: &CrossfadePlan, fps: f64, with_audio: bool) -> Self {
        let tracks: &[Track] = if with_audio {
            &[Track::Video, Track::Audio]
        } else {
            &[Track::Video]
        };

        let mut nodes = Vec::new();
        for &track in tracks {
            for (input, &duration) in plan.durations.iter().enumerate() {
                nodes.push(FilterNode::Normalize {
                    input,
                    track,
                    fps,
                    duration,
                });
            }
        }

        let mut outputs = Vec::with_capacity(tracks.len());
        for &track in tracks {
            let mut running = Pad::Normalized { input: 0, track };
            for (step, t) in plan.transitions.iter().enumerate() {
                let node = FilterNode::Blend {
                    step,
                    track,
                    left: running,
                    right: Pad::Normalized {
                        input: t.right_index,
                        track,
                    },
                    offset: t.offset,
                    duration: t.duration,
                };
                running = node.output();
                nodes.push(node);
            }
            outputs.push(running);
        }

        Self {
            nodes,
            video_out: outputs[0],
            audio_out: outputs.get(1).copied(),
        }
    }

    pub fn render(&self) -> String {
        self.nodes
            .iter()
            .map(FilterNode::render)
            .collect::<Vec<_>>()
            .join(";")
    }
}
