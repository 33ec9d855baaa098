//! Metrics records and display-instance indexing.

use frametap_common::frame::FrameRecord;

/// Metrics for one displayed frame instance (or one dropped frame).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetrics {
    /// Present-start QPC timestamp of the frame.
    pub time_in_seconds: u64,
    /// Milliseconds since the previous present's start.
    pub ms_between_presents: f64,
    /// Milliseconds spent inside the present API call.
    pub ms_in_present_api: f64,
    /// Milliseconds from present start until GPU work completed.
    pub ms_until_render_complete: f64,
    /// Milliseconds from present start until the instance hit the
    /// display; 0 when not displayed.
    pub ms_until_displayed: f64,
    /// Milliseconds this instance stayed on screen; 0 when not displayed.
    pub ms_displayed_time: f64,
    /// Milliseconds since the previously displayed instance changed the
    /// screen; 0 for the first displayed instance.
    pub ms_between_display_change: f64,
    /// Milliseconds the flip was pacing-delayed; present only for
    /// displayed instances.
    pub ms_flip_delay: Option<f64>,
    /// Effective screen time of the instance; 0 when not displayed.
    pub screen_time_qpc: u64,
    /// QPC timestamp at which the CPU could start working on this frame.
    pub cpu_start_qpc: u64,
    /// Milliseconds of animation time relative to the first resolved
    /// simulation start; 0 until the animation source resolves.
    pub ms_animation_time: f64,
}

/// One emitted `(frame, metrics)` pair.
#[derive(Debug, Clone, Copy)]
pub struct MetricsRecord {
    /// The frame the displayed instance belongs to.
    pub frame: FrameRecord,
    /// Metrics of the instance.
    pub metrics: FrameMetrics,
}

/// Which displayed instances of a frame are processed by one call.
///
/// Without a next displayed frame, instances `[0, N-1)` are processed
/// and the last is postponed; with one, only the postponed `[N-1, N)`
/// instance is processed and the chain advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayIndexing {
    /// First processed instance index.
    pub start_index: usize,
    /// One past the last processed instance index.
    pub end_index: usize,
    /// Index of the relevant `Application` instance, `usize::MAX` when
    /// none is in scope.
    pub app_index: usize,
    /// True when a next displayed frame resolves the postponed instance.
    pub has_next_displayed: bool,
}

impl DisplayIndexing {
    /// Computes the processing range for `frame`.
    pub fn calculate(frame: &FrameRecord, next_displayed: Option<&FrameRecord>) -> Self {
        let count = frame.displayed.len();
        let displayed = frame.is_presented() && count > 0;

        if !displayed {
            return Self {
                start_index: 0,
                end_index: 0,
                app_index: 0,
                has_next_displayed: false,
            };
        }

        let find_app = |range: std::ops::Range<usize>| {
            frame.displayed.as_slice()[range.clone()]
                .iter()
                .position(|d| d.is_application())
                .map(|i| range.start + i)
                .unwrap_or(usize::MAX)
        };

        match next_displayed {
            None => Self {
                start_index: 0,
                end_index: count - 1,
                app_index: find_app(0..count),
                has_next_displayed: false,
            },
            Some(_) => Self {
                start_index: count - 1,
                end_index: count,
                app_index: find_app(count - 1..count),
                has_next_displayed: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frametap_common::frame::{DisplayedInstance, FrameType, PresentResult};

    fn frame_with(displayed: &[(FrameType, u64)], presented: bool) -> FrameRecord {
        let mut frame = FrameRecord::default();
        for &(ty, screen) in displayed {
            frame.displayed.push(DisplayedInstance::new(ty, screen)).unwrap();
        }
        if presented {
            frame.set_final_state(PresentResult::Presented);
        }
        frame
    }

    #[test]
    fn test_no_displays_empty_range() {
        let frame = frame_with(&[], true);
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!((idx.start_index, idx.end_index), (0, 0));
        assert_eq!(idx.app_index, 0);
        assert!(!idx.has_next_displayed);
    }

    #[test]
    fn test_single_display_no_next_is_postponed() {
        let frame = frame_with(&[(FrameType::Application, 1_000)], true);
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!((idx.start_index, idx.end_index), (0, 0));
        assert_eq!(idx.app_index, 0);
        assert!(!idx.has_next_displayed);
    }

    #[test]
    fn test_multiple_displays_no_next_excludes_last() {
        let frame = frame_with(
            &[
                (FrameType::Application, 1_000),
                (FrameType::Repeated, 2_000),
                (FrameType::Repeated, 3_000),
            ],
            true,
        );
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!((idx.start_index, idx.end_index), (0, 2));
        assert_eq!(idx.app_index, 0);
    }

    #[test]
    fn test_with_next_processes_postponed_only() {
        let frame = frame_with(
            &[
                (FrameType::Application, 1_000),
                (FrameType::Repeated, 2_000),
                (FrameType::Repeated, 3_000),
            ],
            true,
        );
        let next = frame_with(&[(FrameType::Application, 4_000)], true);
        let idx = DisplayIndexing::calculate(&frame, Some(&next));
        assert_eq!((idx.start_index, idx.end_index), (2, 3));
        // the postponed instance is Repeated, so no app index in scope
        assert_eq!(idx.app_index, usize::MAX);
        assert!(idx.has_next_displayed);
    }

    #[test]
    fn test_not_presented_with_displays_is_empty_range() {
        let frame = frame_with(
            &[
                (FrameType::Application, 1_000),
                (FrameType::Repeated, 2_000),
            ],
            false,
        );
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!((idx.start_index, idx.end_index), (0, 0));
        assert_eq!(idx.app_index, 0);
    }

    #[test]
    fn test_app_index_found_mid_vector() {
        let frame = frame_with(
            &[
                (FrameType::Repeated, 1_000),
                (FrameType::Application, 2_000),
                (FrameType::Repeated, 3_000),
            ],
            true,
        );
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!(idx.app_index, 1);
    }

    #[test]
    fn test_all_repeated_has_no_app_index() {
        let frame = frame_with(
            &[
                (FrameType::Repeated, 1_000),
                (FrameType::Repeated, 2_000),
                (FrameType::Repeated, 3_000),
            ],
            true,
        );
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!(idx.app_index, usize::MAX);
    }

    #[test]
    fn test_first_of_multiple_app_frames_wins() {
        let frame = frame_with(
            &[
                (FrameType::Application, 1_000),
                (FrameType::Application, 2_000),
                (FrameType::Repeated, 3_000),
            ],
            true,
        );
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!(idx.app_index, 0);
    }

    #[test]
    fn test_generated_frames_before_app_instance() {
        // generated frames lead, the app frame lands last and postponed
        let frame = frame_with(
            &[
                (FrameType::IntelXefg, 11_000),
                (FrameType::IntelXefg, 11_500),
                (FrameType::IntelXefg, 12_000),
                (FrameType::Application, 12_500),
            ],
            true,
        );
        let idx = DisplayIndexing::calculate(&frame, None);
        assert_eq!((idx.start_index, idx.end_index), (0, 3));
        assert_eq!(idx.app_index, 3);

        let next = frame_with(&[(FrameType::Application, 14_000)], true);
        let idx = DisplayIndexing::calculate(&frame, Some(&next));
        assert_eq!((idx.start_index, idx.end_index), (3, 4));
        assert_eq!(idx.app_index, 3);
        assert!(idx.has_next_displayed);
    }
}
