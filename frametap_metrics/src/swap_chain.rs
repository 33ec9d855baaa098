//! Per-swapchain bookkeeping.

use frametap_common::consts::MAX_PENDING_PRESENTS;
use frametap_common::frame::FrameRecord;
use frametap_common::qpc::QpcConverter;
use heapless::Deque;

/// Where the animation timeline's simulation-start timestamps come from.
///
/// A chain starts on `CpuStart` and transitions at most once, to the
/// richest source the application provides; the choice is then sticky
/// for the life of the swap-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationErrorSource {
    /// Derived from the previous present's CPU completion.
    #[default]
    CpuStart,
    /// Instrumented simulation start provided by the application.
    AppProvider,
    /// Simulation start provided by the PC-latency instrumentation.
    PCLatency,
}

/// State carried across presents of one swap-chain.
#[derive(Debug)]
pub struct SwapChainCoreState {
    /// Most recently chained present.
    pub last_present: Option<FrameRecord>,
    /// Most recent present whose last displayed instance was an
    /// application frame (or that was not displayed at all).
    pub last_app_present: Option<FrameRecord>,
    /// Screen time of the last displayed instance; 0 if never displayed.
    pub last_displayed_screen_time: u64,
    /// Flip delay of the frame owning that instance.
    pub last_displayed_flip_delay: u64,
    /// Screen time of the last displayed application instance.
    pub last_displayed_app_screen_time: u64,
    /// Simulation start of the most recently chained present.
    pub last_sim_start_time: u64,
    /// Simulation start of the last displayed present.
    pub last_displayed_sim_start_time: u64,
    /// First simulation start once the animation source resolves; the
    /// animation timeline's origin.
    pub first_app_sim_start_time: u64,
    /// Presents whose last displayed instance awaits the next displayed
    /// frame.
    pub pending_presents: Deque<FrameRecord, MAX_PENDING_PRESENTS>,
    /// Active simulation-start source.
    pub animation_error_source: AnimationErrorSource,
    /// Input-to-frame-start milliseconds accumulated over dropped
    /// frames, cleared when a frame reaches the display.
    pub accumulated_input_to_frame_start_ms: f64,
    /// Latest input timestamp seen on a dropped frame.
    pub last_received_not_displayed_all_input_time: u64,
    /// Latest mouse click timestamp seen on a dropped frame.
    pub last_received_not_displayed_mouse_click_time: u64,
    /// Latest app-provider input timestamp seen on a dropped frame.
    pub last_received_not_displayed_app_provider_input_time: u64,
}

impl Default for SwapChainCoreState {
    fn default() -> Self {
        Self {
            last_present: None,
            last_app_present: None,
            last_displayed_screen_time: 0,
            last_displayed_flip_delay: 0,
            last_displayed_app_screen_time: 0,
            last_sim_start_time: 0,
            last_displayed_sim_start_time: 0,
            first_app_sim_start_time: 0,
            pending_presents: Deque::new(),
            animation_error_source: AnimationErrorSource::CpuStart,
            accumulated_input_to_frame_start_ms: 0.0,
            last_received_not_displayed_all_input_time: 0,
            last_received_not_displayed_mouse_click_time: 0,
            last_received_not_displayed_app_provider_input_time: 0,
        }
    }
}

/// Earliest QPC timestamp at which the CPU could have started this
/// frame: the end of the previous application present call, preferring
/// frame-generation-propagated times when present.
pub fn calculate_cpu_start(chain: &SwapChainCoreState, _current: &FrameRecord) -> u64 {
    if let Some(app) = &chain.last_app_present {
        if app.app_propagated_present_start_time != 0 {
            app.app_propagated_present_start_time + app.app_propagated_time_in_present
        } else {
            app.present_start_time + app.time_in_present
        }
    } else if let Some(last) = &chain.last_present {
        last.present_start_time + last.time_in_present
    } else {
        0
    }
}

/// Simulation-start timestamp of `current` under the given source.
///
/// Sources with missing instrumentation fall back to the CPU-start
/// derivation.
pub fn calculate_sim_start(
    chain: &SwapChainCoreState,
    current: &FrameRecord,
    source: AnimationErrorSource,
) -> u64 {
    match source {
        AnimationErrorSource::CpuStart => calculate_cpu_start(chain, current),
        AnimationErrorSource::AppProvider => {
            if current.app_sim_start_time != 0 {
                current.app_sim_start_time
            } else {
                calculate_cpu_start(chain, current)
            }
        }
        AnimationErrorSource::PCLatency => {
            if current.pcl_sim_start_time != 0 {
                current.pcl_sim_start_time
            } else {
                calculate_cpu_start(chain, current)
            }
        }
    }
}

/// Milliseconds of animation time since the chain's first simulation
/// start; 0 until the origin is set, negative when timestamps regress.
pub fn calculate_animation_time(qpc: &QpcConverter, first_sim_start: u64, sim_start: u64) -> f64 {
    if first_sim_start == 0 {
        return 0.0;
    }
    qpc.delta_signed_ms(first_sim_start, sim_start)
}

impl SwapChainCoreState {
    /// Advances the chain after metrics were emitted for `frame`.
    ///
    /// Callers that applied a collapsed-present adjustment overwrite
    /// `last_displayed_screen_time` / `last_displayed_flip_delay` with
    /// the effective values afterwards, keeping the chain monotone.
    pub fn update_after_present(&mut self, frame: &FrameRecord) {
        let count = frame.displayed.len();
        let displayed = frame.is_presented() && count > 0;

        // The source can only upgrade while a displayed instance lands.
        if displayed && self.animation_error_source == AnimationErrorSource::CpuStart {
            if frame.app_sim_start_time != 0 {
                self.animation_error_source = AnimationErrorSource::AppProvider;
            } else if frame.pcl_sim_start_time != 0 {
                self.animation_error_source = AnimationErrorSource::PCLatency;
            }
        }

        // Derived from the chain state preceding this frame.
        let sim_start = calculate_sim_start(self, frame, self.animation_error_source);
        self.last_sim_start_time = sim_start;
        if displayed {
            self.last_displayed_sim_start_time = sim_start;
            if self.animation_error_source != AnimationErrorSource::CpuStart
                && self.first_app_sim_start_time == 0
            {
                self.first_app_sim_start_time = sim_start;
            }
        }

        if displayed {
            let last_instance = frame.displayed[count - 1];
            self.last_displayed_screen_time = last_instance.screen_time;
            self.last_displayed_flip_delay = frame.flip_delay;
            if last_instance.is_application() {
                self.last_app_present = Some(*frame);
                self.last_displayed_app_screen_time = last_instance.screen_time;
            }
            // a frame reached the display: dropped-input bookkeeping is
            // consumed
            self.accumulated_input_to_frame_start_ms = 0.0;
            self.last_received_not_displayed_all_input_time = 0;
            self.last_received_not_displayed_mouse_click_time = 0;
            self.last_received_not_displayed_app_provider_input_time = 0;
        } else {
            self.last_displayed_screen_time = 0;
            self.last_displayed_flip_delay = 0;
            self.last_app_present = Some(*frame);
            if frame.input_time != 0 {
                self.last_received_not_displayed_all_input_time = frame.input_time;
            }
            if frame.mouse_click_time != 0 {
                self.last_received_not_displayed_mouse_click_time = frame.mouse_click_time;
            }
            if frame.app_input_sample.time != 0 {
                self.last_received_not_displayed_app_provider_input_time =
                    frame.app_input_sample.time;
            }
        }

        self.last_present = Some(*frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frametap_common::frame::{DisplayedInstance, FrameType, PresentResult};

    fn make_frame(
        final_state: PresentResult,
        present_start: u64,
        time_in_present: u64,
        displayed: &[(FrameType, u64)],
        app_sim: u64,
        pcl_sim: u64,
        flip_delay: u64,
    ) -> FrameRecord {
        let mut frame = FrameRecord::default();
        frame.present_start_time = present_start;
        frame.time_in_present = time_in_present;
        frame.app_sim_start_time = app_sim;
        frame.pcl_sim_start_time = pcl_sim;
        frame.flip_delay = flip_delay;
        frame.set_final_state(final_state);
        for &(ty, screen) in displayed {
            frame
                .displayed
                .push(DisplayedInstance::new(ty, screen))
                .unwrap();
        }
        frame
    }

    #[test]
    fn test_default_state() {
        let chain = SwapChainCoreState::default();
        assert!(chain.last_present.is_none());
        assert!(chain.last_app_present.is_none());
        assert_eq!(chain.last_displayed_screen_time, 0);
        assert_eq!(chain.first_app_sim_start_time, 0);
        assert_eq!(chain.animation_error_source, AnimationErrorSource::CpuStart);
        assert_eq!(chain.accumulated_input_to_frame_start_ms, 0.0);
    }

    #[test]
    fn test_cpu_start_prefers_propagated_times() {
        let mut chain = SwapChainCoreState::default();
        let mut last_app = FrameRecord::default();
        last_app.app_propagated_present_start_time = 1_000;
        last_app.app_propagated_time_in_present = 50;
        chain.last_app_present = Some(last_app);

        let current = FrameRecord::default();
        assert_eq!(calculate_cpu_start(&chain, &current), 1_050);
    }

    #[test]
    fn test_cpu_start_falls_back_to_plain_present() {
        let mut chain = SwapChainCoreState::default();
        let mut last_app = FrameRecord::default();
        last_app.present_start_time = 1_000;
        last_app.time_in_present = 50;
        chain.last_app_present = Some(last_app);
        assert_eq!(calculate_cpu_start(&chain, &FrameRecord::default()), 1_050);
    }

    #[test]
    fn test_cpu_start_uses_last_present_without_app_history() {
        let mut chain = SwapChainCoreState::default();
        let mut last = FrameRecord::default();
        last.present_start_time = 1_000;
        last.time_in_present = 50;
        chain.last_present = Some(last);
        assert_eq!(calculate_cpu_start(&chain, &FrameRecord::default()), 1_050);
    }

    #[test]
    fn test_cpu_start_zero_without_history() {
        let chain = SwapChainCoreState::default();
        assert_eq!(calculate_cpu_start(&chain, &FrameRecord::default()), 0);
    }

    #[test]
    fn test_sim_start_source_selection_and_fallback() {
        let mut chain = SwapChainCoreState::default();
        let mut last_app = FrameRecord::default();
        last_app.present_start_time = 1_000;
        last_app.time_in_present = 50;
        chain.last_app_present = Some(last_app);

        let mut current = FrameRecord::default();
        current.app_sim_start_time = 5_000;
        current.pcl_sim_start_time = 6_000;

        assert_eq!(
            calculate_sim_start(&chain, &current, AnimationErrorSource::CpuStart),
            1_050
        );
        assert_eq!(
            calculate_sim_start(&chain, &current, AnimationErrorSource::AppProvider),
            5_000
        );
        assert_eq!(
            calculate_sim_start(&chain, &current, AnimationErrorSource::PCLatency),
            6_000
        );

        current.app_sim_start_time = 0;
        current.pcl_sim_start_time = 0;
        assert_eq!(
            calculate_sim_start(&chain, &current, AnimationErrorSource::AppProvider),
            1_050
        );
        assert_eq!(
            calculate_sim_start(&chain, &current, AnimationErrorSource::PCLatency),
            1_050
        );
    }

    #[test]
    fn test_animation_time() {
        let qpc = QpcConverter::new(10_000_000, 0);
        assert!((calculate_animation_time(&qpc, 1_000, 1_500) - 0.05).abs() < 1e-3);
        assert_eq!(calculate_animation_time(&qpc, 0, 1_500), 0.0);
        assert_eq!(calculate_animation_time(&qpc, 1_000, 1_000), 0.0);
        // five seconds of ticks
        let far = 1_000 + 10_000_000 * 5;
        assert!((calculate_animation_time(&qpc, 1_000, far) - 5_000.0).abs() < 0.1);
        // regression yields a non-positive value
        assert!(calculate_animation_time(&qpc, 2_000, 1_000) <= 0.0);
    }

    #[test]
    fn test_update_app_provider_sets_sim_and_origin() {
        let mut chain = SwapChainCoreState {
            animation_error_source: AnimationErrorSource::AppProvider,
            ..Default::default()
        };
        let frame = make_frame(
            PresentResult::Presented,
            1_000,
            50,
            &[(FrameType::Application, 1_500)],
            10_000,
            0,
            0,
        );
        chain.update_after_present(&frame);
        assert_eq!(chain.last_displayed_sim_start_time, 10_000);
        assert_eq!(chain.first_app_sim_start_time, 10_000);
        assert_eq!(chain.last_displayed_app_screen_time, 1_500);
    }

    #[test]
    fn test_update_pclatency_sets_sim_and_origin() {
        let mut chain = SwapChainCoreState {
            animation_error_source: AnimationErrorSource::PCLatency,
            ..Default::default()
        };
        let frame = make_frame(
            PresentResult::Presented,
            2_000,
            40,
            &[(FrameType::Application, 2_700)],
            0,
            12_345,
            0,
        );
        chain.update_after_present(&frame);
        assert_eq!(chain.last_displayed_sim_start_time, 12_345);
        assert_eq!(chain.first_app_sim_start_time, 12_345);
        assert_eq!(chain.last_displayed_app_screen_time, 2_700);
    }

    #[test]
    fn test_update_cpu_start_fallback_uses_previous_app_present() {
        let mut chain = SwapChainCoreState::default();
        let previous_app = make_frame(
            PresentResult::Presented,
            5_000,
            80,
            &[(FrameType::Application, 5_800)],
            0,
            0,
            0,
        );
        chain.last_app_present = Some(previous_app);

        let frame = make_frame(
            PresentResult::Presented,
            6_000,
            60,
            &[(FrameType::Application, 6_700)],
            0,
            0,
            0,
        );
        chain.update_after_present(&frame);
        assert_eq!(chain.last_displayed_sim_start_time, 5_080);
        assert_eq!(chain.first_app_sim_start_time, 0);
        assert_eq!(chain.last_displayed_app_screen_time, 6_700);
    }

    #[test]
    fn test_update_transitions_to_app_provider() {
        let mut chain = SwapChainCoreState::default();
        let frame = make_frame(
            PresentResult::Presented,
            7_000,
            70,
            &[(FrameType::Application, 7_900)],
            20_000,
            0,
            0,
        );
        chain.update_after_present(&frame);
        assert_eq!(
            chain.animation_error_source,
            AnimationErrorSource::AppProvider
        );
        assert_eq!(chain.last_displayed_sim_start_time, 20_000);
        assert_eq!(chain.first_app_sim_start_time, 20_000);
    }

    #[test]
    fn test_update_transitions_to_pclatency() {
        let mut chain = SwapChainCoreState::default();
        let frame = make_frame(
            PresentResult::Presented,
            8_000,
            80,
            &[(FrameType::Application, 8_950)],
            0,
            30_000,
            0,
        );
        chain.update_after_present(&frame);
        assert_eq!(
            chain.animation_error_source,
            AnimationErrorSource::PCLatency
        );
        assert_eq!(chain.last_displayed_sim_start_time, 30_000);
        assert_eq!(chain.first_app_sim_start_time, 30_000);
    }

    #[test]
    fn test_update_displayed_sets_screen_time_and_flip_delay() {
        let mut chain = SwapChainCoreState::default();
        let frame = make_frame(
            PresentResult::Presented,
            10_000,
            50,
            &[
                (FrameType::Application, 10_800),
                (FrameType::Repeated, 11_000),
            ],
            0,
            0,
            1_234,
        );
        chain.update_after_present(&frame);
        assert_eq!(chain.last_displayed_screen_time, 11_000);
        assert_eq!(chain.last_displayed_flip_delay, 1_234);
        // last instance is Repeated: app present tracking unchanged
        assert!(chain.last_app_present.is_none());
    }

    #[test]
    fn test_update_presented_without_displays_zeroes_tracking() {
        let mut chain = SwapChainCoreState::default();
        let seed = make_frame(
            PresentResult::Presented,
            1_000,
            30,
            &[(FrameType::Application, 1_500)],
            0,
            0,
            0,
        );
        chain.update_after_present(&seed);
        assert_eq!(chain.last_displayed_screen_time, 1_500);

        let frame = make_frame(PresentResult::Presented, 12_000, 40, &[], 0, 0, 9_999);
        chain.update_after_present(&frame);
        assert_eq!(chain.last_displayed_screen_time, 0);
        assert_eq!(chain.last_displayed_flip_delay, 0);
        assert!(chain.last_app_present.is_some());
    }

    #[test]
    fn test_update_dropped_frame_tracks_input_times() {
        let mut chain = SwapChainCoreState::default();
        let mut frame = make_frame(PresentResult::Discarded, 2_000, 25, &[], 0, 0, 0);
        frame.input_time = 111;
        frame.mouse_click_time = 222;
        frame.app_input_sample.time = 333;
        chain.update_after_present(&frame);
        assert_eq!(chain.last_received_not_displayed_all_input_time, 111);
        assert_eq!(chain.last_received_not_displayed_mouse_click_time, 222);
        assert_eq!(chain.last_received_not_displayed_app_provider_input_time, 333);

        // a displayed frame consumes the bookkeeping
        let shown = make_frame(
            PresentResult::Presented,
            3_000,
            30,
            &[(FrameType::Application, 3_600)],
            0,
            0,
            0,
        );
        chain.update_after_present(&shown);
        assert_eq!(chain.last_received_not_displayed_all_input_time, 0);
        assert_eq!(chain.last_received_not_displayed_mouse_click_time, 0);
        assert_eq!(chain.last_received_not_displayed_app_provider_input_time, 0);
    }
}
