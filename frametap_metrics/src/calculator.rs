//! Metrics computation over the present stream.

use crate::swap_chain::{
    calculate_animation_time, calculate_cpu_start, calculate_sim_start, SwapChainCoreState,
};
use crate::types::{DisplayIndexing, FrameMetrics, MetricsRecord};
use frametap_common::frame::FrameRecord;
use frametap_common::qpc::QpcConverter;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by the stream driver.
///
/// Per-frame computation itself never fails: malformed input yields zero
/// metrics plus a warning.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculatorError {
    /// A swap-chain accumulated more postponed presents than the
    /// defensive cap allows.
    #[error("pending present queue overflow on swap-chain {swap_chain:#x}")]
    PendingOverflow {
        /// Offending swap-chain address.
        swap_chain: u64,
    },
}

/// Computes the metrics records `frame` yields in this call.
///
/// Without `next_displayed`, a displayed frame's instances `[0, N-1)`
/// are emitted and the last is postponed with the chain untouched; with
/// it, the postponed instance is emitted and the chain advances. Frames
/// that never reached the display take the single-record path and always
/// advance the chain.
pub fn compute_metrics_for_present(
    qpc: &QpcConverter,
    frame: &FrameRecord,
    next_displayed: Option<&FrameRecord>,
    chain: &mut SwapChainCoreState,
) -> Vec<MetricsRecord> {
    let indexing = DisplayIndexing::calculate(frame, next_displayed);
    let count = frame.displayed.len();
    let displayed = frame.is_presented() && count > 0;

    let cpu_start = calculate_cpu_start(chain, frame);
    let sim_start = calculate_sim_start(chain, frame, chain.animation_error_source);
    let ms_between_presents = chain
        .last_present
        .as_ref()
        .map(|last| qpc.delta_unsigned_ms(last.present_start_time, frame.present_start_time))
        .unwrap_or(0.0);

    let base = FrameMetrics {
        time_in_seconds: frame.present_start_time,
        ms_between_presents,
        ms_in_present_api: qpc.duration_ms(frame.time_in_present),
        ms_until_render_complete: qpc
            .delta_unsigned_ms(frame.present_start_time, frame.ready_time),
        ms_until_displayed: 0.0,
        ms_displayed_time: 0.0,
        ms_between_display_change: 0.0,
        ms_flip_delay: None,
        screen_time_qpc: 0,
        cpu_start_qpc: cpu_start,
        ms_animation_time: calculate_animation_time(qpc, chain.first_app_sim_start_time, sim_start),
    };

    if !displayed {
        chain.accumulated_input_to_frame_start_ms += ms_between_presents;
        chain.update_after_present(frame);
        return vec![MetricsRecord {
            frame: *frame,
            metrics: base,
        }];
    }

    if indexing.has_next_displayed {
        // the postponed instance needs the next frame's first screen time
        let usable = next_displayed
            .map(|next| next.is_presented() && !next.displayed.is_empty())
            .unwrap_or(false);
        if !usable {
            tracing::warn!(
                frame_id = frame.frame_id,
                swap_chain = frame.swap_chain_address,
                "next displayed frame carries no displayed instance"
            );
            return Vec::new();
        }
    }

    let mut out = Vec::with_capacity(indexing.end_index - indexing.start_index);

    // Collapsed-present repair runs against the previously emitted
    // instance: the chain's last displayed values, then each instance
    // emitted in this call.
    let mut prior_screen = chain.last_displayed_screen_time;
    let mut prior_flip = chain.last_displayed_flip_delay;
    let mut last_effective = None;

    for index in indexing.start_index..indexing.end_index {
        let instance = frame.displayed[index];
        let (eff_screen, eff_flip) = if prior_flip != 0 && instance.screen_time < prior_screen {
            // a collapsed pair: restore screen-time monotonicity and
            // charge the catch-up to the flip delay
            (
                prior_screen,
                frame.flip_delay + (prior_screen - instance.screen_time),
            )
        } else {
            (instance.screen_time, frame.flip_delay)
        };

        let next_screen = if index + 1 < count {
            frame.displayed[index + 1].screen_time
        } else {
            // last instance: only emitted when next_displayed exists
            next_displayed
                .map(|next| next.displayed[0].screen_time)
                .unwrap_or(eff_screen)
        };

        let mut metrics = base;
        metrics.screen_time_qpc = eff_screen;
        metrics.ms_until_displayed =
            qpc.delta_unsigned_ms(frame.present_start_time, eff_screen);
        metrics.ms_displayed_time = qpc.delta_unsigned_ms(eff_screen, next_screen);
        metrics.ms_between_display_change = if chain.last_displayed_screen_time > 0 {
            qpc.delta_unsigned_ms(chain.last_displayed_screen_time, eff_screen)
        } else {
            0.0
        };
        metrics.ms_flip_delay = Some(if eff_flip > 0 {
            qpc.duration_ms(eff_flip)
        } else {
            0.0
        });

        out.push(MetricsRecord {
            frame: *frame,
            metrics,
        });
        prior_screen = eff_screen;
        prior_flip = eff_flip;
        last_effective = Some((eff_screen, eff_flip));
    }

    if indexing.has_next_displayed {
        chain.update_after_present(frame);
        if let Some((screen, flip)) = last_effective {
            // keep the effective values so a collapse chain stays
            // monotone across frames
            chain.last_displayed_screen_time = screen;
            chain.last_displayed_flip_delay = flip;
        }
    }

    out
}

/// Stream driver: feeds present records through per-swapchain states,
/// handling postponement across frames.
pub struct MetricsCalculator {
    qpc: QpcConverter,
    chains: HashMap<u64, SwapChainCoreState>,
}

impl MetricsCalculator {
    /// Creates a calculator for a session with the given QPC converter.
    pub fn new(qpc: QpcConverter) -> Self {
        Self {
            qpc,
            chains: HashMap::new(),
        }
    }

    /// Processes one present record, in present-start order per
    /// swap-chain, and returns every metrics record it released.
    ///
    /// A displayed frame first resolves any postponed presents of its
    /// swap-chain, then has its own leading instances emitted and its
    /// last instance postponed.
    pub fn process_frame(
        &mut self,
        frame: &FrameRecord,
    ) -> Result<Vec<MetricsRecord>, CalculatorError> {
        let qpc = self.qpc;
        let chain = self
            .chains
            .entry(frame.swap_chain_address)
            .or_default();
        let displayed = frame.is_presented() && !frame.displayed.is_empty();

        let mut out = Vec::new();
        if displayed {
            while let Some(pending) = chain.pending_presents.pop_front() {
                out.extend(compute_metrics_for_present(
                    &qpc,
                    &pending,
                    Some(frame),
                    chain,
                ));
            }
            out.extend(compute_metrics_for_present(&qpc, frame, None, chain));
            if chain.pending_presents.push_back(*frame).is_err() {
                return Err(CalculatorError::PendingOverflow {
                    swap_chain: frame.swap_chain_address,
                });
            }
        } else {
            out.extend(compute_metrics_for_present(&qpc, frame, None, chain));
        }
        Ok(out)
    }

    /// The session QPC converter.
    pub fn qpc(&self) -> &QpcConverter {
        &self.qpc
    }

    /// State of one swap-chain, if it has been seen.
    pub fn swap_chain(&self, address: u64) -> Option<&SwapChainCoreState> {
        self.chains.get(&address)
    }

    /// Number of live swap-chains.
    pub fn swap_chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Drops all per-swapchain state, abandoning postponed presents.
    pub fn clear(&mut self) {
        self.chains.clear();
    }
}
