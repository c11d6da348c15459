//! Adaptive bitrate controller
//!
//! Chooses which tier's jitter buffer the playout engine serves from. Loss
//! pushes the tier down quickly; moving back up needs a long stretch of clean
//! playback with buffer headroom. Independently of both, an empty current tier
//! is abandoned at once for any tier that has data.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// ABR thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbrConfig {
    pub min_tier: u8,
    pub max_tier: u8,
    pub initial_tier: u8,
    /// Rolling loss window, in control intervals
    pub loss_window: usize,
    /// Window loss above this triggers a downgrade
    pub downgrade_loss: f32,
    /// Consecutive misses that trigger a downgrade once playing
    pub miss_threshold: u32,
    /// Clean playback needed before an upgrade
    pub upgrade_after_ms: u64,
    /// Window loss must stay below this to count as clean
    pub upgrade_max_loss: f32,
    /// Current tier must be buffered at least this far ahead to upgrade
    pub upgrade_min_depth_ms: u64,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            min_tier: 1,
            max_tier: 3,
            initial_tier: 2,
            loss_window: 50,
            downgrade_loss: 0.10,
            miss_threshold: 10,
            upgrade_after_ms: 15_000,
            upgrade_max_loss: 0.01,
            upgrade_min_depth_ms: 250,
        }
    }
}

impl AbrConfig {
    pub fn upgrade_after(&self) -> Duration {
        Duration::from_millis(self.upgrade_after_ms)
    }

    /// All tiers, lowest first
    pub fn tiers(&self) -> impl Iterator<Item = u8> {
        self.min_tier..=self.max_tier
    }
}

/// What the controller can see of one tier at decision time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierView {
    pub has_data: bool,
    /// Buffered audio ahead of what is currently audible
    pub depth_ms: u64,
}

/// Per-tier views taken just before a decision
pub type TierSnapshot = BTreeMap<u8, TierView>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// Current tier had no data
    Unavailable,
    /// Rolling loss above threshold
    Loss,
    /// Too many consecutive misses
    Misses,
    /// Long clean stretch with headroom
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierSwitch {
    pub from: u8,
    pub to: u8,
    pub reason: SwitchReason,
}

/// Tier selection state machine
pub struct AbrController {
    config: AbrConfig,
    current: u8,
    /// Clean playback accumulated on the current tier
    stable: Duration,
    consecutive_misses: u32,
    /// Recent outcomes, true = miss
    window: VecDeque<bool>,
    window_misses: usize,
    gate_open: bool,
    /// The availability override already moved the tier this interval
    overridden: bool,
    switches: u64,
}

impl AbrController {
    pub fn new(config: AbrConfig) -> Self {
        let current = config.initial_tier.clamp(config.min_tier, config.max_tier);
        Self {
            window: VecDeque::with_capacity(config.loss_window),
            config,
            current,
            stable: Duration::ZERO,
            consecutive_misses: 0,
            window_misses: 0,
            gate_open: false,
            overridden: false,
            switches: 0,
        }
    }

    pub fn current_tier(&self) -> u8 {
        self.current
    }

    pub fn switch_count(&self) -> u64 {
        self.switches
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn stable_for(&self) -> Duration {
        self.stable
    }

    /// Miss ratio over the rolling window
    pub fn window_loss(&self) -> f32 {
        if self.window.is_empty() {
            0.0
        } else {
            self.window_misses as f32 / self.window.len() as f32
        }
    }

    fn window_full(&self) -> bool {
        self.config.loss_window > 0 && self.window.len() >= self.config.loss_window
    }

    /// Leave an empty current tier for the nearest one holding data
    ///
    /// Prefers higher tiers over lower ones. When this fires, hysteresis is
    /// skipped for the rest of the interval.
    pub fn override_for_availability(&mut self, tiers: &TierSnapshot) -> Option<TierSwitch> {
        if has_data(tiers, self.current) {
            return None;
        }

        let higher = (self.current.saturating_add(1)..=self.config.max_tier)
            .find(|&t| has_data(tiers, t));
        let target = higher.or_else(|| {
            (self.config.min_tier..self.current)
                .rev()
                .find(|&t| has_data(tiers, t))
        })?;

        let switch = self.switch_to(target, SwitchReason::Unavailable);
        self.consecutive_misses = 0;
        self.clear_window();
        self.overridden = true;
        Some(switch)
    }

    /// Record the outcome of one control interval
    pub fn observe(&mut self, missed: bool, gate_open: bool, interval: Duration) {
        self.gate_open = gate_open;

        if missed {
            self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        } else {
            self.consecutive_misses = 0;
        }

        if self.config.loss_window > 0 {
            if self.window.len() >= self.config.loss_window {
                if let Some(true) = self.window.pop_front() {
                    self.window_misses -= 1;
                }
            }
            self.window.push_back(missed);
            if missed {
                self.window_misses += 1;
            }
        }

        if self.window_loss() < self.config.upgrade_max_loss {
            self.stable += interval;
        } else {
            self.stable = Duration::ZERO;
        }
    }

    /// Threshold decisions, once per control interval
    pub fn evaluate(&mut self, tiers: &TierSnapshot) -> Option<TierSwitch> {
        if std::mem::take(&mut self.overridden) {
            return None;
        }

        let lossy = self.window_full() && self.window_loss() > self.config.downgrade_loss;
        let starving = self.gate_open && self.consecutive_misses >= self.config.miss_threshold;

        if (lossy || starving) && self.current > self.config.min_tier {
            let lower = self.current - 1;
            if has_data(tiers, lower) {
                let reason = if lossy {
                    SwitchReason::Loss
                } else {
                    SwitchReason::Misses
                };
                let switch = self.switch_to(lower, reason);
                self.consecutive_misses = 0;
                self.clear_window();
                return Some(switch);
            }
            return None;
        }

        let depth = tiers.get(&self.current).map_or(0, |v| v.depth_ms);
        if self.stable >= self.config.upgrade_after()
            && self.window_loss() < self.config.upgrade_max_loss
            && depth > self.config.upgrade_min_depth_ms
            && self.current < self.config.max_tier
        {
            let higher = self.current + 1;
            if has_data(tiers, higher) {
                return Some(self.switch_to(higher, SwitchReason::Stable));
            }
        }

        None
    }

    fn switch_to(&mut self, tier: u8, reason: SwitchReason) -> TierSwitch {
        let switch = TierSwitch {
            from: self.current,
            to: tier,
            reason,
        };
        tracing::info!(
            "ABR tier {} -> {} ({:?}), window loss {:.1}%",
            switch.from,
            switch.to,
            reason,
            self.window_loss() * 100.0
        );
        self.current = tier;
        self.stable = Duration::ZERO;
        self.switches += 1;
        switch
    }

    fn clear_window(&mut self) {
        self.window.clear();
        self.window_misses = 0;
    }
}

fn has_data(tiers: &TierSnapshot, tier: u8) -> bool {
    tiers.get(&tier).is_some_and(|v| v.has_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TICK: Duration = Duration::from_millis(20);

    fn all_full(depth_ms: u64) -> TierSnapshot {
        (1..=3)
            .map(|t| (t, TierView { has_data: true, depth_ms }))
            .collect()
    }

    fn controller(initial: u8) -> AbrController {
        AbrController::new(AbrConfig {
            initial_tier: initial,
            ..Default::default()
        })
    }

    /// One control interval in playout order
    fn step(abr: &mut AbrController, tiers: &TierSnapshot, missed: bool) -> Vec<TierSwitch> {
        let mut out = Vec::new();
        out.extend(abr.override_for_availability(tiers));
        abr.observe(missed, true, TICK);
        out.extend(abr.evaluate(tiers));
        out
    }

    #[test]
    fn test_transient_spike_no_downgrade() {
        let mut abr = controller(3);
        let tiers = all_full(100);

        for i in 0..200 {
            // Four misses in a row once, well under 10% of the window
            let missed = (60..64).contains(&i);
            assert!(step(&mut abr, &tiers, missed).is_empty());
        }
        assert_eq!(abr.current_tier(), 3);
    }

    #[test]
    fn test_sustained_loss_one_downgrade_per_window() {
        let mut abr = controller(3);
        let tiers = all_full(100);
        let mut switches = Vec::new();

        for i in 0..99 {
            switches.extend(step(&mut abr, &tiers, i % 5 == 0));
        }
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].to, 2);
        assert_eq!(switches[0].reason, SwitchReason::Loss);

        switches.extend(step(&mut abr, &tiers, true));
        assert_eq!(switches.len(), 2);
        assert_eq!(abr.current_tier(), 1);

        for i in 0..200 {
            switches.extend(step(&mut abr, &tiers, i % 5 == 0));
        }
        assert_eq!(abr.current_tier(), 1);
    }

    #[test]
    fn test_consecutive_misses_downgrade() {
        let mut abr = controller(2);
        let tiers = all_full(0);
        let mut switches = Vec::new();

        for _ in 0..10 {
            switches.extend(step(&mut abr, &tiers, true));
        }
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].reason, SwitchReason::Misses);
        assert_eq!(abr.current_tier(), 1);
    }

    #[test]
    fn test_no_downgrade_into_empty_tier() {
        let mut abr = controller(2);
        let mut tiers = all_full(0);
        tiers.insert(1, TierView::default());

        for _ in 0..100 {
            assert!(step(&mut abr, &tiers, true).is_empty());
        }
        assert_eq!(abr.current_tier(), 2);
    }

    #[test]
    fn test_upgrade_after_stable_stretch() {
        let mut abr = controller(1);
        let tiers = all_full(400);
        let mut switches = Vec::new();

        // 15 s at 20 ms per interval
        for _ in 0..749 {
            switches.extend(step(&mut abr, &tiers, false));
        }
        assert!(switches.is_empty());

        switches.extend(step(&mut abr, &tiers, false));
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].reason, SwitchReason::Stable);
        assert_eq!(abr.current_tier(), 2);
        assert_eq!(abr.stable_for(), Duration::ZERO);
    }

    #[test]
    fn test_upgrade_needs_headroom_and_data() {
        let mut abr = controller(1);
        let shallow = all_full(100);
        for _ in 0..1000 {
            assert!(step(&mut abr, &shallow, false).is_empty());
        }

        let mut no_higher = all_full(400);
        no_higher.insert(2, TierView::default());
        assert!(step(&mut abr, &no_higher, false).is_empty());
        assert_eq!(abr.current_tier(), 1);
    }

    #[test]
    fn test_override_prefers_higher() {
        let mut abr = controller(2);
        let mut tiers = all_full(0);
        tiers.insert(2, TierView::default());

        let switches = step(&mut abr, &tiers, false);
        assert_eq!(
            switches,
            vec![TierSwitch {
                from: 2,
                to: 3,
                reason: SwitchReason::Unavailable
            }]
        );

        let mut only_low = TierSnapshot::new();
        only_low.insert(1, TierView { has_data: true, depth_ms: 0 });
        let switches = step(&mut abr, &only_low, false);
        assert_eq!(switches[0].to, 1);
    }

    #[test]
    fn test_override_short_circuits_hysteresis() {
        let mut abr = controller(3);
        let tiers = all_full(0);
        for _ in 0..9 {
            step(&mut abr, &tiers, true);
        }

        let mut tier3_empty = all_full(0);
        tier3_empty.insert(3, TierView::default());
        // Tenth miss would trigger a downgrade; the override wins alone
        let switches = step(&mut abr, &tier3_empty, true);
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].reason, SwitchReason::Unavailable);
        assert_eq!(abr.current_tier(), 2);
    }

    proptest! {
        #[test]
        fn never_switches_into_empty_tier(
            steps in proptest::collection::vec(
                (any::<[bool; 3]>(), any::<bool>(), 0u64..600),
                1..400,
            ),
        ) {
            let mut abr = controller(2);
            for (available, missed, depth) in steps {
                let tiers: TierSnapshot = (1..=3u8)
                    .map(|t| (t, TierView { has_data: available[(t - 1) as usize], depth_ms: depth }))
                    .collect();
                for switch in step(&mut abr, &tiers, missed) {
                    prop_assert!(tiers[&switch.to].has_data);
                }
                prop_assert!((1..=3).contains(&abr.current_tier()));
            }
        }
    }
}
