// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Consecutive-failure tracking and automatic deactivation.
///
/// Every instance carries an independent two-state health record: healthy
/// with a counter between 0 and 4, or banned. Banned is terminal within this
/// crate's authority; nothing here ever clears the flag.
use tracing::{debug, warn};

use crate::instance::Instance;

/// Number of consecutive failed checks after which an instance is banned.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Reason recorded when the sweep deactivates an instance.
pub const BAN_REASON: &str = "banned automatically after repeated failed health checks";

/// Records a successful probe, resetting the consecutive-failure counter.
///
/// Ban state is left untouched: a banned instance is never probed, so a
/// success can only be observed on a healthy record.
///
/// # Parameters
///
/// * `instance` - Record whose counter is reset.
pub fn record_success(instance: &mut Instance) {
    if instance.failures > 0 {
        debug!("{} recovered after {} failed checks", instance, instance.failures);
    }
    instance.failures = 0;
}

/// Records a failed probe, banning the instance once the threshold is hit.
///
/// Banning triggers on the check that would push the counter to
/// [`FAILURE_THRESHOLD`], i.e. on the fifth consecutive failure. The counter
/// is left at its last value when the ban is applied; banned instances are
/// excluded from future sweeps, so no further increments are needed.
///
/// # Parameters
///
/// * `instance` - Record whose counter is advanced.
///
/// # Returns
///
/// `true` when this failure newly banned the instance.
pub fn record_failure(instance: &mut Instance) -> bool {
    if instance.failures + 1 >= FAILURE_THRESHOLD {
        instance.banned = true;
        instance.ban_reason = Some(BAN_REASON.to_owned());
        warn!("{} banned after {} consecutive failed checks", instance, FAILURE_THRESHOLD);
        return true;
    }

    instance.failures += 1;
    debug!("{} failed check {}/{}", instance, instance.failures, FAILURE_THRESHOLD);
    false
}

#[cfg(test)]
mod tests {
    use super::{BAN_REASON, FAILURE_THRESHOLD, record_failure, record_success};
    use crate::instance::Instance;

    fn healthy_instance() -> Instance {
        serde_yaml::from_str("host: health.example.org\nmode: mastodon")
            .expect("valid instance")
    }

    #[test]
    fn success_resets_counter_to_zero() {
        let mut instance = healthy_instance();
        instance.failures = 3;

        record_success(&mut instance);

        assert_eq!(instance.failures, 0);
        assert!(!instance.banned);
    }

    #[test]
    fn success_leaves_ban_state_untouched() {
        let mut instance = healthy_instance();
        instance.banned = true;
        instance.ban_reason = Some("manual".to_owned());

        record_success(&mut instance);

        assert!(instance.banned);
        assert_eq!(instance.ban_reason.as_deref(), Some("manual"));
    }

    #[test]
    fn four_failures_increment_without_banning() {
        let mut instance = healthy_instance();

        for expected in 1..FAILURE_THRESHOLD {
            let newly_banned = record_failure(&mut instance);
            assert!(!newly_banned);
            assert_eq!(instance.failures, expected);
            assert!(!instance.banned);
        }
    }

    #[test]
    fn fifth_failure_bans_and_freezes_counter() {
        let mut instance = healthy_instance();
        instance.failures = FAILURE_THRESHOLD - 1;

        let newly_banned = record_failure(&mut instance);

        assert!(newly_banned);
        assert!(instance.banned);
        assert_eq!(instance.ban_reason.as_deref(), Some(BAN_REASON));
        assert_eq!(instance.failures, FAILURE_THRESHOLD - 1);
    }

    #[test]
    fn counter_is_monotonic_between_successes() {
        let mut instance = healthy_instance();

        record_failure(&mut instance);
        record_failure(&mut instance);
        assert_eq!(instance.failures, 2);

        record_success(&mut instance);
        assert_eq!(instance.failures, 0);

        record_failure(&mut instance);
        assert_eq!(instance.failures, 1);
        assert!(!instance.banned);
    }
}
