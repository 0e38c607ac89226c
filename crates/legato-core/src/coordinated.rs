//! Multi-axis synchronisation of single-axis profiles.

use crate::profile::MotionProfile;

/// Restarts of [`synchronize_profiles`] before it settles for the last
/// maximum.
const MAX_RESTARTS: usize = 80;

/// Duration difference still counted as synchronised.
const TIME_TOLERANCE: f64 = 1e-6;

/// Solve all profiles and stretch them to the duration of the slowest one.
///
/// Re-solving with a minimum time may turn out slower than the current
/// maximum (solutions near entry/exit velocities), in which case the process
/// restarts with the new maximum. Returns whether all profiles ended up with
/// one duration.
pub fn synchronize_profiles(profiles: &mut [MotionProfile]) -> bool {
    synchronize_within(profiles, MAX_RESTARTS)
}

fn synchronize_within(profiles: &mut [MotionProfile], max_restarts: usize) -> bool {
    let mut max_time = 0.0_f64;
    for profile in profiles.iter_mut() {
        profile.ensure_solved();
        max_time = max_time.max(profile.time());
    }
    let mut restarts = 0;
    'restart: loop {
        for profile in profiles.iter_mut() {
            profile.set_time_min(max_time);
            if profile.time() != max_time {
                profile.solve();
                if profile.time() > max_time + TIME_TOLERANCE {
                    if restarts == max_restarts {
                        tracing::warn!(
                            max_time,
                            time = profile.time(),
                            restarts,
                            "synchronization did not settle"
                        );
                        break 'restart;
                    }
                    tracing::debug!(
                        max_time,
                        time = profile.time(),
                        "synchronization breached, restarting"
                    );
                    restarts += 1;
                    max_time = profile.time();
                    continue 'restart;
                }
            }
        }
        break;
    }
    is_synchronized(profiles)
}

/// Index of the profile with the largest displacement.
pub fn lead_profile(profiles: &[MotionProfile]) -> Option<usize> {
    profiles
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, profile)| {
            let distance = profile.displacement().abs();
            match best {
                Some((_, best_distance)) if best_distance >= distance => best,
                _ => Some((i, distance)),
            }
        })
        .map(|(i, _)| i)
}

/// Solve the lead profile and make the others follow it at a constant
/// ratio, so velocity, acceleration and jerk stay proportional throughout.
pub fn coordinate_profiles(profiles: &mut [MotionProfile]) {
    if let Some(lead) = lead_profile(profiles) {
        profiles[lead].ensure_solved();
        coordinate_profiles_to_lead(profiles, lead);
    }
}

pub fn coordinate_profiles_to_lead(profiles: &mut [MotionProfile], lead: usize) {
    let lead_profile = profiles[lead].clone();
    let lead_distance = lead_profile.displacement();
    for (i, profile) in profiles.iter_mut().enumerate() {
        if i == lead {
            continue;
        }
        let factor = if lead_distance == 0.0 {
            0.0
        } else {
            profile.displacement() / lead_distance
        };
        profile.follow(&lead_profile, factor);
    }
}

/// True if all profiles share one duration.
pub fn is_synchronized(profiles: &[MotionProfile]) -> bool {
    profiles
        .windows(2)
        .all(|pair| (pair[0].time() - pair[1].time()).abs() <= TIME_TOLERANCE)
}
