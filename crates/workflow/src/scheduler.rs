//! The schedule table.
//!
//! [`Scheduler`] is plain state with no timers of its own: the service
//! calls [`Scheduler::tick`] with the current time and dispatches whatever
//! comes back. Each avatar has exactly one entry, and an entry whose
//! previous run has not completed is skipped rather than queued.

use crate::cron::CronExpr;
use aicrew_core::avatar::{ActiveWindow, AvatarId, AvatarProfile, CycleReport, MAX_SCHEDULE_SECS, ScheduleSpec, is_active};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("avatar '{0}' is already scheduled")]
    Duplicate(AvatarId),

    #[error("interval must be at least one second")]
    ZeroInterval,

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("cron expression '{0}' never fires")]
    NeverFires(String),

    #[error("{what} of {secs}s exceeds the {max}s limit")]
    OutOfRange { what: &'static str, secs: u64, max: u64 },
}

/// How an entry recurs.
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval { period: Duration, jitter: Duration },
    Cron(CronExpr),
}

impl Trigger {
    pub fn from_spec(spec: &ScheduleSpec) -> Result<Self, ScheduleError> {
        match spec {
            ScheduleSpec::Interval {
                every_secs,
                jitter_secs,
            } => {
                if *every_secs == 0 {
                    return Err(ScheduleError::ZeroInterval);
                }
                Ok(Trigger::Interval {
                    period: bounded_secs("interval", *every_secs)?,
                    jitter: bounded_secs("jitter", *jitter_secs)?,
                })
            }
            ScheduleSpec::Cron { expression } => CronExpr::parse(expression)
                .map(Trigger::Cron)
                .map_err(|reason| ScheduleError::InvalidCron {
                    expression: expression.clone(),
                    reason,
                }),
        }
    }
}

fn bounded_secs(what: &'static str, secs: u64) -> Result<Duration, ScheduleError> {
    let out_of_range = || ScheduleError::OutOfRange { what, secs, max: MAX_SCHEDULE_SECS };
    if secs > MAX_SCHEDULE_SECS {
        return Err(out_of_range());
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(out_of_range)
}

/// One avatar's recurring trigger and its bookkeeping.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub avatar: AvatarId,
    pub trigger: Trigger,
    pub next_fire: DateTime<Utc>,
    /// Un-jittered fire time for interval triggers
    anchor: DateTime<Utc>,
    pub enabled: bool,
    pub in_flight: bool,
    pub active_windows: Vec<ActiveWindow>,
    pub runs: u64,
    /// Fires dropped because the previous run was still in flight
    pub skips: u64,
    /// Fires dropped because the avatar was outside its activity windows
    pub inactive_skips: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
}

impl ScheduleEntry {
    /// Move `next_fire` to the first slot strictly after `now`.
    ///
    /// Missed slots are dropped, not backfilled.
    fn advance(&mut self, now: DateTime<Utc>) -> bool {
        match &self.trigger {
            Trigger::Interval { period, jitter } => {
                if self.anchor <= now {
                    let behind = (now - self.anchor).num_milliseconds();
                    let periods = behind / period.num_milliseconds().max(1) + 1;
                    self.anchor += *period * periods as i32;
                }
                self.next_fire = self.anchor + sample_jitter(*jitter);
                true
            }
            Trigger::Cron(expr) => match expr.next_after(now) {
                Some(next) => {
                    self.next_fire = next;
                    true
                }
                None => false,
            },
        }
    }
}

fn sample_jitter(jitter: Duration) -> Duration {
    let max = jitter.num_seconds();
    if max <= 0 {
        return Duration::zero();
    }
    Duration::seconds(rand::rng().random_range(0..=max))
}

/// Which avatars a manual trigger addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerTarget {
    All,
    Avatar(AvatarId),
}

/// What a manual trigger did for one avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Triggered,
    SkippedInFlight,
    Inactive,
    Disabled,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub avatar: AvatarId,
    pub status: TriggerStatus,
}

/// Read-only view of an entry for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSnapshot {
    pub avatar: AvatarId,
    pub schedule: String,
    pub next_fire: DateTime<Utc>,
    pub enabled: bool,
    pub in_flight: bool,
    pub runs: u64,
    pub skips: u64,
    pub inactive_skips: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
}

/// Per-avatar schedule entries, keyed and iterated in id order.
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: BTreeMap<AvatarId, ScheduleEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from loaded profiles; profiles with a bad schedule are
    /// left out and logged.
    pub fn from_profiles<'a>(profiles: impl IntoIterator<Item = &'a AvatarProfile>, now: DateTime<Utc>) -> Self {
        let mut scheduler = Self::new();
        for profile in profiles {
            if let Err(e) = scheduler.register(
                &profile.id,
                &profile.schedule,
                profile.active_windows.clone(),
                now,
            ) {
                error!(avatar = %profile.id, error = %e, "Avatar not scheduled");
            }
        }
        scheduler
    }

    /// Add an avatar. The first fire is one period (plus jitter) after `now`
    /// for intervals, or the next matching minute for cron.
    pub fn register(
        &mut self,
        avatar: &str,
        spec: &ScheduleSpec,
        active_windows: Vec<ActiveWindow>,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        if self.entries.contains_key(avatar) {
            return Err(ScheduleError::Duplicate(avatar.into()));
        }
        let trigger = Trigger::from_spec(spec)?;
        let mut entry = ScheduleEntry {
            avatar: avatar.into(),
            trigger,
            next_fire: now,
            anchor: now,
            enabled: true,
            in_flight: false,
            active_windows,
            runs: 0,
            skips: 0,
            inactive_skips: 0,
            last_run: None,
            last_report: None,
        };
        if !entry.advance(now)
            && let ScheduleSpec::Cron { expression } = spec
        {
            return Err(ScheduleError::NeverFires(expression.clone()));
        }
        info!(avatar, next_fire = %entry.next_fire, "Avatar scheduled");
        self.entries.insert(avatar.into(), entry);
        Ok(())
    }

    pub fn unregister(&mut self, avatar: &str) -> bool {
        self.entries.remove(avatar).is_some()
    }

    /// Pause or resume an entry. Returns `false` for an unknown avatar.
    pub fn set_enabled(&mut self, avatar: &str, enabled: bool) -> bool {
        match self.entries.get_mut(avatar) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Fire every due entry and move its next-fire time forward.
    ///
    /// Returns the avatars that should run now; each is marked in flight
    /// until [`Scheduler::complete`] is called for it.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<AvatarId> {
        let mut due = Vec::new();

        for entry in self.entries.values_mut() {
            if !entry.enabled || entry.next_fire > now {
                continue;
            }
            if !entry.advance(now) {
                warn!(avatar = %entry.avatar, "Cron schedule has no future fire time, disabling");
                entry.enabled = false;
            }

            if !is_active(&entry.active_windows, now) {
                entry.inactive_skips += 1;
                info!(avatar = %entry.avatar, "Avatar not active, skipping");
                continue;
            }
            if entry.in_flight {
                entry.skips += 1;
                warn!(avatar = %entry.avatar, skips = entry.skips, "Previous run still in flight, skipping");
                continue;
            }

            entry.in_flight = true;
            entry.runs += 1;
            entry.last_run = Some(now);
            debug!(avatar = %entry.avatar, next_fire = %entry.next_fire, "Schedule fired");
            due.push(entry.avatar.clone());
        }

        due
    }

    /// Force a run outside the schedule. The regular next-fire time is left
    /// alone; an avatar already running is reported, not queued.
    pub fn trigger_now(&mut self, target: &TriggerTarget, now: DateTime<Utc>) -> Vec<TriggerOutcome> {
        let ids: Vec<AvatarId> = match target {
            TriggerTarget::All => self.entries.keys().cloned().collect(),
            TriggerTarget::Avatar(id) => vec![id.clone()],
        };

        ids.into_iter()
            .map(|avatar| {
                let status = match self.entries.get_mut(&avatar) {
                    None => TriggerStatus::Unknown,
                    Some(entry) if !entry.enabled => TriggerStatus::Disabled,
                    Some(entry) if !is_active(&entry.active_windows, now) => {
                        entry.inactive_skips += 1;
                        TriggerStatus::Inactive
                    }
                    Some(entry) if entry.in_flight => {
                        entry.skips += 1;
                        TriggerStatus::SkippedInFlight
                    }
                    Some(entry) => {
                        entry.in_flight = true;
                        entry.runs += 1;
                        entry.last_run = Some(now);
                        TriggerStatus::Triggered
                    }
                };
                info!(avatar = %avatar, ?status, "Manual trigger");
                TriggerOutcome { avatar, status }
            })
            .collect()
    }

    /// Mark an avatar's run finished.
    pub fn complete(&mut self, avatar: &str, report: Option<CycleReport>) {
        if let Some(entry) = self.entries.get_mut(avatar) {
            entry.in_flight = false;
            if report.is_some() {
                entry.last_report = report;
            }
        }
    }

    pub fn entry(&self, avatar: &str) -> Option<&ScheduleEntry> {
        self.entries.get(avatar)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest upcoming fire time across enabled entries.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.entries
            .values()
            .filter(|e| e.enabled)
            .map(|e| e.next_fire)
            .min()
    }

    pub fn snapshot(&self) -> Vec<ScheduleSnapshot> {
        self.entries
            .values()
            .map(|e| ScheduleSnapshot {
                avatar: e.avatar.clone(),
                schedule: match &e.trigger {
                    Trigger::Interval { period, jitter } => format!(
                        "every {}s (+0..{}s jitter)",
                        period.num_seconds(),
                        jitter.num_seconds()
                    ),
                    Trigger::Cron(expr) => format!("cron {}", expr.as_str()),
                },
                next_fire: e.next_fire,
                enabled: e.enabled,
                in_flight: e.in_flight,
                runs: e.runs,
                skips: e.skips,
                inactive_skips: e.inactive_skips,
                last_run: e.last_run,
                last_report: e.last_report.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2026-03-02 is a Monday
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    fn every(secs: u64) -> ScheduleSpec {
        ScheduleSpec::Interval {
            every_secs: secs,
            jitter_secs: 0,
        }
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[test]
    fn interval_fires_after_one_period() {
        let mut s = Scheduler::new();
        s.register("ada", &every(60), vec![], t0()).unwrap();

        assert!(s.tick(t0() + secs(59)).is_empty());
        assert_eq!(s.tick(t0() + secs(60)), vec!["ada".to_string()]);
        assert_eq!(s.entry("ada").unwrap().next_fire, t0() + secs(120));
    }

    #[test]
    fn in_flight_run_is_skipped_not_queued() {
        let mut s = Scheduler::new();
        s.register("ada", &every(60), vec![], t0()).unwrap();

        assert_eq!(s.tick(t0() + secs(60)).len(), 1);
        // previous run never completed
        assert!(s.tick(t0() + secs(120)).is_empty());
        assert!(s.tick(t0() + secs(180)).is_empty());
        assert_eq!(s.entry("ada").unwrap().skips, 2);

        s.complete("ada", Some(CycleReport::default()));
        assert_eq!(s.tick(t0() + secs(240)).len(), 1);
        assert_eq!(s.entry("ada").unwrap().runs, 2);
    }

    #[test]
    fn missed_ticks_are_not_backfilled() {
        let mut s = Scheduler::new();
        s.register("ada", &every(60), vec![], t0()).unwrap();

        // ten periods late: one fire, next slot strictly in the future
        assert_eq!(s.tick(t0() + secs(600) + secs(5)).len(), 1);
        assert_eq!(s.entry("ada").unwrap().next_fire, t0() + secs(660));
        s.complete("ada", None);
        assert!(s.tick(t0() + secs(610)).is_empty());
    }

    #[test]
    fn jitter_stays_in_bounds_and_does_not_drift() {
        let mut s = Scheduler::new();
        let spec = ScheduleSpec::Interval {
            every_secs: 240,
            jitter_secs: 120,
        };
        s.register("ada", &spec, vec![], t0()).unwrap();

        let mut now = t0();
        for period in 1..=20 {
            let next = s.entry("ada").unwrap().next_fire;
            let anchor = t0() + secs(240 * period);
            assert!(next >= anchor && next <= anchor + secs(120), "period {period}: {next}");
            now = now.max(next);
            assert_eq!(s.tick(now).len(), 1);
            s.complete("ada", None);
        }
    }

    #[test]
    fn avatars_have_independent_timers() {
        let mut s = Scheduler::new();
        s.register("fast", &every(30), vec![], t0()).unwrap();
        s.register("slow", &every(90), vec![], t0()).unwrap();

        assert_eq!(s.tick(t0() + secs(30)), vec!["fast".to_string()]);
        s.complete("fast", None);
        assert_eq!(s.tick(t0() + secs(60)), vec!["fast".to_string()]);
        s.complete("fast", None);
        let mut both = s.tick(t0() + secs(90));
        both.sort();
        assert_eq!(both, vec!["fast".to_string(), "slow".to_string()]);
    }

    #[test]
    fn inactive_avatar_skips_but_advances() {
        let mut s = Scheduler::new();
        // weekends only
        let windows = vec![ActiveWindow {
            days: vec![5, 6],
            start_hour: 0,
            end_hour: 24,
        }];
        s.register("ada", &every(60), windows, t0()).unwrap();

        assert!(s.tick(t0() + secs(60)).is_empty());
        let entry = s.entry("ada").unwrap();
        assert_eq!(entry.inactive_skips, 1);
        assert_eq!(entry.next_fire, t0() + secs(120));
        assert!(!entry.in_flight);
    }

    #[test]
    fn cron_entry_fires_on_matching_minute() {
        let mut s = Scheduler::new();
        let spec = ScheduleSpec::Cron {
            expression: "*/15 * * * *".into(),
        };
        s.register("ada", &spec, vec![], t0() + secs(60)).unwrap();
        assert_eq!(s.entry("ada").unwrap().next_fire, t0() + secs(15 * 60));
        assert_eq!(s.tick(t0() + secs(15 * 60)).len(), 1);
        assert_eq!(s.entry("ada").unwrap().next_fire, t0() + secs(30 * 60));
    }

    #[test]
    fn bad_specs_are_rejected() {
        let mut s = Scheduler::new();
        assert_eq!(s.register("a", &every(0), vec![], t0()), Err(ScheduleError::ZeroInterval));
        let bad = ScheduleSpec::Cron {
            expression: "every day".into(),
        };
        assert!(matches!(
            s.register("b", &bad, vec![], t0()),
            Err(ScheduleError::InvalidCron { .. })
        ));
        let never = ScheduleSpec::Cron {
            expression: "0 0 30 2 *".into(),
        };
        assert!(matches!(s.register("c", &never, vec![], t0()), Err(ScheduleError::NeverFires(_))));

        s.register("d", &every(60), vec![], t0()).unwrap();
        assert_eq!(
            s.register("d", &every(60), vec![], t0()),
            Err(ScheduleError::Duplicate("d".into()))
        );
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn oversized_intervals_are_rejected() {
        let mut s = Scheduler::new();
        let huge = 1_000_000_000_000_000u64 * 60;
        assert!(matches!(
            Trigger::from_spec(&every(huge)),
            Err(ScheduleError::OutOfRange { what: "interval", .. })
        ));
        let jittery = ScheduleSpec::Interval {
            every_secs: 60,
            jitter_secs: u64::MAX,
        };
        assert!(matches!(
            s.register("a", &jittery, vec![], t0()),
            Err(ScheduleError::OutOfRange { what: "jitter", .. })
        ));
        s.register("b", &every(MAX_SCHEDULE_SECS), vec![], t0()).unwrap();
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn from_profiles_skips_unschedulable_avatars() {
        let profile = |id: &str, schedule: ScheduleSpec| AvatarProfile {
            id: id.into(),
            name: id.into(),
            personality: String::new(),
            skills: vec![],
            tools: vec![],
            backend: "mock".into(),
            model: "m".into(),
            options: aicrew_core::provider::ModelOptions::deterministic(),
            history_limit: 4,
            rag: false,
            schedule,
            active_windows: vec![],
            connectors: vec![],
            topics: vec![],
            escalate_to: None,
        };
        let profiles = [profile("ada", every(u64::MAX)), profile("bob", every(60))];

        let s = Scheduler::from_profiles(&profiles, t0());
        assert_eq!(s.len(), 1);
        assert!(s.entry("ada").is_none());
        assert!(s.entry("bob").is_some());
    }

    #[test]
    fn manual_trigger_bypasses_schedule() {
        let mut s = Scheduler::new();
        s.register("ada", &every(600), vec![], t0()).unwrap();
        s.register("bob", &every(600), vec![], t0()).unwrap();

        let outcomes = s.trigger_now(&TriggerTarget::Avatar("ada".into()), t0());
        assert_eq!(outcomes[0].status, TriggerStatus::Triggered);
        // next regular fire untouched
        assert_eq!(s.entry("ada").unwrap().next_fire, t0() + secs(600));

        let all = s.trigger_now(&TriggerTarget::All, t0());
        assert_eq!(
            all,
            vec![
                TriggerOutcome {
                    avatar: "ada".into(),
                    status: TriggerStatus::SkippedInFlight
                },
                TriggerOutcome {
                    avatar: "bob".into(),
                    status: TriggerStatus::Triggered
                },
            ]
        );

        let unknown = s.trigger_now(&TriggerTarget::Avatar("zed".into()), t0());
        assert_eq!(unknown[0].status, TriggerStatus::Unknown);
    }

    #[test]
    fn disabled_entries_never_fire() {
        let mut s = Scheduler::new();
        s.register("ada", &every(60), vec![], t0()).unwrap();
        assert!(s.set_enabled("ada", false));
        assert!(s.tick(t0() + secs(600)).is_empty());
        assert_eq!(
            s.trigger_now(&TriggerTarget::Avatar("ada".into()), t0())[0].status,
            TriggerStatus::Disabled
        );
        assert!(!s.set_enabled("zed", true));
        assert_eq!(s.next_due(), None);
    }

    #[test]
    fn snapshot_serializes() {
        let mut s = Scheduler::new();
        s.register("ada", &every(240), vec![], t0()).unwrap();
        let snap = s.snapshot();
        assert_eq!(snap.len(), 1);
        let json = serde_json::to_value(&snap[0]).unwrap();
        assert_eq!(json["avatar"], "ada");
        assert_eq!(json["in_flight"], false);
        assert_eq!(json["schedule"], "every 240s (+0..0s jitter)");
    }
}
