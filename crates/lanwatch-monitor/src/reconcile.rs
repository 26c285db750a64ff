//! Change detection: reconcile one scan's devices against a job's known
//! devices.
//!
//! [`reconcile`] is pure. It returns a [`ReconcilePlan`] describing every
//! write a run has to make; the runner hands that plan to the store as one
//! atomic commit.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};

use lanwatch_core::{
    DeviceHistorySample, DeviceStatus, DeviceUpdate, DiscoveredDevice, Job, KnownDevice, MacAddr,
    Notification, NotificationId, NotificationKind, RunCounts,
};

/// Every write produced by reconciling one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub inserted: Vec<KnownDevice>,
    pub updated: Vec<DeviceUpdate>,
    pub inactivated: Vec<MacAddr>,
    pub history: Vec<DeviceHistorySample>,
    pub notifications: Vec<Notification>,
    pub counts: RunCounts,
}

/// Where a MAC already seen in this feed ended up in the plan.
#[derive(Clone, Copy)]
enum Slot {
    Inserted(usize),
    Updated(usize),
}

/// Classify every discovered device as new or known, mark known devices
/// that were not seen as inactive and collect notifications.
///
/// A MAC repeated within one feed updates the entry produced by its first
/// occurrence; the later line wins.
pub fn reconcile(
    job: &Job,
    whitelist: &HashSet<MacAddr>,
    known: &[KnownDevice],
    discovered: &[DiscoveredDevice],
    now: DateTime<Utc>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let known_by_mac: HashMap<MacAddr, &KnownDevice> = known.iter().map(|d| (d.mac, d)).collect();
    let mut slots: HashMap<MacAddr, Slot> = HashMap::new();
    let notify = &job.notifications;

    for device in discovered {
        let whitelisted = whitelist.contains(&device.mac);

        match slots.get(&device.mac).copied() {
            Some(Slot::Inserted(i)) => {
                let entry = &mut plan.inserted[i];
                let previous_ip = entry.ip;
                entry.ip = device.ip;
                entry.vendor = device.vendor.clone().or(entry.vendor.take());
                if previous_ip != device.ip && notify.enabled && notify.on_ip_change {
                    plan.notifications
                        .push(ip_changed(job, device, previous_ip, now));
                }
            }
            Some(Slot::Updated(i)) => {
                let entry = &mut plan.updated[i];
                let previous_ip = entry.ip;
                entry.ip = device.ip;
                entry.vendor = device.vendor.clone().or(entry.vendor.take());
                if previous_ip != device.ip && notify.enabled && notify.on_ip_change {
                    plan.notifications
                        .push(ip_changed(job, device, previous_ip, now));
                }
            }
            None => match known_by_mac.get(&device.mac) {
                Some(existing) => {
                    if existing.ip != device.ip && notify.enabled && notify.on_ip_change {
                        plan.notifications
                            .push(ip_changed(job, device, existing.ip, now));
                    }
                    slots.insert(device.mac, Slot::Updated(plan.updated.len()));
                    plan.updated.push(DeviceUpdate {
                        mac: device.mac,
                        ip: device.ip,
                        vendor: device.vendor.clone().or_else(|| existing.vendor.clone()),
                        whitelisted,
                        last_seen: now,
                    });
                }
                None => {
                    plan.counts.new_devices += 1;
                    if whitelisted {
                        if notify.enabled && notify.on_new {
                            plan.notifications.push(notification(
                                job,
                                device,
                                NotificationKind::Information,
                                format!("New device detected at {}", device.ip),
                                now,
                            ));
                        }
                    } else if notify.enabled && notify.on_unauthorized {
                        plan.counts.warnings += 1;
                        plan.notifications.push(notification(
                            job,
                            device,
                            NotificationKind::Warning,
                            format!("Unauthorized device detected at {}", device.ip),
                            now,
                        ));
                    }
                    slots.insert(device.mac, Slot::Inserted(plan.inserted.len()));
                    plan.inserted.push(KnownDevice {
                        job_id: job.id,
                        mac: device.mac,
                        ip: device.ip,
                        vendor: device.vendor.clone(),
                        whitelisted,
                        first_seen: now,
                        last_seen: now,
                        status: DeviceStatus::Active,
                    });
                }
            },
        }

        plan.history.push(DeviceHistorySample {
            job_id: job.id,
            mac: device.mac,
            ip: device.ip,
            vendor: device.vendor.clone(),
            seen_at: now,
        });
    }

    plan.inactivated = known
        .iter()
        .filter(|d| d.status == DeviceStatus::Active && !slots.contains_key(&d.mac))
        .map(|d| d.mac)
        .collect();

    plan.counts.devices_found = slots.len() as u32;
    plan
}

fn ip_changed(job: &Job, device: &DiscoveredDevice, from: Ipv4Addr, now: DateTime<Utc>) -> Notification {
    notification(
        job,
        device,
        NotificationKind::Information,
        format!("IP changed from {from} to {}", device.ip),
        now,
    )
}

fn notification(
    job: &Job,
    device: &DiscoveredDevice,
    kind: NotificationKind,
    message: String,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        id: NotificationId::new(),
        job_id: job.id,
        job_name: job.name.clone(),
        kind,
        message,
        mac: device.mac,
        ip: device.ip,
        created_at: now,
        read: false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use lanwatch_core::NotificationSettings;

    use super::*;

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    fn test_job() -> Job {
        Job::new("office", "eth0", "192.168.1.0/24").unwrap()
    }

    fn seen(ip: [u8; 4], m: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            ip: Ipv4Addr::from(ip),
            mac: mac(m),
            vendor: None,
        }
    }

    fn known(job: &Job, ip: [u8; 4], m: &str, at: DateTime<Utc>) -> KnownDevice {
        KnownDevice {
            job_id: job.id,
            mac: mac(m),
            ip: Ipv4Addr::from(ip),
            vendor: Some("Acme".to_string()),
            whitelisted: false,
            first_seen: at,
            last_seen: at,
            status: DeviceStatus::Active,
        }
    }

    /// Apply a plan to a device list the way a store would.
    fn apply(known: &[KnownDevice], plan: &ReconcilePlan) -> Vec<KnownDevice> {
        let mut out: Vec<KnownDevice> = known.to_vec();
        for update in &plan.updated {
            let d = out.iter_mut().find(|d| d.mac == update.mac).unwrap();
            d.ip = update.ip;
            d.vendor = update.vendor.clone();
            d.whitelisted = update.whitelisted;
            d.last_seen = update.last_seen;
            d.status = DeviceStatus::Active;
        }
        for m in &plan.inactivated {
            out.iter_mut().find(|d| d.mac == *m).unwrap().status = DeviceStatus::Inactive;
        }
        out.extend(plan.inserted.iter().cloned());
        out
    }

    #[test]
    fn test_whitelisted_and_unauthorized_new_devices() {
        let job = test_job();
        let whitelist = HashSet::from([mac("aa:aa:aa:aa:aa:aa")]);
        let discovered = vec![
            seen([192, 168, 1, 10], "AA:AA:AA:AA:AA:AA"),
            seen([192, 168, 1, 11], "bb:bb:bb:bb:bb:bb"),
        ];

        let plan = reconcile(&job, &whitelist, &[], &discovered, Utc::now());

        assert_eq!(
            plan.counts,
            RunCounts {
                devices_found: 2,
                new_devices: 2,
                warnings: 1
            }
        );
        assert_eq!(plan.inserted.len(), 2);
        assert!(plan.inserted[0].whitelisted);
        assert!(!plan.inserted[1].whitelisted);

        assert_eq!(plan.notifications.len(), 2);
        assert_eq!(plan.notifications[0].kind, NotificationKind::Information);
        assert_eq!(plan.notifications[0].mac, mac("aa:aa:aa:aa:aa:aa"));
        assert_eq!(plan.notifications[1].kind, NotificationKind::Warning);
        assert_eq!(plan.notifications[1].mac, mac("bb:bb:bb:bb:bb:bb"));
        assert_eq!(plan.history.len(), 2);
    }

    #[test]
    fn test_ip_change_updates_known_device() {
        let job = test_job();
        let t0 = Utc::now() - TimeDelta::hours(1);
        let existing = vec![known(&job, [192, 168, 1, 10], "aa:aa:aa:aa:aa:aa", t0)];
        let now = Utc::now();

        let plan = reconcile(
            &job,
            &HashSet::new(),
            &existing,
            &[seen([192, 168, 1, 99], "aa:aa:aa:aa:aa:aa")],
            now,
        );

        assert!(plan.inserted.is_empty());
        assert_eq!(plan.updated.len(), 1);
        assert_eq!(plan.updated[0].ip, Ipv4Addr::new(192, 168, 1, 99));
        assert_eq!(plan.updated[0].last_seen, now);
        // Vendor survives a sighting without one.
        assert_eq!(plan.updated[0].vendor.as_deref(), Some("Acme"));

        assert_eq!(plan.notifications.len(), 1);
        assert_eq!(plan.notifications[0].kind, NotificationKind::Information);
        assert_eq!(
            plan.notifications[0].message,
            "IP changed from 192.168.1.10 to 192.168.1.99"
        );
        assert_eq!(plan.counts.new_devices, 0);
    }

    #[test]
    fn test_unseen_device_becomes_inactive() {
        let job = test_job();
        let t0 = Utc::now() - TimeDelta::hours(1);
        let mut gone = known(&job, [192, 168, 1, 12], "cc:cc:cc:cc:cc:cc", t0);
        let existing = vec![known(&job, [192, 168, 1, 10], "aa:aa:aa:aa:aa:aa", t0), gone.clone()];

        let plan = reconcile(
            &job,
            &HashSet::new(),
            &existing,
            &[seen([192, 168, 1, 10], "aa:aa:aa:aa:aa:aa")],
            Utc::now(),
        );
        assert_eq!(plan.inactivated, vec![mac("cc:cc:cc:cc:cc:cc")]);
        assert!(plan.notifications.is_empty());

        // Already inactive devices are left alone.
        gone.status = DeviceStatus::Inactive;
        let plan = reconcile(&job, &HashSet::new(), &[gone], &[], Utc::now());
        assert!(plan.inactivated.is_empty());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let job = test_job();
        let whitelist = HashSet::from([mac("aa:aa:aa:aa:aa:aa")]);
        let discovered = vec![
            seen([192, 168, 1, 10], "aa:aa:aa:aa:aa:aa"),
            seen([192, 168, 1, 11], "bb:bb:bb:bb:bb:bb"),
        ];
        let t0 = Utc::now();

        let first = reconcile(&job, &whitelist, &[], &discovered, t0);
        let state = apply(&[], &first);

        let t1 = t0 + TimeDelta::minutes(5);
        let second = reconcile(&job, &whitelist, &state, &discovered, t1);
        assert!(second.inserted.is_empty());
        assert!(second.inactivated.is_empty());
        assert!(second.notifications.is_empty());
        assert_eq!(second.counts.new_devices, 0);
        assert_eq!(second.counts.warnings, 0);

        let after = apply(&state, &second);
        for (before, after) in state.iter().zip(&after) {
            assert_eq!(before.ip, after.ip);
            assert_eq!(before.status, after.status);
            assert_eq!(after.last_seen, t1);
        }
    }

    #[test]
    fn test_duplicate_mac_later_wins() {
        let job = test_job();
        let discovered = vec![
            seen([10, 0, 0, 1], "aa:aa:aa:aa:aa:aa"),
            seen([10, 0, 0, 2], "aa:aa:aa:aa:aa:aa"),
        ];

        let plan = reconcile(&job, &HashSet::new(), &[], &discovered, Utc::now());

        assert_eq!(plan.inserted.len(), 1);
        assert_eq!(plan.inserted[0].ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(plan.counts.new_devices, 1);
        assert_eq!(plan.counts.devices_found, 1);
        assert_eq!(plan.history.len(), 2);

        let warnings = plan
            .notifications
            .iter()
            .filter(|n| n.kind == NotificationKind::Warning)
            .count();
        assert_eq!(warnings, 1);
        assert!(plan
            .notifications
            .iter()
            .any(|n| n.message == "IP changed from 10.0.0.1 to 10.0.0.2"));
    }

    #[test]
    fn test_notifications_disabled() {
        let job = test_job().with_notifications(NotificationSettings {
            enabled: false,
            ..Default::default()
        });
        let t0 = Utc::now() - TimeDelta::hours(1);
        let existing = vec![known(&job, [10, 0, 0, 1], "aa:aa:aa:aa:aa:aa", t0)];
        let discovered = vec![
            seen([10, 0, 0, 9], "aa:aa:aa:aa:aa:aa"),
            seen([10, 0, 0, 2], "bb:bb:bb:bb:bb:bb"),
        ];

        let plan = reconcile(&job, &HashSet::new(), &existing, &discovered, Utc::now());
        assert!(plan.notifications.is_empty());
        // Warnings count emitted notifications; new devices are counted regardless.
        assert_eq!(plan.counts.warnings, 0);
        assert_eq!(plan.counts.new_devices, 1);
    }

    #[test]
    fn test_individual_toggles() {
        let job = test_job().with_notifications(NotificationSettings {
            on_unauthorized: false,
            ..Default::default()
        });
        let plan = reconcile(
            &job,
            &HashSet::new(),
            &[],
            &[seen([10, 0, 0, 2], "bb:bb:bb:bb:bb:bb")],
            Utc::now(),
        );
        // New but unauthorized never falls back to an information notice.
        assert!(plan.notifications.is_empty());
        assert_eq!(plan.counts.warnings, 0);
        assert_eq!(plan.counts.new_devices, 1);
    }

    #[test]
    fn test_warning_count_matches_warning_notifications() {
        let whitelist = HashSet::from([mac("aa:aa:aa:aa:aa:aa")]);
        let discovered = vec![
            seen([10, 0, 0, 1], "aa:aa:aa:aa:aa:aa"),
            seen([10, 0, 0, 2], "bb:bb:bb:bb:bb:bb"),
            seen([10, 0, 0, 3], "cc:cc:cc:cc:cc:cc"),
        ];

        for settings in [
            NotificationSettings::default(),
            NotificationSettings {
                enabled: false,
                ..Default::default()
            },
            NotificationSettings {
                on_unauthorized: false,
                ..Default::default()
            },
            NotificationSettings {
                on_new: false,
                ..Default::default()
            },
        ] {
            let job = test_job().with_notifications(settings);
            let plan = reconcile(&job, &whitelist, &[], &discovered, Utc::now());
            let warning_notes = plan
                .notifications
                .iter()
                .filter(|n| n.kind == NotificationKind::Warning)
                .count() as u32;
            assert_eq!(plan.counts.warnings, warning_notes, "{settings:?}");
            assert_eq!(plan.counts.new_devices, 3);
        }
    }

    #[test]
    fn test_whitelist_refreshed_on_update() {
        let job = test_job();
        let t0 = Utc::now() - TimeDelta::hours(1);
        let existing = vec![known(&job, [10, 0, 0, 1], "aa:aa:aa:aa:aa:aa", t0)];
        let whitelist = HashSet::from([mac("aa:aa:aa:aa:aa:aa")]);

        let plan = reconcile(
            &job,
            &whitelist,
            &existing,
            &[seen([10, 0, 0, 1], "aa:aa:aa:aa:aa:aa")],
            Utc::now(),
        );
        assert!(plan.updated[0].whitelisted);
    }
}
