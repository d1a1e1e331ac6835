use super::model::{Period, Slot};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    Teacher,
    Room,
    Class,
    /// A slot placed in a period flagged as a break.
    BreakPeriod,
}

impl ConflictKind {
    const BOOKINGS: [ConflictKind; 3] = [Self::Teacher, Self::Room, Self::Class];

    fn bucket_key(self, slot: &Slot) -> Option<&str> {
        match self {
            Self::Teacher => Some(slot.teacher_id.as_str()),
            Self::Room => Some(slot.room_id.as_str()),
            Self::Class => Some(slot.class_id.as_str()),
            Self::BreakPeriod => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub day_of_week: u8,
    pub period_id: String,
    /// Colliding teacher, room or class id. Absent for break-period anomalies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub slot_ids: Vec<String>,
}

impl Conflict {
    pub fn involves(&self, slot_id: &str) -> bool {
        self.slot_ids.iter().any(|id| id == slot_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeCell {
    pub day_of_week: u8,
    pub period_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveSuggestion {
    pub slot_id: String,
    pub kind: ConflictKind,
    pub free_cells: Vec<FreeCell>,
}

/// Reports every (day, period) bucket where a teacher, room or class holds
/// more than one slot, plus one anomaly per slot parked in a break period.
///
/// Output is sorted by day, period order, kind and key, and slot ids are
/// sorted inside each record, so input order never changes the result.
pub fn detect_conflicts(slots: &[Slot], periods: &[Period]) -> Vec<Conflict> {
    let by_period: HashMap<&str, &Period> = periods.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut cells: HashMap<(u8, &str), Vec<&Slot>> = HashMap::new();
    for s in slots {
        cells
            .entry((s.day_of_week, s.period_id.as_str()))
            .or_default()
            .push(s);
    }

    let mut out: Vec<Conflict> = Vec::new();
    for ((day, period_id), members) in &cells {
        let is_break = by_period.get(period_id).map(|p| p.is_break).unwrap_or(false);
        if is_break {
            for s in members {
                out.push(Conflict {
                    kind: ConflictKind::BreakPeriod,
                    day_of_week: *day,
                    period_id: period_id.to_string(),
                    key: None,
                    slot_ids: vec![s.id.clone()],
                });
            }
        }
        if members.len() < 2 {
            continue;
        }
        for kind in ConflictKind::BOOKINGS {
            let mut buckets: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for s in members {
                if let Some(key) = kind.bucket_key(s) {
                    buckets.entry(key).or_default().push(s.id.as_str());
                }
            }
            for (key, mut ids) in buckets {
                if ids.len() < 2 {
                    continue;
                }
                ids.sort_unstable();
                out.push(Conflict {
                    kind,
                    day_of_week: *day,
                    period_id: period_id.to_string(),
                    key: Some(key.to_string()),
                    slot_ids: ids.into_iter().map(|s| s.to_string()).collect(),
                });
            }
        }
    }

    let order_of = |period_id: &str| -> i64 {
        by_period
            .get(period_id)
            .map(|p| p.sort_order)
            .unwrap_or(i64::MAX)
    };
    out.sort_by(|a, b| {
        a.day_of_week
            .cmp(&b.day_of_week)
            .then_with(|| order_of(a.period_id.as_str()).cmp(&order_of(b.period_id.as_str())))
            .then_with(|| a.period_id.cmp(&b.period_id))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.key.cmp(&b.key))
            .then_with(|| a.slot_ids.cmp(&b.slot_ids))
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Resource<'a> {
    Teacher(&'a str),
    Room(&'a str),
    Class(&'a str),
}

fn resources(s: &Slot) -> [Resource<'_>; 3] {
    [
        Resource::Teacher(&s.teacher_id),
        Resource::Room(&s.room_id),
        Resource::Class(&s.class_id),
    ]
}

/// For each double-booking, lists cells of the working week where every slot
/// after the first in the bucket could move without touching another booking
/// of its teacher, room or class. A cell offered to one slot is treated as
/// taken for that slot's teacher, room and class, so slots sharing a resource
/// are never offered the same cell. Advisory only; nothing is applied.
pub fn suggest_moves(
    conflicts: &[Conflict],
    slots: &[Slot],
    periods: &[Period],
    working_days: &[u8],
    per_slot_limit: usize,
) -> Vec<MoveSuggestion> {
    let by_id: HashMap<&str, &Slot> = slots.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut occupied: HashSet<(u8, &str, Resource<'_>)> = HashSet::new();
    for s in slots {
        for r in resources(s) {
            occupied.insert((s.day_of_week, s.period_id.as_str(), r));
        }
    }

    let mut teaching: Vec<&Period> = periods.iter().filter(|p| !p.is_break).collect();
    teaching.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.start_time.cmp(&b.start_time))
    });
    let mut days: Vec<u8> = working_days.to_vec();
    days.sort_unstable();
    days.dedup();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for c in conflicts {
        if c.kind == ConflictKind::BreakPeriod {
            continue;
        }
        for slot_id in c.slot_ids.iter().skip(1) {
            let Some(slot) = by_id.get(slot_id.as_str()) else {
                continue;
            };
            if !seen.insert(slot.id.as_str()) {
                continue;
            }
            let mut free_cells = Vec::new();
            let mut offered: Vec<(u8, &str)> = Vec::new();
            'cells: for day in &days {
                for p in &teaching {
                    if free_cells.len() >= per_slot_limit {
                        break 'cells;
                    }
                    if *day == slot.day_of_week && p.id == slot.period_id {
                        continue;
                    }
                    let clash = resources(slot)
                        .iter()
                        .any(|r| occupied.contains(&(*day, p.id.as_str(), *r)));
                    if !clash {
                        free_cells.push(FreeCell {
                            day_of_week: *day,
                            period_id: p.id.clone(),
                        });
                        offered.push((*day, p.id.as_str()));
                    }
                }
            }
            for (day, period_id) in offered {
                for r in resources(slot) {
                    occupied.insert((day, period_id, r));
                }
            }
            out.push(MoveSuggestion {
                slot_id: slot.id.clone(),
                kind: c.kind,
                free_cells,
            });
        }
    }
    out.sort_by(|a, b| match a.slot_id.cmp(&b.slot_id) {
        Ordering::Equal => a.kind.cmp(&b.kind),
        o => o,
    });
    out
}
