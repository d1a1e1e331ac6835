use super::model::Slot;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub teacher_id: String,
    pub days_count: usize,
    pub periods_count: usize,
    pub classes_count: usize,
    pub days: Vec<u8>,
}

#[derive(Default)]
struct Tally<'a> {
    days: BTreeSet<u8>,
    classes: BTreeSet<&'a str>,
    periods: usize,
}

impl<'a> Tally<'a> {
    fn add(&mut self, s: &'a Slot) {
        self.days.insert(s.day_of_week);
        self.classes.insert(s.class_id.as_str());
        self.periods += 1;
    }

    fn finish(self, teacher_id: &str) -> Workload {
        Workload {
            teacher_id: teacher_id.to_string(),
            days_count: self.days.len(),
            periods_count: self.periods,
            classes_count: self.classes.len(),
            days: self.days.into_iter().collect(),
        }
    }
}

/// Aggregates one teacher's slots. Slots of other teachers are ignored, so the
/// whole term can be passed in.
pub fn teacher_workload<'a, I>(teacher_id: &str, slots: I) -> Workload
where
    I: IntoIterator<Item = &'a Slot>,
{
    let mut tally = Tally::default();
    for s in slots {
        if s.teacher_id == teacher_id {
            tally.add(s);
        }
    }
    tally.finish(teacher_id)
}

/// Workload for every teacher that holds at least one slot, ordered by id.
pub fn workloads_by_teacher(slots: &[Slot]) -> Vec<Workload> {
    let mut tallies: BTreeMap<&str, Tally<'_>> = BTreeMap::new();
    for s in slots {
        tallies.entry(s.teacher_id.as_str()).or_default().add(s);
    }
    tallies
        .into_iter()
        .map(|(teacher_id, tally)| tally.finish(teacher_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::model::slot;

    #[test]
    fn counts_distinct_days_and_classes() {
        let slots = vec![
            slot("a", 1, "P1", "T1", "C1", "R1"),
            slot("b", 1, "P2", "T1", "C2", "R1"),
            slot("c", 3, "P1", "T1", "C1", "R2"),
            slot("d", 2, "P1", "T2", "C3", "R3"),
        ];
        let w = teacher_workload("T1", &slots);
        assert_eq!(w.days_count, 2);
        assert_eq!(w.periods_count, 3);
        assert_eq!(w.classes_count, 2);
        assert_eq!(w.days, vec![1, 3]);
    }

    #[test]
    fn idle_teacher_has_zero_workload() {
        let w = teacher_workload("T9", &Vec::<crate::timetable::model::Slot>::new());
        assert_eq!((w.days_count, w.periods_count, w.classes_count), (0, 0, 0));
    }

    #[test]
    fn staff_report_covers_each_teacher_once() {
        let slots = vec![
            slot("a", 1, "P1", "T2", "C1", "R1"),
            slot("b", 2, "P1", "T1", "C1", "R1"),
            slot("c", 2, "P2", "T2", "C2", "R1"),
        ];
        let all = workloads_by_teacher(&slots);
        let ids: Vec<&str> = all.iter().map(|w| w.teacher_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(all[1].periods_count, 2);
    }
}
