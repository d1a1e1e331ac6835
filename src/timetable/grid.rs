use super::model::{day_label, Period, Slot};
use super::view::ViewType;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Cell classes handed to the UI. Index is chosen by [`subject_color`].
pub const SUBJECT_PALETTE: [&str; 12] = [
    "bg-blue-100 text-blue-900 border-blue-300",
    "bg-emerald-100 text-emerald-900 border-emerald-300",
    "bg-amber-100 text-amber-900 border-amber-300",
    "bg-rose-100 text-rose-900 border-rose-300",
    "bg-violet-100 text-violet-900 border-violet-300",
    "bg-cyan-100 text-cyan-900 border-cyan-300",
    "bg-lime-100 text-lime-900 border-lime-300",
    "bg-orange-100 text-orange-900 border-orange-300",
    "bg-fuchsia-100 text-fuchsia-900 border-fuchsia-300",
    "bg-teal-100 text-teal-900 border-teal-300",
    "bg-indigo-100 text-indigo-900 border-indigo-300",
    "bg-pink-100 text-pink-900 border-pink-300",
];

/// Stable palette entry for a subject. SHA-256 keeps the mapping identical
/// across processes and toolchain versions.
pub fn subject_color(subject: &str) -> &'static str {
    let digest = Sha256::digest(subject.trim().as_bytes());
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    SUBJECT_PALETTE[(n as usize) % SUBJECT_PALETTE.len()]
}

#[derive(Debug, Clone)]
pub struct GridOptions {
    pub working_days: Vec<u8>,
    /// 1-based position among teaching periods after which the lunch row goes.
    pub lunch_after_period: Option<u32>,
    pub rtl: bool,
    pub view_type: ViewType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridColumn {
    pub day_of_week: u8,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellEntry {
    pub slot_id: String,
    pub subject: String,
    pub color: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "class")]
    pub class_name: Option<String>,
}

/// Empty `entries` is the placeholder cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub day_of_week: u8,
    pub entries: Vec<CellEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRow {
    pub period_id: String,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub cells: Vec<GridCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LunchRow {
    pub after_period_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GridRow {
    Period(PeriodRow),
    Lunch(LunchRow),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridModel {
    pub view_type: ViewType,
    pub rtl: bool,
    pub columns: Vec<GridColumn>,
    pub rows: Vec<GridRow>,
}

/// Day × period layout over borrowed slots. Rows are built on demand by
/// [`TimetableGrid::rows`]; nothing here mutates the inputs.
pub struct TimetableGrid<'a> {
    periods: Vec<&'a Period>,
    columns: Vec<GridColumn>,
    cells: HashMap<(u8, &'a str), Vec<&'a Slot>>,
    lunch_after: Option<usize>,
    view_type: ViewType,
    rtl: bool,
}

impl<'a> TimetableGrid<'a> {
    pub fn new<I>(slots: I, periods: &'a [Period], options: &GridOptions) -> Self
    where
        I: IntoIterator<Item = &'a Slot>,
    {
        let mut teaching: Vec<&Period> = periods.iter().filter(|p| !p.is_break).collect();
        teaching.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.start_time.cmp(&b.start_time))
        });

        let mut days: Vec<u8> = options
            .working_days
            .iter()
            .copied()
            .filter(|d| *d <= 6)
            .collect();
        days.sort_unstable();
        days.dedup();
        if options.rtl {
            days.reverse();
        }
        let columns = days
            .into_iter()
            .map(|d| GridColumn {
                day_of_week: d,
                label: day_label(d),
            })
            .collect();

        let mut cells: HashMap<(u8, &str), Vec<&Slot>> = HashMap::new();
        for s in slots {
            let bucket = cells
                .entry((s.day_of_week, s.period_id.as_str()))
                .or_default();
            if !bucket.iter().any(|x| x.id == s.id) {
                bucket.push(s);
            }
        }
        for bucket in cells.values_mut() {
            bucket.sort_by(|a, b| {
                a.class_name
                    .cmp(&b.class_name)
                    .then_with(|| a.subject.cmp(&b.subject))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        let lunch_after = options
            .lunch_after_period
            .map(|n| n as usize)
            .filter(|n| *n >= 1 && *n < teaching.len());

        Self {
            periods: teaching,
            columns,
            cells,
            lunch_after,
            view_type: options.view_type,
            rtl: options.rtl,
        }
    }

    pub fn columns(&self) -> &[GridColumn] {
        &self.columns
    }

    pub fn rows(&self) -> impl Iterator<Item = GridRow> + '_ {
        self.periods.iter().enumerate().flat_map(move |(i, p)| {
            let lunch = (self.lunch_after == Some(i + 1)).then(|| {
                GridRow::Lunch(LunchRow {
                    after_period_id: p.id.clone(),
                })
            });
            std::iter::once(GridRow::Period(self.period_row(p))).chain(lunch)
        })
    }

    pub fn to_model(&self) -> GridModel {
        GridModel {
            view_type: self.view_type,
            rtl: self.rtl,
            columns: self.columns().to_vec(),
            rows: self.rows().collect(),
        }
    }

    fn period_row(&self, p: &Period) -> PeriodRow {
        let cells = self
            .columns
            .iter()
            .map(|c| GridCell {
                day_of_week: c.day_of_week,
                entries: self
                    .cells
                    .get(&(c.day_of_week, p.id.as_str()))
                    .map(|bucket| bucket.iter().map(|s| self.entry(s)).collect())
                    .unwrap_or_default(),
            })
            .collect();
        PeriodRow {
            period_id: p.id.clone(),
            name: p.name.clone(),
            start_time: p.start_time.clone(),
            end_time: p.end_time.clone(),
            cells,
        }
    }

    fn entry(&self, s: &Slot) -> CellEntry {
        let (teacher, room, class) = match self.view_type {
            ViewType::Admin => (true, true, true),
            ViewType::Teacher => (false, true, true),
            ViewType::Student => (true, true, false),
            ViewType::Guardian => (true, true, true),
        };
        CellEntry {
            slot_id: s.id.clone(),
            subject: s.subject.clone(),
            color: subject_color(&s.subject),
            teacher: teacher.then(|| s.teacher_name.clone()),
            room: room.then(|| s.room_name.clone()),
            class_name: class.then(|| s.class_name.clone()),
        }
    }
}
