use super::model::{Slot, TimetableError};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewType {
    Admin,
    Teacher,
    Student,
    Guardian,
}

impl ViewType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
            Self::Guardian => "guardian",
        }
    }
}

/// Roles the router distinguishes. Anything unrecognized parses as `Student`,
/// the most restricted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Guardian,
    Student,
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "teacher" => Self::Teacher,
            "guardian" => Self::Guardian,
            _ => Self::Student,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Guardian => "guardian",
            Self::Student => "student",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentLink {
    pub student_id: String,
    pub class_id: Option<String>,
}

/// Identity facts about the requesting user, as resolved by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLinks {
    pub role: String,
    pub teacher_id: Option<String>,
    pub student: Option<StudentLink>,
    pub children: Vec<StudentLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewFilter {
    Unrestricted,
    Teacher {
        teacher_id: String,
    },
    Class {
        class_id: String,
        student_id: Option<String>,
    },
    Children {
        children_ids: Vec<String>,
        class_ids: Vec<String>,
    },
    Room {
        room_id: String,
    },
}

impl ViewFilter {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Unrestricted => json!({}),
            Self::Teacher { teacher_id } => json!({ "teacherId": teacher_id }),
            Self::Class {
                class_id,
                student_id,
            } => json!({ "classId": class_id, "studentId": student_id }),
            Self::Children {
                children_ids,
                class_ids,
            } => json!({ "childrenIds": children_ids, "classIds": class_ids }),
            Self::Room { room_id } => json!({ "roomId": room_id }),
        }
    }

    pub fn matches(&self, slot: &Slot) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Teacher { teacher_id } => &slot.teacher_id == teacher_id,
            Self::Class { class_id, .. } => &slot.class_id == class_id,
            Self::Children { class_ids, .. } => class_ids.iter().any(|c| c == &slot.class_id),
            Self::Room { room_id } => &slot.room_id == room_id,
        }
    }

    /// Projects `slots` through the filter. Each slot id appears at most once,
    /// even when two children share a class.
    pub fn apply<'a>(&self, slots: &'a [Slot]) -> Vec<&'a Slot> {
        let mut seen: HashSet<&str> = HashSet::new();
        slots
            .iter()
            .filter(|s| self.matches(s))
            .filter(|s| seen.insert(s.id.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSelection {
    pub view_type: ViewType,
    pub filter: ViewFilter,
}

/// Chooses the projection for a user. Unknown roles get the student view and
/// any missing link is an explicit `no_linkage` error, never an empty grid.
pub fn select_view(links: &UserLinks) -> Result<ViewSelection, TimetableError> {
    match Role::parse(&links.role) {
        Role::Admin => Ok(ViewSelection {
            view_type: ViewType::Admin,
            filter: ViewFilter::Unrestricted,
        }),
        Role::Teacher => {
            let Some(teacher_id) = links.teacher_id.clone() else {
                return Err(TimetableError::no_linkage(
                    "no teacher profile is linked to this user",
                ));
            };
            Ok(ViewSelection {
                view_type: ViewType::Teacher,
                filter: ViewFilter::Teacher { teacher_id },
            })
        }
        Role::Student => {
            let Some(student) = links.student.as_ref() else {
                return Err(TimetableError::no_linkage(
                    "no student profile is linked to this user",
                ));
            };
            let Some(class_id) = student.class_id.clone() else {
                return Err(TimetableError::no_linkage(
                    "student is not enrolled in a class",
                ));
            };
            Ok(ViewSelection {
                view_type: ViewType::Student,
                filter: ViewFilter::Class {
                    class_id,
                    student_id: Some(student.student_id.clone()),
                },
            })
        }
        Role::Guardian => {
            if links.children.is_empty() {
                return Err(TimetableError::no_linkage(
                    "no children are linked to this guardian",
                ));
            }
            let children_ids: Vec<String> =
                links.children.iter().map(|c| c.student_id.clone()).collect();
            let class_ids: Vec<String> = links
                .children
                .iter()
                .filter_map(|c| c.class_id.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if class_ids.is_empty() {
                return Err(TimetableError::no_linkage(
                    "none of the linked children is enrolled in a class",
                ));
            }
            Ok(ViewSelection {
                view_type: ViewType::Guardian,
                filter: ViewFilter::Children {
                    children_ids,
                    class_ids,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::model::slot;

    fn links(role: &str) -> UserLinks {
        UserLinks {
            role: role.to_string(),
            teacher_id: Some("T1".into()),
            student: Some(StudentLink {
                student_id: "S1".into(),
                class_id: Some("C1".into()),
            }),
            children: vec![],
        }
    }

    #[test]
    fn unknown_roles_fail_closed_to_student() {
        for role in ["", "accountant", "ADMINISTRATOR", "staff", "developer"] {
            let v = select_view(&links(role)).expect("student view");
            assert_eq!(v.view_type, ViewType::Student, "role {:?}", role);
        }
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(select_view(&links(" Admin ")).unwrap().view_type, ViewType::Admin);
        assert_eq!(select_view(&links("TEACHER")).unwrap().view_type, ViewType::Teacher);
    }

    #[test]
    fn teacher_without_profile_is_no_linkage() {
        let mut l = links("teacher");
        l.teacher_id = None;
        let e = select_view(&l).unwrap_err();
        assert_eq!(e.code, "no_linkage");
    }

    #[test]
    fn unknown_role_without_student_link_is_no_linkage_not_admin() {
        let mut l = links("superuser");
        l.student = None;
        let e = select_view(&l).unwrap_err();
        assert_eq!(e.code, "no_linkage");
    }

    #[test]
    fn guardian_without_children_is_no_linkage() {
        let e = select_view(&links("guardian")).unwrap_err();
        assert_eq!(e.code, "no_linkage");
    }

    #[test]
    fn guardian_filter_unions_children_classes_without_duplicates() {
        let mut l = links("guardian");
        l.children = vec![
            StudentLink {
                student_id: "S1".into(),
                class_id: Some("C2".into()),
            },
            StudentLink {
                student_id: "S2".into(),
                class_id: Some("C1".into()),
            },
            StudentLink {
                student_id: "S3".into(),
                class_id: Some("C1".into()),
            },
        ];
        let v = select_view(&l).expect("guardian view");
        assert_eq!(v.view_type, ViewType::Guardian);
        assert_eq!(
            v.filter.to_json(),
            json!({ "childrenIds": ["S1", "S2", "S3"], "classIds": ["C1", "C2"] })
        );

        let slots = vec![
            slot("a", 1, "P1", "T1", "C1", "R1"),
            slot("b", 1, "P1", "T2", "C2", "R2"),
            slot("c", 1, "P1", "T3", "C3", "R3"),
            slot("a", 1, "P1", "T1", "C1", "R1"),
        ];
        let ids: Vec<&str> = v.filter.apply(&slots).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
