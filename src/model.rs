use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageType {
    All,
    Junior,
    Senior,
}

impl CoverageType {
    pub fn as_str(self) -> &'static str {
        match self {
            CoverageType::All => "ALL",
            CoverageType::Junior => "JUNIOR",
            CoverageType::Senior => "SENIOR",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(CoverageType::All),
            "JUNIOR" => Ok(CoverageType::Junior),
            "SENIOR" => Ok(CoverageType::Senior),
            other => Err(EngineError::invalid_argument(format!(
                "unknown coverage type: {other}"
            ))),
        }
    }

    /// Baseline grade-band rule. Explicit lists are layered on top elsewhere.
    pub fn covers_band(self, classroom_is_junior: bool) -> bool {
        match self {
            CoverageType::All => true,
            CoverageType::Junior => classroom_is_junior,
            CoverageType::Senior => !classroom_is_junior,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionUnit {
    Times,
    Hours,
}

impl CompletionUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionUnit::Times => "TIMES",
            CompletionUnit::Hours => "HOURS",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TIMES" => Ok(CompletionUnit::Times),
            "HOURS" => Ok(CompletionUnit::Hours),
            other => Err(EngineError::invalid_argument(format!(
                "unknown completion unit: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateProtocol {
    ReEvaluateAllRecords,
    IgnorePastRecords,
}

impl UpdateProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateProtocol::ReEvaluateAllRecords => "RE_EVALUATE_ALL_RECORDS",
            UpdateProtocol::IgnorePastRecords => "IGNORE_PAST_RECORDS",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RE_EVALUATE_ALL_RECORDS" => Ok(UpdateProtocol::ReEvaluateAllRecords),
            "IGNORE_PAST_RECORDS" => Ok(UpdateProtocol::IgnorePastRecords),
            other => Err(EngineError::invalid_argument(format!(
                "unknown update protocol: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Created,
    Sended,
    Approved,
    Rejected,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Created => "CREATED",
            RecordStatus::Sended => "SENDED",
            RecordStatus::Approved => "APPROVED",
            RecordStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(RecordStatus::Created),
            "SENDED" => Ok(RecordStatus::Sended),
            "APPROVED" => Ok(RecordStatus::Approved),
            "REJECTED" => Ok(RecordStatus::Rejected),
            other => Err(EngineError::invalid_argument(format!(
                "unknown record status: {other}"
            ))),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(EngineError::invalid_argument(format!("unknown role: {other}"))),
        }
    }
}

/// Who is calling. Authentication happens upstream; the engine only checks guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Semester + school year. Zero in either slot means "the school's active value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub semester: i64,
    pub school_year: i64,
}

impl Scope {
    pub const MAX_SEMESTER: i64 = 3;

    pub fn new(semester: i64, school_year: i64) -> Self {
        Self {
            semester,
            school_year,
        }
    }

    pub fn validate(self) -> Result<Self, EngineError> {
        if !(0..=Self::MAX_SEMESTER).contains(&self.semester) {
            return Err(EngineError::invalid_argument(format!(
                "semester must be between 0 and {}, got {}",
                Self::MAX_SEMESTER,
                self.semester
            )));
        }
        if self.school_year < 0 {
            return Err(EngineError::invalid_argument(format!(
                "school year must not be negative, got {}",
                self.school_year
            )));
        }
        Ok(self)
    }

    pub fn is_resolved(self) -> bool {
        self.semester != 0 && self.school_year != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i64,
    pub school_id: String,
    pub name: String,
    pub template: serde_json::Value,
    pub coverage: CoverageType,
    pub exclusive_classrooms: Vec<String>,
    pub exclusive_students: Vec<String>,
    pub required: bool,
    pub active: bool,
    pub deadline: Option<String>,
    pub unit: CompletionUnit,
    pub target_amount: f64,
    pub update_protocol: UpdateProtocol,
    pub semester: i64,
    pub school_year: i64,
    pub owner_id: String,
}

impl Activity {
    pub fn scope(&self) -> Scope {
        Scope::new(self.semester, self.school_year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub status: RecordStatus,
    pub at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: i64,
    pub activity_id: i64,
    pub student_id: String,
    pub teacher_id: Option<String>,
    pub semester: i64,
    pub school_year: i64,
    pub amount: f64,
    pub data: serde_json::Value,
    pub advice: Option<String>,
    pub status: RecordStatus,
    pub version: i64,
    pub history: Vec<StatusEntry>,
}

impl Record {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.student_id == user_id
    }

    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.teacher_id.as_deref() == Some(user_id)
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
