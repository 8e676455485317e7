//! Acting identity resolution and role-based permission checks.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::roster::StudentId;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_STUDENT_HEADER: &str = "x-actor-student";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Accountant,
    Student,
    Guardian,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Accountant => "accountant",
            Role::Student => "student",
            Role::Guardian => "guardian",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "accountant" => Some(Role::Accountant),
            "student" => Some(Role::Student),
            "guardian" | "parent" => Some(Role::Guardian),
            _ => None,
        }
    }

    fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher | Role::Accountant)
    }
}

/// The actor a request is performed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub actor_id: String,
    pub role: Role,
    /// The student themself, or the ward a guardian acts for.
    pub student_id: Option<StudentId>,
}

impl Identity {
    pub fn new(actor_id: impl Into<String>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
            student_id: None,
        }
    }

    pub fn for_student(actor_id: impl Into<String>, role: Role, student_id: StudentId) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
            student_id: Some(student_id),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServiceError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let actor_id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthenticated(format!("{ACTOR_ID_HEADER} is required")))?;
        let role = header(ACTOR_ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or_else(|| {
                ServiceError::Unauthenticated(format!("{ACTOR_ROLE_HEADER} must name a known role"))
            })?;
        let student_id = match header(ACTOR_STUDENT_HEADER) {
            Some(raw) => Some(raw.parse::<i64>().map(StudentId).map_err(|_| {
                ServiceError::Unauthenticated(format!("{ACTOR_STUDENT_HEADER} must be numeric"))
            })?),
            None => None,
        };

        Ok(Self {
            actor_id: actor_id.to_string(),
            role,
            student_id,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Identity::from_headers(&parts.headers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageRoster,
    ManageTemplates,
    IngestMarks,
    GenerateResults,
    PublishResults,
    ViewClassResults,
    ViewResultCard,
    AssignFees,
    ViewFee,
    Pay,
    ConfigureGateway,
}

impl Action {
    pub const fn label(self) -> &'static str {
        match self {
            Action::ManageRoster => "manage the roster",
            Action::ManageTemplates => "manage result templates",
            Action::IngestMarks => "upload marks",
            Action::GenerateResults => "generate results",
            Action::PublishResults => "publish results",
            Action::ViewClassResults => "view class results",
            Action::ViewResultCard => "view this result card",
            Action::AssignFees => "assign fees",
            Action::ViewFee => "view this fee",
            Action::Pay => "pay this fee",
            Action::ConfigureGateway => "configure payment gateways",
        }
    }
}

/// Which records an action touches, as far as is known when the check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Owner not resolved yet; checked before any persistence access.
    Any,
    /// Records belonging to one student.
    Student(StudentId),
}

pub trait Authorizer: Send + Sync {
    fn is_allowed(&self, identity: &Identity, action: Action, scope: Scope) -> bool;

    fn ensure(&self, identity: &Identity, action: Action, scope: Scope) -> Result<(), ServiceError> {
        if self.is_allowed(identity, action, scope) {
            Ok(())
        } else {
            tracing::warn!(
                actor = %identity.actor_id,
                role = identity.role.label(),
                action = action.label(),
                "permission denied"
            );
            Err(ServiceError::Forbidden {
                actor: identity.actor_id.clone(),
                role: identity.role.label(),
                action: action.label(),
            })
        }
    }
}

/// Default school policy: staff by duty, students and guardians only for their own records.
#[derive(Debug, Default, Clone, Copy)]
pub struct RolePolicy;

impl Authorizer for RolePolicy {
    fn is_allowed(&self, identity: &Identity, action: Action, scope: Scope) -> bool {
        let role = identity.role;
        match action {
            Action::ManageRoster | Action::PublishResults | Action::ConfigureGateway => {
                role == Role::Admin
            }
            Action::ManageTemplates
            | Action::IngestMarks
            | Action::GenerateResults
            | Action::ViewClassResults => matches!(role, Role::Admin | Role::Teacher),
            Action::AssignFees => matches!(role, Role::Admin | Role::Accountant),
            Action::ViewResultCard | Action::ViewFee | Action::Pay => {
                if role.is_staff() {
                    return match action {
                        Action::Pay => matches!(role, Role::Admin | Role::Accountant),
                        Action::ViewFee => matches!(role, Role::Admin | Role::Accountant),
                        _ => true,
                    };
                }
                match scope {
                    Scope::Any => identity.student_id.is_some(),
                    Scope::Student(owner) => identity.student_id == Some(owner),
                }
            }
        }
    }
}
