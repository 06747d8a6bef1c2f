//! Caller identity, as forwarded by the auth gateway in front of this service.
//!
//! Headers: `x-user-id` (required), `x-user-role` (`student` | `admin`,
//! default `student`), `x-batch-id` (optional).

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::Serialize;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const BATCH_ID_HEADER: &str = "x-batch-id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Student,
  Admin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser {
  pub id: i64,
  pub role: Role,
  pub batch_id: Option<i64>,
}

impl CurrentUser {
  pub fn require_admin(&self) -> Result<(), AppError> {
    match self.role {
      Role::Admin => Ok(()),
      Role::Student => Err(AppError::Forbidden),
    }
  }

  fn from_parts(parts: &Parts) -> Result<Self, AppError> {
    let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
    let id = header(USER_ID_HEADER)
      .and_then(|v| v.parse::<i64>().ok())
      .ok_or(AppError::Unauthenticated)?;
    let role = match header(USER_ROLE_HEADER) {
      Some(r) if r.eq_ignore_ascii_case("admin") => Role::Admin,
      _ => Role::Student,
    };
    let batch_id = header(BATCH_ID_HEADER).and_then(|v| v.parse::<i64>().ok());
    Ok(Self { id, role, batch_id })
  }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
  S: Send + Sync,
{
  type Rejection = AppError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    Self::from_parts(parts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::Request;

  fn parts(headers: &[(&str, &str)]) -> Parts {
    let mut req = Request::builder();
    for (k, v) in headers {
      req = req.header(*k, *v);
    }
    req.body(()).unwrap().into_parts().0
  }

  #[test]
  fn reads_identity_headers() {
    let user = CurrentUser::from_parts(&parts(&[("x-user-id", "7"), ("x-user-role", "admin"), ("x-batch-id", "2")])).unwrap();
    assert_eq!(user, CurrentUser { id: 7, role: Role::Admin, batch_id: Some(2) });
    assert!(user.require_admin().is_ok());
  }

  #[test]
  fn missing_id_is_unauthenticated_and_students_are_not_admins() {
    assert!(matches!(CurrentUser::from_parts(&parts(&[])), Err(AppError::Unauthenticated)));
    let student = CurrentUser::from_parts(&parts(&[("x-user-id", "9")])).unwrap();
    assert_eq!(student.role, Role::Student);
    assert!(matches!(student.require_admin(), Err(AppError::Forbidden)));
  }
}
