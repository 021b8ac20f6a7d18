use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;

/// Identity resolved by the auth layer for one scheduling request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
    pub auth_token: String,
}

impl Caller {
    pub fn new(user_id: Uuid, role: Role, auth_token: impl Into<String>) -> Self {
        Self { user_id, role, auth_token: auth_token.into() }
    }

    pub fn from_user(user: &User, auth_token: impl Into<String>) -> Result<Self, AppError> {
        let user_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppError::Auth(format!("Subject '{}' is not a valid user id", user.id)))?;
        Ok(Self::new(user_id, user.role(), auth_token))
    }

    pub fn is(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_user_requires_uuid_subject() {
        let mut user = User {
            id: Uuid::new_v4().to_string(),
            email: None,
            role: Some("nurse".to_string()),
            metadata: None,
            created_at: None,
        };
        let caller = Caller::from_user(&user, "t").unwrap();
        assert_eq!(caller.role, Role::Nurse);

        user.id = "service-account".to_string();
        assert!(matches!(Caller::from_user(&user, "t"), Err(AppError::Auth(_))));
    }
}
