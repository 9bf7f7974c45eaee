//! Permission checks.
//!
//! Admins hold every permission. Other users hold the `*Own` operations, except that they cannot
//! write their own credits. Handlers either take a [`RequiresPermission`] extractor for fixed checks, or call
//! [`can_read_all_resources`] / [`can_read_own_resource`] when the answer depends on the target.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    errors::Error,
    types::{Operation, Permission, Resource, UserId},
};

/// Whether `user` may perform `operation` on `resource` at all.
pub fn has_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    if user.is_admin {
        return true;
    }
    match (resource, operation) {
        // Balances only move through analyses and admin transactions
        (Resource::Credits, Operation::CreateOwn | Operation::UpdateOwn) => false,
        (_, Operation::CreateOwn | Operation::ReadOwn | Operation::UpdateOwn) => true,
        _ => false,
    }
}

pub fn can_read_all_resources(user: &CurrentUser, resource: Resource) -> bool {
    has_permission(user, resource, Operation::ReadAll)
}

pub fn can_read_own_resource(user: &CurrentUser, resource: Resource, owner_id: UserId) -> bool {
    user.id == owner_id && has_permission(user, resource, Operation::ReadOwn)
}

/// Read access to a record owned by `owner_id`: the owner or anyone who may read all.
pub fn can_read(user: &CurrentUser, resource: Resource, owner_id: UserId) -> bool {
    can_read_all_resources(user, resource) || can_read_own_resource(user, resource, owner_id)
}

pub fn require(user: &CurrentUser, resource: Resource, operation: Operation) -> Result<(), Error> {
    if has_permission(user, resource, operation) {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            required: Permission::Allow(resource, operation),
            action: operation,
            resource: resource.to_string(),
        })
    }
}

/// Type-level resource markers for [`RequiresPermission`]
pub mod resource {
    use crate::types::Resource;

    pub trait ResourceMarker {
        const RESOURCE: Resource;
    }

    pub struct Users;
    pub struct Credits;
    pub struct Analyses;

    impl ResourceMarker for Users {
        const RESOURCE: Resource = Resource::Users;
    }
    impl ResourceMarker for Credits {
        const RESOURCE: Resource = Resource::Credits;
    }
    impl ResourceMarker for Analyses {
        const RESOURCE: Resource = Resource::Analyses;
    }
}

/// Type-level operation markers for [`RequiresPermission`]
pub mod operation {
    use crate::types::Operation;

    pub trait OperationMarker {
        const OPERATION: Operation;
    }

    pub struct CreateAll;
    pub struct CreateOwn;
    pub struct ReadAll;
    pub struct ReadOwn;

    impl OperationMarker for CreateAll {
        const OPERATION: Operation = Operation::CreateAll;
    }
    impl OperationMarker for CreateOwn {
        const OPERATION: Operation = Operation::CreateOwn;
    }
    impl OperationMarker for ReadAll {
        const OPERATION: Operation = Operation::ReadAll;
    }
    impl OperationMarker for ReadOwn {
        const OPERATION: Operation = Operation::ReadOwn;
    }
}

/// Extractor that authenticates the caller and rejects them unless they hold `O` on `R`.
pub struct RequiresPermission<R, O> {
    pub user: CurrentUser,
    _marker: PhantomData<(R, O)>,
}

impl<R, O> FromRequestParts<AppState> for RequiresPermission<R, O>
where
    R: resource::ResourceMarker + Send + Sync,
    O: operation::OperationMarker + Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        require(&user, R::RESOURCE, O::OPERATION)?;
        Ok(Self {
            user,
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(is_admin: bool) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            username: "someone".to_string(),
            email: "someone@example.com".to_string(),
            is_admin,
            display_name: None,
        }
    }

    #[test]
    fn test_admin_has_everything() {
        let admin = user(true);
        for resource in [Resource::Users, Resource::Credits, Resource::Analyses] {
            assert!(can_read_all_resources(&admin, resource));
            assert!(can_read(&admin, resource, Uuid::new_v4()));
            assert!(require(&admin, resource, Operation::CreateAll).is_ok());
        }
    }

    #[test]
    fn test_standard_user_limited_to_own() {
        let standard = user(false);
        assert!(!can_read_all_resources(&standard, Resource::Analyses));
        assert!(can_read_own_resource(&standard, Resource::Analyses, standard.id));
        assert!(!can_read_own_resource(&standard, Resource::Analyses, Uuid::new_v4()));
        assert!(can_read(&standard, Resource::Credits, standard.id));
        assert!(require(&standard, Resource::Analyses, Operation::CreateOwn).is_ok());
        assert!(require(&standard, Resource::Credits, Operation::CreateOwn).is_err());

        let err = require(&standard, Resource::Credits, Operation::CreateAll).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.user_message(), "Insufficient permissions to create credits");
    }
}
