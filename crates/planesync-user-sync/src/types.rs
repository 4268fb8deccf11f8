// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and result types of the user-role synchronization.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationFailure};

/// The three role changes the workflow knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Grant a role, creating the App Plane user if needed.
    Assign,
    /// Replace the user's current role.
    Update,
    /// Take the role away (and optionally deactivate the user in the IdP).
    Revoke,
}

impl Operation {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Update => "update",
            Self::Revoke => "revoke",
        }
    }

    /// Parse an exact wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "assign" => Some(Self::Assign),
            "update" => Some(Self::Update),
            "revoke" => Some(Self::Revoke),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level at which a role binding applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Tenant,
    Workspace,
    Project,
}

/// A synchronization request as submitted by the Control Plane.
///
/// Required fields default to empty so that an incomplete request reaches the
/// validator (and fails with a precise reason) instead of failing to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUserRoleInput {
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub tenant_key: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_user_id: Option<String>,
    #[serde(default)]
    pub role_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_role_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_type: Option<ScopeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(default)]
    pub performed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_kind: Option<String>,
}

/// What the request asks for, with the fields only that operation uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleChange {
    Assign,
    Update {
        /// Role being replaced; recorded for audit.
        previous_role_key: Option<String>,
    },
    Revoke {
        /// IdP integration to deactivate the user in, as given by the caller.
        identity_provider_kind: Option<String>,
    },
}

impl RoleChange {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Assign => Operation::Assign,
            Self::Update { .. } => Operation::Update,
            Self::Revoke { .. } => Operation::Revoke,
        }
    }
}

/// Role scope, when the binding is narrower than the whole tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,
}

/// A validated synchronization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub change: RoleChange,
    pub tenant_id: String,
    pub tenant_key: String,
    pub user_id: String,
    pub user_email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub identity_provider_user_id: Option<String>,
    pub role_key: String,
    pub scope: Option<Scope>,
    pub performed_by: String,
}

impl SyncRequest {
    /// Validate `input` and convert it into a typed request.
    pub fn parse(input: &SyncUserRoleInput) -> Result<Self, ValidationFailure> {
        validation::validate(input)?;

        let operation = Operation::parse(&input.operation)
            .ok_or_else(|| ValidationFailure::InvalidOperation(input.operation.clone()))?;
        let change = match operation {
            Operation::Assign => RoleChange::Assign,
            Operation::Update => RoleChange::Update {
                previous_role_key: input.previous_role_key.clone(),
            },
            Operation::Revoke => RoleChange::Revoke {
                identity_provider_kind: input.identity_provider_kind.clone(),
            },
        };

        Ok(Self {
            change,
            tenant_id: input.tenant_id.clone(),
            tenant_key: input.tenant_key.clone(),
            user_id: input.user_id.clone(),
            user_email: input.user_email.clone(),
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            identity_provider_user_id: input.identity_provider_user_id.clone(),
            role_key: input.role_key.clone(),
            scope: input.scope_type.map(|scope_type| Scope {
                scope_type,
                scope_id: input.scope_id.clone(),
            }),
            performed_by: input.performed_by.clone(),
        })
    }

    pub fn operation(&self) -> Operation {
        self.change.operation()
    }
}

/// Output of a successful synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub operation: Operation,
    pub tenant_id: String,
    pub user_id: String,
    pub role_key: String,
    /// User id assigned by the App Plane, once the primary step has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_plane_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(operation: &str) -> SyncUserRoleInput {
        SyncUserRoleInput {
            operation: operation.to_string(),
            tenant_id: "t1".to_string(),
            tenant_key: "acme".to_string(),
            user_id: "u1".to_string(),
            user_email: "a@b.com".to_string(),
            role_key: "admin".to_string(),
            performed_by: "p1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_operation_parse_accepts_exact_names_only() {
        assert_eq!(Operation::parse("assign"), Some(Operation::Assign));
        assert_eq!(Operation::parse("update"), Some(Operation::Update));
        assert_eq!(Operation::parse("revoke"), Some(Operation::Revoke));
        for other in ["Revoke", "UPDATE", " assign", "assign\n", "delete", ""] {
            assert_eq!(Operation::parse(other), None, "{other:?}");
        }
    }

    #[test]
    fn test_parse_rejects_padded_values() {
        let padded_email = SyncUserRoleInput {
            user_email: " a@b.com".to_string(),
            ..input("assign")
        };
        assert!(matches!(
            SyncRequest::parse(&padded_email),
            Err(ValidationFailure::InvalidEmail(_))
        ));

        let capitalised = input("Assign");
        assert!(matches!(
            SyncRequest::parse(&capitalised),
            Err(ValidationFailure::InvalidOperation(ref op)) if op == "Assign"
        ));

        let request = SyncRequest::parse(&input("assign")).unwrap();
        assert_eq!(request.user_email, "a@b.com");
    }

    #[test]
    fn test_input_uses_camel_case_on_the_wire() {
        let json = serde_json::json!({
            "operation": "update",
            "tenantId": "t1",
            "tenantKey": "acme",
            "userId": "u1",
            "userEmail": "a@b.com",
            "roleKey": "engineer",
            "previousRoleKey": "viewer",
            "scopeType": "workspace",
            "scopeId": "ws-1",
            "performedBy": "p1"
        });
        let input: SyncUserRoleInput = serde_json::from_value(json).unwrap();
        assert_eq!(input.previous_role_key.as_deref(), Some("viewer"));
        assert_eq!(input.scope_type, Some(ScopeType::Workspace));
    }

    #[test]
    fn test_missing_fields_decode_as_empty() {
        let input: SyncUserRoleInput =
            serde_json::from_value(serde_json::json!({"operation": "assign"})).unwrap();
        assert!(input.tenant_id.is_empty());
        assert!(SyncRequest::parse(&input).is_err());
    }

    #[test]
    fn test_parse_builds_operation_variant() {
        let mut revoke = input("revoke");
        revoke.identity_provider_kind = Some("keycloak".to_string());
        let request = SyncRequest::parse(&revoke).unwrap();
        assert_eq!(
            request.change,
            RoleChange::Revoke {
                identity_provider_kind: Some("keycloak".to_string())
            }
        );

        let mut update = input("update");
        update.previous_role_key = Some("viewer".to_string());
        let request = SyncRequest::parse(&update).unwrap();
        assert_eq!(request.operation(), Operation::Update);
        assert_eq!(
            request.change,
            RoleChange::Update {
                previous_role_key: Some("viewer".to_string())
            }
        );
    }

    #[test]
    fn test_result_omits_absent_fields() {
        let result = SyncResult {
            success: true,
            operation: Operation::Assign,
            tenant_id: "t1".to_string(),
            user_id: "u1".to_string(),
            role_key: "admin".to_string(),
            app_plane_user_id: None,
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["operation"], "assign");
        assert!(json.get("appPlaneUserId").is_none());
        assert!(json.get("error").is_none());
    }
}
