//! Actor identity and the capability table.
//!
//! Authentication itself is an external collaborator: requests arrive with an
//! already-verified identity (forwarded by the gateway as headers), and this
//! module only decides what that identity may do.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Staff,
    Technician,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::Technician => "technician",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "staff" => Ok(Role::Staff),
            "technician" => Ok(Role::Technician),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// Every lifecycle entry point names one of these and checks it exactly once,
/// instead of scattering role comparisons through the services.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    CreateOrder,
    TransitionOrder,
    CancelOrderAsCustomer,
    CancelOrderAsShop,
    CreateReturn,
    ReviewReturn,
    CompleteReturn,
    VoidWarranty,
}

impl Role {
    pub fn allows(self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Customer => matches!(capability, CreateOrder | CancelOrderAsCustomer | CreateReturn),
            Role::Staff => matches!(
                capability,
                CreateOrder | TransitionOrder | CancelOrderAsShop | ReviewReturn
            ),
            Role::Technician => matches!(capability, CompleteReturn),
            Role::Admin => matches!(
                capability,
                CreateOrder | TransitionOrder | CancelOrderAsShop | ReviewReturn | VoidWarranty
            ),
        }
    }
}

/// Authenticated caller of a lifecycle operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn require(&self, capability: Capability) -> Result<(), ServiceError> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "role '{}' may not perform this operation",
                self.role
            )))
        }
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                ServiceError::Forbidden("missing or malformed actor identity".to_string())
            })?;

        let role = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Role::from_str(v).ok())
            .ok_or_else(|| ServiceError::Forbidden("missing or malformed actor role".to_string()))?;

        Ok(Actor { id, role })
    }
}
