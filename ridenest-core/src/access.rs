use std::collections::HashMap;
use std::fmt;

use crate::identity::{Identity, Role};

/// Every operation a caller can ask for, HTTP or socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateRide,
    ListRides,
    GetRide,
    UpcomingRides,
    UpdateStatus,
    UpdatePassengerStatus,
    CancelRide,
    RateRide,
    AcceptRide,
    RejectRide,
    JoinRide,
    QuoteFare,
    PublishLocation,
    Subscribe,
    WatchDispatch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const ANYONE: &[Role] = &[Role::Passenger, Role::Driver, Role::Admin];
const DRIVER_OR_ADMIN: &[Role] = &[Role::Driver, Role::Admin];

/// Operation -> roles allowed to invoke it.
const PERMISSIONS: &[(Operation, &[Role])] = &[
    (Operation::CreateRide, &[Role::Passenger, Role::Driver]),
    (Operation::ListRides, ANYONE),
    (Operation::GetRide, ANYONE),
    (Operation::UpcomingRides, DRIVER_OR_ADMIN),
    (Operation::UpdateStatus, DRIVER_OR_ADMIN),
    (Operation::UpdatePassengerStatus, DRIVER_OR_ADMIN),
    (Operation::CancelRide, ANYONE),
    (Operation::RateRide, ANYONE),
    (Operation::AcceptRide, DRIVER_OR_ADMIN),
    (Operation::RejectRide, DRIVER_OR_ADMIN),
    (Operation::JoinRide, &[Role::Passenger]),
    (Operation::QuoteFare, ANYONE),
    (Operation::PublishLocation, DRIVER_OR_ADMIN),
    (Operation::Subscribe, ANYONE),
    (Operation::WatchDispatch, DRIVER_OR_ADMIN),
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AccessError {
    #[error("Role {role} may not perform {operation}")]
    Forbidden { role: Role, operation: Operation },
}

/// Role gate evaluated once per request, before any store access.
///
/// Ownership checks (is this *the* assigned driver?) need the ride document and
/// live in the lifecycle manager.
#[derive(Debug, Clone)]
pub struct AccessGate {
    table: HashMap<Operation, &'static [Role]>,
}

impl AccessGate {
    pub fn new() -> Self {
        Self {
            table: PERMISSIONS.iter().copied().collect(),
        }
    }

    pub fn allowed_roles(&self, operation: Operation) -> &'static [Role] {
        self.table.get(&operation).copied().unwrap_or(&[])
    }

    pub fn authorize(&self, identity: &Identity, operation: Operation) -> Result<(), AccessError> {
        if self.allowed_roles(operation).contains(&identity.role) {
            return Ok(());
        }

        tracing::warn!(
            user_id = %identity.user_id,
            role = %identity.role,
            %operation,
            "Access denied"
        );
        Err(AccessError::Forbidden {
            role: identity.role,
            operation,
        })
    }
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}
