//! Service-entry predicates used when building a certificate pool.

use std::fmt;
use std::str::FromStr;

use tsl_types::TslError;

use crate::ast::ServiceInformation;

/// The service is currently in effect.
pub const STATUS_GRANTED: &str = "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/granted";
/// The service has been withdrawn.
pub const STATUS_WITHDRAWN: &str = "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/withdrawn";
/// Pre-eIDAS "under supervision" status.
pub const STATUS_UNDER_SUPERVISION: &str =
    "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/undersupervision";
/// Pre-eIDAS "accredited" status.
pub const STATUS_ACCREDITED: &str = "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/accredited";

/// How multiple `status:` filters combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusLogic {
    /// The entry's status contains any listed value.
    #[default]
    Or,
    /// The entry's status contains every listed value.
    And,
}

impl FromStr for StatusLogic {
    type Err = TslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "or" => Ok(StatusLogic::Or),
            "and" => Ok(StatusLogic::And),
            other => Err(TslError::validation(
                "status-logic",
                other,
                "expected 'and' or 'or'",
            )),
        }
    }
}

impl fmt::Display for StatusLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLogic::Or => f.write_str("or"),
            StatusLogic::And => f.write_str("and"),
        }
    }
}

/// Which service entries contribute trust anchors.
///
/// Service types are OR'ed substring matches (empty = any type). Statuses
/// are substring matches combined by [`StatusLogic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePolicy {
    pub service_types: Vec<String>,
    pub statuses: Vec<String>,
    pub status_logic: StatusLogic,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            service_types: Vec::new(),
            statuses: vec![STATUS_GRANTED.to_string()],
            status_logic: StatusLogic::Or,
        }
    }
}

impl ServicePolicy {
    /// A policy that accepts any service type with any status.
    pub fn any() -> Self {
        Self {
            service_types: Vec::new(),
            statuses: Vec::new(),
            status_logic: StatusLogic::Or,
        }
    }

    pub fn accepts(&self, service: &ServiceInformation) -> bool {
        self.accepts_type(&service.service_type) && self.accepts_status(&service.status)
    }

    fn accepts_type(&self, service_type: &str) -> bool {
        self.service_types.is_empty()
            || self
                .service_types
                .iter()
                .any(|t| service_type.contains(t.as_str()))
    }

    fn accepts_status(&self, status: &str) -> bool {
        if self.statuses.is_empty() {
            return true;
        }
        match self.status_logic {
            StatusLogic::Or => self.statuses.iter().any(|s| status.contains(s.as_str())),
            StatusLogic::And => self.statuses.iter().all(|s| status.contains(s.as_str())),
        }
    }
}
